//! Physical constants and system parameters

/// WGS84 semi-major axis (m)
pub const WGS84_A: f64 = 6378137.0;

/// WGS84 semi-minor axis (m)
pub const WGS84_B: f64 = 6356752.314245;

/// WGS84 first eccentricity squared, `1 - (b/a)^2`
pub const WGS84_E2: f64 = 1.0 - (WGS84_B / WGS84_A) * (WGS84_B / WGS84_A);

/// Speed of light in vacuum (m/s)
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Maximum number of anchors a trilateration engine can hold
pub const MAX_ANCHORS: usize = 8;

/// Minimum anchors for a 3D fix
pub const MIN_ANCHORS_3D: usize = 3;

/// Sentinel for an invalid range slot (millimeters)
pub const INVALID_RANGE_MM: i32 = -1;

/// Length below which a basis vector is treated as collapsed (m)
pub const GEOMETRY_EPSILON: f64 = 1e-10;

/// Margin used to nudge infeasible circle radii back into range (m)
pub const CIRCLE_EPSILON: f64 = 1e-6;

/// Allowed deviation of a rotation determinant from +1
pub const DETERMINANT_TOLERANCE: f64 = 0.1;

/// Fixed number of latitude refinement steps in ECEF -> LLA
pub const ECEF_LATITUDE_ITERATIONS: usize = 10;
