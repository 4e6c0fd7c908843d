//! WGS84 conversions between geodetic (LLA), earth-centered (ECEF) and
//! local tangent plane (ENU) frames.
//!
//! All functions are pure. Invalid input (NaN, infinities) propagates into
//! the output unchecked; callers are responsible for feeding sane values.

use nalgebra::{Matrix3, Vector3};

use crate::core::{GeodeticPosition, ECEF_LATITUDE_ITERATIONS, WGS84_A, WGS84_B, WGS84_E2};

/// Radius of curvature in the prime vertical at the given latitude (radians)
fn prime_vertical_radius(lat_rad: f64) -> f64 {
    WGS84_A / (1.0 - WGS84_E2 * lat_rad.sin().powi(2)).sqrt()
}

/// Rotation matrix taking an ECEF delta into ENU at the reference position
pub fn enu_rotation(reference: &GeodeticPosition) -> Matrix3<f64> {
    let lat_rad = reference.lat.to_radians();
    let lon_rad = reference.lon.to_radians();

    let sin_lat = lat_rad.sin();
    let cos_lat = lat_rad.cos();
    let sin_lon = lon_rad.sin();
    let cos_lon = lon_rad.cos();

    Matrix3::new(
        -sin_lon,           cos_lon,            0.0,
        -sin_lat * cos_lon, -sin_lat * sin_lon, cos_lat,
        cos_lat * cos_lon,  cos_lat * sin_lon,  sin_lat,
    )
}

/// Convert geodetic coordinates (degrees, meters) to ECEF (meters)
pub fn lla_to_ecef(position: &GeodeticPosition) -> Vector3<f64> {
    let lat_rad = position.lat.to_radians();
    let lon_rad = position.lon.to_radians();
    let n = prime_vertical_radius(lat_rad);

    let x = (n + position.alt) * lat_rad.cos() * lon_rad.cos();
    let y = (n + position.alt) * lat_rad.cos() * lon_rad.sin();
    let z = (n * (1.0 - WGS84_E2) + position.alt) * lat_rad.sin();

    Vector3::new(x, y, z)
}

/// Convert ECEF (meters) to geodetic coordinates.
///
/// Latitude is refined with a fixed number of fixed-point iterations, which
/// converges well below millimeter level for terrestrial altitudes. At the
/// poles `cos(lat)` vanishes and the altitude is taken as `|z| - b`.
pub fn ecef_to_lla(ecef: &Vector3<f64>) -> GeodeticPosition {
    let lon = ecef.y.atan2(ecef.x);
    let p = (ecef.x * ecef.x + ecef.y * ecef.y).sqrt();

    let mut lat = ecef.z.atan2(p * (1.0 - WGS84_E2));
    for _ in 0..ECEF_LATITUDE_ITERATIONS {
        let n = prime_vertical_radius(lat);
        lat = (ecef.z + WGS84_E2 * n * lat.sin()).atan2(p);
    }

    let n = prime_vertical_radius(lat);
    let cos_lat = lat.cos();
    let alt = if cos_lat.abs() > 1e-10 {
        p / cos_lat - n
    } else {
        ecef.z.abs() - WGS84_B
    };

    GeodeticPosition {
        lat: lat.to_degrees(),
        lon: lon.to_degrees(),
        alt,
    }
}

/// Convert ECEF to ENU relative to a geodetic reference
pub fn ecef_to_enu(ecef: &Vector3<f64>, reference: &GeodeticPosition) -> Vector3<f64> {
    let delta = ecef - lla_to_ecef(reference);
    enu_rotation(reference) * delta
}

/// Convert ENU relative to a geodetic reference back to geodetic coordinates
pub fn enu_to_lla(enu: &Vector3<f64>, reference: &GeodeticPosition) -> GeodeticPosition {
    let delta = enu_rotation(reference).transpose() * enu;
    ecef_to_lla(&(lla_to_ecef(reference) + delta))
}

/// Convenience: geodetic position straight into ENU
pub fn lla_to_enu(position: &GeodeticPosition, reference: &GeodeticPosition) -> Vector3<f64> {
    ecef_to_enu(&lla_to_ecef(position), reference)
}
