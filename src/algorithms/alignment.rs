use log::{debug, info, warn};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::algorithms::geodetic::{enu_to_lla, lla_to_enu};
use crate::core::{GeodeticPosition, DETERMINANT_TOLERANCE, GEOMETRY_EPSILON};
use crate::validation::error::{GeometryIssue, NumericalWarning, PositioningError, PositioningResult};

/// Local frame to ENU rigid transform anchored at a geodetic reference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RigidTransform {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
    pub reference: GeodeticPosition,
}

impl RigidTransform {
    /// Map a local position into ENU around the reference
    pub fn apply(&self, local: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * local + self.translation
    }
}

/// One surveyed anchor: its calibrated local position and its GNSS fix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurveyPoint {
    pub local: Vector3<f64>,
    pub geodetic: GeodeticPosition,
}

/// Maps local UWB coordinates to geodetic coordinates from three surveyed
/// anchors. The transform is computed once per survey and cached.
pub struct RigidAlignmentCalibrator {
    /// Allowed deviation of det(R) from +1 before a warning is raised
    pub determinant_tolerance: f64,
    transform: Option<RigidTransform>,
    survey: Vec<SurveyPoint>,
    last_warning: Option<NumericalWarning>,
}

impl Default for RigidAlignmentCalibrator {
    fn default() -> Self {
        Self {
            determinant_tolerance: DETERMINANT_TOLERANCE,
            transform: None,
            survey: Vec::new(),
            last_warning: None,
        }
    }
}

/// Right-handed orthonormal basis spanned by a triangle, as matrix columns.
fn triangle_basis(p0: &Vector3<f64>, p1: &Vector3<f64>, p2: &Vector3<f64>) -> PositioningResult<Matrix3<f64>> {
    let v1 = p1 - p0;
    let v2 = p2 - p0;

    let v1_norm = v1.norm();
    if v1_norm < GEOMETRY_EPSILON {
        return Err(PositioningError::degenerate(GeometryIssue::Coincident));
    }
    let normal = v1.cross(&v2);
    let normal_norm = normal.norm();
    if normal_norm < GEOMETRY_EPSILON {
        return Err(PositioningError::degenerate(GeometryIssue::Collinear));
    }

    let ex = v1 / v1_norm;
    let ez = normal / normal_norm;
    let ey = ez.cross(&ex);
    Ok(Matrix3::from_columns(&[ex, ey, ez]))
}

/// Warning when det(R) is further than `tolerance` from +1
fn determinant_warning(rotation: &Matrix3<f64>, tolerance: f64) -> Option<NumericalWarning> {
    let determinant = rotation.determinant();
    debug!("alignment rotation det={:.6}", determinant);
    if (determinant - 1.0).abs() > tolerance {
        Some(NumericalWarning::DeterminantOutOfTolerance { determinant, tolerance })
    } else {
        None
    }
}

impl RigidAlignmentCalibrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_determinant_tolerance(tolerance: f64) -> Self {
        Self {
            determinant_tolerance: tolerance,
            ..Self::default()
        }
    }

    /// Compute the transform from at least three correspondences. Only the
    /// first three are used; the first geodetic fix becomes the ENU origin.
    ///
    /// Returns `false` (and keeps any previous transform) on fewer than three
    /// points or a collinear survey.
    pub fn calibrate(&mut self, local: &[Vector3<f64>], geodetic: &[GeodeticPosition]) -> bool {
        match self.compute(local, geodetic) {
            Ok(transform) => {
                self.survey = local
                    .iter()
                    .zip(geodetic.iter())
                    .take(3)
                    .map(|(l, g)| SurveyPoint { local: *l, geodetic: *g })
                    .collect();
                self.transform = Some(transform);
                info!(
                    "alignment calibrated, reference lat={:.7} lon={:.7} alt={:.2}",
                    transform.reference.lat, transform.reference.lon, transform.reference.alt
                );
                true
            }
            Err(e) => {
                warn!("alignment calibration failed: {}", e);
                false
            }
        }
    }

    /// Same as [`calibrate`](Self::calibrate) taking paired survey points
    pub fn calibrate_survey(&mut self, survey: &[SurveyPoint]) -> bool {
        let local: Vec<Vector3<f64>> = survey.iter().map(|s| s.local).collect();
        let geodetic: Vec<GeodeticPosition> = survey.iter().map(|s| s.geodetic).collect();
        self.calibrate(&local, &geodetic)
    }

    fn compute(&mut self, local: &[Vector3<f64>], geodetic: &[GeodeticPosition]) -> PositioningResult<RigidTransform> {
        if local.len() < 3 || geodetic.len() < 3 {
            return Err(PositioningError::InsufficientAnchors {
                available: local.len().min(geodetic.len()),
                required: 3,
            });
        }

        let reference = geodetic[0];
        let enu: Vec<Vector3<f64>> = geodetic[..3].iter().map(|g| lla_to_enu(g, &reference)).collect();

        let local_basis = triangle_basis(&local[0], &local[1], &local[2])?;
        let enu_basis = triangle_basis(&enu[0], &enu[1], &enu[2])?;

        let rotation = enu_basis * local_basis.transpose();
        let translation = enu[0] - rotation * local[0];

        self.last_warning = determinant_warning(&rotation, self.determinant_tolerance);
        if let Some(warning) = &self.last_warning {
            warn!("{}", warning);
        }

        Ok(RigidTransform {
            rotation,
            translation,
            reference,
        })
    }

    /// Map a local position to geodetic coordinates
    pub fn transform(&self, local: &Vector3<f64>) -> PositioningResult<GeodeticPosition> {
        let transform = self.transform.as_ref().ok_or(PositioningError::NotCalibrated)?;
        Ok(enu_to_lla(&transform.apply(local), &transform.reference))
    }

    pub fn is_calibrated(&self) -> bool {
        self.transform.is_some()
    }

    pub fn rigid_transform(&self) -> Option<&RigidTransform> {
        self.transform.as_ref()
    }

    pub fn rotation(&self) -> Option<Matrix3<f64>> {
        self.transform.map(|t| t.rotation)
    }

    pub fn translation(&self) -> Option<Vector3<f64>> {
        self.transform.map(|t| t.translation)
    }

    /// ENU origin, the first surveyed geodetic fix
    pub fn reference(&self) -> Option<GeodeticPosition> {
        self.transform.map(|t| t.reference)
    }

    /// Geodetic fix of a surveyed anchor by survey index
    pub fn survey_geodetic(&self, index: usize) -> Option<GeodeticPosition> {
        self.survey.get(index).map(|s| s.geodetic)
    }

    /// Warning raised by the most recent successful calibration, if any
    pub fn last_warning(&self) -> Option<NumericalWarning> {
        self.last_warning
    }

    pub fn reset(&mut self) {
        self.transform = None;
        self.survey.clear();
        self.last_warning = None;
    }
}
