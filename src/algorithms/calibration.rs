//! Anchor self-calibration from inter-anchor distances via classical MDS.
//!
//! The recovered layout is fixed up to a rigid motion by three gauge rules:
//! A0 at the origin, A1 on the positive x axis, A2 on the non-negative y side.

use log::{debug, info, warn};
use nalgebra::{DMatrix, SymmetricEigen, Vector2, Vector3};

use crate::algorithms::circle::circle_intersection;
use crate::core::{AnchorId, CalibrationResult, DistanceUnit, LocalAnchor, MAX_ANCHORS, MIN_ANCHORS_3D};
use crate::processing::session::{CalibrationSession, SessionStatus};
use crate::validation::error::{NumericalWarning, PositioningError, PositioningResult};

/// Number of embedding dimensions recovered by MDS
const MDS_DIMENSIONS: usize = 2;

/// Relative size below which a negative eigenvalue counts as rounding noise
const EIGENVALUE_NOISE_RATIO: f64 = 1e-9;

const EIGEN_EPSILON: f64 = 1e-12;
const EIGEN_MAX_ITERATIONS: usize = 10_000;

/// Classical MDS embedding of a symmetric distance matrix (meters) into the
/// plane, before gauge fixing. Negative leading eigenvalues are clipped to
/// zero. A negative eigenvalue anywhere in the spectrum means the distances
/// are not Euclidean; the most negative one is reported as a warning.
pub fn classical_mds(distances: &DMatrix<f64>) -> PositioningResult<(Vec<Vector2<f64>>, Vec<NumericalWarning>)> {
    let n = distances.nrows();
    if n != distances.ncols() {
        return Err(PositioningError::InvalidInput {
            reason: format!("distance matrix must be square, got {}x{}", n, distances.ncols()),
        });
    }
    if n < 2 {
        return Err(PositioningError::InsufficientAnchors { available: n, required: 2 });
    }
    if distances.iter().any(|d| !d.is_finite()) {
        return Err(PositioningError::numerical("mds", "distance matrix contains non-finite values"));
    }

    let squared = distances.component_mul(distances);
    let centering = DMatrix::<f64>::identity(n, n) - DMatrix::from_element(n, n, 1.0 / n as f64);
    let b = &centering * squared * &centering * -0.5;

    let eigen = SymmetricEigen::try_new(b, EIGEN_EPSILON, EIGEN_MAX_ITERATIONS)
        .ok_or_else(|| PositioningError::numerical("mds", "eigendecomposition did not converge"))?;

    // Descending eigenvalue order; ties broken by index for reproducibility
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        eigen.eigenvalues[b]
            .partial_cmp(&eigen.eigenvalues[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    let largest = eigen.eigenvalues.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    let mut warnings = Vec::new();
    // Last in descending order is the most negative
    if let Some((rank, &index)) = order.iter().enumerate().last() {
        let value = eigen.eigenvalues[index];
        if value < 0.0 && value.abs() > EIGENVALUE_NOISE_RATIO * largest {
            let warning = NumericalWarning::NegativeEigenvalue { index: rank, value };
            warn!("{}", warning);
            warnings.push(warning);
        }
    }

    let mut coords = vec![Vector2::zeros(); n];
    for (k, &index) in order.iter().take(MDS_DIMENSIONS).enumerate() {
        let scale = eigen.eigenvalues[index].max(0.0).sqrt();
        let vector = eigen.eigenvectors.column(index);
        for (row, coord) in coords.iter_mut().enumerate() {
            coord[k] = vector[row] * scale;
        }
    }

    Ok((coords, warnings))
}

/// Polar angle of a point, `acos(x/r)` signed by y; zero at the origin.
fn polar_angle(point: &Vector2<f64>) -> f64 {
    let r = point.norm();
    if r < 1e-12 {
        return 0.0;
    }
    let angle = (point.x / r).clamp(-1.0, 1.0).acos();
    if point.y < 0.0 {
        -angle
    } else {
        angle
    }
}

/// Apply the three gauge rules in place
pub fn fix_gauge(coords: &mut [Vector2<f64>]) {
    if coords.is_empty() {
        return;
    }

    let origin = coords[0];
    for coord in coords.iter_mut() {
        *coord -= origin;
    }

    if coords.len() > 1 {
        let angle = polar_angle(&coords[1]);
        let (sin, cos) = angle.sin_cos();
        for coord in coords.iter_mut() {
            let (x, y) = (coord.x, coord.y);
            coord.x = x * cos + y * sin;
            coord.y = -x * sin + y * cos;
        }
    }

    if coords.len() > 2 && coords[2].y < 0.0 {
        for coord in coords.iter_mut() {
            coord.y = -coord.y;
        }
    }
}

fn to_anchors(coords: &[Vector2<f64>]) -> Vec<LocalAnchor> {
    coords
        .iter()
        .enumerate()
        .map(|(id, c)| LocalAnchor {
            id: id as AnchorId,
            position: Vector3::new(c.x, c.y, 0.0),
        })
        .collect()
}

/// Collects inter-anchor ranges and turns them into a local anchor layout
pub struct AnchorCalibrationEngine {
    session: CalibrationSession,
    /// Permit the three-anchor fallback that approximates a missing A1-A2
    pub allow_d12_estimate: bool,
    last_result: Option<CalibrationResult>,
}

impl AnchorCalibrationEngine {
    pub fn new(num_anchors: usize, min_samples_per_pair: usize) -> Self {
        Self::with_session(CalibrationSession::new(num_anchors, min_samples_per_pair))
    }

    pub fn with_session(session: CalibrationSession) -> Self {
        Self {
            session,
            allow_d12_estimate: true,
            last_result: None,
        }
    }

    /// Add one inter-anchor sample in millimeters
    pub fn add_measurement(&mut self, from: AnchorId, to: AnchorId, distance_mm: f64) -> bool {
        self.session.add_measurement(from, to, distance_mm, DistanceUnit::Millimeters)
    }

    pub fn add_measurement_with_unit(&mut self, from: AnchorId, to: AnchorId, distance: f64, unit: DistanceUnit) -> bool {
        self.session.add_measurement(from, to, distance, unit)
    }

    pub fn session(&self) -> &CalibrationSession {
        &self.session
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    /// Drop collected samples and the previous result
    pub fn reset(&mut self) {
        self.session.clear();
        self.last_result = None;
    }

    pub fn last_result(&self) -> Option<&CalibrationResult> {
        self.last_result.as_ref()
    }

    /// Calibrate from the collected samples. Never fails: problems are
    /// reported through `success == false` and `error`.
    pub fn calibrate(&mut self) -> CalibrationResult {
        let result = match self.try_calibrate() {
            Ok(result) => result,
            Err(e) => {
                warn!("anchor calibration failed: {}", e);
                CalibrationResult::failed(e.to_string())
            }
        };
        self.last_result = Some(result.clone());
        result
    }

    /// Calibrate from a full N×N matrix in millimeters, bypassing sample
    /// collection. A zero entry is filled from its mirror.
    pub fn calibrate_matrix(&mut self, distances_mm: &DMatrix<f64>) -> CalibrationResult {
        let result = match symmetric_matrix_m(distances_mm).and_then(|m| calibrate_layout(&m)) {
            Ok(result) => result,
            Err(e) => {
                warn!("anchor calibration failed: {}", e);
                CalibrationResult::failed(e.to_string())
            }
        };
        self.last_result = Some(result.clone());
        result
    }

    fn try_calibrate(&self) -> PositioningResult<CalibrationResult> {
        let n = self.session.num_anchors();
        if !(MIN_ANCHORS_3D..=MAX_ANCHORS).contains(&n) {
            return Err(PositioningError::InvalidInput {
                reason: format!("calibration needs {} to {} anchors, session has {}", MIN_ANCHORS_3D, MAX_ANCHORS, n),
            });
        }

        if n == 3 && self.allow_d12_estimate && self.session.sample_count(1, 2) == 0 {
            let d01 = self.session.required_distance_m(0, 1)?;
            let d02 = self.session.required_distance_m(0, 2)?;
            return estimated_triangle(d01, d02);
        }

        let matrix = self.session.distance_matrix_m()?;
        debug!("calibration distance matrix (m): {}", matrix);
        calibrate_layout(&matrix)
    }
}

/// Three-anchor layout when only d01 and d02 were measured. d12 is taken as
/// their mean, which has no error bound.
fn estimated_triangle(d01: f64, d02: f64) -> PositioningResult<CalibrationResult> {
    let d12 = (d01 + d02) / 2.0;
    warn!("A1-A2 distance not measured, estimating {:.3} m from d01/d02", d12);

    let a0 = Vector3::zeros();
    let a1 = Vector3::new(d01, 0.0, 0.0);
    let a2 = circle_intersection(&a0, &a1, d02, d12, true)?;

    let mut result = CalibrationResult::succeeded(vec![
        LocalAnchor { id: 0, position: a0 },
        LocalAnchor { id: 1, position: a1 },
        LocalAnchor { id: 2, position: a2 },
    ]);
    result.d12_estimated = true;
    Ok(result)
}

/// Validate and symmetrize a millimeter matrix, returning meters
fn symmetric_matrix_m(distances_mm: &DMatrix<f64>) -> PositioningResult<DMatrix<f64>> {
    let n = distances_mm.nrows();
    if n != distances_mm.ncols() {
        return Err(PositioningError::InvalidInput {
            reason: format!("distance matrix must be square, got {}x{}", n, distances_mm.ncols()),
        });
    }
    if !(MIN_ANCHORS_3D..=MAX_ANCHORS).contains(&n) {
        return Err(PositioningError::InsufficientAnchors {
            available: n,
            required: MIN_ANCHORS_3D,
        });
    }

    let mut matrix = DMatrix::zeros(n, n);
    for i in 0..n {
        for j in (i + 1)..n {
            let (forward, backward) = (distances_mm[(i, j)], distances_mm[(j, i)]);
            let value = if forward != 0.0 { forward } else { backward };
            let (from, to) = (i as AnchorId, j as AnchorId);
            if value == 0.0 {
                return Err(PositioningError::MissingDistance { from, to });
            }
            if !(value > 0.0) {
                return Err(PositioningError::InvalidDistance { from, to, value });
            }
            matrix[(i, j)] = value / 1000.0;
            matrix[(j, i)] = value / 1000.0;
        }
    }
    Ok(matrix)
}

/// MDS plus gauge fixing on a validated meter matrix
fn calibrate_layout(distances_m: &DMatrix<f64>) -> PositioningResult<CalibrationResult> {
    let (mut coords, warnings) = classical_mds(distances_m)?;
    fix_gauge(&mut coords);
    if coords.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return Err(PositioningError::numerical("mds", "non-finite anchor coordinates"));
    }

    let anchors = to_anchors(&coords);
    info!(
        "calibrated {} anchors: {}",
        anchors.len(),
        anchors
            .iter()
            .map(|a| format!("A{}=({:.3}, {:.3})", a.id, a.position.x, a.position.y))
            .collect::<Vec<_>>()
            .join(" ")
    );
    let mut result = CalibrationResult::succeeded(anchors);
    result.warnings = warnings;
    Ok(result)
}
