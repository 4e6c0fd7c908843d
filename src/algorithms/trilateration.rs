use log::{debug, warn};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::core::{
    AnchorId, LocalAnchor, PositionEstimate, RangeSet, GEOMETRY_EPSILON, MAX_ANCHORS, MIN_ANCHORS_3D,
};
use crate::validation::error::{GeometryIssue, PositioningError, PositioningResult};

/// Solves a tag position from anchor positions and matching ranges (meters).
pub trait PositionSolver {
    fn solve(&self, anchors: &[Vector3<f64>], ranges: &[f64]) -> PositioningResult<Vector3<f64>>;

    fn name(&self) -> &'static str;
}

/// Exact intersection of the spheres around the first three anchors.
///
/// Extra anchors are ignored. Of the two mirror solutions the one with a
/// non-negative offset along `ex × ey` is returned; when the spheres do not
/// meet (noisy ranges) the in-plane solution is used.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactTrilateration;

impl PositionSolver for ExactTrilateration {
    fn solve(&self, anchors: &[Vector3<f64>], ranges: &[f64]) -> PositioningResult<Vector3<f64>> {
        let available = anchors.len().min(ranges.len());
        if available < MIN_ANCHORS_3D {
            return Err(PositioningError::InsufficientMeasurements {
                available,
                required: MIN_ANCHORS_3D,
            });
        }
        trilaterate_3spheres(&anchors[0], &anchors[1], &anchors[2], ranges[0], ranges[1], ranges[2])
    }

    fn name(&self) -> &'static str {
        "exact"
    }
}

fn trilaterate_3spheres(
    p1: &Vector3<f64>,
    p2: &Vector3<f64>,
    p3: &Vector3<f64>,
    r1: f64,
    r2: f64,
    r3: f64,
) -> PositioningResult<Vector3<f64>> {
    let p21 = p2 - p1;
    let d = p21.norm();
    if d < GEOMETRY_EPSILON {
        return Err(PositioningError::degenerate(GeometryIssue::Coincident));
    }
    let ex = p21 / d;

    let p31 = p3 - p1;
    let i = ex.dot(&p31);
    let ey_raw = p31 - ex * i;
    let j = ey_raw.norm();
    if j < GEOMETRY_EPSILON {
        return Err(PositioningError::degenerate(GeometryIssue::Collinear));
    }
    let ey = ey_raw / j;
    let ez = ex.cross(&ey);

    let x = (r1 * r1 - r2 * r2 + d * d) / (2.0 * d);
    let y = (r1 * r1 - r3 * r3 + i * i + j * j) / (2.0 * j) - (i / j) * x;
    let z = (r1 * r1 - x * x - y * y).max(0.0).sqrt();

    Ok(p1 + ex * x + ey * y + ez * z)
}

/// Least-squares refinement over every valid anchor, seeded by the exact
/// three-sphere solution.
///
/// Runs damped Gauss-Newton on the range residuals. The refined point is
/// only returned when it lowers the residual cost; otherwise the exact seed
/// is kept. With exactly three anchors this is the exact solver.
#[derive(Debug, Clone, Copy)]
pub struct RefinedTrilateration {
    pub max_iterations: usize,
    /// Iteration stops once an accepted step is shorter than this (meters)
    pub convergence_tolerance: f64,
    /// Diagonal damping added to the normal equations
    pub damping: f64,
}

impl Default for RefinedTrilateration {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            convergence_tolerance: 1e-9,
            damping: 1e-6,
        }
    }
}

fn residual_cost(anchors: &[Vector3<f64>], ranges: &[f64], position: &Vector3<f64>) -> f64 {
    anchors
        .iter()
        .zip(ranges.iter())
        .map(|(a, r)| {
            let residual = (position - a).norm() - r;
            residual * residual
        })
        .sum()
}

impl RefinedTrilateration {
    fn refine(&self, anchors: &[Vector3<f64>], ranges: &[f64], seed: Vector3<f64>) -> Vector3<f64> {
        let mut estimate = seed;
        let mut cost = residual_cost(anchors, ranges, &estimate);

        for iteration in 0..self.max_iterations {
            let mut jt_j = Matrix3::zeros();
            let mut jt_r = Vector3::zeros();
            for (anchor, range) in anchors.iter().zip(ranges.iter()) {
                let offset = estimate - anchor;
                let distance = offset.norm();
                if distance < GEOMETRY_EPSILON {
                    continue;
                }
                let gradient = offset / distance;
                let residual = distance - range;
                jt_j += gradient * gradient.transpose();
                jt_r += gradient * residual;
            }
            for k in 0..3 {
                jt_j[(k, k)] += self.damping;
            }

            let step = match jt_j.try_inverse() {
                Some(inverse) => inverse * jt_r,
                None => break,
            };
            let candidate = estimate - step;
            let candidate_cost = residual_cost(anchors, ranges, &candidate);
            if !(candidate_cost < cost) {
                break;
            }

            estimate = candidate;
            cost = candidate_cost;
            if step.norm() < self.convergence_tolerance {
                debug!("refinement converged after {} iterations, cost={:.6e}", iteration + 1, cost);
                break;
            }
        }

        estimate
    }
}

impl PositionSolver for RefinedTrilateration {
    fn solve(&self, anchors: &[Vector3<f64>], ranges: &[f64]) -> PositioningResult<Vector3<f64>> {
        let seed = ExactTrilateration.solve(anchors, ranges)?;
        let count = anchors.len().min(ranges.len());
        if count == MIN_ANCHORS_3D {
            return Ok(seed);
        }
        let (anchors, ranges) = (&anchors[..count], &ranges[..count]);

        let refined = self.refine(anchors, ranges, seed);
        if !refined.iter().all(|v| v.is_finite()) {
            return Ok(seed);
        }
        if residual_cost(anchors, ranges, &refined) <= residual_cost(anchors, ranges, &seed) {
            Ok(refined)
        } else {
            Ok(seed)
        }
    }

    fn name(&self) -> &'static str {
        "refined"
    }
}

/// Solver selection, serializable for configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrilaterationMode {
    #[default]
    Exact,
    Refined,
}

/// Tag positioning against up to eight configured anchors
pub struct TrilaterationEngine {
    anchors: [Option<Vector3<f64>>; MAX_ANCHORS],
    solver: Box<dyn PositionSolver + Send + Sync>,
    last_position: Option<PositionEstimate>,
}

impl Default for TrilaterationEngine {
    fn default() -> Self {
        Self::with_solver(Box::new(ExactTrilateration))
    }
}

impl TrilaterationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_solver(solver: Box<dyn PositionSolver + Send + Sync>) -> Self {
        Self {
            anchors: [None; MAX_ANCHORS],
            solver,
            last_position: None,
        }
    }

    pub fn with_mode(mode: TrilaterationMode) -> Self {
        match mode {
            TrilaterationMode::Exact => Self::default(),
            TrilaterationMode::Refined => Self::with_solver(Box::new(RefinedTrilateration::default())),
        }
    }

    pub fn solver_name(&self) -> &'static str {
        self.solver.name()
    }

    /// Place an anchor in its slot; ids beyond the slot range are ignored.
    pub fn set_anchor(&mut self, id: AnchorId, position: Vector3<f64>) {
        match self.anchors.get_mut(id as usize) {
            Some(slot) => *slot = Some(position),
            None => warn!("anchor id {} outside 0..{}, ignored", id, MAX_ANCHORS),
        }
    }

    /// Replace all anchors. Positions are assigned to slots by their index
    /// in `positions`; anything past the eighth is dropped.
    pub fn set_anchors(&mut self, positions: &[Vector3<f64>]) {
        if positions.len() > MAX_ANCHORS {
            warn!("{} anchors supplied, only the first {} are used", positions.len(), MAX_ANCHORS);
        }
        self.anchors = [None; MAX_ANCHORS];
        for (slot, position) in self.anchors.iter_mut().zip(positions.iter()) {
            *slot = Some(*position);
        }
    }

    /// Replace all anchors from a calibration result, slotted by anchor id
    pub fn set_local_anchors(&mut self, anchors: &[LocalAnchor]) {
        self.anchors = [None; MAX_ANCHORS];
        for anchor in anchors {
            self.set_anchor(anchor.id, anchor.position);
        }
    }

    pub fn anchor(&self, id: AnchorId) -> Option<Vector3<f64>> {
        self.anchors.get(id as usize).copied().flatten()
    }

    pub fn configured_anchor_count(&self) -> usize {
        self.anchors.iter().filter(|a| a.is_some()).count()
    }

    /// Collect (anchor, range in meters) for every slot with a configured
    /// anchor and a positive distance, in slot order.
    fn valid_pairs(&self, distances_mm: &[i32]) -> (Vec<Vector3<f64>>, Vec<f64>) {
        distances_mm
            .iter()
            .take(MAX_ANCHORS)
            .enumerate()
            .filter(|(_, d)| **d > 0)
            .filter_map(|(slot, &d)| self.anchors[slot].map(|a| (a, d as f64 / 1000.0)))
            .unzip()
    }

    /// Position from per-slot distances in millimeters (`-1` = invalid)
    pub fn try_calculate_position(&self, distances_mm: &[i32]) -> PositioningResult<Vector3<f64>> {
        let configured = self.configured_anchor_count();
        if configured < MIN_ANCHORS_3D {
            return Err(PositioningError::InsufficientAnchors {
                available: configured,
                required: MIN_ANCHORS_3D,
            });
        }
        let (anchors, ranges) = self.valid_pairs(distances_mm);
        if anchors.len() < MIN_ANCHORS_3D {
            return Err(PositioningError::InsufficientMeasurements {
                available: anchors.len(),
                required: MIN_ANCHORS_3D,
            });
        }

        let position = self.solver.solve(&anchors, &ranges)?;
        if !position.iter().all(|v| v.is_finite()) {
            return Err(PositioningError::numerical(self.solver.name(), "non-finite position"));
        }
        Ok(position)
    }

    /// Position from per-slot distances in millimeters. Never fails: an
    /// unusable input yields an estimate with `valid == false`.
    pub fn calculate_position(&mut self, distances_mm: &[i32]) -> PositionEstimate {
        match self.try_calculate_position(distances_mm) {
            Ok(position) => {
                let estimate = PositionEstimate::from_vector(&position);
                self.last_position = Some(estimate);
                estimate
            }
            Err(e) => {
                debug!("position solve rejected: {}", e);
                PositionEstimate::invalid()
            }
        }
    }

    pub fn calculate_from_range_set(&mut self, ranges: &RangeSet) -> PositionEstimate {
        self.calculate_position(&ranges.to_distance_array())
    }

    /// Most recent valid estimate
    pub fn last_position(&self) -> Option<PositionEstimate> {
        self.last_position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uwbdemo_engine(mode: TrilaterationMode) -> TrilaterationEngine {
        let mut engine = TrilaterationEngine::with_mode(mode);
        engine.set_anchors(&[
            Vector3::new(0.0, 0.0, 2.0),
            Vector3::new(0.0, 10.0, 2.0),
            Vector3::new(10.0, 10.0, 2.0),
            Vector3::new(10.0, 0.0, 2.0),
        ]);
        engine
    }

    fn closed_form(r1: f64, r2: f64, r3: f64) -> Vector3<f64> {
        // Anchors (0,0,2), (0,10,2), (10,10,2): ex = +y, ey = +x, ez = -z
        let (d, i, j) = (10.0, 10.0, 10.0);
        let x = (r1 * r1 - r2 * r2 + d * d) / (2.0 * d);
        let y = (r1 * r1 - r3 * r3 + i * i + j * j) / (2.0 * j) - (i / j) * x;
        let z = (r1 * r1 - x * x - y * y).max(0.0).sqrt();
        Vector3::new(y, x, 2.0 - z)
    }

    #[test]
    fn test_uwbdemo_fixture() {
        let mut engine = uwbdemo_engine(TrilaterationMode::Exact);
        let estimate = engine.calculate_position(&[7433, 3905, 8078, -1]);
        assert!(estimate.valid);

        let expected = closed_form(7.433, 3.905, 8.078);
        assert!((estimate.to_vector3() - expected).norm() < 1e-3);
        assert!((estimate.x - 2.49975).abs() < 1e-3);
        assert!((estimate.y - 7.00002).abs() < 1e-3);
        assert!((estimate.z - 1.97929).abs() < 1e-3);
        assert_eq!(engine.last_position(), Some(estimate));
    }

    #[test]
    fn test_exact_recovers_true_point() {
        let anchors = [
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(20.0, 0.0, 0.0),
            Vector3::new(0.0, 20.0, 0.0),
        ];
        let truth = Vector3::new(6.0, 8.0, 3.0);
        let ranges: Vec<f64> = anchors.iter().map(|a| (truth - a).norm()).collect();

        let solved = ExactTrilateration.solve(&anchors, &ranges).unwrap();
        assert!((solved - truth).norm() < 1e-9);
    }

    #[test]
    fn test_too_few_valid_distances() {
        let mut engine = uwbdemo_engine(TrilaterationMode::Exact);
        assert!(!engine.calculate_position(&[7433, -1, 8078, -1]).valid);
        assert!(!engine.calculate_position(&[7433, 0, 8078]).valid);
        assert!(!engine.calculate_position(&[]).valid);
        assert_eq!(engine.last_position(), None);
    }

    #[test]
    fn test_too_few_configured_anchors() {
        let mut engine = TrilaterationEngine::new();
        engine.set_anchors(&[Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 0.0, 0.0)]);
        assert!(matches!(
            engine.try_calculate_position(&[1000, 1000, 1000]),
            Err(PositioningError::InsufficientAnchors { available: 2, required: 3 })
        ));
        assert!(!engine.calculate_position(&[1000, 1000, 1000]).valid);
    }

    #[test]
    fn test_distance_without_anchor_is_skipped() {
        let mut engine = TrilaterationEngine::new();
        engine.set_anchor(0, Vector3::new(0.0, 0.0, 2.0));
        engine.set_anchor(1, Vector3::new(0.0, 10.0, 2.0));
        engine.set_anchor(2, Vector3::new(10.0, 10.0, 2.0));
        // Slot 5 has a range but no anchor
        let estimate = engine.calculate_position(&[7433, 3905, -1, -1, -1, 5000]);
        assert!(!estimate.valid);
    }

    #[test]
    fn test_collinear_anchors_are_degenerate() {
        let anchors = [
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(5.0, 0.0, 0.0),
            Vector3::new(10.0, 0.0, 0.0),
        ];
        assert_eq!(
            ExactTrilateration.solve(&anchors, &[3.0, 3.0, 8.0]),
            Err(PositioningError::degenerate(GeometryIssue::Collinear))
        );

        let coincident = [Vector3::zeros(), Vector3::zeros(), Vector3::new(1.0, 1.0, 0.0)];
        assert_eq!(
            ExactTrilateration.solve(&coincident, &[1.0, 1.0, 1.0]),
            Err(PositioningError::degenerate(GeometryIssue::Coincident))
        );
    }

    #[test]
    fn test_exact_ignores_fourth_anchor() {
        let mut engine = uwbdemo_engine(TrilaterationMode::Exact);
        let three = engine.calculate_position(&[7433, 3905, 8078, -1]);
        let four = engine.calculate_position(&[7433, 3905, 8078, 1]);
        assert_eq!(three, four);
    }

    #[test]
    fn test_refined_uses_all_anchors() {
        let anchors = [
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(30.0, 0.0, 0.0),
            Vector3::new(0.0, 30.0, 0.0),
            Vector3::new(30.0, 30.0, 5.0),
            Vector3::new(15.0, -10.0, 3.0),
        ];
        let truth = Vector3::new(12.0, 9.0, 4.0);
        let noise = [0.05, -0.04, 0.03, -0.02, 0.01];
        let ranges: Vec<f64> = anchors
            .iter()
            .zip(noise.iter())
            .map(|(a, n)| (truth - a).norm() + n)
            .collect();

        let exact = ExactTrilateration.solve(&anchors, &ranges).unwrap();
        let refined = RefinedTrilateration::default().solve(&anchors, &ranges).unwrap();
        assert!(residual_cost(&anchors, &ranges, &refined) <= residual_cost(&anchors, &ranges, &exact));
        assert!((refined - truth).norm() < 0.5);
    }

    #[test]
    fn test_convergence_tolerance_bounds_step_length() {
        let anchors = [
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(30.0, 0.0, 0.0),
            Vector3::new(0.0, 30.0, 0.0),
            Vector3::new(30.0, 30.0, 5.0),
        ];
        let truth = Vector3::new(10.0, 12.0, 2.0);
        let ranges: Vec<f64> = anchors
            .iter()
            .zip([0.2, -0.1, 0.15, -0.25].iter())
            .map(|(a, n)| (truth - a).norm() + n)
            .collect();
        let seed = ExactTrilateration.solve(&anchors, &ranges).unwrap();

        // Any first step is shorter than a kilometer, so a 1 km tolerance
        // stops after one accepted step
        let loose = RefinedTrilateration {
            convergence_tolerance: 1000.0,
            ..RefinedTrilateration::default()
        };
        let single = RefinedTrilateration {
            max_iterations: 1,
            ..RefinedTrilateration::default()
        };
        assert_eq!(loose.refine(&anchors, &ranges, seed), single.refine(&anchors, &ranges, seed));

        let full = RefinedTrilateration::default().refine(&anchors, &ranges, seed);
        assert!(residual_cost(&anchors, &ranges, &full) <= residual_cost(&anchors, &ranges, &seed));
    }

    #[test]
    fn test_refined_matches_exact_with_three_anchors() {
        let mut exact = uwbdemo_engine(TrilaterationMode::Exact);
        let mut refined = uwbdemo_engine(TrilaterationMode::Refined);
        assert_eq!(refined.solver_name(), "refined");
        let distances = [7433, 3905, 8078, -1];
        assert_eq!(exact.calculate_position(&distances), refined.calculate_position(&distances));
    }

    #[test]
    fn test_range_set_input() {
        let mut engine = uwbdemo_engine(TrilaterationMode::Exact);
        let ranges = RangeSet::new("TAG-01").with_range(0, 7433).with_range(1, 3905).with_range(2, 8078);
        let estimate = engine.calculate_from_range_set(&ranges);
        assert!(estimate.valid);
        assert!((estimate.to_vector3() - closed_form(7.433, 3.905, 8.078)).norm() < 1e-9);
    }

    #[test]
    fn test_local_anchor_slots() {
        let mut engine = TrilaterationEngine::new();
        engine.set_local_anchors(&[LocalAnchor::new(3, 1.0, 2.0, 3.0), LocalAnchor::new(12, 0.0, 0.0, 0.0)]);
        assert_eq!(engine.configured_anchor_count(), 1);
        assert_eq!(engine.anchor(3), Some(Vector3::new(1.0, 2.0, 3.0)));
        assert_eq!(engine.anchor(12), None);
    }
}
