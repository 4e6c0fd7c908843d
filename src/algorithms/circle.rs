//! Two-anchor position fix: intersection of two circles in the XY plane.

use nalgebra::Vector3;

use crate::core::{LocalAnchor, RangeMeasurement, CIRCLE_EPSILON};
use crate::validation::error::{GeometryIssue, PositioningError, PositioningResult};

/// Intersect circles of radius `ra` around A and `rb` around B.
///
/// Radii that violate the triangle inequality (range noise) are rescaled
/// proportionally until the circles touch. Of the two solutions the one on
/// the left of A->B is returned when `prefer_positive_side` is set, the right
/// one otherwise. The result's z is taken from A; anchors are treated as
/// coplanar.
pub fn circle_intersection(
    a: &Vector3<f64>,
    b: &Vector3<f64>,
    ra: f64,
    rb: f64,
    prefer_positive_side: bool,
) -> PositioningResult<Vector3<f64>> {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let d = dx.hypot(dy);
    if d == 0.0 {
        return Err(PositioningError::degenerate(GeometryIssue::Coincident));
    }
    if !(ra >= 0.0 && rb >= 0.0) || ra + rb == 0.0 {
        return Err(PositioningError::InvalidInput {
            reason: format!("circle radii must be non-negative and not both zero, got {} and {}", ra, rb),
        });
    }

    let (mut ra, mut rb) = (ra, rb);
    let sum = ra + rb;
    if sum < d {
        let scale = (d + CIRCLE_EPSILON) / sum;
        ra *= scale;
        rb *= scale;
    }
    let diff = (ra - rb).abs();
    if diff > d {
        let shrink = (d - CIRCLE_EPSILON) / diff;
        ra *= shrink;
        rb *= shrink;
    }

    // A at the origin, B on +x
    let ux = dx / d;
    let uy = dy / d;
    let x = (ra * ra - rb * rb + d * d) / (2.0 * d);
    let mut y = (ra * ra - x * x).max(0.0).sqrt();
    if !prefer_positive_side {
        y = -y;
    }

    Ok(Vector3::new(a.x + x * ux - y * uy, a.y + x * uy + y * ux, a.z))
}

/// Tag position from the two lowest-id measurements whose anchors are known.
pub fn estimate_tag_position(
    anchors: &[LocalAnchor],
    measurements: &[RangeMeasurement],
    prefer_positive_side: bool,
) -> PositioningResult<Vector3<f64>> {
    let mut usable: Vec<(&LocalAnchor, &RangeMeasurement)> = measurements
        .iter()
        .filter_map(|m| anchors.iter().find(|a| a.id == m.anchor_id).map(|a| (a, m)))
        .collect();
    if usable.len() < 2 {
        return Err(PositioningError::InsufficientMeasurements {
            available: usable.len(),
            required: 2,
        });
    }
    usable.sort_by_key(|(_, m)| m.anchor_id);

    let (anchor_a, meas_a) = usable[0];
    let (anchor_b, meas_b) = usable[1];
    circle_intersection(
        &anchor_a.position,
        &anchor_b.position,
        meas_a.distance_m,
        meas_b.distance_m,
        prefer_positive_side,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measurement(anchor_id: u8, distance_m: f64) -> RangeMeasurement {
        RangeMeasurement {
            anchor_id,
            tag_id: "TAG-01".to_string(),
            tof_ns: 0.0,
            distance_m,
            variance_m2: 0.0,
            round_trip_ns: 0.0,
            reply_time_ns: 0.0,
        }
    }

    #[test]
    fn test_perpendicular_bisector() {
        let a = Vector3::new(0.0, 0.0, 0.0);
        let b = Vector3::new(25.0, 0.0, 0.0);
        let p = circle_intersection(&a, &b, 12.5, 12.5, true).unwrap();
        assert!((p.x - 12.5).abs() < 1e-6);
        assert!(p.y.abs() < 1e-2);
    }

    #[test]
    fn test_side_selection() {
        let a = Vector3::new(0.0, 0.0, 0.0);
        let b = Vector3::new(25.0, 0.0, 0.0);
        let left = circle_intersection(&a, &b, 15.0, 15.0, true).unwrap();
        let right = circle_intersection(&a, &b, 15.0, 15.0, false).unwrap();
        assert!((left.x - 12.5).abs() < 1e-9);
        assert!((left.y - 275.0_f64.sqrt()).abs() < 1e-9);
        assert!((right.y + 275.0_f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_rotated_baseline() {
        // Baseline along +y: left of A->B is -x
        let a = Vector3::new(2.0, 1.0, 0.5);
        let b = Vector3::new(2.0, 11.0, 0.5);
        let p = circle_intersection(&a, &b, 5.0, 50.0_f64.sqrt(), true).unwrap();
        assert!(((p - a).xy().norm() - 5.0).abs() < 1e-9);
        assert!(p.x < 2.0);
        assert_eq!(p.z, 0.5);
    }

    #[test]
    fn test_infeasible_radii_are_rescaled() {
        let a = Vector3::new(0.0, 0.0, 0.0);
        let b = Vector3::new(10.0, 0.0, 0.0);

        // Too short: circles do not reach each other
        let p = circle_intersection(&a, &b, 4.0, 4.0, true).unwrap();
        assert!((p.x - 5.0).abs() < 1e-6);
        assert!(p.y.abs() < 1e-2);

        // One circle inside the other
        let p = circle_intersection(&a, &b, 30.0, 10.0, true).unwrap();
        assert!(p.x.is_finite() && p.y.is_finite());
        assert!(p.x > 10.0);
    }

    #[test]
    fn test_coincident_anchors() {
        let a = Vector3::new(1.0, 1.0, 0.0);
        assert_eq!(
            circle_intersection(&a, &a, 1.0, 1.0, true),
            Err(PositioningError::degenerate(GeometryIssue::Coincident))
        );
    }

    #[test]
    fn test_estimate_tag_position_uses_lowest_ids() {
        let anchors = vec![
            LocalAnchor::new(0, 0.0, 0.0, 0.0),
            LocalAnchor::new(1, 25.0, 0.0, 0.0),
            LocalAnchor::new(2, 0.0, 30.0, 0.0),
        ];
        let measurements = vec![measurement(2, 99.0), measurement(1, 12.5), measurement(0, 12.5)];
        let p = estimate_tag_position(&anchors, &measurements, true).unwrap();
        assert!((p.x - 12.5).abs() < 1e-6);

        assert!(matches!(
            estimate_tag_position(&anchors, &measurements[..1], true),
            Err(PositioningError::InsufficientMeasurements { available: 1, required: 2 })
        ));
    }
}
