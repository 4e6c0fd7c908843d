//! Start-line geometry in the horizontal plane. Z is ignored throughout.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::core::{AnchorId, LocalAnchor, StartLine};
use crate::validation::error::{PositioningError, PositioningResult};

/// Unnormalized 2D cross product of A->B and A->P.
/// Positive when P lies left of the vector A->B.
pub fn side_of_line(point: &Vector3<f64>, a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    (b.x - a.x) * (point.y - a.y) - (b.y - a.y) * (point.x - a.x)
}

/// Signed perpendicular distance (m) from `point` to the line through A and B.
/// Positive on the left of A->B; zero when A and B coincide.
pub fn signed_distance_to_line(point: &Vector3<f64>, a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    let length = (b.x - a.x).hypot(b.y - a.y);
    if length == 0.0 {
        return 0.0;
    }
    side_of_line(point, a, b) / length
}

/// True when moving from `prev` to `curr` crosses the line through A and B.
///
/// Fires when the two points lie on strictly opposite sides, or when the
/// tag arrives exactly on the line. Leaving the line from an exact zero does
/// not fire again, so one pass yields one event.
pub fn crossing_detection(prev: &Vector3<f64>, curr: &Vector3<f64>, a: &Vector3<f64>, b: &Vector3<f64>) -> bool {
    let prev_distance = signed_distance_to_line(prev, a, b);
    let curr_distance = signed_distance_to_line(curr, a, b);
    prev_distance * curr_distance < 0.0 || (prev_distance != 0.0 && curr_distance == 0.0)
}

/// Line metrics for one tag update
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineStatus {
    pub signed_distance: f64,
    pub crossed: bool,
    /// Whether the tag sits on the configured preferred side (or on the line)
    pub on_preferred_side: bool,
}

impl StartLine {
    /// Endpoints of this line looked up in a calibrated anchor list
    pub fn endpoints(&self, anchors: &[LocalAnchor]) -> PositioningResult<(Vector3<f64>, Vector3<f64>)> {
        let find = |id: AnchorId| {
            anchors
                .iter()
                .find(|a| a.id == id)
                .map(|a| a.position)
                .ok_or_else(|| PositioningError::InvalidInput {
                    reason: format!("start line anchor A{} is not configured", id),
                })
        };
        Ok((find(self.anchor_a_id)?, find(self.anchor_b_id)?))
    }

    /// Distance and crossing state of a tag moving from `prev` to `curr`
    pub fn evaluate(&self, anchors: &[LocalAnchor], prev: &Vector3<f64>, curr: &Vector3<f64>) -> PositioningResult<LineStatus> {
        let (a, b) = self.endpoints(anchors)?;
        let signed_distance = signed_distance_to_line(curr, &a, &b);
        let on_preferred_side = if self.prefer_positive_side {
            signed_distance >= 0.0
        } else {
            signed_distance <= 0.0
        };
        Ok(LineStatus {
            signed_distance,
            crossed: crossing_detection(prev, curr, &a, &b),
            on_preferred_side,
        })
    }
}
