//! Positioning and calibration algorithms

pub mod geodetic;
pub mod alignment;
pub mod calibration;
pub mod trilateration;
pub mod circle;
pub mod line;

pub use alignment::{RigidAlignmentCalibrator, RigidTransform, SurveyPoint};
pub use calibration::{classical_mds, fix_gauge, AnchorCalibrationEngine};
pub use circle::{circle_intersection, estimate_tag_position};
pub use line::{crossing_detection, side_of_line, signed_distance_to_line, LineStatus};
pub use trilateration::{ExactTrilateration, PositionSolver, RefinedTrilateration, TrilaterationEngine, TrilaterationMode};
