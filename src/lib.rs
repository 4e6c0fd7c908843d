//! UWB Start-Line Positioning
//!
//! Positioning and calibration engine for a sailing start line. Anchors on
//! the committee boat and pin buoys survey themselves from inter-anchor UWB
//! ranges, tags are trilaterated in that local frame, and a rigid alignment
//! against GNSS fixes maps local positions to latitude and longitude.

pub mod core;
pub mod algorithms;
pub mod processing;
pub mod validation;
pub mod simulation;
pub mod utils;

// Re-export commonly used types
pub use crate::core::{
    AnchorId, CalibrationResult, DistanceUnit, GeodeticPosition, LocalAnchor, PositionEstimate, RangeMeasurement,
    RangeSet, StartLine, MAX_ANCHORS,
};
pub use crate::algorithms::{
    AnchorCalibrationEngine, LineStatus, PositionSolver, RigidAlignmentCalibrator, SurveyPoint, TrilaterationEngine,
    TrilaterationMode,
};
pub use crate::processing::CalibrationSession;
pub use crate::validation::{PositioningError, PositioningResult};
pub use crate::utils::{ConfigError, ConfigurationManager, EngineConfig};
