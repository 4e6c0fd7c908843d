use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::AnchorId;

/// Error classification for the positioning engine
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum PositioningError {
    // Validation errors
    #[error("insufficient anchors: {available} available, {required} required")]
    InsufficientAnchors { available: usize, required: usize },

    #[error("insufficient measurements: {available} valid, {required} required")]
    InsufficientMeasurements { available: usize, required: usize },

    #[error("missing distance A{from}-A{to}")]
    MissingDistance { from: AnchorId, to: AnchorId },

    #[error("invalid distance A{from}-A{to}: {value}")]
    InvalidDistance { from: AnchorId, to: AnchorId, value: f64 },

    #[error("insufficient samples A{from}-A{to}: {count} collected, {required} required")]
    InsufficientSamples {
        from: AnchorId,
        to: AnchorId,
        count: usize,
        required: usize,
    },

    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    // Geometric errors
    #[error("degenerate geometry: {issue}")]
    DegenerateGeometry { issue: GeometryIssue },

    // Computation errors
    #[error("numerical failure in {operation}: {reason}")]
    NumericalFailure { operation: String, reason: String },

    #[error("transform requested before a successful calibration")]
    NotCalibrated,
}

/// Types of geometric issues that can affect positioning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeometryIssue {
    Collinear,
    Coincident,
}

impl std::fmt::Display for GeometryIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeometryIssue::Collinear => write!(f, "points are collinear"),
            GeometryIssue::Coincident => write!(f, "points are coincident"),
        }
    }
}

/// Non-fatal numerical condition attached to an otherwise usable result
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum NumericalWarning {
    /// Rotation determinant drifted further than the tolerance from +1
    DeterminantOutOfTolerance { determinant: f64, tolerance: f64 },
    /// Most negative eigenvalue of the centered MDS matrix; `index` is its
    /// rank in descending order. The distances are not Euclidean.
    NegativeEigenvalue { index: usize, value: f64 },
}

impl std::fmt::Display for NumericalWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NumericalWarning::DeterminantOutOfTolerance { determinant, tolerance } => write!(
                f,
                "rotation determinant {:.4} deviates from 1.0 by more than {}",
                determinant, tolerance
            ),
            NumericalWarning::NegativeEigenvalue { index, value } => {
                write!(f, "eigenvalue {} = {:.6e} is negative, distances are not Euclidean", index, value)
            }
        }
    }
}

pub type PositioningResult<T> = Result<T, PositioningError>;

impl PositioningError {
    pub fn degenerate(issue: GeometryIssue) -> Self {
        PositioningError::DegenerateGeometry { issue }
    }

    pub fn numerical(operation: &str, reason: impl Into<String>) -> Self {
        PositioningError::NumericalFailure {
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }

    /// Coarse category used by callers deciding between retry and manual entry
    pub fn category(&self) -> ErrorCategory {
        match self {
            PositioningError::InsufficientAnchors { .. }
            | PositioningError::InsufficientMeasurements { .. }
            | PositioningError::MissingDistance { .. }
            | PositioningError::InvalidDistance { .. }
            | PositioningError::InsufficientSamples { .. }
            | PositioningError::InvalidInput { .. } => ErrorCategory::Validation,
            PositioningError::DegenerateGeometry { .. } => ErrorCategory::DegenerateGeometry,
            PositioningError::NumericalFailure { .. } => ErrorCategory::Numerical,
            PositioningError::NotCalibrated => ErrorCategory::NotCalibrated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    DegenerateGeometry,
    Numerical,
    NotCalibrated,
}
