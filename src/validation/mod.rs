//! Error taxonomy and numerical warnings

pub mod error;

pub use error::{ErrorCategory, GeometryIssue, NumericalWarning, PositioningError, PositioningResult};
