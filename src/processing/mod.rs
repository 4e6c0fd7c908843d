//! Measurement accumulation

pub mod session;

pub use session::{median, CalibrationSession, PairStatistics, SessionStatus};
