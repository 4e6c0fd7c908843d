//! Core types and constants for the UWB line positioning engine

pub mod types;
pub mod constants;

pub use types::*;
pub use constants::*;
