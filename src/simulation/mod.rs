//! Synthetic measurement generation for tests and demos

pub mod ranging;

pub use ranging::{distance_to_tof_ns, seeded_rng, RangingMeasurementModel};
