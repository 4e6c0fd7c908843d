//! Core data types for the positioning engine

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::constants::{INVALID_RANGE_MM, MAX_ANCHORS};
use crate::validation::error::NumericalWarning;

/// Anchor identifier. Anchors are addressed by slot index `0..MAX_ANCHORS`.
pub type AnchorId = u8;

/// 3D position in geodetic coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeodeticPosition {
    /// Latitude in decimal degrees
    pub lat: f64,
    /// Longitude in decimal degrees
    pub lon: f64,
    /// Altitude above the WGS84 ellipsoid in meters
    pub alt: f64,
}

impl GeodeticPosition {
    pub fn new(lat: f64, lon: f64, alt: f64) -> Self {
        Self { lat, lon, alt }
    }
}

/// Anchor with calibrated local coordinates (meters)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocalAnchor {
    pub id: AnchorId,
    pub position: Vector3<f64>,
}

impl LocalAnchor {
    pub fn new(id: AnchorId, x: f64, y: f64, z: f64) -> Self {
        Self {
            id,
            position: Vector3::new(x, y, z),
        }
    }
}

/// Outcome of one anchor self-calibration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub success: bool,
    pub anchors: Vec<LocalAnchor>,
    /// Diagnostic message, empty on success
    pub error: String,
    /// Set when the A1-A2 distance was not measured but approximated
    pub d12_estimated: bool,
    /// Non-fatal numerical conditions met while solving the layout
    #[serde(default)]
    pub warnings: Vec<NumericalWarning>,
}

impl CalibrationResult {
    pub fn succeeded(anchors: Vec<LocalAnchor>) -> Self {
        Self {
            success: true,
            anchors,
            error: String::new(),
            d12_estimated: false,
            warnings: Vec::new(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            anchors: Vec::new(),
            error: error.into(),
            d12_estimated: false,
            warnings: Vec::new(),
        }
    }
}

/// Tag position estimate in the local anchor frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionEstimate {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub valid: bool,
}

impl PositionEstimate {
    pub fn invalid() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            valid: false,
        }
    }

    pub fn from_vector(v: &Vector3<f64>) -> Self {
        Self {
            x: v.x,
            y: v.y,
            z: v.z,
            valid: true,
        }
    }

    pub fn to_vector3(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }
}

/// Anchor-tag ranges from one update cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeSet {
    pub tag_id: String,
    /// Anchor id -> distance in millimeters, `-1` marks an invalid range
    pub ranges: BTreeMap<AnchorId, i32>,
}

impl RangeSet {
    pub fn new(tag_id: impl Into<String>) -> Self {
        Self {
            tag_id: tag_id.into(),
            ranges: BTreeMap::new(),
        }
    }

    pub fn with_range(mut self, anchor_id: AnchorId, distance_mm: i32) -> Self {
        self.ranges.insert(anchor_id, distance_mm);
        self
    }

    /// Fixed-slot distance array; ids outside the slot range are dropped.
    pub fn to_distance_array(&self) -> [i32; MAX_ANCHORS] {
        let mut distances = [INVALID_RANGE_MM; MAX_ANCHORS];
        for (&id, &distance) in &self.ranges {
            if let Some(slot) = distances.get_mut(id as usize) {
                *slot = distance;
            }
        }
        distances
    }

    /// Positive ranges that land in an anchor slot
    pub fn valid_count(&self) -> usize {
        self.ranges
            .iter()
            .filter(|&(&id, &d)| (id as usize) < MAX_ANCHORS && d > 0)
            .count()
    }
}

/// Virtual start line between two anchors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartLine {
    pub anchor_a_id: AnchorId,
    pub anchor_b_id: AnchorId,
    /// Side of A->B picked when a two-circle solve is ambiguous
    pub prefer_positive_side: bool,
}

impl Default for StartLine {
    fn default() -> Self {
        Self {
            anchor_a_id: 0,
            anchor_b_id: 1,
            prefer_positive_side: true,
        }
    }
}

/// A single DS-TWR range measurement from anchor to tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeMeasurement {
    pub anchor_id: AnchorId,
    pub tag_id: String,
    /// One-way time of flight including clock drift (ns)
    pub tof_ns: f64,
    pub distance_m: f64,
    pub variance_m2: f64,
    pub round_trip_ns: f64,
    pub reply_time_ns: f64,
}

/// Unit of an incoming distance sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceUnit {
    Millimeters,
    Meters,
}

impl DistanceUnit {
    pub fn to_millimeters(self, value: f64) -> f64 {
        match self {
            DistanceUnit::Millimeters => value,
            DistanceUnit::Meters => value * 1000.0,
        }
    }
}
