//! Inter-anchor distance accumulation for one self-calibration session.
//!
//! A [`CalibrationSession`] is a plain value owned by the caller. It is not
//! synchronized; feed it from one thread or guard it externally.

use log::{debug, warn};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::{AnchorId, DistanceUnit, MAX_ANCHORS};
use crate::validation::error::{PositioningError, PositioningResult};

/// Summary of the samples collected for one anchor pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairStatistics {
    pub from: AnchorId,
    pub to: AnchorId,
    pub count: usize,
    pub mean_mm: f64,
    pub std_mm: f64,
    pub median_mm: f64,
}

/// Collection progress of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub num_anchors: usize,
    pub min_samples_per_pair: usize,
    /// Number of distinct pairs with at least one sample
    pub pair_count: usize,
    pub pairs: Vec<PairStatistics>,
    /// Required pairs that have not yet reached the sample minimum
    pub incomplete_pairs: Vec<(AnchorId, AnchorId)>,
    pub ready: bool,
}

/// Median of a sample list; mean of the two middle values for even counts
pub fn median(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

#[derive(Debug, Clone)]
pub struct CalibrationSession {
    num_anchors: usize,
    min_samples_per_pair: usize,
    /// Unordered pair (low id, high id) -> samples in millimeters
    samples: BTreeMap<(AnchorId, AnchorId), Vec<f64>>,
}

fn pair_key(a: AnchorId, b: AnchorId) -> (AnchorId, AnchorId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl CalibrationSession {
    /// Sessions hold at most `MAX_ANCHORS` anchors; larger counts are clamped.
    pub fn new(num_anchors: usize, min_samples_per_pair: usize) -> Self {
        if num_anchors > MAX_ANCHORS {
            warn!("session of {} anchors clamped to {}", num_anchors, MAX_ANCHORS);
        }
        Self {
            num_anchors: num_anchors.min(MAX_ANCHORS),
            min_samples_per_pair: min_samples_per_pair.max(1),
            samples: BTreeMap::new(),
        }
    }

    pub fn num_anchors(&self) -> usize {
        self.num_anchors
    }

    pub fn min_samples_per_pair(&self) -> usize {
        self.min_samples_per_pair
    }

    /// Record one distance sample. Non-positive or non-finite distances,
    /// self-pairs and anchors outside the session are dropped; returns
    /// whether the sample was kept.
    pub fn add_measurement(&mut self, from: AnchorId, to: AnchorId, distance: f64, unit: DistanceUnit) -> bool {
        if !(distance > 0.0) || !distance.is_finite() {
            return false;
        }
        if from == to || from as usize >= self.num_anchors || to as usize >= self.num_anchors {
            debug!("sample A{}-A{} outside session of {} anchors dropped", from, to, self.num_anchors);
            return false;
        }
        self.samples
            .entry(pair_key(from, to))
            .or_default()
            .push(unit.to_millimeters(distance));
        true
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample_count(&self, a: AnchorId, b: AnchorId) -> usize {
        self.samples.get(&pair_key(a, b)).map_or(0, Vec::len)
    }

    /// Median distance in millimeters, regardless of the sample minimum
    pub fn median_mm(&self, a: AnchorId, b: AnchorId) -> Option<f64> {
        self.samples.get(&pair_key(a, b)).and_then(|s| median(s))
    }

    /// Median distance in meters for a pair that meets the sample minimum
    pub fn required_distance_m(&self, a: AnchorId, b: AnchorId) -> PositioningResult<f64> {
        let (from, to) = pair_key(a, b);
        let count = self.sample_count(from, to);
        if count == 0 {
            return Err(PositioningError::MissingDistance { from, to });
        }
        if count < self.min_samples_per_pair {
            return Err(PositioningError::InsufficientSamples {
                from,
                to,
                count,
                required: self.min_samples_per_pair,
            });
        }
        match self.median_mm(from, to) {
            Some(value) if value > 0.0 => Ok(value / 1000.0),
            Some(value) => Err(PositioningError::InvalidDistance { from, to, value }),
            None => Err(PositioningError::MissingDistance { from, to }),
        }
    }

    fn required_pairs(&self) -> impl Iterator<Item = (AnchorId, AnchorId)> + '_ {
        let n = self.num_anchors as AnchorId;
        (0..n).flat_map(move |i| ((i + 1)..n).map(move |j| (i, j)))
    }

    /// Symmetric N×N matrix of median distances in meters, zero diagonal.
    /// Fails on the first required pair that is missing or under-sampled.
    pub fn distance_matrix_m(&self) -> PositioningResult<DMatrix<f64>> {
        let n = self.num_anchors;
        let mut matrix = DMatrix::zeros(n, n);
        for (i, j) in self.required_pairs() {
            let distance = self.required_distance_m(i, j)?;
            matrix[(i as usize, j as usize)] = distance;
            matrix[(j as usize, i as usize)] = distance;
        }
        Ok(matrix)
    }

    pub fn status(&self) -> SessionStatus {
        let pairs: Vec<PairStatistics> = self
            .samples
            .iter()
            .map(|(&(from, to), samples)| {
                let count = samples.len();
                let mean_mm = samples.iter().sum::<f64>() / count as f64;
                let std_mm = if count > 1 {
                    (samples.iter().map(|s| (s - mean_mm).powi(2)).sum::<f64>() / count as f64).sqrt()
                } else {
                    0.0
                };
                PairStatistics {
                    from,
                    to,
                    count,
                    mean_mm,
                    std_mm,
                    median_mm: median(samples).unwrap_or(0.0),
                }
            })
            .collect();

        let incomplete_pairs: Vec<(AnchorId, AnchorId)> = self
            .required_pairs()
            .filter(|&(i, j)| self.sample_count(i, j) < self.min_samples_per_pair)
            .collect();

        SessionStatus {
            num_anchors: self.num_anchors,
            min_samples_per_pair: self.min_samples_per_pair,
            pair_count: pairs.len(),
            ready: incomplete_pairs.is_empty(),
            pairs,
            incomplete_pairs,
        }
    }
}
