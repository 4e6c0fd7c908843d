//! Synthetic DS-TWR ranges for exercising the solvers.
//!
//! Nothing here is on the live measurement path. Every draw goes through
//! an explicitly passed RNG so seeded runs are reproducible.

use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::core::{LocalAnchor, RangeMeasurement, INVALID_RANGE_MM, MAX_ANCHORS, SPEED_OF_LIGHT};
use crate::validation::error::{PositioningError, PositioningResult};

/// Meters to one-way time of flight in nanoseconds
pub fn distance_to_tof_ns(distance_m: f64) -> f64 {
    distance_m / SPEED_OF_LIGHT * 1e9
}

/// Deterministic RNG for reproducible synthetic runs
pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Range noise and timing model of a DS-TWR exchange
#[derive(Debug, Clone, Copy)]
pub struct RangingMeasurementModel {
    noise_std_m: f64,
    pub responder_delay_ns: f64,
    /// Fixed offset added to the one-way time of flight
    pub clock_drift_ns: f64,
    /// `None` when sigma is zero
    noise: Option<Normal<f64>>,
}

impl Default for RangingMeasurementModel {
    fn default() -> Self {
        // 1.5 cm sigma, 120 ns responder turnaround, 4 ns drift
        Self::new(0.015, 120.0, 4.0).unwrap_or_else(|_| Self::noiseless())
    }
}

impl RangingMeasurementModel {
    pub fn new(noise_std_m: f64, responder_delay_ns: f64, clock_drift_ns: f64) -> PositioningResult<Self> {
        let mut model = Self {
            responder_delay_ns,
            clock_drift_ns,
            ..Self::noiseless()
        };
        model.set_noise_std_m(noise_std_m)?;
        Ok(model)
    }

    /// Range noise sigma in meters
    pub fn noise_std_m(&self) -> f64 {
        self.noise_std_m
    }

    /// Replace the noise sigma. On error the previous sigma is kept.
    pub fn set_noise_std_m(&mut self, noise_std_m: f64) -> PositioningResult<()> {
        if !(noise_std_m >= 0.0) || !noise_std_m.is_finite() {
            return Err(PositioningError::InvalidInput {
                reason: format!("range noise sigma must be finite and non-negative, got {}", noise_std_m),
            });
        }
        self.noise = if noise_std_m == 0.0 {
            None
        } else {
            Some(Normal::new(0.0, noise_std_m).map_err(|e| PositioningError::InvalidInput {
                reason: format!("range noise sigma {}: {}", noise_std_m, e),
            })?)
        };
        self.noise_std_m = noise_std_m;
        Ok(())
    }

    /// Model that returns true distances with zero delay and drift
    pub fn noiseless() -> Self {
        Self {
            noise_std_m: 0.0,
            responder_delay_ns: 0.0,
            clock_drift_ns: 0.0,
            noise: None,
        }
    }

    /// True distance plus one Gaussian noise draw (meters)
    pub fn noisy_distance<R: Rng + ?Sized>(&self, rng: &mut R, true_distance_m: f64) -> f64 {
        match &self.noise {
            Some(noise) => true_distance_m + noise.sample(rng),
            None => true_distance_m,
        }
    }

    /// One synthetic anchor-to-tag measurement
    pub fn measure<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        anchor: &LocalAnchor,
        tag_id: &str,
        tag_position: &Vector3<f64>,
    ) -> RangeMeasurement {
        let true_distance = (anchor.position - tag_position).norm();
        let distance_m = self.noisy_distance(rng, true_distance);
        let flight_ns = distance_to_tof_ns(distance_m);

        RangeMeasurement {
            anchor_id: anchor.id,
            tag_id: tag_id.to_string(),
            tof_ns: flight_ns + self.clock_drift_ns,
            distance_m,
            variance_m2: self.noise_std_m * self.noise_std_m,
            round_trip_ns: 2.0 * flight_ns + self.responder_delay_ns,
            reply_time_ns: self.responder_delay_ns,
        }
    }

    /// Per-slot distances in millimeters for a trilateration engine.
    /// Slots without an anchor stay at `-1`.
    pub fn distances_mm<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        anchors: &[LocalAnchor],
        tag_position: &Vector3<f64>,
    ) -> [i32; MAX_ANCHORS] {
        let mut distances = [INVALID_RANGE_MM; MAX_ANCHORS];
        for anchor in anchors {
            if let Some(slot) = distances.get_mut(anchor.id as usize) {
                let distance = self.noisy_distance(rng, (anchor.position - tag_position).norm());
                *slot = (distance * 1000.0).round().max(1.0) as i32;
            }
        }
        distances
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::trilateration::TrilaterationEngine;

    fn course_anchors() -> Vec<LocalAnchor> {
        vec![
            LocalAnchor::new(0, 0.0, 0.0, 2.0),
            LocalAnchor::new(1, 25.0, 0.0, 2.0),
            LocalAnchor::new(2, 12.5, 20.0, 0.0),
        ]
    }

    #[test]
    fn test_tof_conversion() {
        assert!((distance_to_tof_ns(SPEED_OF_LIGHT / 1e9) - 1.0).abs() < 1e-12);
        assert!((distance_to_tof_ns(299.792458) - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_noiseless_measurement_timing() {
        let model = RangingMeasurementModel::new(0.0, 120.0, 4.0).unwrap();
        let anchor = LocalAnchor::new(1, 3.0, 4.0, 0.0);
        let m = model.measure(&mut seeded_rng(1), &anchor, "TAG-01", &Vector3::zeros());

        assert_eq!(m.anchor_id, 1);
        assert_eq!(m.distance_m, 5.0);
        assert!((m.tof_ns - (distance_to_tof_ns(5.0) + 4.0)).abs() < 1e-12);
        assert!((m.round_trip_ns - (2.0 * distance_to_tof_ns(5.0) + 120.0)).abs() < 1e-12);
        assert_eq!(m.reply_time_ns, 120.0);
        assert_eq!(m.variance_m2, 0.0);
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let model = RangingMeasurementModel::default();
        let anchors = course_anchors();
        let tag = Vector3::new(10.0, 6.0, 1.0);

        let first = model.distances_mm(&mut seeded_rng(42), &anchors, &tag);
        let second = model.distances_mm(&mut seeded_rng(42), &anchors, &tag);
        assert_eq!(first, second);
        assert_eq!(first[3], INVALID_RANGE_MM);
    }

    #[test]
    fn test_noise_statistics() {
        let model = RangingMeasurementModel::new(0.05, 0.0, 0.0).unwrap();
        let mut rng = seeded_rng(7);
        let samples: Vec<f64> = (0..4000).map(|_| model.noisy_distance(&mut rng, 10.0)).collect();
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let std = (samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / samples.len() as f64).sqrt();
        assert!((mean - 10.0).abs() < 0.005);
        assert!((std - 0.05).abs() < 0.005);
    }

    #[test]
    fn test_invalid_sigma_rejected() {
        assert!(RangingMeasurementModel::new(-1.0, 0.0, 0.0).is_err());
        assert!(RangingMeasurementModel::new(f64::NAN, 0.0, 0.0).is_err());

        let mut model = RangingMeasurementModel::new(0.02, 0.0, 0.0).unwrap();
        assert!(model.set_noise_std_m(f64::INFINITY).is_err());
        assert_eq!(model.noise_std_m(), 0.02);
    }

    #[test]
    fn test_sigma_change_reaches_noise_and_variance() {
        let anchor = LocalAnchor::new(0, 0.0, 0.0, 0.0);
        let tag = Vector3::new(10.0, 0.0, 0.0);

        let mut model = RangingMeasurementModel::default();
        model.set_noise_std_m(0.0).unwrap();
        let m = model.measure(&mut seeded_rng(5), &anchor, "TAG-01", &tag);
        assert_eq!(m.distance_m, 10.0);
        assert_eq!(m.variance_m2, 0.0);

        model.set_noise_std_m(0.5).unwrap();
        assert_eq!(model.noise_std_m(), 0.5);
        let mut rng = seeded_rng(5);
        let samples: Vec<RangeMeasurement> = (0..2000).map(|_| model.measure(&mut rng, &anchor, "TAG-01", &tag)).collect();
        assert!(samples.iter().all(|m| m.variance_m2 == 0.25));
        let mean = samples.iter().map(|m| m.distance_m).sum::<f64>() / samples.len() as f64;
        let spread = (samples.iter().map(|m| (m.distance_m - mean).powi(2)).sum::<f64>() / samples.len() as f64).sqrt();
        assert!((spread - 0.5).abs() < 0.05);
    }

    #[test]
    fn test_start_line_session() {
        use crate::algorithms::alignment::{RigidAlignmentCalibrator, SurveyPoint};
        use crate::algorithms::calibration::AnchorCalibrationEngine;
        use crate::algorithms::geodetic::enu_to_lla;
        use crate::core::{GeodeticPosition, StartLine};

        let mut rng = seeded_rng(2024);
        let model = RangingMeasurementModel::default();

        // Committee boat, pin buoy and windward mark
        let truth = vec![
            LocalAnchor::new(0, 0.0, 0.0, 0.0),
            LocalAnchor::new(1, 40.0, 0.0, 0.0),
            LocalAnchor::new(2, 20.0, 30.0, 0.0),
        ];
        let mut calibration = AnchorCalibrationEngine::new(truth.len(), 5);
        for (i, a) in truth.iter().enumerate() {
            for b in &truth[i + 1..] {
                for _ in 0..5 {
                    let distance = model.noisy_distance(&mut rng, (a.position - b.position).norm());
                    calibration.add_measurement(a.id, b.id, distance * 1000.0);
                }
            }
        }
        let result = calibration.calibrate();
        assert!(result.success, "{}", result.error);
        for (calibrated, expected) in result.anchors.iter().zip(truth.iter()) {
            assert!((calibrated.position - expected.position).norm() < 0.1);
        }

        // GNSS fixes with the local x axis pointing north
        let reference = GeodeticPosition::new(43.2965, 5.3698, 0.0);
        let survey: Vec<SurveyPoint> = result
            .anchors
            .iter()
            .map(|a| SurveyPoint {
                local: a.position,
                geodetic: enu_to_lla(&Vector3::new(-a.position.y, a.position.x, 0.0), &reference),
            })
            .collect();
        let mut alignment = RigidAlignmentCalibrator::new();
        assert!(alignment.calibrate_survey(&survey));

        let mut engine = TrilaterationEngine::new();
        engine.set_local_anchors(&result.anchors);
        let line = StartLine::default();

        let mut crossings = 0;
        let mut previous: Option<Vector3<f64>> = None;
        for step in 0..7 {
            let tag = Vector3::new(20.0, -15.0 + 5.0 * step as f64 + 0.5, 1.0);
            let distances = model.distances_mm(&mut rng, &result.anchors, &tag);
            let estimate = engine.calculate_position(&distances);
            assert!(estimate.valid);

            let current = estimate.to_vector3();
            let status = line
                .evaluate(&result.anchors, &previous.unwrap_or(current), &current)
                .unwrap();
            if status.crossed {
                crossings += 1;
            }
            assert_eq!(status.on_preferred_side, tag.y > 0.0);

            let fix = alignment.transform(&current).unwrap();
            assert!((fix.lat > reference.lat) == (current.x > 0.0));
            previous = Some(current);
        }
        assert_eq!(crossings, 1);
    }

    #[test]
    fn test_synthetic_ranges_drive_trilateration() {
        let anchors = course_anchors();
        let mut engine = TrilaterationEngine::new();
        engine.set_local_anchors(&anchors);

        let model = RangingMeasurementModel::noiseless();
        let tag = Vector3::new(11.0, 7.0, 4.0);
        let distances = model.distances_mm(&mut seeded_rng(3), &anchors, &tag);
        let estimate = engine.calculate_position(&distances);
        assert!(estimate.valid);
        // Millimeter rounding of the ranges bounds the error
        assert!((estimate.x - tag.x).abs() < 0.01);
        assert!((estimate.y - tag.y).abs() < 0.01);
    }
}
