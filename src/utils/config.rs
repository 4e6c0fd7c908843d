use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::algorithms::alignment::{RigidAlignmentCalibrator, SurveyPoint};
use crate::algorithms::calibration::AnchorCalibrationEngine;
use crate::algorithms::trilateration::{RefinedTrilateration, TrilaterationEngine, TrilaterationMode};
use crate::core::{AnchorId, CalibrationResult, LocalAnchor, StartLine, DETERMINANT_TOLERANCE, MAX_ANCHORS, MIN_ANCHORS_3D};

/// Anchor self-calibration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Number of anchors taking part in the self-survey
    pub num_anchors: usize,
    /// Samples each anchor pair needs before it counts as measured
    pub min_samples_per_pair: usize,
    /// Allow a three-anchor run to estimate a missing A1-A2 distance
    pub allow_d12_estimate: bool,
}

/// Tag positioning solver settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrilaterationConfig {
    pub mode: TrilaterationMode,
    /// Refined mode only
    pub max_iterations: usize,
    /// Refined mode only; stop once an accepted step is shorter than this (meters)
    pub convergence_tolerance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentConfig {
    /// Allowed deviation of det(R) from +1 before a warning
    pub determinant_tolerance: f64,
}

/// Complete engine configuration as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub calibration: CalibrationConfig,
    pub trilateration: TrilaterationConfig,
    pub alignment: AlignmentConfig,
    pub start_line: StartLine,
    /// Calibrated anchor layout in the local frame
    #[serde(default)]
    pub anchors: Vec<LocalAnchor>,
    /// Anchor GNSS survey used for local to geodetic alignment
    #[serde(default)]
    pub survey: Vec<SurveyPoint>,
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// Invalid parameter value
    #[error("Invalid parameter '{parameter}' = '{value}': {reason}")]
    InvalidParameter { parameter: String, value: String, reason: String },
    /// Configuration file I/O error
    #[error("I/O error: {message}")]
    IoError { message: String },
    /// JSON serialization/deserialization error
    #[error("Serialization error: {message}")]
    SerializationError { message: String },
    /// Anchor configuration conflict
    #[error("Anchor A{anchor_id} conflict: {reason}")]
    AnchorConflict { anchor_id: AnchorId, reason: String },
    /// Geometry validation failure
    #[error("Geometry validation failed: {reason}")]
    GeometryValidation { reason: String },
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            num_anchors: 3,
            min_samples_per_pair: 3,
            allow_d12_estimate: true,
        }
    }
}

impl Default for TrilaterationConfig {
    fn default() -> Self {
        let refined = RefinedTrilateration::default();
        Self {
            mode: TrilaterationMode::Exact,
            max_iterations: refined.max_iterations,
            convergence_tolerance: refined.convergence_tolerance,
        }
    }
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            determinant_tolerance: DETERMINANT_TOLERANCE,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            calibration: CalibrationConfig::default(),
            trilateration: TrilaterationConfig::default(),
            alignment: AlignmentConfig::default(),
            start_line: StartLine::default(),
            anchors: Vec::new(),
            survey: Vec::new(),
        }
    }
}

fn invalid(parameter: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidParameter {
        parameter: parameter.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn check_num_anchors(num_anchors: usize) -> Result<(), ConfigError> {
    if num_anchors < MIN_ANCHORS_3D || num_anchors > MAX_ANCHORS {
        return Err(invalid(
            "calibration.num_anchors",
            num_anchors,
            "anchor count must be between 3 and 8",
        ));
    }
    Ok(())
}

fn check_min_samples(min_samples: usize) -> Result<(), ConfigError> {
    if min_samples < 1 {
        return Err(invalid(
            "calibration.min_samples_per_pair",
            min_samples,
            "at least one sample per pair is required",
        ));
    }
    Ok(())
}

fn check_positive(parameter: &str, value: f64) -> Result<(), ConfigError> {
    if !(value > 0.0) || !value.is_finite() {
        return Err(invalid(parameter, value, "must be a positive finite number"));
    }
    Ok(())
}

fn check_start_line(line: &StartLine) -> Result<(), ConfigError> {
    if line.anchor_a_id == line.anchor_b_id {
        return Err(ConfigError::AnchorConflict {
            anchor_id: line.anchor_a_id,
            reason: "start line needs two distinct anchors".to_string(),
        });
    }
    Ok(())
}

fn check_anchors(anchors: &[LocalAnchor]) -> Result<(), ConfigError> {
    if anchors.len() > MAX_ANCHORS {
        return Err(invalid("anchors", anchors.len(), "at most 8 anchors are supported"));
    }
    let mut seen = HashSet::new();
    for anchor in anchors {
        if anchor.id as usize >= MAX_ANCHORS {
            return Err(ConfigError::AnchorConflict {
                anchor_id: anchor.id,
                reason: "anchor id outside slot range 0-7".to_string(),
            });
        }
        if !seen.insert(anchor.id) {
            return Err(ConfigError::AnchorConflict {
                anchor_id: anchor.id,
                reason: "duplicate anchor id".to_string(),
            });
        }
        if !anchor.position.iter().all(|c| c.is_finite()) {
            return Err(ConfigError::AnchorConflict {
                anchor_id: anchor.id,
                reason: "anchor position is not finite".to_string(),
            });
        }
    }
    Ok(())
}

impl EngineConfig {
    /// Check every field; the first violation is returned
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_num_anchors(self.calibration.num_anchors)?;
        check_min_samples(self.calibration.min_samples_per_pair)?;
        if self.trilateration.max_iterations == 0 {
            return Err(invalid(
                "trilateration.max_iterations",
                0,
                "at least one iteration is required",
            ));
        }
        check_positive("trilateration.convergence_tolerance", self.trilateration.convergence_tolerance)?;
        check_positive("alignment.determinant_tolerance", self.alignment.determinant_tolerance)?;
        check_start_line(&self.start_line)?;
        check_anchors(&self.anchors)?;
        if !self.survey.is_empty() && self.survey.len() < MIN_ANCHORS_3D {
            return Err(ConfigError::GeometryValidation {
                reason: format!("survey needs at least 3 points, got {}", self.survey.len()),
            });
        }
        Ok(())
    }

    /// Calibration engine sized and flagged from the calibration section
    pub fn build_calibration_engine(&self) -> AnchorCalibrationEngine {
        let mut engine =
            AnchorCalibrationEngine::new(self.calibration.num_anchors, self.calibration.min_samples_per_pair);
        engine.allow_d12_estimate = self.calibration.allow_d12_estimate;
        engine
    }

    /// Trilateration engine with the configured solver and anchor layout
    pub fn build_trilateration_engine(&self) -> TrilaterationEngine {
        let mut engine = match self.trilateration.mode {
            TrilaterationMode::Exact => TrilaterationEngine::new(),
            TrilaterationMode::Refined => TrilaterationEngine::with_solver(Box::new(RefinedTrilateration {
                max_iterations: self.trilateration.max_iterations,
                convergence_tolerance: self.trilateration.convergence_tolerance,
                ..RefinedTrilateration::default()
            })),
        };
        engine.set_local_anchors(&self.anchors);
        engine
    }

    /// Alignment calibrator, already calibrated when a survey is stored.
    ///
    /// An empty survey yields an uncalibrated calibrator; a survey that
    /// cannot be aligned is an error.
    pub fn build_alignment(&self) -> Result<RigidAlignmentCalibrator, ConfigError> {
        let mut calibrator = RigidAlignmentCalibrator::with_determinant_tolerance(self.alignment.determinant_tolerance);
        if !self.survey.is_empty() && !calibrator.calibrate_survey(&self.survey) {
            return Err(ConfigError::GeometryValidation {
                reason: "stored survey points are degenerate".to_string(),
            });
        }
        Ok(calibrator)
    }
}

/// Main configuration manager
pub struct ConfigurationManager {
    config: EngineConfig,
    /// Configuration file path
    config_file_path: Option<String>,
    /// Whether configuration has been modified
    is_modified: bool,
}

impl Default for ConfigurationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigurationManager {
    /// Create a new configuration manager with default settings
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            config_file_path: None,
            is_modified: false,
        }
    }

    /// Create configuration manager and load from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut manager = Self::new();
        manager.load_from_file(path)?;
        Ok(manager)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replace the whole configuration after validation
    pub fn update_config(&mut self, config: EngineConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.config = config;
        self.is_modified = true;
        Ok(())
    }

    /// Load configuration from JSON file
    pub fn load_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
            message: format!("Failed to read config file '{}': {}", path_str, e),
        })?;

        let config: EngineConfig = serde_json::from_str(&content).map_err(|e| ConfigError::SerializationError {
            message: format!("Failed to parse config file '{}': {}", path_str, e),
        })?;

        // Validate before applying
        config.validate()?;

        info!(
            "loaded configuration from {} ({} anchors, {} survey points)",
            path_str,
            config.anchors.len(),
            config.survey.len()
        );
        self.config = config;
        self.config_file_path = Some(path_str);
        self.is_modified = false;
        Ok(())
    }

    /// Save configuration to JSON file
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let content = serde_json::to_string_pretty(&self.config).map_err(|e| ConfigError::SerializationError {
            message: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(&path, content).map_err(|e| ConfigError::IoError {
            message: format!("Failed to write config file '{}': {}", path_str, e),
        })?;

        self.config_file_path = Some(path_str);
        self.is_modified = false;
        Ok(())
    }

    /// Save to the currently loaded file path
    pub fn save(&mut self) -> Result<(), ConfigError> {
        if let Some(path) = self.config_file_path.clone() {
            self.save_to_file(path)
        } else {
            Err(ConfigError::IoError {
                message: "No file path set for saving configuration".to_string(),
            })
        }
    }

    /// Check if configuration has been modified since last save
    pub fn is_modified(&self) -> bool {
        self.is_modified
    }

    // Runtime parameter adjustment; each setter returns the previous value

    pub fn set_num_anchors(&mut self, num_anchors: usize) -> Result<usize, ConfigError> {
        check_num_anchors(num_anchors)?;
        let old_value = self.config.calibration.num_anchors;
        self.config.calibration.num_anchors = num_anchors;
        self.is_modified = true;
        Ok(old_value)
    }

    pub fn set_min_samples_per_pair(&mut self, min_samples: usize) -> Result<usize, ConfigError> {
        check_min_samples(min_samples)?;
        let old_value = self.config.calibration.min_samples_per_pair;
        self.config.calibration.min_samples_per_pair = min_samples;
        self.is_modified = true;
        Ok(old_value)
    }

    pub fn set_allow_d12_estimate(&mut self, allow: bool) -> bool {
        let old_value = self.config.calibration.allow_d12_estimate;
        self.config.calibration.allow_d12_estimate = allow;
        self.is_modified = true;
        old_value
    }

    pub fn set_trilateration_mode(&mut self, mode: TrilaterationMode) -> TrilaterationMode {
        let old_value = self.config.trilateration.mode;
        self.config.trilateration.mode = mode;
        self.is_modified = true;
        old_value
    }

    pub fn set_determinant_tolerance(&mut self, tolerance: f64) -> Result<f64, ConfigError> {
        check_positive("alignment.determinant_tolerance", tolerance)?;
        let old_value = self.config.alignment.determinant_tolerance;
        self.config.alignment.determinant_tolerance = tolerance;
        self.is_modified = true;
        Ok(old_value)
    }

    pub fn set_start_line(&mut self, line: StartLine) -> Result<StartLine, ConfigError> {
        check_start_line(&line)?;
        let old_value = self.config.start_line;
        self.config.start_line = line;
        self.is_modified = true;
        Ok(old_value)
    }

    /// Add or replace one anchor by id
    pub fn set_anchor(&mut self, anchor: LocalAnchor) -> Result<Option<LocalAnchor>, ConfigError> {
        let mut anchors = self.config.anchors.clone();
        let old_value = match anchors.iter_mut().find(|a| a.id == anchor.id) {
            Some(slot) => Some(std::mem::replace(slot, anchor)),
            None => {
                anchors.push(anchor);
                None
            }
        };
        check_anchors(&anchors)?;
        anchors.sort_by_key(|a| a.id);
        self.config.anchors = anchors;
        self.is_modified = true;
        Ok(old_value)
    }

    pub fn remove_anchor(&mut self, anchor_id: AnchorId) -> Option<LocalAnchor> {
        let index = self.config.anchors.iter().position(|a| a.id == anchor_id)?;
        self.is_modified = true;
        Some(self.config.anchors.remove(index))
    }

    /// Store the layout of a successful calibration run
    pub fn apply_calibration(&mut self, result: &CalibrationResult) -> Result<(), ConfigError> {
        if !result.success {
            return Err(ConfigError::GeometryValidation {
                reason: format!("calibration failed: {}", result.error),
            });
        }
        check_anchors(&result.anchors)?;
        if result.d12_estimated {
            warn!("storing an anchor layout with an estimated A1-A2 distance");
        }
        self.config.anchors = result.anchors.clone();
        self.is_modified = true;
        Ok(())
    }

    /// Replace the survey; it must align before it is stored
    pub fn set_survey(&mut self, survey: Vec<SurveyPoint>) -> Result<(), ConfigError> {
        let mut candidate = self.config.clone();
        candidate.survey = survey;
        candidate.validate()?;
        candidate.build_alignment()?;
        self.config = candidate;
        self.is_modified = true;
        Ok(())
    }
}
