//! Configuration for the localization engine
//!
//! Loadable from YAML; every field has a default so partial files are fine.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::{LocalizationError, LocalizationResult};
use crate::localization::motion_model::MotionModelConfig;
use crate::localization::sensor_model::SensorModelConfig;
use crate::mapping::OccupancyFieldConfig;

/// Top-level configuration for [`crate::localization::LocalizationEngine`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalizationConfig {
    /// Number of particles
    pub particle_count: usize,
    /// Std of the initial x/y spread [m]
    pub initial_position_std: f64,
    /// Std of the initial heading spread [rad]
    pub initial_orientation_std: f64,
    /// Fixed rng seed; `None` seeds from entropy
    pub seed: Option<u64>,
    pub motion: MotionModelConfig,
    pub sensor: SensorModelConfig,
    pub field: OccupancyFieldConfig,
}

impl Default for LocalizationConfig {
    fn default() -> Self {
        Self {
            particle_count: 300,
            initial_position_std: 0.5,
            initial_orientation_std: 0.5,
            seed: None,
            motion: MotionModelConfig::default(),
            sensor: SensorModelConfig::default(),
            field: OccupancyFieldConfig::default(),
        }
    }
}

fn require_positive(name: &str, value: f64) -> LocalizationResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(LocalizationError::InvalidParameter(format!(
            "{} must be > 0, got {}",
            name, value
        )))
    }
}

fn require_non_negative(name: &str, value: f64) -> LocalizationResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(LocalizationError::InvalidParameter(format!(
            "{} must be >= 0, got {}",
            name, value
        )))
    }
}

impl LocalizationConfig {
    pub fn from_yaml(yaml: &str) -> LocalizationResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> LocalizationResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn to_yaml(&self) -> LocalizationResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check every parameter; the engine refuses to start on failure.
    pub fn validate(&self) -> LocalizationResult<()> {
        if self.particle_count == 0 {
            return Err(LocalizationError::InvalidParameter(
                "particle_count must be > 0".to_string(),
            ));
        }
        require_positive("initial_position_std", self.initial_position_std)?;
        require_positive("initial_orientation_std", self.initial_orientation_std)?;

        let motion = &self.motion;
        require_positive("motion.min_translation_std", motion.min_translation_std)?;
        require_positive("motion.min_rotation_std", motion.min_rotation_std)?;
        require_non_negative("motion.translation_noise_ratio", motion.translation_noise_ratio)?;
        require_non_negative("motion.rotation_noise_ratio", motion.rotation_noise_ratio)?;
        require_non_negative(
            "motion.translation_to_rotation_ratio",
            motion.translation_to_rotation_ratio,
        )?;
        require_non_negative("motion.stationary_translation", motion.stationary_translation)?;
        require_non_negative("motion.stationary_rotation", motion.stationary_rotation)?;
        require_non_negative("motion.update_min_translation", motion.update_min_translation)?;
        require_non_negative("motion.update_min_rotation", motion.update_min_rotation)?;

        require_positive("sensor.sensor_std", self.sensor.sensor_std)?;
        require_positive("sensor.empty_average", self.sensor.empty_average)?;
        if self.sensor.beam_skip == 0 {
            return Err(LocalizationError::InvalidParameter(
                "sensor.beam_skip must be >= 1".to_string(),
            ));
        }

        require_positive("field.max_distance", self.field.max_distance)?;
        Ok(())
    }
}
