// Monte Carlo localization module

pub mod config;
pub mod engine;
pub mod motion_model;
pub mod particle_cloud;
pub mod resampling;
pub mod sensor_model;

// Re-exports
pub use config::LocalizationConfig;
pub use engine::{CycleReport, EngineSnapshot, EngineState, LocalizationEngine, SnapshotReader};
pub use motion_model::{MotionModel, MotionModelConfig, MotionNoise, OdometryDelta};
pub use particle_cloud::{Particle, ParticleCloud};
pub use resampling::{cumulative_weights, low_variance_indices};
pub use sensor_model::{gauss_likelihood, SensorModel, SensorModelConfig};
