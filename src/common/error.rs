//! Error types for lidar_mcl

use thiserror::Error;

/// Main error type for the localization pipeline
#[derive(Debug, Error)]
pub enum LocalizationError {
    /// Invalid parameter (particle count, noise or std values)
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    /// The occupancy grid cannot be used to build a field
    #[error("Invalid map: {0}")]
    InvalidMap(String),
    /// Weights summed to zero or a non-finite value; the cloud fell back to uniform weights
    #[error("Degenerate particle weights (total = {total})")]
    DegenerateWeights { total: f64 },
    /// The scan carried no usable return
    #[error("Scan has no valid returns")]
    EmptyScan,
    /// An operation needed an odometry reading that has not arrived yet
    #[error("No odometry reading available")]
    MissingOdometry,
    /// Configuration file could not be read
    #[error("Config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),
    /// Configuration could not be parsed or serialized
    #[error("Config parse error: {0}")]
    ConfigParse(String),
}

impl From<serde_yaml::Error> for LocalizationError {
    fn from(e: serde_yaml::Error) -> Self {
        LocalizationError::ConfigParse(e.to_string())
    }
}

/// Result type alias for localization operations
pub type LocalizationResult<T> = Result<T, LocalizationError>;
