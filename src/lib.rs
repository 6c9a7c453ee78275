//! lidar_mcl - particle filter localization against a static occupancy map
//!
//! A robot's pose is tracked by a cloud of weighted hypotheses. Each cycle
//! moves the cloud by the latest odometry increment, scores every particle
//! by how well a laser scan projected from its pose lines up with the
//! map's obstacles, and resamples toward the better hypotheses. The
//! resulting mean pose yields the map-to-odometry correction.

// Core modules
pub mod common;

// Algorithm modules
pub mod localization;
pub mod mapping;

// Re-export common types for convenience
pub use common::{LaserScan, OdometryReading, Point2D, Pose2D};
pub use common::DistanceField;
pub use common::{LocalizationError, LocalizationResult};
pub use localization::{CycleReport, LocalizationConfig, LocalizationEngine, SnapshotReader};
pub use mapping::{OccupancyField, OccupancyGrid};
