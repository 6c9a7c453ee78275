//! Localization engine
//!
//! Owns the particle cloud and drives one predict / weigh / normalize /
//! estimate / resample cycle whenever a fresh scan and a newer odometry
//! reading are both buffered. Each cycle works on a copy of the cloud and
//! commits it only when the cycle succeeds, then publishes an immutable
//! snapshot for concurrent readers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::common::{LaserScan, LocalizationError, LocalizationResult, OdometryReading, Pose2D};
use crate::localization::config::LocalizationConfig;
use crate::localization::motion_model::{MotionModel, OdometryDelta};
use crate::localization::particle_cloud::{Particle, ParticleCloud};
use crate::localization::sensor_model::SensorModel;
use crate::mapping::OccupancyField;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No particle cloud yet
    Uninitialized,
    /// Cloud exists; cycles run as data arrives
    Ready,
}

/// Outcome of one filter cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub mean_pose: Pose2D,
    pub map_to_odom: Pose2D,
    /// Neff of the normalized weights, before resampling
    pub effective_sample_size: f64,
    /// False when the scan had no usable return and weights were kept
    pub weights_updated: bool,
    /// True when weights collapsed and were reset to uniform
    pub degenerate_weights: bool,
    pub elapsed: Duration,
}

/// Committed engine state as seen by readers
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSnapshot {
    pub state: EngineState,
    pub mean_pose: Option<Pose2D>,
    pub map_to_odom: Pose2D,
    pub particles: Vec<Particle>,
    pub cycles: u64,
}

impl Default for EngineSnapshot {
    fn default() -> Self {
        Self {
            state: EngineState::Uninitialized,
            mean_pose: None,
            map_to_odom: Pose2D::origin(),
            particles: Vec::new(),
            cycles: 0,
        }
    }
}

/// Cloneable read handle onto the latest committed [`EngineSnapshot`]
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    inner: Arc<RwLock<Arc<EngineSnapshot>>>,
}

impl SnapshotReader {
    pub fn latest(&self) -> Arc<EngineSnapshot> {
        Arc::clone(&self.inner.read())
    }
}

/// Monte Carlo localization against a static occupancy field
#[derive(Debug)]
pub struct LocalizationEngine {
    config: LocalizationConfig,
    field: Arc<OccupancyField>,
    motion_model: MotionModel,
    sensor_model: SensorModel,
    rng: StdRng,
    cloud: Option<ParticleCloud>,
    mean_pose: Option<Pose2D>,
    map_to_odom: Pose2D,
    // odometry the current cloud is expressed against
    baseline_odom: Option<OdometryReading>,
    latest_odom: Option<OdometryReading>,
    pending_scan: Option<LaserScan>,
    cycles: u64,
    published: Arc<RwLock<Arc<EngineSnapshot>>>,
}

impl LocalizationEngine {
    pub fn new(config: LocalizationConfig, field: Arc<OccupancyField>) -> LocalizationResult<Self> {
        config.validate()?;

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            motion_model: MotionModel::new(config.motion),
            sensor_model: SensorModel::new(config.sensor),
            config,
            field,
            rng,
            cloud: None,
            mean_pose: None,
            map_to_odom: Pose2D::origin(),
            baseline_odom: None,
            latest_odom: None,
            pending_scan: None,
            cycles: 0,
            published: Arc::new(RwLock::new(Arc::new(EngineSnapshot::default()))),
        })
    }

    pub fn config(&self) -> &LocalizationConfig {
        &self.config
    }

    pub fn field(&self) -> &Arc<OccupancyField> {
        &self.field
    }

    pub fn state(&self) -> EngineState {
        if self.cloud.is_some() {
            EngineState::Ready
        } else {
            EngineState::Uninitialized
        }
    }

    /// Seed the cloud around `pose` with the configured spread
    pub fn initialize(&mut self, pose: &Pose2D) -> LocalizationResult<()> {
        self.initialize_with_spread(
            pose,
            self.config.initial_position_std,
            self.config.initial_orientation_std,
        )
    }

    /// Seed the cloud around `pose`, discarding any existing cloud.
    ///
    /// This is also the relocalization entry point. The latest odometry
    /// reading becomes the baseline for the next motion step.
    pub fn initialize_with_spread(
        &mut self,
        pose: &Pose2D,
        position_std: f64,
        orientation_std: f64,
    ) -> LocalizationResult<()> {
        let cloud = ParticleCloud::initialize(
            pose,
            position_std,
            orientation_std,
            self.config.particle_count,
            &mut self.rng,
        )?;

        let relocalized = self.cloud.is_some();
        let mean = cloud.mean_pose();
        self.cloud = Some(cloud);
        self.mean_pose = Some(mean);
        self.baseline_odom = self.latest_odom;
        self.map_to_odom = match self.latest_odom {
            Some(odom) => mean.compose(&odom.pose.inverse()),
            None => Pose2D::origin(),
        };

        info!(
            "{} filter with {} particles at ({:.3}, {:.3}, {:.3}), spread {:.3} m / {:.3} rad",
            if relocalized { "Relocalized" } else { "Initialized" },
            self.config.particle_count,
            pose.x,
            pose.y,
            pose.yaw,
            position_std,
            orientation_std
        );
        self.publish();
        Ok(())
    }

    /// Seed the cloud at the latest odometry pose, taking map and odometry
    /// frames as coincident.
    pub fn initialize_from_odometry(&mut self) -> LocalizationResult<()> {
        let odom = self.latest_odom.ok_or(LocalizationError::MissingOdometry)?;
        self.initialize(&odom.pose)
    }

    pub fn push_odometry(&mut self, reading: OdometryReading) {
        if let Some(latest) = self.latest_odom {
            if reading.timestamp < latest.timestamp {
                warn!(
                    "Dropping out-of-order odometry at t={:.3} (latest t={:.3})",
                    reading.timestamp, latest.timestamp
                );
                return;
            }
        }
        self.latest_odom = Some(reading);
    }

    pub fn push_scan(&mut self, scan: LaserScan) {
        if self.pending_scan.is_some() {
            trace!("Replacing unconsumed scan");
        }
        self.pending_scan = Some(scan);
    }

    // Odometry reading that should drive the next cycle, if any
    fn fresh_odometry(&self) -> Option<OdometryReading> {
        let latest = self.latest_odom?;
        match self.baseline_odom {
            Some(baseline) if latest.timestamp <= baseline.timestamp => None,
            _ => Some(latest),
        }
    }

    /// Run one filter cycle if a scan and newer odometry are available.
    ///
    /// Returns `Ok(None)` when idle. On error the previous cloud stays in place.
    pub fn spin_once(&mut self) -> LocalizationResult<Option<CycleReport>> {
        if self.cloud.is_none() || self.pending_scan.is_none() {
            return Ok(None);
        }
        let odom = match self.fresh_odometry() {
            Some(odom) => odom,
            None => return Ok(None),
        };

        let delta = match self.baseline_odom {
            Some(baseline) => {
                let delta = self.motion_model.compute_delta(&baseline.pose, &odom.pose);
                if !self.motion_model.exceeds_update_gate(&delta) {
                    trace!(
                        "Below update gate ({:.3} m, {:.3} rad), dropping scan",
                        delta.translation(),
                        delta.rotation()
                    );
                    self.pending_scan = None;
                    return Ok(None);
                }
                delta
            }
            None => OdometryDelta::identity(),
        };
        let (scan, mut next) = match (self.pending_scan.take(), &self.cloud) {
            (Some(scan), Some(cloud)) => (scan, cloud.clone()),
            _ => return Ok(None),
        };

        let start = Instant::now();

        // Predict
        let noise = self.motion_model.noise_for(&delta);
        next.apply_motion(&delta, &noise, &mut self.rng);

        // Weigh
        let weights_updated =
            match next.compute_weights(&scan, self.field.as_ref(), &mut self.sensor_model) {
                Ok(()) => true,
                Err(LocalizationError::EmptyScan) => {
                    warn!("Scan has no usable returns; keeping previous weights");
                    false
                }
                Err(e) => return Err(e),
            };

        // Normalize
        let degenerate_weights = match next.normalize() {
            Ok(()) => false,
            Err(LocalizationError::DegenerateWeights { total }) => {
                warn!("Degenerate weights (total = {}); reset to uniform", total);
                true
            }
            Err(e) => return Err(e),
        };

        // Estimate
        let mean_pose = next.mean_pose();
        let map_to_odom = mean_pose.compose(&odom.pose.inverse());
        let effective_sample_size = next.effective_sample_size();

        // Resample
        if weights_updated {
            next.resample(self.config.particle_count, &mut self.rng)?;
        }

        self.cloud = Some(next);
        self.mean_pose = Some(mean_pose);
        self.map_to_odom = map_to_odom;
        self.baseline_odom = Some(odom);
        self.cycles += 1;
        self.publish();

        let elapsed = start.elapsed();
        debug!(
            "Cycle {}: mean ({:.3}, {:.3}, {:.3}), Neff {:.1}, {:.2} ms",
            self.cycles,
            mean_pose.x,
            mean_pose.y,
            mean_pose.yaw,
            effective_sample_size,
            elapsed.as_secs_f64() * 1000.0
        );

        Ok(Some(CycleReport {
            mean_pose,
            map_to_odom,
            effective_sample_size,
            weights_updated,
            degenerate_weights,
            elapsed,
        }))
    }

    /// Weighted mean pose in the map frame, once initialized
    pub fn mean_pose(&self) -> Option<Pose2D> {
        self.mean_pose
    }

    /// Transform taking odometry-frame poses into the map frame
    pub fn map_to_odom(&self) -> Pose2D {
        self.map_to_odom
    }

    /// Express an odometry-frame pose in the map frame
    pub fn correct_odometry(&self, pose: &Pose2D) -> Pose2D {
        self.map_to_odom.compose(pose)
    }

    pub fn particles(&self) -> &[Particle] {
        match &self.cloud {
            Some(cloud) => cloud.particles(),
            None => &[],
        }
    }

    pub fn cloud(&self) -> Option<&ParticleCloud> {
        self.cloud.as_ref()
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn snapshot_reader(&self) -> SnapshotReader {
        SnapshotReader {
            inner: Arc::clone(&self.published),
        }
    }

    fn publish(&self) {
        let snapshot = EngineSnapshot {
            state: self.state(),
            mean_pose: self.mean_pose,
            map_to_odom: self.map_to_odom,
            particles: self.particles().to_vec(),
            cycles: self.cycles,
        };
        *self.published.write() = Arc::new(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{simulate_scan, OccupancyFieldConfig, OccupancyGrid};
    use approx::assert_abs_diff_eq;

    fn field_and_grid() -> (Arc<OccupancyField>, OccupancyGrid) {
        let mut grid = OccupancyGrid::new(10, 10, 1.0, Pose2D::origin()).unwrap();
        grid.set_occupied_at(5.0, 5.0);
        let config = OccupancyFieldConfig { max_distance: 20.0 };
        let field = OccupancyField::build(&grid, &config).unwrap();
        (Arc::new(field), grid)
    }

    fn seeded_config() -> LocalizationConfig {
        LocalizationConfig {
            particle_count: 50,
            seed: Some(1234),
            ..Default::default()
        }
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let (field, _) = field_and_grid();
        let config = LocalizationConfig { particle_count: 0, ..Default::default() };
        assert!(LocalizationEngine::new(config, field).is_err());
    }

    #[test]
    fn test_idle_until_initialized_and_fed() {
        let (field, grid) = field_and_grid();
        let mut engine = LocalizationEngine::new(seeded_config(), field).unwrap();
        assert_eq!(engine.state(), EngineState::Uninitialized);
        assert!(engine.mean_pose().is_none());
        assert!(engine.particles().is_empty());

        let scan = simulate_scan(&grid, &Pose2D::new(5.0, 0.0, 0.0), 90, 8.0).unwrap();
        engine.push_scan(scan.clone());
        engine.push_odometry(OdometryReading::new(Pose2D::origin(), 0.0));
        assert_eq!(engine.spin_once().unwrap(), None);

        engine.initialize(&Pose2D::new(5.0, 0.0, 0.0)).unwrap();
        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(engine.particles().len(), 50);

        // Initialization re-baselines on the latest odometry, so the buffered
        // reading is no longer fresh
        assert_eq!(engine.spin_once().unwrap(), None);

        engine.push_odometry(OdometryReading::new(Pose2D::new(0.1, 0.0, 0.0), 0.1));
        let report = engine.spin_once().unwrap().unwrap();
        assert!(report.weights_updated);
        assert_eq!(engine.cycles(), 1);

        // Scan consumed
        engine.push_odometry(OdometryReading::new(Pose2D::new(0.2, 0.0, 0.0), 0.2));
        assert_eq!(engine.spin_once().unwrap(), None);
        engine.push_scan(scan);
        assert!(engine.spin_once().unwrap().is_some());
        assert_eq!(engine.particles().len(), 50);
    }

    #[test]
    fn test_initialize_from_odometry() {
        let (field, _) = field_and_grid();
        let mut engine = LocalizationEngine::new(seeded_config(), field).unwrap();
        assert!(matches!(
            engine.initialize_from_odometry(),
            Err(LocalizationError::MissingOdometry)
        ));

        engine.push_odometry(OdometryReading::new(Pose2D::new(2.0, 3.0, 0.5), 1.0));
        engine.initialize_from_odometry().unwrap();
        let mean = engine.mean_pose().unwrap();
        assert_abs_diff_eq!(mean.x, 2.0, epsilon = 0.3);
        assert_abs_diff_eq!(mean.y, 3.0, epsilon = 0.3);
    }

    #[test]
    fn test_empty_scan_keeps_cloud() {
        let (field, _) = field_and_grid();
        let mut engine = LocalizationEngine::new(seeded_config(), field).unwrap();
        engine.initialize(&Pose2D::new(4.0, 4.0, 0.0)).unwrap();
        let before: Vec<Pose2D> = engine.particles().iter().map(|p| p.pose).collect();

        engine.push_odometry(OdometryReading::new(Pose2D::origin(), 0.0));
        engine.push_scan(LaserScan::from_angles(0.0, 0.1, vec![f64::INFINITY; 10], 8.0).unwrap());
        let report = engine.spin_once().unwrap().unwrap();
        assert!(!report.weights_updated);
        assert!(!report.degenerate_weights);
        // First cycle has an identity delta, so nothing moved either
        let after: Vec<Pose2D> = engine.particles().iter().map(|p| p.pose).collect();
        assert_eq!(after, before);
    }

    #[test]
    fn test_map_to_odom_and_correction() {
        let (field, grid) = field_and_grid();
        let mut engine = LocalizationEngine::new(seeded_config(), field).unwrap();
        engine.initialize(&Pose2D::new(5.0, 0.0, 0.0)).unwrap();

        let odom = Pose2D::new(1.0, -2.0, 0.7);
        engine.push_odometry(OdometryReading::new(odom, 0.0));
        engine.push_scan(simulate_scan(&grid, &Pose2D::new(5.0, 0.0, 0.0), 90, 8.0).unwrap());
        let report = engine.spin_once().unwrap().unwrap();

        assert_eq!(report.map_to_odom, engine.map_to_odom());
        let corrected = engine.correct_odometry(&odom);
        assert_abs_diff_eq!(corrected.x, report.mean_pose.x, epsilon = 1e-9);
        assert_abs_diff_eq!(corrected.y, report.mean_pose.y, epsilon = 1e-9);
        assert_abs_diff_eq!(corrected.yaw, report.mean_pose.yaw, epsilon = 1e-9);
    }

    #[test]
    fn test_update_gate_drops_small_motions() {
        let (field, grid) = field_and_grid();
        let mut config = seeded_config();
        config.motion.update_min_translation = 0.5;
        config.motion.update_min_rotation = 0.5;
        let mut engine = LocalizationEngine::new(config, field).unwrap();
        let scan = simulate_scan(&grid, &Pose2D::new(5.0, 0.0, 0.0), 90, 8.0).unwrap();

        engine.push_odometry(OdometryReading::new(Pose2D::origin(), 0.0));
        engine.initialize(&Pose2D::new(5.0, 0.0, 0.0)).unwrap();

        engine.push_odometry(OdometryReading::new(Pose2D::new(0.1, 0.0, 0.0), 0.1));
        engine.push_scan(scan.clone());
        assert_eq!(engine.spin_once().unwrap(), None);

        // Motion accumulates against the unchanged baseline
        engine.push_odometry(OdometryReading::new(Pose2D::new(0.6, 0.0, 0.0), 0.2));
        engine.push_scan(scan);
        assert!(engine.spin_once().unwrap().is_some());
    }

    #[test]
    fn test_translation_only_gate_holds_until_crossed() {
        let (field, grid) = field_and_grid();
        let mut config = seeded_config();
        config.motion.update_min_translation = 0.2;
        let mut engine = LocalizationEngine::new(config, field).unwrap();
        let scan = simulate_scan(&grid, &Pose2D::new(5.0, 0.0, 0.0), 90, 8.0).unwrap();

        engine.push_odometry(OdometryReading::new(Pose2D::origin(), 0.0));
        engine.initialize(&Pose2D::new(5.0, 0.0, 0.0)).unwrap();

        // Creeping forward and turning in place both stay below the gate
        engine.push_odometry(OdometryReading::new(Pose2D::new(0.01, 0.0, 0.0), 0.1));
        engine.push_scan(scan.clone());
        assert_eq!(engine.spin_once().unwrap(), None);
        engine.push_odometry(OdometryReading::new(Pose2D::new(0.01, 0.0, 1.0), 0.2));
        engine.push_scan(scan.clone());
        assert_eq!(engine.spin_once().unwrap(), None);
        assert_eq!(engine.cycles(), 0);

        engine.push_odometry(OdometryReading::new(Pose2D::new(0.25, 0.0, 1.0), 0.3));
        engine.push_scan(scan);
        assert!(engine.spin_once().unwrap().is_some());
        assert_eq!(engine.cycles(), 1);
    }

    #[test]
    fn test_degenerate_weights_recover_to_uniform() {
        // No obstacles: every endpoint sits at max_distance and every
        // likelihood underflows to zero
        let grid = OccupancyGrid::new(10, 10, 1.0, Pose2D::origin()).unwrap();
        let config = OccupancyFieldConfig { max_distance: 50.0 };
        let field = OccupancyField::build(&grid, &config).unwrap();
        let mut engine = LocalizationEngine::new(seeded_config(), Arc::new(field)).unwrap();
        engine.initialize(&Pose2D::new(5.0, 5.0, 0.0)).unwrap();

        engine.push_odometry(OdometryReading::new(Pose2D::origin(), 0.0));
        engine.push_scan(LaserScan::from_angles(0.0, 0.2, vec![1.0; 20], 8.0).unwrap());
        let report = engine.spin_once().unwrap().unwrap();

        assert!(report.weights_updated);
        assert!(report.degenerate_weights);
        assert_abs_diff_eq!(report.effective_sample_size, 50.0, epsilon = 1e-6);
        assert_eq!(engine.particles().len(), 50);
        assert!(engine.particles().iter().all(|p| p.weight == 1.0 / 50.0));
        assert!(engine.mean_pose().map_or(false, |m| m.x.is_finite() && m.y.is_finite()));
        assert_eq!(engine.cycles(), 1);
    }

    #[test]
    fn test_out_of_order_odometry_is_ignored() {
        let (field, _) = field_and_grid();
        let mut engine = LocalizationEngine::new(seeded_config(), field).unwrap();
        engine.push_odometry(OdometryReading::new(Pose2D::new(1.0, 0.0, 0.0), 2.0));
        engine.push_odometry(OdometryReading::new(Pose2D::new(9.0, 0.0, 0.0), 1.0));
        engine.initialize_from_odometry().unwrap();
        assert_abs_diff_eq!(engine.mean_pose().unwrap().x, 1.0, epsilon = 0.3);
    }

    #[test]
    fn test_snapshot_reader_sees_committed_state() {
        let (field, grid) = field_and_grid();
        let mut engine = LocalizationEngine::new(seeded_config(), field).unwrap();
        let reader = engine.snapshot_reader();
        assert_eq!(reader.latest().state, EngineState::Uninitialized);

        engine.initialize(&Pose2D::new(5.0, 0.0, 0.0)).unwrap();
        let snapshot = reader.latest();
        assert_eq!(snapshot.state, EngineState::Ready);
        assert_eq!(snapshot.particles.len(), 50);
        assert_eq!(snapshot.cycles, 0);

        engine.push_odometry(OdometryReading::new(Pose2D::origin(), 0.0));
        engine.push_scan(simulate_scan(&grid, &Pose2D::new(5.0, 0.0, 0.0), 90, 8.0).unwrap());
        let report = engine.spin_once().unwrap().unwrap();

        let other = reader.clone();
        let snapshot = other.latest();
        assert_eq!(snapshot.cycles, 1);
        assert_eq!(snapshot.mean_pose, Some(report.mean_pose));
        assert_eq!(snapshot.particles, engine.particles().to_vec());
    }
}
