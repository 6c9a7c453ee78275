//! Odometry motion model
//!
//! Turns two successive odometry poses into an incremental transform
//! expressed in the earlier pose's frame, and decides how much Gaussian
//! noise the particle cloud should absorb for that motion.

use serde::{Deserialize, Serialize};

use crate::common::{normalize_angle, Pose2D};

/// Configuration for the odometry motion model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionModelConfig {
    /// Translations below this are treated as no motion [m]
    pub stationary_translation: f64,
    /// Rotations below this are treated as no motion [rad]
    pub stationary_rotation: f64,
    /// Translation noise std per metre travelled [m/m]
    pub translation_noise_ratio: f64,
    /// Heading noise std per radian turned [rad/rad]
    pub rotation_noise_ratio: f64,
    /// Heading noise std per metre travelled [rad/m]
    pub translation_to_rotation_ratio: f64,
    /// Floor for the translation noise std [m]
    pub min_translation_std: f64,
    /// Floor for the heading noise std [rad]
    pub min_rotation_std: f64,
    /// Distance the robot must travel before a filter update fires [m]; 0 disables the gate
    pub update_min_translation: f64,
    /// Rotation the robot must turn before a filter update fires [rad]; 0 disables the gate
    pub update_min_rotation: f64,
}

impl Default for MotionModelConfig {
    fn default() -> Self {
        Self {
            stationary_translation: 1e-4,
            stationary_rotation: 1e-4,
            translation_noise_ratio: 0.1,
            rotation_noise_ratio: 0.1,
            translation_to_rotation_ratio: 0.05,
            min_translation_std: 0.05,
            min_rotation_std: 0.05,
            update_min_translation: 0.0,
            update_min_rotation: 0.0,
        }
    }
}

/// Standard deviations of the noise injected by one motion step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionNoise {
    pub translation_std: f64,
    pub rotation_std: f64,
}

impl MotionNoise {
    pub fn new(translation_std: f64, rotation_std: f64) -> Self {
        Self { translation_std, rotation_std }
    }

    /// No noise at all
    pub fn none() -> Self {
        Self { translation_std: 0.0, rotation_std: 0.0 }
    }

    pub fn is_suppressed(&self) -> bool {
        self.translation_std <= 0.0 && self.rotation_std <= 0.0
    }
}

/// Motion between two odometry readings, in the earlier reading's frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OdometryDelta {
    pub transform: Pose2D,
    /// Set when the motion fell inside the stationary dead-zone
    pub stationary: bool,
}

impl OdometryDelta {
    pub fn identity() -> Self {
        Self { transform: Pose2D::origin(), stationary: true }
    }

    pub fn translation(&self) -> f64 {
        self.transform.translation_norm()
    }

    pub fn rotation(&self) -> f64 {
        self.transform.yaw
    }

    pub fn is_identity(&self) -> bool {
        self.transform.x == 0.0 && self.transform.y == 0.0 && self.transform.yaw == 0.0
    }
}

/// Odometry-based motion model
#[derive(Debug, Clone)]
pub struct MotionModel {
    config: MotionModelConfig,
}

impl MotionModel {
    pub fn new(config: MotionModelConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MotionModelConfig {
        &self.config
    }

    /// Incremental transform from `prev` to `curr`, in `prev`'s frame
    pub fn compute_delta(&self, prev: &Pose2D, curr: &Pose2D) -> OdometryDelta {
        let (sin, cos) = prev.yaw.sin_cos();
        let dx = curr.x - prev.x;
        let dy = curr.y - prev.y;
        let transform = Pose2D {
            x: cos * dx + sin * dy,
            y: -sin * dx + cos * dy,
            yaw: normalize_angle(curr.yaw - prev.yaw),
        };

        if transform.translation_norm() < self.config.stationary_translation
            && transform.yaw.abs() < self.config.stationary_rotation
        {
            return OdometryDelta::identity();
        }
        OdometryDelta { transform, stationary: false }
    }

    /// Noise for a delta: proportional to the motion, floored, and suppressed at rest
    pub fn noise_for(&self, delta: &OdometryDelta) -> MotionNoise {
        if delta.stationary {
            return MotionNoise::none();
        }
        let translation = delta.translation();
        let rotation = delta.rotation().abs();
        MotionNoise::new(
            (self.config.translation_noise_ratio * translation)
                .max(self.config.min_translation_std),
            (self.config.rotation_noise_ratio * rotation
                + self.config.translation_to_rotation_ratio * translation)
                .max(self.config.min_rotation_std),
        )
    }

    /// Whether the accumulated motion is large enough to run a filter update.
    ///
    /// Only axes with a positive threshold take part; with both thresholds
    /// at 0 every delta passes.
    pub fn exceeds_update_gate(&self, delta: &OdometryDelta) -> bool {
        let min_translation = self.config.update_min_translation;
        let min_rotation = self.config.update_min_rotation;
        if min_translation <= 0.0 && min_rotation <= 0.0 {
            return true;
        }
        (min_translation > 0.0 && delta.translation() >= min_translation)
            || (min_rotation > 0.0 && delta.rotation().abs() >= min_rotation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn test_delta_is_in_previous_frame() {
        let model = MotionModel::new(MotionModelConfig::default());
        let prev = Pose2D::new(1.0, 1.0, FRAC_PI_2);
        let curr = Pose2D::new(1.0, 3.0, FRAC_PI_2 + 0.3);
        let delta = model.compute_delta(&prev, &curr);
        // Moving along map +y while facing +y is straight ahead
        assert_abs_diff_eq!(delta.transform.x, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(delta.transform.y, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(delta.transform.yaw, 0.3, epsilon = 1e-12);
        assert!(!delta.stationary);

        // Composing the delta onto prev reproduces curr
        let recomposed = prev.compose(&delta.transform);
        assert_abs_diff_eq!(recomposed.x, curr.x, epsilon = 1e-12);
        assert_abs_diff_eq!(recomposed.y, curr.y, epsilon = 1e-12);
    }

    #[test]
    fn test_delta_rotation_wraps() {
        let model = MotionModel::new(MotionModelConfig::default());
        let prev = Pose2D::new(0.0, 0.0, PI - 0.1);
        let delta = model.compute_delta(&prev, &Pose2D::new(0.0, 0.0, -PI + 0.1));
        assert_abs_diff_eq!(delta.rotation(), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_stationary_dead_zone() {
        let model = MotionModel::new(MotionModelConfig {
            stationary_translation: 0.01,
            stationary_rotation: 0.01,
            ..Default::default()
        });
        let prev = Pose2D::new(2.0, 3.0, 0.4);
        let delta = model.compute_delta(&prev, &Pose2D::new(2.003, 2.998, 0.405));
        assert!(delta.stationary);
        assert!(delta.is_identity());
        assert!(model.noise_for(&delta).is_suppressed());
    }

    #[test]
    fn test_noise_scales_with_motion_and_is_floored() {
        let model = MotionModel::new(MotionModelConfig::default());
        let small = model.compute_delta(&Pose2D::origin(), &Pose2D::new(0.01, 0.0, 0.0));
        let large = model.compute_delta(&Pose2D::origin(), &Pose2D::new(2.0, 0.0, 1.0));

        let small_noise = model.noise_for(&small);
        let large_noise = model.noise_for(&large);
        assert_eq!(small_noise.translation_std, model.config().min_translation_std);
        assert_eq!(small_noise.rotation_std, model.config().min_rotation_std);
        assert_abs_diff_eq!(large_noise.translation_std, 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(large_noise.rotation_std, 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_update_gate() {
        let model = MotionModel::new(MotionModelConfig {
            update_min_translation: 0.2,
            update_min_rotation: PI / 6.0,
            ..Default::default()
        });
        let short = model.compute_delta(&Pose2D::origin(), &Pose2D::new(0.1, 0.0, 0.1));
        let far = model.compute_delta(&Pose2D::origin(), &Pose2D::new(0.3, 0.0, 0.0));
        let turned = model.compute_delta(&Pose2D::origin(), &Pose2D::new(0.0, 0.0, 0.6));
        assert!(!model.exceeds_update_gate(&short));
        assert!(model.exceeds_update_gate(&far));
        assert!(model.exceeds_update_gate(&turned));

        // Disabled gate lets even a stationary delta through
        let ungated = MotionModel::new(MotionModelConfig::default());
        assert!(ungated.exceeds_update_gate(&OdometryDelta::identity()));
    }

    #[test]
    fn test_update_gate_with_single_threshold() {
        let translation_only = MotionModel::new(MotionModelConfig {
            update_min_translation: 0.2,
            ..Default::default()
        });
        let creep = translation_only.compute_delta(&Pose2D::origin(), &Pose2D::new(0.01, 0.0, 0.0));
        let spin = translation_only.compute_delta(&Pose2D::origin(), &Pose2D::new(0.0, 0.0, 1.0));
        let far = translation_only.compute_delta(&Pose2D::origin(), &Pose2D::new(0.25, 0.0, 0.0));
        assert!(!translation_only.exceeds_update_gate(&creep));
        assert!(!translation_only.exceeds_update_gate(&spin));
        assert!(!translation_only.exceeds_update_gate(&OdometryDelta::identity()));
        assert!(translation_only.exceeds_update_gate(&far));

        let rotation_only = MotionModel::new(MotionModelConfig {
            update_min_rotation: 0.5,
            ..Default::default()
        });
        let drive = rotation_only.compute_delta(&Pose2D::origin(), &Pose2D::new(3.0, 0.0, 0.1));
        let turn = rotation_only.compute_delta(&Pose2D::origin(), &Pose2D::new(0.0, 0.0, -0.6));
        assert!(!rotation_only.exceeds_update_gate(&drive));
        assert!(rotation_only.exceeds_update_gate(&turn));
    }
}
