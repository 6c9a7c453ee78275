//! Weighted particle set for Monte Carlo localization

use nalgebra::{Matrix3, Vector3};
use ordered_float::OrderedFloat;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::common::{
    normalize_angle, DistanceField, LaserScan, LocalizationError, LocalizationResult, Pose2D,
};
use crate::localization::motion_model::{MotionNoise, OdometryDelta};
use crate::localization::resampling::low_variance_indices;
use crate::localization::sensor_model::SensorModel;

/// A single pose hypothesis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle {
    pub pose: Pose2D,
    pub weight: f64,
}

impl Particle {
    pub fn new(pose: Pose2D, weight: f64) -> Self {
        Self { pose, weight }
    }
}

fn check_positive(name: &str, value: f64) -> LocalizationResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(LocalizationError::InvalidParameter(format!(
            "{} must be > 0, got {}",
            name, value
        )))
    }
}

/// Fixed-size collection of weighted particles
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleCloud {
    particles: Vec<Particle>,
}

impl ParticleCloud {
    /// Draw `count` particles around `pose` with independent Gaussian noise
    /// on x, y (`position_std`) and yaw (`orientation_std`), uniformly weighted.
    pub fn initialize<R: Rng + ?Sized>(
        pose: &Pose2D,
        position_std: f64,
        orientation_std: f64,
        count: usize,
        rng: &mut R,
    ) -> LocalizationResult<Self> {
        if count == 0 {
            return Err(LocalizationError::InvalidParameter(
                "particle count must be > 0".to_string(),
            ));
        }
        check_positive("position_std", position_std)?;
        check_positive("orientation_std", orientation_std)?;

        let weight = 1.0 / count as f64;
        let particles = (0..count)
            .map(|_| {
                let nx: f64 = StandardNormal.sample(rng);
                let ny: f64 = StandardNormal.sample(rng);
                let nyaw: f64 = StandardNormal.sample(rng);
                Particle::new(
                    Pose2D::new(
                        pose.x + position_std * nx,
                        pose.y + position_std * ny,
                        pose.yaw + orientation_std * nyaw,
                    ),
                    weight,
                )
            })
            .collect();

        Ok(Self { particles })
    }

    /// Wrap an explicit particle set
    pub fn from_particles(particles: Vec<Particle>) -> LocalizationResult<Self> {
        if particles.is_empty() {
            return Err(LocalizationError::InvalidParameter(
                "particle cloud cannot be empty".to_string(),
            ));
        }
        Ok(Self { particles })
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn weights(&self) -> Vec<f64> {
        self.particles.iter().map(|p| p.weight).collect()
    }

    pub fn total_weight(&self) -> f64 {
        self.particles.iter().map(|p| p.weight).sum()
    }

    /// Prediction step: move every particle by `delta` in its own heading,
    /// then perturb it with `noise`.
    pub fn apply_motion<R: Rng + ?Sized>(
        &mut self,
        delta: &OdometryDelta,
        noise: &MotionNoise,
        rng: &mut R,
    ) {
        if delta.is_identity() && noise.is_suppressed() {
            return;
        }

        let t = delta.transform;
        let noisy = !noise.is_suppressed();
        self.particles = self
            .particles
            .iter()
            .map(|p| {
                let (sin, cos) = p.pose.yaw.sin_cos();
                let mut x = p.pose.x + cos * t.x - sin * t.y;
                let mut y = p.pose.y + sin * t.x + cos * t.y;
                let mut yaw = p.pose.yaw + t.yaw;
                if noisy {
                    let nx: f64 = StandardNormal.sample(rng);
                    let ny: f64 = StandardNormal.sample(rng);
                    let nyaw: f64 = StandardNormal.sample(rng);
                    x += noise.translation_std * nx;
                    y += noise.translation_std * ny;
                    yaw += noise.rotation_std * nyaw;
                }
                Particle::new(Pose2D::new(x, y, yaw), p.weight)
            })
            .collect();
    }

    /// Update step: score every particle against `scan`.
    ///
    /// Weights are left unnormalized. When the scan has no usable return this
    /// returns [`LocalizationError::EmptyScan`] and keeps the previous weights.
    pub fn compute_weights<F: DistanceField + ?Sized>(
        &mut self,
        scan: &LaserScan,
        field: &F,
        sensor: &mut SensorModel,
    ) -> LocalizationResult<()> {
        let poses: Vec<Pose2D> = self.particles.iter().map(|p| p.pose).collect();
        let weights = sensor.weigh(&poses, scan, field)?;
        for (particle, weight) in self.particles.iter_mut().zip(weights) {
            particle.weight = weight;
        }
        Ok(())
    }

    /// Scale weights to sum to one.
    ///
    /// If the total is zero or non-finite, or any weight is negative or
    /// non-finite, all weights are reset to uniform and
    /// [`LocalizationError::DegenerateWeights`] is returned to report it.
    pub fn normalize(&mut self) -> LocalizationResult<()> {
        let total = self.total_weight();
        let degenerate = !(total.is_finite() && total > 0.0)
            || self.particles.iter().any(|p| !p.weight.is_finite() || p.weight < 0.0);

        if degenerate {
            let uniform = 1.0 / self.particles.len() as f64;
            for particle in &mut self.particles {
                particle.weight = uniform;
            }
            return Err(LocalizationError::DegenerateWeights { total });
        }

        for particle in &mut self.particles {
            particle.weight /= total;
        }
        Ok(())
    }

    // Normalized weight accessor that tolerates an unnormalized or degenerate cloud
    fn normalized_weights(&self) -> Vec<f64> {
        let total = self.total_weight();
        if total.is_finite() && total > 0.0 {
            self.particles.iter().map(|p| p.weight / total).collect()
        } else {
            vec![1.0 / self.particles.len() as f64; self.particles.len()]
        }
    }

    /// Weighted mean pose; yaw is the circular mean atan2(Σw·sin, Σw·cos)
    pub fn mean_pose(&self) -> Pose2D {
        let mut sum_x = 0.0;
        let mut sum_y = 0.0;
        let mut sum_sin = 0.0;
        let mut sum_cos = 0.0;

        for (p, w) in self.particles.iter().zip(self.normalized_weights()) {
            sum_x += w * p.pose.x;
            sum_y += w * p.pose.y;
            sum_sin += w * p.pose.yaw.sin();
            sum_cos += w * p.pose.yaw.cos();
        }

        Pose2D::new(sum_x, sum_y, sum_sin.atan2(sum_cos))
    }

    /// Weighted covariance of (x, y, yaw) about the mean pose
    pub fn covariance(&self) -> Matrix3<f64> {
        let mean = self.mean_pose();
        let mut cov = Matrix3::zeros();

        for (p, w) in self.particles.iter().zip(self.normalized_weights()) {
            let d = Vector3::new(
                p.pose.x - mean.x,
                p.pose.y - mean.y,
                normalize_angle(p.pose.yaw - mean.yaw),
            );
            cov += w * d * d.transpose();
        }

        cov
    }

    /// Low-variance resampling into `count` uniformly weighted particles
    pub fn resample<R: Rng + ?Sized>(
        &mut self,
        count: usize,
        rng: &mut R,
    ) -> LocalizationResult<()> {
        if count == 0 {
            return Err(LocalizationError::InvalidParameter(
                "resample count must be > 0".to_string(),
            ));
        }

        let indices = low_variance_indices(&self.weights(), count, rng);
        let weight = 1.0 / count as f64;
        let resampled: Vec<Particle> = indices
            .into_iter()
            .map(|i| Particle::new(self.particles[i].pose, weight))
            .collect();

        self.particles = resampled;
        Ok(())
    }

    /// Effective sample size 1 / Σw², computed on normalized weights
    pub fn effective_sample_size(&self) -> f64 {
        let sum_sq: f64 = self.normalized_weights().iter().map(|w| w * w).sum();
        if sum_sq > 0.0 {
            1.0 / sum_sq
        } else {
            0.0
        }
    }

    pub fn max_weight(&self) -> f64 {
        self.particles
            .iter()
            .map(|p| OrderedFloat(p.weight))
            .max()
            .map_or(0.0, |w| w.0)
    }

    /// Highest-weighted particle
    pub fn best_particle(&self) -> Option<&Particle> {
        self.particles.iter().max_by_key(|p| OrderedFloat(p.weight))
    }
}
