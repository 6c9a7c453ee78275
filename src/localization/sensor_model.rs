//! Likelihood-field sensor model
//!
//! Every valid scan return of every particle is projected into the map in
//! one matrix product, the resulting N·M endpoints are looked up in the
//! distance field with a single batched query, and each particle is scored
//! by the Gaussian density of its mean endpoint-to-obstacle distance.
//!
//! Layout of the projection: the scan is an M x 3 homogeneous matrix
//! `[lx, ly, 1]` and the particles form a 3 x 2N matrix whose first N
//! columns are `(cos, -sin, x)` and last N columns `(sin, cos, y)`. Their
//! product is M x 2N and, being column-major, its storage is all endpoint
//! x coordinates (particle-major) followed by all y coordinates.

use std::f64::consts::PI;

use log::trace;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::common::{DistanceField, LaserScan, LocalizationError, LocalizationResult, Pose2D};

/// Configuration for the sensor model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorModelConfig {
    /// Std of the Gaussian applied to the mean endpoint distance [m]
    pub sensor_std: f64,
    /// Mean distance assumed for a particle with no usable return [m]
    pub empty_average: f64,
    /// Use every n-th beam (1 = all beams)
    pub beam_skip: usize,
}

impl Default for SensorModelConfig {
    fn default() -> Self {
        Self {
            sensor_std: 0.1,
            empty_average: 10.0,
            beam_skip: 1,
        }
    }
}

/// Gaussian probability density at `x` for zero mean and std `sigma`
pub fn gauss_likelihood(x: f64, sigma: f64) -> f64 {
    let coeff = 1.0 / (2.0 * PI * sigma.powi(2)).sqrt();
    coeff * (-x.powi(2) / (2.0 * sigma.powi(2))).exp()
}

// Reusable buffers so a steady-state cycle does not reallocate
#[derive(Debug, Clone)]
struct BatchWorkspace {
    scan_points: DMatrix<f64>,
    transforms: DMatrix<f64>,
    endpoints: DMatrix<f64>,
    distances: Vec<f64>,
}

impl BatchWorkspace {
    fn new() -> Self {
        Self {
            scan_points: DMatrix::zeros(0, 3),
            transforms: DMatrix::zeros(3, 0),
            endpoints: DMatrix::zeros(0, 0),
            distances: Vec::new(),
        }
    }
}

/// Batched likelihood-field sensor model
#[derive(Debug, Clone)]
pub struct SensorModel {
    config: SensorModelConfig,
    workspace: BatchWorkspace,
    particle_count: usize,
}

impl SensorModel {
    pub fn new(config: SensorModelConfig) -> Self {
        Self {
            config,
            workspace: BatchWorkspace::new(),
            particle_count: 0,
        }
    }

    pub fn config(&self) -> &SensorModelConfig {
        &self.config
    }

    /// Score of a single mean endpoint distance
    pub fn likelihood(&self, average_distance: f64) -> f64 {
        gauss_likelihood(average_distance, self.config.sensor_std)
    }

    /// Number of returns that survive validity filtering and beam skipping
    pub fn usable_returns(&self, scan: &LaserScan) -> usize {
        let skip = self.config.beam_skip.max(1);
        scan.ranges()
            .iter()
            .enumerate()
            .filter(|(i, r)| i % skip == 0 && scan.is_valid_range(**r))
            .count()
    }

    /// Project every usable return of `scan` through every pose into the map
    /// frame. Returns the number of returns per particle.
    pub fn project(&mut self, poses: &[Pose2D], scan: &LaserScan) -> usize {
        let skip = self.config.beam_skip.max(1);
        let local: Vec<(f64, f64)> = scan
            .ranges()
            .iter()
            .zip(scan.bearings())
            .enumerate()
            .filter(|(i, (r, _))| i % skip == 0 && scan.is_valid_range(**r))
            .map(|(_, (r, b))| {
                let (sin, cos) = b.sin_cos();
                (r * cos, r * sin)
            })
            .collect();

        let m = local.len();
        let n = poses.len();
        let ws = &mut self.workspace;

        ws.scan_points = DMatrix::from_fn(m, 3, |row, col| match col {
            0 => local[row].0,
            1 => local[row].1,
            _ => 1.0,
        });

        if ws.transforms.ncols() != 2 * n {
            ws.transforms = DMatrix::zeros(3, 2 * n);
        }
        for (i, pose) in poses.iter().enumerate() {
            let (sin, cos) = pose.yaw.sin_cos();
            ws.transforms[(0, i)] = cos;
            ws.transforms[(1, i)] = -sin;
            ws.transforms[(2, i)] = pose.x;
            ws.transforms[(0, n + i)] = sin;
            ws.transforms[(1, n + i)] = cos;
            ws.transforms[(2, n + i)] = pose.y;
        }

        if ws.endpoints.shape() != (m, 2 * n) {
            ws.endpoints = DMatrix::zeros(m, 2 * n);
        }
        if m > 0 && n > 0 {
            ws.endpoints.gemm(1.0, &ws.scan_points, &ws.transforms, 0.0);
        }

        self.particle_count = n;
        m
    }

    /// Map-frame endpoints from the last [`SensorModel::project`] call as
    /// `(xs, ys)`; particle `i` owns `xs[i*m..(i+1)*m]`.
    pub fn endpoints(&self) -> (&[f64], &[f64]) {
        let half = self.workspace.endpoints.nrows() * self.particle_count;
        self.workspace.endpoints.as_slice().split_at(half)
    }

    /// Mean endpoint-to-obstacle distance for every pose.
    ///
    /// A pose with no usable return gets `empty_average`, so it is penalized
    /// instead of failing the whole update.
    pub fn average_distances<F: DistanceField + ?Sized>(
        &mut self,
        poses: &[Pose2D],
        scan: &LaserScan,
        field: &F,
    ) -> Vec<f64> {
        let m = self.project(poses, scan);
        if m == 0 {
            return vec![self.config.empty_average; poses.len()];
        }

        let ws = &mut self.workspace;
        let total = m * poses.len();
        ws.distances.resize(total, 0.0);
        let (xs, ys) = ws.endpoints.as_slice().split_at(total);
        field.query(xs, ys, &mut ws.distances);

        ws.distances
            .chunks_exact(m)
            .map(|chunk| chunk.iter().sum::<f64>() / m as f64)
            .collect()
    }

    /// Unnormalized weight for every pose.
    ///
    /// Fails with [`LocalizationError::EmptyScan`] when the scan has no
    /// usable return at all, in which case the caller should keep its weights.
    pub fn weigh<F: DistanceField + ?Sized>(
        &mut self,
        poses: &[Pose2D],
        scan: &LaserScan,
        field: &F,
    ) -> LocalizationResult<Vec<f64>> {
        if self.usable_returns(scan) == 0 {
            return Err(LocalizationError::EmptyScan);
        }
        let averages = self.average_distances(poses, scan, field);
        trace!(
            "Scored {} particles, best mean distance {:.3} m",
            averages.len(),
            averages.iter().cloned().fold(f64::INFINITY, f64::min)
        );
        Ok(averages.iter().map(|&avg| self.likelihood(avg)).collect())
    }
}
