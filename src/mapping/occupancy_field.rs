//! Likelihood field: distance from every map cell to the nearest obstacle
//!
//! The field is computed once with a brushfire (multi-source BFS) pass that
//! starts from every occupied cell simultaneously and carries the nearest
//! obstacle along the wavefront, so each cell stores a Euclidean distance to
//! a concrete obstacle cell. Distances are capped at `max_distance`, which is
//! also what a query returns for points outside the map.

use std::collections::VecDeque;

use itertools::{izip, Itertools};
use log::{info, warn};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::common::{DistanceField, LocalizationError, LocalizationResult, Point2D, Pose2D};
use crate::mapping::occupancy_grid::OccupancyGrid;

const NEIGHBORS: [(isize, isize); 8] = [
    (-1, 0),
    (1, 0),
    (0, -1),
    (0, 1),
    (-1, -1),
    (1, -1),
    (-1, 1),
    (1, 1),
];

/// Configuration for the occupancy field
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OccupancyFieldConfig {
    /// Distance cap and out-of-bounds sentinel [m]
    pub max_distance: f64,
}

impl Default for OccupancyFieldConfig {
    fn default() -> Self {
        Self { max_distance: 3.0 }
    }
}

/// Precomputed nearest-obstacle distance over a static map
#[derive(Debug, Clone)]
pub struct OccupancyField {
    distances: DMatrix<f64>,
    occupied: DMatrix<bool>,
    resolution: f64,
    origin: Pose2D,
    // rotation taking map-frame offsets into the grid frame
    inv_cos: f64,
    inv_sin: f64,
    max_distance: f64,
    obstacle_count: usize,
}

impl OccupancyField {
    /// Build the field from a static occupancy grid
    pub fn build(grid: &OccupancyGrid, config: &OccupancyFieldConfig) -> LocalizationResult<Self> {
        if !(config.max_distance.is_finite() && config.max_distance > 0.0) {
            return Err(LocalizationError::InvalidParameter(format!(
                "max_distance must be > 0, got {}",
                config.max_distance
            )));
        }

        let width = grid.width();
        let height = grid.height();
        let resolution = grid.resolution();
        // Propagation radius in cells
        let max_cells = config.max_distance / resolution;

        let mut dist = DMatrix::from_element(width, height, f64::INFINITY);
        let mut nearest: DMatrix<(usize, usize)> = DMatrix::from_element(width, height, (0, 0));
        let occupied = DMatrix::from_fn(width, height, |ix, iy| grid.is_occupied(ix, iy));
        let mut queue = VecDeque::new();

        for (ix, iy) in grid.occupied_cells() {
            dist[(ix, iy)] = 0.0;
            nearest[(ix, iy)] = (ix, iy);
            queue.push_back((ix, iy));
        }
        let obstacle_count = queue.len();

        while let Some((cx, cy)) = queue.pop_front() {
            let (sx, sy) = nearest[(cx, cy)];
            for &(dx, dy) in NEIGHBORS.iter() {
                let nx = cx as isize + dx;
                let ny = cy as isize + dy;
                if nx < 0 || ny < 0 || nx >= width as isize || ny >= height as isize {
                    continue;
                }
                let (nx, ny) = (nx as usize, ny as usize);
                let candidate = (nx as f64 - sx as f64).hypot(ny as f64 - sy as f64);
                if candidate < dist[(nx, ny)] && candidate <= max_cells {
                    dist[(nx, ny)] = candidate;
                    nearest[(nx, ny)] = (sx, sy);
                    queue.push_back((nx, ny));
                }
            }
        }

        let distances = dist.map(|d| (d * resolution).min(config.max_distance));

        if obstacle_count == 0 {
            warn!("Occupancy grid has no occupied cells; every query returns max_distance");
        }
        info!(
            "Built occupancy field: {} x {} cells at {:.3} m, {} obstacles, max_distance {:.2} m",
            width, height, resolution, obstacle_count, config.max_distance
        );

        let (inv_sin, inv_cos) = (-grid.origin().yaw).sin_cos();
        Ok(Self {
            distances,
            occupied,
            resolution,
            origin: grid.origin(),
            inv_cos,
            inv_sin,
            max_distance: config.max_distance,
            obstacle_count,
        })
    }

    /// (width, height) in cells
    pub fn dimensions(&self) -> (usize, usize) {
        self.distances.shape()
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn obstacle_count(&self) -> usize {
        self.obstacle_count
    }

    #[inline]
    fn cell_of(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let dx = x - self.origin.x;
        let dy = y - self.origin.y;
        let fx = ((self.inv_cos * dx - self.inv_sin * dy) / self.resolution).floor();
        let fy = ((self.inv_sin * dx + self.inv_cos * dy) / self.resolution).floor();
        let (width, height) = self.dimensions();
        // NaN coordinates fail every comparison and fall through to None
        if fx >= 0.0 && fy >= 0.0 && fx < width as f64 && fy < height as f64 {
            Some((fx as usize, fy as usize))
        } else {
            None
        }
    }

    /// Distance to the closest obstacle from a single map-frame point
    pub fn closest_obstacle_distance(&self, x: f64, y: f64) -> f64 {
        self.cell_of(x, y)
            .map_or(self.max_distance, |cell| self.distances[cell])
    }

    pub fn is_occupied(&self, x: f64, y: f64) -> bool {
        self.cell_of(x, y).map_or(false, |cell| self.occupied[cell])
    }

    /// Map-frame extent ((min_x, max_x), (min_y, max_y)) of the occupied cell centers
    pub fn obstacle_bounding_box(&self) -> Option<((f64, f64), (f64, f64))> {
        let (width, _) = self.dimensions();
        let centers: Vec<Point2D> = self
            .occupied
            .iter()
            .enumerate()
            .filter(|(_, occupied)| **occupied)
            .map(|(i, _)| {
                let local = Point2D::new(
                    ((i % width) as f64 + 0.5) * self.resolution,
                    ((i / width) as f64 + 0.5) * self.resolution,
                );
                self.origin.transform_point(&local)
            })
            .collect();

        let x = centers.iter().map(|p| p.x).minmax().into_option()?;
        let y = centers.iter().map(|p| p.y).minmax().into_option()?;
        Some((x, y))
    }
}

impl DistanceField for OccupancyField {
    fn query(&self, xs: &[f64], ys: &[f64], out: &mut [f64]) {
        debug_assert_eq!(xs.len(), ys.len());
        debug_assert_eq!(xs.len(), out.len());

        let (width, height) = self.dimensions();
        let (w, h) = (width as f64, height as f64);
        let scale = 1.0 / self.resolution;
        let (ox, oy) = (self.origin.x, self.origin.y);
        let (cos, sin) = (self.inv_cos, self.inv_sin);
        let table = self.distances.as_slice();

        for (x, y, d) in izip!(xs, ys, out.iter_mut()) {
            let dx = x - ox;
            let dy = y - oy;
            let fx = ((cos * dx - sin * dy) * scale).floor();
            let fy = ((sin * dx + cos * dy) * scale).floor();
            *d = if fx >= 0.0 && fy >= 0.0 && fx < w && fy < h {
                table[fx as usize + fy as usize * width]
            } else {
                self.max_distance
            };
        }
    }

    fn max_distance(&self) -> f64 {
        self.max_distance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn single_obstacle_grid() -> OccupancyGrid {
        let mut grid = OccupancyGrid::new(10, 10, 1.0, Pose2D::origin()).unwrap();
        grid.set_occupied_at(5.0, 5.0);
        grid
    }

    fn single_obstacle_field(max_distance: f64) -> OccupancyField {
        let config = OccupancyFieldConfig { max_distance };
        OccupancyField::build(&single_obstacle_grid(), &config).unwrap()
    }

    #[test]
    fn test_query_at_obstacle_is_zero() {
        let field = single_obstacle_field(20.0);
        assert_eq!(field.closest_obstacle_distance(5.5, 5.5), 0.0);
        assert_eq!(field.distance_at(5.0, 5.9), 0.0);
        assert!(field.is_occupied(5.2, 5.2));
    }

    #[test]
    fn test_distances_are_euclidean_to_the_obstacle() {
        let field = single_obstacle_field(20.0);
        assert_abs_diff_eq!(field.closest_obstacle_distance(8.5, 5.5), 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(field.closest_obstacle_distance(8.5, 9.5), 5.0, epsilon = 1e-12);
        let corner = field.closest_obstacle_distance(0.5, 0.5);
        assert_abs_diff_eq!(corner, 50.0_f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_out_of_bounds_returns_sentinel() {
        let field = single_obstacle_field(2.0);
        assert_eq!(field.closest_obstacle_distance(-100.0, 3.0), 2.0);
        assert_eq!(field.closest_obstacle_distance(f64::NAN, 3.0), 2.0);
        // In-bounds but beyond the cap
        assert_eq!(field.closest_obstacle_distance(0.5, 0.5), 2.0);
        assert_eq!(field.max_distance(), 2.0);
    }

    #[test]
    fn test_batch_query_matches_single_queries() {
        let field = single_obstacle_field(4.0);
        let xs = [5.5, 7.5, 20.0, 1.2, 9.9];
        let ys = [5.5, 5.5, 1.0, 8.3, 0.1];
        let mut out = [0.0; 5];
        field.query(&xs, &ys, &mut out);
        for i in 0..xs.len() {
            assert_eq!(out[i], field.closest_obstacle_distance(xs[i], ys[i]));
        }
        assert_eq!(out[0], 0.0);
        assert_eq!(out[2], 4.0);
    }

    #[test]
    fn test_empty_map_is_all_sentinel() {
        let grid = OccupancyGrid::new(5, 5, 0.5, Pose2D::origin()).unwrap();
        let field = OccupancyField::build(&grid, &OccupancyFieldConfig::default()).unwrap();
        assert_eq!(field.obstacle_count(), 0);
        assert_eq!(field.closest_obstacle_distance(1.0, 1.0), field.max_distance());
        assert!(field.obstacle_bounding_box().is_none());
    }

    #[test]
    fn test_obstacle_bounding_box() {
        let mut grid = OccupancyGrid::new(10, 10, 1.0, Pose2D::origin()).unwrap();
        grid.set_occupied_at(2.0, 3.0);
        grid.set_occupied_at(7.0, 1.0);
        let field = OccupancyField::build(&grid, &OccupancyFieldConfig::default()).unwrap();
        let ((min_x, max_x), (min_y, max_y)) = field.obstacle_bounding_box().unwrap();
        assert_eq!((min_x, max_x), (2.5, 7.5));
        assert_eq!((min_y, max_y), (1.5, 3.5));
    }

    #[test]
    fn test_rejects_non_positive_max_distance() {
        let config = OccupancyFieldConfig { max_distance: 0.0 };
        let result = OccupancyField::build(&single_obstacle_grid(), &config);
        assert!(matches!(result, Err(LocalizationError::InvalidParameter(_))));
    }
}
