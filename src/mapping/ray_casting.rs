// Ray casting against an occupancy grid
//
// Used to synthesize laser scans from a known pose, e.g. for simulation
// and for checking the sensor model against ground truth.

use std::f64::consts::PI;

use crate::common::{LaserScan, LocalizationResult, Pose2D};
use crate::mapping::occupancy_grid::OccupancyGrid;

// March step as a fraction of the grid resolution
const STEP_FRACTION: f64 = 0.25;

/// Range from `pose` along `bearing` (robot frame) to the first occupied
/// cell, or `None` if nothing is hit within `max_range` or the ray leaves the map.
pub fn cast_ray(grid: &OccupancyGrid, pose: &Pose2D, bearing: f64, max_range: f64) -> Option<f64> {
    let step = grid.resolution() * STEP_FRACTION;
    let (sin, cos) = (pose.yaw + bearing).sin_cos();

    let mut range = 0.0;
    while range <= max_range {
        let x = pose.x + range * cos;
        let y = pose.y + range * sin;
        match grid.get_index(x, y) {
            Some((ix, iy)) if grid.is_occupied(ix, iy) => return Some(range),
            Some(_) => {}
            None if range > 0.0 => return None,
            // Rays starting outside the map may still enter it
            None => {}
        }
        range += step;
    }
    None
}

/// Synthesize a full 360 degree scan with `beam_count` evenly spaced beams.
/// Beams that hit nothing report an infinite range.
pub fn simulate_scan(
    grid: &OccupancyGrid,
    pose: &Pose2D,
    beam_count: usize,
    max_range: f64,
) -> LocalizationResult<LaserScan> {
    let increment = 2.0 * PI / beam_count.max(1) as f64;
    let ranges = (0..beam_count)
        .map(|i| cast_ray(grid, pose, i as f64 * increment, max_range).unwrap_or(f64::INFINITY))
        .collect();
    LaserScan::from_angles(0.0, increment, ranges, max_range)
}
