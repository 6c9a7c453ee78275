// Mapping module: static occupancy grid and its likelihood field

pub mod occupancy_field;
pub mod occupancy_grid;
pub mod ray_casting;

pub use occupancy_field::{OccupancyField, OccupancyFieldConfig};
pub use occupancy_grid::{CellState, OccupancyGrid};
pub use ray_casting::{cast_ray, simulate_scan};
