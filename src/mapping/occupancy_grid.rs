//! Static occupancy grid consumed at startup
//!
//! Cells are stored in a `DMatrix` indexed `(ix, iy)`, `ix` along the map's
//! x axis. The grid's `origin` is the map-frame pose of the outer corner of
//! cell (0, 0); a rotated origin is supported.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::common::{LocalizationError, LocalizationResult, Point2D, Pose2D};

/// Occupancy state of a single cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellState {
    Free,
    Occupied,
    Unknown,
}

/// Occupancy grid map
#[derive(Debug, Clone)]
pub struct OccupancyGrid {
    cells: DMatrix<CellState>,
    resolution: f64,
    origin: Pose2D,
}

impl OccupancyGrid {
    /// Create an all-free grid of `width` x `height` cells
    pub fn new(
        width: usize,
        height: usize,
        resolution: f64,
        origin: Pose2D,
    ) -> LocalizationResult<Self> {
        Self::from_cells(DMatrix::from_element(width, height, CellState::Free), resolution, origin)
    }

    /// Wrap an existing cell matrix (rows = x, columns = y)
    pub fn from_cells(
        cells: DMatrix<CellState>,
        resolution: f64,
        origin: Pose2D,
    ) -> LocalizationResult<Self> {
        if cells.nrows() == 0 || cells.ncols() == 0 {
            return Err(LocalizationError::InvalidMap(format!(
                "grid must have non-zero size, got {} x {}",
                cells.nrows(),
                cells.ncols()
            )));
        }
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(LocalizationError::InvalidMap(format!(
                "resolution must be > 0, got {}",
                resolution
            )));
        }
        Ok(Self { cells, resolution, origin })
    }

    /// Build from ROS-style occupancy values in row-major order
    /// (`data[iy * width + ix]`): -1 is unknown, 0..=100 is the occupancy
    /// probability in percent. Values at or above `occupied_threshold` are occupied.
    pub fn from_occupancy_values(
        width: usize,
        height: usize,
        data: &[i8],
        resolution: f64,
        origin: Pose2D,
        occupied_threshold: i8,
    ) -> LocalizationResult<Self> {
        if data.len() != width * height {
            return Err(LocalizationError::InvalidMap(format!(
                "expected {} occupancy values, got {}",
                width * height,
                data.len()
            )));
        }
        let cells = DMatrix::from_fn(width, height, |ix, iy| {
            let value = data[iy * width + ix];
            if value < 0 {
                CellState::Unknown
            } else if value >= occupied_threshold {
                CellState::Occupied
            } else {
                CellState::Free
            }
        });
        Self::from_cells(cells, resolution, origin)
    }

    pub fn width(&self) -> usize {
        self.cells.nrows()
    }

    pub fn height(&self) -> usize {
        self.cells.ncols()
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn origin(&self) -> Pose2D {
        self.origin
    }

    pub fn get(&self, ix: usize, iy: usize) -> Option<CellState> {
        self.cells.get((ix, iy)).copied()
    }

    pub fn set(&mut self, ix: usize, iy: usize, state: CellState) {
        if let Some(cell) = self.cells.get_mut((ix, iy)) {
            *cell = state;
        }
    }

    /// Mark the cell containing a map-frame point as occupied.
    /// Returns false when the point lies outside the grid.
    pub fn set_occupied_at(&mut self, x: f64, y: f64) -> bool {
        match self.get_index(x, y) {
            Some((ix, iy)) => {
                self.cells[(ix, iy)] = CellState::Occupied;
                true
            }
            None => false,
        }
    }

    /// Get grid index from map-frame coordinates
    pub fn get_index(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let local = self.origin.inverse().transform_point(&Point2D::new(x, y));
        let fx = (local.x / self.resolution).floor();
        let fy = (local.y / self.resolution).floor();

        if fx >= 0.0 && fy >= 0.0 && fx < self.width() as f64 && fy < self.height() as f64 {
            Some((fx as usize, fy as usize))
        } else {
            None
        }
    }

    /// Map-frame coordinates of a cell's center
    pub fn get_xy(&self, ix: usize, iy: usize) -> Point2D {
        let local = Point2D::new(
            (ix as f64 + 0.5) * self.resolution,
            (iy as f64 + 0.5) * self.resolution,
        );
        self.origin.transform_point(&local)
    }

    pub fn is_occupied(&self, ix: usize, iy: usize) -> bool {
        self.get(ix, iy) == Some(CellState::Occupied)
    }

    /// Indices of every occupied cell
    pub fn occupied_cells(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let width = self.width();
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, state)| **state == CellState::Occupied)
            .map(move |(i, _)| (i % width, i / width))
    }
}
