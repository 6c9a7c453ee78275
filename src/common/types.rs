//! Common types used throughout lidar_mcl

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::common::error::{LocalizationError, LocalizationResult};

/// Normalize an angle to (-pi, pi]
pub fn normalize_angle(angle: f64) -> f64 {
    if angle > -PI && angle <= PI {
        return angle;
    }
    let a = angle.rem_euclid(2.0 * PI);
    if a > PI {
        a - 2.0 * PI
    } else {
        a
    }
}

/// 2D point representation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn origin() -> Self {
        Self { x: 0.0, y: 0.0 }
    }

    pub fn distance(&self, other: &Point2D) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// 2D pose (position + orientation)
///
/// A pose doubles as a rigid transform from its local frame into the
/// frame it is expressed in, so odometry deltas and the map-to-odom
/// correction are plain `Pose2D` values too.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawPose2D")]
pub struct Pose2D {
    pub x: f64,
    pub y: f64,
    pub yaw: f64,
}

impl Pose2D {
    pub fn new(x: f64, y: f64, yaw: f64) -> Self {
        Self { x, y, yaw: normalize_angle(yaw) }
    }

    pub fn origin() -> Self {
        Self { x: 0.0, y: 0.0, yaw: 0.0 }
    }

    pub fn position(&self) -> Point2D {
        Point2D::new(self.x, self.y)
    }

    /// `self ⊕ other`: apply `other` (expressed in this pose's frame) on top of this pose
    pub fn compose(&self, other: &Pose2D) -> Pose2D {
        let (sin, cos) = self.yaw.sin_cos();
        Pose2D::new(
            self.x + cos * other.x - sin * other.y,
            self.y + sin * other.x + cos * other.y,
            self.yaw + other.yaw,
        )
    }

    /// Inverse transform, so that `p.compose(&p.inverse())` is the identity
    pub fn inverse(&self) -> Pose2D {
        let (sin, cos) = self.yaw.sin_cos();
        Pose2D::new(
            -(cos * self.x + sin * self.y),
            sin * self.x - cos * self.y,
            -self.yaw,
        )
    }

    /// Map a point from this pose's local frame into the parent frame
    pub fn transform_point(&self, local: &Point2D) -> Point2D {
        let (sin, cos) = self.yaw.sin_cos();
        Point2D::new(
            self.x + cos * local.x - sin * local.y,
            self.y + sin * local.x + cos * local.y,
        )
    }

    /// Translation magnitude
    pub fn translation_norm(&self) -> f64 {
        self.x.hypot(self.y)
    }
}

// Deserialized fields go through `Pose2D::new` so yaw is normalized
#[derive(Deserialize)]
struct RawPose2D {
    x: f64,
    y: f64,
    yaw: f64,
}

impl From<RawPose2D> for Pose2D {
    fn from(raw: RawPose2D) -> Self {
        Pose2D::new(raw.x, raw.y, raw.yaw)
    }
}

/// A pose reported by the odometry source, in its drifting frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OdometryReading {
    pub pose: Pose2D,
    /// Timestamp [s]
    pub timestamp: f64,
}

impl OdometryReading {
    pub fn new(pose: Pose2D, timestamp: f64) -> Self {
        Self { pose, timestamp }
    }
}

/// Planar laser scan as (range, bearing) pairs in the robot frame
#[derive(Debug, Clone, PartialEq)]
pub struct LaserScan {
    ranges: Vec<f64>,
    bearings: Vec<f64>,
    max_range: f64,
}

impl LaserScan {
    pub fn new(ranges: Vec<f64>, bearings: Vec<f64>, max_range: f64) -> LocalizationResult<Self> {
        if ranges.len() != bearings.len() {
            return Err(LocalizationError::InvalidParameter(format!(
                "scan has {} ranges but {} bearings",
                ranges.len(),
                bearings.len()
            )));
        }
        if max_range.is_nan() || max_range <= 0.0 {
            return Err(LocalizationError::InvalidParameter(format!(
                "scan max_range must be > 0, got {}",
                max_range
            )));
        }
        Ok(Self { ranges, bearings, max_range })
    }

    /// Build a scan from evenly spaced beams starting at `angle_min`
    pub fn from_angles(
        angle_min: f64,
        angle_increment: f64,
        ranges: Vec<f64>,
        max_range: f64,
    ) -> LocalizationResult<Self> {
        let bearings = (0..ranges.len())
            .map(|i| angle_min + i as f64 * angle_increment)
            .collect();
        Self::new(ranges, bearings, max_range)
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn ranges(&self) -> &[f64] {
        &self.ranges
    }

    pub fn bearings(&self) -> &[f64] {
        &self.bearings
    }

    pub fn max_range(&self) -> f64 {
        self.max_range
    }

    /// A return is usable when its range lies in (0, max_range]
    pub fn is_valid_range(&self, range: f64) -> bool {
        range.is_finite() && range > 0.0 && range <= self.max_range
    }

    /// Valid returns as (range, bearing) pairs
    pub fn valid_returns(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.ranges
            .iter()
            .zip(self.bearings.iter())
            .filter(move |(r, _)| self.is_valid_range(**r))
            .map(|(&r, &b)| (r, b))
    }

    pub fn valid_count(&self) -> usize {
        self.ranges.iter().filter(|r| self.is_valid_range(**r)).count()
    }
}
