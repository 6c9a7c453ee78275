//! Common traits defining the seams between localization components

/// Batched nearest-obstacle distance lookup
///
/// Implementors answer many map-frame points per call so that the
/// sensor model can score every particle against every beam with a
/// single dispatch.
pub trait DistanceField {
    /// Write into `out[i]` the distance from `(xs[i], ys[i])` to the nearest
    /// obstacle, or `max_distance()` for points outside the field.
    fn query(&self, xs: &[f64], ys: &[f64], out: &mut [f64]);

    /// Upper bound returned for far-away and out-of-bounds points
    fn max_distance(&self) -> f64;

    /// Single point convenience wrapper around [`DistanceField::query`]
    fn distance_at(&self, x: f64, y: f64) -> f64 {
        let mut out = [0.0];
        self.query(&[x], &[y], &mut out);
        out[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Distance to a single obstacle at the origin, clamped
    struct PointObstacle;

    impl DistanceField for PointObstacle {
        fn query(&self, xs: &[f64], ys: &[f64], out: &mut [f64]) {
            for ((x, y), d) in xs.iter().zip(ys).zip(out.iter_mut()) {
                *d = x.hypot(*y).min(self.max_distance());
            }
        }

        fn max_distance(&self) -> f64 {
            5.0
        }
    }

    #[test]
    fn test_distance_at_delegates_to_query() {
        let field = PointObstacle;
        assert_eq!(field.distance_at(3.0, 4.0), 5.0);
        assert_eq!(field.distance_at(30.0, 40.0), 5.0);
        assert_eq!(field.distance_at(0.0, 0.0), 0.0);
    }
}
