//! Low-variance (systematic) resampling
//!
//! One uniform offset `r` in [0, 1/count) and `count` evenly spaced
//! pointers `r + k/count` walked across the cumulative weight distribution.
//! Compared with independent multinomial draws this has lower variance and
//! is fully determined by the rng state and the weight vector.

use rand::Rng;
use rand_distr::{Distribution, Uniform};

/// Cumulative distribution of `weights`, normalized so the last entry is 1.
/// Falls back to a uniform distribution when the weights do not sum to a
/// positive finite value.
pub fn cumulative_weights(weights: &[f64]) -> Vec<f64> {
    let n = weights.len();
    let total: f64 = weights.iter().sum();
    if !(total.is_finite() && total > 0.0) || weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return (1..=n).map(|i| i as f64 / n as f64).collect();
    }

    let mut cumulative = Vec::with_capacity(n);
    let mut cum_sum = 0.0;
    for w in weights {
        cum_sum += w / total;
        cumulative.push(cum_sum);
    }
    if let Some(last) = cumulative.last_mut() {
        *last = 1.0;
    }
    cumulative
}

/// Indices of the particles selected by systematic resampling.
///
/// Always returns exactly `count` indices into `weights`, or an empty
/// vector when either `count` is zero or `weights` is empty.
pub fn low_variance_indices<R: Rng + ?Sized>(
    weights: &[f64],
    count: usize,
    rng: &mut R,
) -> Vec<usize> {
    let n = weights.len();
    if n == 0 || count == 0 {
        return Vec::new();
    }

    let cumulative = cumulative_weights(weights);
    let step = 1.0 / count as f64;
    let r = Uniform::new(0.0, step).sample(rng);

    let mut indices = Vec::with_capacity(count);
    let mut j = 0;
    for k in 0..count {
        let u = r + k as f64 * step;
        while j < n - 1 && u >= cumulative[j] {
            j += 1;
        }
        indices.push(j);
    }
    indices
}
