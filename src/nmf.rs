//! KL-divergence multiplicative-update non-negative matrix factorization,
//! `V ≈ W·H`, with L1 sparsity on `H` and column-normalized dictionary atoms.
//!
//! Update rules are transcribed directly from `performKLNMF` in the original
//! implementation; only the random initialization is re-homed onto `rand`'s
//! seeded RNGs instead of `numpy.random.seed`.

use ndarray::{Array1, Array2, Axis};
use rand::distributions::Uniform;
use rand::prelude::*;
use rand::rngs::StdRng;

const EPSILON: f32 = 1e-16;

/// Result of a KL-NMF factorization: `V ≈ W·H`, with `W`'s columns unit-norm
/// and `H` rescaled to absorb the removed norm.
#[derive(Debug, Clone)]
pub struct NmfFactorization {
    pub w: Array2<f32>,
    pub h: Array2<f32>,
}

/// Runs `num_iterations` multiplicative-update steps of KL-divergence NMF on
/// the non-negative matrix `v` (shape `(num_frequencies, num_frames)`),
/// factoring it into a `(num_frequencies, dictionary_size)` dictionary `w`
/// and a `(dictionary_size, num_frames)` activation matrix `h`.
///
/// `sparsity_alpha` penalizes dense activations (`H`'s L1 norm) the same way
/// the original's `sparsityAlpha` term does, by inflating `H`'s update
/// denominator.
pub fn kl_nmf(v: &Array2<f32>, dictionary_size: usize, num_iterations: usize, sparsity_alpha: f32, seed: u64) -> NmfFactorization {
    let mut rng = StdRng::seed_from_u64(seed);
    let dist = Uniform::new(0.0f32, 1.0f32);

    let (num_freq, num_time) = (v.shape()[0], v.shape()[1]);
    let mut w = Array2::from_shape_fn((num_freq, dictionary_size), |_| dist.sample(&mut rng) + EPSILON);
    let mut h = Array2::from_shape_fn((dictionary_size, num_time), |_| dist.sample(&mut rng) + EPSILON);

    for _ in 0..num_iterations {
        nmf_step(v, &mut w, &mut h, sparsity_alpha);
    }
    NmfFactorization { w, h }
}

/// Continues NMF updates on an existing `(w, h)` pair — used when adapting a
/// pretrained dictionary against fresh training data.
pub fn kl_nmf_continue(v: &Array2<f32>, w: &mut Array2<f32>, h: &mut Array2<f32>, num_iterations: usize, sparsity_alpha: f32) {
    for _ in 0..num_iterations {
        nmf_step(v, w, h, sparsity_alpha);
    }
}

fn nmf_step(v: &Array2<f32>, w: &mut Array2<f32>, h: &mut Array2<f32>, sparsity_alpha: f32) {
    // H *= dot(W.T, V / dot(W, H)) / (sum(W, axis=0)[:, newaxis] + sparsityAlpha + epsilon)
    let wh = w.dot(&*h);
    let ratio = v / &wh.mapv(|x| x.max(EPSILON));
    let numerator_h = w.t().dot(&ratio);
    let w_col_sums = w.sum_axis(Axis(0)); // (dictionary_size,)
    for k in 0..h.shape()[0] {
        let denom = w_col_sums[k] + sparsity_alpha + EPSILON;
        for t in 0..h.shape()[1] {
            h[[k, t]] *= numerator_h[[k, t]] / denom;
        }
    }

    // W *= dot(V / dot(W, H), H.T) / sum(H, axis=1)
    let wh = w.dot(&*h);
    let ratio = v / &wh.mapv(|x| x.max(EPSILON));
    let numerator_w = ratio.dot(&h.t());
    let h_row_sums = h.sum_axis(Axis(1)); // (dictionary_size,)
    for f in 0..w.shape()[0] {
        for k in 0..w.shape()[1] {
            let denom = h_row_sums[k].max(EPSILON);
            w[[f, k]] *= numerator_w[[f, k]] / denom;
        }
    }

    // Column-normalize W, rescale H to absorb the removed norm.
    let atom_norms: Array1<f32> = w.mapv(|x| x * x).sum_axis(Axis(0)).mapv(|x| x.sqrt().max(EPSILON));
    for k in 0..w.shape()[1] {
        let norm = atom_norms[k];
        for f in 0..w.shape()[0] {
            w[[f, k]] /= norm;
        }
        for t in 0..h.shape()[1] {
            h[[k, t]] *= norm;
        }
    }
}

/// KL divergence `D(V || WH) = sum(V * log(V/WH) - V + WH)`, used by tests to
/// check monotonic decrease across iterations.
pub fn kl_divergence(v: &Array2<f32>, w: &Array2<f32>, h: &Array2<f32>) -> f32 {
    let wh = w.dot(h);
    let mut total = 0.0f32;
    for (&vi, &whi) in v.iter().zip(wh.iter()) {
        let whi = whi.max(EPSILON);
        let vi = vi.max(EPSILON);
        total += vi * (vi / whi).ln() - vi + whi;
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    fn synthetic_v(num_freq: usize, num_time: usize, seed: u64) -> Array2<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        let dist = Uniform::new(0.1f32, 1.0f32);
        Array::from_shape_fn((num_freq, num_time), |_| dist.sample(&mut rng))
    }

    #[test]
    fn factors_are_non_negative() {
        let v = synthetic_v(20, 15, 1);
        let result = kl_nmf(&v, 4, 20, 0.0, 42);
        assert!(result.w.iter().all(|&x| x >= 0.0));
        assert!(result.h.iter().all(|&x| x >= 0.0));
    }

    #[test]
    fn dictionary_columns_are_unit_norm() {
        let v = synthetic_v(30, 10, 2);
        let result = kl_nmf(&v, 6, 30, 0.0, 7);
        for col in result.w.axis_iter(Axis(1)) {
            let norm = col.mapv(|x| x * x).sum().sqrt();
            assert!((norm - 1.0).abs() < 1e-3, "column norm was {}", norm);
        }
    }

    #[test]
    fn kl_divergence_is_monotonically_non_increasing() {
        let v = synthetic_v(16, 12, 3);
        let r = kl_nmf(&v, 4, 0, 0.0, 11);
        let mut w = r.w;
        let mut h = r.h;

        let mut prev = kl_divergence(&v, &w, &h);
        for _ in 0..25 {
            nmf_step(&v, &mut w, &mut h, 0.0);
            let next = kl_divergence(&v, &w, &h);
            assert!(next <= prev + 1e-3, "divergence increased: {} -> {}", prev, next);
            prev = next;
        }
    }

    #[test]
    fn continuing_training_further_reduces_divergence() {
        let v = synthetic_v(20, 20, 5);
        let result = kl_nmf(&v, 8, 5, 0.0, 99);
        let before = kl_divergence(&v, &result.w, &result.h);
        let mut w = result.w;
        let mut h = result.h;
        kl_nmf_continue(&v, &mut w, &mut h, 20, 0.0);
        let after = kl_divergence(&v, &w, &h);
        assert!(after <= before);
    }
}
