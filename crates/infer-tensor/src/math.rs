//! Numeric kernels shared by the transformer blocks and the sampler.
//!
//! Everything here works in place on f32 slices; callers borrow them from
//! tensors via `as_f32_mut`.

use crate::error::{Result, TensorError};

/// Numerically stable softmax, in place.
pub fn softmax(x: &mut [f32]) {
    let max = x.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f32;
    for v in x.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    for v in x.iter_mut() {
        *v /= sum;
    }
}

/// Divide every element by the sum of absolute values.
///
/// An all-zero input divides by zero and yields NaN.
pub fn l1normalize(x: &mut [f32]) {
    let sum: f32 = x.iter().map(|v| v.abs()).sum();
    for v in x.iter_mut() {
        *v /= sum;
    }
}

/// Divide every element by the Euclidean norm.
///
/// An all-zero input divides by zero and yields NaN.
pub fn l2normalize(x: &mut [f32]) {
    let norm = x.iter().map(|v| v * v).sum::<f32>().sqrt();
    for v in x.iter_mut() {
        *v /= norm;
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(TensorError::ShapeMismatch {
            expected: vec![a.len()],
            got: vec![b.len()],
        });
    }
    let mut dot = 0.0f32;
    let mut aa = 0.0f32;
    let mut bb = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        aa += x * x;
        bb += y * y;
    }
    Ok(dot / (aa.sqrt() * bb.sqrt()))
}

/// Rotary position embedding table: one `[cos, sin]` pair per
/// (position, frequency) with `dim / 2` frequencies per position.
#[derive(Debug, Clone)]
pub struct FreqsCis {
    half_dim: usize,
    rows: Vec<[f32; 2]>,
}

impl FreqsCis {
    /// Number of positions covered.
    pub fn positions(&self) -> usize {
        if self.half_dim == 0 {
            0
        } else {
            self.rows.len() / self.half_dim
        }
    }

    /// Frequencies per position (`dim / 2`).
    pub fn half_dim(&self) -> usize {
        self.half_dim
    }

    /// `[cos, sin]` of `position * freq[i]`.
    pub fn get(&self, position: usize, i: usize) -> Option<[f32; 2]> {
        if i >= self.half_dim {
            return None;
        }
        self.rows.get(position * self.half_dim + i).copied()
    }

    /// All pairs for one position.
    pub fn row(&self, position: usize) -> Option<&[[f32; 2]]> {
        let start = position.checked_mul(self.half_dim)?;
        self.rows.get(start..start + self.half_dim)
    }
}

/// Build the RoPE table for `end` positions.
///
/// `freq[i] = 1 / theta^(2i / dim)`; entry `(p, i)` is the unit complex number
/// at angle `p * freq[i]`. Exponents are evaluated in f64.
pub fn precompute_freqs_cis(dim: usize, end: usize, theta: f64) -> FreqsCis {
    let half_dim = dim / 2;
    let freqs: Vec<f64> = (0..half_dim)
        .map(|i| 1.0 / theta.powf((2 * i) as f64 / dim as f64))
        .collect();

    let mut rows = Vec::with_capacity(end * half_dim);
    for p in 0..end {
        for &freq in &freqs {
            let angle = p as f64 * freq;
            rows.push([angle.cos() as f32, angle.sin() as f32]);
        }
    }
    FreqsCis { half_dim, rows }
}

/// Rotate the interleaved pairs `(x[2i], x[2i+1])` of every head by the
/// table entry for `position`.
pub fn apply_rope(
    x: &mut [f32],
    table: &FreqsCis,
    position: usize,
    heads: usize,
    head_dim: usize,
) -> Result<()> {
    if x.len() < heads * head_dim {
        return Err(TensorError::ShapeMismatch {
            expected: vec![heads, head_dim],
            got: vec![x.len()],
        });
    }
    let pairs = head_dim / 2;
    if pairs > table.half_dim() {
        return Err(TensorError::Other(format!(
            "rope table has {} frequencies, head needs {}",
            table.half_dim(),
            pairs
        )));
    }
    let row = table.row(position).ok_or(TensorError::IndexOutOfBounds {
        index: position,
        size: table.positions(),
    })?;

    for head in x[..heads * head_dim].chunks_exact_mut(head_dim) {
        for (pair, &[cos, sin]) in head.chunks_exact_mut(2).zip(row) {
            let (x0, x1) = (pair[0], pair[1]);
            pair[0] = x0 * cos - x1 * sin;
            pair[1] = x0 * sin + x1 * cos;
        }
    }
    Ok(())
}

/// Root-mean-square normalization scaled by `weight`.
pub fn rms_norm(x: &[f32], weight: &[f32], eps: f32, out: &mut [f32]) -> Result<()> {
    check_norm_operands(x, weight, out)?;
    let mean_sq = x.iter().map(|v| v * v).sum::<f32>() / x.len() as f32;
    let inv = 1.0 / (mean_sq + eps).sqrt();
    for ((o, &v), &w) in out.iter_mut().zip(x).zip(weight) {
        *o = v * inv * w;
    }
    Ok(())
}

/// Mean/variance normalization with affine `weight` and `bias`.
pub fn layer_norm(
    x: &[f32],
    weight: &[f32],
    bias: &[f32],
    eps: f32,
    out: &mut [f32],
) -> Result<()> {
    check_norm_operands(x, weight, out)?;
    if bias.len() != x.len() {
        return Err(TensorError::ShapeMismatch {
            expected: vec![x.len()],
            got: vec![bias.len()],
        });
    }
    let n = x.len() as f32;
    let mean = x.iter().sum::<f32>() / n;
    let var = x.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
    let inv = 1.0 / (var + eps).sqrt();
    for (((o, &v), &w), &b) in out.iter_mut().zip(x).zip(weight).zip(bias) {
        *o = (v - mean) * inv * w + b;
    }
    Ok(())
}

fn check_norm_operands(x: &[f32], weight: &[f32], out: &[f32]) -> Result<()> {
    if x.is_empty() {
        return Err(TensorError::EmptyShape);
    }
    for len in [weight.len(), out.len()] {
        if len != x.len() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![x.len()],
                got: vec![len],
            });
        }
    }
    Ok(())
}

/// `x * sigmoid(x)`.
#[inline]
pub fn silu(x: f32) -> f32 {
    x / (1.0 + (-x).exp())
}

/// GELU, tanh approximation.
#[inline]
pub fn gelu(x: f32) -> f32 {
    const SQRT_2_OVER_PI: f32 = 0.797_884_6;
    0.5 * x * (1.0 + (SQRT_2_OVER_PI * (x + 0.044_715 * x * x * x)).tanh())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    #[test]
    fn test_softmax_large_range() {
        let mut x = [1000.0f32, 0.0, -1000.0];
        softmax(&mut x);
        assert_abs_diff_eq!(x[0], 1.0, epsilon = 1e-6);
        assert_eq!(x[2], 0.0);
        assert!(x.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_l1normalize() {
        let mut x = [1.0f32, -3.0];
        l1normalize(&mut x);
        assert_eq!(x, [0.25, -0.75]);
    }

    #[test]
    fn test_normalize_zero_is_not_finite() {
        let mut x = [0.0f32; 3];
        l2normalize(&mut x);
        assert!(x.iter().all(|v| !v.is_finite()));
        let mut y = [0.0f32; 3];
        l1normalize(&mut y);
        assert!(y.iter().all(|v| !v.is_finite()));
    }

    #[test]
    fn test_cosine_similarity() {
        assert_abs_diff_eq!(
            cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap(),
            0.0,
            epsilon = 1e-6
        );
        assert_abs_diff_eq!(
            cosine_similarity(&[1.0, 2.0], &[2.0, 4.0]).unwrap(),
            1.0,
            epsilon = 1e-6
        );
        assert!(cosine_similarity(&[1.0], &[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_freqs_cis_closed_form() {
        let table = precompute_freqs_cis(4, 2, 10000.0);
        assert_eq!(table.positions(), 2);
        assert_eq!(table.half_dim(), 2);

        // Position 0: angle 0 for every frequency.
        assert_eq!(table.get(0, 0), Some([1.0, 0.0]));
        assert_eq!(table.get(0, 1), Some([1.0, 0.0]));

        // Position 1: freq[0] = 1, freq[1] = 10000^(-1/2) = 0.01.
        let [c, s] = table.get(1, 0).unwrap();
        assert_abs_diff_eq!(c, 1.0f32.cos(), epsilon = 1e-6);
        assert_abs_diff_eq!(s, 1.0f32.sin(), epsilon = 1e-6);
        let [c, s] = table.get(1, 1).unwrap();
        assert_abs_diff_eq!(c, 0.01f32.cos(), epsilon = 1e-6);
        assert_abs_diff_eq!(s, 0.01f32.sin(), epsilon = 1e-6);

        assert_eq!(table.get(2, 0), None);
        assert_eq!(table.get(0, 2), None);
    }

    #[test]
    fn test_apply_rope_rotates_pairs() {
        let table = precompute_freqs_cis(2, 2, 10000.0);
        let mut x = [1.0f32, 0.0, 0.0, 1.0];
        apply_rope(&mut x, &table, 1, 2, 2).unwrap();
        assert_abs_diff_eq!(x[0], 1.0f32.cos(), epsilon = 1e-6);
        assert_abs_diff_eq!(x[1], 1.0f32.sin(), epsilon = 1e-6);
        assert_abs_diff_eq!(x[2], -1.0f32.sin(), epsilon = 1e-6);
        assert_abs_diff_eq!(x[3], 1.0f32.cos(), epsilon = 1e-6);

        // Position 0 is the identity.
        let mut y = [0.3f32, -0.7];
        apply_rope(&mut y, &table, 0, 1, 2).unwrap();
        assert_eq!(y, [0.3, -0.7]);

        assert!(apply_rope(&mut y, &table, 2, 1, 2).is_err());
    }

    #[test]
    fn test_rms_norm() {
        let x = [3.0f32, 4.0];
        let w = [1.0f32, 2.0];
        let mut out = [0.0f32; 2];
        rms_norm(&x, &w, 0.0, &mut out).unwrap();
        // rms = sqrt((9 + 16) / 2)
        let rms = 12.5f32.sqrt();
        assert_abs_diff_eq!(out[0], 3.0 / rms, epsilon = 1e-6);
        assert_abs_diff_eq!(out[1], 8.0 / rms, epsilon = 1e-6);

        let mut short = [0.0f32; 1];
        assert!(rms_norm(&x, &w, 0.0, &mut short).is_err());
    }

    #[test]
    fn test_layer_norm() {
        let x = [1.0f32, 3.0];
        let mut out = [0.0f32; 2];
        layer_norm(&x, &[1.0, 1.0], &[0.5, 0.5], 0.0, &mut out).unwrap();
        assert_abs_diff_eq!(out[0], -0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(out[1], 1.5, epsilon = 1e-6);
    }

    #[test]
    fn test_activations() {
        assert_eq!(silu(0.0), 0.0);
        assert_abs_diff_eq!(silu(1.0), 0.731_058_6, epsilon = 1e-5);
        assert_eq!(gelu(0.0), 0.0);
        assert_abs_diff_eq!(gelu(1.0), 0.841_192, epsilon = 1e-4);
        assert_abs_diff_eq!(gelu(-10.0), 0.0, epsilon = 1e-5);
    }

    proptest! {
        #[test]
        fn prop_softmax_is_a_distribution(x in prop::collection::vec(-50.0f32..50.0, 1..64)) {
            let mut y = x.clone();
            softmax(&mut y);
            let sum: f32 = y.iter().sum();
            prop_assert!((sum - 1.0).abs() < 1e-5);
            prop_assert!(y.iter().all(|&v| (0.0..=1.0).contains(&v)));
        }

        #[test]
        fn prop_softmax_shift_invariant(
            x in prop::collection::vec(-20.0f32..20.0, 1..32),
            shift in -20.0f32..20.0,
        ) {
            let mut a = x.clone();
            let mut b: Vec<f32> = x.iter().map(|v| v + shift).collect();
            softmax(&mut a);
            softmax(&mut b);
            for (p, q) in a.iter().zip(&b) {
                prop_assert!((p - q).abs() < 1e-5);
            }
        }

        #[test]
        fn prop_l2normalize_unit_norm(x in prop::collection::vec(-100.0f32..100.0, 1..64)) {
            prop_assume!(x.iter().any(|v| v.abs() > 1e-3));
            let mut y = x.clone();
            l2normalize(&mut y);
            let norm = y.iter().map(|v| v * v).sum::<f32>().sqrt();
            prop_assert!((norm - 1.0).abs() < 1e-5);
        }
    }
}
