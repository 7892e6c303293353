use rayon::prelude::*;

use infer_tensor::{math, parallel, ComputeBackend};

use crate::config::Config;
use crate::error::{ModelError, Result};

/// Head geometry of a layer's attention and where its keys and values sit
/// in the cache rows.
#[derive(Debug, Clone, Copy)]
pub struct AttentionLayout {
    pub head_count: usize,
    pub kv_head_count: usize,
    pub head_dim: usize,
    /// Floats per cached position.
    pub row_len: usize,
    /// Offset of the values within a row.
    pub value_offset: usize,
}

impl AttentionLayout {
    pub fn from_config(config: &Config) -> Self {
        AttentionLayout {
            head_count: config.head_count,
            kv_head_count: config.kv_head_count,
            head_dim: config.head_dim(),
            row_len: 2 * config.embedding_length,
            value_offset: config.embedding_length,
        }
    }
}

/// Causal multi-head attention for the query at `position`.
///
/// `kv` holds one cache row per position; rows `0..=position` are attended.
/// Query heads are grouped over the key/value heads, so head `h` reads
/// key/value head `h / (head_count / kv_head_count)`. Scores are scaled by
/// `1 / sqrt(head_dim)`. Heads run on the worker pool.
pub fn causal_attention(
    q: &[f32],
    kv: &[f32],
    position: usize,
    layout: &AttentionLayout,
    backend: &dyn ComputeBackend,
    out: &mut [f32],
) -> Result<()> {
    let AttentionLayout {
        head_count,
        kv_head_count,
        head_dim,
        row_len,
        value_offset,
    } = *layout;
    let q_dim = head_count * head_dim;
    let seq_len = position + 1;
    if q.len() < q_dim || out.len() < q_dim {
        return Err(ModelError::PreconditionViolation(format!(
            "attention over {} heads of {} needs {} query floats, got {}",
            head_count,
            head_dim,
            q_dim,
            q.len().min(out.len())
        )));
    }
    if kv.len() < seq_len * row_len {
        return Err(ModelError::PreconditionViolation(format!(
            "cache holds {} rows, position {} needs {}",
            kv.len() / row_len.max(1),
            position,
            seq_len
        )));
    }
    let heads_per_kv = head_count / kv_head_count;
    let scale = 1.0 / (head_dim as f32).sqrt();

    parallel::install(|| {
        out[..q_dim]
            .par_chunks_mut(head_dim)
            .enumerate()
            .for_each(|(h, out_head)| {
                let kv_offset = (h / heads_per_kv) * head_dim;
                let q_head = &q[h * head_dim..(h + 1) * head_dim];

                let mut scores: Vec<f32> = (0..seq_len)
                    .map(|s| {
                        let k = s * row_len + kv_offset;
                        backend.dot_f32(q_head, &kv[k..k + head_dim]) * scale
                    })
                    .collect();
                math::softmax(&mut scores);

                out_head.fill(0.0);
                for (s, &p) in scores.iter().enumerate() {
                    let v = s * row_len + value_offset + kv_offset;
                    for (o, &x) in out_head.iter_mut().zip(&kv[v..v + head_dim]) {
                        *o += p * x;
                    }
                }
            })
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use infer_tensor::CpuBackend;

    fn layout(heads: usize, kv_heads: usize, head_dim: usize) -> AttentionLayout {
        let embd = heads * head_dim;
        AttentionLayout {
            head_count: heads,
            kv_head_count: kv_heads,
            head_dim,
            row_len: 2 * embd,
            value_offset: embd,
        }
    }

    #[test]
    fn test_single_position_returns_its_value() {
        let l = layout(2, 2, 2);
        // keys [1 2 | 3 4], values [5 6 | 7 8]
        let kv = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let q = [0.3, -1.0, 2.0, 0.5];
        let mut out = [0.0; 4];
        causal_attention(&q, &kv, 0, &l, &CpuBackend::new(), &mut out).unwrap();
        assert_eq!(out, [5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_weights_follow_scaled_scores() {
        let l = layout(1, 1, 2);
        // Two positions with keys that score 0 and 2 against q.
        let kv = [
            0.0, 0.0, 1.0, 0.0, //
            1.0, 1.0, 0.0, 1.0,
        ];
        let q = [2.0_f32.sqrt(), 2.0_f32.sqrt()];
        let mut out = [0.0; 2];
        causal_attention(&q, &kv, 1, &l, &CpuBackend::new(), &mut out).unwrap();

        let s1 = (2.0 * 2.0_f32.sqrt()) / 2.0_f32.sqrt();
        let p1 = s1.exp() / (1.0 + s1.exp());
        assert_abs_diff_eq!(out[0], 1.0 - p1, epsilon = 1e-6);
        assert_abs_diff_eq!(out[1], p1, epsilon = 1e-6);
    }

    #[test]
    fn test_grouped_heads_share_key_values() {
        let l = layout(4, 2, 1);
        // embd 4, kv_dim 2: keys [k0 k1 _ _], values [v0 v1 _ _]
        let kv = [1.0, 1.0, 0.0, 0.0, 10.0, 20.0, 0.0, 0.0];
        let q = [1.0, -1.0, 3.0, 0.0];
        let mut out = [0.0; 4];
        causal_attention(&q, &kv, 0, &l, &CpuBackend::new(), &mut out).unwrap();
        assert_eq!(out, [10.0, 10.0, 20.0, 20.0]);
    }

    #[test]
    fn test_short_cache_is_rejected() {
        let l = layout(1, 1, 2);
        let kv = [0.0; 4];
        let mut out = [0.0; 2];
        assert!(causal_attention(&[1.0, 1.0], &kv, 1, &l, &CpuBackend::new(), &mut out).is_err());
    }
}
