//! Reference Q8_0 conversion shared by the CPU backends.

use std::sync::Arc;

use crate::dtype::DType;
use crate::error::Result;
use crate::pool::TensorPool;
use crate::storage::{BlockQ8_0, QK8_0};
use crate::tensor::{Tensor, TensorView};

/// Quantize `src` into Q8_0 blocks.
///
/// Each block stores `scale = max|x| / 127` and `round(x / scale)`; the
/// trailing partial block is zero-padded.
pub fn quantize_q8_0_into(src: &[f32], dst: &mut [BlockQ8_0]) {
    for (block, chunk) in dst.iter_mut().zip(src.chunks(QK8_0)) {
        let amax = chunk.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        let scale = amax / 127.0;
        let inv = if scale > 0.0 { 1.0 / scale } else { 0.0 };
        block.scale = scale;
        block.quants = [0; QK8_0];
        for (q, &x) in block.quants.iter_mut().zip(chunk) {
            *q = (x * inv).round().clamp(-127.0, 127.0) as i8;
        }
    }
}

/// Scalar dot product of `a` against Q8_0-encoded `b`.
pub fn dot_q8_0_scalar(a: &[f32], b: &[BlockQ8_0]) -> f32 {
    let mut sum = 0.0f32;
    for (chunk, block) in a.chunks(QK8_0).zip(b) {
        let mut block_sum = 0.0f32;
        for (x, &q) in chunk.iter().zip(block.quants.iter()) {
            block_sum += x * q as f32;
        }
        sum += block_sum * block.scale;
    }
    sum
}

/// Pool-backed conversion used by backends that support Q8_0.
///
/// Any other target yields an f32 copy.
pub fn quantize_tensor(
    input: &TensorView<'_>,
    target: DType,
    pool: &Arc<TensorPool>,
) -> Result<Tensor> {
    let src = input.as_f32()?;
    match target {
        DType::Q8_0 => {
            let mut out = pool.acquire(DType::Q8_0, input.shape().dims())?;
            quantize_q8_0_into(src, out.view_mut().as_q8_0_mut()?);
            Ok(out)
        }
        _ => copy_f32(input, pool),
    }
}

/// Pool-backed f32 copy of `input`.
pub fn copy_f32(input: &TensorView<'_>, pool: &Arc<TensorPool>) -> Result<Tensor> {
    let src = input.as_f32()?;
    let mut out = pool.acquire(DType::F32, input.shape().dims())?;
    out.copy_from(src)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Shape;

    fn dequantize(blocks: &[BlockQ8_0], n: usize) -> Vec<f32> {
        blocks
            .iter()
            .flat_map(|b| b.quants.iter().map(move |&q| q as f32 * b.scale))
            .take(n)
            .collect()
    }

    #[test]
    fn test_quantize_roundtrip_error_bounded() {
        let src: Vec<f32> = (0..40).map(|i| (i as f32 - 20.0) * 0.37).collect();
        let mut blocks = vec![BlockQ8_0::ZERO; 2];
        quantize_q8_0_into(&src, &mut blocks);
        let back = dequantize(&blocks, src.len());
        for (a, b) in src.iter().zip(&back) {
            assert!((a - b).abs() <= blocks[0].scale.max(blocks[1].scale));
        }
        // Padding past the end of the input stays zero.
        assert!(blocks[1].quants[8..].iter().all(|&q| q == 0));
    }

    #[test]
    fn test_all_zero_block() {
        let mut blocks = vec![BlockQ8_0::ZERO; 1];
        quantize_q8_0_into(&[0.0; 32], &mut blocks);
        assert_eq!(blocks[0].scale, 0.0);
        assert_eq!(dot_q8_0_scalar(&[1.0; 32], &blocks), 0.0);
    }

    #[test]
    fn test_unsupported_target_copies() {
        let pool = Arc::new(TensorPool::default());
        let data = [1.0, 2.0];
        let view = TensorView::from_f32(&data, Shape::new(vec![2]).unwrap()).unwrap();
        let out = quantize_tensor(&view, DType::Q4_0, &pool).unwrap();
        assert_eq!(out.dtype(), DType::F32);
        assert_eq!(out.data_f32().unwrap(), &[1.0, 2.0]);
    }
}
