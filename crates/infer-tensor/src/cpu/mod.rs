pub mod quant;
pub mod simd;

use std::sync::Arc;

use crate::backend::ComputeBackend;
use crate::dtype::DType;
use crate::error::Result;
use crate::pool::TensorPool;
use crate::storage::BlockQ8_0;
use crate::tensor::{Tensor, TensorView};

/// Pure-Rust scalar compute backend.
///
/// Straightforward loops optimized for correctness rather than peak
/// performance. It is always available, serves as the last fallback and
/// defines the ground truth the other backends are tested against.
#[derive(Debug, Clone)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        CpuBackend
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "scalar"
    }

    fn dot_f32(&self, a: &[f32], b: &[f32]) -> f32 {
        let mut sum = 0.0f32;
        for (x, y) in a.iter().zip(b) {
            sum += x * y;
        }
        sum
    }

    fn dot_q8_0(&self, a: &[f32], b: &[BlockQ8_0]) -> f32 {
        quant::dot_q8_0_scalar(a, b)
    }

    fn quantize(
        &self,
        input: &TensorView<'_>,
        target: DType,
        pool: &Arc<TensorPool>,
    ) -> Result<Tensor> {
        quant::quantize_tensor(input, target, pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Shape;

    fn backend() -> CpuBackend {
        CpuBackend::new()
    }

    #[test]
    fn test_dot_f32() {
        let b = backend();
        assert_eq!(b.dot_f32(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]), 32.0);
        assert_eq!(b.dot_f32(&[], &[]), 0.0);
    }

    #[test]
    fn test_dot_q8_0_matches_f32() {
        let b = backend();
        let pool = Arc::new(TensorPool::default());
        let x: Vec<f32> = (0..64).map(|i| ((i * 7) % 13) as f32 - 6.0).collect();
        let view = TensorView::from_f32(&x, Shape::new(vec![64]).unwrap()).unwrap();
        let q = b.quantize(&view, DType::Q8_0, &pool).unwrap();

        let ones = vec![1.0f32; 64];
        let exact = b.dot_f32(&ones, &x);
        let approx = b.dot_q8_0(&ones, q.view().as_q8_0().unwrap());
        assert!((exact - approx).abs() < 0.5, "{} vs {}", exact, approx);
    }

    #[test]
    fn test_quantize_supported_and_unsupported() {
        let b = backend();
        let pool = Arc::new(TensorPool::default());
        let probe = pool.acquire(DType::F32, &[32]).unwrap();
        assert_eq!(
            b.quantize(&probe.view(), DType::Q8_0, &pool).unwrap().dtype(),
            DType::Q8_0
        );
        assert_eq!(
            b.quantize(&probe.view(), DType::Q4_0, &pool).unwrap().dtype(),
            DType::F32
        );
    }

    #[test]
    fn test_mixed_dot_product_is_symmetric() {
        let b = backend();
        let pool = Arc::new(TensorPool::default());
        let x: Vec<f32> = (0..32).map(|i| i as f32 * 0.1).collect();
        let y = vec![0.5f32; 32];
        let xv = TensorView::from_f32(&x, Shape::new(vec![32]).unwrap()).unwrap();
        let yv = TensorView::from_f32(&y, Shape::new(vec![32]).unwrap()).unwrap();
        let q = b.quantize(&xv, DType::Q8_0, &pool).unwrap();
        let left = b.dot_product(&q.view(), &yv, 32).unwrap();
        let right = b.dot_product(&yv, &q.view(), 32).unwrap();
        assert_eq!(left, right);
    }
}
