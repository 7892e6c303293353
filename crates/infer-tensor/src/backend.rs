use std::fmt::Debug;
use std::sync::{Arc, OnceLock};

use tracing::info;
#[cfg(target_os = "linux")]
use tracing::warn;

use crate::cpu::simd::VectorBackend;
use crate::cpu::CpuBackend;
use crate::dtype::DType;
use crate::error::{Result, TensorError};
use crate::parallel;
use crate::pool::TensorPool;
use crate::storage::{BlockQ8_0, StorageRef};
use crate::tensor::{Tensor, TensorView};

/// Trait for pluggable numeric backends (scalar reference, vectorized,
/// native library).
///
/// Implementations supply the raw kernels; the provided methods validate
/// tensor operands and dispatch on their dtypes. Every implementation must
/// agree with [`CpuBackend`] within a small relative tolerance.
pub trait ComputeBackend: Send + Sync + Debug {
    /// Returns the name of this backend (e.g., "scalar", "vector-avx2").
    fn name(&self) -> &str;

    /// Dot product of two equal-length f32 slices.
    fn dot_f32(&self, a: &[f32], b: &[f32]) -> f32;

    /// Dot product of `a` with the first `a.len()` elements encoded in `b`.
    ///
    /// `b` must hold at least `a.len().div_ceil(32)` blocks.
    fn dot_q8_0(&self, a: &[f32], b: &[BlockQ8_0]) -> f32;

    /// Convert an f32 tensor to `target`.
    ///
    /// The caller owns the result. A backend that cannot produce `target`
    /// returns an f32 copy instead, so callers probe support by checking the
    /// returned dtype.
    fn quantize(
        &self,
        input: &TensorView<'_>,
        target: DType,
        pool: &Arc<TensorPool>,
    ) -> Result<Tensor>;

    /// Dot product over the first `length` elements of `a` and `b`.
    ///
    /// Supports F32·F32 and mixed F32/Q8_0 operands.
    fn dot_product(&self, a: &TensorView<'_>, b: &TensorView<'_>, length: usize) -> Result<f32> {
        for operand in [a, b] {
            if length > operand.numel() {
                return Err(TensorError::OutOfBounds {
                    start: 0,
                    end: length,
                    len: operand.numel(),
                });
            }
        }
        match (a.storage()?, b.storage()?) {
            (StorageRef::F32(x), StorageRef::F32(y)) => Ok(self.dot_f32(&x[..length], &y[..length])),
            (StorageRef::F32(x), StorageRef::Q8_0(y)) => Ok(self.dot_q8_0(&x[..length], y)),
            (StorageRef::Q8_0(x), StorageRef::F32(y)) => Ok(self.dot_q8_0(&y[..length], x)),
            (x, y) => Err(TensorError::UnsupportedDType(format!(
                "dot product of {} and {}",
                x.dtype(),
                y.dtype()
            ))),
        }
    }

    /// Matrix-vector product: `out[r] = weights[r] · input` for every row.
    ///
    /// `weights` is an f32 `[rows, cols]` tensor; `input` holds at least
    /// `cols` elements in F32 or Q8_0. Rows are spread over the worker pool.
    fn matvec(&self, weights: &TensorView<'_>, input: &TensorView<'_>, out: &mut [f32]) -> Result<()> {
        let shape = weights.shape();
        if shape.ndim() != 2 || shape.dim(0) != out.len() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![out.len(), input.numel()],
                got: shape.dims().to_vec(),
            });
        }
        let cols = shape.dim(1);
        if cols > input.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![cols],
                got: input.shape().dims().to_vec(),
            });
        }

        let w = weights.as_f32()?;
        match input.storage()? {
            StorageRef::F32(x) => {
                let x = &x[..cols];
                parallel::parallel_fill(out, |r| self.dot_f32(&w[r * cols..(r + 1) * cols], x));
            }
            StorageRef::Q8_0(x) => {
                parallel::parallel_fill(out, |r| self.dot_q8_0(&w[r * cols..(r + 1) * cols], x));
            }
        }
        Ok(())
    }
}

static BACKEND: OnceLock<Box<dyn ComputeBackend>> = OnceLock::new();

/// The process-wide backend, selected on first use.
pub fn global() -> &'static dyn ComputeBackend {
    BACKEND.get_or_init(select).as_ref()
}

/// Pick the fastest backend this machine can run.
///
/// 1. On Linux, a native kernel library if one can be loaded.
/// 2. A vectorized backend sized to the widest detected vector unit.
/// 3. The scalar reference backend.
pub fn select() -> Box<dyn ComputeBackend> {
    #[cfg(target_os = "linux")]
    {
        match crate::native::NativeBackend::load() {
            Ok(native) => {
                info!(backend = native.name(), "selected compute backend");
                return Box::new(native);
            }
            Err(e) => warn!(error = %e, "native backend unavailable, falling back"),
        }
    }

    let pick: Box<dyn ComputeBackend> = match VectorBackend::detect() {
        Some(vector) => Box::new(vector),
        None => Box::new(CpuBackend::new()),
    };
    info!(backend = pick.name(), "selected compute backend");
    pick
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Shape;

    fn view(data: &[f32]) -> TensorView<'_> {
        TensorView::from_f32(data, Shape::new(vec![data.len()]).unwrap()).unwrap()
    }

    #[test]
    fn test_global_is_stable() {
        let a = global().name().to_string();
        let b = global().name().to_string();
        assert_eq!(a, b);
    }

    #[test]
    fn test_dot_product_length_checked() {
        let b = CpuBackend::new();
        let x = [1.0, 2.0, 3.0];
        let y = [4.0, 5.0];
        assert_eq!(b.dot_product(&view(&x), &view(&y), 2).unwrap(), 14.0);
        assert!(matches!(
            b.dot_product(&view(&x), &view(&y), 3),
            Err(TensorError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_matvec() {
        let b = CpuBackend::new();
        let w = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let w = TensorView::from_f32(&w, Shape::new(vec![2, 3]).unwrap()).unwrap();
        let x = [1.0, 0.0, -1.0];
        let mut out = [0.0; 2];
        b.matvec(&w, &view(&x), &mut out).unwrap();
        assert_eq!(out, [-2.0, -2.0]);

        let mut wrong = [0.0; 3];
        assert!(b.matvec(&w, &view(&x), &mut wrong).is_err());
    }

    #[test]
    fn test_matvec_quantized_input() {
        let pool = Arc::new(TensorPool::default());
        let b = CpuBackend::new();
        let x: Vec<f32> = (0..32).map(|i| i as f32 / 32.0).collect();
        let q = b.quantize(&view(&x), DType::Q8_0, &pool).unwrap();
        assert_eq!(q.dtype(), DType::Q8_0);

        let w = vec![1.0f32; 64];
        let w = TensorView::from_f32(&w, Shape::new(vec![2, 32]).unwrap()).unwrap();
        let mut out = [0.0; 2];
        b.matvec(&w, &q.view(), &mut out).unwrap();
        let exact: f32 = x.iter().sum();
        assert!((out[0] - exact).abs() < 0.1);
        assert_eq!(out[0], out[1]);
    }
}
