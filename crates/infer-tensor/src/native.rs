//! Backend over a dynamically loaded native kernel library (Linux only).
//!
//! The library exports a single C symbol:
//!
//! ```c
//! float infer_dot_f32(const float *a, const float *b, size_t len);
//! ```
//!
//! Quantized kernels are not part of that ABI, so this backend answers
//! Q8_0 dot products with the scalar reference and cannot quantize.

use std::fmt;
use std::sync::Arc;

use libloading::Library;

use crate::backend::ComputeBackend;
use crate::cpu::quant;
use crate::dtype::DType;
use crate::error::{Result, TensorError};
use crate::pool::TensorPool;
use crate::storage::BlockQ8_0;
use crate::tensor::{Tensor, TensorView};

/// Environment variable naming the native library to load.
pub const NATIVE_LIB_ENV: &str = "INFER_NATIVE_LIB";

/// Library name used when [`NATIVE_LIB_ENV`] is unset.
pub const DEFAULT_NATIVE_LIB: &str = "libinfer_native.so";

const DOT_F32_SYMBOL: &[u8] = b"infer_dot_f32\0";

type DotF32Fn = unsafe extern "C" fn(*const f32, *const f32, usize) -> f32;

pub struct NativeBackend {
    dot: DotF32Fn,
    path: String,
    // Keeps `dot` valid; must outlive every call through it.
    _lib: Library,
}

impl NativeBackend {
    /// Load the library named by `INFER_NATIVE_LIB`, or the default name.
    pub fn load() -> Result<Self> {
        let path = std::env::var(NATIVE_LIB_ENV).unwrap_or_else(|_| DEFAULT_NATIVE_LIB.to_string());
        Self::load_from(&path)
    }

    /// Load a specific library and resolve its kernel symbols.
    pub fn load_from(path: &str) -> Result<Self> {
        // SAFETY: loading runs the library's initializers; the library is
        // trusted to be a kernel library built against the ABI above.
        let lib = unsafe { Library::new(path) }
            .map_err(|e| TensorError::BackendUnavailable(format!("{}: {}", path, e)))?;
        // SAFETY: the symbol is declared with the DotF32Fn signature.
        let dot = unsafe { lib.get::<DotF32Fn>(DOT_F32_SYMBOL) }
            .map(|sym| *sym)
            .map_err(|e| TensorError::BackendUnavailable(format!("{}: {}", path, e)))?;
        Ok(NativeBackend {
            dot,
            path: path.to_string(),
            _lib: lib,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Debug for NativeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeBackend")
            .field("path", &self.path)
            .finish()
    }
}

impl ComputeBackend for NativeBackend {
    fn name(&self) -> &str {
        "native"
    }

    fn dot_f32(&self, a: &[f32], b: &[f32]) -> f32 {
        let n = a.len().min(b.len());
        // SAFETY: both pointers are valid for `n` reads and `_lib` is alive.
        unsafe { (self.dot)(a.as_ptr(), b.as_ptr(), n) }
    }

    fn dot_q8_0(&self, a: &[f32], b: &[BlockQ8_0]) -> f32 {
        quant::dot_q8_0_scalar(a, b)
    }

    fn quantize(
        &self,
        input: &TensorView<'_>,
        _target: DType,
        pool: &Arc<TensorPool>,
    ) -> Result<Tensor> {
        quant::copy_f32(input, pool)
    }
}
