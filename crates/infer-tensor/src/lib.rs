//! `infer-tensor` - Tensors, buffer pool and compute backends for the inference runtime.
//!
//! This crate provides:
//! - A `Tensor` owner with borrowed `TensorView`/`TensorViewMut` slices
//! - A `TensorPool` that recycles working buffers between tokens
//! - A `ComputeBackend` trait with scalar, vectorized and native implementations
//! - Math kernels (softmax, normalization, RoPE tables) and a worker pool
//! - Data type definitions (F32, F16, BF16 and Q8_0/Q4_0 block formats)

pub mod backend;
pub mod cpu;
pub mod dtype;
pub mod error;
pub mod math;
#[cfg(target_os = "linux")]
pub mod native;
pub mod parallel;
pub mod pool;
pub mod shape;
pub mod storage;
pub mod tensor;

// Re-export primary types at the crate root for convenience.
pub use backend::ComputeBackend;
pub use cpu::simd::{VectorBackend, VectorIsa};
pub use cpu::CpuBackend;
pub use dtype::DType;
pub use error::{Result, TensorError};
pub use math::FreqsCis;
pub use pool::TensorPool;
pub use shape::Shape;
pub use storage::{BlockQ8_0, CpuStorage, StorageMut, StorageRef};
pub use tensor::{Tensor, TensorView, TensorViewMut};
