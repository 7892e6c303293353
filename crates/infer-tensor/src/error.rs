use thiserror::Error;

use crate::dtype::DType;

#[derive(Error, Debug)]
pub enum TensorError {
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },
    #[error("dtype mismatch: expected {expected}, got {got}")]
    DTypeMismatch { expected: DType, got: DType },
    #[error("shape must have at least one dimension")]
    EmptyShape,
    #[error("shape {0:?} has more elements than fit in usize")]
    ElementCountOverflow(Vec<usize>),
    #[error("index {index} out of bounds for leading dimension of size {size}")]
    IndexOutOfBounds { index: usize, size: usize },
    #[error("range {start}..{end} out of bounds for region of {len} elements")]
    OutOfBounds { start: usize, end: usize, len: usize },
    #[error("unsupported dtype: {0}")]
    UnsupportedDType(String),
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TensorError>;
