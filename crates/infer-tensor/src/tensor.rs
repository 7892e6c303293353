use std::fmt;
use std::sync::Arc;

use crate::dtype::DType;
use crate::error::{Result, TensorError};
use crate::pool::TensorPool;
use crate::shape::Shape;
use crate::storage::{BlockQ8_0, CpuStorage, StorageMut, StorageRef};

/// A tensor that exclusively owns its storage.
///
/// Owners handed out by a [`TensorPool`] give their storage back to the pool
/// when dropped (or explicitly [`release`](Tensor::release)d). Slices along
/// the leading dimension are borrowed [`TensorView`]s / [`TensorViewMut`]s:
/// they alias the owner's storage and can never release it.
pub struct Tensor {
    storage: CpuStorage,
    shape: Shape,
    pool: Option<Arc<TensorPool>>,
}

impl Tensor {
    /// Create a new, unpooled tensor from f32 data and a shape.
    ///
    /// # Errors
    /// Returns `ShapeMismatch` if `data.len() != shape.numel()`.
    pub fn new(data: Vec<f32>, shape: Shape) -> Result<Self> {
        if data.len() != shape.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: shape.dims().to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(Tensor {
            storage: CpuStorage::from_f32_vec(data),
            shape,
            pool: None,
        })
    }

    /// Create a zero-filled, unpooled f32 tensor with the given shape.
    pub fn zeros(shape: Shape) -> Self {
        let n = shape.numel();
        Tensor {
            storage: CpuStorage::from_f32_vec(vec![0.0; n]),
            shape,
            pool: None,
        }
    }

    /// Wrap storage handed out by `pool`.
    pub(crate) fn pooled(storage: CpuStorage, shape: Shape, pool: Arc<TensorPool>) -> Self {
        Tensor {
            storage,
            shape,
            pool: Some(pool),
        }
    }

    /// Returns a reference to the tensor's shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns the tensor's data type.
    pub fn dtype(&self) -> DType {
        self.storage.dtype()
    }

    /// Number of logical elements.
    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    /// True if dropping this tensor returns its storage to a pool.
    pub fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }

    /// Returns the underlying storage reference.
    pub fn storage(&self) -> &CpuStorage {
        &self.storage
    }

    /// Returns the data as an f32 slice.
    ///
    /// # Errors
    /// Returns `DTypeMismatch` if the tensor is not F32.
    pub fn data_f32(&self) -> Result<&[f32]> {
        match &self.storage {
            CpuStorage::F32(v) => Ok(&v[..self.shape.numel()]),
            other => Err(TensorError::DTypeMismatch {
                expected: DType::F32,
                got: other.dtype(),
            }),
        }
    }

    /// Returns the data as a mutable f32 slice.
    pub fn data_f32_mut(&mut self) -> Result<&mut [f32]> {
        let n = self.shape.numel();
        match &mut self.storage {
            CpuStorage::F32(v) => Ok(&mut v[..n]),
            other => Err(TensorError::DTypeMismatch {
                expected: DType::F32,
                got: other.dtype(),
            }),
        }
    }

    /// Read element `i` of an f32 tensor.
    pub fn get(&self, i: usize) -> Result<f32> {
        let data = self.data_f32()?;
        data.get(i).copied().ok_or(TensorError::OutOfBounds {
            start: i,
            end: i + 1,
            len: data.len(),
        })
    }

    /// Write element `i` of an f32 tensor.
    pub fn set(&mut self, i: usize, value: f32) -> Result<()> {
        let data = self.data_f32_mut()?;
        let len = data.len();
        match data.get_mut(i) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(TensorError::OutOfBounds {
                start: i,
                end: i + 1,
                len,
            }),
        }
    }

    /// Overwrite the leading elements with `src`.
    pub fn copy_from(&mut self, src: &[f32]) -> Result<()> {
        let data = self.data_f32_mut()?;
        if src.len() > data.len() {
            return Err(TensorError::OutOfBounds {
                start: 0,
                end: src.len(),
                len: data.len(),
            });
        }
        data[..src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Borrow the whole tensor.
    pub fn view(&self) -> TensorView<'_> {
        TensorView {
            region: self.storage.region(),
            offset: 0,
            shape: self.shape.clone(),
        }
    }

    /// Mutably borrow the whole tensor.
    pub fn view_mut(&mut self) -> TensorViewMut<'_> {
        TensorViewMut {
            region: self.storage.region_mut(),
            offset: 0,
            shape: self.shape.clone(),
        }
    }

    /// Borrow index `i` of the leading dimension.
    pub fn slice(&self, i: usize) -> Result<TensorView<'_>> {
        let (offset, shape) = slice_bounds(&self.shape, 0, i)?;
        self.storage.region().window(offset, shape.numel())?;
        Ok(TensorView {
            region: self.storage.region(),
            offset,
            shape,
        })
    }

    /// Mutably borrow index `i` of the leading dimension.
    ///
    /// Writes through the returned view are visible in this tensor.
    pub fn slice_mut(&mut self, i: usize) -> Result<TensorViewMut<'_>> {
        let (offset, shape) = slice_bounds(&self.shape, 0, i)?;
        self.storage.region().window(offset, shape.numel())?;
        Ok(TensorViewMut {
            region: self.storage.region_mut(),
            offset,
            shape,
        })
    }

    /// Reinterpret the tensor with a new shape of the same element count.
    pub fn reshape(mut self, new_shape: Shape) -> Result<Tensor> {
        if self.shape.numel() != new_shape.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.dims().to_vec(),
                got: new_shape.dims().to_vec(),
            });
        }
        self.shape = new_shape;
        Ok(self)
    }

    /// Give up ownership now. Pooled storage goes back to its pool.
    pub fn release(self) {
        drop(self)
    }
}

impl Drop for Tensor {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            let storage = std::mem::replace(&mut self.storage, CpuStorage::F32(Vec::new()));
            pool.release(storage);
        }
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("dtype", &self.dtype())
            .field("pooled", &self.is_pooled())
            .finish()
    }
}

/// A borrowed, read-only window onto part of a tensor's storage.
#[derive(Debug, Clone)]
pub struct TensorView<'a> {
    region: StorageRef<'a>,
    offset: usize,
    shape: Shape,
}

impl<'a> TensorView<'a> {
    /// View a plain f32 slice as a tensor of the given shape.
    pub fn from_f32(data: &'a [f32], shape: Shape) -> Result<Self> {
        StorageRef::F32(data).window(0, shape.numel())?;
        Ok(TensorView {
            region: StorageRef::F32(data),
            offset: 0,
            shape,
        })
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.region.dtype()
    }

    /// Element offset of this view into the parent region.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    /// The storage window covered by this view.
    pub fn storage(&self) -> Result<StorageRef<'a>> {
        self.region.window(self.offset, self.shape.numel())
    }

    pub fn as_f32(&self) -> Result<&'a [f32]> {
        match self.storage()? {
            StorageRef::F32(v) => Ok(v),
            other => Err(TensorError::DTypeMismatch {
                expected: DType::F32,
                got: other.dtype(),
            }),
        }
    }

    pub fn as_q8_0(&self) -> Result<&'a [BlockQ8_0]> {
        match self.storage()? {
            StorageRef::Q8_0(v) => Ok(v),
            other => Err(TensorError::DTypeMismatch {
                expected: DType::Q8_0,
                got: other.dtype(),
            }),
        }
    }

    /// Borrow index `i` of this view's leading dimension.
    pub fn slice(&self, i: usize) -> Result<TensorView<'a>> {
        let (offset, shape) = slice_bounds(&self.shape, self.offset, i)?;
        self.region.window(offset, shape.numel())?;
        Ok(TensorView {
            region: self.region,
            offset,
            shape,
        })
    }
}

/// A borrowed, writable window onto part of a tensor's storage.
#[derive(Debug)]
pub struct TensorViewMut<'a> {
    region: StorageMut<'a>,
    offset: usize,
    shape: Shape,
}

impl<'a> TensorViewMut<'a> {
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.region.dtype()
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    /// Read-only view of the same window.
    pub fn as_view(&self) -> TensorView<'_> {
        TensorView {
            region: self.region.as_shared(),
            offset: self.offset,
            shape: self.shape.clone(),
        }
    }

    pub fn as_f32(&self) -> Result<&[f32]> {
        self.as_view().as_f32()
    }

    pub fn as_f32_mut(&mut self) -> Result<&mut [f32]> {
        let n = self.shape.numel();
        match self.region.reborrow().window(self.offset, n)? {
            StorageMut::F32(v) => Ok(v),
            other => Err(TensorError::DTypeMismatch {
                expected: DType::F32,
                got: other.dtype(),
            }),
        }
    }

    pub fn as_q8_0_mut(&mut self) -> Result<&mut [BlockQ8_0]> {
        let n = self.shape.numel();
        match self.region.reborrow().window(self.offset, n)? {
            StorageMut::Q8_0(v) => Ok(v),
            other => Err(TensorError::DTypeMismatch {
                expected: DType::Q8_0,
                got: other.dtype(),
            }),
        }
    }

    /// Borrow index `i` of this view's leading dimension.
    pub fn slice(&self, i: usize) -> Result<TensorView<'_>> {
        self.as_view().slice(i)
    }

    /// Mutably borrow index `i` of this view's leading dimension.
    pub fn slice_mut(&mut self, i: usize) -> Result<TensorViewMut<'_>> {
        let (offset, shape) = slice_bounds(&self.shape, self.offset, i)?;
        self.region.as_shared().window(offset, shape.numel())?;
        Ok(TensorViewMut {
            region: self.region.reborrow(),
            offset,
            shape,
        })
    }
}

/// Offset and shape of index `i` along the leading dimension of `shape`,
/// for a view that itself starts at `base`.
fn slice_bounds(shape: &Shape, base: usize, i: usize) -> Result<(usize, Shape)> {
    let size = shape.dim(0);
    if i >= size {
        return Err(TensorError::IndexOutOfBounds { index: i, size });
    }
    Ok((base + i * shape.row_len(), shape.sliced()))
}
