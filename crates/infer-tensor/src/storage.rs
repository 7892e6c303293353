use crate::dtype::DType;
use crate::error::{Result, TensorError};

/// Number of elements in one Q8_0 block.
pub const QK8_0: usize = 32;

/// One block of 8-bit quantized values sharing a single scale.
///
/// Element `i` of the block decodes to `quants[i] as f32 * scale`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockQ8_0 {
    pub scale: f32,
    pub quants: [i8; QK8_0],
}

impl BlockQ8_0 {
    pub const ZERO: BlockQ8_0 = BlockQ8_0 {
        scale: 0.0,
        quants: [0; QK8_0],
    };
}

/// CPU-side tensor storage in a working datatype.
///
/// Weights are always decoded to F32 before use; Q8_0 holds activations
/// quantized by a backend.
#[derive(Debug, Clone)]
pub enum CpuStorage {
    /// 32-bit floating point storage.
    F32(Vec<f32>),
    /// Q8_0 blocks, 32 elements each.
    Q8_0(Vec<BlockQ8_0>),
}

impl CpuStorage {
    /// Number of logical elements this storage can hold.
    ///
    /// Quantized storage always holds a whole number of blocks.
    pub fn numel(&self) -> usize {
        match self {
            CpuStorage::F32(v) => v.len(),
            CpuStorage::Q8_0(v) => v.len() * QK8_0,
        }
    }

    /// Returns true if the storage contains no elements.
    pub fn is_empty(&self) -> bool {
        self.numel() == 0
    }

    /// Resident size of this storage in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            CpuStorage::F32(v) => v.len() * std::mem::size_of::<f32>(),
            CpuStorage::Q8_0(v) => v.len() * std::mem::size_of::<BlockQ8_0>(),
        }
    }

    /// Number of logical elements `zeros(dtype, n)` would allocate.
    pub fn rounded_numel(dtype: DType, n: usize) -> usize {
        n.div_ceil(dtype.block_size()) * dtype.block_size()
    }

    /// Create zero-filled storage for the given dtype and element count.
    ///
    /// # Errors
    /// Returns an error for dtypes that are not working datatypes (F16, BF16
    /// and Q4_0 only exist inside weight files).
    pub fn zeros(dtype: DType, n: usize) -> Result<Self> {
        match dtype {
            DType::F32 => Ok(CpuStorage::F32(vec![0.0; n])),
            DType::Q8_0 => Ok(CpuStorage::Q8_0(vec![BlockQ8_0::ZERO; n.div_ceil(QK8_0)])),
            other => Err(TensorError::UnsupportedDType(format!(
                "{} is not a working storage type",
                other
            ))),
        }
    }

    /// Reset every element to zero without reallocating.
    pub fn fill_zero(&mut self) {
        match self {
            CpuStorage::F32(v) => v.fill(0.0),
            CpuStorage::Q8_0(v) => v.fill(BlockQ8_0::ZERO),
        }
    }

    /// Create storage from an f32 vector.
    pub fn from_f32_vec(data: Vec<f32>) -> Self {
        CpuStorage::F32(data)
    }

    /// Returns the dtype of this storage.
    pub fn dtype(&self) -> DType {
        match self {
            CpuStorage::F32(_) => DType::F32,
            CpuStorage::Q8_0(_) => DType::Q8_0,
        }
    }

    /// Borrow the whole region.
    pub fn region(&self) -> StorageRef<'_> {
        match self {
            CpuStorage::F32(v) => StorageRef::F32(v),
            CpuStorage::Q8_0(v) => StorageRef::Q8_0(v),
        }
    }

    /// Mutably borrow the whole region.
    pub fn region_mut(&mut self) -> StorageMut<'_> {
        match self {
            CpuStorage::F32(v) => StorageMut::F32(v),
            CpuStorage::Q8_0(v) => StorageMut::Q8_0(v),
        }
    }
}

/// A borrowed window of tensor storage.
#[derive(Debug, Clone, Copy)]
pub enum StorageRef<'a> {
    F32(&'a [f32]),
    Q8_0(&'a [BlockQ8_0]),
}

impl<'a> StorageRef<'a> {
    pub fn dtype(&self) -> DType {
        match self {
            StorageRef::F32(_) => DType::F32,
            StorageRef::Q8_0(_) => DType::Q8_0,
        }
    }

    /// Number of logical elements in the window.
    pub fn numel(&self) -> usize {
        match self {
            StorageRef::F32(v) => v.len(),
            StorageRef::Q8_0(v) => v.len() * QK8_0,
        }
    }

    /// Narrow to `len` elements starting at element `start`.
    ///
    /// Quantized windows must start on a block boundary; a trailing partial
    /// block is kept whole.
    pub fn window(self, start: usize, len: usize) -> Result<StorageRef<'a>> {
        let (lo, hi) = unit_range(self.dtype(), start, len, self.numel())?;
        Ok(match self {
            StorageRef::F32(v) => StorageRef::F32(&v[lo..hi]),
            StorageRef::Q8_0(v) => StorageRef::Q8_0(&v[lo..hi]),
        })
    }
}

/// A mutably borrowed window of tensor storage.
#[derive(Debug)]
pub enum StorageMut<'a> {
    F32(&'a mut [f32]),
    Q8_0(&'a mut [BlockQ8_0]),
}

impl<'a> StorageMut<'a> {
    pub fn dtype(&self) -> DType {
        match self {
            StorageMut::F32(_) => DType::F32,
            StorageMut::Q8_0(_) => DType::Q8_0,
        }
    }

    pub fn numel(&self) -> usize {
        match self {
            StorageMut::F32(v) => v.len(),
            StorageMut::Q8_0(v) => v.len() * QK8_0,
        }
    }

    /// Shorter-lived shared borrow of the same region.
    pub fn as_shared(&self) -> StorageRef<'_> {
        match self {
            StorageMut::F32(v) => StorageRef::F32(v),
            StorageMut::Q8_0(v) => StorageRef::Q8_0(v),
        }
    }

    /// Shorter-lived mutable borrow of the same region.
    pub fn reborrow(&mut self) -> StorageMut<'_> {
        match self {
            StorageMut::F32(v) => StorageMut::F32(v),
            StorageMut::Q8_0(v) => StorageMut::Q8_0(v),
        }
    }

    /// Narrow to `len` elements starting at element `start`.
    pub fn window(self, start: usize, len: usize) -> Result<StorageMut<'a>> {
        let (lo, hi) = unit_range(self.dtype(), start, len, self.numel())?;
        Ok(match self {
            StorageMut::F32(v) => StorageMut::F32(&mut v[lo..hi]),
            StorageMut::Q8_0(v) => StorageMut::Q8_0(&mut v[lo..hi]),
        })
    }
}

/// Map an element range onto storage units (elements or blocks).
fn unit_range(dtype: DType, start: usize, len: usize, numel: usize) -> Result<(usize, usize)> {
    let end = start + len;
    let block = dtype.block_size();
    if start % block != 0 {
        return Err(TensorError::Other(format!(
            "{} window must start on a {}-element block boundary, got {}",
            dtype, block, start
        )));
    }
    let lo = start / block;
    let hi = end.div_ceil(block);
    if hi * block > numel {
        return Err(TensorError::OutOfBounds {
            start,
            end,
            len: numel,
        });
    }
    Ok((lo, hi))
}
