//! Read-only weight bytes plus the name -> (type, shape, byte range) index.

use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, Range};

use half::{bf16, f16};
use memmap2::Mmap;

use infer_tensor::shape::checked_numel;
use infer_tensor::DType;

use crate::error::{ModelError, Result};

/// Backing bytes of a blob: a memory-mapped file or an owned buffer.
pub enum BlobBytes {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for BlobBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            BlobBytes::Mapped(m) => m,
            BlobBytes::Owned(v) => v,
        }
    }
}

impl fmt::Debug for BlobBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            BlobBytes::Mapped(_) => "Mapped",
            BlobBytes::Owned(_) => "Owned",
        };
        write!(f, "{}({} bytes)", kind, self.len())
    }
}

/// Where one named tensor lives inside a blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorInfo {
    /// Raw GGUF type ID; unknown IDs are kept so loading can report them.
    pub type_id: u32,
    /// Row-major dimensions.
    pub shape: Vec<usize>,
    /// Absolute byte range within the blob.
    pub range: Range<usize>,
}

impl TensorInfo {
    pub fn dtype(&self) -> Option<DType> {
        DType::from_gguf_type(self.type_id)
    }

    /// Element count, or `None` if the dimensions overflow.
    pub fn numel(&self) -> Option<usize> {
        checked_numel(&self.shape)
    }
}

/// Immutable weight storage shared by every loader and model built on it.
#[derive(Debug)]
pub struct WeightBlob {
    bytes: BlobBytes,
    tensors: HashMap<String, TensorInfo>,
}

impl WeightBlob {
    pub fn new(bytes: BlobBytes, tensors: HashMap<String, TensorInfo>) -> Self {
        WeightBlob { bytes, tensors }
    }

    pub fn builder() -> WeightBlobBuilder {
        WeightBlobBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&TensorInfo> {
        self.tensors.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Total size of the backing bytes.
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    /// Raw bytes of `info`, checked against the blob's extent.
    pub fn data(&self, name: &str, info: &TensorInfo) -> Result<&[u8]> {
        self.bytes.get(info.range.clone()).ok_or_else(|| {
            ModelError::InvalidFormat(format!(
                "tensor {} spans bytes {}..{} of a {}-byte blob",
                name,
                info.range.start,
                info.range.end,
                self.bytes.len()
            ))
        })
    }

    /// The most common known dtype among the stored tensors, preferring the
    /// wider type on a tie.
    pub fn dominant_dtype(&self) -> Option<DType> {
        let mut counts: HashMap<DType, usize> = HashMap::new();
        for info in self.tensors.values() {
            if let Some(dtype) = info.dtype() {
                *counts.entry(dtype).or_default() += 1;
            }
        }
        counts
            .into_iter()
            .max_by_key(|&(dtype, n)| (n, dtype.size_in_bytes()))
            .map(|(dtype, _)| dtype)
    }
}

/// Assembles an in-memory blob, e.g. for synthetic models.
#[derive(Debug, Default)]
pub struct WeightBlobBuilder {
    bytes: Vec<u8>,
    tensors: HashMap<String, TensorInfo>,
}

impl WeightBlobBuilder {
    /// Append a tensor with an arbitrary type ID and pre-encoded bytes.
    pub fn raw(mut self, name: &str, type_id: u32, shape: &[usize], bytes: &[u8]) -> Self {
        let start = self.bytes.len();
        self.bytes.extend_from_slice(bytes);
        self.tensors.insert(
            name.to_string(),
            TensorInfo {
                type_id,
                shape: shape.to_vec(),
                range: start..self.bytes.len(),
            },
        );
        self
    }

    pub fn f32(self, name: &str, shape: &[usize], data: &[f32]) -> Self {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.raw(name, DType::F32.to_gguf_type(), shape, &bytes)
    }

    /// Store `data` rounded to IEEE half precision.
    pub fn f16(self, name: &str, shape: &[usize], data: &[f32]) -> Self {
        let bytes: Vec<u8> = data
            .iter()
            .flat_map(|&v| f16::from_f32(v).to_le_bytes())
            .collect();
        self.raw(name, DType::F16.to_gguf_type(), shape, &bytes)
    }

    /// Store `data` rounded to bfloat16.
    pub fn bf16(self, name: &str, shape: &[usize], data: &[f32]) -> Self {
        let bytes: Vec<u8> = data
            .iter()
            .flat_map(|&v| bf16::from_f32(v).to_le_bytes())
            .collect();
        self.raw(name, DType::BF16.to_gguf_type(), shape, &bytes)
    }

    pub fn build(self) -> WeightBlob {
        WeightBlob::new(BlobBytes::Owned(self.bytes), self.tensors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_ranges_are_contiguous() {
        let blob = WeightBlob::builder()
            .f32("a", &[2], &[1.0, 2.0])
            .f16("b", &[3], &[1.0, 2.0, 3.0])
            .build();
        assert_eq!(blob.len(), 2);
        assert_eq!(blob.byte_len(), 8 + 6);

        let b = blob.get("b").unwrap();
        assert_eq!(b.range, 8..14);
        assert_eq!(b.dtype(), Some(DType::F16));
        assert_eq!(b.numel(), Some(3));
        assert_eq!(blob.data("b", b).unwrap().len(), 6);
    }

    #[test]
    fn test_out_of_range_is_invalid_format() {
        let blob = WeightBlob::builder().f32("a", &[1], &[1.0]).build();
        let bogus = TensorInfo {
            type_id: 0,
            shape: vec![4],
            range: 0..16,
        };
        assert!(matches!(
            blob.data("bogus", &bogus),
            Err(ModelError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_dominant_dtype() {
        let blob = WeightBlob::builder()
            .f16("a", &[1], &[1.0])
            .f16("b", &[1], &[1.0])
            .f32("c", &[1], &[1.0])
            .raw("d", 77, &[1], &[0])
            .build();
        assert_eq!(blob.dominant_dtype(), Some(DType::F16));
        assert_eq!(WeightBlob::builder().build().dominant_dtype(), None);
    }

    #[test]
    fn test_numel_overflow_is_none() {
        let blob = WeightBlob::builder().raw("huge", 0, &[1 << 40, 1 << 40], &[]).build();
        assert_eq!(blob.get("huge").unwrap().numel(), None);
    }
}
