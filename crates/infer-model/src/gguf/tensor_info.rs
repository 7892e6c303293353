use std::io::{Read, Write};

use infer_tensor::shape::checked_numel;
use infer_tensor::DType;

use crate::error::{ModelError, Result};

use super::header::{read_string, read_u32, read_u64, write_string};

/// Describes a single tensor stored within a GGUF file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GgufTensorInfo {
    /// Tensor name (e.g. "blk.0.attn_q.weight").
    pub name: String,
    /// Dimensions in row-major order (outermost first).
    ///
    /// GGUF lists dimensions innermost first; they are reversed on read and
    /// on write.
    pub dims: Vec<usize>,
    /// Raw GGUF type ID of the stored data.
    pub type_id: u32,
    /// Byte offset of this tensor's data from the start of the data section.
    pub offset: u64,
}

impl GgufTensorInfo {
    /// Data type of the stored tensor, if the type ID is one this crate knows.
    pub fn dtype(&self) -> Option<DType> {
        DType::from_gguf_type(self.type_id)
    }

    /// Total number of elements in this tensor, or `None` if the dimensions
    /// overflow.
    pub fn numel(&self) -> Option<usize> {
        checked_numel(&self.dims)
    }

    /// Byte size of this tensor's data; `None` for an unknown type.
    ///
    /// Fails with `InvalidFormat` when the element or byte count overflows.
    pub fn data_size(&self) -> Result<Option<usize>> {
        let too_large = || {
            ModelError::InvalidFormat(format!(
                "tensor {} with dims {:?} is too large",
                self.name, self.dims
            ))
        };
        let numel = self.numel().ok_or_else(too_large)?;
        match self.dtype() {
            Some(dtype) => dtype.checked_storage_bytes(numel).map(Some).ok_or_else(too_large),
            None => Ok(None),
        }
    }

    /// Read one entry:
    /// 1. GGUF string name
    /// 2. u32 number of dimensions
    /// 3. n_dims x u64 dimension sizes, innermost first
    /// 4. u32 GGUF type ID
    /// 5. u64 byte offset within the tensor data section
    pub fn parse(reader: &mut impl Read) -> Result<GgufTensorInfo> {
        let name = read_string(reader)?;
        let n_dims = read_u32(reader)?;
        let mut dims = Vec::with_capacity(n_dims.min(8) as usize);
        for _ in 0..n_dims {
            dims.push(read_u64(reader)? as usize);
        }
        dims.reverse();
        let type_id = read_u32(reader)?;
        let offset = read_u64(reader)?;

        Ok(GgufTensorInfo {
            name,
            dims,
            type_id,
            offset,
        })
    }

    pub fn write_to(&self, w: &mut impl Write) -> Result<()> {
        write_string(w, &self.name)?;
        w.write_all(&(self.dims.len() as u32).to_le_bytes())?;
        for &d in self.dims.iter().rev() {
            w.write_all(&(d as u64).to_le_bytes())?;
        }
        w.write_all(&self.type_id.to_le_bytes())?;
        w.write_all(&self.offset.to_le_bytes())?;
        Ok(())
    }
}

/// Parse `n_tensors` tensor info entries from a reader.
pub fn parse_tensor_infos(reader: &mut impl Read, n_tensors: u64) -> Result<Vec<GgufTensorInfo>> {
    let mut infos = Vec::with_capacity(n_tensors.min(1 << 16) as usize);
    for _ in 0..n_tensors {
        infos.push(GgufTensorInfo::parse(reader)?);
    }
    Ok(infos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_dims_are_reversed_on_disk() {
        let info = GgufTensorInfo {
            name: "blk.0.attn_q.weight".into(),
            dims: vec![8, 4],
            type_id: 0,
            offset: 64,
        };
        let mut buf = Vec::new();
        info.write_to(&mut buf).unwrap();

        // name (8 + 19) + n_dims (4), then the innermost dimension first.
        let first_dim = u64::from_le_bytes(buf[31..39].try_into().unwrap());
        assert_eq!(first_dim, 4);

        let parsed = GgufTensorInfo::parse(&mut Cursor::new(buf)).unwrap();
        assert_eq!(parsed, info);
        assert_eq!(parsed.numel(), Some(32));
        assert_eq!(parsed.data_size().unwrap(), Some(128));
    }

    #[test]
    fn test_unknown_type_is_kept() {
        let info = GgufTensorInfo {
            name: "x".into(),
            dims: vec![16],
            type_id: 12,
            offset: 0,
        };
        assert_eq!(info.dtype(), None);
        assert_eq!(info.data_size().unwrap(), None);
    }

    #[test]
    fn test_oversized_dims_are_invalid() {
        let mut info = GgufTensorInfo {
            name: "huge".into(),
            dims: vec![1 << 40, 1 << 40],
            type_id: 0,
            offset: 0,
        };
        assert_eq!(info.numel(), None);
        assert!(matches!(info.data_size(), Err(ModelError::InvalidFormat(_))));

        // The count fits but four bytes per element do not.
        info.dims = vec![usize::MAX / 2];
        assert!(matches!(info.data_size(), Err(ModelError::InvalidFormat(_))));

        // Unknown types are sized from offsets, but the count must still fit.
        info.dims = vec![1 << 40, 1 << 40];
        info.type_id = 12;
        assert!(info.data_size().is_err());
    }
}
