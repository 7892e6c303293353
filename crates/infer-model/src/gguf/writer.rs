use std::path::Path;

use half::f16;

use infer_tensor::DType;

use crate::error::Result;

use super::header::{GgufHeader, GGUF_DEFAULT_ALIGNMENT, GGUF_VERSION};
use super::metadata::GgufMetadata;
use super::tensor_info::GgufTensorInfo;

/// Serializes metadata and tensors into a GGUF v3 image.
///
/// Tensor data is laid out in insertion order, each tensor aligned to
/// [`GGUF_DEFAULT_ALIGNMENT`].
#[derive(Debug, Default)]
pub struct GgufWriter {
    metadata: GgufMetadata,
    tensors: Vec<(GgufTensorInfo, Vec<u8>)>,
    data_len: usize,
}

impl GgufWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metadata_mut(&mut self) -> &mut GgufMetadata {
        &mut self.metadata
    }

    /// Add a tensor with a raw type ID and pre-encoded data. `dims` are
    /// row-major.
    pub fn tensor_raw(&mut self, name: &str, type_id: u32, dims: &[usize], data: &[u8]) -> &mut Self {
        let offset = self.data_len.next_multiple_of(GGUF_DEFAULT_ALIGNMENT);
        self.data_len = offset + data.len();
        self.tensors.push((
            GgufTensorInfo {
                name: name.to_string(),
                dims: dims.to_vec(),
                type_id,
                offset: offset as u64,
            },
            data.to_vec(),
        ));
        self
    }

    pub fn tensor_f32(&mut self, name: &str, dims: &[usize], data: &[f32]) -> &mut Self {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.tensor_raw(name, DType::F32.to_gguf_type(), dims, &bytes)
    }

    pub fn tensor_f16(&mut self, name: &str, dims: &[usize], data: &[f32]) -> &mut Self {
        let bytes: Vec<u8> = data
            .iter()
            .flat_map(|&v| f16::from_f32(v).to_le_bytes())
            .collect();
        self.tensor_raw(name, DType::F16.to_gguf_type(), dims, &bytes)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        GgufHeader {
            version: GGUF_VERSION,
            n_tensors: self.tensors.len() as u64,
            n_kv: self.metadata.entries.len() as u64,
        }
        .write_to(&mut out)?;
        self.metadata.write_kv(&mut out)?;
        for (info, _) in &self.tensors {
            info.write_to(&mut out)?;
        }

        let data_start = out.len().next_multiple_of(GGUF_DEFAULT_ALIGNMENT);
        out.resize(data_start, 0);
        for (info, data) in &self.tensors {
            out.resize(data_start + info.offset as usize, 0);
            out.extend_from_slice(data);
        }
        Ok(out)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }
}
