use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;

use memmap2::Mmap;
use tracing::debug;

use crate::blob::{BlobBytes, TensorInfo, WeightBlob};
use crate::error::{ModelError, Result};

use super::header::{GgufHeader, GGUF_DEFAULT_ALIGNMENT};
use super::metadata::GgufMetadata;
use super::tensor_info::{self, GgufTensorInfo};

/// Metadata key overriding the data-section alignment.
pub const ALIGNMENT_KEY: &str = "general.alignment";

/// A parsed GGUF file: header, metadata, tensor table and the weight blob
/// over its data section.
#[derive(Debug)]
pub struct GgufFile {
    pub header: GgufHeader,
    pub metadata: GgufMetadata,
    pub tensor_infos: Vec<GgufTensorInfo>,
    pub blob: WeightBlob,
}

impl GgufFile {
    /// Open and parse a GGUF file from disk.
    ///
    /// The whole file is memory-mapped; the tables are parsed out of the
    /// mapping and tensor data stays in place.
    pub fn open(path: &Path) -> Result<GgufFile> {
        let file = std::fs::File::open(path)?;
        // SAFETY: the mapping is read-only; the file must not be truncated
        // while the model is alive.
        let mmap = unsafe { Mmap::map(&file)? };
        let gguf = Self::parse(BlobBytes::Mapped(mmap))?;
        debug!(
            path = %path.display(),
            tensors = gguf.tensor_infos.len(),
            kv = gguf.metadata.entries.len(),
            "parsed GGUF file"
        );
        Ok(gguf)
    }

    /// Parse a GGUF image held in memory.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<GgufFile> {
        Self::parse(BlobBytes::Owned(bytes))
    }

    fn parse(bytes: BlobBytes) -> Result<GgufFile> {
        let mut reader = Cursor::new(&bytes[..]);
        let header = GgufHeader::parse(&mut reader)?;
        let metadata = GgufMetadata::parse_kv(&mut reader, header.n_kv)?;
        let tensor_infos = tensor_info::parse_tensor_infos(&mut reader, header.n_tensors)?;

        let alignment = match metadata.get_usize(ALIGNMENT_KEY) {
            Ok(0) => {
                return Err(ModelError::InvalidFormat(format!("{} must be non-zero", ALIGNMENT_KEY)))
            }
            Ok(a) => a,
            Err(ModelError::MissingKey(_)) => GGUF_DEFAULT_ALIGNMENT,
            Err(e) => return Err(e),
        };
        let data_offset = (reader.position() as usize).next_multiple_of(alignment);

        let tensors = index_tensors(&tensor_infos, data_offset, bytes.len())?;
        Ok(GgufFile {
            header,
            metadata,
            tensor_infos,
            blob: WeightBlob::new(bytes, tensors),
        })
    }

    /// Split into the metadata and the weight blob.
    pub fn into_parts(self) -> (GgufMetadata, WeightBlob) {
        (self.metadata, self.blob)
    }
}

/// Resolve every entry's absolute byte range.
///
/// Known types span exactly their encoded size. Unknown types extend to the
/// next tensor's offset (or the end of the file) so they can still be
/// indexed and reported when loaded.
fn index_tensors(
    infos: &[GgufTensorInfo],
    data_offset: usize,
    file_len: usize,
) -> Result<HashMap<String, TensorInfo>> {
    let mut offsets: Vec<usize> = infos.iter().map(|t| t.offset as usize).collect();
    offsets.sort_unstable();

    let mut tensors = HashMap::with_capacity(infos.len());
    for info in infos {
        let start = data_offset
            .checked_add(info.offset as usize)
            .ok_or_else(|| ModelError::InvalidFormat(format!("tensor {} offset overflows", info.name)))?;
        let end = match info.data_size()? {
            Some(size) => start.checked_add(size).ok_or_else(|| {
                ModelError::InvalidFormat(format!("tensor {} extends past addressable memory", info.name))
            })?,
            None => {
                let next = offsets.iter().find(|&&o| o > info.offset as usize);
                next.map_or(file_len, |&o| data_offset + o)
            }
        };
        let entry = TensorInfo {
            type_id: info.type_id,
            shape: info.dims.clone(),
            range: start..end,
        };
        if tensors.insert(info.name.clone(), entry).is_some() {
            return Err(ModelError::InvalidFormat(format!("duplicate tensor {}", info.name)));
        }
    }
    Ok(tensors)
}
