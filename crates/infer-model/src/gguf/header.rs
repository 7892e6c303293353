use std::io::{Read, Write};

use crate::error::{ModelError, Result};

/// The four-byte magic number identifying a GGUF file: ASCII "GGUF".
pub const GGUF_MAGIC: [u8; 4] = *b"GGUF";

/// The only container version this crate reads and writes.
pub const GGUF_VERSION: u32 = 3;

/// Default alignment (in bytes) of the tensor data section, used unless the
/// file overrides it with `general.alignment`.
pub const GGUF_DEFAULT_ALIGNMENT: usize = 32;

/// Parsed GGUF file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GgufHeader {
    pub version: u32,
    /// Number of entries in the tensor-info table.
    pub n_tensors: u64,
    /// Number of key-value metadata entries.
    pub n_kv: u64,
}

impl GgufHeader {
    /// Parse and validate the magic, version and table sizes.
    pub fn parse(reader: &mut impl Read) -> Result<GgufHeader> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != GGUF_MAGIC {
            return Err(ModelError::InvalidMagic(magic));
        }

        let version = read_u32(reader)?;
        if version != GGUF_VERSION {
            return Err(ModelError::UnsupportedVersion(version));
        }
        let n_tensors = read_u64(reader)?;
        let n_kv = read_u64(reader)?;

        Ok(GgufHeader {
            version,
            n_tensors,
            n_kv,
        })
    }

    pub fn write_to(&self, w: &mut impl Write) -> Result<()> {
        w.write_all(&GGUF_MAGIC)?;
        w.write_all(&self.version.to_le_bytes())?;
        w.write_all(&self.n_tensors.to_le_bytes())?;
        w.write_all(&self.n_kv.to_le_bytes())?;
        Ok(())
    }
}

pub(crate) fn read_u32(reader: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub(crate) fn read_u64(reader: &mut impl Read) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Read a GGUF string: u64 length followed by that many UTF-8 bytes.
pub(crate) fn read_string(reader: &mut impl Read) -> Result<String> {
    let len = read_u64(reader)? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf)
        .map_err(|e| ModelError::InvalidFormat(format!("invalid UTF-8 in string: {}", e)))
}

pub(crate) fn write_string(w: &mut impl Write, s: &str) -> Result<()> {
    w.write_all(&(s.len() as u64).to_le_bytes())?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_header_round_trip() {
        let header = GgufHeader {
            version: GGUF_VERSION,
            n_tensors: 7,
            n_kv: 3,
        };
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), 24);
        assert_eq!(GgufHeader::parse(&mut Cursor::new(buf)).unwrap(), header);
    }

    #[test]
    fn test_bad_magic() {
        let mut buf = b"GGML".to_vec();
        buf.extend_from_slice(&3u32.to_le_bytes());
        assert!(matches!(
            GgufHeader::parse(&mut Cursor::new(buf)),
            Err(ModelError::InvalidMagic(_))
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let mut buf = GGUF_MAGIC.to_vec();
        buf.extend_from_slice(&2u32.to_le_bytes());
        assert!(matches!(
            GgufHeader::parse(&mut Cursor::new(buf)),
            Err(ModelError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn test_truncated_header_is_io_error() {
        let buf = GGUF_MAGIC.to_vec();
        assert!(matches!(
            GgufHeader::parse(&mut Cursor::new(buf)),
            Err(ModelError::Io(_))
        ));
    }
}
