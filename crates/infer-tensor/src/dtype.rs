use std::fmt;

use half::{bf16, f16};

use crate::error::{Result, TensorError};

/// Supported data types for tensor storage and weight files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// 32-bit floating point.
    F32,
    /// 16-bit floating point (IEEE 754 half-precision).
    F16,
    /// 16-bit brain floating point (8-bit exponent, 7-bit mantissa).
    BF16,
    /// 4-bit quantized format (GGUF Q4_0 block type).
    Q4_0,
    /// 8-bit quantized format (GGUF Q8_0 block type).
    Q8_0,
}

impl DType {
    /// Returns the size in bytes of a single element for non-quantized types,
    /// or of one block for quantized types, as laid out in a weight file.
    ///
    /// - F32: 4 bytes per element
    /// - F16, BF16: 2 bytes per element
    /// - Q4_0: 18 bytes per block of 32 elements (2-byte scale + 16 bytes of nibbles)
    /// - Q8_0: 34 bytes per block of 32 elements (2-byte scale + 32 bytes of quants)
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 | DType::BF16 => 2,
            DType::Q4_0 => 18,
            DType::Q8_0 => 34,
        }
    }

    /// Converts a GGUF type ID to a `DType`.
    ///
    /// GGUF type IDs:
    /// - 0 => F32
    /// - 1 => F16
    /// - 2 => Q4_0
    /// - 8 => Q8_0
    /// - 30 => BF16
    pub fn from_gguf_type(id: u32) -> Option<DType> {
        match id {
            0 => Some(DType::F32),
            1 => Some(DType::F16),
            2 => Some(DType::Q4_0),
            8 => Some(DType::Q8_0),
            30 => Some(DType::BF16),
            _ => None,
        }
    }

    /// Returns the GGUF type ID for this `DType`.
    pub fn to_gguf_type(&self) -> u32 {
        match self {
            DType::F32 => 0,
            DType::F16 => 1,
            DType::Q4_0 => 2,
            DType::Q8_0 => 8,
            DType::BF16 => 30,
        }
    }

    /// Returns the number of elements per quantization block, or 1 for
    /// non-quantized types.
    pub fn block_size(&self) -> usize {
        match self {
            DType::F32 | DType::F16 | DType::BF16 => 1,
            DType::Q4_0 | DType::Q8_0 => 32,
        }
    }

    /// Returns true if this dtype is a quantized format.
    pub fn is_quantized(&self) -> bool {
        matches!(self, DType::Q4_0 | DType::Q8_0)
    }

    /// Number of bytes needed to store `numel` elements in a weight file.
    pub fn storage_bytes(&self, numel: usize) -> usize {
        numel.div_ceil(self.block_size()) * self.size_in_bytes()
    }

    /// [`DType::storage_bytes`], or `None` if the byte count overflows.
    pub fn checked_storage_bytes(&self, numel: usize) -> Option<usize> {
        numel
            .div_ceil(self.block_size())
            .checked_mul(self.size_in_bytes())
    }

    /// Decode little-endian elements of this dtype from `bytes` into `out`.
    ///
    /// `bytes` must hold exactly `out.len()` elements. Only the float types
    /// decode; block-quantized data is rejected.
    pub fn decode_le(&self, bytes: &[u8], out: &mut [f32]) -> Result<()> {
        let decode: fn(&[u8]) -> f32 = match self {
            DType::F32 => |b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            DType::F16 => |b| f16::from_le_bytes([b[0], b[1]]).to_f32(),
            DType::BF16 => |b| bf16::from_le_bytes([b[0], b[1]]).to_f32(),
            DType::Q4_0 | DType::Q8_0 => {
                return Err(TensorError::UnsupportedDType(format!("cannot decode {}", self)))
            }
        };
        let expected = self.storage_bytes(out.len());
        if bytes.len() != expected {
            return Err(TensorError::Other(format!(
                "{} bytes do not hold {} {} elements ({} bytes)",
                bytes.len(),
                out.len(),
                self,
                expected
            )));
        }
        for (o, b) in out.iter_mut().zip(bytes.chunks_exact(self.size_in_bytes())) {
            *o = decode(b);
        }
        Ok(())
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F32 => write!(f, "f32"),
            DType::F16 => write!(f, "f16"),
            DType::BF16 => write!(f, "bf16"),
            DType::Q4_0 => write!(f, "q4_0"),
            DType::Q8_0 => write!(f, "q8_0"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_in_bytes() {
        assert_eq!(DType::F32.size_in_bytes(), 4);
        assert_eq!(DType::F16.size_in_bytes(), 2);
        assert_eq!(DType::BF16.size_in_bytes(), 2);
        assert_eq!(DType::Q4_0.size_in_bytes(), 18);
        assert_eq!(DType::Q8_0.size_in_bytes(), 34);
    }

    #[test]
    fn test_gguf_ids() {
        for dtype in &[DType::F32, DType::F16, DType::BF16, DType::Q4_0, DType::Q8_0] {
            let id = dtype.to_gguf_type();
            assert_eq!(DType::from_gguf_type(id), Some(*dtype));
        }
        assert_eq!(DType::from_gguf_type(30), Some(DType::BF16));
        assert!(DType::from_gguf_type(999).is_none());
    }

    #[test]
    fn test_storage_bytes() {
        assert_eq!(DType::F32.storage_bytes(10), 40);
        assert_eq!(DType::BF16.storage_bytes(10), 20);
        // A partial trailing block still occupies a full block.
        assert_eq!(DType::Q8_0.storage_bytes(33), 68);
        assert_eq!(DType::Q8_0.checked_storage_bytes(33), Some(68));
        assert_eq!(DType::F32.checked_storage_bytes(usize::MAX / 2), None);
    }

    #[test]
    fn test_decode_le_float_types() {
        let mut out = [0.0f32; 2];

        let bytes: Vec<u8> = [1.5f32, -2.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        DType::F32.decode_le(&bytes, &mut out).unwrap();
        assert_eq!(out, [1.5, -2.0]);

        // 0x3C00 = 1.0, 0xC000 = -2.0 in IEEE half.
        DType::F16.decode_le(&[0x00, 0x3C, 0x00, 0xC0], &mut out).unwrap();
        assert_eq!(out, [1.0, -2.0]);

        // bfloat16 is the upper half of an f32: 0x3F80 = 1.0, 0x4040 = 3.0.
        DType::BF16.decode_le(&[0x80, 0x3F, 0x40, 0x40], &mut out).unwrap();
        assert_eq!(out, [1.0, 3.0]);
    }

    #[test]
    fn test_decode_le_rejects() {
        let mut out = [0.0f32; 2];
        assert!(DType::F32.decode_le(&[0; 7], &mut out).is_err());
        assert!(matches!(
            DType::Q8_0.decode_le(&[0; 34], &mut out),
            Err(TensorError::UnsupportedDType(_))
        ));
    }
}
