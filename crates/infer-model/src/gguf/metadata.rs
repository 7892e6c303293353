use std::collections::HashMap;
use std::io::{Read, Write};

use crate::error::{ModelError, Result};

use super::header::{read_string, read_u32, read_u64, write_string};

/// A single GGUF metadata value.
#[derive(Debug, Clone, PartialEq)]
pub enum GgufMetadataValue {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    Bool(bool),
    String(String),
    Array(Vec<GgufMetadataValue>),
}

impl GgufMetadataValue {
    /// GGUF value type ID:
    ///   0=U8, 1=I8, 2=U16, 3=I16, 4=U32, 5=I32, 6=F32, 7=Bool,
    ///   8=String, 9=Array, 10=U64, 11=I64, 12=F64
    pub fn type_id(&self) -> u32 {
        match self {
            GgufMetadataValue::U8(_) => 0,
            GgufMetadataValue::I8(_) => 1,
            GgufMetadataValue::U16(_) => 2,
            GgufMetadataValue::I16(_) => 3,
            GgufMetadataValue::U32(_) => 4,
            GgufMetadataValue::I32(_) => 5,
            GgufMetadataValue::F32(_) => 6,
            GgufMetadataValue::Bool(_) => 7,
            GgufMetadataValue::String(_) => 8,
            GgufMetadataValue::Array(_) => 9,
            GgufMetadataValue::U64(_) => 10,
            GgufMetadataValue::I64(_) => 11,
            GgufMetadataValue::F64(_) => 12,
        }
    }

    /// Human-readable name for the variant (used in error messages).
    fn type_name(&self) -> &'static str {
        match self {
            GgufMetadataValue::U8(_) => "U8",
            GgufMetadataValue::I8(_) => "I8",
            GgufMetadataValue::U16(_) => "U16",
            GgufMetadataValue::I16(_) => "I16",
            GgufMetadataValue::U32(_) => "U32",
            GgufMetadataValue::I32(_) => "I32",
            GgufMetadataValue::U64(_) => "U64",
            GgufMetadataValue::I64(_) => "I64",
            GgufMetadataValue::F32(_) => "F32",
            GgufMetadataValue::F64(_) => "F64",
            GgufMetadataValue::Bool(_) => "Bool",
            GgufMetadataValue::String(_) => "String",
            GgufMetadataValue::Array(_) => "Array",
        }
    }

    /// Any non-negative integer variant, widened.
    fn as_unsigned(&self) -> Option<u64> {
        match *self {
            GgufMetadataValue::U8(v) => Some(v as u64),
            GgufMetadataValue::U16(v) => Some(v as u64),
            GgufMetadataValue::U32(v) => Some(v as u64),
            GgufMetadataValue::U64(v) => Some(v),
            GgufMetadataValue::I8(v) => u64::try_from(v).ok(),
            GgufMetadataValue::I16(v) => u64::try_from(v).ok(),
            GgufMetadataValue::I32(v) => u64::try_from(v).ok(),
            GgufMetadataValue::I64(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }

    fn read(reader: &mut impl Read, type_id: u32) -> Result<GgufMetadataValue> {
        fn bytes<const N: usize>(reader: &mut impl Read) -> Result<[u8; N]> {
            let mut buf = [0u8; N];
            reader.read_exact(&mut buf)?;
            Ok(buf)
        }

        Ok(match type_id {
            0 => GgufMetadataValue::U8(bytes::<1>(reader)?[0]),
            1 => GgufMetadataValue::I8(bytes::<1>(reader)?[0] as i8),
            2 => GgufMetadataValue::U16(u16::from_le_bytes(bytes(reader)?)),
            3 => GgufMetadataValue::I16(i16::from_le_bytes(bytes(reader)?)),
            4 => GgufMetadataValue::U32(u32::from_le_bytes(bytes(reader)?)),
            5 => GgufMetadataValue::I32(i32::from_le_bytes(bytes(reader)?)),
            6 => GgufMetadataValue::F32(f32::from_le_bytes(bytes(reader)?)),
            7 => GgufMetadataValue::Bool(bytes::<1>(reader)?[0] != 0),
            8 => GgufMetadataValue::String(read_string(reader)?),
            9 => {
                // Array: u32 element type, u64 count, then count values.
                let elem_type = read_u32(reader)?;
                let count = read_u64(reader)? as usize;
                let mut values = Vec::with_capacity(count.min(1 << 20));
                for _ in 0..count {
                    values.push(GgufMetadataValue::read(reader, elem_type)?);
                }
                GgufMetadataValue::Array(values)
            }
            10 => GgufMetadataValue::U64(u64::from_le_bytes(bytes(reader)?)),
            11 => GgufMetadataValue::I64(i64::from_le_bytes(bytes(reader)?)),
            12 => GgufMetadataValue::F64(f64::from_le_bytes(bytes(reader)?)),
            other => return Err(ModelError::UnsupportedGgufType(other)),
        })
    }

    /// Write the payload only; the caller writes the type ID.
    fn write(&self, w: &mut impl Write) -> Result<()> {
        match self {
            GgufMetadataValue::U8(v) => w.write_all(&[*v])?,
            GgufMetadataValue::I8(v) => w.write_all(&v.to_le_bytes())?,
            GgufMetadataValue::U16(v) => w.write_all(&v.to_le_bytes())?,
            GgufMetadataValue::I16(v) => w.write_all(&v.to_le_bytes())?,
            GgufMetadataValue::U32(v) => w.write_all(&v.to_le_bytes())?,
            GgufMetadataValue::I32(v) => w.write_all(&v.to_le_bytes())?,
            GgufMetadataValue::U64(v) => w.write_all(&v.to_le_bytes())?,
            GgufMetadataValue::I64(v) => w.write_all(&v.to_le_bytes())?,
            GgufMetadataValue::F32(v) => w.write_all(&v.to_le_bytes())?,
            GgufMetadataValue::F64(v) => w.write_all(&v.to_le_bytes())?,
            GgufMetadataValue::Bool(v) => w.write_all(&[u8::from(*v)])?,
            GgufMetadataValue::String(s) => write_string(w, s)?,
            GgufMetadataValue::Array(values) => {
                // Empty arrays are written as U32 arrays.
                let elem_type = values.first().map_or(4, GgufMetadataValue::type_id);
                if let Some(odd) = values.iter().find(|v| v.type_id() != elem_type) {
                    return Err(ModelError::InvalidFormat(format!(
                        "mixed array element types: {} and {}",
                        values[0].type_name(),
                        odd.type_name()
                    )));
                }
                w.write_all(&elem_type.to_le_bytes())?;
                w.write_all(&(values.len() as u64).to_le_bytes())?;
                for v in values {
                    v.write(w)?;
                }
            }
        }
        Ok(())
    }
}

impl From<&str> for GgufMetadataValue {
    fn from(s: &str) -> Self {
        GgufMetadataValue::String(s.to_string())
    }
}

impl From<u32> for GgufMetadataValue {
    fn from(v: u32) -> Self {
        GgufMetadataValue::U32(v)
    }
}

impl From<f32> for GgufMetadataValue {
    fn from(v: f32) -> Self {
        GgufMetadataValue::F32(v)
    }
}

impl From<Vec<String>> for GgufMetadataValue {
    fn from(v: Vec<String>) -> Self {
        GgufMetadataValue::Array(v.into_iter().map(GgufMetadataValue::String).collect())
    }
}

impl From<Vec<f32>> for GgufMetadataValue {
    fn from(v: Vec<f32>) -> Self {
        GgufMetadataValue::Array(v.into_iter().map(GgufMetadataValue::F32).collect())
    }
}

/// Collection of GGUF metadata key-value pairs.
#[derive(Debug, Clone, Default)]
pub struct GgufMetadata {
    pub entries: HashMap<String, GgufMetadataValue>,
}

impl GgufMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<GgufMetadataValue>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn lookup(&self, key: &str) -> Result<&GgufMetadataValue> {
        self.entries
            .get(key)
            .ok_or_else(|| ModelError::MissingKey(key.to_string()))
    }

    fn mismatch(key: &str, expected: &str, got: &GgufMetadataValue) -> ModelError {
        ModelError::TypeMismatch {
            key: key.to_string(),
            expected: expected.to_string(),
            got: got.type_name().to_string(),
        }
    }

    /// Retrieve a string value by key.
    pub fn get_string(&self, key: &str) -> Result<&str> {
        match self.lookup(key)? {
            GgufMetadataValue::String(s) => Ok(s.as_str()),
            other => Err(Self::mismatch(key, "String", other)),
        }
    }

    /// Retrieve a u32 value by key.
    pub fn get_u32(&self, key: &str) -> Result<u32> {
        match self.lookup(key)? {
            GgufMetadataValue::U32(v) => Ok(*v),
            other => Err(Self::mismatch(key, "U32", other)),
        }
    }

    /// Retrieve a non-negative integer of any width as `usize`.
    ///
    /// Converters disagree on integer widths for counts and token ids, so
    /// hyperparameters are read through this accessor.
    pub fn get_usize(&self, key: &str) -> Result<usize> {
        let value = self.lookup(key)?;
        value
            .as_unsigned()
            .and_then(|v| usize::try_from(v).ok())
            .ok_or_else(|| Self::mismatch(key, "unsigned integer", value))
    }

    /// Retrieve an f32 value by key. F64 values are narrowed.
    pub fn get_f32(&self, key: &str) -> Result<f32> {
        match self.lookup(key)? {
            GgufMetadataValue::F32(v) => Ok(*v),
            GgufMetadataValue::F64(v) => Ok(*v as f32),
            other => Err(Self::mismatch(key, "F32", other)),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        match self.lookup(key)? {
            GgufMetadataValue::Bool(v) => Ok(*v),
            other => Err(Self::mismatch(key, "Bool", other)),
        }
    }

    /// Retrieve a string array value by key.
    pub fn get_string_array(&self, key: &str) -> Result<Vec<String>> {
        self.get_array(key, "String", |v| match v {
            GgufMetadataValue::String(s) => Some(s.clone()),
            _ => None,
        })
    }

    /// Retrieve an f32 array value by key.
    pub fn get_f32_array(&self, key: &str) -> Result<Vec<f32>> {
        self.get_array(key, "F32", |v| match v {
            GgufMetadataValue::F32(f) => Some(*f),
            _ => None,
        })
    }

    /// Length of an array value, without copying it.
    pub fn array_len(&self, key: &str) -> Result<usize> {
        match self.lookup(key)? {
            GgufMetadataValue::Array(arr) => Ok(arr.len()),
            other => Err(Self::mismatch(key, "Array", other)),
        }
    }

    fn get_array<T>(
        &self,
        key: &str,
        expected: &str,
        convert: impl Fn(&GgufMetadataValue) -> Option<T>,
    ) -> Result<Vec<T>> {
        match self.lookup(key)? {
            GgufMetadataValue::Array(arr) => arr
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    convert(v).ok_or_else(|| Self::mismatch(&format!("{}[{}]", key, i), expected, v))
                })
                .collect(),
            other => Err(Self::mismatch(key, "Array", other)),
        }
    }

    /// Parse `n_kv` entries: a GGUF string key, a u32 value type ID, then the
    /// value payload.
    pub fn parse_kv(reader: &mut impl Read, n_kv: u64) -> Result<GgufMetadata> {
        let mut entries = HashMap::new();
        for _ in 0..n_kv {
            let key = read_string(reader)?;
            let type_id = read_u32(reader)?;
            let value = GgufMetadataValue::read(reader, type_id)?;
            entries.insert(key, value);
        }
        Ok(GgufMetadata { entries })
    }

    /// Write every entry, keys in sorted order so output is reproducible.
    pub fn write_kv(&self, w: &mut impl Write) -> Result<()> {
        let mut keys: Vec<&String> = self.entries.keys().collect();
        keys.sort();
        for key in keys {
            let value = &self.entries[key];
            write_string(w, key)?;
            w.write_all(&value.type_id().to_le_bytes())?;
            value.write(w)?;
        }
        Ok(())
    }
}
