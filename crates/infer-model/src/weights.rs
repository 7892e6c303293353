use std::sync::Arc;

use infer_tensor::{DType, Shape, Tensor, TensorError};

use crate::blob::WeightBlob;
use crate::error::{ModelError, Result};

/// Source of named weight tensors, decoded to the f32 working type.
pub trait WeightLoader: Send + Sync {
    /// Decode the tensor called `name`.
    ///
    /// - `NotFound` if no tensor has that name.
    /// - `InvalidFormat` if its recorded shape has no dimensions, or its byte
    ///   range does not fit the blob or the element count.
    /// - `UnsupportedType` for anything but F32, F16 and BF16.
    fn load(&self, name: &str) -> Result<Tensor>;

    fn contains(&self, name: &str) -> bool;

    /// Storage type the model's weights were saved in.
    fn model_dtype(&self) -> DType;
}

/// [`WeightLoader`] over a [`WeightBlob`].
#[derive(Debug, Clone)]
pub struct Weights {
    blob: Arc<WeightBlob>,
    model_dtype: DType,
}

impl Weights {
    pub fn new(blob: Arc<WeightBlob>) -> Self {
        let model_dtype = blob.dominant_dtype().unwrap_or(DType::F32);
        Weights { blob, model_dtype }
    }

    pub fn blob(&self) -> &Arc<WeightBlob> {
        &self.blob
    }
}

impl WeightLoader for Weights {
    fn load(&self, name: &str) -> Result<Tensor> {
        let info = self
            .blob
            .get(name)
            .ok_or_else(|| ModelError::NotFound(format!("tensor {}", name)))?;

        let shape = Shape::from_slice(&info.shape)
            .map_err(|e| ModelError::InvalidFormat(format!("invalid shape for {}: {}", name, e)))?;
        let dtype = match info.dtype() {
            Some(d) if !d.is_quantized() => d,
            Some(d) => {
                return Err(ModelError::UnsupportedType(format!("{} for {}", d, name)));
            }
            None => {
                return Err(ModelError::UnsupportedType(format!(
                    "GGUF type {} for {}",
                    info.type_id, name
                )));
            }
        };

        let raw = self.blob.data(name, info)?;
        if dtype.checked_storage_bytes(shape.numel()) != Some(raw.len()) {
            return Err(ModelError::InvalidFormat(format!(
                "{}: {} bytes do not hold {} {} values",
                name,
                raw.len(),
                shape.numel(),
                dtype
            )));
        }
        let mut data = vec![0.0f32; shape.numel()];
        dtype.decode_le(raw, &mut data).map_err(|e| match e {
            TensorError::UnsupportedDType(msg) => ModelError::UnsupportedType(msg),
            other => ModelError::InvalidFormat(format!("{}: {}", name, other)),
        })?;
        Ok(Tensor::new(data, shape)?)
    }

    fn contains(&self, name: &str) -> bool {
        self.blob.contains(name)
    }

    fn model_dtype(&self) -> DType {
        self.model_dtype
    }
}
