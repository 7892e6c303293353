use std::fmt;
use std::str::FromStr;

use infer_tensor::{ComputeBackend, DType, Tensor, TensorViewMut};

use crate::config::Config;
use crate::error::{ModelError, Result};
use crate::gpt2::Gpt2Model;
use crate::llama::LlamaModel;
use crate::norm::Norm;
use crate::weights::WeightLoader;

/// Model families this crate can run, keyed by `general.architecture`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelType {
    Llama,
    Gpt2,
}

impl ModelType {
    /// Architecture name as written in GGUF metadata and key prefixes.
    pub fn name(&self) -> &'static str {
        match self {
            ModelType::Llama => "llama",
            ModelType::Gpt2 => "gpt2",
        }
    }
}

impl FromStr for ModelType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "llama" => Ok(ModelType::Llama),
            "gpt2" => Ok(ModelType::Gpt2),
            other => Err(ModelError::UnsupportedArchitecture(other.to_string())),
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything a layer needs besides its own weights.
pub struct LayerContext<'a> {
    pub config: &'a Config,
    pub backend: &'a dyn ComputeBackend,
    /// F32 for no activation quantization.
    pub working_qtype: DType,
}

impl LayerContext<'_> {
    /// Zeroed f32 working tensor from the pool.
    pub fn acquire(&self, dims: &[usize]) -> Result<Tensor> {
        Ok(self.config.pool().acquire(DType::F32, dims)?)
    }

    /// `input` converted to the working quantized type, or `None` when
    /// activations stay in f32.
    pub fn quantize(&self, input: &Tensor) -> Result<Option<Tensor>> {
        if self.working_qtype == DType::F32 {
            return Ok(None);
        }
        let q = self
            .backend
            .quantize(&input.view(), self.working_qtype, self.config.pool())?;
        Ok(Some(q))
    }

    /// `out = weights · input` row by row.
    pub fn matvec(&self, weights: &Tensor, input: &Tensor, out: &mut [f32]) -> Result<()> {
        Ok(self.backend.matvec(&weights.view(), &input.view(), out)?)
    }
}

/// One transformer layer: maps the hidden state at `position` to the next
/// layer's hidden state, appending this position's keys and values to `kv`.
///
/// `kv` is the layer's `[max_tokens, 2 * embedding_length]` slice of the
/// session's cache; rows `0..position` must already hold earlier positions.
pub trait TransformerBlock: Send + Sync {
    fn forward(
        &self,
        input: &Tensor,
        position: usize,
        kv: &mut TensorViewMut<'_>,
        ctx: &LayerContext<'_>,
    ) -> Result<Tensor>;
}

/// A loaded model family: embeddings, layers and the output head.
pub enum Family {
    Llama(LlamaModel),
    Gpt2(Gpt2Model),
}

impl Family {
    pub fn load(model_type: ModelType, config: &Config, weights: &dyn WeightLoader) -> Result<Family> {
        Ok(match model_type {
            ModelType::Llama => Family::Llama(LlamaModel::load(config, weights)?),
            ModelType::Gpt2 => Family::Gpt2(Gpt2Model::load(config, weights)?),
        })
    }

    /// Hidden state for `token` entering the first layer at `position`.
    pub fn embed(&self, token: u32, position: usize, ctx: &LayerContext<'_>) -> Result<Tensor> {
        match self {
            Family::Llama(m) => m.embed(token, ctx),
            Family::Gpt2(m) => m.embed(token, position, ctx),
        }
    }

    pub fn layer(&self, index: usize) -> Result<&dyn TransformerBlock> {
        let block: Option<&dyn TransformerBlock> = match self {
            Family::Llama(m) => m.blocks.get(index).map(|b| b as &dyn TransformerBlock),
            Family::Gpt2(m) => m.blocks.get(index).map(|b| b as &dyn TransformerBlock),
        };
        block.ok_or_else(|| ModelError::Other(format!("no layer {}", index)))
    }

    pub fn output_norm(&self) -> &Norm {
        match self {
            Family::Llama(m) => &m.output_norm,
            Family::Gpt2(m) => &m.output_norm,
        }
    }

    /// `[vocabulary_size, embedding_length]` projection to logits.
    pub fn output_weights(&self) -> &Tensor {
        match self {
            Family::Llama(m) => &m.output,
            Family::Gpt2(m) => &m.output,
        }
    }
}

/// Load `name` and check it has exactly `dims`.
pub(crate) fn load_shaped(weights: &dyn WeightLoader, name: &str, dims: &[usize]) -> Result<Tensor> {
    let t = weights.load(name)?;
    if t.shape().dims() != dims {
        return Err(ModelError::InvalidFormat(format!(
            "{} has shape {:?}, expected {:?}",
            name,
            t.shape().dims(),
            dims
        )));
    }
    Ok(t)
}

/// Copy row `token` of an embedding table into a fresh working tensor.
pub(crate) fn embedding_row(table: &Tensor, token: u32, ctx: &LayerContext<'_>) -> Result<Tensor> {
    let vocab = ctx.config.vocabulary_size;
    if token as usize >= vocab {
        return Err(ModelError::PreconditionViolation(format!(
            "token id {} exceeds vocab size {}",
            token, vocab
        )));
    }
    let row = table.slice(token as usize)?;
    let mut out = ctx.acquire(&[ctx.config.embedding_length])?;
    out.copy_from(row.as_f32()?)?;
    Ok(out)
}

/// `dst[i] += src[i]`.
pub(crate) fn add_in_place(dst: &mut [f32], src: &[f32]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d += s;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_type_names() {
        assert_eq!("llama".parse::<ModelType>().unwrap(), ModelType::Llama);
        assert_eq!("gpt2".parse::<ModelType>().unwrap(), ModelType::Gpt2);
        assert_eq!(ModelType::Gpt2.to_string(), "gpt2");
        assert!(matches!(
            "mamba".parse::<ModelType>(),
            Err(ModelError::UnsupportedArchitecture(_))
        ));
    }
}
