use infer_tensor::{math, Tensor};

use crate::architecture::{load_shaped, LayerContext};
use crate::error::Result;
use crate::weights::WeightLoader;

/// A normalization layer and its learned parameters.
pub enum Norm {
    /// LLaMA-style RMS norm.
    Rms { weight: Tensor, eps: f32 },
    /// GPT-2-style layer norm.
    Layer { weight: Tensor, bias: Tensor, eps: f32 },
}

impl Norm {
    /// `{prefix}.weight` as an RMS norm.
    pub fn load_rms(weights: &dyn WeightLoader, prefix: &str, dim: usize, eps: f32) -> Result<Norm> {
        Ok(Norm::Rms {
            weight: load_shaped(weights, &format!("{}.weight", prefix), &[dim])?,
            eps,
        })
    }

    /// `{prefix}.weight` and `{prefix}.bias` as a layer norm.
    pub fn load_layer(weights: &dyn WeightLoader, prefix: &str, dim: usize, eps: f32) -> Result<Norm> {
        Ok(Norm::Layer {
            weight: load_shaped(weights, &format!("{}.weight", prefix), &[dim])?,
            bias: load_shaped(weights, &format!("{}.bias", prefix), &[dim])?,
            eps,
        })
    }

    /// Normalize `input` into a fresh working tensor.
    pub fn forward(&self, input: &Tensor, ctx: &LayerContext<'_>) -> Result<Tensor> {
        let x = input.data_f32()?;
        let mut out = ctx.acquire(&[x.len()])?;
        match self {
            Norm::Rms { weight, eps } => {
                math::rms_norm(x, weight.data_f32()?, *eps, out.data_f32_mut()?)?
            }
            Norm::Layer { weight, bias, eps } => math::layer_norm(
                x,
                weight.data_f32()?,
                bias.data_f32()?,
                *eps,
                out.data_f32_mut()?,
            )?,
        }
        Ok(out)
    }
}
