use infer_tensor::{math, Tensor, TensorViewMut};

use crate::architecture::{add_in_place, load_shaped, LayerContext, TransformerBlock};
use crate::attention::{causal_attention, AttentionLayout};
use crate::config::Config;
use crate::error::Result;
use crate::kv_cache;
use crate::norm::Norm;
use crate::weights::WeightLoader;

/// Weight tensors for a single GPT-2 layer. Every projection carries a bias.
pub struct Gpt2Block {
    pub attn_norm: Norm,
    /// Fused query/key/value projection, `[3 * embd, embd]`.
    pub attn_qkv: Tensor,
    pub attn_qkv_bias: Tensor,
    pub attn_output: Tensor,
    pub attn_output_bias: Tensor,
    pub ffn_norm: Norm,
    /// `[hidden, embd]`
    pub ffn_up: Tensor,
    pub ffn_up_bias: Tensor,
    /// `[embd, hidden]`
    pub ffn_down: Tensor,
    pub ffn_down_bias: Tensor,
}

impl Gpt2Block {
    pub fn load(config: &Config, weights: &dyn WeightLoader, index: usize) -> Result<Gpt2Block> {
        let e = config.embedding_length;
        let hidden = config.hidden_length;
        let eps = config.layer_norm_eps;
        let prefix = |t: &str| format!("blk.{}.{}", index, t);
        let load = |t: &str, part: &str, dims: &[usize]| {
            load_shaped(weights, &format!("blk.{}.{}.{}", index, t, part), dims)
        };

        Ok(Gpt2Block {
            attn_norm: Norm::load_layer(weights, &prefix("attn_norm"), e, eps)?,
            attn_qkv: load("attn_qkv", "weight", &[3 * e, e])?,
            attn_qkv_bias: load("attn_qkv", "bias", &[3 * e])?,
            attn_output: load("attn_output", "weight", &[e, e])?,
            attn_output_bias: load("attn_output", "bias", &[e])?,
            ffn_norm: Norm::load_layer(weights, &prefix("ffn_norm"), e, eps)?,
            ffn_up: load("ffn_up", "weight", &[hidden, e])?,
            ffn_up_bias: load("ffn_up", "bias", &[hidden])?,
            ffn_down: load("ffn_down", "weight", &[e, hidden])?,
            ffn_down_bias: load("ffn_down", "bias", &[e])?,
        })
    }
}

impl TransformerBlock for Gpt2Block {
    /// ```text
    /// h   = x + wo · attn(split(wqkv · ln1(x) + b)) + bo
    /// out = h + w2 · gelu(w1 · ln2(h) + b1) + b2
    /// ```
    fn forward(
        &self,
        input: &Tensor,
        position: usize,
        kv: &mut TensorViewMut<'_>,
        ctx: &LayerContext<'_>,
    ) -> Result<Tensor> {
        let config = ctx.config;
        let e = config.embedding_length;

        // Attention.
        let normed = self.attn_norm.forward(input, ctx)?;
        let quantized = ctx.quantize(&normed)?;
        let mut qkv = ctx.acquire(&[3 * e])?;
        ctx.matvec(
            &self.attn_qkv,
            quantized.as_ref().unwrap_or(&normed),
            qkv.data_f32_mut()?,
        )?;
        add_in_place(qkv.data_f32_mut()?, self.attn_qkv_bias.data_f32()?);
        drop(quantized);
        drop(normed);

        let qkv = qkv.data_f32()?;
        {
            let (keys, values) = kv_cache::row_mut(kv, position, e)?;
            keys.copy_from_slice(&qkv[e..2 * e]);
            values.copy_from_slice(&qkv[2 * e..]);
        }
        let mut attn = ctx.acquire(&[e])?;
        causal_attention(
            &qkv[..e],
            kv.as_f32()?,
            position,
            &AttentionLayout::from_config(config),
            ctx.backend,
            attn.data_f32_mut()?,
        )?;

        let attn_in = ctx.quantize(&attn)?;
        let mut h = ctx.acquire(&[e])?;
        ctx.matvec(&self.attn_output, attn_in.as_ref().unwrap_or(&attn), h.data_f32_mut()?)?;
        add_in_place(h.data_f32_mut()?, self.attn_output_bias.data_f32()?);
        add_in_place(h.data_f32_mut()?, input.data_f32()?);
        drop(attn_in);
        drop(attn);

        // Feed-forward.
        let normed = self.ffn_norm.forward(&h, ctx)?;
        let quantized = ctx.quantize(&normed)?;
        let mut up = ctx.acquire(&[config.hidden_length])?;
        ctx.matvec(&self.ffn_up, quantized.as_ref().unwrap_or(&normed), up.data_f32_mut()?)?;
        for (u, &b) in up.data_f32_mut()?.iter_mut().zip(self.ffn_up_bias.data_f32()?) {
            *u = math::gelu(*u + b);
        }
        drop(quantized);
        drop(normed);

        let up_in = ctx.quantize(&up)?;
        let mut out = ctx.acquire(&[e])?;
        ctx.matvec(&self.ffn_down, up_in.as_ref().unwrap_or(&up), out.data_f32_mut()?)?;
        add_in_place(out.data_f32_mut()?, self.ffn_down_bias.data_f32()?);
        add_in_place(out.data_f32_mut()?, h.data_f32()?);
        Ok(out)
    }
}
