use std::sync::Arc;

use infer_tensor::{math, FreqsCis, Tensor, TensorViewMut};

use crate::architecture::{add_in_place, load_shaped, LayerContext, TransformerBlock};
use crate::attention::{causal_attention, AttentionLayout};
use crate::config::Config;
use crate::error::Result;
use crate::kv_cache;
use crate::norm::Norm;
use crate::weights::WeightLoader;

/// Weight tensors for a single LLaMA transformer layer.
///
/// Matrices are `[out_dim, in_dim]` row-major, as GGUF stores them.
pub struct LlamaBlock {
    /// RMS norm before attention.
    pub attn_norm: Norm,
    /// `[embd, embd]`
    pub wq: Tensor,
    /// `[kv_dim, embd]`
    pub wk: Tensor,
    /// `[kv_dim, embd]`
    pub wv: Tensor,
    /// `[embd, embd]`
    pub wo: Tensor,
    /// RMS norm before the feed-forward network.
    pub ffn_norm: Norm,
    /// Gate projection (w1), `[hidden, embd]`.
    pub ffn_gate: Tensor,
    /// Up projection (w3), `[hidden, embd]`.
    pub ffn_up: Tensor,
    /// Down projection (w2), `[embd, hidden]`.
    pub ffn_down: Tensor,
    freqs: Arc<FreqsCis>,
}

impl LlamaBlock {
    /// Load layer `index`:
    /// - `blk.{i}.attn_norm.weight`
    /// - `blk.{i}.attn_q.weight`, `blk.{i}.attn_k.weight`, `blk.{i}.attn_v.weight`
    /// - `blk.{i}.attn_output.weight`
    /// - `blk.{i}.ffn_norm.weight`
    /// - `blk.{i}.ffn_gate.weight`, `blk.{i}.ffn_up.weight`, `blk.{i}.ffn_down.weight`
    pub fn load(
        config: &Config,
        weights: &dyn WeightLoader,
        index: usize,
        freqs: Arc<FreqsCis>,
    ) -> Result<LlamaBlock> {
        let e = config.embedding_length;
        let kv = config.kv_dim();
        let hidden = config.hidden_length;
        let eps = config.layer_norm_eps;
        let name = |t: &str| format!("blk.{}.{}.weight", index, t);
        let prefix = |t: &str| format!("blk.{}.{}", index, t);

        Ok(LlamaBlock {
            attn_norm: Norm::load_rms(weights, &prefix("attn_norm"), e, eps)?,
            wq: load_shaped(weights, &name("attn_q"), &[e, e])?,
            wk: load_shaped(weights, &name("attn_k"), &[kv, e])?,
            wv: load_shaped(weights, &name("attn_v"), &[kv, e])?,
            wo: load_shaped(weights, &name("attn_output"), &[e, e])?,
            ffn_norm: Norm::load_rms(weights, &prefix("ffn_norm"), e, eps)?,
            ffn_gate: load_shaped(weights, &name("ffn_gate"), &[hidden, e])?,
            ffn_up: load_shaped(weights, &name("ffn_up"), &[hidden, e])?,
            ffn_down: load_shaped(weights, &name("ffn_down"), &[e, hidden])?,
            freqs,
        })
    }
}

impl TransformerBlock for LlamaBlock {
    /// Pre-norm attention then a SwiGLU feed-forward network, each added
    /// back onto the residual stream:
    ///
    /// ```text
    /// h   = x + wo · attn(rope(wq · rms(x)), rope(wk · rms(x)), wv · rms(x))
    /// out = h + w2 · (silu(w1 · rms(h)) * (w3 · rms(h)))
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
        let kv_dim = config.kv_dim();
        let head_dim = config.head_dim();

        // Attention.
        let normed = self.attn_norm.forward(input, ctx)?;
        let quantized = ctx.quantize(&normed)?;
        let x = quantized.as_ref().unwrap_or(&normed);

        let mut q = ctx.acquire(&[e])?;
        ctx.matvec(&self.wq, x, q.data_f32_mut()?)?;
        math::apply_rope(q.data_f32_mut()?, &self.freqs, position, config.head_count, head_dim)?;
        {
            let (keys, values) = kv_cache::row_mut(kv, position, e)?;
            ctx.matvec(&self.wk, x, &mut keys[..kv_dim])?;
            ctx.matvec(&self.wv, x, &mut values[..kv_dim])?;
            math::apply_rope(&mut keys[..kv_dim], &self.freqs, position, config.kv_head_count, head_dim)?;
        }
        drop(quantized);
        drop(normed);

        let mut attn = ctx.acquire(&[e])?;
        causal_attention(
            q.data_f32()?,
            kv.as_f32()?,
            position,
            &AttentionLayout::from_config(config),
            ctx.backend,
            attn.data_f32_mut()?,
        )?;
        drop(q);

        let attn_in = ctx.quantize(&attn)?;
        let mut h = ctx.acquire(&[e])?;
        ctx.matvec(&self.wo, attn_in.as_ref().unwrap_or(&attn), h.data_f32_mut()?)?;
        add_in_place(h.data_f32_mut()?, input.data_f32()?);
        drop(attn_in);
        drop(attn);

        // Feed-forward.
        let normed = self.ffn_norm.forward(&h, ctx)?;
        let quantized = ctx.quantize(&normed)?;
        let x = quantized.as_ref().unwrap_or(&normed);

        let hidden = config.hidden_length;
        let mut gate = ctx.acquire(&[hidden])?;
        let mut up = ctx.acquire(&[hidden])?;
        ctx.matvec(&self.ffn_gate, x, gate.data_f32_mut()?)?;
        ctx.matvec(&self.ffn_up, x, up.data_f32_mut()?)?;
        for (g, &u) in gate.data_f32_mut()?.iter_mut().zip(up.data_f32()?) {
            *g = math::silu(*g) * u;
        }
        drop(up);

        let gate_in = ctx.quantize(&gate)?;
        let mut out = ctx.acquire(&[e])?;
        ctx.matvec(&self.ffn_down, gate_in.as_ref().unwrap_or(&gate), out.data_f32_mut()?)?;
        add_in_place(out.data_f32_mut()?, h.data_f32()?);
        Ok(out)
    }
}
