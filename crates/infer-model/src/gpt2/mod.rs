pub mod layers;

pub use layers::Gpt2Block;

use std::sync::Arc;

use infer_tensor::Tensor;

use crate::architecture::{add_in_place, embedding_row, load_shaped, LayerContext};
use crate::config::Config;
use crate::error::{ModelError, Result};
use crate::norm::Norm;
use crate::weights::WeightLoader;

/// GPT-2 weights: token plus learned position embeddings, biased blocks and
/// a layer-normed head.
pub struct Gpt2Model {
    /// `[vocab, embd]`
    pub token_embd: Arc<Tensor>,
    /// `[context, embd]`
    pub position_embd: Tensor,
    pub blocks: Vec<Gpt2Block>,
    pub output_norm: Norm,
    /// `[vocab, embd]`; shares `token_embd` when the file ties them.
    pub output: Arc<Tensor>,
}

impl Gpt2Model {
    pub fn load(config: &Config, weights: &dyn WeightLoader) -> Result<Gpt2Model> {
        if config.kv_head_count != config.head_count {
            return Err(ModelError::InvalidFormat(format!(
                "gpt2 uses one key/value head per query head, got {} and {}",
                config.head_count, config.kv_head_count
            )));
        }
        let e = config.embedding_length;
        let vocab = config.vocabulary_size;

        let token_embd = Arc::new(load_shaped(weights, "token_embd.weight", &[vocab, e])?);
        let position_embd = load_shaped(weights, "position_embd.weight", &[config.context_length, e])?;
        let output_norm = Norm::load_layer(weights, "output_norm", e, config.layer_norm_eps)?;
        let output = if weights.contains("output.weight") {
            Arc::new(load_shaped(weights, "output.weight", &[vocab, e])?)
        } else {
            Arc::clone(&token_embd)
        };
        let blocks = (0..config.layer_count)
            .map(|i| Gpt2Block::load(config, weights, i))
            .collect::<Result<Vec<_>>>()?;

        Ok(Gpt2Model {
            token_embd,
            position_embd,
            blocks,
            output_norm,
            output,
        })
    }

    /// `token_embd[token] + position_embd[position]`.
    pub fn embed(&self, token: u32, position: usize, ctx: &LayerContext<'_>) -> Result<Tensor> {
        let mut out = embedding_row(&self.token_embd, token, ctx)?;
        let pos = self.position_embd.slice(position)?;
        add_in_place(out.data_f32_mut()?, pos.as_f32()?);
        Ok(out)
    }
}
