pub mod layers;

pub use layers::LlamaBlock;

use std::sync::Arc;

use tracing::debug;

use infer_tensor::{math, Tensor};

use crate::architecture::{embedding_row, load_shaped, LayerContext};
use crate::config::Config;
use crate::error::Result;
use crate::norm::Norm;
use crate::weights::WeightLoader;

/// LLaMA weights: token embeddings, RoPE blocks and an RMS-normed head.
pub struct LlamaModel {
    /// `[vocab, embd]`
    pub token_embd: Arc<Tensor>,
    pub blocks: Vec<LlamaBlock>,
    pub output_norm: Norm,
    /// `[vocab, embd]`; shares `token_embd` when the file ties them.
    pub output: Arc<Tensor>,
}

impl LlamaModel {
    /// Load all LLaMA weights.
    ///
    /// `output.weight` falls back to `token_embd.weight` when absent (tied
    /// embeddings). The RoPE table covers the whole context window and is
    /// shared by every block.
    pub fn load(config: &Config, weights: &dyn WeightLoader) -> Result<LlamaModel> {
        let e = config.embedding_length;
        let vocab = config.vocabulary_size;

        let token_embd = Arc::new(load_shaped(weights, "token_embd.weight", &[vocab, e])?);
        let output_norm = Norm::load_rms(weights, "output_norm", e, config.layer_norm_eps)?;
        let output = if weights.contains("output.weight") {
            Arc::new(load_shaped(weights, "output.weight", &[vocab, e])?)
        } else {
            debug!("no output.weight, using tied token embeddings");
            Arc::clone(&token_embd)
        };

        let freqs = Arc::new(math::precompute_freqs_cis(
            config.head_dim(),
            config.context_length,
            config.rope_theta as f64,
        ));
        let blocks = (0..config.layer_count)
            .map(|i| LlamaBlock::load(config, weights, i, Arc::clone(&freqs)))
            .collect::<Result<Vec<_>>>()?;

        Ok(LlamaModel {
            token_embd,
            blocks,
            output_norm,
            output,
        })
    }

    pub fn embed(&self, token: u32, ctx: &LayerContext<'_>) -> Result<Tensor> {
        embedding_row(&self.token_embd, token, ctx)
    }
}
