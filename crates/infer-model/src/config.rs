use std::sync::Arc;

use infer_tensor::{parallel, DType, TensorPool};

use crate::architecture::ModelType;
use crate::error::{ModelError, Result};
use crate::gguf::GgufMetadata;

/// Default RoPE frequency base.
pub const DEFAULT_ROPE_THETA: f32 = 10000.0;

/// Model hyperparameters plus the working-buffer pool shared by everything
/// that runs this model.
///
/// Built once at load time and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum sequence length the model was trained for.
    pub context_length: usize,
    /// Embedding dimension / hidden size.
    pub embedding_length: usize,
    /// Feed-forward intermediate dimension.
    pub hidden_length: usize,
    /// Number of attention heads for queries.
    pub head_count: usize,
    /// Number of attention heads for keys/values (GQA).
    pub kv_head_count: usize,
    /// Number of transformer layers.
    pub layer_count: usize,
    /// Normalization epsilon.
    pub layer_norm_eps: f32,
    /// RoPE frequency base (theta).
    pub rope_theta: f32,
    /// Vocabulary size (number of output logits).
    pub vocabulary_size: usize,
    pub bos_token: u32,
    pub eos_token: u32,
    pool: Arc<TensorPool>,
}

impl Config {
    /// Hyperparameters with the conventional defaults: feed-forward width
    /// 4 x embedding, one key/value head per query head, RoPE theta 10000,
    /// and a fresh default-sized pool.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context_length: usize,
        embedding_length: usize,
        head_count: usize,
        layer_count: usize,
        layer_norm_eps: f32,
        vocabulary_size: usize,
        bos_token: u32,
        eos_token: u32,
    ) -> Self {
        Config {
            context_length,
            embedding_length,
            hidden_length: embedding_length * 4,
            head_count,
            kv_head_count: head_count,
            layer_count,
            layer_norm_eps,
            rope_theta: DEFAULT_ROPE_THETA,
            vocabulary_size,
            bos_token,
            eos_token,
            pool: Arc::new(TensorPool::default()),
        }
    }

    pub fn with_hidden_length(mut self, hidden_length: usize) -> Self {
        self.hidden_length = hidden_length;
        self
    }

    pub fn with_kv_head_count(mut self, kv_head_count: usize) -> Self {
        self.kv_head_count = kv_head_count;
        self
    }

    pub fn with_rope_theta(mut self, rope_theta: f32) -> Self {
        self.rope_theta = rope_theta;
        self
    }

    pub fn with_pool(mut self, pool: Arc<TensorPool>) -> Self {
        self.pool = pool;
        self
    }

    /// Read the hyperparameters for `model_type` from GGUF metadata.
    ///
    /// Keys are prefixed with the architecture name, e.g.
    /// `llama.embedding_length`. The vocabulary size comes from the length of
    /// `tokenizer.ggml.tokens`.
    pub fn from_gguf(metadata: &GgufMetadata, model_type: ModelType, pool: Arc<TensorPool>) -> Result<Config> {
        let arch = model_type.name();
        let key = |k: &str| format!("{}.{}", arch, k);

        let embedding_length = metadata.get_usize(&key("embedding_length"))?;
        let head_count = metadata.get_usize(&key("attention.head_count"))?;
        let layer_norm_eps = match model_type {
            ModelType::Llama => metadata.get_f32(&key("attention.layer_norm_rms_epsilon"))?,
            ModelType::Gpt2 => metadata.get_f32(&key("attention.layer_norm_epsilon"))?,
        };

        let mut config = Config::new(
            metadata.get_usize(&key("context_length"))?,
            embedding_length,
            head_count,
            metadata.get_usize(&key("block_count"))?,
            layer_norm_eps,
            metadata.array_len("tokenizer.ggml.tokens")?,
            metadata.get_u32("tokenizer.ggml.bos_token_id")?,
            metadata.get_u32("tokenizer.ggml.eos_token_id")?,
        )
        .with_pool(pool);

        if let Ok(hidden) = metadata.get_usize(&key("feed_forward_length")) {
            config = config.with_hidden_length(hidden);
        }
        if let Ok(kv_heads) = metadata.get_usize(&key("attention.head_count_kv")) {
            config = config.with_kv_head_count(kv_heads);
        }
        if let Ok(theta) = metadata.get_f32(&key("rope.freq_base")) {
            config = config.with_rope_theta(theta);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the cross-field constraints the blocks rely on.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(ModelError::InvalidFormat(msg));
        if self.embedding_length == 0 || self.head_count == 0 || self.kv_head_count == 0 {
            return fail("embedding length and head counts must be non-zero".into());
        }
        if self.embedding_length % self.head_count != 0 {
            return fail(format!(
                "embedding length {} is not divisible by {} heads",
                self.embedding_length, self.head_count
            ));
        }
        if self.head_count % self.kv_head_count != 0 {
            return fail(format!(
                "{} query heads cannot be grouped over {} key/value heads",
                self.head_count, self.kv_head_count
            ));
        }
        if self.context_length == 0 || self.vocabulary_size == 0 {
            return fail("context length and vocabulary size must be non-zero".into());
        }
        Ok(())
    }

    /// Dimension of each attention head.
    pub fn head_dim(&self) -> usize {
        self.embedding_length / self.head_count
    }

    /// Width of one position's keys (and of its values).
    pub fn kv_dim(&self) -> usize {
        self.kv_head_count * self.head_dim()
    }

    /// The process-wide working-buffer pool.
    pub fn pool(&self) -> &Arc<TensorPool> {
        &self.pool
    }
}

/// Runtime options for [`Model::load`](crate::Model::load).
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Worker threads, the physical core count by default. Only honored by
    /// the first load in a process.
    pub threads: usize,
    /// Type of activations between kernels. Only F32 is supported.
    pub working_dtype: DType,
    /// Type activations are quantized to before matrix products. Equal to
    /// `working_dtype` for no quantization.
    pub working_qtype: DType,
    /// Cap on bytes cached by the working-buffer pool.
    pub pool_capacity: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            threads: parallel::default_threads(),
            working_dtype: DType::F32,
            working_qtype: DType::F32,
            pool_capacity: TensorPool::DEFAULT_CAPACITY_BYTES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn llama_metadata() -> GgufMetadata {
        let mut m = GgufMetadata::new();
        m.insert("llama.context_length", 128u32);
        m.insert("llama.embedding_length", 64u32);
        m.insert("llama.attention.head_count", 8u32);
        m.insert("llama.attention.head_count_kv", 2u32);
        m.insert("llama.block_count", 3u32);
        m.insert("llama.feed_forward_length", 172u32);
        m.insert("llama.attention.layer_norm_rms_epsilon", 1e-5f32);
        m.insert("tokenizer.ggml.tokens", vec!["a".to_string(); 10]);
        m.insert("tokenizer.ggml.bos_token_id", 1u32);
        m.insert("tokenizer.ggml.eos_token_id", 2u32);
        m
    }

    #[test]
    fn test_new_defaults() {
        let c = Config::new(16, 8, 2, 1, 1e-5, 10, 1, 2);
        assert_eq!(c.hidden_length, 32);
        assert_eq!(c.kv_head_count, 2);
        assert_eq!(c.rope_theta, DEFAULT_ROPE_THETA);
        assert_eq!(c.head_dim(), 4);
        assert_eq!(c.kv_dim(), 8);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_from_gguf_llama() {
        let pool = Arc::new(TensorPool::default());
        let c = Config::from_gguf(&llama_metadata(), ModelType::Llama, Arc::clone(&pool)).unwrap();
        assert_eq!(c.context_length, 128);
        assert_eq!(c.hidden_length, 172);
        assert_eq!(c.kv_head_count, 2);
        assert_eq!(c.kv_dim(), 16);
        assert_eq!(c.vocabulary_size, 10);
        assert_eq!(c.rope_theta, 10000.0);
        assert!(Arc::ptr_eq(c.pool(), &pool));
    }

    #[test]
    fn test_from_gguf_missing_key() {
        let mut m = llama_metadata();
        m.entries.remove("llama.block_count");
        assert!(matches!(
            Config::from_gguf(&m, ModelType::Llama, Arc::new(TensorPool::default())),
            Err(ModelError::MissingKey(_))
        ));
    }

    #[test]
    fn test_load_options_default_to_physical_cores() {
        let options = LoadOptions::default();
        assert_eq!(options.threads, parallel::default_threads());
        assert!(options.threads >= 1);
        assert_eq!(options.working_qtype, DType::F32);
    }

    #[test]
    fn test_validate_rejects_bad_grouping() {
        let c = Config::new(16, 12, 4, 1, 1e-5, 10, 1, 2).with_kv_head_count(3);
        assert!(c.validate().is_err());
        let c = Config::new(16, 10, 4, 1, 1e-5, 10, 1, 2);
        assert!(c.validate().is_err());
    }
}
