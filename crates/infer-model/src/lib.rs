//! `infer-model` - GGUF weight loading, transformer families and text
//! generation.
//!
//! This crate provides:
//! - A GGUF reader/writer and a `WeightBlob` over mapped or owned bytes
//! - The `WeightLoader` trait that decodes named tensors to f32
//! - `Config` hyperparameters and a BPE tokenizer read from GGUF metadata
//! - LLaMA and GPT-2 blocks sharing a key-value cache and attention kernel
//! - `Model`, which runs prefill, sampling and the decode loop

pub mod architecture;
pub mod attention;
pub mod blob;
pub mod config;
pub mod error;
pub mod gguf;
pub mod gpt2;
pub mod kv_cache;
pub mod llama;
pub mod model;
pub mod norm;
pub mod tokenizer;
pub mod weights;

pub use architecture::{Family, LayerContext, ModelType, TransformerBlock};
pub use blob::WeightBlob;
pub use config::{Config, LoadOptions};
pub use error::{ModelError, Result};
pub use kv_cache::KvCache;
pub use model::{Generation, Model};
pub use tokenizer::{BpeTokenizer, Tokenizer};
pub use weights::{WeightLoader, Weights};
