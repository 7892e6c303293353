//! Text <-> token id conversion.

pub mod bpe;
pub mod vocab;

pub use bpe::BpeTokenizer;
pub use vocab::{Vocab, VocabKind};

use crate::error::Result;

/// Converts between text and token ids.
pub trait Tokenizer: Send + Sync {
    /// Encode `text` without adding any special tokens.
    fn encode(&self, text: &str) -> Vec<u32>;

    /// Text of a single token.
    fn decode(&self, token: u32) -> Result<String>;
}
