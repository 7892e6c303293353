use std::collections::HashMap;

use crate::error::{ModelError, Result};
use crate::gguf::metadata::GgufMetadata;

/// How token strings spell raw text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VocabKind {
    /// SentencePiece style: `▁` marks a space, unknown bytes fall back to
    /// `<0xHH>` tokens.
    SentencePiece,
    /// GPT-2 style: every byte is spelled with one printable code point.
    ByteLevel,
}

/// Token vocabulary loaded from GGUF metadata.
#[derive(Debug, Clone)]
pub struct Vocab {
    pub kind: VocabKind,
    /// Token strings, indexed by token ID.
    pub tokens: Vec<String>,
    /// Merge priority scores, indexed by token ID. Empty if the file has none.
    pub scores: Vec<f32>,
    /// Reverse mapping from token string to token ID.
    pub token_to_id: HashMap<String, u32>,
    pub bos_id: u32,
    pub eos_id: u32,
    /// Substituted for text no token covers.
    pub unknown_id: u32,
}

impl Vocab {
    pub fn new(kind: VocabKind, tokens: Vec<String>, scores: Vec<f32>, bos_id: u32, eos_id: u32) -> Result<Vocab> {
        if !scores.is_empty() && tokens.len() != scores.len() {
            return Err(ModelError::Tokenizer(format!(
                "tokens length ({}) does not match scores length ({})",
                tokens.len(),
                scores.len()
            )));
        }
        let mut token_to_id = HashMap::with_capacity(tokens.len());
        for (id, tok) in tokens.iter().enumerate() {
            token_to_id.entry(tok.clone()).or_insert(id as u32);
        }
        Ok(Vocab {
            kind,
            tokens,
            scores,
            token_to_id,
            bos_id,
            eos_id,
            unknown_id: 0,
        })
    }

    /// Build a vocabulary from GGUF metadata.
    ///
    /// Reads the following metadata keys:
    /// - `tokenizer.ggml.model` (`"gpt2"` selects byte-level spelling)
    /// - `tokenizer.ggml.tokens` (string array of token strings)
    /// - `tokenizer.ggml.scores` (f32 array, optional)
    /// - `tokenizer.ggml.bos_token_id` / `eos_token_id`
    /// - `tokenizer.ggml.unknown_token_id` (optional)
    pub fn from_gguf(metadata: &GgufMetadata) -> Result<Vocab> {
        let kind = match metadata.get_string("tokenizer.ggml.model") {
            Ok("gpt2") => VocabKind::ByteLevel,
            _ => VocabKind::SentencePiece,
        };
        let tokens = metadata.get_string_array("tokenizer.ggml.tokens")?;
        let scores = match metadata.get_f32_array("tokenizer.ggml.scores") {
            Ok(s) => s,
            Err(ModelError::MissingKey(_)) => Vec::new(),
            Err(e) => return Err(e),
        };
        let bos_id = metadata.get_u32("tokenizer.ggml.bos_token_id")?;
        let eos_id = metadata.get_u32("tokenizer.ggml.eos_token_id")?;

        let mut vocab = Vocab::new(kind, tokens, scores, bos_id, eos_id)?;
        if let Ok(unk) = metadata.get_u32("tokenizer.ggml.unknown_token_id") {
            vocab.unknown_id = unk;
        }
        Ok(vocab)
    }

    pub fn id(&self, token: &str) -> Option<u32> {
        self.token_to_id.get(token).copied()
    }

    pub fn score(&self, id: u32) -> f32 {
        self.scores.get(id as usize).copied().unwrap_or(0.0)
    }

    /// Number of tokens in the vocabulary.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Returns true if the vocabulary is empty.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
