use std::collections::HashMap;

use crate::error::{ModelError, Result};
use crate::gguf::metadata::GgufMetadata;

use super::vocab::{Vocab, VocabKind};
use super::Tokenizer;

/// SentencePiece word-boundary marker.
const SPACE_MARKER: char = '\u{2581}';

/// Byte-Pair Encoding tokenizer loaded from GGUF metadata.
///
/// Merges follow the ranked `tokenizer.ggml.merges` list when the file has
/// one, and otherwise the per-token scores (highest-scoring merge first).
#[derive(Debug, Clone)]
pub struct BpeTokenizer {
    pub vocab: Vocab,
    /// Map from merge pair to priority rank (lower rank = higher priority).
    merge_ranks: HashMap<(String, String), usize>,
    /// Prepend a space before encoding (SentencePiece vocabularies).
    add_space_prefix: bool,
    byte_to_char: [char; 256],
    char_to_byte: HashMap<char, u8>,
}

impl BpeTokenizer {
    pub fn new(vocab: Vocab, merges: &[String]) -> Result<BpeTokenizer> {
        let mut merge_ranks = HashMap::with_capacity(merges.len());
        for (rank, entry) in merges.iter().enumerate() {
            // Each entry is "left right", split on the first space.
            let (left, right) = entry.split_once(' ').ok_or_else(|| {
                ModelError::Tokenizer(format!("invalid merge entry: {:?}", entry))
            })?;
            merge_ranks
                .entry((left.to_string(), right.to_string()))
                .or_insert(rank);
        }

        let byte_to_char = byte_level_alphabet();
        let char_to_byte = byte_to_char
            .iter()
            .enumerate()
            .map(|(b, &c)| (c, b as u8))
            .collect();
        let add_space_prefix = vocab.kind == VocabKind::SentencePiece;

        Ok(BpeTokenizer {
            vocab,
            merge_ranks,
            add_space_prefix,
            byte_to_char,
            char_to_byte,
        })
    }

    /// Load a tokenizer from GGUF metadata: the vocabulary via
    /// [`Vocab::from_gguf`], merges from `tokenizer.ggml.merges`, and
    /// `tokenizer.ggml.add_space_prefix` if present.
    pub fn from_gguf(metadata: &GgufMetadata) -> Result<BpeTokenizer> {
        let vocab = Vocab::from_gguf(metadata)?;
        let merges = match metadata.get_string_array("tokenizer.ggml.merges") {
            Ok(m) => m,
            Err(ModelError::MissingKey(_)) => Vec::new(),
            Err(e) => return Err(e),
        };
        let mut tokenizer = BpeTokenizer::new(vocab, &merges)?;
        if let Ok(prefix) = metadata.get_bool("tokenizer.ggml.add_space_prefix") {
            tokenizer.add_space_prefix = prefix;
        }
        Ok(tokenizer)
    }

    pub fn bos_id(&self) -> u32 {
        self.vocab.bos_id
    }

    pub fn eos_id(&self) -> u32 {
        self.vocab.eos_id
    }

    /// Split `text` into initial symbols that all exist in the vocabulary
    /// where possible.
    fn initial_symbols(&self, text: &str) -> Vec<String> {
        match self.vocab.kind {
            VocabKind::ByteLevel => text
                .bytes()
                .map(|b| self.byte_to_char[b as usize].to_string())
                .collect(),
            VocabKind::SentencePiece => {
                let mut normalized = String::with_capacity(text.len() + 3);
                if self.add_space_prefix {
                    normalized.push(SPACE_MARKER);
                }
                normalized.extend(text.chars().map(|c| if c == ' ' { SPACE_MARKER } else { c }));

                let mut symbols = Vec::with_capacity(normalized.len());
                let mut buf = [0u8; 4];
                for ch in normalized.chars() {
                    let s = ch.to_string();
                    if self.vocab.token_to_id.contains_key(&s) {
                        symbols.push(s);
                        continue;
                    }
                    // Byte fallback: <0xHH> per UTF-8 byte.
                    for &b in ch.encode_utf8(&mut buf).as_bytes() {
                        symbols.push(format!("<0x{:02X}>", b));
                    }
                }
                symbols
            }
        }
    }

    /// The adjacent pair to merge next, if any.
    fn best_merge(&self, symbols: &[String]) -> Option<usize> {
        let pairs = symbols.windows(2).enumerate();
        if !self.merge_ranks.is_empty() {
            pairs
                .filter_map(|(i, w)| {
                    self.merge_ranks
                        .get(&(w[0].clone(), w[1].clone()))
                        .map(|&rank| (rank, i))
                })
                .min()
                .map(|(_, i)| i)
        } else {
            let mut best: Option<(f32, usize)> = None;
            for (i, w) in pairs {
                let merged = format!("{}{}", w[0], w[1]);
                if let Some(id) = self.vocab.id(&merged) {
                    let score = self.vocab.score(id);
                    if best.map_or(true, |(s, _)| score > s) {
                        best = Some((score, i));
                    }
                }
            }
            best.map(|(_, i)| i)
        }
    }
}

impl Tokenizer for BpeTokenizer {
    /// 1. Split the text into initial symbols (characters, or bytes for
    ///    byte-level vocabularies).
    /// 2. Repeatedly apply the best available merge until none applies.
    /// 3. Map the resulting symbols to ids; unknown symbols map to the
    ///    unknown-token id.
    fn encode(&self, text: &str) -> Vec<u32> {
        if text.is_empty() {
            return Vec::new();
        }

        let mut symbols = self.initial_symbols(text);
        while symbols.len() >= 2 {
            let Some(i) = self.best_merge(&symbols) else {
                break;
            };
            let right = symbols.remove(i + 1);
            symbols[i].push_str(&right);
        }

        symbols
            .iter()
            .map(|s| self.vocab.id(s).unwrap_or(self.vocab.unknown_id))
            .collect()
    }

    /// Byte tokens `<0xHH>` decode to their byte; byte-level spellings are
    /// mapped back to raw bytes; `▁` becomes a space.
    fn decode(&self, token: u32) -> Result<String> {
        let tok = self.vocab.tokens.get(token as usize).ok_or_else(|| {
            ModelError::Tokenizer(format!(
                "token id {} outside vocabulary of {}",
                token,
                self.vocab.len()
            ))
        })?;

        if let Some(hex) = tok.strip_prefix("<0x").and_then(|t| t.strip_suffix('>')) {
            if let Ok(byte) = u8::from_str_radix(hex, 16) {
                return Ok(String::from_utf8_lossy(&[byte]).into_owned());
            }
        }

        match self.vocab.kind {
            VocabKind::ByteLevel => {
                let bytes: Vec<u8> = tok
                    .chars()
                    .map(|c| self.char_to_byte.get(&c).copied())
                    .collect::<Option<_>>()
                    .unwrap_or_else(|| tok.as_bytes().to_vec());
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
            VocabKind::SentencePiece => Ok(tok.replace(SPACE_MARKER, " ")),
        }
    }
}

/// GPT-2's reversible byte -> printable code point table.
///
/// Printable Latin-1 bytes map to themselves; the rest are shifted to code
/// points from U+0100 upward in byte order.
fn byte_level_alphabet() -> [char; 256] {
    let mut table = ['\0'; 256];
    let mut next = 256u32;
    for (b, slot) in table.iter_mut().enumerate() {
        let printable = matches!(b, 0x21..=0x7E | 0xA1..=0xAC | 0xAE..=0xFF);
        let code = if printable {
            b as u32
        } else {
            next += 1;
            next - 1
        };
        *slot = char::from_u32(code).unwrap_or('\u{FFFD}');
    }
    table
}
