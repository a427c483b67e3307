//! Dual-format tokenizer support: Qwen3-ASR checkpoints
//! ship either a classic `vocab.json` + `merges.txt` byte-level BPE pair, or
//! a single tiktoken-style base64 rank file with special tokens supplied
//! externally. [`Qwen3Tokenizer`] loads whichever is present on disk and
//! exposes one `encode`/`decode` surface over both.

mod bpe;
mod byte_level;
mod pretokenize;
mod tiktoken;

use std::collections::HashMap;
use std::path::Path;

pub use bpe::BpeTokenizer;
pub use tiktoken::TiktokenTokenizer;

use crate::error::{Qwen3AsrError, Result};
use crate::special_tokens::SpecialTokens;

pub enum Qwen3Tokenizer {
    Bpe(BpeTokenizer),
    Tiktoken(TiktokenTokenizer),
}

impl Qwen3Tokenizer {
    /// Looks for `vocab.json`+`merges.txt` first, falling back to a
    /// `*.tiktoken` rank file in the same directory.
    pub fn load_from_dir(dir: &Path, specials: &SpecialTokens) -> Result<Self> {
        let vocab_path = dir.join("vocab.json");
        let merges_path = dir.join("merges.txt");
        if vocab_path.is_file() && merges_path.is_file() {
            return Ok(Self::Bpe(BpeTokenizer::load(&vocab_path, &merges_path)?));
        }

        let rank_path = dir.join("qwen.tiktoken");
        if rank_path.is_file() {
            let table = specials.as_spelling_table();
            return Ok(Self::Tiktoken(TiktokenTokenizer::load(&rank_path, table)?));
        }

        Err(Qwen3AsrError::TokenizerFormat(format!(
            "no vocab.json/merges.txt or qwen.tiktoken found under {}",
            dir.display()
        )))
    }

    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        match self {
            Self::Bpe(t) => t.encode(text),
            Self::Tiktoken(t) => t.encode(text),
        }
    }

    pub fn decode(&self, ids: &[u32]) -> String {
        match self {
            Self::Bpe(t) => t.decode(ids),
            Self::Tiktoken(t) => t.decode(ids),
        }
    }

    /// Resolves a spelled-out special token (e.g. `<|im_start|>`) to its id,
    /// used by [`SpecialTokens::verify_against`] to cross-check the fixed
    /// contract against whatever vocabulary actually shipped with the
    /// checkpoint.
    pub fn token_to_id(&self, spelling: &str) -> Option<u32> {
        match self {
            Self::Bpe(t) => t.token_to_id(spelling),
            Self::Tiktoken(t) => t.special_token_id(spelling),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tokenizer_files_is_a_format_error() {
        let dir = std::env::temp_dir().join(format!("qwen3_tok_missing_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let specials = SpecialTokens::fixed();
        let err = Qwen3Tokenizer::load_from_dir(&dir, &specials).unwrap_err();
        assert!(matches!(err, Qwen3AsrError::TokenizerFormat(_)));
    }
}
