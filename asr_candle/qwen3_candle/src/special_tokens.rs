//! The special-token ID contract. These IDs are fixed by
//! the model's vocabulary and are part of the external contract: the
//! generation loop and prompt builder splice on them directly rather than
//! re-deriving them from text at every call.

use std::collections::HashMap;

use crate::error::{Qwen3AsrError, Result};
use crate::tokenizer::Qwen3Tokenizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialTokens {
    pub im_start: u32,
    pub im_end: u32,
    pub endoftext: u32,
    pub audio_start: u32,
    pub audio_end: u32,
    pub audio_pad: u32,
    pub asr_text: u32,
    pub system: u32,
    pub user: u32,
    pub assistant: u32,
    pub newline: u32,
}

impl SpecialTokens {
    /// The fixed special-token contract. Used as a default and as
    /// the expected value to check loaded vocabularies against.
    pub const fn fixed() -> Self {
        Self {
            audio_pad: 151676,
            audio_start: 151669,
            audio_end: 151670,
            im_end: 151645,
            endoftext: 151643,
            im_start: 151644,
            asr_text: 151704,
            newline: 198,
            system: 8948,
            user: 872,
            assistant: 77091,
        }
    }

    pub fn eos(&self) -> u32 {
        self.im_end
    }

    pub fn pad(&self) -> u32 {
        self.endoftext
    }

    /// Verify that a loaded tokenizer's vocabulary agrees with the fixed
    /// ID contract, where the tokenizer exposes a token spelling for the
    /// ID in question. Mismatches are a hard `IncompatibleWeights` error:
    /// running generation against the wrong IDs would silently corrupt the
    /// prompt template.
    pub fn verify_against(&self, tokenizer: &Qwen3Tokenizer) -> Result<()> {
        let checks: &[(&str, u32)] = &[
            ("<|im_start|>", self.im_start),
            ("<|im_end|>", self.im_end),
            ("<|endoftext|>", self.endoftext),
        ];
        for (spelling, expected) in checks {
            if let Some(actual) = tokenizer.token_to_id(spelling) {
                if actual != *expected {
                    return Err(Qwen3AsrError::IncompatibleWeights(format!(
                        "token {spelling} has id {actual}, expected {expected}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// The spelled-out special tokens keyed to their fixed IDs, used to
    /// seed a tiktoken-format tokenizer's side table of special tokens
    /// (which, unlike the BPE vocab, are not embedded in the rank file).
    pub fn as_spelling_table(&self) -> HashMap<String, u32> {
        let mut table = HashMap::with_capacity(8);
        table.insert("<|im_start|>".to_string(), self.im_start);
        table.insert("<|im_end|>".to_string(), self.im_end);
        table.insert("<|endoftext|>".to_string(), self.endoftext);
        table.insert("<|audio_start|>".to_string(), self.audio_start);
        table.insert("<|audio_end|>".to_string(), self.audio_end);
        table.insert("<|audio_pad|>".to_string(), self.audio_pad);
        table.insert("<asr_text>".to_string(), self.asr_text);
        table
    }
}

impl Default for SpecialTokens {
    fn default() -> Self {
        Self::fixed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_ids_match_contract() {
        let t = SpecialTokens::fixed();
        assert_eq!(t.audio_pad, 151676);
        assert_eq!(t.asr_text, 151704);
        assert_eq!(t.eos(), 151645);
        assert_eq!(t.pad(), 151643);
    }
}
