//! tiktoken-style rank file: one base64-encoded byte sequence and its rank
//! per line, with special tokens supplied out of band rather than embedded
//! in the rank file.

use std::collections::HashMap;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::{Qwen3AsrError, Result};

pub struct TiktokenTokenizer {
    rank_of_bytes: HashMap<Vec<u8>, u32>,
    bytes_of_rank: HashMap<u32, Vec<u8>>,
    specials: HashMap<String, u32>,
    special_by_id: HashMap<u32, String>,
}

impl TiktokenTokenizer {
    pub fn load(rank_file: &Path, specials: HashMap<String, u32>) -> Result<Self> {
        let text = std::fs::read_to_string(rank_file)
            .map_err(|e| Qwen3AsrError::TokenizerFormat(format!("reading rank file: {e}")))?;

        let mut rank_of_bytes = HashMap::new();
        let mut bytes_of_rank = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(token_b64), Some(rank_str)) = (parts.next(), parts.next()) else {
                continue;
            };
            let bytes = BASE64.decode(token_b64).map_err(|e| {
                Qwen3AsrError::TokenizerFormat(format!("invalid base64 token {token_b64:?}: {e}"))
            })?;
            let rank: u32 = rank_str.parse().map_err(|_| {
                Qwen3AsrError::TokenizerFormat(format!("invalid rank {rank_str:?}"))
            })?;
            bytes_of_rank.insert(rank, bytes.clone());
            rank_of_bytes.insert(bytes, rank);
        }

        let special_by_id = specials.iter().map(|(k, &v)| (v, k.clone())).collect();

        Ok(Self {
            rank_of_bytes,
            bytes_of_rank,
            specials,
            special_by_id,
        })
    }

    /// Greedy pair-merge over raw bytes: repeatedly merges the adjacent
    /// byte-run pair with the lowest assigned rank, same algorithm as BPE
    /// merging but operating directly on byte slices rather than a
    /// unicode-mapped string (tiktoken rank files are already byte-exact).
    fn merge_bytes(&self, word: &[u8]) -> Vec<Vec<u8>> {
        let mut pieces: Vec<Vec<u8>> = word.iter().map(|&b| vec![b]).collect();
        if pieces.len() < 2 {
            return pieces;
        }
        loop {
            let mut best: Option<(u32, usize)> = None;
            for i in 0..pieces.len() - 1 {
                let mut combined = pieces[i].clone();
                combined.extend_from_slice(&pieces[i + 1]);
                if let Some(&rank) = self.rank_of_bytes.get(&combined) {
                    if best.map(|(r, _)| rank < r).unwrap_or(true) {
                        best = Some((rank, i));
                    }
                }
            }
            let Some((_, idx)) = best else {
                break;
            };
            let mut merged = pieces[idx].clone();
            merged.extend_from_slice(&pieces[idx + 1]);
            pieces.splice(idx..idx + 2, [merged]);
        }
        pieces
    }

    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let mut ids = Vec::new();
        for chunk in crate::tokenizer::pretokenize::pretokenize(text) {
            for piece in self.merge_bytes(chunk.as_bytes()) {
                let id = self.rank_of_bytes.get(&piece).copied().ok_or_else(|| {
                    Qwen3AsrError::TokenizerFormat(format!(
                        "no rank entry for byte piece of len {}",
                        piece.len()
                    ))
                })?;
                ids.push(id);
            }
        }
        Ok(ids)
    }

    pub fn decode(&self, ids: &[u32]) -> String {
        let mut out = String::new();
        let mut byte_buf: Vec<u8> = Vec::new();
        let flush = |buf: &mut Vec<u8>, out: &mut String| {
            if !buf.is_empty() {
                out.push_str(&String::from_utf8_lossy(buf));
                buf.clear();
            }
        };
        for &id in ids {
            if self.special_by_id.contains_key(&id) {
                flush(&mut byte_buf, &mut out);
                continue;
            }
            if let Some(bytes) = self.bytes_of_rank.get(&id) {
                byte_buf.extend_from_slice(bytes);
            }
        }
        flush(&mut byte_buf, &mut out);
        out
    }

    pub fn special_token_id(&self, spelling: &str) -> Option<u32> {
        self.specials.get(spelling).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_rank_file(lines: &[(&[u8], u32)]) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("qwen3_tiktoken_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("ranks.tiktoken");
        let mut f = std::fs::File::create(&path).unwrap();
        for (bytes, rank) in lines {
            writeln!(f, "{} {}", BASE64.encode(bytes), rank).unwrap();
        }
        path
    }

    #[test]
    fn merges_by_ascending_rank() {
        let path = write_rank_file(&[
            (b"a", 0),
            (b"b", 1),
            (b"c", 2),
            (b"ab", 3),
            (b"abc", 4),
        ]);
        let tok = TiktokenTokenizer::load(&path, HashMap::new()).unwrap();
        let ids = tok.encode("abc").unwrap();
        assert_eq!(ids, vec![4]);
        assert_eq!(tok.decode(&ids), "abc");
    }

    #[test]
    fn special_tokens_come_from_side_table() {
        let path = write_rank_file(&[(b"a", 0)]);
        let mut specials = HashMap::new();
        specials.insert("<|im_end|>".to_string(), 100);
        let tok = TiktokenTokenizer::load(&path, specials).unwrap();
        assert_eq!(tok.special_token_id("<|im_end|>"), Some(100));
        assert_eq!(tok.decode(&[0, 100]), "a");
    }
}
