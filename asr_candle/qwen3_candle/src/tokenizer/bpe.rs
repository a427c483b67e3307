//! Byte-level BPE: JSON vocabulary + text merges list.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{Qwen3AsrError, Result};
use crate::tokenizer::byte_level::ByteUnicodeMap;
use crate::tokenizer::pretokenize::pretokenize;

pub struct BpeTokenizer {
    byte_map: ByteUnicodeMap,
    vocab: HashMap<String, u32>,
    id_to_piece: HashMap<u32, String>,
    merge_rank: HashMap<(String, String), usize>,
}

impl BpeTokenizer {
    pub fn load(vocab_path: &Path, merges_path: &Path) -> Result<Self> {
        let vocab_text = std::fs::read_to_string(vocab_path)
            .map_err(|e| Qwen3AsrError::TokenizerFormat(format!("reading vocab.json: {e}")))?;
        let vocab: HashMap<String, u32> = serde_json::from_str(&vocab_text)
            .map_err(|e| Qwen3AsrError::TokenizerFormat(format!("parsing vocab.json: {e}")))?;

        let merges_text = std::fs::read_to_string(merges_path)
            .map_err(|e| Qwen3AsrError::TokenizerFormat(format!("reading merges.txt: {e}")))?;
        let mut merge_rank = HashMap::new();
        for (rank, line) in merges_text.lines().enumerate() {
            if line.is_empty() || line.starts_with("#version") {
                continue;
            }
            let mut parts = line.split(' ');
            let (Some(a), Some(b)) = (parts.next(), parts.next()) else {
                continue;
            };
            merge_rank.insert((a.to_string(), b.to_string()), rank);
        }

        let id_to_piece = vocab.iter().map(|(k, &v)| (v, k.clone())).collect();

        Ok(Self {
            byte_map: ByteUnicodeMap::new(),
            vocab,
            id_to_piece,
            merge_rank,
        })
    }

    fn merge_word(&self, word: &str) -> Vec<String> {
        let mut pieces: Vec<String> = word.chars().map(|c| c.to_string()).collect();
        if pieces.len() < 2 {
            return pieces;
        }
        loop {
            let mut best: Option<(usize, usize)> = None; // (rank, index)
            for i in 0..pieces.len() - 1 {
                let pair = (pieces[i].clone(), pieces[i + 1].clone());
                if let Some(&rank) = self.merge_rank.get(&pair) {
                    if best.map(|(r, _)| rank < r).unwrap_or(true) {
                        best = Some((rank, i));
                    }
                }
            }
            let Some((_, idx)) = best else {
                break;
            };
            let merged = format!("{}{}", pieces[idx], pieces[idx + 1]);
            pieces.splice(idx..idx + 2, [merged]);
        }
        pieces
    }

    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let mut ids = Vec::new();
        for chunk in pretokenize(text) {
            let mapped = self.byte_map.encode(chunk.as_bytes());
            for piece in self.merge_word(&mapped) {
                let id = self.vocab.get(&piece).copied().ok_or_else(|| {
                    Qwen3AsrError::TokenizerFormat(format!("no vocab entry for piece {piece:?}"))
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
            let Some(piece) = self.id_to_piece.get(&id) else {
                continue;
            };
            if is_special_spelling(piece) {
                flush(&mut byte_buf, &mut out);
                continue;
            }
            let mut decodable = true;
            let mut piece_bytes = Vec::with_capacity(piece.len());
            for ch in piece.chars() {
                match self.byte_map.decode_char(ch) {
                    Some(b) => piece_bytes.push(b),
                    None => {
                        decodable = false;
                        break;
                    }
                }
            }
            if decodable {
                byte_buf.extend_from_slice(&piece_bytes);
            } else {
                flush(&mut byte_buf, &mut out);
                out.push_str(piece);
            }
        }
        flush(&mut byte_buf, &mut out);
        out
    }

    pub fn token_to_id(&self, spelling: &str) -> Option<u32> {
        self.vocab.get(spelling).copied()
    }
}

pub(crate) fn is_special_spelling(piece: &str) -> bool {
    (piece.starts_with("<|") && piece.ends_with("|>"))
        || (piece.starts_with('<') && piece.ends_with('>') && piece.len() > 2 && !piece.contains("|"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(name: &str, contents: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("qwen3_bpe_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn merges_lowest_rank_pair_first() {
        // Vocab over byte-mapped ascii chars (which map to themselves).
        let vocab = r#"{"a":0,"b":1,"c":2,"ab":3,"abc":4}"#;
        let merges = "a b\nab c\n";
        let vp = write_tmp("vocab.json", vocab);
        let mp = write_tmp("merges.txt", merges);
        let tok = BpeTokenizer::load(&vp, &mp).unwrap();
        let ids = tok.encode("abc").unwrap();
        assert_eq!(ids, vec![4]);
        assert_eq!(tok.decode(&ids), "abc");
    }

    #[test]
    fn special_token_is_dropped_and_flushes() {
        let vocab = r#"{"a":0,"<|im_end|>":1}"#;
        let merges = "";
        let vp = write_tmp("vocab2.json", vocab);
        let mp = write_tmp("merges2.txt", merges);
        let tok = BpeTokenizer::load(&vp, &mp).unwrap();
        assert_eq!(tok.decode(&[0, 1]), "a");
    }
}
