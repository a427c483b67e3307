//! Shared word-segmentation and candidate-scoring helpers for the
//! data-driven correction engines. Segmentation is a
//! greedy forward maximum match over the pinyin DB's word-frequency table,
//! a direct frequency-table probe rather than a full linguistic parse,
//! since these engines only need segment boundaries.

use crate::pinyin_db::PinyinDb;

pub const FUNCTION_WORDS: [char; 25] = [
    '的', '了', '和', '是', '在', '我', '你', '他', '也', '就', '都', '而', '及', '與', '著', '地',
    '得', '把', '被', '讓', '這', '那', '不', '或', '但',
];

pub fn is_cjk(c: char) -> bool {
    matches!(c as u32, 0x4E00..=0x9FFF | 0x3400..=0x4DBF)
}

pub fn is_function_word(word: &str) -> bool {
    let mut chars = word.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => FUNCTION_WORDS.contains(&c),
        _ => false,
    }
}

/// Greedy forward maximum-match segmentation over `chars`, up to
/// `max_word_length`.
pub fn segment(chars: &[char], max_word_length: usize, db: &PinyinDb) -> Vec<(usize, usize)> {
    let mut segments = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let max_len = max_word_length.min(chars.len() - i);
        let mut matched_len = 1;
        for len in (2..=max_len).rev() {
            let candidate: String = chars[i..i + len].iter().collect();
            if db.word_freq(&candidate) > 0 {
                matched_len = len;
                break;
            }
        }
        segments.push((i, matched_len));
        i += matched_len;
    }
    segments
}

/// `score = log(cand_freq) - log(orig_freq+1) + 0.3*(cand_bigram - orig_bigram)`.
/// Returns `None` when the candidate has no frequency evidence at all
/// (`cand_freq == 0`, so `log` would be undefined) — such a candidate can
/// never win against the gates the correction engines apply before calling in.
#[allow(clippy::too_many_arguments)]
pub fn score_candidate(
    db: &PinyinDb,
    cand_word: &str,
    cand_first: char,
    cand_last: char,
    orig_freq: u64,
    orig_first: char,
    orig_last: char,
    left_ctx: Option<char>,
    right_ctx: Option<char>,
) -> Option<f64> {
    let cand_freq = db.word_freq(cand_word);
    if cand_freq == 0 {
        return None;
    }
    let mut cand_bigram = 0.0;
    let mut orig_bigram = 0.0;
    if let Some(l) = left_ctx {
        cand_bigram += db.bigram_score(l, cand_first);
        orig_bigram += db.bigram_score(l, orig_first);
    }
    if let Some(r) = right_ctx {
        cand_bigram += db.bigram_score(cand_last, r);
        orig_bigram += db.bigram_score(orig_last, r);
    }
    let freq_term = (cand_freq as f64).ln() - ((orig_freq + 1) as f64).ln();
    Some(freq_term + 0.3 * (cand_bigram - orig_bigram))
}

/// A single accepted replacement proposed by a correction engine.
pub struct Accepted {
    pub start: usize,
    pub len: usize,
    pub replacement: String,
    pub score: f64,
}

/// Applies the highest-scoring accepted replacements to `chars`,
/// greedily skipping any candidate whose span overlaps one already
/// committed (processed in descending score order so the strongest
/// evidence always wins a conflict), matching the end-to-start,
/// highest-score-first discipline the homophone engine's offsets require
///.
pub fn apply_non_overlapping(chars: &[char], mut accepted: Vec<Accepted>) -> String {
    accepted.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());

    let mut claimed: Vec<(usize, usize)> = Vec::new();
    let mut commits: Vec<&Accepted> = Vec::new();
    'candidates: for acc in &accepted {
        let end = acc.start + acc.len;
        for &(c_start, c_end) in &claimed {
            if acc.start < c_end && c_start < end {
                continue 'candidates;
            }
        }
        claimed.push((acc.start, end));
        commits.push(acc);
    }
    commits.sort_by(|a, b| b.start.cmp(&a.start));

    let mut out: Vec<char> = chars.to_vec();
    for acc in commits {
        out.splice(acc.start..acc.start + acc.len, acc.replacement.chars());
    }
    out.into_iter().collect()
}

/// All CJK-only windows of length `1..=max_len` over `chars`, used by
/// engines that must consider a span regardless of whether a dictionary
/// segmenter would have grouped it that way.
pub fn cjk_windows(chars: &[char], max_len: usize) -> Vec<(usize, usize)> {
    let mut windows = Vec::new();
    for start in 0..chars.len() {
        for len in 1..=max_len.min(chars.len() - start) {
            if chars[start..start + len].iter().all(|&c| is_cjk(c)) {
                windows.push((start, len));
            } else {
                break;
            }
        }
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;
    use ahash::AHashMap;
    use std::collections::HashMap;

    #[test]
    fn segment_falls_back_to_single_chars_without_a_dictionary() {
        let db = PinyinDb::from_parts(HashMap::new(), AHashMap::new(), AHashMap::new());
        let chars: Vec<char> = "你好嗎".chars().collect();
        assert_eq!(segment(&chars, 4, &db), vec![(0, 1), (1, 1), (2, 1)]);
    }

    #[test]
    fn segment_prefers_the_longest_known_word() {
        let mut word_freq = AHashMap::new();
        word_freq.insert("你好".to_string(), 10);
        let db = PinyinDb::from_parts(HashMap::new(), word_freq, AHashMap::new());
        let chars: Vec<char> = "你好嗎".chars().collect();
        assert_eq!(segment(&chars, 4, &db), vec![(0, 2), (2, 1)]);
    }

    #[test]
    fn is_function_word_only_matches_single_chars_in_the_skip_set() {
        assert!(is_function_word("的"));
        assert!(!is_function_word("硬碟"));
    }
}
