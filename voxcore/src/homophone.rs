//! Homophone engine: segment-aware suspicious-word
//! detection followed by frequency/bigram-scored homophone substitution.
//! Runs after the rule corrector.

use crate::pinyin_db::PinyinDb;
use crate::protection::ProtectionList;
use crate::scoring::{apply_non_overlapping, is_cjk, is_function_word, score_candidate, segment, Accepted};

const MAX_WORD_LENGTH: usize = 4;
const LOW_FREQ_THRESHOLD: u64 = 5;
const MIN_SCORE_DELTA: f64 = 2.0;
const TOP_HOMOPHONES: usize = 30;

fn is_suspicious(word: &str, freq: u64) -> bool {
    word.chars().count() <= MAX_WORD_LENGTH
        && word.chars().all(is_cjk)
        && !is_function_word(word)
        && freq <= LOW_FREQ_THRESHOLD
}

/// Per-position single-character substitutions, plus (for 2-char words) the
/// Cartesian product of each position's top-30 homophones.
fn propose_candidates(word_chars: &[char], db: &PinyinDb) -> Vec<Vec<char>> {
    let mut candidates = Vec::new();
    for (pos, &c) in word_chars.iter().enumerate() {
        for h in db.homophones(c) {
            let mut cand = word_chars.to_vec();
            cand[pos] = h;
            candidates.push(cand);
        }
    }
    if word_chars.len() == 2 {
        let homo0: Vec<char> = db.homophones(word_chars[0]).into_iter().take(TOP_HOMOPHONES).collect();
        let homo1: Vec<char> = db.homophones(word_chars[1]).into_iter().take(TOP_HOMOPHONES).collect();
        for &h0 in &homo0 {
            for &h1 in &homo1 {
                candidates.push(vec![h0, h1]);
            }
        }
    }
    candidates
}

fn best_candidate(chars: &[char], start: usize, len: usize, orig_freq: u64, db: &PinyinDb) -> Option<Accepted> {
    let word_chars = &chars[start..start + len];
    let orig_first = word_chars[0];
    let orig_last = word_chars[len - 1];
    let left_ctx = start.checked_sub(1).map(|i| chars[i]);
    let right_ctx = chars.get(start + len).copied();

    let mut best: Option<(String, f64)> = None;
    for cand_chars in propose_candidates(word_chars, db) {
        if cand_chars == word_chars {
            continue;
        }
        let cand_word: String = cand_chars.iter().collect();
        let cand_first = cand_chars[0];
        let cand_last = cand_chars[cand_chars.len() - 1];
        let Some(score) = score_candidate(
            db, &cand_word, cand_first, cand_last, orig_freq, orig_first, orig_last, left_ctx, right_ctx,
        ) else {
            continue;
        };
        if score <= MIN_SCORE_DELTA {
            continue;
        }
        if best.as_ref().map_or(true, |(_, best_score)| score > *best_score) {
            best = Some((cand_word, score));
        }
    }
    best.map(|(replacement, score)| Accepted { start, len, replacement, score })
}

/// Runs the homophone engine over `text`. `combined_context` is currently
/// unused by the scoring formula itself but is accepted for symmetry with the rule corrector and
/// future context-aware extensions.
pub fn correct(text: &str, db: &PinyinDb, protection: &ProtectionList) -> String {
    let chars: Vec<char> = text.chars().collect();
    let segments = segment(&chars, MAX_WORD_LENGTH, db);

    let mut accepted: Vec<Accepted> = Vec::new();
    for &(start, len) in &segments {
        let word: String = chars[start..start + len].iter().collect();
        if protection.contains(&word) {
            continue;
        }
        let freq = db.word_freq(&word);
        if !is_suspicious(&word, freq) {
            continue;
        }
        if let Some(cand) = best_candidate(&chars, start, len, freq, db) {
            accepted.push(cand);
        }
    }

    // Adjacent single-CJK-char tokens combined into a 2-char sliding-window
    // candidate whose combined frequency is also at or below the threshold.
    for window in segments.windows(2) {
        let (s0, l0) = window[0];
        let (s1, l1) = window[1];
        if l0 != 1 || l1 != 1 || s1 != s0 + 1 {
            continue;
        }
        let combo: String = chars[s0..s0 + 2].iter().collect();
        if protection.contains(&combo) {
            continue;
        }
        let freq = db.word_freq(&combo);
        if freq > LOW_FREQ_THRESHOLD || !combo.chars().all(is_cjk) {
            continue;
        }
        if let Some(cand) = best_candidate(&chars, s0, 2, freq, db) {
            accepted.push(cand);
        }
    }

    apply_non_overlapping(&chars, accepted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ahash::AHashMap;
    use std::collections::HashMap;

    fn db_with(word_freq: &[(&str, u64)], bigram_freq: &[((char, char), u64)], char_pinyin: &[(char, &str)]) -> PinyinDb {
        let mut char_to_pinyin = HashMap::new();
        for &(c, reading) in char_pinyin {
            char_to_pinyin.insert(c, vec![reading.to_string()]);
        }
        let mut wf = AHashMap::new();
        for &(w, f) in word_freq {
            wf.insert(w.to_string(), f);
        }
        let mut bf = AHashMap::new();
        for &(pair, f) in bigram_freq {
            bf.insert(pair, f);
        }
        PinyinDb::from_parts(char_to_pinyin, wf, bf)
    }

    #[test]
    fn replaces_a_low_frequency_homophone_with_a_known_high_frequency_word() {
        let db = db_with(
            &[("語音", 5000), ("雨音", 0)],
            &[(('語', '音'), 2000), (('雨', '音'), 0)],
            &[('語', "yu3"), ('雨', "yu3"), ('音', "yin1")],
        );
        let protection = ProtectionList::new();
        assert_eq!(correct("雨音", &db, &protection), "語音");
    }

    #[test]
    fn leaves_a_high_frequency_word_alone() {
        let db = db_with(&[("你好", 9000)], &[], &[]);
        let protection = ProtectionList::new();
        assert_eq!(correct("你好", &db, &protection), "你好");
    }

    #[test]
    fn protection_list_blocks_replacement() {
        let db = db_with(
            &[("語音", 5000), ("雨音", 0)],
            &[(('語', '音'), 2000)],
            &[('語', "yu3"), ('雨', "yu3"), ('音', "yin1")],
        );
        let protection = ProtectionList::new();
        protection.add("雨音");
        assert_eq!(correct("雨音", &db, &protection), "雨音");
    }
}
