//! Nasal engine: `-n`/`-ng` swap variants scored by
//! word-frequency delta and bigram context. Unlike the homophone engine it
//! scans every CJK window up to 4 characters with no suspiciousness
//! pre-filter, since a nasal swap produces a legitimate-looking word that a
//! frequency-only suspicion test would miss.

use crate::pinyin_db::PinyinDb;
use crate::protection::ProtectionList;
use crate::scoring::{apply_non_overlapping, cjk_windows, score_candidate, Accepted};

const MAX_WORD_LENGTH: usize = 4;
const MIN_CANDIDATE_FREQ: u64 = 100;
const MIN_SCORE_DELTA: f64 = 3.0;

fn best_candidate(chars: &[char], start: usize, len: usize, db: &PinyinDb) -> Option<Accepted> {
    let word_chars = &chars[start..start + len];
    let word: String = word_chars.iter().collect();
    let orig_freq = db.word_freq(&word);
    let orig_first = word_chars[0];
    let orig_last = word_chars[len - 1];
    let left_ctx = start.checked_sub(1).map(|i| chars[i]);
    let right_ctx = chars.get(start + len).copied();

    let mut best: Option<(String, f64)> = None;
    for (pos, &c) in word_chars.iter().enumerate() {
        for variant in db.nasal_variants(c) {
            let mut cand_chars = word_chars.to_vec();
            cand_chars[pos] = variant;
            let cand_word: String = cand_chars.iter().collect();
            let cand_freq = db.word_freq(&cand_word);
            if cand_freq < MIN_CANDIDATE_FREQ {
                continue;
            }
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
    }
    best.map(|(replacement, score)| Accepted { start, len, replacement, score })
}

pub fn correct(text: &str, db: &PinyinDb, protection: &ProtectionList) -> String {
    let chars: Vec<char> = text.chars().collect();

    let mut accepted: Vec<Accepted> = Vec::new();
    for (start, len) in cjk_windows(&chars, MAX_WORD_LENGTH) {
        let word: String = chars[start..start + len].iter().collect();
        if protection.contains(&word) {
            continue;
        }
        if let Some(cand) = best_candidate(&chars, start, len, db) {
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

    fn db_with(word_freq: &[(&str, u64)], char_pinyin: &[(char, &str)]) -> PinyinDb {
        let mut char_to_pinyin = HashMap::new();
        for &(c, reading) in char_pinyin {
            char_to_pinyin.insert(c, vec![reading.to_string()]);
        }
        let mut wf = AHashMap::new();
        for &(w, f) in word_freq {
            wf.insert(w.to_string(), f);
        }
        PinyinDb::from_parts(char_to_pinyin, wf, AHashMap::new())
    }

    #[test]
    fn swaps_a_trailing_nasal_for_a_much_more_frequent_word() {
        let db = db_with(
            &[("真的", 0), ("爭的", 20000)],
            &[('真', "zhen1"), ('爭', "zheng1"), ('的', "de5")],
        );
        let protection = ProtectionList::new();
        assert_eq!(correct("真的", &db, &protection), "爭的");
    }

    #[test]
    fn below_candidate_freq_floor_is_rejected() {
        let db = db_with(
            &[("真的", 0), ("爭的", 50)],
            &[('真', "zhen1"), ('爭', "zheng1"), ('的', "de5")],
        );
        let protection = ProtectionList::new();
        assert_eq!(correct("真的", &db, &protection), "真的");
    }

    #[test]
    fn protection_list_blocks_replacement() {
        let db = db_with(
            &[("真的", 0), ("爭的", 20000)],
            &[('真', "zhen1"), ('爭', "zheng1"), ('的', "de5")],
        );
        let protection = ProtectionList::new();
        protection.add("真的");
        assert_eq!(correct("真的", &db, &protection), "真的");
    }
}
