//! Syllable-expansion engine: recovers a 2-syllable
//! word that the recognizer compressed into a single character. Builds a
//! "merge-pinyin" index (`initial(first syllable) + final(second syllable) →
//! [(word, freq)]`) lazily on first use, guarded by a one-shot cell,
//! then probes it within edit distance 1 of the
//! suspicious character's own reading.

use std::sync::OnceLock;

use ahash::AHashMap;

use crate::pinyin_db::{toneless, PinyinDb};
use crate::protection::ProtectionList;
use crate::scoring::{apply_non_overlapping, is_cjk, Accepted};

const SUSPICIOUS_BIGRAM_THRESHOLD: u64 = 50;
const CONTEXT_IMPROVEMENT_GATE: f64 = 3.0;
const ACCEPT_SCORE: f64 = 7.0;
const MAX_EDIT_DISTANCE: usize = 1;

const INITIALS: &[&str] = &[
    "zh", "ch", "sh", "b", "p", "m", "f", "d", "t", "n", "l", "g", "k", "h", "j", "q", "x", "r", "z", "c", "s", "y",
    "w",
];

fn split_initial_final(syllable: &str) -> (&str, &str) {
    for initial in INITIALS {
        if syllable.len() > initial.len() && syllable.starts_with(initial) {
            return (initial, &syllable[initial.len()..]);
        }
    }
    ("", syllable)
}

fn merge_form(first_reading: &str, second_reading: &str) -> String {
    let (initial, _) = split_initial_final(first_reading);
    let (_, final_part) = split_initial_final(second_reading);
    format!("{initial}{final_part}")
}

/// Lazily built `merge form → [(2-char word, freq)]` index over the pinyin
/// DB's word-frequency table.
#[derive(Default)]
pub struct MergePinyinIndex {
    index: OnceLock<AHashMap<String, Vec<(String, u64)>>>,
}

impl MergePinyinIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn build(db: &PinyinDb) -> AHashMap<String, Vec<(String, u64)>> {
        let mut index: AHashMap<String, Vec<(String, u64)>> = AHashMap::new();
        for (word, freq) in db.words() {
            let chars: Vec<char> = word.chars().collect();
            if chars.len() != 2 {
                continue;
            }
            let (Some(r0), Some(r1)) = (db.primary_reading(chars[0]), db.primary_reading(chars[1])) else {
                continue;
            };
            let key = merge_form(toneless(r0), toneless(r1));
            index.entry(key).or_default().push((word.to_string(), freq));
        }
        index
    }

    fn get_or_build(&self, db: &PinyinDb) -> &AHashMap<String, Vec<(String, u64)>> {
        self.index.get_or_init(|| Self::build(db))
    }

    /// 2-char words whose merge form is within `max_ed` edit distance of
    /// `target_reading`, paired with that word's frequency and edit distance.
    fn candidates(&self, db: &PinyinDb, target_reading: &str, max_ed: usize) -> Vec<(String, u64, usize)> {
        let index = self.get_or_build(db);
        let mut out = Vec::new();
        for (form, words) in index {
            let ed = edit_distance::edit_distance(form, target_reading);
            if ed <= max_ed {
                for (word, freq) in words {
                    out.push((word.clone(), *freq, ed));
                }
            }
        }
        out
    }
}

/// `pos` must have a character on both sides; a char at either text boundary
/// can never satisfy the both-sides-suspicious gate below.
fn best_candidate(chars: &[char], pos: usize, db: &PinyinDb, index: &MergePinyinIndex) -> Option<(String, f64)> {
    if pos == 0 || pos + 1 >= chars.len() {
        return None;
    }
    let c = chars[pos];
    if !is_cjk(c) {
        return None;
    }
    let left = chars[pos - 1];
    let right = chars[pos + 1];
    if db.bigram_freq(left, c) > SUSPICIOUS_BIGRAM_THRESHOLD || db.bigram_freq(c, right) > SUSPICIOUS_BIGRAM_THRESHOLD
    {
        return None;
    }
    let orig_left_bigram = db.bigram_score(left, c);
    let orig_right_bigram = db.bigram_score(c, right);

    let mut best: Option<(String, f64)> = None;
    for reading in db.readings(c) {
        let target = toneless(reading);
        for (word, freq, ed) in index.candidates(db, target, MAX_EDIT_DISTANCE) {
            let word_chars: Vec<char> = word.chars().collect();
            if word_chars.len() != 2 {
                continue;
            }
            let new_left_bigram = db.bigram_score(left, word_chars[0]);
            let new_right_bigram = db.bigram_score(word_chars[1], right);
            let context_improvement =
                0.5 * ((new_left_bigram - orig_left_bigram) + (new_right_bigram - orig_right_bigram));
            if context_improvement < CONTEXT_IMPROVEMENT_GATE {
                continue;
            }
            let internal_bigram = db.bigram_score(word_chars[0], word_chars[1]);
            let score = (freq as f64 + 1.0).ln() + context_improvement + 0.3 * internal_bigram - 2.0 * ed as f64;
            if score < ACCEPT_SCORE {
                continue;
            }
            if best.as_ref().map_or(true, |(_, best_score)| score > *best_score) {
                best = Some((word, score));
            }
        }
    }
    best
}

pub fn correct(text: &str, db: &PinyinDb, index: &MergePinyinIndex, protection: &ProtectionList) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut accepted: Vec<Accepted> = Vec::new();
    for pos in 0..chars.len() {
        let Some((replacement, score)) = best_candidate(&chars, pos, db, index) else {
            continue;
        };
        if protection.contains(&replacement) {
            continue;
        }
        accepted.push(Accepted { start: pos, len: 1, replacement, score });
    }
    apply_non_overlapping(&chars, accepted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn db_with(
        char_pinyin: &[(char, &str)],
        word_freq: &[(&str, u64)],
        bigram_freq: &[((char, char), u64)],
    ) -> PinyinDb {
        let mut cp = HashMap::new();
        for &(c, reading) in char_pinyin {
            cp.insert(c, vec![reading.to_string()]);
        }
        let mut wf = AHashMap::new();
        for &(w, f) in word_freq {
            wf.insert(w.to_string(), f);
        }
        let mut bf = AHashMap::new();
        for &(pair, f) in bigram_freq {
            bf.insert(pair, f);
        }
        PinyinDb::from_parts(cp, wf, bf)
    }

    #[test]
    fn expands_a_suspicious_merged_syllable_into_its_two_character_word() {
        let db = db_with(
            &[('甲', "jia3"), ('乙', "yi3"), ('丙', "bing3"), ('丁', "yi1"), ('戊', "bi4")],
            &[("丁戊", 500)],
            &[(('甲', '丁'), 100_000), (('戊', '丙'), 100_000), (('丁', '戊'), 50)],
        );
        let index = MergePinyinIndex::new();
        let protection = ProtectionList::new();
        assert_eq!(correct("甲乙丙", &db, &index, &protection), "甲丁戊丙");
    }

    #[test]
    fn well_fitting_context_is_left_alone() {
        let db = db_with(
            &[('甲', "jia3"), ('乙', "yi3"), ('丙', "bing3"), ('丁', "yi1"), ('戊', "bi4")],
            &[("丁戊", 500)],
            &[(('甲', '乙'), 1000), (('乙', '丙'), 1000)],
        );
        let index = MergePinyinIndex::new();
        let protection = ProtectionList::new();
        assert_eq!(correct("甲乙丙", &db, &index, &protection), "甲乙丙");
    }

    #[test]
    fn protection_list_blocks_the_expansion() {
        let db = db_with(
            &[('甲', "jia3"), ('乙', "yi3"), ('丙', "bing3"), ('丁', "yi1"), ('戊', "bi4")],
            &[("丁戊", 500)],
            &[(('甲', '丁'), 100_000), (('戊', '丙'), 100_000), (('丁', '戊'), 50)],
        );
        let index = MergePinyinIndex::new();
        let protection = ProtectionList::new();
        protection.add("丁戊");
        assert_eq!(correct("甲乙丙", &db, &index, &protection), "甲乙丙");
    }
}
