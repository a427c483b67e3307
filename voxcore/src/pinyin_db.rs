//! Pinyin database: char→pinyin, pinyin→chars,
//! word-freq and bigram-freq lookups, loaded once at startup as four
//! parallel read-only maps.

use std::collections::HashMap;
use std::path::Path;

use ahash::AHashMap;

use crate::error::{Result, VoxCoreError};

/// Strips a trailing tone digit (`1`-`5`) from a pinyin syllable. Tones are
/// stored as trailing ASCII digits (`zhong1`), not diacritics.
pub fn toneless(pinyin: &str) -> &str {
    pinyin.trim_end_matches(|c: char| c.is_ascii_digit())
}

fn swap_nasal(toneless: &str) -> Option<String> {
    if let Some(stem) = toneless.strip_suffix("ng") {
        Some(format!("{stem}n"))
    } else if let Some(stem) = toneless.strip_suffix('n') {
        Some(format!("{stem}ng"))
    } else {
        None
    }
}

pub struct PinyinDb {
    char_to_pinyin: HashMap<char, Vec<String>>,
    /// Reverse index built from `char_to_pinyin`'s primary readings: toneless
    /// primary reading → every character whose primary reading matches.
    toneless_primary_to_chars: AHashMap<String, Vec<char>>,
    word_freq: AHashMap<String, u64>,
    bigram_freq: AHashMap<(char, char), u64>,
}

impl PinyinDb {
    /// Loads the three bundled JSON resources (`char_pinyin.json`,
    /// `word_freq.json`, `bigram_freq.json`) from `dir` and derives the
    /// fourth mapping (pinyin → chars) from the primary readings in-memory.
    pub fn load(dir: &Path) -> Result<Self> {
        let char_pinyin = read_map(&dir.join("char_pinyin.json"))?;
        let word_freq = read_map(&dir.join("word_freq.json"))?;
        let bigram_raw: HashMap<String, u64> = read_map(&dir.join("bigram_freq.json"))?;

        let mut bigram_freq = AHashMap::new();
        for (key, freq) in bigram_raw {
            let mut chars = key.chars();
            let (Some(left), Some(right)) = (chars.next(), chars.next()) else {
                continue;
            };
            bigram_freq.insert((left, right), freq);
        }

        Ok(Self::from_parts(char_pinyin, word_freq.into_iter().collect(), bigram_freq))
    }

    /// Constructs a database directly from in-memory maps (used by tests and
    /// by callers that embed a precompiled resource instead of JSON files).
    pub fn from_parts(
        char_to_pinyin: HashMap<char, Vec<String>>,
        word_freq: AHashMap<String, u64>,
        bigram_freq: AHashMap<(char, char), u64>,
    ) -> Self {
        let mut toneless_primary_to_chars: AHashMap<String, Vec<char>> = AHashMap::new();
        for (&c, readings) in &char_to_pinyin {
            if let Some(primary) = readings.first() {
                toneless_primary_to_chars
                    .entry(toneless(primary).to_string())
                    .or_default()
                    .push(c);
            }
        }
        Self {
            char_to_pinyin,
            toneless_primary_to_chars,
            word_freq,
            bigram_freq,
        }
    }

    pub fn readings(&self, c: char) -> &[String] {
        self.char_to_pinyin.get(&c).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn primary_reading(&self, c: char) -> Option<&str> {
        self.char_to_pinyin.get(&c).and_then(|v| v.first()).map(String::as_str)
    }

    fn primary_toneless(&self, c: char) -> Option<&str> {
        self.primary_reading(c).map(toneless)
    }

    pub fn word_freq(&self, word: &str) -> u64 {
        self.word_freq.get(word).copied().unwrap_or(0)
    }

    /// Every known word and its frequency, used by the syllable-expansion
    /// engine to build its merge-pinyin index.
    pub fn words(&self) -> impl Iterator<Item = (&str, u64)> {
        self.word_freq.iter().map(|(w, &f)| (w.as_str(), f))
    }

    pub fn bigram_freq(&self, left: char, right: char) -> u64 {
        self.bigram_freq.get(&(left, right)).copied().unwrap_or(0)
    }

    /// `log(bigram_freq + 1)`, the term used throughout the correction
    /// engines' scoring formulas.
    pub fn bigram_score(&self, left: char, right: char) -> f64 {
        ((self.bigram_freq(left, right) + 1) as f64).ln()
    }

    /// Every character whose primary reading has the same toneless form as
    /// `c`'s, excluding `c` itself.
    pub fn homophones(&self, c: char) -> Vec<char> {
        let Some(toneless_form) = self.primary_toneless(c) else {
            return Vec::new();
        };
        self.toneless_primary_to_chars
            .get(toneless_form)
            .map(|chars| chars.iter().copied().filter(|&cand| cand != c).collect())
            .unwrap_or_default()
    }

    /// `c`'s primary reading with its trailing nasal swapped (`n`↔`ng`),
    /// filtered through the same primary-reading equivalence used by
    /// [`Self::homophones`]. Empty if the reading has no trailing nasal.
    pub fn nasal_variants(&self, c: char) -> Vec<char> {
        let Some(toneless_form) = self.primary_toneless(c) else {
            return Vec::new();
        };
        let Some(swapped) = swap_nasal(toneless_form) else {
            return Vec::new();
        };
        self.toneless_primary_to_chars
            .get(&swapped)
            .map(|chars| chars.iter().copied().filter(|&cand| cand != c).collect())
            .unwrap_or_default()
    }
}

fn read_map<T: serde::de::DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let text = std::fs::read_to_string(path)
        .map_err(|e| VoxCoreError::PinyinDb(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&text)
        .map_err(|e| VoxCoreError::PinyinDb(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_db() -> PinyinDb {
        let mut char_to_pinyin = HashMap::new();
        char_to_pinyin.insert('硬', vec!["ying4".to_string()]);
        char_to_pinyin.insert('語', vec!["yu3".to_string()]);
        char_to_pinyin.insert('雨', vec!["yu3".to_string()]);
        char_to_pinyin.insert('域', vec!["yu4".to_string()]);
        char_to_pinyin.insert('真', vec!["zhen1".to_string()]);
        char_to_pinyin.insert('爭', vec!["zheng1".to_string()]);

        let mut word_freq = AHashMap::new();
        word_freq.insert("語音".to_string(), 500);

        let mut bigram_freq = AHashMap::new();
        bigram_freq.insert(('語', '音'), 200);

        PinyinDb::from_parts(char_to_pinyin, word_freq, bigram_freq)
    }

    #[test]
    fn homophones_filters_by_primary_reading_only() {
        let db = sample_db();
        let mut homophones = db.homophones('語');
        homophones.sort();
        assert_eq!(homophones, vec!['雨']);
        // 域's primary reading (yu4) differs from 語's (yu3): excluded.
        assert!(!db.homophones('語').contains(&'域'));
    }

    #[test]
    fn nasal_variants_swap_trailing_nasal() {
        let db = sample_db();
        assert_eq!(db.nasal_variants('真'), vec!['爭']);
        assert_eq!(db.nasal_variants('爭'), vec!['真']);
    }

    #[test]
    fn nasal_variants_empty_when_no_trailing_nasal() {
        let db = sample_db();
        assert!(db.nasal_variants('硬').is_empty());
    }

    #[test]
    fn bigram_score_uses_log1p() {
        let db = sample_db();
        assert!((db.bigram_score('語', '音') - (201f64).ln()).abs() < 1e-9);
        assert_eq!(db.bigram_score('語', '硬'), 0f64);
    }
}
