//! Punctuation normalizer:
//! half→full-width character mapping and spoken-punctuation phrase
//! conversion (longest-key-first), plus the ambiguous-phrase table the
//! confidence router consults separately.

const HALF_TO_FULL: &[(char, char)] = &[
    (',', '，'),
    ('.', '。'),
    ('?', '？'),
    ('!', '！'),
    (';', '；'),
    (':', '：'),
    ('(', '（'),
    (')', '）'),
    ('[', '【'),
    (']', '】'),
    ('"', '”'),
    ('\'', '’'),
    ('~', '～'),
];

/// Spoken-name → symbol, including common English mis-recognitions of the
/// Chinese spoken forms.
const SPOKEN_PUNCTUATION: &[(&str, &str)] = &[
    ("逗號", "，"),
    ("逗号", "，"),
    ("句號", "。"),
    ("句号", "。"),
    ("問號", "？"),
    ("问号", "？"),
    ("感嘆號", "！"),
    ("感叹号", "！"),
    ("驚嘆號", "！"),
    ("冒號", "："),
    ("冒号", "："),
    ("分號", "；"),
    ("分号", "；"),
    ("頓號", "、"),
    ("顿号", "、"),
    ("括號", "（）"),
    ("括号", "（）"),
    ("Know-How", "？"),
    ("know-how", "？"),
    ("how", "？"),
];

/// Phrases ambiguous between a literal word and a spoken-punctuation name
/// (e.g. "how" is both the English word and a mis-recognition of "問號").
/// Consulted by the confidence router, not rewritten here.
const AMBIGUOUS_PHRASES: &[&str] = &["how", "Know-How", "know-how"];

pub fn halfwidth_to_fullwidth(text: &str) -> String {
    text.chars()
        .map(|c| {
            HALF_TO_FULL
                .iter()
                .find(|(half, _)| *half == c)
                .map(|(_, full)| *full)
                .unwrap_or(c)
        })
        .collect()
}

/// Replaces spoken-punctuation phrases, trying the longest keys first at
/// every position so multi-character names are never shadowed by a shorter
/// overlapping match.
pub fn apply_spoken_punctuation(text: &str) -> String {
    let mut entries: Vec<&(&str, &str)> = SPOKEN_PUNCTUATION.iter().collect();
    entries.sort_by_key(|(phrase, _)| std::cmp::Reverse(phrase.len()));

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    'outer: while !rest.is_empty() {
        for (phrase, symbol) in &entries {
            if rest.starts_with(*phrase) {
                out.push_str(symbol);
                rest = &rest[phrase.len()..];
                continue 'outer;
            }
        }
        let mut chars = rest.chars();
        let c = chars.next().expect("rest is non-empty");
        out.push(c);
        rest = chars.as_str();
    }
    out
}

pub fn contains_ambiguous_phrase(text: &str) -> bool {
    AMBIGUOUS_PHRASES.iter().any(|phrase| text.contains(phrase))
}

/// Full normalization step: half→full-width, then spoken-punctuation
/// substitution.
pub fn normalize(text: &str) -> String {
    apply_spoken_punctuation(&halfwidth_to_fullwidth(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halfwidth_punctuation_becomes_fullwidth() {
        assert_eq!(halfwidth_to_fullwidth("我爱编程,真的很酷"), "我爱编程，真的很酷");
    }

    #[test]
    fn spoken_names_convert_longest_first() {
        assert_eq!(apply_spoken_punctuation("逗号句号问号"), "，。？");
    }

    #[test]
    fn ambiguous_phrase_is_flagged() {
        assert!(contains_ambiguous_phrase("please say how"));
        assert!(!contains_ambiguous_phrase("你好"));
    }

    #[test]
    fn normalize_runs_both_stages() {
        assert_eq!(normalize("逗号句号问号"), "，。？");
    }
}
