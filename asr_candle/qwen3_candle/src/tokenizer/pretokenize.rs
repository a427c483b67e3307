//! Pre-tokenization: splits raw text into chunks before BPE merging is
//! applied within each chunk. Whitespace is grouped with the *following*
//! word, matching the GPT-2 family's byte-level
//! pre-tokenizer regex, generalized from `[A-Za-z]`/digits to the Unicode
//! letter/number classes so CJK runs are each their own chunk.

use regex::Regex;
use std::sync::OnceLock;

fn pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+(?!\S)|\s+",
        )
        .expect("pretokenizer regex is valid")
    })
}

pub fn pretokenize(text: &str) -> Vec<&str> {
    pattern().find_iter(text).map(|m| m.as_str()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_leading_space_with_word() {
        let chunks = pretokenize("hello world");
        assert_eq!(chunks, vec!["hello", " world"]);
    }

    #[test]
    fn keeps_cjk_runs_together() {
        let chunks = pretokenize("你好 世界");
        assert_eq!(chunks, vec!["你好", " 世界"]);
    }
}
