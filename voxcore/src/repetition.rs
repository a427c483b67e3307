//! Repetition / hallucination detector: finds the longest consecutive run of a 1-3 character pattern and
//! classifies it as severe once the repeated span covers at least half the
//! text.

#[derive(Debug, Clone, PartialEq)]
pub struct RepetitionInfo {
    pub pattern: String,
    pub pattern_len: usize,
    pub repeat_count: usize,
    /// `repeat_count * pattern_len`, the character span the repeat covers.
    pub repeat_len: usize,
    pub total_len: usize,
    pub ratio: f64,
    pub severe: bool,
}

fn threshold_for(pattern_len: usize) -> usize {
    match pattern_len {
        1 => 4,
        2 => 3,
        3 => 2,
        _ => unreachable!("pattern lengths are scanned only for 1..=3"),
    }
}

/// Scans pattern lengths 1-3 for the longest consecutive-repeat segment
/// meeting that length's count threshold, and returns the single longest one
/// (by repeated character span) across all lengths.
pub fn detect(text: &str) -> Option<RepetitionInfo> {
    let chars: Vec<char> = text.chars().collect();
    let total_len = chars.len();
    if total_len == 0 {
        return None;
    }

    let mut best: Option<(usize, usize, usize)> = None; // (start, pattern_len, count)

    for pattern_len in 1..=3usize {
        if pattern_len > total_len {
            continue;
        }
        let threshold = threshold_for(pattern_len);
        let mut i = 0;
        while i + pattern_len <= total_len {
            let pat = &chars[i..i + pattern_len];
            let mut count = 1;
            let mut j = i + pattern_len;
            while j + pattern_len <= total_len && &chars[j..j + pattern_len] == pat {
                count += 1;
                j += pattern_len;
            }
            if count >= threshold {
                let repeat_len = count * pattern_len;
                let is_better = match &best {
                    None => true,
                    Some((_, best_pattern_len, best_count)) => {
                        repeat_len > best_count * best_pattern_len
                    }
                };
                if is_better {
                    best = Some((i, pattern_len, count));
                }
            }
            i += 1;
        }
    }

    best.map(|(start, pattern_len, count)| {
        let pattern: String = chars[start..start + pattern_len].iter().collect();
        let repeat_len = count * pattern_len;
        let ratio = repeat_len as f64 / total_len as f64;
        RepetitionInfo {
            pattern,
            pattern_len,
            repeat_count: count,
            repeat_len,
            total_len,
            ratio,
            severe: ratio >= 0.5,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn six_repeats_of_a_single_char_is_severe() {
        let info = detect("好好好好好好").unwrap();
        assert_eq!(info.pattern, "好");
        assert_eq!(info.repeat_count, 6);
        assert_eq!(info.ratio, 1.0);
        assert!(info.severe);
    }

    #[test]
    fn below_threshold_repeats_are_not_flagged() {
        assert!(detect("好好好").is_none());
    }

    #[test]
    fn two_char_pattern_needs_only_three_repeats() {
        let info = detect("哈囉哈囉哈囉不是重複").unwrap();
        assert_eq!(info.pattern, "哈囉");
        assert_eq!(info.repeat_count, 3);
        assert!(!info.severe);
    }

    #[test]
    fn non_repetitive_text_yields_none() {
        assert!(detect("今天天氣真好").is_none());
    }
}
