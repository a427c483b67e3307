//! Rule corrector: an ordered table of always-apply
//! and context-dependent substring replacements, longest-wrong-form first so
//! a shorter rule never bites into a match a longer rule should have
//! claimed, with CJK boundary protection against splitting a legitimate
//! compound and a final check against the correction protection list.

use crate::pinyin_db::PinyinDb;
use crate::protection::ProtectionList;
use crate::s2t::is_cjk;

pub struct Rule {
    pub wrong: &'static str,
    pub correct: &'static str,
    /// `None` for an always-apply rule; `Some(keywords)` for a
    /// context-dependent rule, matched case-insensitively against the text
    /// or the combined context string.
    pub keywords: Option<&'static [&'static str]>,
}

/// A small representative rule set. Real deployments load a much larger
/// table from a bundled resource; the mechanism below is what this module
/// is responsible for, not the data volume.
pub const RULES: &[Rule] = &[
    Rule { wrong: "去永所", correct: "區公所", keywords: None },
    Rule { wrong: "永所", correct: "用所", keywords: None },
    Rule { wrong: "硬輸入", correct: "語音輸入", keywords: None },
    Rule { wrong: "開會儀", correct: "開會議", keywords: Some(&["會議", "開會"]) },
];

/// Applies every rule in the table to `text`, longest `wrong` form first.
/// `combined_context` is [`crate::context::Context::combined_text`].
pub fn apply(text: &str, combined_context: &str, db: &PinyinDb, protection: &ProtectionList) -> String {
    let mut ordered: Vec<&Rule> = RULES.iter().collect();
    ordered.sort_by_key(|r| std::cmp::Reverse(r.wrong.chars().count()));

    let mut current = text.to_string();
    for rule in ordered {
        if protection.contains(rule.wrong) {
            continue;
        }
        if let Some(keywords) = rule.keywords {
            let text_lower = current.to_lowercase();
            let ctx_lower = combined_context.to_lowercase();
            let matched = keywords
                .iter()
                .any(|kw| text_lower.contains(&kw.to_lowercase()) || ctx_lower.contains(&kw.to_lowercase()));
            if !matched {
                continue;
            }
        }
        current = apply_single_rule(&current, rule, db);
    }
    current
}

fn apply_single_rule(text: &str, rule: &Rule, db: &PinyinDb) -> String {
    let chars: Vec<char> = text.chars().collect();
    let wrong_chars: Vec<char> = rule.wrong.chars().collect();
    let wrong_len = wrong_chars.len();
    if wrong_len == 0 || wrong_len > chars.len() {
        return text.to_string();
    }

    let protect_boundary = wrong_len <= 2 && wrong_chars.iter().all(|&c| is_cjk(c));

    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        let is_match = i + wrong_len <= chars.len() && chars[i..i + wrong_len] == wrong_chars[..];
        if is_match && (!protect_boundary || !boundary_protects(&chars, i, wrong_len, db)) {
            out.push_str(rule.correct);
            i += wrong_len;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

/// CJK boundary protection: skip the occurrence if either the
/// straddling pair across its trailing edge or its leading edge forms a
/// known word.
fn boundary_protects(chars: &[char], start: usize, len: usize, db: &PinyinDb) -> bool {
    let first_wrong = chars[start];
    let last_wrong = chars[start + len - 1];

    if let Some(&next) = chars.get(start + len) {
        let combo: String = [last_wrong, next].into_iter().collect();
        if db.word_freq(&combo) > 0 {
            return true;
        }
    }
    if start > 0 {
        let prev = chars[start - 1];
        let combo: String = [prev, first_wrong].into_iter().collect();
        if db.word_freq(&combo) > 0 {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use ahash::AHashMap;
    use std::collections::HashMap;

    fn empty_db() -> PinyinDb {
        PinyinDb::from_parts(HashMap::new(), AHashMap::new(), AHashMap::new())
    }

    #[test]
    fn always_apply_rule_fires() {
        let db = empty_db();
        let protection = ProtectionList::new();
        let out = apply("硬輸入很方便", "", &db, &protection);
        assert_eq!(out, "語音輸入很方便");
    }

    #[test]
    fn longest_wrong_form_wins_over_a_shorter_overlapping_rule() {
        let db = empty_db();
        let protection = ProtectionList::new();
        let out = apply("去永所辦事", "", &db, &protection);
        assert_eq!(out, "區公所辦事");
    }

    #[test]
    fn protection_list_blocks_a_rule_entirely() {
        let db = empty_db();
        let protection = ProtectionList::new();
        protection.add("硬輸入");
        let out = apply("硬輸入很方便", "", &db, &protection);
        assert_eq!(out, "硬輸入很方便");
    }

    #[test]
    fn context_dependent_rule_only_fires_with_matching_keyword() {
        let db = empty_db();
        let protection = ProtectionList::new();
        assert_eq!(apply("明天開會儀", "", &db, &protection), "明天開會儀");
        assert_eq!(apply("明天開會儀", "開會通知", &db, &protection), "明天開會議");
    }

    #[test]
    fn boundary_protection_skips_a_legitimate_compound() {
        let mut word_freq = AHashMap::new();
        word_freq.insert("甲乙".to_string(), 1); // "乙" + the char after "乙丙" forms a known word
        let db = PinyinDb::from_parts(HashMap::new(), word_freq, AHashMap::new());
        let rule = Rule { wrong: "乙丙", correct: "XX", keywords: None };
        // "乙丙" would normally become "XX", but its leading edge "甲"+"乙"
        // forms a known compound, so the occurrence must be left alone.
        assert_eq!(apply_single_rule("甲乙丙丁", &rule, &db), "甲乙丙丁");
    }

    #[test]
    fn unprotected_occurrence_is_still_replaced() {
        let db = empty_db();
        let rule = Rule { wrong: "乙丙", correct: "XX", keywords: None };
        assert_eq!(apply_single_rule("甲乙丙丁", &rule, &db), "甲XX丁");
    }
}
