//! Post-processing controller: sequences the
//! segment-aware S→T converter, half→full-width punctuation, the rule
//! corrector, the data-driven correction engines, a rule re-check, spoken
//! punctuation, and repetition detection, folding several independent
//! transforms into one ordered call.

use crate::config::StageFlags;
use crate::context::Context;
use crate::pinyin_db::PinyinDb;
use crate::protection::ProtectionList;
use crate::repetition::{self, RepetitionInfo};
use crate::{homophone, nasal, punctuation, rules, s2t, syllable};

pub struct PostProcessResult {
    pub processed_text: String,
    pub applied_steps: Vec<&'static str>,
    pub repetition_info: Option<RepetitionInfo>,
}

/// Runs the full pipeline over `raw_text`. `db` is consulted by the rule
/// corrector regardless of load state (an empty DB simply never satisfies a
/// boundary-protection lookup); `index` is `None` until the pinyin DB has
/// finished loading and the merge-pinyin index exists, which gates the whole
/// homophone/nasal/syllable block.
pub fn run(
    raw_text: &str,
    context: &Context,
    stages: &StageFlags,
    db: &PinyinDb,
    index: Option<&syllable::MergePinyinIndex>,
    protection: &ProtectionList,
) -> PostProcessResult {
    let mut text = raw_text.to_string();
    let mut applied = Vec::new();

    if stages.s2t {
        text = s2t::convert_segment_aware(&text);
        applied.push("s2t");
    }
    if stages.punctuation {
        text = punctuation::halfwidth_to_fullwidth(&text);
        applied.push("halfwidth_to_fullwidth");
    }
    if stages.rules {
        text = rules::apply(&text, &context.combined_text(), db, protection);
        applied.push("rule_corrector");
    }

    if let Some(index) = index {
        let mut ran_any = false;
        if stages.homophone {
            text = homophone::correct(&text, db, protection);
            applied.push("homophone_engine");
            ran_any = true;
        }
        if stages.nasal {
            text = nasal::correct(&text, db, protection);
            applied.push("nasal_engine");
            ran_any = true;
        }
        if stages.syllable_expansion {
            text = syllable::correct(&text, db, index, protection);
            applied.push("syllable_engine");
            ran_any = true;
        }
        if ran_any && stages.rules {
            text = rules::apply(&text, &context.combined_text(), db, protection);
            applied.push("rule_corrector_recheck");
        }
    }

    if stages.punctuation {
        text = punctuation::apply_spoken_punctuation(&text);
        applied.push("spoken_punctuation");
    }

    let repetition_info = if stages.repetition { repetition::detect(&text) } else { None };

    PostProcessResult { processed_text: text, applied_steps: applied, repetition_info }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_stages() -> StageFlags {
        StageFlags::default()
    }

    fn empty_db() -> PinyinDb {
        PinyinDb::from_parts(std::collections::HashMap::new(), ahash::AHashMap::new(), ahash::AHashMap::new())
    }

    #[test]
    fn scenario_1_s2t_and_halfwidth() {
        let context = Context::default();
        let protection = ProtectionList::new();
        let db = empty_db();
        let result = run("我爱编程,真的很酷", &context, &all_stages(), &db, None, &protection);
        assert_eq!(result.processed_text, "我愛編程，真的很酷");
    }

    #[test]
    fn scenario_2_spoken_punctuation_and_halfwidth() {
        let context = Context::default();
        let protection = ProtectionList::new();
        let db = empty_db();
        let result = run("逗号句号问号", &context, &all_stages(), &db, None, &protection);
        assert_eq!(result.processed_text, "，。？");
    }

    #[test]
    fn scenario_3_always_apply_rule() {
        let context = Context::default();
        let protection = ProtectionList::new();
        let db = empty_db();
        let result = run("硬輸入很方便", &context, &all_stages(), &db, None, &protection);
        assert_eq!(result.processed_text, "語音輸入很方便");
    }

    #[test]
    fn scenario_5_severe_repetition_is_flagged() {
        let context = Context::default();
        let protection = ProtectionList::new();
        let db = empty_db();
        let result = run("好好好好好好", &context, &all_stages(), &db, None, &protection);
        let info = result.repetition_info.expect("repetition expected");
        assert!(info.severe);
        assert_eq!(info.ratio, 1.0);
    }

    #[test]
    fn data_driven_engines_skipped_without_a_loaded_index() {
        let context = Context::default();
        let protection = ProtectionList::new();
        let db = empty_db();
        let result = run("你好", &context, &all_stages(), &db, None, &protection);
        assert!(!result.applied_steps.contains(&"homophone_engine"));
    }
}
