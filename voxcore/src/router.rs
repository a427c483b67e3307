//! Confidence router and retry controller: decides
//! whether a transcription needs LLM cleanup, and whether the whole
//! transcription should be retried pinned to a different language.

use crate::config::VoxCoreConfig;
use crate::punctuation::contains_ambiguous_phrase;
use crate::repetition::RepetitionInfo;
use crate::scoring::is_cjk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Qwen3,
    Other,
}

pub struct TranscriptionMetadata {
    pub provider: Provider,
    pub avg_log_prob: f64,
    pub audio_duration_secs: f64,
    /// Whether the caller left language detection to the model ("auto" mode)
    /// rather than pinning a language explicitly.
    pub auto_mode: bool,
}

const STOCK_RESPONSES: &[&str] = &["好", "是的", "謝謝", "沒問題", "嗯", "可以", "不行", "對", "不對", "知道了"];

const LEGITIMATE_REDUPLICATION: &[char] = &['哈', '呵', '嘻', '嗯', '啊', '喔', '誒', '呀', '哦'];

const FILLER_WORDS: &[&str] = &["呃", "嗯", "那個", "就是說"];
const FILLER_THRESHOLD: usize = 3;

const LIST_MARKERS: &[&str] = &["第一", "第二", "第三", "首先", "其次", "最後", "一、", "二、", "三、"];
const LIST_MARKER_THRESHOLD: usize = 2;

fn is_punctuation(c: char) -> bool {
    c.is_ascii_punctuation()
        || matches!(c, '，' | '。' | '！' | '？' | '；' | '：' | '、' | '（' | '）' | '【' | '】' | '”' | '’')
}

fn is_stock_response(text: &str) -> bool {
    (!text.is_empty() && text.chars().all(|c| c.is_ascii_digit())) || STOCK_RESPONSES.contains(&text)
}

/// Length ≥10, punctuation count ≥ `max(len/20, 1)`, and no unpunctuated CJK
/// span longer than 20. Texts shorter than
/// 10 characters trivially pass — the density test only governs rule 4's
/// "long text" case.
fn punctuation_density_ok(chars: &[char]) -> bool {
    let len = chars.len();
    if len < 10 {
        return true;
    }
    let punct_count = chars.iter().filter(|&&c| is_punctuation(c)).count();
    if punct_count < (len / 20).max(1) {
        return false;
    }
    let mut run = 0usize;
    let mut max_run = 0usize;
    for &c in chars {
        if is_cjk(c) {
            run += 1;
            max_run = max_run.max(run);
        } else {
            run = 0;
        }
    }
    max_run <= 20
}

fn has_illegitimate_doubling(chars: &[char]) -> bool {
    chars
        .windows(2)
        .any(|w| w[0] == w[1] && is_cjk(w[0]) && !LEGITIMATE_REDUPLICATION.contains(&w[0]))
}

fn has_excessive_fillers(text: &str) -> bool {
    FILLER_WORDS.iter().map(|f| text.matches(f).count()).sum::<usize>() >= FILLER_THRESHOLD
}

fn has_list_content(text: &str) -> bool {
    LIST_MARKERS.iter().filter(|m| text.contains(*m)).count() >= LIST_MARKER_THRESHOLD
}

fn qwen3_heuristic_skip(text: &str, chars: &[char], metadata: &TranscriptionMetadata, cfg: &VoxCoreConfig) -> bool {
    let cjk_count = chars.iter().filter(|&&c| is_cjk(c)).count();
    if cjk_count > cfg.qwen3_skip_threshold {
        return false;
    }
    if has_excessive_fillers(text) || has_list_content(text) {
        return false;
    }
    if metadata.audio_duration_secs <= 0.0 {
        return false;
    }
    let speech_rate = chars.len() as f64 / metadata.audio_duration_secs;
    (1.5..=8.0).contains(&speech_rate)
}

/// `Some(true)` means the provider-confidence rule grants a
/// skip; `None` means the rule did not fire and routing falls through to the
/// next rule.
fn provider_confidence_skip(text: &str, chars: &[char], metadata: &TranscriptionMetadata, cfg: &VoxCoreConfig) -> Option<bool> {
    if metadata.avg_log_prob != 0.0 && metadata.avg_log_prob > cfg.log_prob_threshold {
        return Some(true);
    }
    if metadata.provider == Provider::Qwen3
        && metadata.avg_log_prob == 0.0
        && qwen3_heuristic_skip(text, chars, metadata, cfg)
    {
        return Some(true);
    }
    None
}

fn ordered_rules(
    text: &str,
    metadata: &TranscriptionMetadata,
    repetition_info: Option<&RepetitionInfo>,
    cfg: &VoxCoreConfig,
) -> bool {
    if !cfg.stages.routing {
        return true;
    }
    if !text.is_empty() && text.chars().all(|c| c.is_ascii()) {
        return false;
    }
    if is_stock_response(text) {
        return false;
    }
    let chars: Vec<char> = text.chars().collect();
    if chars.len() >= 10 && !punctuation_density_ok(&chars) {
        return true;
    }
    if has_illegitimate_doubling(&chars) {
        return true;
    }
    if let Some(skip) = provider_confidence_skip(text, &chars, metadata, cfg) {
        return !skip;
    }
    if contains_ambiguous_phrase(text) {
        return true;
    }
    if repetition_info.is_some() {
        return true;
    }
    true
}

/// Computes `needs_llm` for `text`, then applies
/// the safety net: if the rules settled on "skip" but the text is ≥10 chars
/// with insufficient punctuation, invoke the LLM anyway.
pub fn needs_llm(
    text: &str,
    metadata: &TranscriptionMetadata,
    repetition_info: Option<&RepetitionInfo>,
    cfg: &VoxCoreConfig,
) -> bool {
    let decision = ordered_rules(text, metadata, repetition_info, cfg);
    if !decision {
        let chars: Vec<char> = text.chars().collect();
        if chars.len() >= 10 && !punctuation_density_ok(&chars) {
            return true;
        }
    }
    decision
}

const VOICE_COMMANDS: &[(&str, &str)] = &[
    ("全部刪除", "delete_all"),
    ("全部删除", "delete_all"),
    ("複製", "copy"),
    ("貼上", "paste"),
    ("復原", "undo"),
];

/// Matches the fully-processed text, trimmed of trailing CJK/ASCII
/// punctuation, against a fixed voice-command table. A match short-circuits the rest of the flow.
pub fn match_voice_command(text: &str) -> Option<&'static str> {
    let trimmed = text.trim_end_matches(|c: char| is_punctuation(c) || c.is_whitespace());
    VOICE_COMMANDS.iter().find(|(cmd, _)| *cmd == trimmed).map(|(_, name)| *name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryTarget {
    Japanese,
    Chinese,
}

fn is_fullwidth_form(c: char) -> bool {
    matches!(c as u32, 0xFF00..=0xFFEF)
}

fn is_cjk_punctuation(c: char) -> bool {
    matches!(c as u32, 0x3000..=0x303F)
}

fn is_kana(c: char) -> bool {
    matches!(c as u32, 0x3040..=0x30FF)
}

fn is_cjk_ext_b_plus(c: char) -> bool {
    matches!(c as u32, 0x20000..=0x2FFFF)
}

fn is_allowed_scalar(c: char) -> bool {
    c.is_ascii() || is_cjk(c) || is_kana(c) || is_cjk_punctuation(c) || is_fullwidth_form(c) || is_cjk_ext_b_plus(c)
}

/// Any scalar outside the allowed set (ASCII, CJK, kana, CJK punctuation,
/// fullwidth forms, CJK Ext B+) triggers a retry pinned to Japanese — most
/// commonly Cyrillic leaking into an auto-mode Chinese transcription.
pub fn unexpected_script_retry(text: &str) -> Option<RetryTarget> {
    text.chars().any(|c| !is_allowed_scalar(c)).then_some(RetryTarget::Japanese)
}

const POLITE_ENDINGS: &[&str] = &["です", "ます", "ました", "ません", "でした"];
const SINGLE_CHAR_PARTICLES: &[char] = &['は', 'が', 'を', 'に', 'へ', 'と', 'も', 'か', 'よ', 'ね'];
const MULTI_CHAR_PARTICLES: &[&str] = &["から", "まで", "ので", "のに"];

/// Particles are only counted when preceded by a CJK or kana scalar; `の` is
/// excluded even though it commonly precedes a particle-like reading.
fn count_single_char_particles(chars: &[char]) -> usize {
    let mut count = 0;
    for i in 1..chars.len() {
        let c = chars[i];
        if c == 'の' || !SINGLE_CHAR_PARTICLES.contains(&c) {
            continue;
        }
        let prev = chars[i - 1];
        if is_cjk(prev) || is_kana(prev) {
            count += 1;
        }
    }
    count
}

fn count_multi_char_particles(text: &str, chars: &[char]) -> usize {
    let mut count = 0;
    for particle in MULTI_CHAR_PARTICLES {
        for (byte_idx, _) in text.match_indices(particle) {
            let char_idx = text[..byte_idx].chars().count();
            if char_idx == 0 {
                continue;
            }
            let prev = chars[char_idx - 1];
            if is_cjk(prev) || is_kana(prev) {
                count += 1;
            }
        }
    }
    count
}

/// Auto mode returned Japanese but the text actually reads as Chinese:
/// (A) a polite ending with ≥2 particles, (B) ≥3 particles and length ≥10,
/// or (C) ≥2 multi-char particles.
pub fn japanese_drift_retry(text: &str, auto_mode: bool, detected_language_is_japanese: bool) -> Option<RetryTarget> {
    if !auto_mode || !detected_language_is_japanese {
        return None;
    }
    let chars: Vec<char> = text.chars().collect();
    let single_particles = count_single_char_particles(&chars);
    let multi_particles = count_multi_char_particles(text, &chars);
    let total_particles = single_particles + multi_particles;

    let polite_ending = POLITE_ENDINGS.iter().any(|e| text.ends_with(e));
    let condition_a = polite_ending && total_particles >= 2;
    let condition_b = total_particles >= 3 && chars.len() >= 10;
    let condition_c = multi_particles >= 2;

    (condition_a || condition_b || condition_c).then_some(RetryTarget::Chinese)
}

/// Auto mode with `avg_log_prob` below `qwen3_logprob_threshold` triggers a
/// retry pinned to Japanese; the caller adopts the retry only if its
/// log-prob is higher than the original.
pub fn low_confidence_retry(auto_mode: bool, avg_log_prob: f64, cfg: &VoxCoreConfig) -> Option<RetryTarget> {
    (auto_mode && avg_log_prob < cfg.qwen3_logprob_threshold).then_some(RetryTarget::Japanese)
}

pub fn should_adopt_retry(original_log_prob: f64, retry_log_prob: f64) -> bool {
    retry_log_prob > original_log_prob
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(provider: Provider, avg_log_prob: f64) -> TranscriptionMetadata {
        TranscriptionMetadata { provider, avg_log_prob, audio_duration_secs: 3.0, auto_mode: true }
    }

    #[test]
    fn all_ascii_skips_llm() {
        let cfg = VoxCoreConfig::default();
        let result = needs_llm("hello world", &metadata(Provider::Other, 0.0), None, &cfg);
        assert!(!result);
    }

    #[test]
    fn stock_response_skips_llm() {
        let cfg = VoxCoreConfig::default();
        let result = needs_llm("好", &metadata(Provider::Other, -0.2), None, &cfg);
        assert!(!result);
    }

    #[test]
    fn high_confidence_non_qwen_skips_llm() {
        let cfg = VoxCoreConfig::default();
        let result = needs_llm("今天氣候很好，感謝你的幫忙。", &metadata(Provider::Other, -0.1), None, &cfg);
        assert!(!result);
    }

    #[test]
    fn repetition_forces_llm() {
        let cfg = VoxCoreConfig::default();
        let info = RepetitionInfo {
            pattern: "好".into(),
            pattern_len: 1,
            repeat_count: 6,
            repeat_len: 6,
            total_len: 6,
            ratio: 1.0,
            severe: true,
        };
        let result = needs_llm("好好好好好好", &metadata(Provider::Qwen3, -0.1), Some(&info), &cfg);
        assert!(result);
    }

    #[test]
    fn routing_disabled_always_forces_llm() {
        let mut cfg = VoxCoreConfig::default();
        cfg.stages.routing = false;
        let result = needs_llm("好", &metadata(Provider::Other, -0.1), None, &cfg);
        assert!(result);
    }

    #[test]
    fn voice_command_matches_after_trimming_punctuation() {
        assert_eq!(match_voice_command("全部刪除。"), Some("delete_all"));
        assert_eq!(match_voice_command("全部刪除"), Some("delete_all"));
        assert_eq!(match_voice_command("全部刪除了"), None);
    }

    #[test]
    fn cyrillic_scalar_triggers_unexpected_script_retry() {
        assert_eq!(unexpected_script_retry("привет"), Some(RetryTarget::Japanese));
        assert_eq!(unexpected_script_retry("你好"), None);
    }

    #[test]
    fn polite_ending_with_particles_triggers_chinese_retry() {
        // です ending plus 2 particles (counted only after CJK/kana context).
        let text = "今日はとても忙しいです";
        assert_eq!(japanese_drift_retry(text, true, true), Some(RetryTarget::Chinese));
    }

    #[test]
    fn no_drift_when_not_in_auto_mode() {
        let text = "今日はとても忙しいです";
        assert_eq!(japanese_drift_retry(text, false, true), None);
    }

    #[test]
    fn low_confidence_retries_pinned_to_japanese() {
        let cfg = VoxCoreConfig::default();
        assert_eq!(low_confidence_retry(true, -0.7, &cfg), Some(RetryTarget::Japanese));
        assert_eq!(low_confidence_retry(true, -0.3, &cfg), None);
    }

    #[test]
    fn retry_scenario_c_and_d() {
        assert!(should_adopt_retry(-0.7, -0.4));
        assert!(!should_adopt_retry(-0.7, -0.9));
    }
}
