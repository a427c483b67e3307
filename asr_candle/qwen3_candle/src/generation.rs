//! Autoregressive greedy generation loop: builds the
//! chat-formatted prompt with placeholder audio tokens, splices the audio
//! encoder's embeddings into the input-embedding sequence, then runs
//! greedy decoding with a KV cache until `eos` or a token budget, tracking
//! per-token log-probabilities for "uncertain word" grouping.

use candle_core::{DType, Device, Tensor, D};
use candle_nn::ops::softmax;

use crate::error::{Qwen3AsrError, Result};
use crate::special_tokens::SpecialTokens;
use crate::text_decoder::{LayerCache, TextDecoder};
use crate::tokenizer::Qwen3Tokenizer;

/// How often (in decode steps) the loop forces materialization of the KV
/// cache and latest logits, per the design's "memory discipline" note.
pub const EVAL_INTERVAL: usize = 50;

/// `max_tokens = clamp(448, ceil(duration_s/30 * 448), 32768)`.
pub fn default_max_tokens(duration_s: f64) -> usize {
    let scaled = (duration_s / 30.0 * 448.0).ceil().max(0.0) as usize;
    scaled.clamp(448, 32768)
}

#[derive(Debug, Clone)]
pub struct UncertainWord {
    pub text: String,
    pub avg_log_prob: f64,
}

#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub text: String,
    pub avg_log_prob: f64,
    pub token_count: u32,
    pub detected_language: Option<String>,
    pub uncertain_words: Vec<UncertainWord>,
}

/// A function the caller may poll between decode steps to request
/// cooperative cancellation.
pub trait CancelFlag {
    fn is_canceled(&self) -> bool;
}

impl CancelFlag for std::sync::atomic::AtomicBool {
    fn is_canceled(&self) -> bool {
        self.load(std::sync::atomic::Ordering::Relaxed)
    }
}

struct NeverCancel;
impl CancelFlag for NeverCancel {
    fn is_canceled(&self) -> bool {
        false
    }
}

/// Builds the ID sequence for the chat-formatted prompt with `audio_pad`
/// placeholders where the audio embeddings will later be spliced, and
/// returns the index range those placeholders occupy.
fn build_prompt_ids(
    tokenizer: &Qwen3Tokenizer,
    specials: &SpecialTokens,
    system_prompt: Option<&str>,
    audio_token_count: usize,
    language: Option<&str>,
) -> Result<(Vec<u32>, std::ops::Range<usize>)> {
    let mut ids = Vec::new();

    ids.push(specials.im_start);
    ids.extend(tokenizer.encode("system")?);
    ids.push(specials.newline);
    if let Some(p) = system_prompt {
        ids.extend(tokenizer.encode(p)?);
    }
    ids.push(specials.im_end);
    ids.push(specials.newline);

    ids.push(specials.im_start);
    ids.extend(tokenizer.encode("user")?);
    ids.push(specials.newline);
    ids.push(specials.audio_start);

    let audio_start_idx = ids.len();
    for _ in 0..audio_token_count {
        ids.push(specials.audio_pad);
    }
    let audio_range = audio_start_idx..ids.len();

    ids.push(specials.audio_end);
    ids.push(specials.im_end);
    ids.push(specials.newline);

    ids.push(specials.im_start);
    ids.extend(tokenizer.encode("assistant")?);
    ids.push(specials.newline);

    match language {
        None => {
            ids.extend(tokenizer.encode("language")?);
        }
        Some(lang) => {
            ids.extend(tokenizer.encode(&format!("language {lang}"))?);
            ids.push(specials.asr_text);
        }
    }

    Ok((ids, audio_range))
}

/// Splices `audio_embeds` (`[1, T', d_model]`) into the embedded prompt
/// sequence at `audio_range`, replacing that many placeholder embeddings.
fn splice_audio_embeds(prompt_embeds: &Tensor, audio_embeds: &Tensor, audio_range: &std::ops::Range<usize>) -> Result<Tensor> {
    let before = prompt_embeds
        .narrow(1, 0, audio_range.start)
        .map_err(Qwen3AsrError::Tensor)?;
    let after_start = audio_range.end;
    let total = prompt_embeds.dim(1).map_err(Qwen3AsrError::Tensor)?;
    let after = prompt_embeds
        .narrow(1, after_start, total - after_start)
        .map_err(Qwen3AsrError::Tensor)?;
    Tensor::cat(&[&before, audio_embeds, &after], 1).map_err(Qwen3AsrError::Tensor)
}

#[allow(clippy::too_many_arguments)]
pub fn generate(
    decoder: &TextDecoder,
    tokenizer: &Qwen3Tokenizer,
    specials: &SpecialTokens,
    audio_embeds: &Tensor,
    system_prompt: Option<&str>,
    language: Option<&str>,
    max_tokens: Option<usize>,
    duration_s: f64,
    device: &Device,
) -> Result<GenerationResult> {
    generate_cancelable(
        decoder,
        tokenizer,
        specials,
        audio_embeds,
        system_prompt,
        language,
        max_tokens,
        duration_s,
        device,
        &NeverCancel,
    )
}

#[allow(clippy::too_many_arguments)]
pub fn generate_cancelable(
    decoder: &TextDecoder,
    tokenizer: &Qwen3Tokenizer,
    specials: &SpecialTokens,
    audio_embeds: &Tensor,
    system_prompt: Option<&str>,
    language: Option<&str>,
    max_tokens: Option<usize>,
    duration_s: f64,
    device: &Device,
    cancel: &dyn CancelFlag,
) -> Result<GenerationResult> {
    let audio_token_count = audio_embeds.dim(1).map_err(Qwen3AsrError::Tensor)?;
    let (prompt_ids, audio_range) = build_prompt_ids(tokenizer, specials, system_prompt, audio_token_count, language)?;
    let original_len = prompt_ids.len();

    let prompt_embeds = decoder.embed_ids(&prompt_ids)?;
    let input_embeds = splice_audio_embeds(&prompt_embeds, audio_embeds, &audio_range)?;
    let spliced_len = input_embeds.dim(1).map_err(Qwen3AsrError::Tensor)?;
    debug_assert_eq!(spliced_len, original_len);

    let max_tokens = max_tokens.unwrap_or_else(|| default_max_tokens(duration_s));

    // Auto-detect mode inserts the literal word "language" into the prompt
    // so the model predicts the language name next; those prefill tokens
    // are mirrored into `generated` so the `language <X>` parser below sees
    // them as if they had been produced by the loop.
    let auto_mode = language.is_none();
    let mut generated: Vec<u32> = if auto_mode {
        tokenizer.encode("language")?
    } else {
        Vec::new()
    };
    let prefill_len = generated.len();

    let mut cache: Vec<LayerCache> = Vec::with_capacity(decoder.num_layers());
    let mut counting = !auto_mode;
    let mut sum_log_prob = 0f64;
    let mut counted_tokens = 0u32;
    let mut uncertain: Vec<(usize, f64)> = Vec::new();

    let hidden = decoder.forward(Some(&input_embeds), None, None, &mut cache)?;
    let last_hidden = hidden
        .narrow(1, hidden.dim(1).map_err(Qwen3AsrError::Tensor)? - 1, 1)
        .map_err(Qwen3AsrError::Tensor)?;
    let mut next_logits = decoder.lm_head(&last_hidden)?;

    for step in 0..max_tokens {
        if cancel.is_canceled() {
            return Err(Qwen3AsrError::Canceled);
        }

        let probs = softmax(&next_logits.to_dtype(DType::F32).map_err(Qwen3AsrError::Tensor)?, D::Minus1)
            .map_err(Qwen3AsrError::Tensor)?;
        let probs_vec: Vec<f32> = probs
            .flatten_all()
            .map_err(Qwen3AsrError::Tensor)?
            .to_vec1()
            .map_err(Qwen3AsrError::Tensor)?;

        let (next_id, next_prob) = probs_vec
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(i, &p)| (i as u32, p))
            .expect("softmax output is never empty");

        if next_id == specials.eos() {
            break;
        }

        if !counting && next_id == specials.asr_text {
            counting = true;
        } else if counting {
            let log_prob = (next_prob.max(1e-30) as f64).ln();
            sum_log_prob += log_prob;
            counted_tokens += 1;
            if log_prob < -1.0 {
                uncertain.push((generated.len(), log_prob));
            }
        }

        generated.push(next_id);

        if step + 1 >= max_tokens {
            break;
        }

        let hidden = decoder.forward(None, Some(&[next_id]), None, &mut cache)?;
        next_logits = decoder.lm_head(&hidden)?;

        if (step + 1) % EVAL_INTERVAL == 0 {
            flush(&next_logits)?;
            for layer in cache.iter().flatten() {
                flush(&layer.0)?;
                flush(&layer.1)?;
            }
        }
    }
    flush(&next_logits)?;
    for layer in cache.iter().flatten() {
        flush(&layer.0)?;
        flush(&layer.1)?;
    }

    let (text, detected_language) = parse_output(tokenizer, specials, &generated, auto_mode, prefill_len);
    let avg_log_prob = if counted_tokens > 0 {
        sum_log_prob / counted_tokens as f64
    } else {
        0.0
    };
    let uncertain_words = group_uncertain_words(tokenizer, &generated, &uncertain);

    Ok(GenerationResult {
        text,
        avg_log_prob,
        token_count: counted_tokens,
        detected_language,
        uncertain_words,
    })
}

/// Forces materialization of a tensor to sever the lazy computation graph
/// and release intermediate nodes.
fn flush(t: &Tensor) -> Result<()> {
    t.to_vec1::<f32>().ok();
    let _ = t.dims();
    Ok(())
}

/// Locates `<asr_text>` and returns the text after it (auto mode); falls
/// back to string decoding plus prefix-stripping when the marker never
/// appears, and extracts the detected language from the `language <lang>`
/// prefix either way.
fn parse_output(
    tokenizer: &Qwen3Tokenizer,
    specials: &SpecialTokens,
    generated: &[u32],
    auto_mode: bool,
    prefill_len: usize,
) -> (String, Option<String>) {
    if let Some(marker_pos) = generated.iter().position(|&id| id == specials.asr_text) {
        let transcript_ids = &generated[marker_pos + 1..];
        let prefix_ids = &generated[..marker_pos];
        let detected_language = extract_language(tokenizer, prefix_ids);
        let text = tokenizer.decode(transcript_ids);
        return (text.trim().to_string(), detected_language);
    }

    if auto_mode {
        let decoded = tokenizer.decode(generated);
        let (lang, rest) = strip_language_prefix(&decoded);
        return (rest.trim().to_string(), lang);
    }

    let text = tokenizer.decode(&generated[prefill_len.min(generated.len())..]);
    (text.trim().to_string(), None)
}

fn extract_language(tokenizer: &Qwen3Tokenizer, prefix_ids: &[u32]) -> Option<String> {
    let decoded = tokenizer.decode(prefix_ids);
    strip_language_prefix(&decoded).0
}

/// Splits off a leading `"language <lang> "` prefix, returning the
/// extracted language name and the remainder of the string.
fn strip_language_prefix(s: &str) -> (Option<String>, &str) {
    let trimmed = s.trim_start();
    let Some(after_kw) = trimmed.strip_prefix("language ") else {
        return (None, s);
    };
    let after_kw = after_kw.trim_start();
    match after_kw.split_once(' ') {
        Some((lang, rest)) => (Some(lang.to_string()), rest),
        None => (Some(after_kw.trim_end().to_string()), ""),
    }
}

/// Groups adjacent uncertain-token positions into words, drops groups with
/// more than 4 Chinese characters, and returns at most 8 ordered by
/// ascending log-prob.
fn group_uncertain_words(tokenizer: &Qwen3Tokenizer, generated: &[u32], uncertain: &[(usize, f64)]) -> Vec<UncertainWord> {
    if uncertain.is_empty() {
        return Vec::new();
    }

    let mut groups: Vec<(Vec<usize>, f64)> = Vec::new();
    for &(pos, log_prob) in uncertain {
        match groups.last_mut() {
            Some((positions, min_lp)) if positions.last() == Some(&(pos - 1)) => {
                positions.push(pos);
                *min_lp = min_lp.min(log_prob);
            }
            _ => groups.push((vec![pos], log_prob)),
        }
    }

    let mut words: Vec<UncertainWord> = groups
        .into_iter()
        .filter_map(|(positions, log_prob)| {
            let ids: Vec<u32> = positions
                .iter()
                .filter_map(|&p| generated.get(p).copied())
                .collect();
            let text: String = ids.iter().map(|&id| tokenizer.decode(&[id])).collect::<String>();
            let text = text.trim().to_string();
            let cjk_count = text
                .chars()
                .filter(|&c| matches!(c as u32, 0x4E00..=0x9FFF | 0x3400..=0x4DBF))
                .count();
            if cjk_count > 4 {
                return None;
            }
            Some(UncertainWord {
                text,
                avg_log_prob: log_prob,
            })
        })
        .collect();

    words.sort_by(|a, b| a.avg_log_prob.total_cmp(&b.avg_log_prob));
    words.truncate(8);
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_tokens_is_clamped_into_range() {
        assert_eq!(default_max_tokens(0.0), 448);
        assert_eq!(default_max_tokens(30.0), 448);
        assert_eq!(default_max_tokens(60.0), 896);
        assert_eq!(default_max_tokens(1_000_000.0), 32768);
    }

    #[test]
    fn strips_language_prefix() {
        let (lang, rest) = strip_language_prefix("language Chinese 你好");
        assert_eq!(lang.as_deref(), Some("Chinese"));
        assert_eq!(rest, "你好");
    }

    #[test]
    fn no_prefix_returns_original_text() {
        let (lang, rest) = strip_language_prefix("你好世界");
        assert_eq!(lang, None);
        assert_eq!(rest, "你好世界");
    }

    #[test]
    fn single_word_prefix_with_no_remainder_is_the_whole_language_name() {
        let (lang, rest) = strip_language_prefix("language Japanese");
        assert_eq!(lang.as_deref(), Some("Japanese"));
        assert_eq!(rest, "");
    }
}
