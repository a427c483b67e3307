//! ASR engine façade: a `{Unloaded -> Loaded -> Warm}`
//! state machine that owns the loaded model, performs warmup, and chunks
//! long audio at silence boundaries. All operations are serialized behind
//! a single mutex — at most one `load`/`transcribe`/`unload` call is in
//! flight at a time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Mutex;

use candle_core::{Device, Tensor};

use crate::audio_encoder::AudioEncoder;
use crate::config::{ModelConfig, ModelSize};
use crate::error::{Qwen3AsrError, Result};
use crate::features::{log_mel_spectrogram, MelFilterbank, SAMPLE_RATE};
use crate::generation::{self, GenerationResult, UncertainWord};
use crate::special_tokens::SpecialTokens;
use crate::text_decoder::TextDecoder;
use crate::tokenizer::Qwen3Tokenizer;
use crate::weights::WeightStore;

/// Re-transcription requires pinning language; long audio above this
/// threshold is chunked at a silence boundary instead of run whole
///.
pub const LONG_AUDIO_THRESHOLD_S: f64 = 20.0 * 60.0;
const SILENCE_SEARCH_WINDOW_S: f64 = 30.0;
const SILENCE_SLIDE_WINDOW_S: f64 = 0.5;
const SILENCE_SLIDE_OVERLAP: f64 = 0.5;
const WARMUP_MAX_ATTEMPTS: u32 = 3;

/// Names known to cause the model to transliterate embedded English into
/// the detected script, paired with the language tag that should be
/// pinned on rerun to preserve the code-switched English instead.
fn code_switch_remap_table() -> &'static HashMap<&'static str, &'static str> {
    static TABLE: std::sync::OnceLock<HashMap<&'static str, &'static str>> = std::sync::OnceLock::new();
    TABLE.get_or_init(|| {
        let mut m = HashMap::new();
        m.insert("Chinese", "English");
        m
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    Unloaded,
    Loaded,
    Warm,
}

struct LoadedModel {
    model_id: String,
    size: ModelSize,
    config: ModelConfig,
    tokenizer: Qwen3Tokenizer,
    specials: SpecialTokens,
    audio_encoder: AudioEncoder,
    text_decoder: TextDecoder,
    mel_filterbank: MelFilterbank,
    device: Device,
    state: ModelState,
}

pub struct Qwen3AsrEngine {
    inner: Mutex<Option<LoadedModel>>,
    device: Device,
}

impl Qwen3AsrEngine {
    pub fn new(device: Device) -> Self {
        Self {
            inner: Mutex::new(None),
            device,
        }
    }

    pub fn is_loaded(&self, model_id: &str) -> bool {
        self.inner
            .lock()
            .expect("engine mutex poisoned")
            .as_ref()
            .is_some_and(|m| m.model_id == model_id && m.state != ModelState::Unloaded)
    }

    pub fn state(&self) -> ModelState {
        self.inner
            .lock()
            .expect("engine mutex poisoned")
            .as_ref()
            .map(|m| m.state)
            .unwrap_or(ModelState::Unloaded)
    }

    /// Idempotent for the same `model_id`; releases the prior model first
    /// if `size` changes. Performs implicit warmup before returning.
    pub fn load(&self, model_dir: &Path, model_id: &str, size: ModelSize) -> Result<()> {
        {
            let guard = self.inner.lock().expect("engine mutex poisoned");
            if let Some(m) = guard.as_ref() {
                if m.model_id == model_id && m.size == size && m.state != ModelState::Unloaded {
                    return Ok(());
                }
            }
        }

        let config_path = model_dir.join("config.json");
        let config_text = std::fs::read_to_string(&config_path)
            .map_err(|e| Qwen3AsrError::WeightsMissing(format!("{}: {e}", config_path.display())))?;
        let config: ModelConfig = serde_json::from_str(&config_text)
            .map_err(|e| Qwen3AsrError::IncompatibleWeights(format!("config.json: {e}")))?;
        config.verify_against(size).map_err(Qwen3AsrError::IncompatibleWeights)?;

        let specials = SpecialTokens::fixed();
        let tokenizer = Qwen3Tokenizer::load_from_dir(model_dir, &specials)?;
        specials.verify_against(&tokenizer)?;

        let store = WeightStore::load(model_dir)?;
        let audio_encoder = AudioEncoder::load(&store, &config, &self.device)?;
        let text_decoder = TextDecoder::load(&store, &config, &self.device)?;
        let mel_filterbank = MelFilterbank::build()?;

        let loaded = LoadedModel {
            model_id: model_id.to_string(),
            size,
            config,
            tokenizer,
            specials,
            audio_encoder,
            text_decoder,
            mel_filterbank,
            device: self.device.clone(),
            state: ModelState::Loaded,
        };

        {
            let mut guard = self.inner.lock().expect("engine mutex poisoned");
            *guard = Some(loaded);
        }

        self.warmup(model_id)
    }

    /// Runs one transcription on 1s of silence, retrying up to
    /// [`WARMUP_MAX_ATTEMPTS`] times and releasing GPU scratch between
    /// tries (there is none to release on CPU, but the cache-clear call
    /// mirrors the accelerator-backed path). Fails the load entirely if
    /// every attempt fails.
    fn warmup(&self, model_id: &str) -> Result<()> {
        let silence = vec![0f32; SAMPLE_RATE];
        let mut last_err = None;
        for attempt in 1..=WARMUP_MAX_ATTEMPTS {
            match self.transcribe_uncached(&silence, None, None, None) {
                Ok(_) => {
                    let mut guard = self.inner.lock().expect("engine mutex poisoned");
                    if let Some(m) = guard.as_mut() {
                        m.state = ModelState::Warm;
                    }
                    return Ok(());
                }
                Err(e) => {
                    last_err = Some(e.to_string());
                    let mut guard = self.inner.lock().expect("engine mutex poisoned");
                    if let Some(m) = guard.as_mut() {
                        m.audio_encoder.clear_position_cache();
                    }
                }
            }
            let _ = attempt;
        }
        Err(Qwen3AsrError::WarmupFailed {
            model_id: model_id.to_string(),
            attempts: WARMUP_MAX_ATTEMPTS,
            cause: last_err.unwrap_or_else(|| "unknown error".to_string()),
        })
    }

    pub fn unload(&self) {
        let mut guard = self.inner.lock().expect("engine mutex poisoned");
        if let Some(m) = guard.as_mut() {
            m.audio_encoder.clear_position_cache();
        }
        *guard = None;
    }

    /// `transcribe(samples, language, prompt)` per the external contract
    ///. Triggers warmup first if called before it has completed;
    /// auto-chunks audio longer than [`LONG_AUDIO_THRESHOLD_S`] at a
    /// silence boundary.
    pub fn transcribe(&self, samples: &[f32], language: Option<&str>, prompt: Option<&str>) -> Result<TranscriptionResult> {
        self.transcribe_cancelable(samples, language, prompt, None)
    }

    pub fn transcribe_cancelable(
        &self,
        samples: &[f32],
        language: Option<&str>,
        prompt: Option<&str>,
        cancel: Option<&AtomicBool>,
    ) -> Result<TranscriptionResult> {
        {
            let needs_warmup = {
                let guard = self.inner.lock().expect("engine mutex poisoned");
                match guard.as_ref() {
                    None => return Err(Qwen3AsrError::DecoderNotLoaded),
                    Some(m) => m.state == ModelState::Loaded,
                }
            };
            if needs_warmup {
                let model_id = {
                    let guard = self.inner.lock().expect("engine mutex poisoned");
                    guard.as_ref().expect("checked above").model_id.clone()
                };
                self.warmup(&model_id)?;
            }
        }

        let duration_s = samples.len() as f64 / SAMPLE_RATE as f64;
        if duration_s <= LONG_AUDIO_THRESHOLD_S {
            return self.transcribe_uncached(samples, language, prompt, cancel);
        }

        let mut chunks = Vec::new();
        self.collect_silence_chunks(samples, language, prompt, cancel, &mut chunks)?;
        Ok(merge_chunk_results(chunks))
    }

    /// Recursively splits `samples` at silence boundaries until every piece
    /// is within [`LONG_AUDIO_THRESHOLD_S`], transcribing each independently
    /// and releasing GPU scratch between chunks.
    fn collect_silence_chunks(
        &self,
        samples: &[f32],
        language: Option<&str>,
        prompt: Option<&str>,
        cancel: Option<&AtomicBool>,
        out: &mut Vec<TranscriptionResult>,
    ) -> Result<()> {
        let duration_s = samples.len() as f64 / SAMPLE_RATE as f64;
        if duration_s <= LONG_AUDIO_THRESHOLD_S {
            out.push(self.transcribe_uncached(samples, language, prompt, cancel)?);
            return Ok(());
        }

        let cut = find_silence_cut_point(samples, LONG_AUDIO_THRESHOLD_S);
        let (first, rest) = samples.split_at(cut.clamp(1, samples.len() - 1));

        self.collect_silence_chunks(first, language, prompt, cancel, out)?;
        {
            let mut guard = self.inner.lock().expect("engine mutex poisoned");
            if let Some(m) = guard.as_mut() {
                m.audio_encoder.clear_position_cache();
            }
        }
        self.collect_silence_chunks(rest, language, prompt, cancel, out)
    }

    /// Runs one pass of the full pipeline (features -> encoder -> prompt
    /// build -> generation), plus the code-switch remap rerun when it
    /// fires, on a single chunk that is assumed to already fit the 30s
    /// feature-extraction budget per internal segment.
    fn transcribe_uncached(
        &self,
        samples: &[f32],
        language: Option<&str>,
        prompt: Option<&str>,
        cancel: Option<&AtomicBool>,
    ) -> Result<TranscriptionResult> {
        if samples.is_empty() {
            return Err(Qwen3AsrError::InvalidAudio("empty audio buffer".into()));
        }

        let duration_s = samples.len() as f64 / SAMPLE_RATE as f64;

        let mut guard = self.inner.lock().expect("engine mutex poisoned");
        let model = guard.as_mut().ok_or(Qwen3AsrError::DecoderNotLoaded)?;

        // The feature extractor truncates to a single 30s-equivalent chunk
        //; the façade's own chunking only operates at the
        // >20-minute silence-boundary granularity, not within a
        // single sub-30-minute utterance.
        let mel_frames = log_mel_spectrogram(samples, &model.mel_filterbank)?;
        let t_len = mel_frames.first().map(|row| row.len()).unwrap_or(0);
        let flat: Vec<f32> = mel_frames.iter().flat_map(|row| row.iter().copied()).collect();
        let mel_tensor =
            Tensor::from_vec(flat, (model.config.num_mel_bins, t_len), &model.device).map_err(Qwen3AsrError::Tensor)?;

        let audio_embeds = model.audio_encoder.forward(&mel_tensor)?;

        let cancel_flag: &dyn generation::CancelFlag = match cancel {
            Some(f) => f,
            None => &NO_CANCEL,
        };

        let first_pass = generation::generate_cancelable(
            &model.text_decoder,
            &model.tokenizer,
            &model.specials,
            &audio_embeds,
            prompt,
            language,
            None,
            duration_s,
            &model.device,
            cancel_flag,
        )?;

        let result = maybe_rerun_for_code_switch(
            &model.text_decoder,
            &model.tokenizer,
            &model.specials,
            &audio_embeds,
            prompt,
            language,
            duration_s,
            &model.device,
            cancel_flag,
            first_pass,
        )?;

        Ok(to_transcription_result(result))
    }
}

const NO_CANCEL: NeverCancelFlag = NeverCancelFlag;
struct NeverCancelFlag;
impl generation::CancelFlag for NeverCancelFlag {
    fn is_canceled(&self) -> bool {
        false
    }
}

/// When auto-detection (`language.is_none()`) lands on a language known to
/// transliterate code-switched English, rerun generation once pinned to
/// the remapped tag and keep the rerun's text/log-prob while preserving
/// the first pass's detected language.
#[allow(clippy::too_many_arguments)]
fn maybe_rerun_for_code_switch(
    decoder: &TextDecoder,
    tokenizer: &Qwen3Tokenizer,
    specials: &SpecialTokens,
    audio_embeds: &Tensor,
    prompt: Option<&str>,
    language: Option<&str>,
    duration_s: f64,
    device: &Device,
    cancel: &dyn generation::CancelFlag,
    first_pass: GenerationResult,
) -> Result<GenerationResult> {
    if language.is_some() {
        return Ok(first_pass);
    }
    let Some(detected) = first_pass.detected_language.as_deref() else {
        return Ok(first_pass);
    };
    let Some(&remapped) = code_switch_remap_table().get(detected) else {
        return Ok(first_pass);
    };

    let rerun = generation::generate_cancelable(
        decoder,
        tokenizer,
        specials,
        audio_embeds,
        prompt,
        Some(remapped),
        None,
        duration_s,
        device,
        cancel,
    )?;

    Ok(GenerationResult {
        text: rerun.text,
        avg_log_prob: rerun.avg_log_prob,
        token_count: rerun.token_count,
        detected_language: first_pass.detected_language,
        uncertain_words: rerun.uncertain_words,
    })
}

fn merge_generation_results(mut results: Vec<GenerationResult>) -> GenerationResult {
    if results.len() == 1 {
        return results.remove(0);
    }
    let total_tokens: u32 = results.iter().map(|r| r.token_count).sum();
    let weighted_sum: f64 = results.iter().map(|r| r.avg_log_prob * r.token_count as f64).sum();
    let avg_log_prob = if total_tokens > 0 { weighted_sum / total_tokens as f64 } else { 0.0 };
    let detected_language = results.first().and_then(|r| r.detected_language.clone());
    let text = results.iter().map(|r| r.text.as_str()).collect::<Vec<_>>().join(" ");
    let mut uncertain_words: Vec<UncertainWord> = results.into_iter().flat_map(|r| r.uncertain_words).collect();
    uncertain_words.sort_by(|a, b| a.avg_log_prob.total_cmp(&b.avg_log_prob));
    uncertain_words.truncate(8);
    GenerationResult {
        text,
        avg_log_prob,
        token_count: total_tokens,
        detected_language,
        uncertain_words,
    }
}

fn merge_chunk_results(results: Vec<TranscriptionResult>) -> TranscriptionResult {
    let generation: Vec<GenerationResult> = results
        .into_iter()
        .map(|r| GenerationResult {
            text: r.text,
            avg_log_prob: r.avg_log_prob,
            token_count: r.token_count,
            detected_language: r.detected_language,
            uncertain_words: r.uncertain_words,
        })
        .collect();
    to_transcription_result(merge_generation_results(generation))
}

fn to_transcription_result(g: GenerationResult) -> TranscriptionResult {
    TranscriptionResult {
        text: g.text,
        avg_log_prob: g.avg_log_prob,
        token_count: g.token_count,
        detected_language: g.detected_language,
        uncertain_words: g.uncertain_words,
    }
}

#[derive(Debug, Clone)]
pub struct TranscriptionResult {
    pub text: String,
    pub avg_log_prob: f64,
    pub token_count: u32,
    pub detected_language: Option<String>,
    pub uncertain_words: Vec<UncertainWord>,
}

/// Finds a cut point near `naive_mark_s` by sliding a 0.5s window with 50%
/// overlap across a +-30s search band and picking the position with
/// minimum RMS energy, cutting at its center.
fn find_silence_cut_point(samples: &[f32], naive_mark_s: f64) -> usize {
    let naive_mark = (naive_mark_s * SAMPLE_RATE as f64) as usize;
    let search_radius = (SILENCE_SEARCH_WINDOW_S * SAMPLE_RATE as f64) as usize;
    let window = (SILENCE_SLIDE_WINDOW_S * SAMPLE_RATE as f64) as usize;
    let step = ((1.0 - SILENCE_SLIDE_OVERLAP) * window as f64).max(1.0) as usize;

    let band_start = naive_mark.saturating_sub(search_radius);
    let band_end = (naive_mark + search_radius).min(samples.len());
    if window == 0 || band_end <= band_start || band_end - band_start < window {
        return naive_mark.min(samples.len());
    }

    let mut best_start = band_start;
    let mut best_rms = f32::MAX;
    let mut pos = band_start;
    while pos + window <= band_end {
        let slice = &samples[pos..pos + window];
        let rms = (slice.iter().map(|&s| s * s).sum::<f32>() / window as f32).sqrt();
        if rms < best_rms {
            best_rms = rms;
            best_start = pos;
        }
        pos += step;
    }

    (best_start + window / 2).min(samples.len())
}

pub fn model_weight_dir(base: &Path, model_id: &str) -> PathBuf {
    crate::weights::model_weight_dir(base, model_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_cut_point_prefers_a_quiet_window() {
        // 25 minutes of loud signal with a quiet 2-second notch around the
        // 20-minute mark.
        let sr = SAMPLE_RATE;
        let total = 25 * 60 * sr;
        let mut samples = vec![0.5f32; total];
        let quiet_center = 20 * 60 * sr;
        for i in quiet_center.saturating_sub(sr)..(quiet_center + sr).min(total) {
            samples[i] = 0.0;
        }
        let cut = find_silence_cut_point(&samples, LONG_AUDIO_THRESHOLD_S);
        assert!(
            cut > quiet_center.saturating_sub(sr) && cut < quiet_center + sr,
            "expected cut near the quiet notch, got {cut}"
        );
    }

    #[test]
    fn code_switch_table_maps_chinese_to_english() {
        assert_eq!(code_switch_remap_table().get("Chinese"), Some(&"English"));
    }
}
