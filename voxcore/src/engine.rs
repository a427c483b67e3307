//! Exposed engine façade: wraps the ASR engine with the
//! pinyin DB, the correction protection list, and the full post-processing
//! and routing pipeline, so a caller gets a finished transcript rather than
//! a raw one.

use std::collections::HashMap;
use std::sync::RwLock;

use ahash::AHashMap;
use candle_core::Device;

use qwen3_candle::features::SAMPLE_RATE;
use qwen3_candle::{ModelSize, Qwen3AsrEngine, UncertainWord};

use crate::config::VoxCoreConfig;
use crate::context::Context;
use crate::error::Result;
use crate::pinyin_db::PinyinDb;
use crate::postproc;
use crate::protection::ProtectionList;
use crate::repetition::RepetitionInfo;
use crate::router::{self, Provider, RetryTarget, TranscriptionMetadata};
use crate::syllable::MergePinyinIndex;

pub use qwen3_candle::ModelState;

/// The fully post-processed result of one [`VoxCoreEngine::transcribe`]
/// call. `voice_command` is `Some` when the text matched the router's
/// interception table, in which case the caller should act on the
/// command rather than route to an LLM.
pub struct VoxCoreTranscription {
    pub text: String,
    pub needs_llm: bool,
    pub voice_command: Option<&'static str>,
    pub applied_steps: Vec<&'static str>,
    pub repetition_info: Option<RepetitionInfo>,
    pub detected_language: Option<String>,
    pub uncertain_words: Vec<UncertainWord>,
    /// Set when a retry fired and its result was adopted, naming the pinned language it retried to.
    pub retried_to: Option<&'static str>,
}

/// `{Unloaded -> Loaded -> Warm}` ASR engine plus the shared, read-mostly
/// post-processing resources. The pinyin DB and
/// merge-pinyin index are optional: the data-driven correction engines are
/// simply skipped until [`Self::load_pinyin_db`] has been called.
pub struct VoxCoreEngine {
    asr: Qwen3AsrEngine,
    pinyin_db: RwLock<Option<PinyinDb>>,
    merge_index: MergePinyinIndex,
    protection: ProtectionList,
    config: RwLock<VoxCoreConfig>,
}

impl VoxCoreEngine {
    pub fn new(device: Device) -> Self {
        Self {
            asr: Qwen3AsrEngine::new(device),
            pinyin_db: RwLock::new(None),
            merge_index: MergePinyinIndex::new(),
            protection: ProtectionList::new(),
            config: RwLock::new(VoxCoreConfig::default()),
        }
    }

    pub fn with_config(device: Device, config: VoxCoreConfig) -> Self {
        let engine = Self::new(device);
        *engine.config.write().expect("config lock poisoned") = config;
        engine
    }

    pub fn protection_list(&self) -> &ProtectionList {
        &self.protection
    }

    pub fn set_config(&self, config: VoxCoreConfig) {
        *self.config.write().expect("config lock poisoned") = config;
    }

    pub fn config(&self) -> VoxCoreConfig {
        self.config.read().expect("config lock poisoned").clone()
    }

    pub fn is_loaded(&self, model_id: &str) -> bool {
        self.asr.is_loaded(model_id)
    }

    pub fn state(&self) -> ModelState {
        self.asr.state()
    }

    #[tracing::instrument(skip(self))]
    pub fn load(&self, model_dir: &std::path::Path, model_id: &str, size: ModelSize) -> Result<()> {
        self.asr.load(model_dir, model_id, size)?;
        tracing::info!("model loaded");
        Ok(())
    }

    pub fn unload(&self) {
        self.asr.unload();
    }

    /// Loads the pinyin DB from `dir`, replacing any previously loaded one.
    /// The merge-pinyin index is rebuilt lazily against the new DB on next
    /// use.
    #[tracing::instrument(skip(self))]
    pub fn load_pinyin_db(&self, dir: &std::path::Path) -> Result<()> {
        let db = PinyinDb::load(dir)?;
        *self.pinyin_db.write().expect("pinyin db lock poisoned") = Some(db);
        tracing::info!("pinyin database loaded");
        Ok(())
    }

    #[tracing::instrument(skip(self, samples, context))]
    pub fn transcribe(
        &self,
        samples: &[f32],
        language: Option<&str>,
        prompt: Option<&str>,
        context: &Context,
    ) -> Result<VoxCoreTranscription> {
        let cfg = self.config();
        let auto_mode = language.is_none();

        let mut result = self.asr.transcribe(samples, language, prompt)?;
        let mut post = self.run_postproc(&result.text, context, &cfg);
        let mut retried_to = None;

        if let Some((target, adopt_unconditionally)) =
            retry_target(&post.processed_text, auto_mode, result.detected_language.as_deref(), result.avg_log_prob, &cfg)
        {
            let target_lang = match target {
                RetryTarget::Japanese => "Japanese",
                RetryTarget::Chinese => "Chinese",
            };
            let retry_result = self.asr.transcribe(samples, Some(target_lang), prompt)?;
            let retry_post = self.run_postproc(&retry_result.text, context, &cfg);
            let adopt = adopt_unconditionally || router::should_adopt_retry(result.avg_log_prob, retry_result.avg_log_prob);
            if adopt {
                tracing::debug!(target_lang, "adopted retry transcription");
                result = retry_result;
                post = retry_post;
                retried_to = Some(target_lang);
            }
        }

        if let Some(command) = router::match_voice_command(&post.processed_text) {
            return Ok(VoxCoreTranscription {
                text: post.processed_text,
                needs_llm: false,
                voice_command: Some(command),
                applied_steps: post.applied_steps,
                repetition_info: post.repetition_info,
                detected_language: result.detected_language,
                uncertain_words: result.uncertain_words,
                retried_to,
            });
        }

        let metadata = TranscriptionMetadata {
            provider: Provider::Qwen3,
            avg_log_prob: result.avg_log_prob,
            audio_duration_secs: samples.len() as f64 / SAMPLE_RATE as f64,
            auto_mode,
        };
        let needs_llm = router::needs_llm(&post.processed_text, &metadata, post.repetition_info.as_ref(), &cfg);

        Ok(VoxCoreTranscription {
            text: post.processed_text,
            needs_llm,
            voice_command: None,
            applied_steps: post.applied_steps,
            repetition_info: post.repetition_info,
            detected_language: result.detected_language,
            uncertain_words: result.uncertain_words,
            retried_to,
        })
    }

    fn run_postproc(&self, raw_text: &str, context: &Context, cfg: &VoxCoreConfig) -> postproc::PostProcessResult {
        let guard = self.pinyin_db.read().expect("pinyin db lock poisoned");
        match guard.as_ref() {
            Some(db) => postproc::run(raw_text, context, &cfg.stages, db, Some(&self.merge_index), &self.protection),
            None => {
                let empty = PinyinDb::from_parts(HashMap::new(), AHashMap::new(), AHashMap::new());
                postproc::run(raw_text, context, &cfg.stages, &empty, None, &self.protection)
            }
        }
    }
}

fn retry_target(
    text: &str,
    auto_mode: bool,
    detected_language: Option<&str>,
    avg_log_prob: f64,
    cfg: &VoxCoreConfig,
) -> Option<(RetryTarget, bool)> {
    if let Some(target) = router::unexpected_script_retry(text) {
        return Some((target, true));
    }
    let is_japanese = detected_language.map(|l| l.eq_ignore_ascii_case("japanese")).unwrap_or(false);
    if let Some(target) = router::japanese_drift_retry(text, auto_mode, is_japanese) {
        return Some((target, true));
    }
    if let Some(target) = router::low_confidence_retry(auto_mode, avg_log_prob, cfg) {
        return Some((target, false));
    }
    None
}
