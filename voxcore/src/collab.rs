//! Narrow interfaces to the core's external collaborators: the LLM enhancer, transcript-history storage, and the capability
//! interface for alternative ASR backends. The core never implements these
//! itself — audio capture, the LLM call, and history storage are all
//! explicitly out of scope — but it depends on them through traits
//! shaped after a `ChatCompletionsProvider`-style abstraction: the
//! caller supplies an implementation rather than this crate owning one.

use crate::context::Context;

/// Downstream LLM text enhancer. The confidence router decides
/// *whether* to call this; the call itself, and any model selection, is the
/// collaborator's responsibility.
#[async_trait::async_trait]
pub trait LlmEnhancer: Send + Sync {
    async fn enhance(&self, text: &str, ctx: &Context) -> anyhow::Result<String>;

    /// A stable identifier for the enhancer's current configuration, used by
    /// callers that cache LLM responses keyed by it and need to invalidate
    /// the cache when the configuration changes.
    fn config_hash(&self) -> String;
}

/// Persists finalized transcripts. Out of scope for this crate beyond
/// the interface shape — the caller supplies an implementation backed by
/// whatever history store the surrounding application already has.
pub trait TranscriptHistoryStore: Send + Sync {
    fn save(&self, text: &str, detected_language: Option<&str>) -> anyhow::Result<()>;
}

/// An extension hook in place of dynamic dispatch over "any
/// TranscriptionModel": a small capability interface a
/// third-party ASR backend can implement alongside the built-in Qwen3-ASR
/// provider.
pub trait TranscriptionProvider: Send + Sync {
    fn id(&self) -> &str;
    fn provider_tag(&self) -> &str;
    fn load(&self, model_dir: &std::path::Path) -> anyhow::Result<()>;
    fn transcribe(&self, samples: &[f32], language: Option<&str>) -> anyhow::Result<String>;
    fn cleanup(&self);
}
