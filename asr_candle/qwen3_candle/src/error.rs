//! Error kinds for the Qwen3-ASR engine, a stable, narrow taxonomy callers
//! can match on instead of an opaque `anyhow::Error`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Qwen3AsrError {
    #[error("invalid audio input: {0}")]
    InvalidAudio(String),

    #[error("failed to build FFT plan for the feature extractor")]
    FftSetup,

    #[error("mel filterbank was not initialized before feature extraction")]
    MelNotInitialized,

    #[error("unsupported or malformed tokenizer archive: {0}")]
    TokenizerFormat(String),

    #[error(
        "generation requires exactly one of inputs_embeds or input_ids"
    )]
    NoInputProvided,

    #[error("required weight tensor is missing: {0}")]
    WeightsMissing(String),

    #[error("weight archive is incompatible with the selected model config: {0}")]
    IncompatibleWeights(String),

    #[error("decoder has not been loaded")]
    DecoderNotLoaded,

    #[error(
        "warmup failed for model {model_id} after {attempts} attempts: {cause}"
    )]
    WarmupFailed {
        model_id: String,
        attempts: u32,
        cause: String,
    },

    #[error("transcription canceled")]
    Canceled,

    #[error("invalid remote file name: {0}")]
    InvalidRemoteFileName(String),

    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}

pub type Result<T> = std::result::Result<T, Qwen3AsrError>;
