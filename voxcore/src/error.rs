//! Error kinds for the post-processing pipeline and the exposed engine
//! façade. ASR-side errors are `qwen3_candle::Qwen3AsrError`
//! and are wrapped here rather than duplicated.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VoxCoreError>;

#[derive(Debug, Error)]
pub enum VoxCoreError {
    #[error("audio buffer is invalid: {0}")]
    InvalidAudio(String),

    #[error("asr engine is not loaded")]
    DecoderNotLoaded,

    #[error("transcription was canceled")]
    Canceled,

    #[error("pinyin database resource missing or malformed: {0}")]
    PinyinDb(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("persistence error: {0}")]
    Storage(String),

    #[error(transparent)]
    Asr(#[from] qwen3_candle::Qwen3AsrError),
}
