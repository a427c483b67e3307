//! Qwen3-ASR inference engine: byte-level tokenizer, Whisper-style feature
//! extractor, chunked block-sparse audio encoder, group-quantized GQA text
//! decoder, greedy generation loop and the ASR engine façade that ties
//! them together.

pub mod audio_encoder;
pub mod config;
pub mod engine;
pub mod error;
pub mod features;
pub mod generation;
pub mod pos_cache;
pub mod quant;
pub mod special_tokens;
pub mod text_decoder;
pub mod tokenizer;
pub mod weights;

pub use config::{DataFile, ModelConfig, ModelSize};
pub use engine::{ModelState, Qwen3AsrEngine, TranscriptionResult};
pub use error::{Qwen3AsrError, Result};
pub use generation::UncertainWord;
pub use special_tokens::SpecialTokens;
