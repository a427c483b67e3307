//! Model hyperparameters, loaded from `config.json` and
//! verified against the chosen [`ModelSize`] before weights are bound.

use enum_iterator::Sequence;
use serde::{Deserialize, Serialize};

/// The sidecar files a model directory must provide, enumerable so the
/// download helper can fetch and verify each member in turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Sequence)]
pub enum DataFile {
    Config,
    VocabJson,
    MergesTxt,
    TokenizerConfig,
    Weights,
}

impl DataFile {
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Config => "config.json",
            Self::VocabJson => "vocab.json",
            Self::MergesTxt => "merges.txt",
            Self::TokenizerConfig => "tokenizer_config.json",
            Self::Weights => "model.safetensors",
        }
    }

    /// Whether this file must be present for [`crate::engine::Qwen3AsrEngine::load`]
    /// to succeed. The BPE sidecars are optional because a tiktoken-format
    /// checkpoint ships `qwen.tiktoken` instead.
    pub fn is_required(self) -> bool {
        matches!(self, Self::Config | Self::Weights)
    }
}

/// The model-size choice a caller passes to `load`, kept as a small closed
/// enum so "releases prior model first if size changes" is a simple
/// equality check at the façade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Sequence)]
pub enum ModelSize {
    /// Smaller variant: fewer decoder layers, tuned for on-device latency.
    Compact,
    /// Full-size variant, higher accuracy at higher latency/memory cost.
    Standard,
}

impl ModelSize {
    /// The encoder layer count tied directly to model size (18 for the
    /// compact checkpoint, 24 for the standard one). The decoder's layer
    /// count `N` varies independently and is instead read straight out of
    /// `config.json`; this is used only as a cross-check.
    pub fn num_encoder_layers(&self) -> usize {
        match self {
            ModelSize::Compact => 18,
            ModelSize::Standard => 24,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelSize::Compact => "compact",
            ModelSize::Standard => "standard",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub vocab_size: usize,
    pub d_model: usize,
    pub num_mel_bins: usize,
    pub downsample_hidden: usize,
    pub n_window: usize,
    pub n_window_infer: usize,
    pub max_cnn_per_chunk: usize,
    pub num_encoder_layers: usize,
    pub encoder_heads: usize,
    pub encoder_ffn_dim: usize,

    pub num_decoder_layers: usize,
    pub num_attention_heads: usize,
    pub num_kv_heads: usize,
    pub head_dim: usize,
    pub intermediate_size: usize,
    pub rms_norm_eps: f64,
    pub rope_base: f64,
    pub max_target_positions: usize,

    /// Group-quantization parameters shared by all quantized linears.
    pub quant_group_size: usize,
    pub quant_bits: usize,
}

impl ModelConfig {
    pub fn verify_against(&self, size: ModelSize) -> Result<(), String> {
        if self.num_encoder_layers != size.num_encoder_layers() {
            return Err(format!(
                "config.json declares {} encoder layers, but {:?} expects {}",
                self.num_encoder_layers,
                size,
                size.num_encoder_layers()
            ));
        }
        if self.num_attention_heads % self.num_kv_heads != 0 {
            return Err(format!(
                "num_attention_heads ({}) must be a multiple of num_kv_heads ({})",
                self.num_attention_heads, self.num_kv_heads
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compact_config() -> ModelConfig {
        ModelConfig {
            vocab_size: 151936,
            d_model: 1024,
            num_mel_bins: 128,
            downsample_hidden: 256,
            n_window: 50,
            n_window_infer: 800,
            max_cnn_per_chunk: 100,
            num_encoder_layers: 18,
            encoder_heads: 16,
            encoder_ffn_dim: 4096,
            num_decoder_layers: 28,
            num_attention_heads: 16,
            num_kv_heads: 2,
            head_dim: 128,
            intermediate_size: 3072,
            rms_norm_eps: 1e-6,
            rope_base: 1e6,
            max_target_positions: 32768,
            quant_group_size: 128,
            quant_bits: 4,
        }
    }

    #[test]
    fn accepts_matching_encoder_layer_count() {
        assert!(compact_config().verify_against(ModelSize::Compact).is_ok());
    }

    #[test]
    fn rejects_mismatched_encoder_layer_count() {
        let mut cfg = compact_config();
        cfg.num_encoder_layers = 24;
        assert!(cfg.verify_against(ModelSize::Compact).is_err());
    }

    #[test]
    fn rejects_non_divisible_kv_heads() {
        let mut cfg = compact_config();
        cfg.num_kv_heads = 5;
        assert!(cfg.verify_against(ModelSize::Compact).is_err());
    }
}
