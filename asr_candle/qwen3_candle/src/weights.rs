//! Multi-shard tensor archive loader. Each shard
//! is mmapped and parsed with the `safetensors` crate; tensor bytes are
//! copied out into owned buffers immediately so the mmap can be dropped and
//! callers never juggle shard lifetimes. Audio-encoder tensors are bound by
//! the `audio_tower.` prefix, text-decoder tensors by `model.`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::Engine;
use byteorder::{ByteOrder, LittleEndian};
use candle_core::{DType, Device, Tensor};
use safetensors::Dtype as StDtype;

use crate::error::{Qwen3AsrError, Result};
use crate::quant::{QuantSpec, QuantizedTensor};

struct OwnedTensor {
    shape: Vec<usize>,
    dtype: StDtype,
    data: Vec<u8>,
}

impl OwnedTensor {
    fn to_f32_vec(&self) -> Result<Vec<f32>> {
        match self.dtype {
            StDtype::F32 => {
                let mut out = vec![0f32; self.data.len() / 4];
                LittleEndian::read_f32_into(&self.data, &mut out);
                Ok(out)
            }
            StDtype::F16 => Ok(self
                .data
                .chunks_exact(2)
                .map(|b| half::f16::from_le_bytes([b[0], b[1]]).to_f32())
                .collect()),
            StDtype::BF16 => Ok(self
                .data
                .chunks_exact(2)
                .map(|b| half::bf16::from_le_bytes([b[0], b[1]]).to_f32())
                .collect()),
            other => Err(Qwen3AsrError::IncompatibleWeights(format!(
                "expected a float tensor, found {other:?}"
            ))),
        }
    }

    fn to_u32_vec(&self) -> Result<Vec<u32>> {
        match self.dtype {
            StDtype::U32 => {
                let mut out = vec![0u32; self.data.len() / 4];
                LittleEndian::read_u32_into(&self.data, &mut out);
                Ok(out)
            }
            other => Err(Qwen3AsrError::IncompatibleWeights(format!(
                "expected a packed u32 tensor, found {other:?}"
            ))),
        }
    }

    fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        let data = self.to_f32_vec()?;
        Tensor::from_vec(data, self.shape.clone(), device).map_err(Qwen3AsrError::Tensor)
    }
}

fn load_shard(path: &Path) -> Result<HashMap<String, OwnedTensor>> {
    let file = std::fs::File::open(path)
        .map_err(|e| Qwen3AsrError::WeightsMissing(format!("{}: {e}", path.display())))?;
    let mmap = unsafe {
        memmap2::Mmap::map(&file)
            .map_err(|e| Qwen3AsrError::WeightsMissing(format!("{}: {e}", path.display())))?
    };
    let st = safetensors::SafeTensors::deserialize(&mmap).map_err(|e| {
        Qwen3AsrError::IncompatibleWeights(format!("{}: {e}", path.display()))
    })?;

    let mut out = HashMap::with_capacity(st.names().len());
    for name in st.names() {
        let view = st
            .tensor(name)
            .map_err(|e| Qwen3AsrError::IncompatibleWeights(e.to_string()))?;
        out.insert(
            name.to_string(),
            OwnedTensor {
                shape: view.shape().to_vec(),
                dtype: view.dtype(),
                data: view.data().to_vec(),
            },
        );
    }
    Ok(out)
}

/// All tensors from a model directory's shard set, keyed by their dotted
/// name exactly as they appear in the archive.
pub struct WeightStore {
    tensors: HashMap<String, OwnedTensor>,
}

impl WeightStore {
    /// Loads `model.safetensors.index.json` if present (multi-shard),
    /// otherwise a single `model.safetensors`.
    pub fn load(model_dir: &Path) -> Result<Self> {
        let index_path = model_dir.join("model.safetensors.index.json");
        let mut tensors = HashMap::new();

        if index_path.is_file() {
            let index_text = std::fs::read_to_string(&index_path)
                .map_err(|e| Qwen3AsrError::WeightsMissing(format!("{}: {e}", index_path.display())))?;
            let index: serde_json::Value = serde_json::from_str(&index_text).map_err(|e| {
                Qwen3AsrError::IncompatibleWeights(format!("malformed index.json: {e}"))
            })?;
            let weight_map = index
                .get("weight_map")
                .and_then(|v| v.as_object())
                .ok_or_else(|| {
                    Qwen3AsrError::IncompatibleWeights("index.json missing weight_map".into())
                })?;

            let mut shard_names: Vec<String> = weight_map
                .values()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            shard_names.sort();
            shard_names.dedup();

            let mut shards: HashMap<String, HashMap<String, OwnedTensor>> = HashMap::new();
            for shard_name in &shard_names {
                shards.insert(shard_name.clone(), load_shard(&model_dir.join(shard_name))?);
            }
            for (tensor_name, shard_value) in weight_map {
                let shard_name = shard_value.as_str().ok_or_else(|| {
                    Qwen3AsrError::IncompatibleWeights(format!(
                        "index.json entry for {tensor_name} is not a string"
                    ))
                })?;
                let shard = shards.get_mut(shard_name).ok_or_else(|| {
                    Qwen3AsrError::WeightsMissing(format!("shard {shard_name} not loaded"))
                })?;
                if let Some(t) = shard.remove(tensor_name) {
                    tensors.insert(tensor_name.clone(), t);
                }
            }
        } else {
            let single = model_dir.join("model.safetensors");
            tensors = load_shard(&single)?;
        }

        Ok(Self { tensors })
    }

    fn get(&self, name: &str) -> Result<&OwnedTensor> {
        self.tensors
            .get(name)
            .ok_or_else(|| Qwen3AsrError::WeightsMissing(name.to_string()))
    }

    pub fn has(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    pub fn tensor(&self, name: &str, device: &Device) -> Result<Tensor> {
        self.get(name)?.to_tensor(device)
    }

    pub fn tensor_opt(&self, name: &str, device: &Device) -> Result<Option<Tensor>> {
        match self.tensors.get(name) {
            Some(t) => Ok(Some(t.to_tensor(device)?)),
            None => Ok(None),
        }
    }

    /// Reads a plain (un-quantized) linear layer's `.weight` and optional
    /// `.bias` at `prefix`.
    pub fn linear(&self, prefix: &str, device: &Device) -> Result<(Tensor, Option<Tensor>)> {
        let weight = self.tensor(&format!("{prefix}.weight"), device)?;
        let bias = self.tensor_opt(&format!("{prefix}.bias"), device)?;
        Ok((weight, bias))
    }

    /// Reads a group-quantized linear layer's packed weight, scales and
    /// biases at `prefix`.
    pub fn quantized_linear(
        &self,
        prefix: &str,
        out_dim: usize,
        in_dim: usize,
        spec: QuantSpec,
    ) -> Result<QuantizedTensor> {
        let packed = self.get(&format!("{prefix}.weight"))?.to_u32_vec()?;
        let scales = self.get(&format!("{prefix}.scales"))?.to_f32_vec()?;
        let biases = self.get(&format!("{prefix}.biases"))?.to_f32_vec()?;
        QuantizedTensor::new(packed, scales, biases, out_dim, in_dim, spec)
    }

    pub fn rms_norm_weight(&self, prefix: &str, device: &Device) -> Result<Tensor> {
        self.tensor(&format!("{prefix}.weight"), device)
    }

    pub fn layer_norm(&self, prefix: &str, device: &Device) -> Result<(Tensor, Tensor)> {
        let weight = self.tensor(&format!("{prefix}.weight"), device)?;
        let bias = self.tensor(&format!("{prefix}.bias"), device)?;
        Ok((weight, bias))
    }

    pub fn conv2d(&self, prefix: &str, device: &Device) -> Result<(Tensor, Tensor)> {
        let weight = self.tensor(&format!("{prefix}.weight"), device)?;
        let bias = self.tensor(&format!("{prefix}.bias"), device)?;
        Ok((weight, bias))
    }
}

/// Repo ids long enough to risk `ENAMETOOLONG` on common filesystems get
/// truncated and suffixed with a short content hash so two different ids
/// sharing a truncated prefix never collide on disk.
const MAX_SANITIZED_LEN: usize = 120;

pub fn sanitize_model_id(raw: &str) -> String {
    if raw == "." || raw == ".." {
        return "_".repeat(raw.len());
    }
    let sanitized: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.len() <= MAX_SANITIZED_LEN {
        return sanitized;
    }
    let hash = blake3::hash(raw.as_bytes());
    let suffix = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&hash.as_bytes()[..6]);
    format!("{}_{suffix}", &sanitized[..MAX_SANITIZED_LEN - suffix.len() - 1])
}

pub fn model_weight_dir(base: &Path, model_id: &str) -> PathBuf {
    base.join(sanitize_model_id(model_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_unsafe_characters() {
        assert_eq!(sanitize_model_id("qwen3/asr:v1"), "qwen3_asr_v1");
        assert_eq!(sanitize_model_id(".."), "__");
        assert_eq!(sanitize_model_id("."), "_");
        assert_eq!(sanitize_model_id("normal-name_1.0"), "normal-name_1.0");
    }

    #[test]
    fn long_ids_are_truncated_with_a_hash_suffix() {
        let long_id = "a".repeat(200);
        let sanitized = sanitize_model_id(&long_id);
        assert!(sanitized.len() <= MAX_SANITIZED_LEN);
        assert!(sanitized.starts_with("aaaa"));
        // Distinct long ids sharing a truncated prefix must not collide.
        let other = format!("{long_id}b");
        assert_ne!(sanitized, sanitize_model_id(&other));
    }

    #[test]
    fn missing_shard_is_weights_missing_error() {
        let dir = std::env::temp_dir().join(format!("qwen3_weights_missing_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let err = WeightStore::load(&dir).unwrap_err();
        assert!(matches!(err, Qwen3AsrError::WeightsMissing(_)));
    }
}
