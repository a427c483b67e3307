//! Quantized text decoder: group-quantized embedding,
//! `N` GQA decoder layers with per-head RMSNorm on Q/K and RoPE, SwiGLU
//! MLP, and a tied LM head applied as a quantized matmul.

use candle_core::{Device, Tensor, D};
use candle_nn::ops::softmax;

use crate::config::ModelConfig;
use crate::error::{Qwen3AsrError, Result};
use crate::quant::{dequantize_rows, QuantSpec, QuantizedTensor};
use crate::weights::WeightStore;

const NEG_INF: f32 = -1e9;

pub type LayerCache = Option<(Tensor, Tensor)>;

struct RmsNorm {
    weight: Tensor,
    eps: f64,
}

impl RmsNorm {
    fn load(store: &WeightStore, prefix: &str, device: &Device, eps: f64) -> Result<Self> {
        Ok(Self {
            weight: store.rms_norm_weight(prefix, device)?,
            eps,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let variance = x
            .sqr()
            .map_err(Qwen3AsrError::Tensor)?
            .mean_keepdim(D::Minus1)
            .map_err(Qwen3AsrError::Tensor)?;
        let denom = (variance + self.eps).map_err(Qwen3AsrError::Tensor)?.sqrt().map_err(Qwen3AsrError::Tensor)?;
        let normed = x.broadcast_div(&denom).map_err(Qwen3AsrError::Tensor)?;
        normed.broadcast_mul(&self.weight).map_err(Qwen3AsrError::Tensor)
    }
}

struct RotaryEmbedding {
    cos: Tensor,
    sin: Tensor,
}

impl RotaryEmbedding {
    fn new(head_dim: usize, base: f64, max_positions: usize, device: &Device) -> Result<Self> {
        let half = head_dim / 2;
        let inv_freq: Vec<f32> = (0..half)
            .map(|i| (1.0 / base.powf(2.0 * i as f64 / head_dim as f64)) as f32)
            .collect();
        let mut cos = vec![0f32; max_positions * half];
        let mut sin = vec![0f32; max_positions * half];
        for pos in 0..max_positions {
            for (i, &f) in inv_freq.iter().enumerate() {
                let angle = pos as f32 * f;
                cos[pos * half + i] = angle.cos();
                sin[pos * half + i] = angle.sin();
            }
        }
        Ok(Self {
            cos: Tensor::from_vec(cos, (max_positions, half), device).map_err(Qwen3AsrError::Tensor)?,
            sin: Tensor::from_vec(sin, (max_positions, half), device).map_err(Qwen3AsrError::Tensor)?,
        })
    }

    /// Applies rotary embedding to `x` shaped `[b, heads, seq, head_dim]`
    /// at position offset `offset`.
    fn apply(&self, x: &Tensor, offset: usize) -> Result<Tensor> {
        let (_, _, seq, head_dim) = x.dims4().map_err(Qwen3AsrError::Tensor)?;
        let half = head_dim / 2;
        let cos = self.cos.narrow(0, offset, seq).map_err(Qwen3AsrError::Tensor)?;
        let sin = self.sin.narrow(0, offset, seq).map_err(Qwen3AsrError::Tensor)?;
        let cos = cos.reshape((1, 1, seq, half)).map_err(Qwen3AsrError::Tensor)?;
        let sin = sin.reshape((1, 1, seq, half)).map_err(Qwen3AsrError::Tensor)?;

        let x1 = x.narrow(D::Minus1, 0, half).map_err(Qwen3AsrError::Tensor)?;
        let x2 = x.narrow(D::Minus1, half, half).map_err(Qwen3AsrError::Tensor)?;

        let rot_x1 = (x1.broadcast_mul(&cos).map_err(Qwen3AsrError::Tensor)?
            - x2.broadcast_mul(&sin).map_err(Qwen3AsrError::Tensor)?)
            .map_err(Qwen3AsrError::Tensor)?;
        let rot_x2 = (x2.broadcast_mul(&cos).map_err(Qwen3AsrError::Tensor)?
            + x1.broadcast_mul(&sin).map_err(Qwen3AsrError::Tensor)?)
            .map_err(Qwen3AsrError::Tensor)?;

        Tensor::cat(&[rot_x1, rot_x2], D::Minus1).map_err(Qwen3AsrError::Tensor)
    }
}

struct DecoderLayer {
    input_norm: RmsNorm,
    q_proj: QuantizedTensor,
    k_proj: QuantizedTensor,
    v_proj: QuantizedTensor,
    o_proj: QuantizedTensor,
    q_norm: RmsNorm,
    k_norm: RmsNorm,
    post_attn_norm: RmsNorm,
    gate_proj: QuantizedTensor,
    up_proj: QuantizedTensor,
    down_proj: QuantizedTensor,
    num_heads: usize,
    num_kv_heads: usize,
    head_dim: usize,
}

impl DecoderLayer {
    #[allow(clippy::too_many_arguments)]
    fn load(
        store: &WeightStore,
        prefix: &str,
        device: &Device,
        cfg: &ModelConfig,
        spec: QuantSpec,
    ) -> Result<Self> {
        let q_dim = cfg.num_attention_heads * cfg.head_dim;
        let kv_dim = cfg.num_kv_heads * cfg.head_dim;
        Ok(Self {
            input_norm: RmsNorm::load(store, &format!("{prefix}.input_layernorm"), device, cfg.rms_norm_eps)?,
            q_proj: store.quantized_linear(&format!("{prefix}.self_attn.q_proj"), q_dim, cfg.d_model, spec)?,
            k_proj: store.quantized_linear(&format!("{prefix}.self_attn.k_proj"), kv_dim, cfg.d_model, spec)?,
            v_proj: store.quantized_linear(&format!("{prefix}.self_attn.v_proj"), kv_dim, cfg.d_model, spec)?,
            o_proj: store.quantized_linear(&format!("{prefix}.self_attn.o_proj"), cfg.d_model, q_dim, spec)?,
            q_norm: RmsNorm::load(store, &format!("{prefix}.self_attn.q_norm"), device, cfg.rms_norm_eps)?,
            k_norm: RmsNorm::load(store, &format!("{prefix}.self_attn.k_norm"), device, cfg.rms_norm_eps)?,
            post_attn_norm: RmsNorm::load(
                store,
                &format!("{prefix}.post_attention_layernorm"),
                device,
                cfg.rms_norm_eps,
            )?,
            gate_proj: store.quantized_linear(
                &format!("{prefix}.mlp.gate_proj"),
                cfg.intermediate_size,
                cfg.d_model,
                spec,
            )?,
            up_proj: store.quantized_linear(&format!("{prefix}.mlp.up_proj"), cfg.intermediate_size, cfg.d_model, spec)?,
            down_proj: store.quantized_linear(&format!("{prefix}.mlp.down_proj"), cfg.d_model, cfg.intermediate_size, spec)?,
            num_heads: cfg.num_attention_heads,
            num_kv_heads: cfg.num_kv_heads,
            head_dim: cfg.head_dim,
        })
    }

    fn split_heads(&self, x: &Tensor, num_heads: usize) -> Result<Tensor> {
        let (b, t, _) = x.dims3().map_err(Qwen3AsrError::Tensor)?;
        x.reshape((b, t, num_heads, self.head_dim))
            .map_err(Qwen3AsrError::Tensor)?
            .transpose(1, 2)
            .map_err(Qwen3AsrError::Tensor)?
            .contiguous()
            .map_err(Qwen3AsrError::Tensor)
    }

    fn repeat_kv(&self, x: &Tensor) -> Result<Tensor> {
        let groups = self.num_heads / self.num_kv_heads;
        if groups == 1 {
            return Ok(x.clone());
        }
        let (b, kv_heads, t, d) = x.dims4().map_err(Qwen3AsrError::Tensor)?;
        x.unsqueeze(2)
            .map_err(Qwen3AsrError::Tensor)?
            .expand((b, kv_heads, groups, t, d))
            .map_err(Qwen3AsrError::Tensor)?
            .reshape((b, kv_heads * groups, t, d))
            .map_err(Qwen3AsrError::Tensor)
    }

    #[allow(clippy::too_many_arguments)]
    fn forward(
        &self,
        x: &Tensor,
        rope: &RotaryEmbedding,
        mask: Option<&Tensor>,
        cache: &mut LayerCache,
    ) -> Result<Tensor> {
        let residual = x.clone();
        let h = self.input_norm.forward(x)?;

        let q = self.q_proj.matmul(&h)?;
        let k = self.k_proj.matmul(&h)?;
        let v = self.v_proj.matmul(&h)?;

        let q = self.split_heads(&q, self.num_heads)?;
        let k = self.split_heads(&k, self.num_kv_heads)?;
        let v = self.split_heads(&v, self.num_kv_heads)?;

        let q = self.q_norm.forward(&q)?;
        let k = self.k_norm.forward(&k)?;

        let offset = cache.as_ref().map(|(k, _)| k.dim(2).unwrap_or(0)).unwrap_or(0);
        let q = rope.apply(&q, offset)?;
        let k = rope.apply(&k, offset)?;

        let (k, v) = match cache.take() {
            Some((prev_k, prev_v)) => (
                Tensor::cat(&[&prev_k, &k], 2).map_err(Qwen3AsrError::Tensor)?,
                Tensor::cat(&[&prev_v, &v], 2).map_err(Qwen3AsrError::Tensor)?,
            ),
            None => (k, v),
        };
        *cache = Some((k.clone(), v.clone()));

        let k = self.repeat_kv(&k)?;
        let v = self.repeat_kv(&v)?;

        let scale = (self.head_dim as f64).powf(-0.5);
        let scores = q
            .matmul(&k.transpose(D::Minus2, D::Minus1).map_err(Qwen3AsrError::Tensor)?)
            .map_err(Qwen3AsrError::Tensor)?;
        let scores = (scores * scale).map_err(Qwen3AsrError::Tensor)?;
        let scores = match mask {
            Some(m) => scores.broadcast_add(m).map_err(Qwen3AsrError::Tensor)?,
            None => scores,
        };
        let weights = softmax(&scores, D::Minus1).map_err(Qwen3AsrError::Tensor)?;
        let attn = weights.matmul(&v).map_err(Qwen3AsrError::Tensor)?;

        let (b, _, t, _) = attn.dims4().map_err(Qwen3AsrError::Tensor)?;
        let attn = attn
            .transpose(1, 2)
            .map_err(Qwen3AsrError::Tensor)?
            .contiguous()
            .map_err(Qwen3AsrError::Tensor)?
            .reshape((b, t, self.num_heads * self.head_dim))
            .map_err(Qwen3AsrError::Tensor)?;
        let attn_out = self.o_proj.matmul(&attn)?;
        let x = (residual + attn_out).map_err(Qwen3AsrError::Tensor)?;

        let residual = x.clone();
        let h = self.post_attn_norm.forward(&x)?;
        let gate = self.gate_proj.matmul(&h)?.silu().map_err(Qwen3AsrError::Tensor)?;
        let up = self.up_proj.matmul(&h)?;
        let fused = (gate * up).map_err(Qwen3AsrError::Tensor)?;
        let down = self.down_proj.matmul(&fused)?;
        (residual + down).map_err(Qwen3AsrError::Tensor)
    }
}

pub struct TextDecoder {
    embed_tokens: QuantizedTensor,
    layers: Vec<DecoderLayer>,
    final_norm: RmsNorm,
    rope: RotaryEmbedding,
    d_model: usize,
    vocab_size: usize,
    device: Device,
}

impl TextDecoder {
    pub fn load(store: &WeightStore, cfg: &ModelConfig, device: &Device) -> Result<Self> {
        let spec = QuantSpec {
            group_size: cfg.quant_group_size,
            bits: cfg.quant_bits as u32,
        };
        let embed_tokens = store.quantized_linear("model.embed_tokens", cfg.vocab_size, cfg.d_model, spec)?;

        let mut layers = Vec::with_capacity(cfg.num_decoder_layers);
        for i in 0..cfg.num_decoder_layers {
            layers.push(DecoderLayer::load(
                store,
                &format!("model.layers.{i}"),
                device,
                cfg,
                spec,
            )?);
        }

        let final_norm = RmsNorm::load(store, "model.norm", device, cfg.rms_norm_eps)?;
        let rope = RotaryEmbedding::new(cfg.head_dim, cfg.rope_base, cfg.max_target_positions, device)?;

        Ok(Self {
            embed_tokens,
            layers,
            final_norm,
            rope,
            d_model: cfg.d_model,
            vocab_size: cfg.vocab_size,
            device: device.clone(),
        })
    }

    pub fn embed_ids(&self, ids: &[u32]) -> Result<Tensor> {
        let rows = dequantize_rows(&self.embed_tokens, ids, &self.device)?;
        rows.reshape((1, ids.len(), self.d_model)).map_err(Qwen3AsrError::Tensor)
    }

    /// `forward(inputs_embeds | input_ids, attention_mask?, cache?) →
    /// (hidden_states, new_cache)` per the design. Exactly one of
    /// `inputs_embeds`/`input_ids` must be supplied.
    pub fn forward(
        &self,
        inputs_embeds: Option<&Tensor>,
        input_ids: Option<&[u32]>,
        attention_mask: Option<&Tensor>,
        cache: &mut Vec<LayerCache>,
    ) -> Result<Tensor> {
        let embeds = match (inputs_embeds, input_ids) {
            (Some(e), None) => e.clone(),
            (None, Some(ids)) => self.embed_ids(ids)?,
            _ => return Err(Qwen3AsrError::NoInputProvided),
        };

        if cache.len() < self.layers.len() {
            cache.resize_with(self.layers.len(), || None);
        }

        let seq_len = embeds.dim(1).map_err(Qwen3AsrError::Tensor)?;
        let cached_len = cache[0].as_ref().map(|(k, _)| k.dim(2).unwrap_or(0)).unwrap_or(0);

        let built_mask = if seq_len == 1 {
            None
        } else {
            match attention_mask {
                Some(m) => Some(m.clone()),
                None => Some(self.causal_mask(seq_len, cached_len)?),
            }
        };

        let mut hidden = embeds;
        for (layer, layer_cache) in self.layers.iter().zip(cache.iter_mut()) {
            hidden = layer.forward(&hidden, &self.rope, built_mask.as_ref(), layer_cache)?;
        }
        self.final_norm.forward(&hidden)
    }

    fn causal_mask(&self, seq_len: usize, cached_len: usize) -> Result<Tensor> {
        let total = seq_len + cached_len;
        let mut data = vec![0f32; seq_len * total];
        for i in 0..seq_len {
            for j in 0..total {
                if j > cached_len + i {
                    data[i * total + j] = NEG_INF;
                }
            }
        }
        Tensor::from_vec(data, (1, 1, seq_len, total), &self.device).map_err(Qwen3AsrError::Tensor)
    }

    /// Tied LM head: the embedding table reused as a quantized matmul.
    pub fn lm_head(&self, hidden: &Tensor) -> Result<Tensor> {
        self.embed_tokens.matmul(hidden)
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rope_is_identity_at_position_zero_for_first_pair() {
        let device = Device::Cpu;
        let rope = RotaryEmbedding::new(4, 1e6, 8, &device).unwrap();
        // cos(0) == 1, sin(0) == 0 at every position-0 frequency.
        let cos0: f32 = rope
            .cos
            .narrow(0, 0, 1)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap()[0];
        assert!((cos0 - 1.0).abs() < 1e-6);
    }
}
