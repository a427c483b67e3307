//! Audio encoder: a strided Conv2D downsampler
//! followed by a sinusoidal-position-embedded, chunked block-sparse
//! self-attention Transformer stack, projecting into the text decoder's
//! embedding space.

use candle_core::{Device, Tensor, D};
use candle_nn::ops::softmax;

use crate::config::ModelConfig;
use crate::error::{Qwen3AsrError, Result};
use crate::pos_cache::PositionEmbeddingCache;
use crate::weights::WeightStore;

const NEG_INF: f32 = -1e9;

struct Conv2d {
    weight: Tensor,
    bias: Tensor,
}

impl Conv2d {
    fn load(store: &WeightStore, prefix: &str, device: &Device) -> Result<Self> {
        let (weight, bias) = store.conv2d(prefix, device)?;
        Ok(Self { weight, bias })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let y = x.conv2d(&self.weight, 1, 2, 1, 1).map_err(Qwen3AsrError::Tensor)?;
        let bias = self
            .bias
            .reshape((1, self.bias.dim(0).map_err(Qwen3AsrError::Tensor)?, 1, 1))
            .map_err(Qwen3AsrError::Tensor)?;
        y.broadcast_add(&bias).map_err(Qwen3AsrError::Tensor)
    }
}

struct Linear {
    weight: Tensor,
    bias: Option<Tensor>,
}

impl Linear {
    fn load(store: &WeightStore, prefix: &str, device: &Device, with_bias: bool) -> Result<Self> {
        let (weight, bias) = store.linear(prefix, device)?;
        Ok(Self {
            weight,
            bias: if with_bias { bias } else { None },
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let wt = self.weight.t().map_err(Qwen3AsrError::Tensor)?;
        let y = x.broadcast_matmul(&wt).map_err(Qwen3AsrError::Tensor)?;
        match &self.bias {
            Some(b) => y.broadcast_add(b).map_err(Qwen3AsrError::Tensor),
            None => Ok(y),
        }
    }
}

struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl LayerNorm {
    fn load(store: &WeightStore, prefix: &str, device: &Device) -> Result<Self> {
        let (weight, bias) = store.layer_norm(prefix, device)?;
        Ok(Self {
            weight,
            bias,
            eps: 1e-5,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let mean = x.mean_keepdim(D::Minus1).map_err(Qwen3AsrError::Tensor)?;
        let centered = x.broadcast_sub(&mean).map_err(Qwen3AsrError::Tensor)?;
        let var = centered
            .sqr()
            .map_err(Qwen3AsrError::Tensor)?
            .mean_keepdim(D::Minus1)
            .map_err(Qwen3AsrError::Tensor)?;
        let denom = (var + self.eps).map_err(Qwen3AsrError::Tensor)?.sqrt().map_err(Qwen3AsrError::Tensor)?;
        let normed = centered.broadcast_div(&denom).map_err(Qwen3AsrError::Tensor)?;
        normed
            .broadcast_mul(&self.weight)
            .map_err(Qwen3AsrError::Tensor)?
            .broadcast_add(&self.bias)
            .map_err(Qwen3AsrError::Tensor)
    }
}

struct EncoderLayer {
    ln1: LayerNorm,
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    out_proj: Linear,
    ln2: LayerNorm,
    fc1: Linear,
    fc2: Linear,
    num_heads: usize,
    head_dim: usize,
}

impl EncoderLayer {
    fn load(store: &WeightStore, prefix: &str, device: &Device, num_heads: usize, d_model: usize) -> Result<Self> {
        Ok(Self {
            ln1: LayerNorm::load(store, &format!("{prefix}.self_attn_layer_norm"), device)?,
            q_proj: Linear::load(store, &format!("{prefix}.self_attn.q_proj"), device, true)?,
            k_proj: Linear::load(store, &format!("{prefix}.self_attn.k_proj"), device, true)?,
            v_proj: Linear::load(store, &format!("{prefix}.self_attn.v_proj"), device, true)?,
            out_proj: Linear::load(store, &format!("{prefix}.self_attn.out_proj"), device, true)?,
            ln2: LayerNorm::load(store, &format!("{prefix}.final_layer_norm"), device)?,
            fc1: Linear::load(store, &format!("{prefix}.fc1"), device, true)?,
            fc2: Linear::load(store, &format!("{prefix}.fc2"), device, true)?,
            num_heads,
            head_dim: d_model / num_heads,
        })
    }

    fn forward(&self, x: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let residual = x.clone();
        let h = self.ln1.forward(x)?;

        let (b, t, _) = h.dims3().map_err(Qwen3AsrError::Tensor)?;
        let scale = (self.head_dim as f64).powf(-0.5);
        let q = (self.q_proj.forward(&h)? * scale).map_err(Qwen3AsrError::Tensor)?;
        let k = self.k_proj.forward(&h)?;
        let v = self.v_proj.forward(&h)?;

        let split_heads = |t_in: &Tensor| -> Result<Tensor> {
            t_in.reshape((b, t, self.num_heads, self.head_dim))
                .map_err(Qwen3AsrError::Tensor)?
                .transpose(1, 2)
                .map_err(Qwen3AsrError::Tensor)?
                .contiguous()
                .map_err(Qwen3AsrError::Tensor)
        };
        let q = split_heads(&q)?;
        let k = split_heads(&k)?;
        let v = split_heads(&v)?;

        let attn_scores = q
            .matmul(&k.transpose(D::Minus2, D::Minus1).map_err(Qwen3AsrError::Tensor)?)
            .map_err(Qwen3AsrError::Tensor)?;
        let attn_scores = attn_scores.broadcast_add(mask).map_err(Qwen3AsrError::Tensor)?;
        let attn_weights = softmax(&attn_scores, D::Minus1).map_err(Qwen3AsrError::Tensor)?;
        let attn_out = attn_weights.matmul(&v).map_err(Qwen3AsrError::Tensor)?;

        let attn_out = attn_out
            .transpose(1, 2)
            .map_err(Qwen3AsrError::Tensor)?
            .contiguous()
            .map_err(Qwen3AsrError::Tensor)?
            .reshape((b, t, self.num_heads * self.head_dim))
            .map_err(Qwen3AsrError::Tensor)?;
        let attn_out = self.out_proj.forward(&attn_out)?;
        let x = (residual + attn_out).map_err(Qwen3AsrError::Tensor)?;

        let residual = x.clone();
        let h = self.ln2.forward(&x)?;
        let h = self.fc1.forward(&h)?.gelu_erf().map_err(Qwen3AsrError::Tensor)?;
        let h = self.fc2.forward(&h)?;
        (residual + h).map_err(Qwen3AsrError::Tensor)
    }
}

pub struct AudioEncoder {
    conv1: Conv2d,
    conv2: Conv2d,
    conv3: Conv2d,
    proj_in: Linear,
    layers: Vec<EncoderLayer>,
    final_ln: LayerNorm,
    proj_out1: Linear,
    proj_out2: Linear,
    pos_cache: PositionEmbeddingCache,
    n_window: usize,
    n_window_infer: usize,
    max_cnn_per_chunk: usize,
    num_mel_bins: usize,
    downsample_hidden: usize,
    d_model: usize,
    device: Device,
}

/// Implements the design's `getOutputLength` formula exactly: the valid
/// post-conv token count for a chunk of `t` mel frames (an integer multiple
/// of `n_window*2`, plus a possible short remainder chunk).
fn get_output_length(t: usize, n_window: usize) -> usize {
    let chunk = n_window * 2;
    if chunk == 0 {
        return 0;
    }
    let rem = t % chunk;
    let full_chunks = t / chunk;
    let full_tokens = full_chunks * 13;
    let rem_tokens = if rem > 0 {
        let mut fl = rem;
        for _ in 0..3 {
            fl = (fl.saturating_sub(1)) / 2 + 1;
        }
        fl.max(1)
    } else {
        0
    };
    full_tokens + rem_tokens
}

impl AudioEncoder {
    pub fn load(store: &WeightStore, cfg: &ModelConfig, device: &Device) -> Result<Self> {
        let conv1 = Conv2d::load(store, "audio_tower.conv1", device)?;
        let conv2 = Conv2d::load(store, "audio_tower.conv2", device)?;
        let conv3 = Conv2d::load(store, "audio_tower.conv3", device)?;
        let proj_in = Linear::load(store, "audio_tower.proj_in", device, false)?;

        let mut layers = Vec::with_capacity(cfg.num_encoder_layers);
        for i in 0..cfg.num_encoder_layers {
            layers.push(EncoderLayer::load(
                store,
                &format!("audio_tower.layers.{i}"),
                device,
                cfg.encoder_heads,
                cfg.d_model,
            )?);
        }

        let final_ln = LayerNorm::load(store, "audio_tower.layer_norm", device)?;
        let proj_out1 = Linear::load(store, "audio_tower.proj_out1", device, true)?;
        let proj_out2 = Linear::load(store, "audio_tower.proj_out2", device, true)?;

        Ok(Self {
            conv1,
            conv2,
            conv3,
            proj_in,
            layers,
            final_ln,
            proj_out1,
            proj_out2,
            pos_cache: PositionEmbeddingCache::new(8, cfg.d_model),
            n_window: cfg.n_window,
            n_window_infer: cfg.n_window_infer,
            max_cnn_per_chunk: cfg.max_cnn_per_chunk,
            num_mel_bins: cfg.num_mel_bins,
            downsample_hidden: cfg.downsample_hidden,
            d_model: cfg.d_model,
            device: device.clone(),
        })
    }

    pub fn clear_position_cache(&mut self) {
        self.pos_cache.clear();
    }

    /// Runs the conv stack over one `[n_mels, T]` mel chunk and returns the
    /// `[1, T', d_model]` embeddings plus `T'` (the valid post-conv length).
    fn conv_forward_chunk(&self, mel_chunk: &Tensor, valid_len: usize) -> Result<(Tensor, usize)> {
        let t_len = mel_chunk.dim(1).map_err(Qwen3AsrError::Tensor)?;
        let x = mel_chunk
            .reshape((1, 1, self.num_mel_bins, t_len))
            .map_err(Qwen3AsrError::Tensor)?;
        let x = self.conv1.forward(&x)?.gelu_erf().map_err(Qwen3AsrError::Tensor)?;
        let x = self.conv2.forward(&x)?.gelu_erf().map_err(Qwen3AsrError::Tensor)?;
        let x = self.conv3.forward(&x)?;

        let (_, c, f, t_prime) = x.dims4().map_err(Qwen3AsrError::Tensor)?;
        let x = x
            .permute((0, 3, 1, 2))
            .map_err(Qwen3AsrError::Tensor)?
            .contiguous()
            .map_err(Qwen3AsrError::Tensor)?
            .reshape((1, t_prime, c * f))
            .map_err(Qwen3AsrError::Tensor)?;
        let x = self.proj_in.forward(&x)?;

        let out_len = get_output_length(valid_len, self.n_window);
        let out_len = out_len.min(t_prime).max(0);
        let x = if out_len < t_prime {
            x.narrow(1, 0, out_len).map_err(Qwen3AsrError::Tensor)?
        } else {
            x
        };
        Ok((x, out_len))
    }

    /// Builds a block-diagonal additive attention mask (`0` inside a
    /// window, `-1e9` across windows) for windows of the given lengths.
    fn block_diagonal_mask(&self, window_lengths: &[usize]) -> Result<Tensor> {
        let total: usize = window_lengths.iter().sum();
        let mut data = vec![NEG_INF; total * total];
        let mut offset = 0usize;
        for &len in window_lengths {
            for i in 0..len {
                for j in 0..len {
                    data[(offset + i) * total + (offset + j)] = 0.0;
                }
            }
            offset += len;
        }
        Tensor::from_vec(data, (1, 1, total, total), &self.device).map_err(Qwen3AsrError::Tensor)
    }

    /// `mel`: `[num_mel_bins, T]` log-mel features for one ≤30s chunk.
    /// Returns `[1, T', d_model]` audio embeddings.
    pub fn forward(&mut self, mel: &Tensor) -> Result<Tensor> {
        let t = mel.dim(1).map_err(Qwen3AsrError::Tensor)?;
        let chunk_len = self.n_window * 2;
        if chunk_len == 0 {
            return Err(Qwen3AsrError::InvalidAudio("n_window is zero".into()));
        }

        let mut conv_chunks = Vec::new();
        let mut out_lengths = Vec::new();
        let mut start = 0usize;
        while start < t {
            let this_len = (t - start).min(chunk_len);
            let chunk = if this_len < chunk_len {
                let slice = mel.narrow(1, start, this_len).map_err(Qwen3AsrError::Tensor)?;
                let pad = chunk_len - this_len;
                slice
                    .pad_with_zeros(1, 0, pad)
                    .map_err(Qwen3AsrError::Tensor)?
            } else {
                mel.narrow(1, start, chunk_len).map_err(Qwen3AsrError::Tensor)?
            };
            let (embeds, out_len) = self.conv_forward_chunk(&chunk, this_len)?;
            conv_chunks.push(embeds);
            out_lengths.push(out_len);
            start += chunk_len;
        }

        let flat = Tensor::cat(&conv_chunks, 1).map_err(Qwen3AsrError::Tensor)?;
        let total_len = flat.dim(1).map_err(Qwen3AsrError::Tensor)?;

        let pe = self.pos_cache.get_or_build(total_len, &self.device)?;
        let flat = flat
            .broadcast_add(&pe.unsqueeze(0).map_err(Qwen3AsrError::Tensor)?)
            .map_err(Qwen3AsrError::Tensor)?;

        // Re-chunk the flat sequence into inference windows and build the
        // block-diagonal mask from their lengths.
        let window_len = (self.max_cnn_per_chunk * self.n_window_infer / chunk_len).max(1);
        let mut window_lengths = Vec::new();
        let mut remaining = total_len;
        while remaining > 0 {
            let w = remaining.min(window_len);
            window_lengths.push(w);
            remaining -= w;
        }
        if window_lengths.is_empty() {
            window_lengths.push(0);
        }
        let mask = self.block_diagonal_mask(&window_lengths)?;

        let mut hidden = flat;
        for layer in &self.layers {
            hidden = layer.forward(&hidden, &mask)?;
        }
        let hidden = self.final_ln.forward(&hidden)?;
        let hidden = self.proj_out1.forward(&hidden)?.gelu_erf().map_err(Qwen3AsrError::Tensor)?;
        self.proj_out2.forward(&hidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_length_of_full_chunks_is_thirteen_per_chunk() {
        let n_window = 50;
        let chunk = n_window * 2;
        assert_eq!(get_output_length(chunk, n_window), 13);
        assert_eq!(get_output_length(chunk * 3, n_window), 39);
    }

    #[test]
    fn output_length_of_chunk_plus_one_adds_one_token() {
        let n_window = 50;
        let chunk = n_window * 2;
        assert_eq!(get_output_length(chunk + 1, n_window), 13 + 1);
    }

    #[test]
    fn output_length_of_zero_remainder_has_no_extra_token() {
        let n_window = 50;
        let chunk = n_window * 2;
        assert_eq!(get_output_length(chunk * 2, n_window), 26);
    }
}
