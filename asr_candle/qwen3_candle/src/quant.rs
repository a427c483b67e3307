//! Group-quantized parameter tensors. Every `Linear`
//! and the tied embedding table is stored as a packed-integer weight plus
//! per-group scale/bias pairs; dequantization is `w = scale * q + bias`
//! where `q` is a 4- or 8-bit field packed along the input dimension into
//! uint32 words.

use candle_core::{DType, Device, Tensor};

use crate::error::{Qwen3AsrError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantSpec {
    pub group_size: usize,
    pub bits: u32,
}

impl QuantSpec {
    fn fields_per_word(&self) -> usize {
        32 / self.bits as usize
    }

    fn mask(&self) -> u32 {
        (1u32 << self.bits) - 1
    }
}

/// A quantized `[out, in]` weight matrix, held as its packed uint32 words
/// plus `[out, in/group_size]` scales and biases. Owned exclusively by the
/// layer it parameterizes.
pub struct QuantizedTensor {
    packed: Vec<u32>,
    scales: Vec<f32>,
    biases: Vec<f32>,
    out_dim: usize,
    in_dim: usize,
    spec: QuantSpec,
}

impl QuantizedTensor {
    pub fn new(
        packed: Vec<u32>,
        scales: Vec<f32>,
        biases: Vec<f32>,
        out_dim: usize,
        in_dim: usize,
        spec: QuantSpec,
    ) -> Result<Self> {
        let words_per_row = in_dim.div_ceil(spec.fields_per_word());
        if packed.len() != out_dim * words_per_row {
            return Err(Qwen3AsrError::IncompatibleWeights(format!(
                "packed weight has {} words, expected {out_dim} * {words_per_row}",
                packed.len()
            )));
        }
        let groups_per_row = in_dim.div_ceil(spec.group_size);
        if scales.len() != out_dim * groups_per_row || biases.len() != out_dim * groups_per_row {
            return Err(Qwen3AsrError::IncompatibleWeights(format!(
                "scales/biases have {}/{} entries, expected {} groups per row * {out_dim} rows",
                scales.len(),
                biases.len(),
                groups_per_row
            )));
        }
        Ok(Self {
            packed,
            scales,
            biases,
            out_dim,
            in_dim,
            spec,
        })
    }

    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    fn unpack_row(&self, row: usize, out: &mut [f32]) {
        let fields_per_word = self.spec.fields_per_word();
        let words_per_row = self.in_dim.div_ceil(fields_per_word);
        let groups_per_row = self.in_dim.div_ceil(self.spec.group_size);
        let mask = self.spec.mask();
        let row_words = &self.packed[row * words_per_row..row * words_per_row + words_per_row];
        let row_scales = &self.scales[row * groups_per_row..row * groups_per_row + groups_per_row];
        let row_biases = &self.biases[row * groups_per_row..row * groups_per_row + groups_per_row];

        for col in 0..self.in_dim {
            let word = row_words[col / fields_per_word];
            let shift = (col % fields_per_word) as u32 * self.spec.bits;
            let q = (word >> shift) & mask;
            let group = col / self.spec.group_size;
            out[col] = row_scales[group] * q as f32 + row_biases[group];
        }
    }

    /// Materializes the full `[out, in]` dequantized weight as a dense
    /// `f32` tensor on `device`.
    pub fn dequantize(&self, device: &Device) -> Result<Tensor> {
        let mut dense = vec![0f32; self.out_dim * self.in_dim];
        for row in 0..self.out_dim {
            self.unpack_row(row, &mut dense[row * self.in_dim..(row + 1) * self.in_dim]);
        }
        Tensor::from_vec(dense, (self.out_dim, self.in_dim), device)
            .map_err(Qwen3AsrError::Tensor)
    }

    /// `y = x @ dequantize(w)^T`, the quantized-linear forward used
    /// throughout the decoder and the tied LM head.
    pub fn matmul(&self, x: &Tensor) -> Result<Tensor> {
        let w = self.dequantize(x.device())?;
        let wt = w.t().map_err(Qwen3AsrError::Tensor)?;
        let wt = wt.to_dtype(x.dtype()).map_err(Qwen3AsrError::Tensor)?;
        x.broadcast_matmul(&wt).map_err(Qwen3AsrError::Tensor)
    }
}

/// Convenience wrapper used where an embedding's dequantized rows are read
/// individually (one row per token id) rather than multiplied densely.
pub fn dequantize_rows(tensor: &QuantizedTensor, ids: &[u32], device: &Device) -> Result<Tensor> {
    let mut out = vec![0f32; ids.len() * tensor.in_dim()];
    let mut row_buf = vec![0f32; tensor.in_dim()];
    for (i, &id) in ids.iter().enumerate() {
        let row = id as usize;
        if row >= tensor.out_dim() {
            return Err(Qwen3AsrError::IncompatibleWeights(format!(
                "token id {id} out of range for embedding with {} rows",
                tensor.out_dim()
            )));
        }
        tensor.unpack_row(row, &mut row_buf);
        out[i * tensor.in_dim()..(i + 1) * tensor.in_dim()].copy_from_slice(&row_buf);
    }
    Tensor::from_vec(out, (ids.len(), tensor.in_dim()), device).map_err(Qwen3AsrError::Tensor)
}

#[allow(dead_code)]
fn assert_f32(dtype: DType) -> bool {
    matches!(dtype, DType::F32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack_4bit(values: &[u8]) -> Vec<u32> {
        values
            .chunks(8)
            .map(|chunk| {
                let mut word = 0u32;
                for (i, &v) in chunk.iter().enumerate() {
                    word |= (v as u32 & 0xF) << (i * 4);
                }
                word
            })
            .collect()
    }

    #[test]
    fn dequantizes_a_single_group_row() {
        // in_dim = 8, group_size = 8, bits = 4: one group per row.
        let spec = QuantSpec {
            group_size: 8,
            bits: 4,
        };
        let q_values: Vec<u8> = vec![0, 1, 2, 3, 4, 5, 6, 7];
        let packed = pack_4bit(&q_values);
        let scales = vec![2.0f32];
        let biases = vec![1.0f32];
        let qt = QuantizedTensor::new(packed, scales, biases, 1, 8, spec).unwrap();
        let device = Device::Cpu;
        let dense = qt.dequantize(&device).unwrap();
        let values: Vec<f32> = dense.flatten_all().unwrap().to_vec1().unwrap();
        let expected: Vec<f32> = q_values.iter().map(|&q| 2.0 * q as f32 + 1.0).collect();
        assert_eq!(values, expected);
    }

    #[test]
    fn rejects_mismatched_packed_length() {
        let spec = QuantSpec {
            group_size: 8,
            bits: 4,
        };
        let err = QuantizedTensor::new(vec![0], vec![1.0], vec![0.0], 2, 8, spec).unwrap_err();
        assert!(matches!(err, Qwen3AsrError::IncompatibleWeights(_)));
    }
}
