//! Sinusoidal position-embedding cache for the audio encoder. Modeled as an explicit index-and-counter LRU rather than an
//! intrusive linked list: a fixed-capacity vector of slots plus a
//! monotonic use counter picks the eviction victim by scanning for the
//! stalest `last_used` value.

use candle_core::{Device, Tensor};

use crate::error::Result;

struct Slot {
    length: usize,
    tensor: Tensor,
    last_used: u64,
}

pub struct PositionEmbeddingCache {
    capacity: usize,
    slots: Vec<Slot>,
    clock: u64,
    d_model: usize,
}

impl PositionEmbeddingCache {
    pub fn new(capacity: usize, d_model: usize) -> Self {
        Self {
            capacity,
            slots: Vec::with_capacity(capacity),
            clock: 0,
            d_model,
        }
    }

    pub fn get_or_build(&mut self, length: usize, device: &Device) -> Result<Tensor> {
        self.clock += 1;
        if let Some(slot) = self.slots.iter_mut().find(|s| s.length == length) {
            slot.last_used = self.clock;
            return Ok(slot.tensor.clone());
        }

        let tensor = sinusoidal_position_embedding(length, self.d_model, device)?;
        if self.slots.len() >= self.capacity {
            let victim = self
                .slots
                .iter()
                .enumerate()
                .min_by_key(|(_, s)| s.last_used)
                .map(|(i, _)| i)
                .expect("capacity > 0 implies a victim exists when full");
            self.slots.remove(victim);
        }
        self.slots.push(Slot {
            length,
            tensor: tensor.clone(),
            last_used: self.clock,
        });
        Ok(tensor)
    }

    /// Drops all cached entries; called on engine unload.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.clock = 0;
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Transformer-style sinusoidal position embedding: `log(10000)` timescale,
/// even dims filled with `sin`, odd dims with `cos`.
fn sinusoidal_position_embedding(length: usize, d_model: usize, device: &Device) -> Result<Tensor> {
    let half = d_model / 2;
    let mut data = vec![0f32; length * d_model];
    let log_timescale_increment = (10000f64).ln() / (half.max(1) as f64 - 1.0).max(1.0);
    for pos in 0..length {
        for i in 0..half {
            let inv_timescale = (-(i as f64) * log_timescale_increment).exp();
            let angle = pos as f64 * inv_timescale;
            data[pos * d_model + i] = angle.sin() as f32;
            data[pos * d_model + half + i] = angle.cos() as f32;
        }
    }
    Tensor::from_vec(data, (length, d_model), device).map_err(crate::error::Qwen3AsrError::Tensor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caches_by_length_and_evicts_lru() {
        let device = Device::Cpu;
        let mut cache = PositionEmbeddingCache::new(2, 16);
        cache.get_or_build(10, &device).unwrap();
        cache.get_or_build(20, &device).unwrap();
        assert_eq!(cache.len(), 2);
        // touch 10 again so 20 becomes the LRU victim
        cache.get_or_build(10, &device).unwrap();
        cache.get_or_build(30, &device).unwrap();
        assert_eq!(cache.len(), 2);
        // 20 should have been evicted, 10 and 30 remain
        assert!(cache.slots.iter().any(|s| s.length == 10));
        assert!(cache.slots.iter().any(|s| s.length == 30));
        assert!(!cache.slots.iter().any(|s| s.length == 20));
    }

    #[test]
    fn clear_empties_the_cache() {
        let device = Device::Cpu;
        let mut cache = PositionEmbeddingCache::new(8, 16);
        cache.get_or_build(5, &device).unwrap();
        cache.clear();
        assert!(cache.is_empty());
    }
}
