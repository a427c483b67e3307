//! Persisted tunables and per-stage feature flags.
//! Loaded/saved as TOML via `toml_edit`, rather than a bespoke key-value
//! format.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VoxCoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageFlags {
    pub s2t: bool,
    pub punctuation: bool,
    pub rules: bool,
    pub homophone: bool,
    pub nasal: bool,
    pub syllable_expansion: bool,
    pub repetition: bool,
    pub routing: bool,
}

impl Default for StageFlags {
    fn default() -> Self {
        Self {
            s2t: true,
            punctuation: true,
            rules: true,
            homophone: true,
            nasal: true,
            syllable_expansion: true,
            repetition: true,
            routing: true,
        }
    }
}

/// Tunables controlling the confidence router and retry thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoxCoreConfig {
    pub log_prob_threshold: f64,
    pub qwen3_skip_threshold: usize,
    pub qwen3_logprob_threshold: f64,
    pub stages: StageFlags,
}

impl Default for VoxCoreConfig {
    fn default() -> Self {
        Self {
            log_prob_threshold: -0.3,
            qwen3_skip_threshold: 30,
            qwen3_logprob_threshold: -0.5,
            stages: StageFlags::default(),
        }
    }
}

impl VoxCoreConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| VoxCoreError::Config(format!("{}: {e}", path.display())))?;
        toml_edit::de::from_str(&text)
            .map_err(|e| VoxCoreError::Config(format!("malformed config at {}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml_edit::ser::to_string_pretty(self)
            .map_err(|e| VoxCoreError::Config(format!("failed to serialize config: {e}")))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| VoxCoreError::Config(format!("{}: {e}", parent.display())))?;
        }
        std::fs::write(path, text)
            .map_err(|e| VoxCoreError::Config(format!("{}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = VoxCoreConfig::default();
        assert_eq!(cfg.log_prob_threshold, -0.3);
        assert_eq!(cfg.qwen3_skip_threshold, 30);
        assert_eq!(cfg.qwen3_logprob_threshold, -0.5);
        assert!(cfg.stages.routing);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("voxcore_missing_config_test.toml");
        let _ = std::fs::remove_file(&path);
        let cfg = VoxCoreConfig::load(&path).unwrap();
        assert_eq!(cfg.qwen3_skip_threshold, 30);
    }

    #[test]
    fn round_trips_through_save_and_load() {
        let path = std::env::temp_dir().join("voxcore_roundtrip_config_test.toml");
        let mut cfg = VoxCoreConfig::default();
        cfg.log_prob_threshold = -0.42;
        cfg.stages.nasal = false;
        cfg.save(&path).unwrap();
        let loaded = VoxCoreConfig::load(&path).unwrap();
        assert_eq!(loaded.log_prob_threshold, -0.42);
        assert!(!loaded.stages.nasal);
        let _ = std::fs::remove_file(&path);
    }
}
