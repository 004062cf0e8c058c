//! Looper configuration.
//! Loaded from a JSON file; every field falls back to its default when absent.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Number of interleaved channels in every buffer the core handles.
pub const CHANNELS: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LooperConfig {
    pub sample_rate: u32,
    /// Number of tracks, fixed for the looper's lifetime.
    pub tracks: usize,
    /// Frames per real-time callback period.
    pub block_frames: usize,
    /// Fallback wake-up interval of each track's length pass.
    pub length_poll_ms: u64,
    /// Fallback wake-up interval of the mixing pass.
    pub mix_poll_ms: u64,
    /// Seconds of audio reserved up front for each new layer.
    pub layer_prealloc_secs: f32,
    pub tracks_start_playing: bool,
    /// Capacity of the input → output frame ring, in callback blocks.
    pub ring_buffer_blocks: usize,
}

impl Default for LooperConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            tracks: 1,
            block_frames: 128, // ~2.7ms at 48kHz
            length_poll_ms: 10,
            mix_poll_ms: 100,
            layer_prealloc_secs: 30.0,
            tracks_start_playing: true,
            ring_buffer_blocks: 16,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "config IO error: {e}"),
            ConfigError::Parse(e) => write!(f, "config parse error: {e}"),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl LooperConfig {
    /// Load configuration from a JSON file and validate it.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: LooperConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must be > 0".into()));
        }
        if self.tracks == 0 {
            return Err(ConfigError::Invalid("tracks must be > 0".into()));
        }
        if self.block_frames == 0 {
            return Err(ConfigError::Invalid("block_frames must be > 0".into()));
        }
        if self.ring_buffer_blocks < 2 {
            return Err(ConfigError::Invalid("ring_buffer_blocks must be >= 2".into()));
        }
        Ok(())
    }

    pub fn length_poll_interval(&self) -> Duration {
        Duration::from_millis(self.length_poll_ms.max(1))
    }

    pub fn mix_poll_interval(&self) -> Duration {
        Duration::from_millis(self.mix_poll_ms.max(1))
    }

    /// Interleaved sample capacity reserved for a fresh layer.
    pub fn layer_prealloc_samples(&self) -> usize {
        let frames = (self.sample_rate as f32 * self.layer_prealloc_secs.max(0.0)) as usize;
        frames * CHANNELS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let config = LooperConfig::from_json(r#"{"tracks": 4}"#).unwrap();
        assert_eq!(config.tracks, 4);
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.block_frames, 128);
        assert!(config.tracks_start_playing);
    }

    #[test]
    fn zero_tracks_rejected() {
        let err = LooperConfig::from_json(r#"{"tracks": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let err = LooperConfig::from_json("{tracks:").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn prealloc_is_interleaved_stereo() {
        let config = LooperConfig {
            sample_rate: 1000,
            layer_prealloc_secs: 2.0,
            ..LooperConfig::default()
        };
        assert_eq!(config.layer_prealloc_samples(), 4000);
    }
}
