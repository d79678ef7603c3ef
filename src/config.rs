//! Engine configuration.
//!
//! Every field has a default, so an empty JSON object (or no file at all)
//! yields the reference configuration: 44.1 kHz stereo, 100 ms lookahead,
//! four-bar exports with a one second tail.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Output channel count. The engine always renders stereo.
pub const CHANNELS: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Sample rate in Hz for both live and offline rendering.
    pub sample_rate: u32,
    /// Frames per realtime render quantum. Also the reverb partition size.
    pub block_size: usize,
    /// Frames per offline render quantum.
    pub offline_block_size: usize,
    /// How far ahead of the audio clock the scheduler commits triggers.
    pub lookahead_seconds: f64,
    /// Period of the scheduler's service tick. Must not exceed the lookahead.
    pub tick_interval_ms: u64,
    /// Bars rendered by an export.
    pub export_bars: usize,
    /// Silence appended to an export so reverb and delay can ring out.
    pub export_tail_seconds: f64,
    pub delay_time_seconds: f64,
    /// Delay feedback at 100% send.
    pub delay_feedback_scale: f64,
    /// Length of the generated reverb impulse response.
    pub reverb_seconds: f64,
    /// Partition size for the late part of the reverb response. The early
    /// part uses the render block.
    pub reverb_tail_partition: usize,
    /// Per-voice reverbs kept ready ahead of triggers. Zero generates each
    /// one when its voice is built.
    pub reverb_pool_size: usize,
    /// How long a voice keeps sounding past its longest envelope.
    pub voice_release_margin_seconds: f64,
    pub max_voices: usize,
    /// Seed for impulse-response noise.
    pub seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            sample_rate: 44100,
            block_size: 128,
            offline_block_size: 1024,
            lookahead_seconds: 0.1,
            tick_interval_ms: 25,
            export_bars: 4,
            export_tail_seconds: 1.0,
            delay_time_seconds: 0.25,
            delay_feedback_scale: 0.5,
            reverb_seconds: 2.0,
            reverb_tail_partition: 4096,
            reverb_pool_size: 10,
            voice_release_margin_seconds: 0.5,
            max_voices: 64,
            seed: 0x5EED_D12D,
        }
    }
}

impl EngineConfig {
    /// Parse a config from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        Ok(config.sanitized())
    }

    /// Load a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn sample_rate_f64(&self) -> f64 {
        self.sample_rate as f64
    }

    /// Convert a duration in seconds to a frame count at the configured rate.
    pub fn frames(&self, seconds: f64) -> usize {
        (seconds.max(0.0) * self.sample_rate_f64()).round() as usize
    }

    /// Clamp values that would stall or break rendering back into range.
    fn sanitized(mut self) -> Self {
        let defaults = EngineConfig::default();
        if self.sample_rate == 0 {
            self.sample_rate = defaults.sample_rate;
        }
        self.block_size = self.block_size.max(16);
        self.offline_block_size = self.offline_block_size.max(16);
        if self.lookahead_seconds.is_nan() || self.lookahead_seconds <= 0.0 {
            self.lookahead_seconds = defaults.lookahead_seconds;
        }
        let lookahead_ms = (self.lookahead_seconds * 1000.0) as u64;
        self.tick_interval_ms = self.tick_interval_ms.clamp(1, lookahead_ms.max(1));
        self.export_bars = self.export_bars.max(1);
        self.export_tail_seconds = self.export_tail_seconds.max(0.0);
        self.delay_time_seconds = self.delay_time_seconds.max(1.0 / self.sample_rate as f64);
        self.delay_feedback_scale = self.delay_feedback_scale.clamp(0.0, 0.99);
        self.reverb_seconds = self.reverb_seconds.max(1.0 / self.sample_rate as f64);
        self.reverb_tail_partition = self.reverb_tail_partition.max(16);
        self.voice_release_margin_seconds = self.voice_release_margin_seconds.max(0.0);
        self.max_voices = self.max_voices.max(1);
        self
    }
}
