//! Offline renderer: renders a pattern to a complete stereo buffer.
//!
//! The renderer drives an [`AudioEngine`] with the same bus chain the live
//! path uses, faster than real time. Hits are synthesized from the recipes
//! alone: per-instrument volume and sends are not applied here, only the
//! global effect amounts.

use serde::Serialize;

use crate::config::{CHANNELS, EngineConfig};
use crate::pattern::{Pattern, STEPS};
use crate::scheduler::step_duration;
use crate::settings::EffectAmounts;

use super::engine::AudioEngine;
use super::frame::Frame;
use super::voice::Voice;

/// A rendered multi-channel buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedBuffer {
    pub sample_rate: u32,
    /// One sample vector per channel, all the same length.
    pub channels: Vec<Vec<f32>>,
}

impl RenderedBuffer {
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn duration_seconds(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Largest absolute sample across all channels.
    pub fn peak(&self) -> f32 {
        self.channels
            .iter()
            .flatten()
            .fold(0.0f32, |acc, s| acc.max(s.abs()))
    }
}

/// What to render.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderRequest {
    pub pattern: Pattern,
    pub bpm: f64,
    pub global: EffectAmounts,
}

impl RenderRequest {
    pub fn new(pattern: Pattern, bpm: f64, global: EffectAmounts) -> Self {
        RenderRequest { pattern, bpm, global }
    }

    /// Seconds covered by the bars alone, without the tail.
    pub fn pattern_seconds(&self, bars: usize) -> f64 {
        (bars * STEPS) as f64 * step_duration(self.bpm)
    }

    /// Total frames rendered for `config`: bars plus tail.
    ///
    /// `round(sample_rate * (bars * 16 * 15 / bpm + tail))`, so four bars
    /// at 120 BPM with a 1 s tail at 44.1 kHz is 9 s, or 396,900 frames.
    pub fn total_frames(&self, config: &EngineConfig) -> usize {
        config.frames(self.pattern_seconds(config.export_bars) + config.export_tail_seconds)
    }
}

/// Render `config.export_bars` bars of the request plus the export tail.
pub fn render_pattern(config: &EngineConfig, request: &RenderRequest) -> RenderedBuffer {
    let total = request.total_frames(config);
    let step = step_duration(request.bpm);
    let timing = AudioEngine::voice_timing(config);
    let mut engine = AudioEngine::new(config, config.offline_block_size, request.global).unbounded();

    // Hits in time order; admitted just before the block they start in so
    // only sounding voices are held.
    let pattern = &request.pattern;
    let mut hits = (0..config.export_bars * STEPS).flat_map(move |index| {
        let time = index as f64 * step;
        pattern
            .active_at(index % STEPS)
            .map(move |instrument| Voice::new(instrument, time, 1.0, timing))
    });
    let mut pending = hits.next();

    log::debug!(
        "offline render: {} bars at {} BPM, {} frames, {} hits per bar",
        config.export_bars,
        request.bpm,
        total,
        request.pattern.active_count()
    );

    let mut channels = vec![Vec::with_capacity(total); CHANNELS];
    let mut block = vec![Frame::ZERO; engine.block_size()];
    let mut rendered = 0;
    while rendered < total {
        let len = engine.block_size().min(total - rendered);
        let block_end = (rendered + len) as u64;
        while let Some(voice) = pending.take() {
            if voice.start_frame() >= block_end {
                pending = Some(voice);
                break;
            }
            engine.play(Box::new(voice));
            pending = hits.next();
        }

        let block = &mut block[..len];
        engine.render(block);
        for frame in block.iter() {
            channels[0].push(frame.left as f32);
            channels[1].push(frame.right as f32);
        }
        rendered += len;
    }

    RenderedBuffer {
        sample_rate: config.sample_rate,
        channels,
    }
}
