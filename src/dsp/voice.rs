//! Voice: one triggered drum hit.
//!
//! A voice is oscillator → optional biquad → gain, with exponential
//! frequency and gain envelopes taken from the instrument's recipe. Live
//! voices also own a private effects chain whose output is summed into the
//! bus. A voice is silent before its start frame, stops its source after
//! the envelopes plus a release margin, and expires once its effects tail
//! has rung out.

use crate::pattern::Instrument;
use crate::recipe::{FREQUENCY_FLOOR, SoundRecipe};

use super::effects::EffectsChain;
use super::envelope::ExpRamp;
use super::filter::BiquadFilter;
use super::frame::Frame;
use super::oscillator::Oscillator;

/// Sample-rate and timing parameters shared by every voice of an engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceTiming {
    pub sample_rate: f64,
    /// Extra time the source keeps running past its longest envelope.
    pub release_margin: f64,
}

impl VoiceTiming {
    fn to_frame(self, seconds: f64) -> u64 {
        (seconds.max(0.0) * self.sample_rate).round() as u64
    }
}

#[derive(Debug)]
pub struct Voice {
    instrument: Instrument,
    oscillator: Oscillator,
    filter: Option<BiquadFilter>,
    frequency: ExpRamp,
    gain: ExpRamp,
    sample_rate: f64,
    start_frame: u64,
    /// First frame after the source has stopped.
    stop_frame: u64,
    /// First frame at which the voice (including its effects tail) is inaudible.
    expire_frame: u64,
    effects: Option<EffectsChain>,
    scratch: Vec<Frame>,
}

impl Voice {
    /// A voice for `instrument` starting at `start_time` seconds on the
    /// engine clock. `volume_gain` scales the recipe's initial gain.
    pub fn new(instrument: Instrument, start_time: f64, volume_gain: f64, timing: VoiceTiming) -> Self {
        let recipe = instrument.recipe();
        let start_frame = timing.to_frame(start_time);
        let stop_frame = start_frame + timing.to_frame(recipe.envelope_length() + timing.release_margin);
        Voice {
            instrument,
            oscillator: Oscillator::new(recipe.waveform, timing.sample_rate),
            filter: recipe
                .filter
                .map(|f| BiquadFilter::new(f.kind, f.cutoff, timing.sample_rate)),
            frequency: frequency_envelope(recipe),
            gain: ExpRamp::new(
                recipe.gain * volume_gain.max(0.0),
                recipe.gain_floor,
                recipe.gain_decay,
            ),
            sample_rate: timing.sample_rate,
            start_frame,
            stop_frame,
            expire_frame: stop_frame,
            effects: None,
            scratch: Vec::new(),
        }
    }

    /// Route this voice through its own effects chain. The voice then
    /// lives on for the chain's tail after the source stops.
    pub fn with_effects(mut self, chain: EffectsChain) -> Self {
        let tail = (chain.tail_seconds() * self.sample_rate).round() as u64;
        self.expire_frame = self.stop_frame + tail;
        self.effects = Some(chain);
        self
    }

    /// Size the render scratch for blocks of up to `frames`, so rendering
    /// does not allocate.
    pub fn reserve(&mut self, frames: usize) {
        self.scratch.reserve(frames);
    }

    pub fn instrument(&self) -> Instrument {
        self.instrument
    }

    pub fn start_frame(&self) -> u64 {
        self.start_frame
    }

    pub fn stop_frame(&self) -> u64 {
        self.stop_frame
    }

    pub fn expire_frame(&self) -> u64 {
        self.expire_frame
    }

    pub fn has_effects(&self) -> bool {
        self.effects.is_some()
    }

    /// Whether the voice is silent from `frame` on and can be released.
    pub fn is_expired(&self, frame: u64) -> bool {
        frame >= self.expire_frame
    }

    /// Add this voice's output for the block starting at `block_start`
    /// into `out`.
    pub fn render_into(&mut self, out: &mut [Frame], block_start: u64) {
        let block_end = block_start + out.len() as u64;
        if block_end <= self.start_frame || self.is_expired(block_start) {
            return;
        }

        self.scratch.clear();
        self.scratch.resize(out.len(), Frame::ZERO);
        let from = self.start_frame.max(block_start);
        let to = self.stop_frame.min(block_end);
        for frame in from..to {
            let t = (frame - self.start_frame) as f64 / self.sample_rate;
            let mut sample = self.oscillator.next_sample(self.frequency.value_at(t));
            if let Some(filter) = self.filter.as_mut() {
                sample = filter.process(sample);
            }
            self.scratch[(frame - block_start) as usize] = Frame::mono(sample * self.gain.value_at(t));
        }

        if let Some(chain) = self.effects.as_mut() {
            chain.process_block(&mut self.scratch);
        }
        for (dst, src) in out.iter_mut().zip(&self.scratch) {
            *dst += *src;
        }
    }
}

fn frequency_envelope(recipe: &SoundRecipe) -> ExpRamp {
    match recipe.frequency_ramp {
        Some(ramp) => ExpRamp::new(recipe.frequency, ramp.target.max(FREQUENCY_FLOOR), ramp.duration),
        None => ExpRamp::hold(recipe.frequency),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::effects::{ChainKind, ChainParams};
    use crate::settings::EffectAmounts;

    const TIMING: VoiceTiming = VoiceTiming {
        sample_rate: 44100.0,
        release_margin: 0.5,
    };

    fn render(voice: &mut Voice, frames: usize) -> Vec<Frame> {
        let mut out = vec![Frame::ZERO; frames];
        for (i, block) in out.chunks_mut(128).enumerate() {
            voice.render_into(block, (i * 128) as u64);
        }
        out
    }

    fn peak(frames: &[Frame]) -> f64 {
        frames.iter().map(Frame::peak).fold(0.0, f64::max)
    }

    #[test]
    fn kick_produces_sound() {
        let mut v = Voice::new(Instrument::Kick, 0.0, 1.0, TIMING);
        let out = render(&mut v, 4410);
        assert!(peak(&out) > 0.5, "kick should start near full gain");
    }

    #[test]
    fn silent_before_start() {
        let mut v = Voice::new(Instrument::Snare, 0.01, 1.0, TIMING);
        assert_eq!(v.start_frame(), 441);
        let out = render(&mut v, 1024);
        assert!(out[..441].iter().all(|f| *f == Frame::ZERO));
        assert!(peak(&out[441..]) > 0.0);
    }

    #[test]
    fn gain_decays_to_floor() {
        let mut v = Voice::new(Instrument::Kick, 0.0, 1.0, TIMING);
        let out = render(&mut v, 44100);
        let early = peak(&out[..2205]);
        let late = peak(&out[22050..]);
        assert!(late <= 0.0011, "after the decay only the floor remains, got {late}");
        assert!(early > late * 100.0);
    }

    #[test]
    fn stops_after_release_margin() {
        let v = Voice::new(Instrument::Hihat, 1.0, 1.0, TIMING);
        // 0.05 s envelope + 0.5 s margin
        assert_eq!(v.stop_frame(), 44100 + 24255);
        assert_eq!(v.expire_frame(), v.stop_frame());
        assert!(!v.is_expired(v.stop_frame() - 1));
        assert!(v.is_expired(v.stop_frame()));
    }

    #[test]
    fn volume_scales_peak() {
        let mut normal = Voice::new(Instrument::Tom, 0.0, 1.0, TIMING);
        let mut boosted = Voice::new(Instrument::Tom, 0.0, 2.0, TIMING);
        let a = peak(&render(&mut normal, 4410));
        let b = peak(&render(&mut boosted, 4410));
        // The envelopes share a floor, so the ratio is only exactly 2 at the trigger.
        assert!(b > a * 1.9 && b <= a * 2.0 + 1e-9, "ratio {}", b / a);
    }

    #[test]
    fn zero_volume_is_silent() {
        let mut v = Voice::new(Instrument::Crash, 0.0, 0.0, TIMING);
        assert_eq!(peak(&render(&mut v, 4410)), 0.0);
    }

    #[test]
    fn effects_extend_lifetime() {
        let params = ChainParams {
            sample_rate: 44100.0,
            delay_seconds: 0.25,
            feedback_scale: 0.5,
            reverb_seconds: 2.0,
            partition: 128,
            tail_partition: 4096,
        };
        let chain = EffectsChain::build(ChainKind::Voice, params, EffectAmounts::new(50.0, 0.0, 0.0), 1);
        let v = Voice::new(Instrument::Rim, 0.0, 1.0, TIMING).with_effects(chain);
        assert!(v.has_effects());
        assert_eq!(v.expire_frame(), v.stop_frame() + 88200);
    }

    #[test]
    fn delay_send_echoes_after_source_stops() {
        let params = ChainParams {
            sample_rate: 44100.0,
            delay_seconds: 0.25,
            feedback_scale: 0.5,
            reverb_seconds: 2.0,
            partition: 128,
            tail_partition: 4096,
        };
        let chain = EffectsChain::build(ChainKind::Voice, params, EffectAmounts::new(0.0, 100.0, 0.0), 1);
        let mut v = Voice::new(Instrument::Kick, 0.0, 1.0, TIMING).with_effects(chain);
        let out = render(&mut v, 44100);
        // Fully wet: nothing until the first echo at 0.25 s.
        assert!(peak(&out[..11025]) < 1e-12);
        assert!(peak(&out[11025..13230]) > 0.1);
    }
}
