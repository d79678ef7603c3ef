//! Mix parameters: per-instrument volume and effect sends, plus the
//! shared bus effect amounts.
//!
//! All values are percentages. Out-of-range input is clamped, never
//! rejected.

use serde::{Deserialize, Serialize};

use crate::pattern::{INSTRUMENTS, Instrument};

pub const MAX_VOLUME: f64 = 200.0;
pub const MAX_SEND: f64 = 100.0;

fn clamp_percent(value: f64, max: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, max) }
}

/// Reverb, delay and distortion intensity, each 0–100%.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectAmounts {
    reverb: f64,
    delay: f64,
    distortion: f64,
}

impl EffectAmounts {
    pub fn new(reverb: f64, delay: f64, distortion: f64) -> Self {
        EffectAmounts {
            reverb: clamp_percent(reverb, MAX_SEND),
            delay: clamp_percent(delay, MAX_SEND),
            distortion: clamp_percent(distortion, MAX_SEND),
        }
    }

    pub fn reverb(&self) -> f64 {
        self.reverb
    }

    pub fn delay(&self) -> f64 {
        self.delay
    }

    pub fn distortion(&self) -> f64 {
        self.distortion
    }

    pub fn set_reverb(&mut self, value: f64) {
        self.reverb = clamp_percent(value, MAX_SEND);
    }

    pub fn set_delay(&mut self, value: f64) {
        self.delay = clamp_percent(value, MAX_SEND);
    }

    pub fn set_distortion(&mut self, value: f64) {
        self.distortion = clamp_percent(value, MAX_SEND);
    }

    /// Re-clamp after deserialization, which bypasses the setters.
    fn sanitized(self) -> Self {
        EffectAmounts::new(self.reverb, self.delay, self.distortion)
    }
}

/// Per-instrument volume (0–200%) and effect sends.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentSettings {
    volume: f64,
    #[serde(flatten)]
    pub effects: EffectAmounts,
}

impl Default for InstrumentSettings {
    fn default() -> Self {
        InstrumentSettings {
            volume: 100.0,
            effects: EffectAmounts::default(),
        }
    }
}

impl InstrumentSettings {
    pub fn new(volume: f64, effects: EffectAmounts) -> Self {
        InstrumentSettings {
            volume: clamp_percent(volume, MAX_VOLUME),
            effects,
        }
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn set_volume(&mut self, value: f64) {
        self.volume = clamp_percent(value, MAX_VOLUME);
    }

    /// Linear gain multiplier, `volume / 100`.
    pub fn gain(&self) -> f64 {
        self.volume / 100.0
    }

    fn sanitized(self) -> Self {
        InstrumentSettings::new(self.volume, self.effects.sanitized())
    }
}

/// Everything the mix needs: one `InstrumentSettings` per row plus the bus.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MixSettings {
    instruments: [InstrumentSettings; INSTRUMENTS],
    pub global: EffectAmounts,
}

impl MixSettings {
    pub fn instrument(&self, instrument: Instrument) -> &InstrumentSettings {
        &self.instruments[instrument.index()]
    }

    pub fn instrument_mut(&mut self, instrument: Instrument) -> &mut InstrumentSettings {
        &mut self.instruments[instrument.index()]
    }

    /// Parse settings from JSON, clamping every value into range.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let settings: MixSettings = serde_json::from_str(json)?;
        Ok(settings.sanitized())
    }

    fn sanitized(mut self) -> Self {
        for settings in self.instruments.iter_mut() {
            *settings = settings.sanitized();
        }
        self.global = self.global.sanitized();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sends_clamp_to_range() {
        let fx = EffectAmounts::new(-5.0, 150.0, 42.0);
        assert_eq!(fx.reverb(), 0.0);
        assert_eq!(fx.delay(), 100.0);
        assert_eq!(fx.distortion(), 42.0);

        let mut fx = fx;
        fx.set_reverb(f64::NAN);
        assert_eq!(fx.reverb(), 0.0);
    }

    #[test]
    fn volume_allows_boost() {
        let mut s = InstrumentSettings::default();
        assert_eq!(s.gain(), 1.0);
        s.set_volume(180.0);
        assert!((s.gain() - 1.8).abs() < 1e-12);
        s.set_volume(500.0);
        assert_eq!(s.volume(), 200.0);
        s.set_volume(-1.0);
        assert_eq!(s.volume(), 0.0);
    }

    #[test]
    fn mix_defaults() {
        let mix = MixSettings::default();
        for inst in Instrument::ALL {
            assert_eq!(mix.instrument(inst).volume(), 100.0);
            assert_eq!(mix.instrument(inst).effects, EffectAmounts::default());
        }
        assert_eq!(mix.global, EffectAmounts::default());
    }

    #[test]
    fn json_input_is_clamped() {
        let json = r#"{"global": {"reverb": 300, "delay": 20}}"#;
        let mix = MixSettings::from_json(json).unwrap();
        assert_eq!(mix.global.reverb(), 100.0);
        assert_eq!(mix.global.delay(), 20.0);
        assert_eq!(mix.global.distortion(), 0.0);
    }

    #[test]
    fn instrument_mut_updates_row() {
        let mut mix = MixSettings::default();
        mix.instrument_mut(Instrument::Clap).effects.set_delay(60.0);
        assert_eq!(mix.instrument(Instrument::Clap).effects.delay(), 60.0);
        assert_eq!(mix.instrument(Instrument::Kick).effects.delay(), 0.0);
    }
}
