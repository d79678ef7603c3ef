//! Synthesis recipes for the drum kit.
//!
//! Each instrument is one oscillator, an optional biquad filter and a gain
//! stage, with exponential frequency/gain envelopes decaying toward a small
//! positive floor.

use crate::dsp::filter::FilterType;
use crate::dsp::oscillator::Waveform;
use crate::pattern::Instrument;

/// Lowest frequency an exponential ramp may target (Hz).
pub const FREQUENCY_FLOOR: f64 = 0.01;
/// Lowest gain an exponential ramp may target.
pub const GAIN_FLOOR: f64 = 0.001;

/// A pitch sweep from the recipe's start frequency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyRamp {
    pub target: f64,
    pub duration: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSpec {
    pub kind: FilterType,
    pub cutoff: f64,
}

/// Immutable synthesis parameters for one instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoundRecipe {
    pub waveform: Waveform,
    pub frequency: f64,
    pub frequency_ramp: Option<FrequencyRamp>,
    pub filter: Option<FilterSpec>,
    /// Linear gain at the trigger, before volume scaling.
    pub gain: f64,
    /// Time for the gain to fall to `gain_floor`.
    pub gain_decay: f64,
    pub gain_floor: f64,
}

impl SoundRecipe {
    /// Time until the longest envelope reaches its floor.
    pub fn envelope_length(&self) -> f64 {
        let sweep = self.frequency_ramp.map_or(0.0, |r| r.duration);
        self.gain_decay.max(sweep)
    }
}

const fn flat(waveform: Waveform, frequency: f64, filter: Option<FilterSpec>, gain: f64, decay: f64) -> SoundRecipe {
    SoundRecipe {
        waveform,
        frequency,
        frequency_ramp: None,
        filter,
        gain,
        gain_decay: decay,
        gain_floor: GAIN_FLOOR,
    }
}

const fn swept(frequency: f64, target: f64, gain: f64, decay: f64) -> SoundRecipe {
    SoundRecipe {
        waveform: Waveform::Sine,
        frequency,
        frequency_ramp: Some(FrequencyRamp { target, duration: decay }),
        filter: None,
        gain,
        gain_decay: decay,
        gain_floor: GAIN_FLOOR,
    }
}

const fn filter(kind: FilterType, cutoff: f64) -> Option<FilterSpec> {
    Some(FilterSpec { kind, cutoff })
}

const KICK: SoundRecipe = swept(150.0, 20.0, 1.0, 0.5);
const SNARE: SoundRecipe = flat(Waveform::Triangle, 200.0, filter(FilterType::Highpass, 1000.0), 0.7, 0.2);
const HIHAT: SoundRecipe = flat(Waveform::Square, 300.0, filter(FilterType::Highpass, 5000.0), 0.3, 0.05);
const OPENHAT: SoundRecipe = flat(Waveform::Square, 250.0, filter(FilterType::Highpass, 4000.0), 0.35, 0.3);
const CLAP: SoundRecipe = flat(Waveform::Sawtooth, 400.0, filter(FilterType::Bandpass, 1500.0), 0.5, 0.1);
const TOM: SoundRecipe = swept(180.0, 30.0, 0.8, 0.4);
const LOWTOM: SoundRecipe = swept(120.0, 20.0, 0.85, 0.5);
const RIM: SoundRecipe = flat(Waveform::Triangle, 800.0, None, 0.4, 0.08);
const COWBELL: SoundRecipe = flat(Waveform::Square, 540.0, filter(FilterType::Bandpass, 800.0), 0.5, 0.15);
const CRASH: SoundRecipe = flat(Waveform::Sawtooth, 450.0, filter(FilterType::Highpass, 3000.0), 0.4, 0.8);

impl Instrument {
    /// The synthesis recipe for this instrument.
    pub fn recipe(self) -> &'static SoundRecipe {
        match self {
            Instrument::Kick => &KICK,
            Instrument::Snare => &SNARE,
            Instrument::Hihat => &HIHAT,
            Instrument::Openhat => &OPENHAT,
            Instrument::Clap => &CLAP,
            Instrument::Tom => &TOM,
            Instrument::Lowtom => &LOWTOM,
            Instrument::Rim => &RIM,
            Instrument::Cowbell => &COWBELL,
            Instrument::Crash => &CRASH,
        }
    }
}
