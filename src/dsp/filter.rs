//! Biquad filter: matches WebAudio BiquadFilterNode coefficients.

use std::f64::consts::PI;

/// Filter type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    Lowpass,
    Highpass,
    Bandpass,
}

/// WebAudio's default Q.
pub const DEFAULT_Q: f64 = 1.0;

/// A biquad IIR filter (2nd order).
///
/// Direct Form II Transposed, coefficients from the Audio EQ Cookbook with
/// WebAudio's Q convention: lowpass/highpass Q is a resonance in dB,
/// bandpass Q is linear.
#[derive(Debug, Clone)]
pub struct BiquadFilter {
    pub filter_type: FilterType,
    frequency: f64,
    q: f64,

    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,

    z1: f64,
    z2: f64,

    sample_rate: f64,
}

impl BiquadFilter {
    pub fn new(filter_type: FilterType, frequency: f64, sample_rate: f64) -> Self {
        let mut f = BiquadFilter {
            filter_type,
            frequency,
            q: DEFAULT_Q,
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            z1: 0.0,
            z2: 0.0,
            sample_rate,
        };
        f.update_coefficients();
        f
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    fn update_coefficients(&mut self) {
        let nyquist = self.sample_rate / 2.0;
        let freq = self.frequency.clamp(1.0, nyquist - 1.0);
        let w0 = 2.0 * PI * freq / self.sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();

        let (b0, b1, b2, a0, a1, a2) = match self.filter_type {
            FilterType::Lowpass => {
                let alpha = sin_w0 / (2.0 * 10f64.powf(self.q / 20.0));
                let b1 = 1.0 - cos_w0;
                (b1 / 2.0, b1, b1 / 2.0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
            }
            FilterType::Highpass => {
                let alpha = sin_w0 / (2.0 * 10f64.powf(self.q / 20.0));
                let b0 = (1.0 + cos_w0) / 2.0;
                (b0, -(1.0 + cos_w0), b0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
            }
            FilterType::Bandpass => {
                let alpha = sin_w0 / (2.0 * self.q.max(1e-4));
                (alpha, 0.0, -alpha, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
            }
        };

        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = a1 / a0;
        self.a2 = a2 / a0;
    }

    /// Process a single sample through the filter.
    pub fn process(&mut self, input: f64) -> f64 {
        let output = self.b0 * input + self.z1;
        self.z1 = self.b1 * input - self.a1 * output + self.z2;
        self.z2 = self.b2 * input - self.a2 * output;
        output
    }
}
