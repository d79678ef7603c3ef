//! Waveshaping distortion driven by a sampled transfer curve.

use super::frame::Frame;

/// Points in the sampled transfer curve.
pub const CURVE_LENGTH: usize = 44100;

/// Sample `f(x) = (1 + k)x / (1 + k|x|)` over `[-1, 1]`.
///
/// `k = 0` is the identity; larger `k` bends toward hard clipping.
pub fn distortion_curve(k: f64, length: usize) -> Vec<f64> {
    let length = length.max(2);
    let k = k.max(0.0);
    (0..length)
        .map(|i| {
            let x = i as f64 * 2.0 / (length - 1) as f64 - 1.0;
            (1.0 + k) * x / (1.0 + k * x.abs())
        })
        .collect()
}

/// Applies a transfer curve with linear interpolation between points.
#[derive(Debug, Clone)]
pub struct WaveShaper {
    amount: f64,
    curve: Vec<f64>,
}

impl WaveShaper {
    /// `amount` is the distortion percentage (0–100).
    pub fn new(amount: f64) -> Self {
        WaveShaper {
            amount,
            curve: distortion_curve(amount / 10.0, CURVE_LENGTH),
        }
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    /// Change the distortion amount, recomputing the curve if it moved.
    pub fn set_amount(&mut self, amount: f64) {
        if amount != self.amount {
            self.amount = amount;
            self.curve = distortion_curve(amount / 10.0, CURVE_LENGTH);
        }
    }

    /// Shape one sample. Input outside `[-1, 1]` maps to the curve ends.
    pub fn shape(&self, x: f64) -> f64 {
        let last = self.curve.len() - 1;
        let pos = (x.clamp(-1.0, 1.0) + 1.0) * 0.5 * last as f64;
        let i = (pos.floor() as usize).min(last - 1);
        let frac = pos - i as f64;
        self.curve[i] * (1.0 - frac) + self.curve[i + 1] * frac
    }

    pub fn process_block(&mut self, block: &mut [Frame]) {
        for frame in block.iter_mut() {
            *frame = frame.map(|s| self.shape(s));
        }
    }
}
