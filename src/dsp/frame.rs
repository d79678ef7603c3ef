use std::ops::{Add, AddAssign, Mul};

/// One stereo sample pair, the unit every graph stage processes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Frame {
    pub left: f64,
    pub right: f64,
}

impl Frame {
    pub const ZERO: Frame = Frame { left: 0.0, right: 0.0 };

    pub fn new(left: f64, right: f64) -> Self {
        Frame { left, right }
    }

    /// The same sample on both channels.
    pub fn mono(sample: f64) -> Self {
        Frame { left: sample, right: sample }
    }

    pub fn peak(&self) -> f64 {
        self.left.abs().max(self.right.abs())
    }

    pub fn map(self, mut f: impl FnMut(f64) -> f64) -> Self {
        Frame {
            left: f(self.left),
            right: f(self.right),
        }
    }
}

impl Add for Frame {
    type Output = Frame;

    fn add(self, rhs: Frame) -> Frame {
        Frame::new(self.left + rhs.left, self.right + rhs.right)
    }
}

impl AddAssign for Frame {
    fn add_assign(&mut self, rhs: Frame) {
        self.left += rhs.left;
        self.right += rhs.right;
    }
}

impl Mul<f64> for Frame {
    type Output = Frame;

    fn mul(self, gain: f64) -> Frame {
        Frame::new(self.left * gain, self.right * gain)
    }
}
