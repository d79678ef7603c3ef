//! Exponential ramp envelopes.
//!
//! Mirrors an automation curve made of a set-value followed by an
//! exponential ramp: the value starts at `start`, moves geometrically to
//! `end` over `duration` seconds, then holds `end`.

/// An exponential ramp evaluated against time since the trigger.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpRamp {
    pub start: f64,
    pub end: f64,
    pub duration: f64,
}

impl ExpRamp {
    pub fn new(start: f64, end: f64, duration: f64) -> Self {
        ExpRamp { start, end, duration }
    }

    /// A constant value.
    pub fn hold(value: f64) -> Self {
        ExpRamp {
            start: value,
            end: value,
            duration: 0.0,
        }
    }

    /// Value `t` seconds after the trigger.
    ///
    /// An exponential curve is undefined through zero, so when either end
    /// is non-positive the start value is held until the ramp completes.
    pub fn value_at(&self, t: f64) -> f64 {
        if t <= 0.0 || self.duration <= 0.0 {
            return if t >= self.duration { self.end } else { self.start };
        }
        if t >= self.duration {
            return self.end;
        }
        if self.start <= 0.0 || self.end <= 0.0 {
            return self.start;
        }
        self.start * (self.end / self.start).powf(t / self.duration)
    }
}
