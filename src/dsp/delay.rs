//! Delay effect: stereo delay line with a feedback loop.

use super::frame::Frame;

/// A fixed-time stereo delay whose output is fed back into its input.
///
/// `process_block` replaces each frame with the delayed (wet) signal; the
/// dry blend happens in the surrounding wet/dry stage.
#[derive(Debug, Clone)]
pub struct FeedbackDelay {
    buffer: Vec<Frame>,
    write_pos: usize,
    /// Gain of the loop from the delay output back into its input.
    feedback: f64,
}

impl FeedbackDelay {
    pub fn new(sample_rate: f64, delay_seconds: f64, feedback: f64) -> Self {
        let delay_samples = ((delay_seconds * sample_rate).round() as usize).max(1);
        FeedbackDelay {
            buffer: vec![Frame::ZERO; delay_samples],
            write_pos: 0,
            feedback: feedback.clamp(0.0, 0.99),
        }
    }

    pub fn feedback(&self) -> f64 {
        self.feedback
    }

    pub fn set_feedback(&mut self, feedback: f64) {
        self.feedback = feedback.clamp(0.0, 0.99);
    }

    /// Delay length in frames.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[inline]
    pub fn process(&mut self, input: Frame) -> Frame {
        // The slot about to be overwritten holds the sample from one delay ago.
        let delayed = self.buffer[self.write_pos];
        self.buffer[self.write_pos] = input + delayed * self.feedback;
        self.write_pos = (self.write_pos + 1) % self.buffer.len();
        delayed
    }

    pub fn process_block(&mut self, block: &mut [Frame]) {
        for frame in block.iter_mut() {
            *frame = self.process(*frame);
        }
    }
}

/// Seconds until echoes of a `feedback` loop fall below -60 dB.
pub fn echo_tail_seconds(delay_seconds: f64, feedback: f64) -> f64 {
    if feedback <= 0.0 {
        return delay_seconds;
    }
    let repeats = (0.001f64.ln() / feedback.min(0.99).ln()).ceil().max(1.0);
    delay_seconds * (repeats + 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impulse_appears_after_delay() {
        let mut delay = FeedbackDelay::new(1000.0, 0.01, 0.0);
        assert_eq!(delay.len(), 10);

        assert_eq!(delay.process(Frame::mono(1.0)), Frame::ZERO);
        for _ in 1..10 {
            assert_eq!(delay.process(Frame::ZERO), Frame::ZERO);
        }
        assert_eq!(delay.process(Frame::ZERO), Frame::mono(1.0));
        // No feedback: a single echo only.
        for _ in 0..30 {
            assert_eq!(delay.process(Frame::ZERO), Frame::ZERO);
        }
    }

    #[test]
    fn feedback_repeats_attenuated() {
        let mut delay = FeedbackDelay::new(1000.0, 0.01, 0.5);
        delay.process(Frame::mono(1.0));
        let mut echoes = Vec::new();
        for i in 1..=40 {
            let out = delay.process(Frame::ZERO);
            if i % 10 == 0 {
                echoes.push(out.left);
            }
        }
        assert_eq!(echoes, vec![1.0, 0.5, 0.25, 0.125]);
    }

    #[test]
    fn quarter_second_at_44k() {
        let delay = FeedbackDelay::new(44100.0, 0.25, 0.25);
        assert_eq!(delay.len(), 11025);
        assert_eq!(delay.feedback(), 0.25);
    }

    #[test]
    fn feedback_is_capped() {
        let mut delay = FeedbackDelay::new(44100.0, 0.25, 0.0);
        delay.set_feedback(3.0);
        assert!(delay.feedback() < 1.0);
    }

    #[test]
    fn echo_tail_grows_with_feedback() {
        let short = echo_tail_seconds(0.25, 0.05);
        let long = echo_tail_seconds(0.25, 0.5);
        assert!(long > short);
        // 0.5^10 < 0.001
        assert!((long - 0.25 * 11.0).abs() < 1e-9);
        assert_eq!(echo_tail_seconds(0.25, 0.0), 0.25);
    }
}
