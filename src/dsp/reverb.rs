//! Convolution reverb against a synthetic impulse response.
//!
//! The impulse response is decaying white noise, one independent channel
//! per output side. Convolution is two-stage overlap-save. The head of the
//! response is cut into partitions of one render block, so output for a
//! block is available as soon as the block is complete. The rest of the
//! response uses much larger partitions, transformed once per tail block;
//! its one-tail-block latency is exactly covered by the head. Windows of
//! silent input are neither transformed nor multiplied.

use std::sync::Arc;

use rand::Rng;
use realfft::num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use super::frame::Frame;

/// Reference level used to normalize impulse responses, in line with
/// WebAudio's ConvolverNode `normalize = true`.
const GAIN_CALIBRATION: f64 = 0.00125;
const GAIN_CALIBRATION_SAMPLE_RATE: f64 = 44100.0;
const MIN_POWER: f64 = 0.000125;

/// Input below this level (-240 dBFS) counts as silence.
const SILENCE: f64 = 1e-12;

/// One channel of decaying noise: `random(-1, 1) * (1 - i/len)^2`.
pub fn impulse_response(length: usize, rng: &mut impl Rng) -> Vec<f64> {
    (0..length)
        .map(|i| {
            let decay = 1.0 - i as f64 / length as f64;
            rng.gen_range(-1.0..1.0) * decay * decay
        })
        .collect()
}

/// Scale that brings the response's RMS power to the calibration level.
pub fn normalization_scale(channels: &[Vec<f64>], sample_rate: f64) -> f64 {
    let samples: usize = channels.iter().map(Vec::len).sum();
    if samples == 0 {
        return 1.0;
    }
    let energy: f64 = channels.iter().flatten().map(|s| s * s).sum();
    let power = (energy / samples as f64).sqrt().max(MIN_POWER);
    GAIN_CALIBRATION / power * GAIN_CALIBRATION_SAMPLE_RATE / sample_rate
}

#[derive(Debug, Clone)]
struct ChannelState {
    /// Spectrum of each impulse-response partition.
    partitions: Vec<Vec<Complex<f64>>>,
    /// Spectra of the most recent input windows, newest at `head`.
    history: Vec<Vec<Complex<f64>>>,
    /// Whether the matching history slot holds any signal.
    live: Vec<bool>,
    head: usize,
    /// Previous block followed by the current block.
    window: Vec<f64>,
    previous_silent: bool,
}

/// Uniformly partitioned overlap-save convolution over one slice of a
/// stereo response.
struct Segment {
    partition: usize,
    forward: Arc<dyn RealToComplex<f64>>,
    inverse: Arc<dyn ComplexToReal<f64>>,
    channels: [ChannelState; 2],
    time: Vec<f64>,
    acc: Vec<Complex<f64>>,
    scale: f64,
}

impl Segment {
    fn new(impulse: [&[f64]; 2], partition: usize, planner: &mut RealFftPlanner<f64>) -> Self {
        let fft_size = partition * 2;
        let forward = planner.plan_fft_forward(fft_size);
        let inverse = planner.plan_fft_inverse(fft_size);

        let mut time = forward.make_input_vec();
        let channels = impulse.map(|ir| {
            let count = ir.len().div_ceil(partition).max(1);
            let partitions = (0..count)
                .map(|p| {
                    time.fill(0.0);
                    let start = (p * partition).min(ir.len());
                    let end = (start + partition).min(ir.len());
                    time[..end - start].copy_from_slice(&ir[start..end]);
                    let mut spectrum = forward.make_output_vec();
                    let res = forward.process(&mut time, &mut spectrum);
                    debug_assert!(res.is_ok(), "fft buffers sized by the planner");
                    spectrum
                })
                .collect::<Vec<_>>();
            ChannelState {
                history: vec![forward.make_output_vec(); count],
                live: vec![false; count],
                partitions,
                head: 0,
                window: vec![0.0; fft_size],
                previous_silent: true,
            }
        });

        Segment {
            partition,
            acc: inverse.make_input_vec(),
            forward,
            inverse,
            channels,
            time,
            scale: 1.0 / fft_size as f64,
        }
    }

    fn partition_count(&self) -> usize {
        self.channels[0].partitions.len()
    }

    /// Complex multiply-adds per input frame and channel at full load.
    fn multiply_adds_per_frame(&self) -> f64 {
        (self.partition_count() * (self.partition + 1)) as f64 / self.partition as f64
    }

    /// Convolve one partition-long block of channel `side` in place.
    fn convolve(&mut self, side: usize, io: &mut [f64]) {
        let Segment {
            partition,
            forward,
            inverse,
            channels,
            time,
            acc,
            scale,
        } = self;
        let b = *partition;
        let state = &mut channels[side];
        let count = state.partitions.len();

        let silent = io.iter().all(|s| s.abs() <= SILENCE);
        state.window.copy_within(b.., 0);
        state.window[b..].copy_from_slice(io);
        let live = !(silent && state.previous_silent);
        state.previous_silent = silent;
        state.live[state.head] = live;
        if live {
            time.copy_from_slice(&state.window);
            let res = forward.process(time, &mut state.history[state.head]);
            debug_assert!(res.is_ok(), "fft buffers sized by the planner");
        }

        acc.fill(Complex::new(0.0, 0.0));
        let mut heard = false;
        for (p, h) in state.partitions.iter().enumerate() {
            let slot = (state.head + count - p) % count;
            if !state.live[slot] {
                continue;
            }
            heard = true;
            for ((a, xv), hv) in acc.iter_mut().zip(&state.history[slot]).zip(h) {
                *a += xv * hv;
            }
        }
        state.head = (state.head + 1) % count;

        if !heard {
            io.fill(0.0);
            return;
        }
        // DC and Nyquist bins of a real signal's spectrum are real.
        if let Some(first) = acc.first_mut() {
            first.im = 0.0;
        }
        if let Some(last) = acc.last_mut() {
            last.im = 0.0;
        }

        let res = inverse.process(acc, time);
        debug_assert!(res.is_ok(), "fft buffers sized by the planner");
        for (dst, &y) in io.iter_mut().zip(&time[b..]) {
            *dst = y * *scale;
        }
    }
}

/// The late part of the response. Input is gathered a tail block at a
/// time; the result is the output for the following tail block.
struct TailStage {
    segment: Segment,
    input: [Vec<f64>; 2],
    output: [Vec<f64>; 2],
    fill: usize,
}

impl TailStage {
    /// Account for `frames` more input; convolve once a tail block is full.
    fn advance(&mut self, frames: usize) {
        self.fill += frames;
        if self.fill < self.segment.partition {
            return;
        }
        self.fill = 0;
        let TailStage {
            segment,
            input,
            output,
            ..
        } = self;
        for side in 0..2 {
            output[side].copy_from_slice(&input[side]);
            segment.convolve(side, &mut output[side]);
        }
    }
}

/// Stereo two-stage convolver. Processes audio in whole head partitions.
pub struct ConvolutionReverb {
    head: Segment,
    tail: Option<TailStage>,
    io: Vec<f64>,
}

impl std::fmt::Debug for ConvolutionReverb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConvolutionReverb")
            .field("partition", &self.head.partition)
            .field("head_partitions", &self.head.partition_count())
            .field("tail_partition", &self.tail_partition_size())
            .field(
                "tail_partitions",
                &self.tail.as_ref().map(|t| t.segment.partition_count()),
            )
            .finish()
    }
}

impl ConvolutionReverb {
    /// Build a reverb with a freshly generated `seconds`-long response.
    ///
    /// `partition` is the render block; `tail_partition` the partition size
    /// for the late response (rounded up to whole render blocks).
    pub fn generate(
        sample_rate: f64,
        seconds: f64,
        partition: usize,
        tail_partition: usize,
        rng: &mut impl Rng,
    ) -> Self {
        let length = ((seconds * sample_rate).round() as usize).max(1);
        let left = impulse_response(length, rng);
        let right = impulse_response(length, rng);
        Self::from_impulse([left, right], sample_rate, partition, tail_partition)
    }

    /// Build a reverb from an explicit stereo response (normalized).
    pub fn from_impulse(
        impulse: [Vec<f64>; 2],
        sample_rate: f64,
        partition: usize,
        tail_partition: usize,
    ) -> Self {
        let partition = partition.max(1);
        let tail_partition = tail_partition.max(partition).div_ceil(partition) * partition;

        let norm = normalization_scale(&impulse, sample_rate);
        let mut impulse = impulse;
        for s in impulse.iter_mut().flatten() {
            *s *= norm;
        }
        let length = impulse[0].len().max(impulse[1].len());
        let split = if tail_partition > partition && length > tail_partition {
            tail_partition
        } else {
            length
        };

        let mut planner = RealFftPlanner::<f64>::new();
        let left: &[f64] = &impulse[0];
        let right: &[f64] = &impulse[1];
        let (left_early, left_late) = left.split_at(split.min(left.len()));
        let (right_early, right_late) = right.split_at(split.min(right.len()));
        let head = Segment::new([left_early, right_early], partition, &mut planner);
        let tail = (split < length).then(|| TailStage {
            segment: Segment::new([left_late, right_late], tail_partition, &mut planner),
            input: [vec![0.0; tail_partition], vec![0.0; tail_partition]],
            output: [vec![0.0; tail_partition], vec![0.0; tail_partition]],
            fill: 0,
        });

        ConvolutionReverb {
            head,
            tail,
            io: vec![0.0; partition],
        }
    }

    pub fn partition_size(&self) -> usize {
        self.head.partition
    }

    /// Partition size of the late response, if it has one.
    pub fn tail_partition_size(&self) -> Option<usize> {
        self.tail.as_ref().map(|t| t.segment.partition)
    }

    /// Length of the impulse response in frames, rounded up to partitions.
    pub fn tail_frames(&self) -> usize {
        match &self.tail {
            Some(tail) => (1 + tail.segment.partition_count()) * tail.segment.partition,
            None => self.head.partition_count() * self.head.partition,
        }
    }

    /// Average complex multiply-adds per frame and channel while the whole
    /// response is being excited.
    pub fn multiply_adds_per_frame(&self) -> f64 {
        self.head.multiply_adds_per_frame()
            + self.tail.as_ref().map_or(0.0, |t| t.segment.multiply_adds_per_frame())
    }

    /// Replace `block` with its convolution (the wet signal).
    ///
    /// Blocks should be a multiple of the partition size; a trailing partial
    /// partition is zero-padded.
    pub fn process_block(&mut self, block: &mut [Frame]) {
        let ConvolutionReverb { head, tail, io } = self;
        let b = head.partition;
        for chunk in block.chunks_mut(b) {
            for side in 0..2 {
                io.fill(0.0);
                for (dst, frame) in io.iter_mut().zip(chunk.iter()) {
                    *dst = if side == 0 { frame.left } else { frame.right };
                }
                if let Some(tail) = tail.as_mut() {
                    tail.input[side][tail.fill..tail.fill + b].copy_from_slice(io);
                }
                head.convolve(side, io);
                if let Some(tail) = tail.as_ref() {
                    for (dst, late) in io.iter_mut().zip(&tail.output[side][tail.fill..tail.fill + b]) {
                        *dst += late;
                    }
                }
                for (frame, &wet) in chunk.iter_mut().zip(io.iter()) {
                    if side == 0 {
                        frame.left = wet;
                    } else {
                        frame.right = wet;
                    }
                }
            }
            if let Some(tail) = tail.as_mut() {
                tail.advance(b);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    /// Direct-form convolution of `input` with `ir`.
    fn naive(input: &[f64], ir: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; input.len()];
        for n in 0..input.len() {
            for (k, h) in ir.iter().enumerate() {
                if k <= n {
                    out[n] += input[n - k] * h;
                }
            }
        }
        out
    }

    fn convolve_blocks(reverb: &mut ConvolutionReverb, input: &[f64], block: usize) -> Vec<Frame> {
        let mut frames: Vec<Frame> = input.iter().map(|&s| Frame::new(s, -s)).collect();
        for chunk in frames.chunks_mut(block) {
            reverb.process_block(chunk);
        }
        frames
    }

    #[test]
    fn matches_direct_convolution() {
        let mut rng = StdRng::seed_from_u64(7);
        let ir_l = impulse_response(300, &mut rng);
        let ir_r = impulse_response(300, &mut rng);
        let norm = normalization_scale(&[ir_l.clone(), ir_r.clone()], 44100.0);
        let scaled_l: Vec<f64> = ir_l.iter().map(|h| h * norm).collect();
        let scaled_r: Vec<f64> = ir_r.iter().map(|h| h * norm).collect();

        // A burst, a silent gap long enough to skip whole windows, another burst.
        let input: Vec<f64> = (0..900)
            .map(|i| match i {
                0..160 | 600..640 => ((i * 37) % 11) as f64 / 11.0 - 0.5,
                _ => 0.0,
            })
            .collect();
        let neg: Vec<f64> = input.iter().map(|s| -s).collect();
        let expect_l = naive(&input, &scaled_l);
        let expect_r = naive(&neg, &scaled_r);

        // Single stage, rounded-up tail, exact tail, response shorter than the tail.
        for tail in [16, 50, 64, 1024] {
            let mut reverb =
                ConvolutionReverb::from_impulse([ir_l.clone(), ir_r.clone()], 44100.0, 16, tail);
            let out = convolve_blocks(&mut reverb, &input, 16);
            for n in 0..input.len() {
                assert!((out[n].left - expect_l[n]).abs() < 1e-9, "tail {tail}: left sample {n}");
                assert!((out[n].right - expect_r[n]).abs() < 1e-9, "tail {tail}: right sample {n}");
            }
        }
    }

    #[test]
    fn late_response_uses_large_partitions() {
        let mut rng = StdRng::seed_from_u64(11);
        let split = ConvolutionReverb::generate(44100.0, 2.0, 128, 4096, &mut rng);
        assert_eq!(split.partition_size(), 128);
        assert_eq!(split.tail_partition_size(), Some(4096));
        assert!(split.tail_frames() >= 88200);

        let uniform = ConvolutionReverb::generate(44100.0, 2.0, 128, 128, &mut rng);
        assert_eq!(uniform.tail_partition_size(), None);
        assert!(uniform.multiply_adds_per_frame() > 600.0);
        // 32 head partitions plus 21 tail partitions.
        let load = split.multiply_adds_per_frame();
        assert!(load < 60.0, "two-stage load {load}");
    }

    #[test]
    fn silence_in_silence_out() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut reverb = ConvolutionReverb::generate(44100.0, 0.5, 128, 1024, &mut rng);
        let mut block = vec![Frame::ZERO; 128];
        for _ in 0..20 {
            reverb.process_block(&mut block);
            assert!(block.iter().all(|f| *f == Frame::ZERO));
        }
    }

    #[test]
    fn impulse_decays_to_silence() {
        let mut rng = StdRng::seed_from_u64(1);
        let ir = impulse_response(1000, &mut rng);
        assert!(ir.iter().all(|s| s.abs() <= 1.0));
        let head: f64 = ir[..100].iter().map(|s| s.abs()).sum();
        let tail: f64 = ir[900..].iter().map(|s| s.abs()).sum();
        assert!(tail < head * 0.1, "tail {tail} should be far below head {head}");
    }

    #[test]
    fn rings_after_input_stops() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut reverb = ConvolutionReverb::generate(44100.0, 0.1, 128, 1024, &mut rng);
        let mut block = vec![Frame::ZERO; 128];
        block[0] = Frame::mono(1.0);
        reverb.process_block(&mut block);

        let mut later = vec![Frame::ZERO; 128];
        reverb.process_block(&mut later);
        assert!(later.iter().any(|f| f.peak() > 0.0), "tail should continue into the next block");

        // Well past the 0.1 s response everything is silent again.
        for _ in 0..40 {
            later.fill(Frame::ZERO);
            reverb.process_block(&mut later);
        }
        assert!(later.iter().all(|f| f.peak() < 1e-12));
    }

    #[test]
    fn normalization_tracks_power() {
        let quiet = vec![vec![0.01; 100]];
        let loud = vec![vec![1.0; 100]];
        let q = normalization_scale(&quiet, 44100.0);
        let l = normalization_scale(&loud, 44100.0);
        assert!((q / l - 100.0).abs() < 1e-6);
        assert!((l - GAIN_CALIBRATION).abs() < 1e-12);
    }

    #[test]
    fn tail_covers_response() {
        let mut rng = StdRng::seed_from_u64(9);
        let reverb = ConvolutionReverb::generate(1000.0, 2.0, 128, 4096, &mut rng);
        assert_eq!(reverb.partition_size(), 128);
        assert!(reverb.tail_frames() >= 2000);
    }
}
