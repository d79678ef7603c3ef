//! The distortion → delay → reverb chain.
//!
//! One routine builds the chain for both the shared bus and every voice.
//! Each stage is a wet/dry pair: the input is split, one copy runs through
//! the processor, and the two are summed with `wet = amount/100`,
//! `dry = 1 - wet`.

use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

use crate::config::EngineConfig;
use crate::settings::EffectAmounts;

use super::delay::{FeedbackDelay, echo_tail_seconds};
use super::frame::Frame;
use super::reverb::ConvolutionReverb;
use super::waveshaper::WaveShaper;

/// A block processor that can sit on the wet side of a wet/dry pair.
pub trait Process {
    fn process_block(&mut self, block: &mut [Frame]);
}

impl Process for WaveShaper {
    fn process_block(&mut self, block: &mut [Frame]) {
        WaveShaper::process_block(self, block)
    }
}

impl Process for FeedbackDelay {
    fn process_block(&mut self, block: &mut [Frame]) {
        FeedbackDelay::process_block(self, block)
    }
}

impl Process for ConvolutionReverb {
    fn process_block(&mut self, block: &mut [Frame]) {
        ConvolutionReverb::process_block(self, block)
    }
}

/// Wet and dry gains for an effect amount in percent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixGains {
    pub wet: f64,
    pub dry: f64,
}

impl MixGains {
    pub fn from_amount(amount: f64) -> Self {
        let wet = (amount / 100.0).clamp(0.0, 1.0);
        MixGains { wet, dry: 1.0 - wet }
    }
}

/// A processor with its dry path.
#[derive(Debug)]
pub struct WetDry<P> {
    processor: P,
    gains: MixGains,
    /// Stateless processors (and the reverb, whose wet path is costly) are
    /// skipped at 0%, where the output already equals the input.
    skip_when_dry: bool,
    scratch: Vec<Frame>,
}

impl<P: Process> WetDry<P> {
    pub fn new(processor: P, amount: f64, skip_when_dry: bool) -> Self {
        WetDry {
            processor,
            gains: MixGains::from_amount(amount),
            skip_when_dry,
            scratch: Vec::new(),
        }
    }

    pub fn gains(&self) -> MixGains {
        self.gains
    }

    pub fn set_amount(&mut self, amount: f64) {
        self.gains = MixGains::from_amount(amount);
    }

    pub fn processor_mut(&mut self) -> &mut P {
        &mut self.processor
    }

    /// Size the scratch buffer for blocks of up to `frames`.
    pub fn reserve(mut self, frames: usize) -> Self {
        self.scratch.reserve(frames);
        self
    }

    pub fn process_block(&mut self, block: &mut [Frame]) {
        if self.skip_when_dry && self.gains.wet == 0.0 {
            return;
        }
        self.scratch.clear();
        self.scratch.extend_from_slice(block);
        self.processor.process_block(&mut self.scratch);
        let MixGains { wet, dry } = self.gains;
        for (out, processed) in block.iter_mut().zip(&self.scratch) {
            *out = *out * dry + *processed * wet;
        }
    }
}

/// Fixed parameters shared by every chain an engine builds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainParams {
    pub sample_rate: f64,
    pub delay_seconds: f64,
    pub feedback_scale: f64,
    pub reverb_seconds: f64,
    /// Reverb partition size; equals the engine's render block.
    pub partition: usize,
    /// Partition size for the late part of the reverb response.
    pub tail_partition: usize,
}

impl ChainParams {
    pub fn new(config: &EngineConfig, block_size: usize) -> Self {
        ChainParams {
            sample_rate: config.sample_rate_f64(),
            delay_seconds: config.delay_time_seconds,
            feedback_scale: config.delay_feedback_scale,
            reverb_seconds: config.reverb_seconds,
            partition: block_size,
            tail_partition: config.reverb_tail_partition,
        }
    }

    /// A reverb with a fresh impulse response drawn from `rng`.
    pub fn reverb(&self, rng: &mut impl Rng) -> ConvolutionReverb {
        ConvolutionReverb::generate(
            self.sample_rate,
            self.reverb_seconds,
            self.partition,
            self.tail_partition,
            rng,
        )
    }

    fn feedback(&self, delay_amount: f64) -> f64 {
        delay_amount / 100.0 * self.feedback_scale
    }
}

/// Which stages a chain builds up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainKind {
    /// Every stage exists so amounts can change while running.
    Bus,
    /// Amounts are fixed at trigger time; stages at 0% are left out.
    Voice,
}

/// Distortion → delay → reverb, each as a wet/dry pair.
#[derive(Debug)]
pub struct EffectsChain {
    params: ChainParams,
    amounts: EffectAmounts,
    rng: StdRng,
    distortion: Option<WetDry<WaveShaper>>,
    delay: Option<WetDry<FeedbackDelay>>,
    reverb: Option<WetDry<ConvolutionReverb>>,
}

impl EffectsChain {
    /// Build a chain for `amounts`. The reverb impulse response is drawn
    /// from `seed` here, once, not per block.
    pub fn build(kind: ChainKind, params: ChainParams, amounts: EffectAmounts, seed: u64) -> Self {
        Self::assemble(kind, params, amounts, seed, None)
    }

    /// A voice chain around a reverb generated ahead of time from `seed`.
    /// The reverb is only kept if `amounts` has a reverb send.
    pub fn for_voice(params: ChainParams, amounts: EffectAmounts, seed: u64, reverb: ConvolutionReverb) -> Self {
        Self::assemble(ChainKind::Voice, params, amounts, seed, Some(reverb))
    }

    fn assemble(
        kind: ChainKind,
        params: ChainParams,
        amounts: EffectAmounts,
        seed: u64,
        reverb: Option<ConvolutionReverb>,
    ) -> Self {
        let mut chain = EffectsChain {
            params,
            amounts,
            rng: StdRng::seed_from_u64(seed),
            distortion: None,
            delay: None,
            reverb: None,
        };
        let all = kind == ChainKind::Bus;
        if all || amounts.distortion() > 0.0 {
            chain.distortion = Some(chain.make_distortion());
        }
        if all || amounts.delay() > 0.0 {
            chain.delay = Some(chain.make_delay());
        }
        if all || amounts.reverb() > 0.0 {
            chain.reverb = Some(match reverb {
                Some(reverb) => chain.wrap_reverb(reverb),
                None => chain.make_reverb(),
            });
        }
        chain
    }

    fn make_distortion(&self) -> WetDry<WaveShaper> {
        let amount = self.amounts.distortion();
        WetDry::new(WaveShaper::new(amount), amount, true).reserve(self.params.partition)
    }

    fn make_delay(&self) -> WetDry<FeedbackDelay> {
        let amount = self.amounts.delay();
        let delay = FeedbackDelay::new(
            self.params.sample_rate,
            self.params.delay_seconds,
            self.params.feedback(amount),
        );
        WetDry::new(delay, amount, false).reserve(self.params.partition)
    }

    fn make_reverb(&mut self) -> WetDry<ConvolutionReverb> {
        let reverb = self.params.reverb(&mut self.rng);
        self.wrap_reverb(reverb)
    }

    fn wrap_reverb(&self, reverb: ConvolutionReverb) -> WetDry<ConvolutionReverb> {
        WetDry::new(reverb, self.amounts.reverb(), true).reserve(self.params.partition)
    }

    pub fn amounts(&self) -> EffectAmounts {
        self.amounts
    }

    /// Apply new amounts. The distortion curve is only recomputed when the
    /// distortion amount actually changed.
    pub fn set_amounts(&mut self, amounts: EffectAmounts) {
        if amounts == self.amounts {
            return;
        }
        self.amounts = amounts;

        match self.distortion.as_mut() {
            Some(stage) => {
                stage.processor_mut().set_amount(amounts.distortion());
                stage.set_amount(amounts.distortion());
            }
            None if amounts.distortion() > 0.0 => self.distortion = Some(self.make_distortion()),
            None => {}
        }
        match self.delay.as_mut() {
            Some(stage) => {
                let feedback = self.params.feedback(amounts.delay());
                stage.processor_mut().set_feedback(feedback);
                stage.set_amount(amounts.delay());
            }
            None if amounts.delay() > 0.0 => self.delay = Some(self.make_delay()),
            None => {}
        }
        match self.reverb.as_mut() {
            Some(stage) => stage.set_amount(amounts.reverb()),
            None if amounts.reverb() > 0.0 => self.reverb = Some(self.make_reverb()),
            None => {}
        }
    }

    /// How long the chain keeps producing sound after its input goes silent.
    pub fn tail_seconds(&self) -> f64 {
        let mut tail = 0.0;
        if self.amounts.delay() > 0.0 {
            tail += echo_tail_seconds(self.params.delay_seconds, self.params.feedback(self.amounts.delay()));
        }
        if self.amounts.reverb() > 0.0 {
            tail += self.params.reverb_seconds;
        }
        tail
    }

    /// Run `block` through every stage in order, in place.
    pub fn process_block(&mut self, block: &mut [Frame]) {
        if let Some(stage) = self.distortion.as_mut() {
            stage.process_block(block);
        }
        if let Some(stage) = self.delay.as_mut() {
            stage.process_block(block);
        }
        if let Some(stage) = self.reverb.as_mut() {
            stage.process_block(block);
        }
    }
}
