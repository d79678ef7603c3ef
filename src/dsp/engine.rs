//! Audio Engine: mixes active voices through the bus chain.
//!
//! The engine owns an arena of voices, the global bus effects chain and a
//! frame counter that doubles as the audio clock. Voices arrive either
//! directly (offline rendering) or over a bounded command channel from the
//! control thread (live playback); each block they are rendered, summed,
//! run through the bus and reaped once expired. A connected engine hands
//! reaped and evicted voices back over a second channel so they are freed
//! on the control thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::config::EngineConfig;
use crate::scheduler::{AudioClock, Trigger, TriggerSink};
use crate::settings::EffectAmounts;

use super::effects::{ChainKind, ChainParams, EffectsChain};
use super::frame::Frame;
use super::reverb_pool::ReverbPool;
use super::voice::{Voice, VoiceTiming};

/// Commands pending for the next block boundary.
#[derive(Debug)]
pub enum EngineCommand {
    Play(Box<Voice>),
    SetBusEffects(EffectAmounts),
}

/// Capacity of the control → engine command channel.
const COMMAND_CAPACITY: usize = 256;

/// The engine's position, readable from any thread.
#[derive(Debug, Clone)]
pub struct EngineClock {
    frames: Arc<AtomicU64>,
    sample_rate: f64,
}

impl EngineClock {
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }
}

impl AudioClock for EngineClock {
    fn now(&self) -> f64 {
        self.frames() as f64 / self.sample_rate
    }
}

/// Control-side endpoint of an engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: Sender<EngineCommand>,
    retired: Receiver<Box<Voice>>,
    clock: EngineClock,
}

impl EngineHandle {
    pub fn clock(&self) -> EngineClock {
        self.clock.clone()
    }

    /// Queue a voice. Returns `false` if the engine is gone or backed up,
    /// in which case the voice is dropped.
    pub fn play(&self, voice: Voice) -> bool {
        self.send(EngineCommand::Play(Box::new(voice)))
    }

    pub fn set_bus_effects(&self, amounts: EffectAmounts) -> bool {
        self.send(EngineCommand::SetBusEffects(amounts))
    }

    /// Free voices the engine has finished with. Returns how many.
    pub fn release_retired(&self) -> usize {
        self.retired.try_iter().count()
    }

    fn send(&self, command: EngineCommand) -> bool {
        match self.commands.try_send(command) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::warn!("engine command queue full, dropping command");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Turns scheduler triggers into voices for a live engine.
///
/// Voices are built here on the control thread, with their effects chains
/// and scratch buffers sized for the engine block; reverbs come from a
/// pool prepared in the background. Retired voices come back here to be
/// freed, so the audio thread only moves boxes in and out of its arena.
/// A trigger the engine cannot accept is dropped silently.
#[derive(Debug)]
pub struct EngineSink {
    handle: EngineHandle,
    timing: VoiceTiming,
    params: ChainParams,
    seed: u64,
    reverbs: ReverbPool,
}

impl EngineSink {
    pub fn new(handle: EngineHandle, config: &EngineConfig) -> Self {
        let params = ChainParams::new(config, config.block_size);
        EngineSink {
            handle,
            timing: AudioEngine::voice_timing(config),
            params,
            seed: config.seed,
            reverbs: ReverbPool::spawn(params, config.seed, config.reverb_pool_size),
        }
    }

    /// Per-voice reverbs ready to use without waiting.
    pub fn reverbs_ready(&self) -> usize {
        self.reverbs.available()
    }

    pub fn build_voice(&mut self, trigger: &Trigger) -> Voice {
        let amounts = trigger.settings.effects;
        let chain = if amounts.reverb() > 0.0 {
            let (seed, reverb) = self.reverbs.take();
            EffectsChain::for_voice(self.params, amounts, seed, reverb)
        } else {
            EffectsChain::build(ChainKind::Voice, self.params, amounts, self.seed)
        };
        let mut voice = Voice::new(trigger.instrument, trigger.time, trigger.settings.gain(), self.timing)
            .with_effects(chain);
        voice.reserve(self.params.partition);
        voice
    }
}

impl TriggerSink for EngineSink {
    fn trigger(&mut self, trigger: Trigger) {
        let voice = self.build_voice(&trigger);
        self.handle.play(voice);
    }

    fn bus_effects(&mut self, amounts: EffectAmounts) {
        self.handle.set_bus_effects(amounts);
    }

    fn maintain(&mut self) {
        let freed = self.handle.release_retired();
        if freed > 0 {
            log::trace!("freed {freed} retired voices");
        }
    }
}

/// The audio rendering engine.
pub struct AudioEngine {
    sample_rate: f64,
    block_size: usize,
    max_voices: usize,
    voices: Vec<Box<Voice>>,
    bus: EffectsChain,
    frames: Arc<AtomicU64>,
    position: u64,
    commands: Option<Receiver<EngineCommand>>,
    retired: Option<Sender<Box<Voice>>>,
    mix: Vec<Frame>,
    warned_overflow: bool,
}

impl std::fmt::Debug for AudioEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioEngine")
            .field("sample_rate", &self.sample_rate)
            .field("block_size", &self.block_size)
            .field("voices", &self.voices.len())
            .field("position", &self.position)
            .finish()
    }
}

impl AudioEngine {
    /// An engine rendering in `block_size` quanta with the bus chain set
    /// to `bus_amounts`.
    pub fn new(config: &EngineConfig, block_size: usize, bus_amounts: EffectAmounts) -> Self {
        let block_size = block_size.max(1);
        let max_voices = config.max_voices.max(1);
        AudioEngine {
            sample_rate: config.sample_rate_f64(),
            block_size,
            max_voices,
            voices: Vec::with_capacity(max_voices),
            bus: EffectsChain::build(
                ChainKind::Bus,
                ChainParams::new(config, block_size),
                bus_amounts,
                config.seed,
            ),
            frames: Arc::new(AtomicU64::new(0)),
            position: 0,
            commands: None,
            retired: None,
            mix: vec![Frame::ZERO; block_size],
            warned_overflow: false,
        }
    }

    /// Lift the voice cap. Offline renders admit every scheduled hit.
    pub fn unbounded(mut self) -> Self {
        self.max_voices = usize::MAX;
        self
    }

    /// Open the command and retirement channels and return the
    /// control-side handle.
    pub fn connect(&mut self) -> EngineHandle {
        let (tx, rx) = crossbeam_channel::bounded(COMMAND_CAPACITY);
        let (retired_tx, retired_rx) = crossbeam_channel::bounded(COMMAND_CAPACITY);
        self.commands = Some(rx);
        self.retired = Some(retired_tx);
        EngineHandle {
            commands: tx,
            retired: retired_rx,
            clock: self.clock(),
        }
    }

    pub fn clock(&self) -> EngineClock {
        EngineClock {
            frames: Arc::clone(&self.frames),
            sample_rate: self.sample_rate,
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Frames rendered so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    pub fn bus_effects(&self) -> EffectAmounts {
        self.bus.amounts()
    }

    /// Timing for voices this engine will play.
    pub fn voice_timing(config: &EngineConfig) -> VoiceTiming {
        VoiceTiming {
            sample_rate: config.sample_rate_f64(),
            release_margin: config.voice_release_margin_seconds,
        }
    }

    /// Admit a voice. At the cap the oldest voice is evicted.
    pub fn play(&mut self, voice: Box<Voice>) {
        if self.voices.len() >= self.max_voices {
            if !self.warned_overflow {
                log::warn!(
                    "voice limit of {} reached, evicting oldest voices",
                    self.max_voices
                );
                self.warned_overflow = true;
            }
            let oldest = self.voices.remove(0);
            self.retire(oldest);
        }
        log::trace!(
            "voice {} admitted at frame {}",
            voice.instrument(),
            voice.start_frame()
        );
        self.voices.push(voice);
    }

    /// Apply new bus amounts; takes effect from the next block.
    pub fn set_bus_effects(&mut self, amounts: EffectAmounts) {
        self.bus.set_amounts(amounts);
    }

    /// Hand a finished voice back to the control thread. Unconnected
    /// engines, or a full return queue, free it here.
    fn retire(&mut self, voice: Box<Voice>) {
        if let Some(tx) = &self.retired {
            let _ = tx.try_send(voice);
        }
    }

    fn drain_commands(&mut self) {
        while let Some(command) = self.commands.as_ref().and_then(|rx| rx.try_recv().ok()) {
            match command {
                EngineCommand::Play(voice) => self.play(voice),
                EngineCommand::SetBusEffects(amounts) => self.set_bus_effects(amounts),
            }
        }
    }

    /// Render the next `out.len()` frames into `out` (overwriting it).
    ///
    /// Output is produced in whole engine blocks; a trailing partial block
    /// is rendered but should only occur at the end of a stream.
    pub fn render(&mut self, out: &mut [Frame]) {
        for chunk in out.chunks_mut(self.block_size) {
            self.render_block(chunk);
        }
    }

    fn render_block(&mut self, out: &mut [Frame]) {
        self.drain_commands();

        let mix = &mut self.mix[..out.len()];
        mix.fill(Frame::ZERO);
        for voice in self.voices.iter_mut() {
            voice.render_into(mix, self.position);
        }
        self.bus.process_block(mix);
        out.copy_from_slice(mix);

        self.position += out.len() as u64;
        self.frames.store(self.position, Ordering::Release);

        let now = self.position;
        let mut i = 0;
        while i < self.voices.len() {
            if self.voices[i].is_expired(now) {
                let voice = self.voices.remove(i);
                log::trace!("voice {} expired at frame {now}", voice.instrument());
                self.retire(voice);
            } else {
                i += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::pattern::Instrument;
    use crate::scheduler::{MAX_BPM, step_duration};
    use crate::settings::InstrumentSettings;

    fn config() -> EngineConfig {
        EngineConfig {
            max_voices: 4,
            ..EngineConfig::default()
        }
    }

    fn voice(config: &EngineConfig, instrument: Instrument, at: f64) -> Box<Voice> {
        Box::new(Voice::new(instrument, at, 1.0, AudioEngine::voice_timing(config)))
    }

    fn peak(frames: &[Frame]) -> f64 {
        frames.iter().map(Frame::peak).fold(0.0, f64::max)
    }

    #[test]
    fn silent_without_voices() {
        let mut engine = AudioEngine::new(&config(), 128, EffectAmounts::default());
        let mut out = vec![Frame::mono(1.0); 512];
        engine.render(&mut out);
        assert!(out.iter().all(|f| *f == Frame::ZERO));
        assert_eq!(engine.position(), 512);
    }

    #[test]
    fn plays_and_reaps_voice() {
        let config = config();
        let mut engine = AudioEngine::new(&config, 128, EffectAmounts::default());
        engine.play(voice(&config, Instrument::Hihat, 0.0));
        assert_eq!(engine.active_voices(), 1);

        let mut out = vec![Frame::ZERO; 4410];
        engine.render(&mut out);
        assert!(peak(&out) > 0.0);

        // 0.05 s decay + 0.5 s margin, then the voice is gone.
        let mut rest = vec![Frame::ZERO; 22050];
        engine.render(&mut rest);
        assert_eq!(engine.active_voices(), 0);
    }

    #[test]
    fn voice_cap_evicts_oldest() {
        let config = config();
        let mut engine = AudioEngine::new(&config, 128, EffectAmounts::default());
        for i in 0..6 {
            engine.play(voice(&config, Instrument::Crash, i as f64 * 0.01));
        }
        assert_eq!(engine.active_voices(), 4);
        assert_eq!(engine.voices[0].start_frame(), 882);
    }

    #[test]
    fn unbounded_keeps_everything() {
        let config = config();
        let mut engine = AudioEngine::new(&config, 128, EffectAmounts::default()).unbounded();
        for i in 0..20 {
            engine.play(voice(&config, Instrument::Rim, i as f64));
        }
        assert_eq!(engine.active_voices(), 20);
    }

    #[test]
    fn commands_apply_at_block_boundary() {
        let config = config();
        let mut engine = AudioEngine::new(&config, 128, EffectAmounts::default());
        let handle = engine.connect();
        let clock = handle.clock();
        assert_eq!(clock.now(), 0.0);

        assert!(handle.play(Voice::new(
            Instrument::Kick,
            0.0,
            1.0,
            AudioEngine::voice_timing(&config)
        )));
        assert!(handle.set_bus_effects(EffectAmounts::new(0.0, 40.0, 0.0)));
        assert_eq!(engine.active_voices(), 0);

        let mut out = vec![Frame::ZERO; 128];
        engine.render(&mut out);
        assert_eq!(engine.active_voices(), 1);
        assert_eq!(engine.bus_effects().delay(), 40.0);
        assert_eq!(clock.frames(), 128);
        assert!((clock.now() - 128.0 / 44100.0).abs() < 1e-12);
    }

    #[test]
    fn dropped_engine_rejects_commands() {
        let config = config();
        let mut engine = AudioEngine::new(&config, 128, EffectAmounts::default());
        let handle = engine.connect();
        drop(engine);
        assert!(!handle.set_bus_effects(EffectAmounts::default()));
    }

    #[test]
    fn sink_builds_voice_with_settings() {
        let config = config();
        let mut engine = AudioEngine::new(&config, 128, EffectAmounts::default());
        let mut sink = EngineSink::new(engine.connect(), &config);

        let mut settings = InstrumentSettings::default();
        settings.set_volume(150.0);
        settings.effects.set_delay(50.0);
        let trigger = Trigger {
            instrument: Instrument::Clap,
            step: 3,
            time: 0.25,
            settings,
        };
        let voice = sink.build_voice(&trigger);
        assert_eq!(voice.instrument(), Instrument::Clap);
        assert_eq!(voice.start_frame(), 11025);
        assert!(voice.has_effects());
        assert!(voice.expire_frame() > voice.stop_frame());

        sink.trigger(trigger);
        sink.bus_effects(EffectAmounts::new(10.0, 0.0, 0.0));
        let mut out = vec![Frame::ZERO; 128];
        engine.render(&mut out);
        assert_eq!(engine.active_voices(), 1);
        assert_eq!(engine.bus_effects().reverb(), 10.0);
    }

    #[test]
    fn finished_voices_return_to_control_side() {
        let config = config();
        let mut engine = AudioEngine::new(&config, 128, EffectAmounts::default());
        let handle = engine.connect();
        for i in 0..6 {
            engine.play(voice(&config, Instrument::Hihat, i as f64 * 0.001));
        }
        // Two evicted at the cap of four.
        assert_eq!(handle.release_retired(), 2);

        let mut out = vec![Frame::ZERO; 44100];
        engine.render(&mut out);
        assert_eq!(engine.active_voices(), 0);
        assert_eq!(handle.release_retired(), 4);
        assert_eq!(handle.release_retired(), 0);
    }

    #[test]
    fn sink_frees_retired_voices_when_maintained() {
        let config = config();
        let mut engine = AudioEngine::new(&config, 128, EffectAmounts::default());
        let handle = engine.connect();
        let mut sink = EngineSink::new(handle.clone(), &config);
        engine.play(voice(&config, Instrument::Rim, 0.0));
        let mut out = vec![Frame::ZERO; 44100];
        engine.render(&mut out);

        sink.maintain();
        assert_eq!(handle.release_retired(), 0, "the sink already freed it");
    }

    #[test]
    fn full_step_with_reverb_builds_within_fastest_step() {
        let config = EngineConfig::default();
        let mut engine = AudioEngine::new(&config, config.block_size, EffectAmounts::default());
        let mut sink = EngineSink::new(engine.connect(), &config);

        let deadline = Instant::now() + Duration::from_secs(120);
        while sink.reverbs_ready() < Instrument::ALL.len() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(sink.reverbs_ready(), Instrument::ALL.len());

        let mut settings = InstrumentSettings::default();
        settings.effects.set_reverb(30.0);
        let started = Instant::now();
        let voices: Vec<Voice> = Instrument::ALL
            .iter()
            .map(|&instrument| {
                sink.build_voice(&Trigger {
                    instrument,
                    step: 0,
                    time: 0.0,
                    settings,
                })
            })
            .collect();
        let elapsed = started.elapsed().as_secs_f64();

        assert!(voices.iter().all(Voice::has_effects));
        let budget = step_duration(MAX_BPM) / 2.0;
        assert!(elapsed < budget, "10 voices took {elapsed:.4} s, budget {budget} s");
    }

    #[test]
    fn late_voice_starts_immediately() {
        let config = config();
        let mut engine = AudioEngine::new(&config, 128, EffectAmounts::default());
        let mut out = vec![Frame::ZERO; 1280];
        engine.render(&mut out);
        // Scheduled in the past: it sounds from the next block, mid-envelope.
        engine.play(voice(&config, Instrument::Kick, 0.0));
        let mut next = vec![Frame::ZERO; 128];
        engine.render(&mut next);
        assert!(peak(&next) > 0.0);
    }
}
