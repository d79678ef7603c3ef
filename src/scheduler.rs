//! Lookahead step scheduler.
//!
//! Each service tick the scheduler commits every step whose trigger time
//! falls inside `now + lookahead` on the audio clock, stamping triggers
//! with exact times so the coarse, jittery tick never shows up in the
//! audio. Pattern, mix and tempo are read from [`LiveState`] at the
//! instant each step is evaluated, never from a stale copy.

use std::sync::Arc;
use std::sync::atomic::{AtomicIsize, AtomicU8, AtomicU64, Ordering};
use std::time::Instant;

use arc_swap::ArcSwap;

use crate::pattern::{Instrument, Pattern, STEPS};
use crate::settings::{EffectAmounts, InstrumentSettings, MixSettings};

pub const MIN_BPM: f64 = 40.0;
pub const MAX_BPM: f64 = 240.0;
pub const DEFAULT_BPM: f64 = 120.0;

/// Clamp a tempo into `[MIN_BPM, MAX_BPM]`. NaN falls back to the default.
pub fn clamp_bpm(bpm: f64) -> f64 {
    if bpm.is_nan() {
        DEFAULT_BPM
    } else {
        bpm.clamp(MIN_BPM, MAX_BPM)
    }
}

/// Length of one 16th-note step in seconds: `60 / bpm / 4`.
pub fn step_duration(bpm: f64) -> f64 {
    15.0 / clamp_bpm(bpm)
}

/// A monotonic time source in seconds.
pub trait AudioClock {
    fn now(&self) -> f64;
}

/// Wall-clock time since creation, for hosts without an audio device.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioClock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, seconds: f64) {
        self.bits.store(seconds.to_bits(), Ordering::Release);
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.now() + seconds);
    }
}

impl AudioClock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }
}

/// One committed hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trigger {
    pub instrument: Instrument,
    pub step: usize,
    /// Absolute start time on the audio clock.
    pub time: f64,
    /// The instrument's settings as read when the step was evaluated.
    pub settings: InstrumentSettings,
}

/// Where committed triggers go.
pub trait TriggerSink {
    fn trigger(&mut self, trigger: Trigger);

    /// The bus amounts changed.
    fn bus_effects(&mut self, _amounts: EffectAmounts) {}

    /// Called once at the start of every service tick.
    fn maintain(&mut self) {}
}

/// Discards everything; used when no audio output is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl TriggerSink for NullSink {
    fn trigger(&mut self, _trigger: Trigger) {}
}

impl TriggerSink for Vec<Trigger> {
    fn trigger(&mut self, trigger: Trigger) {
        self.push(trigger);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PlaybackState {
    Stopped = 0,
    Playing = 1,
    Paused = 2,
}

impl PlaybackState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PlaybackState::Playing,
            2 => PlaybackState::Paused,
            _ => PlaybackState::Stopped,
        }
    }
}

/// State shared between the editor, the transport and the scheduler.
///
/// Readers take one atomic load per value; writers replace whole values.
#[derive(Debug)]
pub struct LiveState {
    pattern: ArcSwap<Pattern>,
    mix: ArcSwap<MixSettings>,
    bpm: AtomicU64,
    step: AtomicIsize,
    playback: AtomicU8,
}

impl Default for LiveState {
    fn default() -> Self {
        LiveState::new(Pattern::new(), MixSettings::default(), DEFAULT_BPM)
    }
}

impl LiveState {
    pub fn new(pattern: Pattern, mix: MixSettings, bpm: f64) -> Self {
        LiveState {
            pattern: ArcSwap::from_pointee(pattern),
            mix: ArcSwap::from_pointee(mix),
            bpm: AtomicU64::new(clamp_bpm(bpm).to_bits()),
            step: AtomicIsize::new(-1),
            playback: AtomicU8::new(PlaybackState::Stopped as u8),
        }
    }

    pub fn pattern(&self) -> Arc<Pattern> {
        self.pattern.load_full()
    }

    pub fn set_pattern(&self, pattern: Pattern) {
        self.pattern.store(Arc::new(pattern));
    }

    /// Flip one cell and return its new value.
    pub fn toggle_step(&self, instrument: Instrument, step: usize) -> bool {
        let previous = self.pattern.rcu(|current| {
            let mut next = **current;
            next.toggle(instrument, step);
            next
        });
        !previous.is_active(instrument, step)
    }

    pub fn clear_pattern(&self) {
        self.set_pattern(Pattern::new());
    }

    pub fn mix(&self) -> Arc<MixSettings> {
        self.mix.load_full()
    }

    pub fn set_mix(&self, mix: MixSettings) {
        self.mix.store(Arc::new(mix));
    }

    /// Edit one instrument's settings in place.
    pub fn update_instrument(&self, instrument: Instrument, edit: impl Fn(&mut InstrumentSettings)) {
        self.mix.rcu(|current| {
            let mut next = **current;
            edit(next.instrument_mut(instrument));
            next
        });
    }

    pub fn set_global_effects(&self, amounts: EffectAmounts) {
        self.mix.rcu(|current| {
            let mut next = **current;
            next.global = amounts;
            next
        });
    }

    pub fn bpm(&self) -> f64 {
        f64::from_bits(self.bpm.load(Ordering::Acquire))
    }

    /// Set the tempo (clamped). Takes effect at the next step boundary.
    pub fn set_bpm(&self, bpm: f64) -> f64 {
        let bpm = clamp_bpm(bpm);
        self.bpm.store(bpm.to_bits(), Ordering::Release);
        log::debug!("tempo set to {bpm} BPM");
        bpm
    }

    /// The most recently triggered step, for display. `None` when stopped.
    pub fn current_step(&self) -> Option<usize> {
        usize::try_from(self.step.load(Ordering::Acquire)).ok()
    }

    fn publish_step(&self, step: Option<usize>) {
        let value = step.map_or(-1, |s| s as isize);
        self.step.store(value, Ordering::Release);
    }

    pub fn playback(&self) -> PlaybackState {
        PlaybackState::from_u8(self.playback.load(Ordering::Acquire))
    }

    fn publish_playback(&self, playback: PlaybackState) {
        self.playback.store(playback as u8, Ordering::Release);
    }
}

/// The step clock.
#[derive(Debug)]
pub struct Scheduler<C> {
    state: Arc<LiveState>,
    clock: C,
    lookahead: f64,
    playback: PlaybackState,
    /// Last triggered step; `None` when stopped.
    step: Option<usize>,
    next_trigger_time: f64,
    bus: Option<EffectAmounts>,
}

impl<C: AudioClock> Scheduler<C> {
    pub fn new(state: Arc<LiveState>, clock: C, lookahead: f64) -> Self {
        Scheduler {
            state,
            clock,
            lookahead,
            playback: PlaybackState::Stopped,
            step: None,
            next_trigger_time: 0.0,
            bus: None,
        }
    }

    pub fn state(&self) -> &Arc<LiveState> {
        &self.state
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn playback(&self) -> PlaybackState {
        self.playback
    }

    pub fn current_step(&self) -> Option<usize> {
        self.step
    }

    pub fn next_trigger_time(&self) -> f64 {
        self.next_trigger_time
    }

    /// Start or resume. Either way the trigger cursor is rebased to now;
    /// only the step position survives a pause.
    pub fn play(&mut self) {
        if self.playback == PlaybackState::Playing {
            return;
        }
        self.next_trigger_time = self.clock.now();
        log::debug!(
            "transport {:?} -> Playing at {:.3}s (step {:?})",
            self.playback,
            self.next_trigger_time,
            self.step
        );
        self.set_playback(PlaybackState::Playing);
    }

    /// Stop issuing triggers, keeping the step position.
    pub fn pause(&mut self) {
        if self.playback != PlaybackState::Playing {
            return;
        }
        log::debug!("transport Playing -> Paused at step {:?}", self.step);
        self.set_playback(PlaybackState::Paused);
    }

    /// Stop and reset the step position.
    pub fn stop(&mut self) {
        log::debug!("transport {:?} -> Stopped", self.playback);
        self.step = None;
        self.state.publish_step(None);
        self.set_playback(PlaybackState::Stopped);
    }

    fn set_playback(&mut self, playback: PlaybackState) {
        self.playback = playback;
        self.state.publish_playback(playback);
    }

    /// One service tick. Returns the number of steps committed.
    pub fn tick(&mut self, sink: &mut impl TriggerSink) -> usize {
        sink.maintain();
        let global = self.state.mix().global;
        if self.bus != Some(global) {
            self.bus = Some(global);
            sink.bus_effects(global);
        }

        if self.playback != PlaybackState::Playing {
            return 0;
        }

        let horizon = self.clock.now() + self.lookahead;
        let mut committed = 0;
        while self.next_trigger_time < horizon {
            let step = self.step.map_or(0, |s| (s + 1) % STEPS);
            let pattern = self.state.pattern();
            let mix = self.state.mix();
            for instrument in pattern.active_at(step) {
                sink.trigger(Trigger {
                    instrument,
                    step,
                    time: self.next_trigger_time,
                    settings: *mix.instrument(instrument),
                });
            }
            self.step = Some(step);
            self.state.publish_step(self.step);
            self.next_trigger_time += step_duration(self.state.bpm());
            committed += 1;
        }
        committed
    }
}
