//! Periodic tick service and the threaded sequencer built on it.
//!
//! The scheduler only needs to be called back at least once per lookahead
//! window; [`TickService`] is that contract. [`ThreadTicker`] implements it
//! with a background thread and a `crossbeam_channel::tick` timer.
//! [`spawn_sequencer`] runs a [`Scheduler`] on a tick service and hands
//! back a [`SequencerHandle`] whose transport commands are applied at the
//! start of the next tick.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, select};

use crate::pattern::{Instrument, Pattern};
use crate::scheduler::{AudioClock, LiveState, PlaybackState, Scheduler, TriggerSink};
use crate::settings::{EffectAmounts, InstrumentSettings};

/// Per-tick callback. Returning `false` stops the service.
pub type TickCallback = Box<dyn FnMut() -> bool + Send>;

/// Something that calls back periodically until the guard is dropped.
pub trait TickService {
    fn start(&self, period: Duration, callback: TickCallback) -> TickGuard;
}

/// Keeps a tick service running. Dropping it stops the service and waits
/// for the in-flight callback to finish.
#[derive(Debug)]
pub struct TickGuard {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl TickGuard {
    pub fn new(stop: Sender<()>, thread: JoinHandle<()>) -> Self {
        TickGuard {
            stop: Some(stop),
            thread: Some(thread),
        }
    }

    /// A guard for a service with nothing to stop.
    pub fn detached() -> Self {
        TickGuard {
            stop: None,
            thread: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for TickGuard {
    fn drop(&mut self) {
        // Disconnecting the stop channel wakes the ticker thread.
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("tick thread panicked");
            }
        }
    }
}

/// A tick service on a dedicated thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadTicker;

impl TickService for ThreadTicker {
    fn start(&self, period: Duration, mut callback: TickCallback) -> TickGuard {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let thread = std::thread::Builder::new()
            .name("drumgrid-tick".into())
            .spawn(move || {
                let ticker = crossbeam_channel::tick(period);
                if !callback() {
                    return;
                }
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            if !callback() {
                                break;
                            }
                        }
                    }
                }
            });
        match thread {
            Ok(thread) => TickGuard::new(stop_tx, thread),
            Err(e) => {
                log::error!("failed to spawn tick thread: {e}");
                TickGuard::detached()
            }
        }
    }
}

/// Transport requests, applied at the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCommand {
    Play,
    Pause,
    Stop,
}

/// Control surface of a running sequencer.
#[derive(Debug)]
pub struct SequencerHandle {
    commands: Sender<TransportCommand>,
    state: Arc<LiveState>,
    _guard: TickGuard,
}

impl SequencerHandle {
    pub fn state(&self) -> &Arc<LiveState> {
        &self.state
    }

    pub fn play(&self) {
        self.send(TransportCommand::Play);
    }

    pub fn pause(&self) {
        self.send(TransportCommand::Pause);
    }

    pub fn stop(&self) {
        self.send(TransportCommand::Stop);
    }

    fn send(&self, command: TransportCommand) {
        if self.commands.send(command).is_err() {
            log::warn!("sequencer is no longer running; {command:?} ignored");
        }
    }

    /// Empty the pattern. Playback continues over the empty grid.
    pub fn clear(&self) {
        self.state.clear_pattern();
    }

    pub fn set_bpm(&self, bpm: f64) -> f64 {
        self.state.set_bpm(bpm)
    }

    pub fn set_pattern(&self, pattern: Pattern) {
        self.state.set_pattern(pattern);
    }

    pub fn toggle_step(&self, instrument: Instrument, step: usize) -> bool {
        self.state.toggle_step(instrument, step)
    }

    pub fn update_instrument(&self, instrument: Instrument, edit: impl Fn(&mut InstrumentSettings)) {
        self.state.update_instrument(instrument, edit);
    }

    pub fn set_global_effects(&self, amounts: EffectAmounts) {
        self.state.set_global_effects(amounts);
    }

    pub fn playback(&self) -> PlaybackState {
        self.state.playback()
    }

    pub fn current_step(&self) -> Option<usize> {
        self.state.current_step()
    }
}

fn apply(scheduler: &mut Scheduler<impl AudioClock>, command: TransportCommand) {
    match command {
        TransportCommand::Play => scheduler.play(),
        TransportCommand::Pause => scheduler.pause(),
        TransportCommand::Stop => scheduler.stop(),
    }
}

/// Run a scheduler on `service`, ticking every `period`.
///
/// The sequencer stops when the handle is dropped.
pub fn spawn_sequencer<C, S>(
    state: Arc<LiveState>,
    clock: C,
    mut sink: S,
    lookahead: f64,
    period: Duration,
    service: &impl TickService,
) -> SequencerHandle
where
    C: AudioClock + Send + 'static,
    S: TriggerSink + Send + 'static,
{
    let (tx, rx): (Sender<TransportCommand>, Receiver<TransportCommand>) = crossbeam_channel::unbounded();
    let mut scheduler = Scheduler::new(Arc::clone(&state), clock, lookahead);
    let guard = service.start(
        period,
        Box::new(move || {
            for command in rx.try_iter() {
                apply(&mut scheduler, command);
            }
            scheduler.tick(&mut sink);
            true
        }),
    );
    SequencerHandle {
        commands: tx,
        state,
        _guard: guard,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use crate::pattern::STEPS;
    use crate::scheduler::{ManualClock, Trigger};

    #[test]
    fn thread_ticker_calls_back_until_dropped() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let guard = ThreadTicker.start(
            Duration::from_millis(2),
            Box::new(move || {
                seen.fetch_add(1, Ordering::SeqCst);
                true
            }),
        );
        let deadline = Instant::now() + Duration::from_secs(5);
        while count.load(Ordering::SeqCst) < 5 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        drop(guard);
        let stopped_at = count.load(Ordering::SeqCst);
        assert!(stopped_at >= 5);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), stopped_at);
    }

    #[test]
    fn callback_returning_false_stops() {
        let guard = ThreadTicker.start(Duration::from_millis(1), Box::new(|| false));
        let deadline = Instant::now() + Duration::from_secs(5);
        while !guard.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(guard.is_finished());
    }

    /// Forwards triggers to a shared vector the test can inspect.
    struct Shared(Arc<Mutex<Vec<Trigger>>>);

    impl TriggerSink for Shared {
        fn trigger(&mut self, trigger: Trigger) {
            if let Ok(mut v) = self.0.lock() {
                v.push(trigger);
            }
        }
    }

    /// Runs callbacks on demand from the test thread.
    #[derive(Default)]
    struct ManualTicker {
        callback: Mutex<Option<TickCallback>>,
    }

    impl ManualTicker {
        fn tick(&self) {
            if let Some(cb) = self.callback.lock().unwrap().as_mut() {
                cb();
            }
        }
    }

    impl TickService for &ManualTicker {
        fn start(&self, _period: Duration, callback: TickCallback) -> TickGuard {
            *self.callback.lock().unwrap() = Some(callback);
            TickGuard::detached()
        }
    }

    #[test]
    fn transport_commands_apply_on_next_tick() {
        let mut pattern = Pattern::new();
        for step in 0..STEPS {
            pattern.set(Instrument::Hihat, step, true);
        }
        let state = Arc::new(LiveState::new(pattern, Default::default(), 120.0));
        let clock = ManualClock::new();
        let triggers = Arc::new(Mutex::new(Vec::new()));
        let ticker = ManualTicker::default();
        let handle = spawn_sequencer(
            Arc::clone(&state),
            clock.clone(),
            Shared(Arc::clone(&triggers)),
            0.1,
            Duration::from_millis(25),
            &&ticker,
        );

        handle.play();
        assert_eq!(handle.playback(), PlaybackState::Stopped);
        ticker.tick();
        assert_eq!(handle.playback(), PlaybackState::Playing);
        assert_eq!(handle.current_step(), Some(0));

        clock.advance(0.1);
        ticker.tick();
        assert_eq!(handle.current_step(), Some(1));

        handle.pause();
        clock.advance(0.5);
        ticker.tick();
        assert_eq!(handle.playback(), PlaybackState::Paused);
        assert_eq!(handle.current_step(), Some(1));

        handle.stop();
        ticker.tick();
        assert_eq!(handle.current_step(), None);
        assert_eq!(triggers.lock().unwrap().len(), 2);
    }

    #[test]
    fn sequencer_on_thread_ticker_plays() {
        let mut pattern = Pattern::new();
        pattern.set(Instrument::Kick, 0, true);
        let state = Arc::new(LiveState::new(pattern, Default::default(), 240.0));
        let clock = crate::scheduler::SystemClock::new();
        let triggers = Arc::new(Mutex::new(Vec::new()));
        let handle = spawn_sequencer(
            state,
            clock,
            Shared(Arc::clone(&triggers)),
            0.1,
            Duration::from_millis(5),
            &ThreadTicker,
        );
        handle.play();
        let deadline = Instant::now() + Duration::from_secs(5);
        while triggers.lock().unwrap().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        drop(handle);
        let triggers = triggers.lock().unwrap();
        assert!(!triggers.is_empty());
        assert_eq!(triggers[0].instrument, Instrument::Kick);
        assert_eq!(triggers[0].step, 0);
    }
}
