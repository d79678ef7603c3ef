//! Live path: scheduler → engine sink → realtime engine, driven by the
//! engine's own clock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use drumgrid_core::config::EngineConfig;
use drumgrid_core::dsp::engine::{AudioEngine, EngineSink};
use drumgrid_core::dsp::frame::Frame;
use drumgrid_core::pattern::{Instrument, Pattern};
use drumgrid_core::scheduler::{LiveState, PlaybackState, Scheduler};
use drumgrid_core::settings::{EffectAmounts, MixSettings};

/// Render `seconds` of live playback, ticking the scheduler once per
/// engine block.
fn play(state: Arc<LiveState>, config: &EngineConfig, seconds: f64) -> Vec<Frame> {
    let mut engine = AudioEngine::new(config, config.block_size, EffectAmounts::default());
    let handle = engine.connect();
    let mut sink = EngineSink::new(handle.clone(), config);
    let mut scheduler = Scheduler::new(state, handle.clock(), config.lookahead_seconds);
    scheduler.play();

    let total = config.frames(seconds);
    let mut out = Vec::with_capacity(total);
    let mut block = vec![Frame::ZERO; config.block_size];
    while out.len() < total {
        scheduler.tick(&mut sink);
        engine.render(&mut block);
        out.extend_from_slice(&block);
    }
    out
}

fn peak(frames: &[Frame]) -> f64 {
    frames.iter().map(Frame::peak).fold(0.0, f64::max)
}

fn kick_state(volume: f64) -> Arc<LiveState> {
    let mut pattern = Pattern::new();
    pattern.set(Instrument::Kick, 0, true);
    let mut mix = MixSettings::default();
    mix.instrument_mut(Instrument::Kick).set_volume(volume);
    Arc::new(LiveState::new(pattern, mix, 120.0))
}

#[test]
fn volume_boost_roughly_doubles_peak() {
    let config = EngineConfig::default();
    let normal = peak(&play(kick_state(100.0), &config, 0.3));
    let boosted = peak(&play(kick_state(200.0), &config, 0.3));
    let ratio = boosted / normal;
    assert!(ratio > 1.8 && ratio <= 2.0 + 1e-9, "ratio {ratio}");
}

#[test]
fn hits_land_on_step_boundaries() {
    let config = EngineConfig::default();
    let out = play(kick_state(100.0), &config, 2.2);
    // Kick on step 0 of a 2 s bar: sound at 0 s and again at 2 s.
    let first = out.iter().position(|f| f.peak() > 0.0).unwrap();
    assert!(first < 64, "first hit should start at once, got frame {first}");
    let second_bar = 88200;
    assert!(peak(&out[second_bar - 1000..second_bar]) < 1e-12);
    assert!(peak(&out[second_bar..second_bar + 2205]) > 0.5);
}

#[test]
fn per_voice_and_bus_effects_compound() {
    let config = EngineConfig {
        reverb_seconds: 0.5,
        ..EngineConfig::default()
    };
    let state = kick_state(100.0);
    state.update_instrument(Instrument::Kick, |k| k.effects.set_delay(50.0));
    let voice_only = play(Arc::clone(&state), &config, 1.5);

    state.set_global_effects(EffectAmounts::new(0.0, 50.0, 0.0));
    let both = play(state, &config, 1.5);
    // Same voice, but the bus adds a second delay stage on top.
    assert_ne!(voice_only, both);
    assert!(peak(&both[11025..]) > 0.0);
}

#[test]
fn stop_silences_new_hits() {
    let config = EngineConfig::default();
    let state = kick_state(100.0);
    let mut engine = AudioEngine::new(&config, config.block_size, EffectAmounts::default());
    let handle = engine.connect();
    let mut sink = EngineSink::new(handle.clone(), &config);
    let mut scheduler = Scheduler::new(Arc::clone(&state), handle.clock(), config.lookahead_seconds);

    scheduler.play();
    scheduler.tick(&mut sink);
    scheduler.stop();
    assert_eq!(state.playback(), PlaybackState::Stopped);
    assert_eq!(state.current_step(), None);

    let mut block = vec![Frame::ZERO; config.block_size];
    let mut frames = Vec::new();
    for _ in 0..(3 * 44100 / config.block_size) {
        scheduler.tick(&mut sink);
        engine.render(&mut block);
        frames.extend_from_slice(&block);
    }
    // The committed first hit still sounds; nothing at the next bar.
    assert!(peak(&frames[..4410]) > 0.5);
    assert_eq!(peak(&frames[88200..]), 0.0);
}

/// Hi-hat on every step, kick on the beats, snare on the backbeats, and a
/// reverb send on every instrument.
fn dense_reverb_state() -> Arc<LiveState> {
    let mut pattern = Pattern::new();
    for step in 0..16 {
        pattern.set(Instrument::Hihat, step, true);
    }
    for step in (0..16).step_by(4) {
        pattern.set(Instrument::Kick, step, true);
    }
    pattern.set(Instrument::Snare, 4, true);
    pattern.set(Instrument::Snare, 12, true);
    let mut mix = MixSettings::default();
    for instrument in Instrument::ALL {
        mix.instrument_mut(instrument).effects.set_reverb(30.0);
    }
    Arc::new(LiveState::new(pattern, mix, 120.0))
}

#[test]
#[cfg_attr(debug_assertions, ignore = "render timing needs an optimized build")]
fn dense_reverb_pattern_renders_faster_than_realtime() {
    let config = EngineConfig::default();
    let mut engine = AudioEngine::new(&config, config.block_size, EffectAmounts::default());
    let handle = engine.connect();
    let mut sink = EngineSink::new(handle.clone(), &config);
    let mut scheduler = Scheduler::new(dense_reverb_state(), handle.clock(), config.lookahead_seconds);
    scheduler.play();

    let seconds = 4.0;
    let blocks = config.frames(seconds) / config.block_size;
    let mut block = vec![Frame::ZERO; config.block_size];
    let mut rendering = Duration::ZERO;
    let mut most_voices = 0;
    let mut loudest: f64 = 0.0;
    for _ in 0..blocks {
        scheduler.tick(&mut sink);
        let started = Instant::now();
        engine.render(&mut block);
        rendering += started.elapsed();
        most_voices = most_voices.max(engine.active_voices());
        loudest = loudest.max(peak(&block));
    }

    assert!(loudest > 0.1);
    assert!(most_voices > 16, "reverb tails should overlap, saw {most_voices}");
    let factor = rendering.as_secs_f64() / seconds;
    assert!(factor < 1.0, "{seconds} s of audio took {rendering:?} to render");
}
