pub mod config;
#[cfg(feature = "device")]
pub mod device;
pub mod dsp;
pub mod error;
#[cfg(feature = "export")]
pub mod export;
pub mod pattern;
pub mod recipe;
pub mod scheduler;
pub mod settings;
pub mod store;
pub mod ticker;

use crate::config::EngineConfig;
use crate::dsp::renderer::{RenderRequest, render_pattern};
use crate::error::DrumError;
use crate::pattern::{PRESETS, Pattern};
use crate::settings::EffectAmounts;
use wasm_bindgen::prelude::*;

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WASM-exposed: return the drumgrid-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

/// Render a request with `config` and encode it as WAV bytes.
pub fn render_wav(config: &EngineConfig, request: &RenderRequest) -> Result<Vec<u8>, DrumError> {
    let buffer = render_pattern(config, request);
    Ok(dsp::wav::encode_wav(&buffer)?)
}

/// WASM-exposed: the built-in patterns as `[{ name, pattern }]`.
#[wasm_bindgen]
pub fn preset_patterns() -> Result<JsValue, JsValue> {
    serde_wasm_bindgen::to_value(&PRESETS[..]).map_err(|e| JsValue::from_str(&format!("{e}")))
}

/// WASM-exposed: render a pattern (JSON, 10 rows of 16 booleans) with the
/// reference configuration and return WAV bytes.
#[wasm_bindgen]
pub fn render_pattern_wav(
    pattern_json: &str,
    bpm: f64,
    reverb: f64,
    delay: f64,
    distortion: f64,
) -> Result<Vec<u8>, JsValue> {
    let pattern: Pattern =
        serde_json::from_str(pattern_json).map_err(|e| JsValue::from_str(&format!("invalid pattern: {e}")))?;
    let request = RenderRequest::new(pattern, bpm, EffectAmounts::new(reverb, delay, distortion));
    render_wav(&EngineConfig::default(), &request).map_err(|e| JsValue::from_str(&format!("{e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{Instrument, STEPS};

    #[test]
    fn version_matches_manifest() {
        assert_eq!(core_version(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn render_wav_sizes_buffer() {
        let config = EngineConfig {
            sample_rate: 8000,
            export_bars: 1,
            export_tail_seconds: 0.0,
            ..EngineConfig::default()
        };
        let mut pattern = Pattern::new();
        for step in (0..STEPS).step_by(4) {
            pattern.set(Instrument::Kick, step, true);
        }
        let wav = render_wav(&config, &RenderRequest::new(pattern, 120.0, EffectAmounts::default())).unwrap();
        assert_eq!(wav.len(), 44 + 16000 * 2 * 2);
    }
}
