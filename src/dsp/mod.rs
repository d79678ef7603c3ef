//! DSP Engine: pure Rust drum synthesis and processing.
//!
//! The same engine renders live blocks for an output device and complete
//! buffers for offline export.

pub mod delay;
pub mod effects;
pub mod engine;
pub mod envelope;
pub mod filter;
pub mod frame;
pub mod oscillator;
pub mod renderer;
pub mod reverb;
pub mod reverb_pool;
pub mod voice;
pub mod wav;
pub mod waveshaper;
