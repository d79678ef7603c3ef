use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DrumError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Export error: {0}")]
    Export(#[from] ExportError),
    #[error("Pattern store error: {0}")]
    Store(#[from] StoreError),
    #[error("WAV error: {0}")]
    Wav(#[from] WavError),
    #[cfg(feature = "device")]
    #[error("Audio device error: {0}")]
    Device(#[from] DeviceError),
}

#[derive(Debug, Error)]
pub enum WavError {
    #[error("buffer has no channels")]
    NoChannels,
    #[error("channel {channel} has {found} frames, expected {expected}")]
    ChannelLengthMismatch {
        channel: usize,
        expected: usize,
        found: usize,
    },
    #[error("{frames} frames x {channels} channels does not fit in a WAV data chunk")]
    TooLarge { frames: usize, channels: usize },
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("an export is already in progress")]
    Busy,
    #[error("offline render failed: {0}")]
    Render(String),
    #[error(transparent)]
    Encode(#[from] WavError),
    #[error("failed to write export: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access pattern store at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize patterns: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(feature = "device")]
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no default output device")]
    NoDevice,
    #[error("no usable output config: {0}")]
    Config(String),
    #[error("unsupported sample format {0} (only f32 output is supported)")]
    UnsupportedFormat(String),
    #[error("failed to open output stream: {0}")]
    Stream(String),
}
