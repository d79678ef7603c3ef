//! Live output through the default audio device.
//!
//! The device callback pulls fixed-size engine blocks through a small
//! FIFO, so the engine (and its reverb partitions) always renders whole
//! blocks whatever buffer size the host asks for.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::config::EngineConfig;
use crate::dsp::engine::{AudioEngine, EngineClock, EngineHandle, EngineSink};
use crate::dsp::frame::Frame;
use crate::error::DeviceError;
use crate::settings::EffectAmounts;

/// A running output stream. Audio stops when this is dropped.
pub struct OutputHandle {
    _stream: cpal::Stream,
    engine: EngineHandle,
    config: EngineConfig,
}

impl std::fmt::Debug for OutputHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputHandle")
            .field("sample_rate", &self.config.sample_rate)
            .finish()
    }
}

impl OutputHandle {
    /// The engine configuration actually in use (sample rate from the device).
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> EngineClock {
        self.engine.clock()
    }

    /// A trigger sink feeding this output.
    pub fn sink(&self) -> EngineSink {
        EngineSink::new(self.engine.clone(), &self.config)
    }
}

/// Open the default output device and start rendering.
pub fn start_output(config: &EngineConfig, bus: EffectAmounts) -> Result<OutputHandle, DeviceError> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(DeviceError::NoDevice)?;
    let supported = device
        .default_output_config()
        .map_err(|e| DeviceError::Config(e.to_string()))?;
    if supported.sample_format() != cpal::SampleFormat::F32 {
        return Err(DeviceError::UnsupportedFormat(format!("{:?}", supported.sample_format())));
    }

    let mut config = config.clone();
    config.sample_rate = supported.sample_rate().0;
    let stream_config: cpal::StreamConfig = supported.into();
    let channels = usize::from(stream_config.channels).max(1);

    let mut engine = AudioEngine::new(&config, config.block_size, bus);
    let handle = engine.connect();
    let mut block = vec![Frame::ZERO; engine.block_size()];
    let mut read = block.len();

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                for out in data.chunks_mut(channels) {
                    if read == block.len() {
                        engine.render(&mut block);
                        read = 0;
                    }
                    let frame = block[read];
                    read += 1;
                    write_frame(out, frame);
                }
            },
            |err| log::error!("audio output stream error: {err}"),
            None,
        )
        .map_err(|e| DeviceError::Stream(e.to_string()))?;
    stream.play().map_err(|e| DeviceError::Stream(e.to_string()))?;

    log::info!(
        "audio output started: {} Hz, {} channels, {} frame blocks",
        config.sample_rate,
        channels,
        config.block_size
    );
    Ok(OutputHandle {
        _stream: stream,
        engine: handle,
        config,
    })
}

/// Write one stereo frame into an interleaved device frame. Mono devices
/// get the average; extra channels are silent.
fn write_frame(out: &mut [f32], frame: Frame) {
    match out {
        [mono] => *mono = ((frame.left + frame.right) * 0.5) as f32,
        [left, right, rest @ ..] => {
            *left = frame.left as f32;
            *right = frame.right as f32;
            rest.fill(0.0);
        }
        [] => {}
    }
}
