//! WAV encoder: canonical 44-byte-header 16-bit PCM.

use crate::error::WavError;

use super::renderer::RenderedBuffer;

pub const HEADER_LEN: usize = 44;
const BITS_PER_SAMPLE: u16 = 16;
const BYTES_PER_SAMPLE: usize = 2;

/// Convert one float sample to 16-bit PCM: clamp to `[-1, 1]`, scale by
/// 32768 below zero and 32767 above, truncate toward zero.
pub fn to_pcm16(sample: f32) -> i16 {
    let s = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Encode a rendered buffer.
pub fn encode_wav(buffer: &RenderedBuffer) -> Result<Vec<u8>, WavError> {
    encode_channels(&buffer.channels, buffer.sample_rate)
}

/// Encode per-channel sample arrays, interleaving frame by frame.
pub fn encode_channels(channels: &[Vec<f32>], sample_rate: u32) -> Result<Vec<u8>, WavError> {
    let first = channels.first().ok_or(WavError::NoChannels)?;
    let frames = first.len();
    for (channel, samples) in channels.iter().enumerate() {
        if samples.len() != frames {
            return Err(WavError::ChannelLengthMismatch {
                channel,
                expected: frames,
                found: samples.len(),
            });
        }
    }

    let too_large = || WavError::TooLarge {
        frames,
        channels: channels.len(),
    };
    let channel_count = u16::try_from(channels.len()).map_err(|_| too_large())?;
    let data_len = frames
        .checked_mul(channels.len())
        .and_then(|n| n.checked_mul(BYTES_PER_SAMPLE))
        .and_then(|n| u32::try_from(n).ok())
        .filter(|n| n.checked_add(36).is_some())
        .ok_or_else(too_large)?;

    let block_align = channel_count * (BITS_PER_SAMPLE / 8);
    let byte_rate = sample_rate * block_align as u32;

    let mut buf = Vec::with_capacity(HEADER_LEN + data_len as usize);

    // RIFF header
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data_len).to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    // fmt chunk
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&channel_count.to_le_bytes());
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&byte_rate.to_le_bytes());
    buf.extend_from_slice(&block_align.to_le_bytes());
    buf.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());

    // data chunk
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_len.to_le_bytes());
    for frame in 0..frames {
        for samples in channels {
            buf.extend_from_slice(&to_pcm16(samples[frame]).to_le_bytes());
        }
    }

    Ok(buf)
}
