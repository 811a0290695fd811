//! PCM16 wire codec
//!
//! Converts between the f32 samples delivered by capture devices and the
//! signed 16-bit little-endian PCM the live service speaks, plus the base64
//! transport encoding wrapped around it.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{LiveChatError, Result};

/// Scale between f32 samples and i16 PCM.
pub const PCM16_SCALE: f32 = 32768.0;

/// How samples outside [-1.0, 1.0) are mapped onto i16.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleOverflow {
    /// Saturate at i16::MIN / i16::MAX.
    #[default]
    Clamp,
    /// Keep the low 16 bits, so clipped audio wraps around.
    Wrap,
}

/// Decoded output audio, one plane per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Frames per channel.
    pub fn frame_count(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn channel_count(&self) -> u16 {
        self.channels.len() as u16
    }

    /// Duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate as f64
    }
}

/// Convert one f32 sample to PCM16, truncating toward zero.
pub fn sample_to_pcm16(sample: f32, overflow: SampleOverflow) -> i16 {
    let scaled = (sample * PCM16_SCALE) as i32;
    match overflow {
        SampleOverflow::Clamp => scaled.clamp(i16::MIN as i32, i16::MAX as i32) as i16,
        SampleOverflow::Wrap => scaled as i16,
    }
}

pub fn pcm16_to_sample(value: i16) -> f32 {
    value as f32 / PCM16_SCALE
}

pub fn samples_to_pcm16(samples: &[f32], overflow: SampleOverflow) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| sample_to_pcm16(s, overflow))
        .collect()
}

pub fn pcm16_to_samples(pcm: &[i16]) -> Vec<f32> {
    pcm.iter().map(|&v| pcm16_to_sample(v)).collect()
}

pub fn pcm16_to_bytes(pcm: &[i16]) -> Vec<u8> {
    pcm.iter().flat_map(|s| s.to_le_bytes()).collect()
}

pub fn bytes_to_pcm16(bytes: &[u8]) -> Result<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(LiveChatError::Protocol(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect())
}

/// Encode f32 samples as base64 PCM16 LE.
pub fn encode_frame(samples: &[f32], overflow: SampleOverflow) -> String {
    let pcm = samples_to_pcm16(samples, overflow);
    base64::engine::general_purpose::STANDARD.encode(pcm16_to_bytes(&pcm))
}

/// Encode raw PCM16 as base64.
pub fn encode_pcm16(pcm: &[i16]) -> String {
    base64::engine::general_purpose::STANDARD.encode(pcm16_to_bytes(pcm))
}

/// Decode a base64 PCM16 LE payload into per-channel f32 planes.
///
/// Interleaved input `[c0, c1, c0, c1, ...]` is split into one plane per
/// channel. A trailing partial frame is discarded.
pub fn decode_frame(data: &str, sample_rate: u32, channels: u16) -> Result<DecodedAudio> {
    if channels == 0 {
        return Err(LiveChatError::Protocol(
            "channel count must be at least 1".to_string(),
        ));
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| LiveChatError::Protocol(format!("invalid base64 audio payload: {}", e)))?;
    let pcm = bytes_to_pcm16(&bytes)?;

    let channel_count = channels as usize;
    let frame_count = pcm.len() / channel_count;
    let mut planes = vec![Vec::with_capacity(frame_count); channel_count];

    for frame in pcm.chunks_exact(channel_count) {
        for (plane, &value) in planes.iter_mut().zip(frame) {
            plane.push(pcm16_to_sample(value));
        }
    }

    Ok(DecodedAudio {
        channels: planes,
        sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncates_toward_zero() {
        // 0.5 / 32768 above and below zero truncate to 0
        assert_eq!(sample_to_pcm16(0.5 / PCM16_SCALE, SampleOverflow::Clamp), 0);
        assert_eq!(sample_to_pcm16(-0.5 / PCM16_SCALE, SampleOverflow::Clamp), 0);
        assert_eq!(sample_to_pcm16(0.5, SampleOverflow::Clamp), 16384);
        assert_eq!(sample_to_pcm16(-1.0, SampleOverflow::Clamp), i16::MIN);
    }

    #[test]
    fn test_overflow_policies() {
        assert_eq!(sample_to_pcm16(1.0, SampleOverflow::Clamp), i16::MAX);
        assert_eq!(sample_to_pcm16(1.5, SampleOverflow::Clamp), i16::MAX);
        assert_eq!(sample_to_pcm16(-1.5, SampleOverflow::Clamp), i16::MIN);

        // 32768 wraps to -32768, 49152 wraps to -16384
        assert_eq!(sample_to_pcm16(1.0, SampleOverflow::Wrap), i16::MIN);
        assert_eq!(sample_to_pcm16(1.5, SampleOverflow::Wrap), -16384);
    }

    #[test]
    fn test_odd_payload_is_protocol_error() {
        let b64 = base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3]);
        let err = decode_frame(&b64, 24000, 1).unwrap_err();
        assert!(matches!(err, LiveChatError::Protocol(_)));
    }

    #[test]
    fn test_invalid_base64_is_protocol_error() {
        let err = decode_frame("not base64!!", 24000, 1).unwrap_err();
        assert!(matches!(err, LiveChatError::Protocol(_)));
    }

    #[test]
    fn test_zero_channels_rejected() {
        let err = decode_frame("", 24000, 0).unwrap_err();
        assert!(matches!(err, LiveChatError::Protocol(_)));
    }

    #[test]
    fn test_deinterleave_stereo() {
        let b64 = encode_pcm16(&[100, -100, 200, -200, 300, -300]);
        let decoded = decode_frame(&b64, 24000, 2).unwrap();

        assert_eq!(decoded.channel_count(), 2);
        assert_eq!(decoded.frame_count(), 3);
        assert_eq!(decoded.channels[0], pcm16_to_samples(&[100, 200, 300]));
        assert_eq!(decoded.channels[1], pcm16_to_samples(&[-100, -200, -300]));
    }

    #[test]
    fn test_duration() {
        let b64 = encode_pcm16(&vec![0i16; 2400]);
        let decoded = decode_frame(&b64, 24000, 1).unwrap();
        assert!((decoded.duration_secs() - 0.1).abs() < 1e-9);
    }
}
