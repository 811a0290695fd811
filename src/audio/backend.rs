use tokio::sync::mpsc;

use crate::error::{LiveChatError, Result};

/// Capture sample rate expected by the live service.
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Samples per captured frame (~256ms at 16kHz).
pub const CAPTURE_BLOCK_SIZE: usize = 4096;

/// Audio sample block captured from the input (f32, mono after conversion)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Samples in [-1.0, 1.0)
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Duration of this frame in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / (self.sample_rate as f64 * self.channels as f64)
    }
}

/// Configuration for audio capture backends
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Target sample rate (will resample if needed)
    pub target_sample_rate: u32,
    /// Target channel count (1 = mono)
    pub target_channels: u16,
    /// Samples per emitted frame
    pub block_size: usize,
    /// Frame channel depth between the device thread and the session
    pub channel_capacity: usize,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: CAPTURE_SAMPLE_RATE,
            target_channels: 1,
            block_size: CAPTURE_BLOCK_SIZE,
            channel_capacity: 8,
        }
    }
}

impl AudioBackendConfig {
    /// Wall-clock duration of one frame in milliseconds
    pub fn frame_duration_ms(&self) -> u64 {
        if self.target_sample_rate == 0 {
            return 0;
        }
        self.block_size as u64 * 1000 / self.target_sample_rate as u64
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - Microphone: cpal default input device
/// - File: replay a WAV file (offline runs and tests)
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing audio
    ///
    /// Safe to call repeatedly and before `start`.
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;

    /// Failure that ended capture early, if any
    ///
    /// A closed frame channel with no recorded failure means the source ran
    /// out (e.g. end of file).
    fn last_error(&self) -> Option<LiveChatError> {
        None
    }
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create audio backend for the given source
    pub fn create(source: AudioSource, config: AudioBackendConfig) -> Box<dyn AudioBackend> {
        match source {
            AudioSource::Microphone => Box::new(super::microphone::MicrophoneBackend::new(config)),
            AudioSource::File { path, realtime } => {
                Box::new(super::file::FileBackend::new(path, config, realtime))
            }
        }
    }
}

/// Audio source type
#[derive(Debug, Clone)]
pub enum AudioSource {
    /// Default microphone input
    Microphone,
    /// WAV file input; `realtime` paces frames at capture cadence
    File { path: String, realtime: bool },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_frame_duration() {
        let config = AudioBackendConfig::default();
        assert_eq!(config.frame_duration_ms(), 256);
    }

    #[test]
    fn test_frame_duration_secs() {
        let frame = AudioFrame {
            samples: vec![0.0; 1600],
            sample_rate: 16000,
            channels: 1,
            timestamp_ms: 0,
        };
        assert!((frame.duration_secs() - 0.1).abs() < 1e-9);
    }
}
