use anyhow::{Context, Result};
use hound::WavReader;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};
use super::codec::pcm16_to_samples;
use super::convert::{downmix_to_mono, resample_linear};
use crate::error::LiveChatError;

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
            anyhow::bail!(
                "Unsupported WAV format: {} bit {:?} (expected 16 bit PCM)",
                spec.bits_per_sample,
                spec.sample_format
            );
        }

        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Down-mix to mono and resample to `target_rate` as f32 samples
    pub fn to_mono_f32(&self, target_rate: u32) -> Vec<f32> {
        let interleaved = pcm16_to_samples(&self.samples);
        let mono = downmix_to_mono(&interleaved, self.channels);
        resample_linear(&mono, self.sample_rate, target_rate)
    }
}

/// Write mono or interleaved PCM16 to a WAV file in one go
pub fn write_wav(path: impl AsRef<Path>, samples: &[i16], sample_rate: u32, channels: u16) -> Result<()> {
    let path = path.as_ref();
    let mut recorder = WavRecorder::create(path, sample_rate, channels)?;
    recorder.write_pcm16(samples)?;
    recorder.finish()?;
    Ok(())
}

/// Incremental WAV writer for assistant audio
///
/// Finalizes the file on `finish` or on drop.
pub struct WavRecorder {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    path: PathBuf,
    sample_rate: u32,
    sample_count: usize,
}

impl WavRecorder {
    pub fn create(path: impl AsRef<Path>, sample_rate: u32, channels: u16) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let writer = hound::WavWriter::create(&path, spec)
            .with_context(|| format!("Failed to create WAV file: {:?}", path))?;

        info!("Recording assistant audio to {}", path.display());

        Ok(Self {
            writer: Some(writer),
            path,
            sample_rate,
            sample_count: 0,
        })
    }

    pub fn write_pcm16(&mut self, samples: &[i16]) -> Result<()> {
        if let Some(writer) = &mut self.writer {
            for &sample in samples {
                writer
                    .write_sample(sample)
                    .context("Failed to write sample to WAV")?;
            }
            self.sample_count += samples.len();
        }
        Ok(())
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn finish(mut self) -> Result<PathBuf> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().context("Failed to finalize WAV file")?;
        }
        info!(
            "Saved {} samples to {}",
            self.sample_count,
            self.path.display()
        );
        Ok(self.path.clone())
    }
}

impl Drop for WavRecorder {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                warn!("Failed to finalize WAV writer on drop: {}", e);
            }
        }
    }
}

/// Capture backend that replays a WAV file as microphone frames
pub struct FileBackend {
    path: String,
    config: AudioBackendConfig,
    realtime: bool,
    task: Option<JoinHandle<()>>,
}

impl FileBackend {
    pub fn new(path: impl Into<String>, config: AudioBackendConfig, realtime: bool) -> Self {
        Self {
            path: path.into(),
            config,
            realtime,
            task: None,
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileBackend {
    async fn start(&mut self) -> crate::error::Result<mpsc::Receiver<AudioFrame>> {
        if self.is_capturing() {
            return Err(LiveChatError::AlreadyActive);
        }

        let audio = AudioFile::open(&self.path)
            .map_err(|e| LiveChatError::Device(format!("{:#}", e)))?;
        let samples = audio.to_mono_f32(self.config.target_sample_rate);

        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let block_size = self.config.block_size.max(1);
        let sample_rate = self.config.target_sample_rate;
        let frame_ms = self.config.frame_duration_ms();
        let realtime = self.realtime;

        info!(
            "Replaying {} as capture input ({} frames of {} samples)",
            self.path,
            samples.len().div_ceil(block_size),
            block_size
        );

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(frame_ms.max(1)));

            for (index, block) in samples.chunks(block_size).enumerate() {
                if realtime {
                    interval.tick().await;
                }

                // Keep frames fixed-size; pad the tail with silence
                let mut frame_samples = block.to_vec();
                frame_samples.resize(block_size, 0.0);

                let frame = AudioFrame {
                    samples: frame_samples,
                    sample_rate,
                    channels: 1,
                    timestamp_ms: index as u64 * frame_ms,
                };

                if tx.send(frame).await.is_err() {
                    debug!("Frame receiver dropped, stopping file replay");
                    return;
                }
            }

            info!("File replay finished");
        });

        self.task = Some(task);
        Ok(rx)
    }

    async fn stop(&mut self) -> crate::error::Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("File capture stopped");
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn name(&self) -> &str {
        "WAV file"
    }
}
