// Microphone capture backend using cpal
//
// The cpal stream is created, played and dropped on a dedicated thread
// because streams are not Send on every platform. Device audio is down-mixed
// to mono, resampled to the capture rate and sliced into fixed-size frames
// before it leaves the audio callback.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};
use super::convert::{downmix_to_mono, FrameAssembler, LinearResampler};
use crate::error::{LiveChatError, Result};

/// How often the capture thread checks for a stream failure
const FAILURE_POLL: Duration = Duration::from_millis(100);

type FailureSlot = Arc<Mutex<Option<LiveChatError>>>;

/// Default-input-device capture backend
pub struct MicrophoneBackend {
    config: AudioBackendConfig,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    failure: FailureSlot,
}

impl MicrophoneBackend {
    pub fn new(config: AudioBackendConfig) -> Self {
        Self {
            config,
            stop_tx: None,
            thread: None,
            failure: Arc::new(Mutex::new(None)),
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for MicrophoneBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.thread.is_some() {
            return Err(LiveChatError::AlreadyActive);
        }

        if let Ok(mut slot) = self.failure.lock() {
            *slot = None;
        }

        let (frame_tx, frame_rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel();
        let config = self.config.clone();
        let failure = Arc::clone(&self.failure);

        let thread = thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || capture_thread(config, frame_tx, ready_tx, stop_rx, failure))
            .map_err(|e| LiveChatError::Device(format!("failed to spawn capture thread: {}", e)))?;

        match ready_rx.await {
            Ok(Ok(())) => {
                self.stop_tx = Some(stop_tx);
                self.thread = Some(thread);
                info!("Microphone capture started");
                Ok(frame_rx)
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(LiveChatError::Device(
                    "capture thread exited before the stream started".to_string(),
                ))
            }
        }
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };

        info!("Stopping microphone capture");

        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        tokio::task::spawn_blocking(move || thread.join())
            .await
            .map_err(|e| LiveChatError::Device(format!("capture join failed: {}", e)))?
            .map_err(|_| LiveChatError::Device("capture thread panicked".to_string()))?;

        info!("Microphone capture stopped");
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }

    fn last_error(&self) -> Option<LiveChatError> {
        self.failure.lock().ok().and_then(|slot| slot.clone())
    }
}

fn capture_thread(
    config: AudioBackendConfig,
    frame_tx: mpsc::Sender<AudioFrame>,
    ready_tx: oneshot::Sender<Result<()>>,
    stop_rx: std_mpsc::Receiver<()>,
    failure: FailureSlot,
) {
    let stream = match open_input_stream(&config, frame_tx, Arc::clone(&failure)) {
        Ok(stream) => stream,
        Err(e) => {
            error!("Failed to open microphone: {}", e);
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let err = LiveChatError::Device(format!("failed to start input stream: {}", e));
        error!("{}", err);
        let _ = ready_tx.send(Err(err));
        return;
    }

    let _ = ready_tx.send(Ok(()));

    loop {
        match stop_rx.recv_timeout(FAILURE_POLL) {
            Ok(()) | Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                let failed = failure.lock().map(|slot| slot.is_some()).unwrap_or(true);
                if failed {
                    warn!("Input stream failed, releasing microphone");
                    break;
                }
            }
        }
    }

    // Dropping the stream releases the device and closes the frame channel
    drop(stream);
    debug!("Capture thread exiting");
}

fn open_input_stream(
    config: &AudioBackendConfig,
    frame_tx: mpsc::Sender<AudioFrame>,
    failure: FailureSlot,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or_else(|| {
        LiveChatError::Permission("no input device available".to_string())
    })?;

    let supported = device.default_input_config().map_err(|e| match e {
        cpal::DefaultStreamConfigError::DeviceNotAvailable => {
            LiveChatError::Permission(format!("input device not available: {}", e))
        }
        other => LiveChatError::Device(format!("no usable input config: {}", other)),
    })?;

    let sample_format = supported.sample_format();
    let stream_config: cpal::StreamConfig = supported.into();

    info!(
        "Input device: {} ({}Hz, {} channels, {:?}) -> {}Hz mono",
        device.name().unwrap_or_else(|_| "unknown".to_string()),
        stream_config.sample_rate.0,
        stream_config.channels,
        sample_format,
        config.target_sample_rate
    );

    let pipeline = CapturePipeline::new(config, &stream_config, frame_tx);

    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, pipeline, failure),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, pipeline, failure),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, pipeline, failure),
        other => Err(LiveChatError::Device(format!(
            "unsupported input sample format: {:?}",
            other
        ))),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    stream_config: &cpal::StreamConfig,
    mut pipeline: CapturePipeline,
    failure: FailureSlot,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let err_failure = Arc::clone(&failure);

    device
        .build_input_stream(
            stream_config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let samples: Vec<f32> = data.iter().map(|&s| s.to_sample::<f32>()).collect();
                pipeline.push(&samples);
            },
            move |err| {
                error!("Input stream error: {}", err);
                if let Ok(mut slot) = err_failure.lock() {
                    slot.get_or_insert(LiveChatError::Device(err.to_string()));
                }
            },
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                LiveChatError::Permission(format!("microphone access refused: {}", e))
            }
            other => LiveChatError::Device(format!("failed to build input stream: {}", other)),
        })
}

/// Per-callback conversion state: down-mix, resample, frame, forward
struct CapturePipeline {
    device_channels: u16,
    target_rate: u32,
    resampler: LinearResampler,
    framer: FrameAssembler,
    frame_tx: mpsc::Sender<AudioFrame>,
    frames_emitted: u64,
    frames_dropped: u64,
    frame_ms: u64,
}

impl CapturePipeline {
    fn new(
        config: &AudioBackendConfig,
        stream_config: &cpal::StreamConfig,
        frame_tx: mpsc::Sender<AudioFrame>,
    ) -> Self {
        Self {
            device_channels: stream_config.channels,
            target_rate: config.target_sample_rate,
            resampler: LinearResampler::new(stream_config.sample_rate.0, config.target_sample_rate),
            framer: FrameAssembler::new(config.block_size),
            frame_tx,
            frames_emitted: 0,
            frames_dropped: 0,
            frame_ms: config.frame_duration_ms(),
        }
    }

    fn push(&mut self, interleaved: &[f32]) {
        let mono = downmix_to_mono(interleaved, self.device_channels);
        let resampled = self.resampler.process(&mono);

        for block in self.framer.push(&resampled) {
            let frame = AudioFrame {
                samples: block,
                sample_rate: self.target_rate,
                channels: 1,
                timestamp_ms: self.frames_emitted * self.frame_ms,
            };
            self.frames_emitted += 1;

            // Never block the audio callback; a full channel drops the frame
            if self.frame_tx.try_send(frame).is_err() {
                self.frames_dropped += 1;
                if self.frames_dropped == 1 || self.frames_dropped % 50 == 0 {
                    warn!(
                        "Capture consumer is behind, dropped {} frames",
                        self.frames_dropped
                    );
                }
            }
        }
    }
}
