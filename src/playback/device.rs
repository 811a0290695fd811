// Speaker output using cpal
//
// Like capture, the output stream lives on its own thread. The device
// callback renders the shared timeline, so the timeline clock follows the
// hardware. Output failures are playback errors: they never end a session.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use super::scheduler::{AudioOutput, PlaybackBuffer};
use super::timeline::SharedTimeline;
use crate::error::{LiveChatError, Result};

/// Default output device driving an `OutputTimeline`
pub struct SpeakerOutput {
    timeline: SharedTimeline,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SpeakerOutput {
    /// Start the default output stream.
    pub fn open() -> Result<Self> {
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<SharedTimeline>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name("speaker-output".to_string())
            .spawn(move || output_thread(ready_tx, stop_rx))
            .map_err(|e| LiveChatError::Playback(format!("failed to spawn output thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(timeline)) => Ok(Self {
                timeline,
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(LiveChatError::Playback(
                    "output thread exited before the stream started".to_string(),
                ))
            }
        }
    }

    pub fn timeline(&self) -> &SharedTimeline {
        &self.timeline
    }
}

impl AudioOutput for SpeakerOutput {
    fn now(&self) -> f64 {
        self.timeline.now()
    }

    fn play(&mut self, id: u64, buffer: &PlaybackBuffer, at: f64) -> Result<()> {
        self.timeline.play(id, buffer, at)
    }

    fn stop(&mut self, id: u64) {
        self.timeline.stop(id)
    }
}

impl Drop for SpeakerOutput {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Output thread panicked");
            }
        }
        info!("Speaker output closed");
    }
}

fn output_thread(
    ready_tx: std_mpsc::Sender<Result<SharedTimeline>>,
    stop_rx: std_mpsc::Receiver<()>,
) {
    let (stream, timeline) = match open_output_stream() {
        Ok(opened) => opened,
        Err(e) => {
            error!("Failed to open speaker: {}", e);
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(LiveChatError::Playback(format!(
            "failed to start output stream: {}",
            e
        ))));
        return;
    }

    let _ = ready_tx.send(Ok(timeline));

    // Block until the owner goes away
    let _ = stop_rx.recv();
    drop(stream);
    debug!("Output thread exiting");
}

fn open_output_stream() -> Result<(cpal::Stream, SharedTimeline)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| LiveChatError::Playback("no output device available".to_string()))?;

    let supported = device
        .default_output_config()
        .map_err(|e| LiveChatError::Playback(format!("no usable output config: {}", e)))?;

    let sample_format = supported.sample_format();
    let stream_config: cpal::StreamConfig = supported.into();
    let timeline = SharedTimeline::new(stream_config.sample_rate.0);

    info!(
        "Output device: {} ({}Hz, {} channels, {:?})",
        device.name().unwrap_or_else(|_| "unknown".to_string()),
        stream_config.sample_rate.0,
        stream_config.channels,
        sample_format
    );

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, timeline.clone()),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, timeline.clone()),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, timeline.clone()),
        other => Err(LiveChatError::Playback(format!(
            "unsupported output sample format: {:?}",
            other
        ))),
    }?;

    Ok((stream, timeline))
}

fn build_stream<T>(
    device: &cpal::Device,
    stream_config: &cpal::StreamConfig,
    timeline: SharedTimeline,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = stream_config.channels;
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            stream_config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                match timeline.lock() {
                    Ok(mut t) => t.render(&mut scratch, channels),
                    Err(_) => scratch.fill(0.0),
                }
                for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                    *out = sample.to_sample::<T>();
                }
            },
            move |err| error!("Output stream error: {}", err),
            None,
        )
        .map_err(|e| LiveChatError::Playback(format!("failed to build output stream: {}", e)))
}

/// Stand-in when no speaker could be opened
///
/// Every buffer fails with a playback error, which the scheduler counts
/// without ending the session. The clock stays at zero.
#[derive(Debug, Clone)]
pub struct UnavailableOutput {
    reason: String,
}

impl UnavailableOutput {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl AudioOutput for UnavailableOutput {
    fn now(&self) -> f64 {
        0.0
    }

    fn play(&mut self, id: u64, _buffer: &PlaybackBuffer, _at: f64) -> Result<()> {
        Err(LiveChatError::Playback(format!(
            "buffer {} not played: {}",
            id, self.reason
        )))
    }

    fn stop(&mut self, _id: u64) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_output_rejects_every_buffer() {
        let mut output = UnavailableOutput::new("no output device available");
        let buffer = PlaybackBuffer::mono(vec![0.0; 16], 16000);
        assert!(matches!(
            output.play(0, &buffer, 0.0),
            Err(LiveChatError::Playback(_))
        ));
        assert_eq!(output.now(), 0.0);
    }
}
