// Sample-accurate output mixer
//
// Scheduled buffers ("voices") are converted to the output rate when they are
// queued and summed into whatever block the device asks for. The clock is the
// number of frames rendered so far, so `now()` only advances as fast as the
// device actually consumes audio.

use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use super::scheduler::{AudioOutput, PlaybackBuffer};
use crate::audio::resample_linear;
use crate::error::{LiveChatError, Result};

struct Voice {
    id: u64,
    start_frame: u64,
    channels: Vec<Vec<f32>>,
}

impl Voice {
    fn len(&self) -> u64 {
        self.channels.first().map_or(0, |c| c.len() as u64)
    }

    fn end_frame(&self) -> u64 {
        self.start_frame + self.len()
    }
}

/// Convert every plane of `buffer` to `sample_rate`
pub fn resample_planes(id: u64, buffer: &PlaybackBuffer, sample_rate: u32) -> Result<Vec<Vec<f32>>> {
    if buffer.sample_rate == 0 || buffer.channels.is_empty() {
        return Err(LiveChatError::Playback(format!(
            "buffer {} has no playable audio",
            id
        )));
    }

    Ok(buffer
        .channels
        .iter()
        .map(|plane| resample_linear(plane, buffer.sample_rate, sample_rate))
        .collect())
}

pub struct OutputTimeline {
    sample_rate: u32,
    frames_rendered: u64,
    voices: Vec<Voice>,
}

impl OutputTimeline {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frames_rendered: 0,
            voices: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Queue planes already at the output rate to start at `at` seconds
    pub fn schedule(&mut self, id: u64, channels: Vec<Vec<f32>>, at: f64) {
        let start_frame = (at.max(0.0) * self.sample_rate as f64).round() as u64;
        let voice = Voice {
            id,
            start_frame: start_frame.max(self.frames_rendered),
            channels,
        };

        debug!(
            buffer_id = id,
            start_frame = voice.start_frame,
            frames = voice.len(),
            "Voice queued"
        );
        self.voices.push(voice);
    }

    /// Mix scheduled voices into `out` (interleaved, `channels` wide) and
    /// advance the clock by one block.
    pub fn render(&mut self, out: &mut [f32], channels: u16) {
        let channels = channels.max(1) as usize;
        let frames = (out.len() / channels) as u64;
        let block_start = self.frames_rendered;
        let block_end = block_start + frames;

        out.fill(0.0);

        for voice in &self.voices {
            let from = voice.start_frame.max(block_start);
            let to = voice.end_frame().min(block_end);
            if from >= to {
                continue;
            }

            let voice_channels = voice.channels.len();
            for frame in from..to {
                let src = (frame - voice.start_frame) as usize;
                let dst = (frame - block_start) as usize * channels;
                for ch in 0..channels {
                    // Mono fans out; extra device channels reuse the last plane
                    let plane = &voice.channels[ch.min(voice_channels - 1)];
                    out[dst + ch] += plane[src];
                }
            }
        }

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        self.frames_rendered = block_end;
        self.voices.retain(|v| v.end_frame() > block_end);
    }
}

impl AudioOutput for OutputTimeline {
    fn now(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames_rendered as f64 / self.sample_rate as f64
    }

    fn play(&mut self, id: u64, buffer: &PlaybackBuffer, at: f64) -> Result<()> {
        let planes = resample_planes(id, buffer, self.sample_rate)?;
        self.schedule(id, planes, at);
        Ok(())
    }

    fn stop(&mut self, id: u64) {
        self.voices.retain(|v| v.id != id);
    }
}

/// Timeline shared between the session and the device callback
///
/// The device callback holds the lock while rendering, so buffers are
/// resampled before the lock is taken.
#[derive(Clone)]
pub struct SharedTimeline {
    inner: Arc<Mutex<OutputTimeline>>,
    sample_rate: u32,
}

impl SharedTimeline {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(OutputTimeline::new(sample_rate))),
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, OutputTimeline>> {
        self.inner
            .lock()
            .map_err(|_| LiveChatError::Playback("output timeline poisoned".to_string()))
    }
}

impl AudioOutput for SharedTimeline {
    fn now(&self) -> f64 {
        self.lock().map(|t| t.now()).unwrap_or(0.0)
    }

    fn play(&mut self, id: u64, buffer: &PlaybackBuffer, at: f64) -> Result<()> {
        let planes = resample_planes(id, buffer, self.sample_rate)?;
        self.lock()?.schedule(id, planes, at);
        Ok(())
    }

    fn stop(&mut self, id: u64) {
        match self.lock() {
            Ok(mut timeline) => timeline.stop(id),
            Err(e) => warn!(buffer_id = id, "Cannot stop voice: {}", e),
        }
    }
}
