//! Gapless sequential scheduling of assistant audio.
//!
//! Each buffer starts at `max(next_start_time, now)` and pushes the cursor to
//! its end, so consecutive chunks abut exactly while the output keeps up and
//! late chunks start immediately instead of in the past.

use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::audio::DecodedAudio;
use crate::error::Result;

/// Decoded audio ready for playback (planar f32)
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl PlaybackBuffer {
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            channels: vec![samples],
            sample_rate,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate as f64
    }
}

impl From<DecodedAudio> for PlaybackBuffer {
    fn from(audio: DecodedAudio) -> Self {
        Self {
            channels: audio.channels,
            sample_rate: audio.sample_rate,
        }
    }
}

/// Audio sink with its own clock
///
/// `now` is seconds since the output started. `play` schedules a buffer at an
/// absolute time on that clock; `stop` silences it at the next render.
pub trait AudioOutput: Send {
    fn now(&self) -> f64;

    fn play(&mut self, id: u64, buffer: &PlaybackBuffer, at: f64) -> Result<()>;

    fn stop(&mut self, id: u64);
}

impl<O: AudioOutput + ?Sized> AudioOutput for Box<O> {
    fn now(&self) -> f64 {
        (**self).now()
    }

    fn play(&mut self, id: u64, buffer: &PlaybackBuffer, at: f64) -> Result<()> {
        (**self).play(id, buffer, at)
    }

    fn stop(&mut self, id: u64) {
        (**self).stop(id)
    }
}

pub struct PlaybackScheduler<O: AudioOutput> {
    output: O,
    next_start_time: f64,
    /// id -> scheduled end time
    live: HashMap<u64, f64>,
    next_id: u64,
    scheduled_secs: f64,
    failures: u64,
}

impl<O: AudioOutput> PlaybackScheduler<O> {
    pub fn new(output: O) -> Self {
        Self {
            output,
            next_start_time: 0.0,
            live: HashMap::new(),
            next_id: 0,
            scheduled_secs: 0.0,
            failures: 0,
        }
    }

    /// Schedule `buffer` right after the previous one and return its start time.
    ///
    /// An output failure is logged and counted; the cursor does not move and
    /// later buffers still play.
    pub fn enqueue(&mut self, buffer: PlaybackBuffer) -> Result<f64> {
        self.reap();

        let now = self.output.now();
        let start = self.next_start_time.max(now);
        let duration = buffer.duration_secs();

        let id = self.next_id;
        self.next_id += 1;

        if let Err(e) = self.output.play(id, &buffer, start) {
            self.failures += 1;
            warn!(buffer_id = id, failures = self.failures, "Playback failed: {}", e);
            return Err(e);
        }

        self.next_start_time = start + duration;
        self.scheduled_secs += duration;
        self.live.insert(id, self.next_start_time);

        debug!(
            buffer_id = id,
            start,
            duration,
            live = self.live.len(),
            "Scheduled playback buffer"
        );

        Ok(start)
    }

    /// Stop everything scheduled and reset the cursor. Idempotent.
    pub fn interrupt(&mut self) {
        if !self.live.is_empty() {
            info!(stopped = self.live.len(), "Interrupting playback");
        }
        for (id, _) in self.live.drain() {
            self.output.stop(id);
        }
        self.next_start_time = 0.0;
    }

    /// Drop finished buffers from the live set
    fn reap(&mut self) {
        let now = self.output.now();
        self.live.retain(|_, end| *end > now);
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn live_count(&mut self) -> usize {
        self.reap();
        self.live.len()
    }

    /// Total seconds of audio accepted for playback
    pub fn scheduled_secs(&self) -> f64 {
        self.scheduled_secs
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn output(&self) -> &O {
        &self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LiveChatError;

    #[derive(Default)]
    struct ManualClock {
        now: f64,
        played: Vec<(u64, f64)>,
        stopped: Vec<u64>,
        fail_next: bool,
    }

    impl AudioOutput for ManualClock {
        fn now(&self) -> f64 {
            self.now
        }

        fn play(&mut self, id: u64, _buffer: &PlaybackBuffer, at: f64) -> Result<()> {
            if std::mem::take(&mut self.fail_next) {
                return Err(LiveChatError::Playback("device busy".into()));
            }
            self.played.push((id, at));
            Ok(())
        }

        fn stop(&mut self, id: u64) {
            self.stopped.push(id);
        }
    }

    fn half_second() -> PlaybackBuffer {
        PlaybackBuffer::mono(vec![0.0; 12000], 24000)
    }

    #[test]
    fn late_buffer_starts_now() {
        let mut scheduler = PlaybackScheduler::new(ManualClock {
            now: 2.0,
            ..Default::default()
        });
        assert_eq!(scheduler.enqueue(half_second()).unwrap(), 2.0);
        assert!((scheduler.next_start_time() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn finished_buffers_are_reaped_by_clock() {
        let mut scheduler = PlaybackScheduler::new(ManualClock::default());
        scheduler.enqueue(half_second()).unwrap();
        scheduler.enqueue(half_second()).unwrap();
        assert_eq!(scheduler.live_count(), 2);

        scheduler.output.now = 0.6;
        assert_eq!(scheduler.live_count(), 1);

        // Reaped buffers are not stopped again
        scheduler.interrupt();
        assert_eq!(scheduler.output.stopped, vec![1]);
    }

    #[test]
    fn output_failure_is_isolated() {
        let mut scheduler = PlaybackScheduler::new(ManualClock::default());
        scheduler.output.fail_next = true;
        assert!(scheduler.enqueue(half_second()).is_err());
        assert_eq!(scheduler.failures(), 1);
        assert_eq!(scheduler.next_start_time(), 0.0);

        assert_eq!(scheduler.enqueue(half_second()).unwrap(), 0.0);
        assert_eq!(scheduler.live_count(), 1);
    }
}
