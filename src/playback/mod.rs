//! Assistant audio playback
//!
//! - `scheduler`: gapless cursor and interruption
//! - `timeline`: frame-clocked mixer the scheduler plays into
//! - `device`: cpal speaker driving the timeline

pub mod device;
pub mod scheduler;
pub mod timeline;

pub use device::{SpeakerOutput, UnavailableOutput};
pub use scheduler::{AudioOutput, PlaybackBuffer, PlaybackScheduler};
pub use timeline::{OutputTimeline, SharedTimeline};
