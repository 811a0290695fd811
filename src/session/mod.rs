//! Live session management
//!
//! `LiveChatSession` wires the pieces of a conversation together:
//! - Audio capture from a microphone or WAV file
//! - Streaming encoded frames to the live service
//! - Scheduling returned audio for playback
//! - Turn tracking and session statistics

mod config;
mod session;
mod stats;

pub use config::{
    SessionConfig, DEFAULT_ENDPOINT, DEFAULT_MODEL, DEFAULT_SYSTEM_INSTRUCTION, DEFAULT_VOICE,
};
pub use session::LiveChatSession;
pub use stats::SessionStats;
