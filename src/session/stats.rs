use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conversation::SessionState;

/// Statistics about a live session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Current conversation state
    pub state: SessionState,

    /// When the session was started (None before the first start)
    pub started_at: Option<DateTime<Utc>>,

    /// Wall-clock duration since start in seconds
    pub duration_secs: f64,

    /// Capture frames handed to the transport
    pub frames_sent: u64,

    /// Frames dropped by the transport's outbound queue
    pub frames_dropped: u64,

    /// Audio chunks received from the model
    pub audio_chunks_received: u64,

    /// Seconds of assistant audio accepted for playback
    pub audio_secs_scheduled: f64,

    /// Conversation turns committed to the log
    pub turns_committed: usize,

    /// Interruptions signalled by the model
    pub interruptions: u64,

    /// Malformed server messages dropped by the transport
    pub protocol_errors: u64,

    /// Buffers the output refused or that failed to decode
    pub playback_failures: u64,
}
