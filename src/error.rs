use thiserror::Error;

/// Failure taxonomy for a live conversation.
///
/// Capture and transport failures (`Permission`, `Device`, `Connection`)
/// tear the whole session down. `Playback` and `Protocol` failures are
/// isolated to the buffer or frame that caused them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LiveChatError {
    /// Microphone access denied, or no input device present.
    #[error("microphone permission denied: {0}")]
    Permission(String),

    /// Capture or output hardware failure.
    #[error("audio device error: {0}")]
    Device(String),

    /// Session open or transport failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// Output device busy or unavailable for one buffer.
    #[error("playback error: {0}")]
    Playback(String),

    /// Malformed or unexpected inbound data.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Another session already holds the audio devices.
    #[error("a live session is already active")]
    AlreadyActive,

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl LiveChatError {
    /// Whether this failure must drive the conversation to the error state.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LiveChatError::Permission(_)
                | LiveChatError::Device(_)
                | LiveChatError::Connection(_)
                | LiveChatError::AlreadyActive
                | LiveChatError::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, LiveChatError>;
