pub mod audio;
pub mod config;
pub mod conversation;
pub mod devices;
pub mod error;
pub mod live;
pub mod playback;
pub mod session;

pub use audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFile, AudioFrame, AudioSource,
    FileBackend, MicrophoneBackend, SampleOverflow,
};
pub use config::Config;
pub use conversation::{Conversation, ConversationTurn, Role, SessionState};
pub use devices::{DeviceKind, DeviceLease, DeviceRegistry};
pub use error::{LiveChatError, Result};
pub use live::{Connector, GeminiLiveConnector, LiveConnection, ServerEvent, Transport, TransportEvent};
pub use playback::{
    AudioOutput, OutputTimeline, PlaybackBuffer, PlaybackScheduler, SpeakerOutput,
    UnavailableOutput,
};
pub use session::{LiveChatSession, SessionConfig, SessionStats};
