pub mod client;
pub mod messages;

pub use client::{Connector, GeminiLiveConnector, LiveConnection, Transport, TransportEvent};
pub use messages::{
    build_audio_message, build_setup_message, parse_server_message, MediaChunk, ServerEvent,
    ServerMessage, SetupParams,
};
