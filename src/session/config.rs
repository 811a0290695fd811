use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::audio::SampleOverflow;
use crate::live::SetupParams;

/// Default live endpoint (Gemini Live BidiGenerateContent over WebSocket)
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default native-audio model
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

pub const DEFAULT_VOICE: &str = "Zephyr";

pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a friendly and helpful AI voice assistant named Spark. Keep your answers natural, concise, and helpful.";

/// Configuration for a live conversation session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Unique session identifier, used in logs
    pub session_id: String,

    /// WebSocket endpoint of the live service
    pub endpoint: String,

    /// API credential; opaque to the pipeline
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Model, voice, transcription flags and system instruction
    pub setup: SetupParams,

    /// Capture / wire input rate (the service expects 16kHz)
    pub input_sample_rate: u32,

    /// Samples per outbound frame
    pub block_size: usize,

    /// Mapping of out-of-range capture samples onto PCM16
    pub sample_overflow: SampleOverflow,

    /// Outbound frames queued before new frames are dropped
    pub outbound_queue_depth: usize,

    /// Consecutive malformed server messages tolerated before failing
    pub max_protocol_errors: u32,

    /// Upper bound on the open handshake; `None` waits indefinitely
    pub handshake_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: format!("live-{}", uuid::Uuid::new_v4()),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            setup: SetupParams {
                model: DEFAULT_MODEL.to_string(),
                voice: DEFAULT_VOICE.to_string(),
                system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
                input_transcription: true,
                output_transcription: true,
            },
            input_sample_rate: 16000,
            block_size: 4096,
            sample_overflow: SampleOverflow::Clamp,
            outbound_queue_depth: 32,
            max_protocol_errors: 5,
            handshake_timeout: Some(Duration::from_secs(15)),
        }
    }
}
