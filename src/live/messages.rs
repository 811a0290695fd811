//! Wire messages for the Gemini Live `BidiGenerateContent` protocol.
//!
//! Outbound: one `setup` message, then a stream of `realtimeInput` audio
//! chunks. Inbound: JSON objects carrying any combination of transcripts,
//! inline audio, turn boundaries, interruption and errors.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LiveChatError, Result};

/// MIME prefix for PCM16 audio; the rate follows.
pub const PCM_MIME_PREFIX: &str = "audio/pcm;rate=";

/// Rate assumed for inline output audio without a rate parameter.
pub const DEFAULT_OUTPUT_SAMPLE_RATE: u32 = 24000;

pub fn pcm_mime(sample_rate: u32) -> String {
    format!("{}{}", PCM_MIME_PREFIX, sample_rate)
}

/// Extract the sample rate from an `audio/pcm;rate=N` MIME type.
pub fn parse_pcm_rate(mime: &str) -> Option<u32> {
    mime.split(';')
        .map(str::trim)
        .find_map(|param| param.strip_prefix("rate="))
        .and_then(|rate| rate.trim().parse().ok())
}

// ── Setup ──────────────────────────────────────────────────────────

/// Parameters the session is opened with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupParams {
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    pub input_transcription: bool,
    pub output_transcription: bool,
}

#[derive(Debug, Serialize)]
pub struct SetupMessage {
    pub setup: SetupPayload,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupPayload {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<TranscriptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<TranscriptionConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
pub struct TextPart {
    pub text: String,
}

/// Serialized as `{}`; presence alone enables transcription.
#[derive(Debug, Serialize)]
pub struct TranscriptionConfig {}

pub fn build_setup_message(params: &SetupParams) -> SetupMessage {
    let model = if params.model.starts_with("models/") {
        params.model.clone()
    } else {
        format!("models/{}", params.model)
    };

    let system_instruction = (!params.system_instruction.is_empty()).then(|| Content {
        parts: vec![TextPart {
            text: params.system_instruction.clone(),
        }],
    });

    SetupMessage {
        setup: SetupPayload {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: params.voice.clone(),
                        },
                    },
                },
            },
            system_instruction,
            input_audio_transcription: params.input_transcription.then_some(TranscriptionConfig {}),
            output_audio_transcription: params
                .output_transcription
                .then_some(TranscriptionConfig {}),
        },
    }
}

// ── Audio input ────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct RealtimeInputMessage {
    #[serde(rename = "realtimeInput")]
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RealtimeInput {
    #[serde(rename = "mediaChunks")]
    pub media_chunks: Vec<MediaChunk>,
}

/// Audio chunk with MIME type and base64-encoded PCM16.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaChunk {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub data: String,
}

/// Wrap an already base64-encoded PCM16 frame.
///
/// Wire format: `{"realtimeInput":{"mediaChunks":[{"mimeType":"audio/pcm;rate=16000","data":"<base64>"}]}}`
pub fn build_audio_message(base64_pcm: String, sample_rate: u32) -> RealtimeInputMessage {
    RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: vec![MediaChunk {
                mime_type: pcm_mime(sample_rate),
                data: base64_pcm,
            }],
        },
    }
}

// ── Server messages ────────────────────────────────────────────────

/// Inbound event from the live service.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Partial transcript of the user's speech
    InputTranscript(String),
    /// Partial transcript of the assistant's speech
    OutputTranscript(String),
    /// Inline assistant audio, base64 PCM16 LE mono
    Audio { data: String, sample_rate: u32 },
    /// The assistant finished its turn
    TurnComplete,
    /// The user barged in; pending assistant audio must stop
    Interrupted,
    /// Server-reported error
    Error(String),
}

/// One parsed server frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerMessage {
    pub setup_complete: bool,
    pub events: Vec<ServerEvent>,
}

/// Parse a JSON server frame.
///
/// Events come out in the order they must be applied: transcripts, audio,
/// interruption, then turn completion. Transcriptions are accepted both at
/// top level and nested in `serverContent`. Unknown fields are ignored;
/// malformed JSON or wrongly-typed known fields are a protocol error.
pub fn parse_server_message(json_text: &str) -> Result<ServerMessage> {
    let value: Value = serde_json::from_str(json_text)
        .map_err(|e| LiveChatError::Protocol(format!("invalid server JSON: {}", e)))?;

    let root = value
        .as_object()
        .ok_or_else(|| LiveChatError::Protocol("server message is not an object".to_string()))?;

    let mut message = ServerMessage {
        setup_complete: root.contains_key("setupComplete"),
        events: Vec::new(),
    };

    let content = match root.get("serverContent") {
        None => None,
        Some(Value::Object(content)) => Some(content),
        Some(_) => {
            return Err(LiveChatError::Protocol(
                "serverContent is not an object".to_string(),
            ))
        }
    };

    let lookup = |key: &str| content.and_then(|c| c.get(key)).or_else(|| root.get(key));

    if let Some(text) = transcript_text(lookup("inputTranscription"), "inputTranscription")? {
        message.events.push(ServerEvent::InputTranscript(text));
    }
    if let Some(text) = transcript_text(lookup("outputTranscription"), "outputTranscription")? {
        message.events.push(ServerEvent::OutputTranscript(text));
    }

    if let Some(content) = content {
        if let Some(parts) = content.get("modelTurn").and_then(|turn| turn.get("parts")) {
            let parts = parts.as_array().ok_or_else(|| {
                LiveChatError::Protocol("modelTurn.parts is not an array".to_string())
            })?;

            for part in parts {
                let Some(inline) = part.get("inlineData") else {
                    continue;
                };
                let data = inline.get("data").and_then(Value::as_str).ok_or_else(|| {
                    LiveChatError::Protocol("inlineData.data is missing".to_string())
                })?;
                let mime = inline.get("mimeType").and_then(Value::as_str).unwrap_or("");
                if !mime.is_empty() && !mime.starts_with("audio/pcm") {
                    continue;
                }
                message.events.push(ServerEvent::Audio {
                    data: data.to_string(),
                    sample_rate: parse_pcm_rate(mime).unwrap_or(DEFAULT_OUTPUT_SAMPLE_RATE),
                });
            }
        }

        if content.get("interrupted").and_then(Value::as_bool) == Some(true) {
            message.events.push(ServerEvent::Interrupted);
        }
        if content.get("turnComplete").and_then(Value::as_bool) == Some(true) {
            message.events.push(ServerEvent::TurnComplete);
        }
    }

    if let Some(err) = root.get("error") {
        let text = match err {
            Value::String(s) => s.clone(),
            other => other
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown server error")
                .to_string(),
        };
        message.events.push(ServerEvent::Error(text));
    }

    Ok(message)
}

fn transcript_text(value: Option<&Value>, field: &str) -> Result<Option<String>> {
    let Some(value) = value else {
        return Ok(None);
    };

    match value.get("text") {
        None => Ok(None),
        Some(Value::String(text)) if text.is_empty() => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.clone())),
        Some(_) => Err(LiveChatError::Protocol(format!(
            "{}.text is not a string",
            field
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SetupParams {
        SetupParams {
            model: "gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
            voice: "Zephyr".to_string(),
            system_instruction: "Be brief.".to_string(),
            input_transcription: true,
            output_transcription: true,
        }
    }

    #[test]
    fn setup_message_shape() {
        let json = serde_json::to_value(build_setup_message(&params())).unwrap();

        assert_eq!(
            json["setup"]["model"],
            "models/gemini-2.5-flash-native-audio-preview-09-2025"
        );
        assert_eq!(json["setup"]["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            json["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]
                ["prebuiltVoiceConfig"]["voiceName"],
            "Zephyr"
        );
        assert_eq!(json["setup"]["systemInstruction"]["parts"][0]["text"], "Be brief.");
        assert!(json["setup"]["inputAudioTranscription"].is_object());
        assert!(json["setup"]["outputAudioTranscription"].is_object());
    }

    #[test]
    fn setup_message_omits_disabled_transcription() {
        let mut p = params();
        p.input_transcription = false;
        p.system_instruction.clear();
        let json = serde_json::to_value(build_setup_message(&p)).unwrap();

        assert!(json["setup"].get("inputAudioTranscription").is_none());
        assert!(json["setup"].get("systemInstruction").is_none());
        assert!(json["setup"]["outputAudioTranscription"].is_object());
    }

    #[test]
    fn audio_message_shape() {
        let json = serde_json::to_string(&build_audio_message("AAAA".to_string(), 16000)).unwrap();
        assert_eq!(
            json,
            r#"{"realtimeInput":{"mediaChunks":[{"mimeType":"audio/pcm;rate=16000","data":"AAAA"}]}}"#
        );
    }

    #[test]
    fn parse_rate_from_mime() {
        assert_eq!(parse_pcm_rate("audio/pcm;rate=24000"), Some(24000));
        assert_eq!(parse_pcm_rate("audio/pcm; rate=16000"), Some(16000));
        assert_eq!(parse_pcm_rate("audio/pcm"), None);
    }

    #[test]
    fn parse_setup_complete() {
        let msg = parse_server_message(r#"{"setupComplete": {}}"#).unwrap();
        assert!(msg.setup_complete);
        assert!(msg.events.is_empty());
    }

    #[test]
    fn parse_nested_and_top_level_transcripts() {
        let msg = parse_server_message(
            r#"{"serverContent": {"inputTranscription": {"text": "hi"}}}"#,
        )
        .unwrap();
        assert_eq!(msg.events, vec![ServerEvent::InputTranscript("hi".into())]);

        let msg = parse_server_message(r#"{"outputTranscription": {"text": "hello"}}"#).unwrap();
        assert_eq!(msg.events, vec![ServerEvent::OutputTranscript("hello".into())]);
    }

    #[test]
    fn parse_empty_transcript_ignored() {
        let msg = parse_server_message(r#"{"inputTranscription": {"text": ""}}"#).unwrap();
        assert!(msg.events.is_empty());
    }

    #[test]
    fn parse_inline_audio() {
        let msg = parse_server_message(
            r#"{"serverContent": {"modelTurn": {"parts": [{"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAA="}}]}}}"#,
        )
        .unwrap();
        assert_eq!(
            msg.events,
            vec![ServerEvent::Audio {
                data: "AAA=".into(),
                sample_rate: 24000
            }]
        );
    }

    #[test]
    fn parse_event_order() {
        let msg = parse_server_message(
            r#"{"serverContent": {"turnComplete": true, "interrupted": true, "outputTranscription": {"text": "bye"}}}"#,
        )
        .unwrap();
        assert_eq!(
            msg.events,
            vec![
                ServerEvent::OutputTranscript("bye".into()),
                ServerEvent::Interrupted,
                ServerEvent::TurnComplete,
            ]
        );
    }

    #[test]
    fn parse_error_object() {
        let msg = parse_server_message(r#"{"error": {"message": "quota exceeded"}}"#).unwrap();
        assert_eq!(msg.events, vec![ServerEvent::Error("quota exceeded".into())]);
    }

    #[test]
    fn parse_unknown_fields_ignored() {
        let msg = parse_server_message(r#"{"usageMetadata": {"totalTokenCount": 5}}"#).unwrap();
        assert_eq!(msg, ServerMessage::default());
    }

    #[test]
    fn parse_malformed_is_protocol_error() {
        assert!(matches!(
            parse_server_message("not json"),
            Err(LiveChatError::Protocol(_))
        ));
        assert!(matches!(
            parse_server_message("[1, 2]"),
            Err(LiveChatError::Protocol(_))
        ));
        assert!(matches!(
            parse_server_message(r#"{"inputTranscription": {"text": 5}}"#),
            Err(LiveChatError::Protocol(_))
        ));
    }
}
