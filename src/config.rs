use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::audio::{AudioBackendConfig, SampleOverflow, CAPTURE_BLOCK_SIZE, CAPTURE_SAMPLE_RATE};
use crate::live::SetupParams;
use crate::session::{
    SessionConfig, DEFAULT_ENDPOINT, DEFAULT_MODEL, DEFAULT_SYSTEM_INSTRUCTION, DEFAULT_VOICE,
};

/// Prefix for environment overrides, e.g. `SPARK_LIVE__LIVE__VOICE=Puck`
pub const ENV_PREFIX: &str = "SPARK_LIVE";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub live: LiveConfig,
    pub audio: AudioConfig,
    pub transport: TransportConfig,
    pub playback: PlaybackConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub input_transcription: bool,
    pub output_transcription: bool,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            input_transcription: true,
            output_transcription: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub block_size: usize,
    pub channel_capacity: usize,
    pub sample_overflow: SampleOverflow,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: CAPTURE_SAMPLE_RATE,
            block_size: CAPTURE_BLOCK_SIZE,
            channel_capacity: 8,
            sample_overflow: SampleOverflow::Clamp,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub outbound_queue_depth: usize,
    pub max_protocol_errors: u32,
    /// 0 disables the timeout
    pub handshake_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            outbound_queue_depth: 32,
            max_protocol_errors: 5,
            handshake_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Save assistant audio to this WAV file
    pub record_output: Option<String>,
}

impl Config {
    /// Load defaults, then the optional file at `path` (extension optional),
    /// then `SPARK_LIVE__*` environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path))?;

        let cfg: Self = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            anyhow::bail!("audio.sample_rate must be positive");
        }
        if self.audio.block_size == 0 {
            anyhow::bail!("audio.block_size must be positive");
        }
        if self.transport.outbound_queue_depth == 0 {
            anyhow::bail!("transport.outbound_queue_depth must be positive");
        }
        if self.live.voice.trim().is_empty() {
            anyhow::bail!("live.voice must not be empty");
        }
        Ok(())
    }

    /// Look up the API key in the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.live.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoint: self.live.endpoint.clone(),
            api_key: self.api_key(),
            setup: SetupParams {
                model: self.live.model.clone(),
                voice: self.live.voice.clone(),
                system_instruction: self.live.system_instruction.clone(),
                input_transcription: self.live.input_transcription,
                output_transcription: self.live.output_transcription,
            },
            input_sample_rate: self.audio.sample_rate,
            block_size: self.audio.block_size,
            sample_overflow: self.audio.sample_overflow,
            outbound_queue_depth: self.transport.outbound_queue_depth,
            max_protocol_errors: self.transport.max_protocol_errors,
            handshake_timeout: match self.transport.handshake_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            ..SessionConfig::default()
        }
    }

    pub fn backend_config(&self) -> AudioBackendConfig {
        AudioBackendConfig {
            target_sample_rate: self.audio.sample_rate,
            target_channels: 1,
            block_size: self.audio.block_size,
            channel_capacity: self.audio.channel_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = Config::load("/nonexistent/spark-live").unwrap();
        assert_eq!(cfg.live.voice, "Zephyr");
        assert_eq!(cfg.audio.block_size, 4096);
        assert_eq!(cfg.transport.max_protocol_errors, 5);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spark-live.toml");
        std::fs::write(
            &path,
            "[live]\nvoice = \"Puck\"\n\n[transport]\nhandshake_timeout_secs = 0\n\n[audio]\nsample_overflow = \"wrap\"\n",
        )
        .unwrap();

        let cfg = Config::load(path.to_str().unwrap()).unwrap();
        let session = cfg.session_config();
        assert_eq!(session.setup.voice, "Puck");
        assert_eq!(session.handshake_timeout, None);
        assert_eq!(session.sample_overflow, SampleOverflow::Wrap);
        assert_eq!(session.setup.model, DEFAULT_MODEL);
    }

    #[test]
    fn zero_block_size_is_rejected() {
        let mut cfg = Config::default();
        cfg.audio.block_size = 0;
        assert!(cfg.validate().is_err());
    }
}
