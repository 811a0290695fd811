use anyhow::{Context, Result};
use clap::Parser;
use spark_live::{
    AudioBackendFactory, AudioOutput, AudioSource, Config, DeviceRegistry, GeminiLiveConnector,
    LiveChatSession, Role, SpeakerOutput, UnavailableOutput,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "spark-live", version, about = "Real-time voice conversation with a live speech model")]
struct Cli {
    /// Configuration file (extension optional)
    #[arg(long, default_value = "config/spark-live")]
    config: String,

    /// Prebuilt voice name
    #[arg(long)]
    voice: Option<String>,

    /// System instruction for the model
    #[arg(long)]
    system_instruction: Option<String>,

    /// Replay a WAV file instead of the microphone
    #[arg(long)]
    input_wav: Option<String>,

    /// Pace WAV replay at real-time speed
    #[arg(long)]
    realtime: bool,

    /// Save assistant audio to a WAV file
    #[arg(long)]
    record_output: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut cfg = Config::load(&cli.config)?;
    if let Some(voice) = cli.voice {
        cfg.live.voice = voice;
    }
    if let Some(instruction) = cli.system_instruction {
        cfg.live.system_instruction = instruction;
    }
    if cli.record_output.is_some() {
        cfg.playback.record_output = cli.record_output;
    }

    info!("Spark Live v{}", env!("CARGO_PKG_VERSION"));

    let session_config = cfg.session_config();
    if session_config.api_key.is_none() {
        warn!("{} is not set; the session will be rejected", cfg.live.api_key_env);
    }

    let devices = DeviceRegistry::new();
    let source = match cli.input_wav {
        Some(path) => AudioSource::File {
            path,
            realtime: cli.realtime,
        },
        None => AudioSource::Microphone,
    };
    let capture = AudioBackendFactory::create(source, cfg.backend_config());
    let speaker: Box<dyn AudioOutput> = match SpeakerOutput::open() {
        Ok(speaker) => Box::new(speaker),
        Err(e) => {
            warn!("Speaker unavailable, assistant audio will not play: {}", e);
            Box::new(UnavailableOutput::new(e.to_string()))
        }
    };

    let mut session = LiveChatSession::new(
        session_config,
        Arc::new(GeminiLiveConnector::new()),
        capture,
        speaker,
        Arc::clone(&devices),
    );
    if let Some(path) = &cfg.playback.record_output {
        session.record_output_to(path);
    }

    let mut state_rx = session.subscribe_state();
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = *state_rx.borrow();
            info!("● {}", state);
        }
    });

    session.start().await.context("Failed to start live session")?;
    info!("Speak now; press Ctrl-C to stop");

    let user_stop = tokio::select! {
        _ = session.run() => false,
        _ = tokio::signal::ctrl_c() => true,
    };

    if user_stop {
        info!("Received Ctrl-C");
    } else if let Some(err) = session.last_error() {
        warn!("Session ended: {}", err);
    }

    let stats = session.stop().await?;

    println!();
    for turn in session.log() {
        let speaker = match turn.role {
            Role::User => "You",
            Role::Assistant => "Spark",
        };
        println!("{}: {}", speaker, turn.text);
    }
    println!();
    println!("{}", serde_json::to_string_pretty(&stats)?);

    Ok(())
}
