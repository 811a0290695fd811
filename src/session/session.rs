use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::stats::SessionStats;
use crate::audio::{
    decode_frame, encode_frame, resample_linear, AudioBackend, AudioFrame, SampleOverflow,
    WavRecorder,
};
use crate::audio::codec::samples_to_pcm16;
use crate::conversation::{Conversation, ConversationTurn, SessionState};
use crate::devices::{DeviceLease, DeviceRegistry};
use crate::error::{LiveChatError, Result};
use crate::live::{Connector, ServerEvent, Transport, TransportEvent};
use crate::playback::{AudioOutput, PlaybackScheduler};

enum Incoming {
    Transport(TransportEvent),
    CaptureEnded,
}

/// A live voice conversation: microphone in, model audio out
///
/// Owns capture, transport and playback for the lifetime of one session and
/// processes transport events one at a time.
pub struct LiveChatSession {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    capture: Box<dyn AudioBackend>,
    scheduler: PlaybackScheduler<Box<dyn AudioOutput>>,
    devices: Arc<DeviceRegistry>,
    conversation: Conversation,
    state_tx: watch::Sender<SessionState>,

    transport: Option<Arc<dyn Transport>>,
    events: Option<mpsc::Receiver<TransportEvent>>,
    pump: Option<JoinHandle<()>>,
    capture_ended: Arc<Notify>,
    capture_running: bool,
    leases: Option<(DeviceLease, DeviceLease)>,

    record_path: Option<PathBuf>,
    recorder: Option<WavRecorder>,

    started_at: Option<DateTime<Utc>>,
    last_error: Option<LiveChatError>,
    frames_sent: Arc<AtomicU64>,
    frames_dropped: u64,
    protocol_errors: u64,
    audio_chunks: u64,
    interruptions: u64,
    decode_failures: u64,
}

impl LiveChatSession {
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        capture: Box<dyn AudioBackend>,
        output: Box<dyn AudioOutput>,
        devices: Arc<DeviceRegistry>,
    ) -> Self {
        info!(
            session_id = %config.session_id,
            capture = capture.name(),
            "Creating live session"
        );

        let (state_tx, _) = watch::channel(SessionState::Idle);

        Self {
            config,
            connector,
            capture,
            scheduler: PlaybackScheduler::new(output),
            devices,
            conversation: Conversation::new(),
            state_tx,
            transport: None,
            events: None,
            pump: None,
            capture_ended: Arc::new(Notify::new()),
            capture_running: false,
            leases: None,
            record_path: None,
            recorder: None,
            started_at: None,
            last_error: None,
            frames_sent: Arc::new(AtomicU64::new(0)),
            frames_dropped: 0,
            protocol_errors: 0,
            audio_chunks: 0,
            interruptions: 0,
            decode_failures: 0,
        }
    }

    /// Save every assistant audio chunk to a 16-bit WAV file
    pub fn record_output_to(&mut self, path: impl Into<PathBuf>) {
        self.record_path = Some(path.into());
    }

    /// Acquire microphone and speaker, open the remote session and start streaming
    pub async fn start(&mut self) -> Result<()> {
        if self.conversation.state().is_active() {
            warn!(session_id = %self.config.session_id, "Session already started");
            return Err(LiveChatError::AlreadyActive);
        }

        info!(session_id = %self.config.session_id, "Starting live session");
        self.last_error = None;

        let leases = match self.devices.claim_session() {
            Ok(leases) => leases,
            Err(e) => return Err(self.fail_start(e)),
        };

        let frames = match self.capture.start().await {
            Ok(frames) => frames,
            Err(e) => return Err(self.fail_start(e)),
        };
        self.capture_running = true;

        let opened = self.connector.open(&self.config).await;
        let connection = match opened {
            Ok(connection) => connection,
            Err(e) => {
                self.stop_capture().await;
                return Err(self.fail_start(e));
            }
        };

        let transport: Arc<dyn Transport> = Arc::from(connection.transport);
        self.capture_ended = Arc::new(Notify::new());
        self.frames_sent = Arc::new(AtomicU64::new(0));

        self.pump = Some(tokio::spawn(pump_frames(
            frames,
            Arc::clone(&transport),
            self.config.sample_overflow,
            Arc::clone(&self.frames_sent),
            Arc::clone(&self.capture_ended),
            self.config.session_id.clone(),
        )));

        self.transport = Some(transport);
        self.events = Some(connection.events);
        self.leases = Some(leases);
        self.started_at = Some(Utc::now());

        self.conversation.begin();
        self.publish_state();

        info!(session_id = %self.config.session_id, "Live session listening");
        Ok(())
    }

    /// Wait for the next event and apply it
    ///
    /// Returns `false` once the session is no longer active.
    pub async fn process_next(&mut self) -> bool {
        let incoming = {
            let Some(events) = self.events.as_mut() else {
                return false;
            };
            let capture_ended = Arc::clone(&self.capture_ended);

            tokio::select! {
                biased;
                event = events.recv() => {
                    Incoming::Transport(event.unwrap_or(TransportEvent::Closed))
                }
                _ = capture_ended.notified() => Incoming::CaptureEnded,
            }
        };

        match incoming {
            Incoming::Transport(event) => self.handle_event(event).await,
            Incoming::CaptureEnded => self.on_capture_ended().await,
        }

        self.conversation.state().is_active()
    }

    /// Process events until the session fails or is stopped
    pub async fn run(&mut self) {
        while self.process_next().await {}
    }

    /// Apply one transport event
    pub async fn handle_event(&mut self, event: TransportEvent) {
        if !self.conversation.state().is_active() {
            debug!(session_id = %self.config.session_id, ?event, "Ignoring event while inactive");
            return;
        }

        match event {
            TransportEvent::Opened => {
                debug!(session_id = %self.config.session_id, "Transport opened");
            }
            TransportEvent::Message(message) => self.handle_server_event(message).await,
            TransportEvent::Error(message) => {
                self.fail(LiveChatError::Connection(message)).await;
            }
            TransportEvent::Closed => {
                self.fail(LiveChatError::Connection(
                    "session closed by remote".to_string(),
                ))
                .await;
            }
        }
    }

    async fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::InputTranscript(text) => {
                self.conversation.on_input_transcript(&text);
            }
            ServerEvent::OutputTranscript(text) => {
                self.conversation.on_output_transcript(&text);
                self.publish_state();
            }
            ServerEvent::Audio { data, sample_rate } => self.play_audio(&data, sample_rate),
            ServerEvent::TurnComplete => {
                self.conversation.on_turn_complete();
                self.publish_state();
            }
            ServerEvent::Interrupted => {
                info!(session_id = %self.config.session_id, "Model interrupted, flushing playback");
                self.interruptions += 1;
                self.scheduler.interrupt();
                self.conversation.on_interrupted();
                self.publish_state();
            }
            ServerEvent::Error(message) => {
                self.fail(LiveChatError::Connection(format!("server error: {}", message)))
                    .await;
            }
        }
    }

    fn play_audio(&mut self, data: &str, sample_rate: u32) {
        self.audio_chunks += 1;

        let audio = match decode_frame(data, sample_rate, 1) {
            Ok(audio) => audio,
            Err(e) => {
                self.decode_failures += 1;
                warn!(session_id = %self.config.session_id, "Dropping undecodable audio chunk: {}", e);
                return;
            }
        };

        self.record_chunk(&audio.channels[0], sample_rate);

        // Failures are counted by the scheduler and never end the session
        let _ = self.scheduler.enqueue(audio.into());
    }

    fn record_chunk(&mut self, samples: &[f32], sample_rate: u32) {
        if self.recorder.is_none() {
            let Some(path) = self.record_path.as_ref() else {
                return;
            };
            match WavRecorder::create(path, sample_rate, 1) {
                Ok(recorder) => self.recorder = Some(recorder),
                Err(e) => {
                    warn!("Disabling output recording: {:#}", e);
                    self.record_path = None;
                    return;
                }
            }
        }

        if let Some(recorder) = self.recorder.as_mut() {
            // The file rate is fixed by the first chunk
            let pcm = if recorder.sample_rate() == sample_rate {
                samples_to_pcm16(samples, SampleOverflow::Clamp)
            } else {
                debug!(
                    file_rate = recorder.sample_rate(),
                    chunk_rate = sample_rate,
                    "Resampling chunk for recording"
                );
                let converted = resample_linear(samples, sample_rate, recorder.sample_rate());
                samples_to_pcm16(&converted, SampleOverflow::Clamp)
            };
            if let Err(e) = recorder.write_pcm16(&pcm) {
                warn!("Failed to record assistant audio: {:#}", e);
            }
        }
    }

    async fn on_capture_ended(&mut self) {
        match self.capture.last_error() {
            Some(e) if e.is_fatal() => self.fail(e).await,
            Some(e) => warn!(
                session_id = %self.config.session_id,
                capture = self.capture.name(),
                "Capture ended with a recoverable error: {}",
                e
            ),
            None => info!(
                session_id = %self.config.session_id,
                capture = self.capture.name(),
                "Capture source finished"
            ),
        }
    }

    /// End the session on the user's request
    ///
    /// Playback is flushed and uncommitted text is discarded.
    pub async fn stop(&mut self) -> Result<SessionStats> {
        if self.conversation.state() == SessionState::Idle {
            debug!(session_id = %self.config.session_id, "Session not active");
            return Ok(self.stats());
        }

        info!(session_id = %self.config.session_id, "Stopping live session");

        self.stop_capture().await;
        self.teardown();
        self.scheduler.interrupt();
        self.conversation.stop();
        self.publish_state();

        let stats = self.stats();
        info!(
            session_id = %self.config.session_id,
            turns = stats.turns_committed,
            frames_sent = stats.frames_sent,
            "Live session stopped"
        );
        Ok(stats)
    }

    /// Fatal failure: stop capture, close transport, enter `Error`
    async fn fail(&mut self, err: LiveChatError) {
        error!(session_id = %self.config.session_id, "Live session failed: {}", err);
        self.stop_capture().await;
        self.teardown();
        self.last_error = Some(err);
        self.conversation.fail();
        self.publish_state();
    }

    fn fail_start(&mut self, err: LiveChatError) -> LiveChatError {
        error!(session_id = %self.config.session_id, "Failed to start live session: {}", err);
        self.last_error = Some(err.clone());
        self.conversation.fail();
        self.publish_state();
        err
    }

    async fn stop_capture(&mut self) {
        if !self.capture_running {
            return;
        }
        self.capture_running = false;
        if let Err(e) = self.capture.stop().await {
            warn!(session_id = %self.config.session_id, "Failed to stop capture: {}", e);
        }
    }

    /// Close the transport and drop everything tied to this connection
    fn teardown(&mut self) {
        if let Some(transport) = self.transport.take() {
            self.frames_dropped = transport.dropped_frames();
            self.protocol_errors = transport.protocol_errors();
            transport.close();
        }
        self.events = None;
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.leases = None;

        if let Some(recorder) = self.recorder.take() {
            if let Err(e) = recorder.finish() {
                warn!("Failed to finalize output recording: {:#}", e);
            }
        }
    }

    fn publish_state(&self) {
        let state = self.conversation.state();
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(session_id = %self.config.session_id, from = %previous, to = %state, "State changed");
        }
    }

    pub fn state(&self) -> SessionState {
        self.conversation.state()
    }

    /// Receiver that observes every state change
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn log(&self) -> &[ConversationTurn] {
        self.conversation.log()
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// The failure that moved the session to `Error`, if any
    pub fn last_error(&self) -> Option<&LiveChatError> {
        self.last_error.as_ref()
    }

    pub fn next_start_time(&self) -> f64 {
        self.scheduler.next_start_time()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn stats(&self) -> SessionStats {
        let (frames_dropped, protocol_errors) = match &self.transport {
            Some(t) => (t.dropped_frames(), t.protocol_errors()),
            None => (self.frames_dropped, self.protocol_errors),
        };

        SessionStats {
            state: self.conversation.state(),
            started_at: self.started_at,
            duration_secs: self
                .started_at
                .map(|t| (Utc::now() - t).num_milliseconds() as f64 / 1000.0)
                .unwrap_or(0.0),
            frames_sent: self.frames_sent.load(Ordering::SeqCst),
            frames_dropped,
            audio_chunks_received: self.audio_chunks,
            audio_secs_scheduled: self.scheduler.scheduled_secs(),
            turns_committed: self.conversation.log().len(),
            interruptions: self.interruptions,
            protocol_errors,
            playback_failures: self.scheduler.failures() + self.decode_failures,
        }
    }
}

/// Encode each captured frame and hand it to the transport
async fn pump_frames(
    mut frames: mpsc::Receiver<AudioFrame>,
    transport: Arc<dyn Transport>,
    overflow: SampleOverflow,
    frames_sent: Arc<AtomicU64>,
    capture_ended: Arc<Notify>,
    session_id: String,
) {
    debug!(session_id = %session_id, "Frame pump started");

    while let Some(frame) = frames.recv().await {
        transport.send(encode_frame(&frame.samples, overflow));
        frames_sent.fetch_add(1, Ordering::SeqCst);
    }

    debug!(session_id = %session_id, "Frame pump finished");
    capture_ended.notify_one();
}
