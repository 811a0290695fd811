use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::messages::{build_audio_message, build_setup_message, parse_server_message, ServerEvent};
use crate::error::{LiveChatError, Result};
use crate::session::SessionConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle and message notifications from an open session, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Handshake finished; always the first event
    Opened,
    /// A server event
    Message(ServerEvent),
    /// The connection failed; no further events follow
    Error(String),
    /// The connection closed; no further events follow
    Closed,
}

/// Outbound half of an open session
///
/// `send` is fire-and-forget and never blocks the caller. After `close`,
/// `send` is a no-op.
pub trait Transport: Send + Sync {
    /// Queue one base64 PCM16 frame
    fn send(&self, frame: String);

    /// Terminate the connection (idempotent)
    fn close(&self);

    /// Frames dropped because the outbound queue was full
    fn dropped_frames(&self) -> u64 {
        0
    }

    /// Malformed inbound messages seen so far
    fn protocol_errors(&self) -> u64 {
        0
    }
}

/// An open session: send half plus the inbound event stream
pub struct LiveConnection {
    pub transport: Box<dyn Transport>,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Opens sessions against a live speech service
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Connect and complete the handshake
    async fn open(&self, config: &SessionConfig) -> Result<LiveConnection>;
}

/// WebSocket connector for the Gemini Live API
#[derive(Debug, Default, Clone)]
pub struct GeminiLiveConnector;

impl GeminiLiveConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Connector for GeminiLiveConnector {
    async fn open(&self, config: &SessionConfig) -> Result<LiveConnection> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| LiveChatError::Connection("no API key configured".to_string()))?;

        let url = format!("{}?key={}", config.endpoint, api_key);
        let session_id = config.session_id.clone();

        info!(
            session_id = %session_id,
            model = %config.setup.model,
            voice = %config.setup.voice,
            "Connecting to live service"
        );

        let handshake = handshake(&url, config);
        let ws_stream = match config.handshake_timeout {
            Some(limit) => tokio::time::timeout(limit, handshake).await.map_err(|_| {
                LiveChatError::Connection(format!(
                    "handshake timed out after {:.0}s",
                    limit.as_secs_f64()
                ))
            })??,
            None => handshake.await?,
        };

        info!(session_id = %session_id, "Live session ready");

        let (ws_sender, ws_receiver) = ws_stream.split();
        let (outbound_tx, outbound_rx) = mpsc::channel::<String>(config.outbound_queue_depth.max(1));
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(256);

        let close_signal = Arc::new(Notify::new());
        let protocol_errors = Arc::new(AtomicU64::new(0));

        // Opened is delivered before anything the reader forwards
        let _ = event_tx.send(TransportEvent::Opened).await;

        tokio::spawn(outbound_loop(
            outbound_rx,
            ws_sender,
            Arc::clone(&close_signal),
            config.input_sample_rate,
            session_id.clone(),
        ));

        let inbound = tokio::spawn(inbound_loop(
            ws_receiver,
            event_tx,
            Arc::clone(&protocol_errors),
            config.max_protocol_errors,
            session_id.clone(),
        ));

        Ok(LiveConnection {
            transport: Box::new(GeminiLiveTransport {
                outbound_tx,
                close_signal,
                closed: AtomicBool::new(false),
                dropped: AtomicU64::new(0),
                protocol_errors,
                inbound,
                session_id,
            }),
            events: event_rx,
        })
    }
}

/// Connect, send setup, wait for `setupComplete`
async fn handshake(url: &str, config: &SessionConfig) -> Result<WsStream> {
    let (mut ws_stream, _response) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| LiveChatError::Connection(format!("failed to connect: {}", e)))?;

    let setup = serde_json::to_string(&build_setup_message(&config.setup))
        .map_err(|e| LiveChatError::Connection(format!("failed to encode setup: {}", e)))?;
    debug!(session_id = %config.session_id, "Sending setup message");

    ws_stream
        .send(WsMessage::Text(setup))
        .await
        .map_err(|e| LiveChatError::Connection(format!("failed to send setup: {}", e)))?;

    while let Some(frame) = ws_stream.next().await {
        let text = match frame {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Binary(data)) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => continue,
            },
            Ok(WsMessage::Close(frame)) => {
                let reason = frame
                    .map(|f| f.reason.to_string())
                    .unwrap_or_else(|| "no reason".to_string());
                return Err(LiveChatError::Connection(format!(
                    "server rejected session: {}",
                    reason
                )));
            }
            Ok(_) => continue,
            Err(e) => {
                return Err(LiveChatError::Connection(format!(
                    "error during handshake: {}",
                    e
                )))
            }
        };

        match parse_server_message(&text) {
            Ok(msg) if msg.setup_complete => return Ok(ws_stream),
            Ok(msg) => {
                if let Some(ServerEvent::Error(message)) = msg
                    .events
                    .into_iter()
                    .find(|e| matches!(e, ServerEvent::Error(_)))
                {
                    return Err(LiveChatError::Connection(message));
                }
            }
            Err(e) => warn!(session_id = %config.session_id, "Ignoring frame during handshake: {}", e),
        }
    }

    Err(LiveChatError::Connection(
        "connection ended before setup completed".to_string(),
    ))
}

struct GeminiLiveTransport {
    outbound_tx: mpsc::Sender<String>,
    close_signal: Arc<Notify>,
    closed: AtomicBool,
    dropped: AtomicU64,
    protocol_errors: Arc<AtomicU64>,
    inbound: JoinHandle<()>,
    session_id: String,
}

impl Transport for GeminiLiveTransport {
    fn send(&self, frame: String) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        match self.outbound_tx.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::SeqCst) + 1;
                if dropped == 1 || dropped % 50 == 0 {
                    warn!(
                        session_id = %self.session_id,
                        dropped,
                        "Outbound queue full, dropping audio frame"
                    );
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(session_id = %self.session_id, "Outbound loop gone, frame discarded");
            }
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(session_id = %self.session_id, "Closing live session");
        self.close_signal.notify_one();
        // Nothing is delivered after close, even if the server keeps talking
        self.inbound.abort();
    }

    fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }

    fn protocol_errors(&self) -> u64 {
        self.protocol_errors.load(Ordering::SeqCst)
    }
}

impl Drop for GeminiLiveTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Outbound loop: wrap frames in realtimeInput messages and write them
async fn outbound_loop(
    mut rx: mpsc::Receiver<String>,
    mut ws_sender: SplitSink<WsStream, WsMessage>,
    close_signal: Arc<Notify>,
    sample_rate: u32,
    session_id: String,
) {
    let mut chunk_count: u64 = 0;

    loop {
        let frame = tokio::select! {
            biased;
            _ = close_signal.notified() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        chunk_count += 1;
        let json = match serde_json::to_string(&build_audio_message(frame, sample_rate)) {
            Ok(json) => json,
            Err(e) => {
                error!(session_id = %session_id, "Failed to serialize audio message: {}", e);
                continue;
            }
        };

        if chunk_count == 1 || chunk_count % 50 == 0 {
            info!(session_id = %session_id, chunk = chunk_count, "Sending audio chunk");
        }

        if let Err(e) = ws_sender.send(WsMessage::Text(json)).await {
            warn!(session_id = %session_id, "WebSocket send failed, closing outbound loop: {}", e);
            return;
        }
    }

    let _ = ws_sender.send(WsMessage::Close(None)).await;
    debug!(session_id = %session_id, chunks = chunk_count, "Outbound loop terminated");
}

/// Inbound loop: parse server frames and forward events in order
async fn inbound_loop(
    mut ws_receiver: SplitStream<WsStream>,
    event_tx: mpsc::Sender<TransportEvent>,
    protocol_errors: Arc<AtomicU64>,
    max_protocol_errors: u32,
    session_id: String,
) {
    let mut consecutive_errors: u32 = 0;

    let terminal = loop {
        let text = match ws_receiver.next().await {
            Some(Ok(WsMessage::Text(text))) => text,
            // The service sends JSON in binary frames too
            Some(Ok(WsMessage::Binary(data))) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => {
                    warn!(session_id = %session_id, "Skipping non-UTF-8 binary frame");
                    continue;
                }
            },
            Some(Ok(WsMessage::Close(frame))) => {
                info!(session_id = %session_id, close_frame = ?frame, "Live session closed by server");
                break TransportEvent::Closed;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                error!(session_id = %session_id, "Live WebSocket error: {}", e);
                break TransportEvent::Error(format!("WebSocket error: {}", e));
            }
            None => break TransportEvent::Closed,
        };

        let message = match parse_server_message(&text) {
            Ok(message) => {
                consecutive_errors = 0;
                message
            }
            Err(e) => {
                protocol_errors.fetch_add(1, Ordering::SeqCst);
                consecutive_errors += 1;
                warn!(session_id = %session_id, consecutive = consecutive_errors, "Dropping server message: {}", e);
                if consecutive_errors >= max_protocol_errors.max(1) {
                    break TransportEvent::Error(format!(
                        "{} consecutive malformed server messages",
                        consecutive_errors
                    ));
                }
                continue;
            }
        };

        for event in message.events {
            if event_tx.send(TransportEvent::Message(event)).await.is_err() {
                debug!(session_id = %session_id, "Event receiver dropped, closing inbound loop");
                return;
            }
        }
    };

    let _ = event_tx.send(terminal).await;
    debug!(session_id = %session_id, "Inbound loop terminated");
}
