//! WebSocket feed transport (production).

use async_trait::async_trait;
use crate::error::FeedError;
use crate::transport::FeedTransport;
use crate::types::{FeedMessage, SessionId};
use futures_util::{SinkExt, StreamExt};
use std::time::{Duration, SystemTime};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default maximum accepted payload size (4 MiB).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

/// Configuration for a WebSocket feed connection.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Feed endpoint, e.g. `ws://localhost:8000/ws`
    pub url: String,

    /// Text frame sent once after connecting (None = feed pushes unprompted)
    pub subscribe_message: Option<String>,

    /// How long to wait for the TCP + WebSocket handshake
    pub connect_timeout: Duration,

    /// Larger payloads are rejected as a protocol error
    pub max_message_bytes: usize,
}

impl WebSocketConfig {
    /// Creates a config for the given URL with default limits.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            subscribe_message: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }

    /// Sets the subscribe frame.
    pub fn with_subscribe_message(mut self, message: impl Into<String>) -> Self {
        self.subscribe_message = Some(message.into());
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the payload size limit.
    pub fn with_max_message_bytes(mut self, limit: usize) -> Self {
        self.max_message_bytes = limit;
        self
    }
}

/// A feed subscription over a WebSocket.
///
/// The socket is acquired in `connect()` and released by `close()`, by a
/// terminal receive error, or on drop.
pub struct WebSocketTransport {
    config: WebSocketConfig,
    session: SessionId,
    stream: Option<WebSocketStream<MaybeTlsStream<TcpStream>>>,
}

impl WebSocketTransport {
    /// Opens the connection.
    pub async fn connect(config: WebSocketConfig) -> Result<Self, FeedError> {
        info!(url = %config.url, "Connecting to vehicle feed");

        let (stream, _response) =
            tokio::time::timeout(config.connect_timeout, connect_async(config.url.as_str()))
                .await
                .map_err(|_| FeedError::Timeout(config.connect_timeout.as_millis() as u64))?
                .map_err(|e| FeedError::connection(e.to_string()))?;

        let session = SessionId::new();
        info!(url = %config.url, session = %session, "Connected to vehicle feed");

        Ok(Self {
            config,
            session,
            stream: Some(stream),
        })
    }

    /// True while the socket is held.
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn stamp(payload: Vec<u8>) -> FeedMessage {
        let received_ms = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        FeedMessage::new(payload, received_ms)
    }
}

#[async_trait]
impl FeedTransport for WebSocketTransport {
    async fn subscribe(&mut self) -> Result<(), FeedError> {
        let Some(message) = self.config.subscribe_message.clone() else {
            return Ok(());
        };
        let ws = self
            .stream
            .as_mut()
            .ok_or_else(|| FeedError::closed("transport closed"))?;
        ws.send(Message::Text(message))
            .await
            .map_err(|e| FeedError::connection(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<FeedMessage>, FeedError> {
        let max_bytes = self.config.max_message_bytes;
        let ws = self
            .stream
            .as_mut()
            .ok_or_else(|| FeedError::closed("transport closed"))?;

        let result = loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    if text.len() > max_bytes {
                        return Err(FeedError::protocol(format!(
                            "payload of {} bytes exceeds limit of {}",
                            text.len(),
                            max_bytes
                        )));
                    }
                    break Ok(Some(Self::stamp(text.into_bytes())));
                }
                Some(Ok(Message::Binary(data))) => {
                    if data.len() > max_bytes {
                        return Err(FeedError::protocol(format!(
                            "payload of {} bytes exceeds limit of {}",
                            data.len(),
                            max_bytes
                        )));
                    }
                    break Ok(Some(Self::stamp(data)));
                }
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(e) = ws.send(Message::Pong(payload)).await {
                        warn!(error = %e, "Failed to answer ping");
                    }
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "closed by server".to_string());
                    info!(reason = %reason, "Vehicle feed closed by server");
                    break Err(FeedError::closed(reason));
                }
                Some(Err(e)) => break Err(FeedError::connection(e.to_string())),
                None => {
                    info!("Vehicle feed stream ended");
                    break Ok(None);
                }
            }
        };

        if !matches!(result, Ok(Some(_))) {
            // Terminal: drop the socket now rather than at teardown
            self.stream = None;
        }
        result
    }

    async fn close(&mut self) {
        if let Some(mut ws) = self.stream.take() {
            if let Err(e) = ws.close(None).await {
                debug!(error = %e, "Close handshake failed; socket dropped");
            }
            info!(session = %self.session, "Vehicle feed connection released");
        }
    }

    fn endpoint(&self) -> &str {
        &self.config.url
    }

    fn session_id(&self) -> SessionId {
        self.session
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if self.stream.is_some() {
            debug!(session = %self.session, "WebSocket transport dropped while open");
        }
    }
}
