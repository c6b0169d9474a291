//! In-process feed transport backed by a tokio channel.
//!
//! The sending half (`ChannelFeed`) plays the role of the feed server; the
//! receiving half (`ChannelTransport`) is handed to the ingestor. Used by the
//! simulated city, the scenario runner, and tests.

use async_trait::async_trait;
use crate::context::FeedContext;
use crate::error::FeedError;
use crate::transport::FeedTransport;
use crate::types::{FeedMessage, SessionId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;

/// A frame travelling from the feed side to the transport.
#[derive(Debug, Clone)]
enum Frame {
    Payload(Vec<u8>),
    Disconnect(String),
}

/// Flags shared between both halves.
#[derive(Debug, Default)]
struct Shared {
    subscribed: AtomicBool,
    closed: AtomicBool,
}

/// Feed-server side of an in-process channel.
#[derive(Clone)]
pub struct ChannelFeed {
    tx: mpsc::Sender<Frame>,
    shared: Arc<Shared>,
}

impl ChannelFeed {
    /// Queues one payload.
    pub async fn send_payload(&self, payload: impl Into<Vec<u8>>) -> Result<(), FeedError> {
        self.send(Frame::Payload(payload.into())).await
    }

    /// Simulates the connection dropping. The transport reports a
    /// `ConnectionError` once it has drained the frames queued before this.
    pub async fn disconnect(&self, reason: impl Into<String>) -> Result<(), FeedError> {
        self.send(Frame::Disconnect(reason.into())).await
    }

    /// True once the transport subscribed.
    pub fn is_subscribed(&self) -> bool {
        self.shared.subscribed.load(Ordering::SeqCst)
    }

    /// True once the transport released the connection (close or drop).
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst) || self.tx.is_closed()
    }

    async fn send(&self, frame: Frame) -> Result<(), FeedError> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| FeedError::closed("Channel closed"))
    }
}

/// Receiving half, implementing `FeedTransport`.
pub struct ChannelTransport {
    session: SessionId,
    endpoint: String,
    rx: mpsc::Receiver<Frame>,
    shared: Arc<Shared>,
    context: Option<Arc<dyn FeedContext>>,
}

impl ChannelTransport {
    /// Creates a connected feed/transport pair with the given buffer size.
    pub fn pair(name: &str, capacity: usize) -> (ChannelFeed, ChannelTransport) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let shared = Arc::new(Shared::default());
        let feed = ChannelFeed {
            tx,
            shared: Arc::clone(&shared),
        };
        let transport = ChannelTransport {
            session: SessionId::new(),
            endpoint: format!("channel://{}", name),
            rx,
            shared,
            context: None,
        };
        (feed, transport)
    }

    /// Stamps received messages using the given clock instead of the system clock.
    pub fn with_context(mut self, context: Arc<dyn FeedContext>) -> Self {
        self.context = Some(context);
        self
    }

    /// Uses a fixed session id (deterministic logs in simulation).
    pub fn with_session(mut self, session: SessionId) -> Self {
        self.session = session;
        self
    }

    fn now_ms(&self) -> u64 {
        match &self.context {
            Some(ctx) => ctx.unix_millis(),
            None => SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
        }
    }

    fn release(&mut self) {
        self.rx.close();
        self.shared.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl FeedTransport for ChannelTransport {
    async fn subscribe(&mut self) -> Result<(), FeedError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(FeedError::closed("transport closed"));
        }
        self.shared.subscribed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<FeedMessage>, FeedError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(FeedError::closed("transport closed"));
        }
        match self.rx.recv().await {
            Some(Frame::Payload(payload)) => Ok(Some(FeedMessage::new(payload, self.now_ms()))),
            Some(Frame::Disconnect(reason)) => {
                self.release();
                Err(FeedError::connection(reason))
            }
            None => {
                self.release();
                Ok(None)
            }
        }
    }

    async fn close(&mut self) {
        self.release();
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn session_id(&self) -> SessionId {
        self.session
    }
}

impl Drop for ChannelTransport {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_delivers_in_order() {
        let (feed, mut transport) = ChannelTransport::pair("test", 8);
        transport.subscribe().await.unwrap();
        assert!(feed.is_subscribed());

        feed.send_payload("first").await.unwrap();
        feed.send_payload("second").await.unwrap();

        let a = transport.recv().await.unwrap().unwrap();
        let b = transport.recv().await.unwrap().unwrap();
        assert_eq!(a.as_text(), Some("first"));
        assert_eq!(b.as_text(), Some("second"));
    }

    #[tokio::test]
    async fn test_disconnect_is_terminal() {
        let (feed, mut transport) = ChannelTransport::pair("test", 8);
        feed.send_payload("[]").await.unwrap();
        feed.disconnect("server restart").await.unwrap();

        assert!(transport.recv().await.unwrap().is_some());
        let err = transport.recv().await.unwrap_err();
        assert!(err.is_terminal());
        assert!(feed.is_closed());
    }

    #[tokio::test]
    async fn test_sender_drop_ends_stream() {
        let (feed, mut transport) = ChannelTransport::pair("test", 8);
        drop(feed);
        assert!(transport.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_releases_and_rejects_sends() {
        let (feed, mut transport) = ChannelTransport::pair("test", 8);
        transport.close().await;
        transport.close().await; // idempotent

        assert!(feed.is_closed());
        assert!(feed.send_payload("late").await.is_err());
        assert!(matches!(transport.recv().await, Err(FeedError::Closed(_))));
    }

    #[tokio::test]
    async fn test_drop_marks_closed() {
        let (feed, transport) = ChannelTransport::pair("test", 8);
        drop(transport);
        assert!(feed.is_closed());
    }
}
