//! Feed transport abstraction.

use async_trait::async_trait;
use crate::error::FeedError;
use crate::types::{FeedMessage, SessionId};

/// An already-open, message-oriented, full-duplex connection to one feed
/// endpoint.
///
/// Connection setup, authentication, and reconnect policy belong to the
/// implementation; the pipeline only pulls messages and closes.
///
/// # Implementations
///
/// - **Production**: `WebSocketTransport`
/// - **Tests / simulation**: `ChannelTransport`, fed by a `ChannelFeed`
///
/// # Message Flow
///
/// ```text
/// Feed server              Transport                  Ingestor
///   |                          |                          |
///   |<-- subscribe frame ------|<-- subscribe() ----------|
///   |--- batch payload ------->|                          |
///   |                          |-- recv() -> message ---->|
///   |--- close --------------->|                          |
///   |                          |-- recv() -> Err(Closed)->|
/// ```
#[async_trait]
pub trait FeedTransport: Send + 'static {
    /// Sends the initial subscribe frame, if the endpoint needs one.
    async fn subscribe(&mut self) -> Result<(), FeedError>;

    /// Receives the next inbound message.
    ///
    /// # Returns
    /// * `Ok(Some(message))` - A payload arrived
    /// * `Ok(None)` - The stream ended in an orderly way
    /// * `Err(e)` where `e.is_terminal()` - The connection is gone
    /// * `Err(e)` otherwise - One frame was unusable; the stream continues
    ///
    /// # Cancellation
    /// Must be cancel-safe: the runtime polls it inside `tokio::select!`.
    async fn recv(&mut self) -> Result<Option<FeedMessage>, FeedError>;

    /// Releases the connection. Idempotent; later `recv()` calls fail with
    /// `FeedError::Closed`.
    async fn close(&mut self);

    /// Human-readable endpoint (URL or channel name) for logs.
    fn endpoint(&self) -> &str;

    /// Identifier of this subscription.
    fn session_id(&self) -> SessionId;
}
