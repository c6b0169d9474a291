//! GhostWatch Environment Abstraction Layer
//!
//! This crate isolates everything the pipeline needs from the outside world
//! behind two small traits, so the same pipeline runs against a live feed
//! and inside the deterministic scenario runner:
//!
//! - **Time** (`FeedContext`): `now()`, `system_time()`, `sleep()`
//! - **Feed I/O** (`FeedTransport`): `subscribe()`, `recv()`, `close()`
//!
//! # Example
//!
//! ```ignore
//! use ghostwatch_env::{FeedTransport, WebSocketConfig, WebSocketTransport};
//!
//! let mut transport = WebSocketTransport::connect(WebSocketConfig::new(url)).await?;
//! transport.subscribe().await?;
//! while let Some(message) = transport.recv().await? {
//!     handle_payload(&message.payload);
//! }
//! transport.close().await;
//! ```

mod context;
mod transport;
mod types;
mod error;
mod tokio_impl;
mod channel;
mod websocket;

pub use context::FeedContext;
pub use transport::FeedTransport;
pub use types::{FeedMessage, SessionId};
pub use error::FeedError;
pub use tokio_impl::TokioContext;
pub use channel::{ChannelFeed, ChannelTransport};
pub use websocket::{WebSocketConfig, WebSocketTransport, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_MESSAGE_BYTES};
