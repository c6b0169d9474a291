//! Error types for the GhostWatch feed transports.

use thiserror::Error;

/// Errors raised by a feed transport.
///
/// Payload parsing is not a transport concern; see `ghostwatch_core::IngestError`.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Connection could not be established or failed mid-stream
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The peer closed the stream (or the local side already closed it)
    #[error("Connection closed: {0}")]
    Closed(String),

    /// Frame-level protocol violation (bad handshake, oversized frame, ...)
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl FeedError {
    /// Creates a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::ConnectionError(msg.into())
    }

    /// Creates a closed-stream error.
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::Closed(reason.into())
    }

    /// Creates a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolError(msg.into())
    }

    /// True if the stream is gone and will not yield further messages.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ConnectionError(_) | Self::Closed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FeedError::connection("refused");
        assert_eq!(err.to_string(), "Connection error: refused");

        let err = FeedError::Timeout(250);
        assert_eq!(err.to_string(), "Timeout after 250ms");
    }

    #[test]
    fn test_terminal_classification() {
        assert!(FeedError::closed("bye").is_terminal());
        assert!(FeedError::connection("reset").is_terminal());
        assert!(!FeedError::protocol("bad frame").is_terminal());
        assert!(!FeedError::Timeout(10).is_terminal());
    }
}
