//! Common types for the GhostWatch feed transports.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier for one logical feed subscription.
///
/// Tags log lines so that reconnects (a new transport, a new session) are
/// distinguishable in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Creates a new random SessionId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a deterministic SessionId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 chars for readability
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// One inbound message from the feed.
///
/// The transport does not interpret the payload; the ingestor in
/// `ghostwatch_core` turns it into a vehicle batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedMessage {
    /// The raw payload bytes (text frames are stored as UTF-8)
    pub payload: Vec<u8>,

    /// Wall-clock receive time, milliseconds since the Unix epoch
    pub received_ms: u64,
}

impl FeedMessage {
    /// Creates a new message from payload bytes.
    pub fn new(payload: impl Into<Vec<u8>>, received_ms: u64) -> Self {
        Self {
            payload: payload.into(),
            received_ms,
        }
    }

    /// Returns the payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Returns the payload as text, if it is valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}
