//! Simulated feed connection with fault injection.
//!
//! Server side of an in-process `ChannelTransport`, plus the faults a real
//! feed shows: payloads corrupted in transit and dropped connections. All
//! randomness comes from a seeded RNG so runs replay exactly.

use ghostwatch_env::{ChannelFeed, ChannelTransport, FeedError, SessionId};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::{debug, info};

/// Frames buffered between the simulated server and the transport.
const CHANNEL_CAPACITY: usize = 64;

/// What happened to one published payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Clean,
    Corrupted,
}

/// Counters kept by the simulated feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedStats {
    /// Payloads handed to the transport
    pub published: u64,
    /// Of those, corrupted in transit
    pub corrupted: u64,
    /// Connections dropped on purpose
    pub disconnects: u64,
    /// Connections opened
    pub sessions: u64,
}

/// Feed server with fault injection.
pub struct SimFeed {
    name: String,
    seed: u64,
    /// RNG for fault decisions only
    rng: ChaCha8Rng,
    /// Probability that a payload is truncated in transit (0.0 - 1.0)
    corrupt_rate: f64,
    /// Server half of the current connection
    feed: Option<ChannelFeed>,
    stats: FeedStats,
}

impl SimFeed {
    pub fn new(name: &str, seed: u64) -> Self {
        Self {
            name: name.to_string(),
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            corrupt_rate: 0.0,
            feed: None,
            stats: FeedStats::default(),
        }
    }

    /// Sets the corruption probability.
    pub fn with_corruption(mut self, rate: f64) -> Self {
        self.corrupt_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Opens a new connection and returns the client side of it.
    ///
    /// Any previous connection is abandoned without a disconnect frame.
    pub fn connect(&mut self) -> ChannelTransport {
        let (feed, transport) = ChannelTransport::pair(&self.name, CHANNEL_CAPACITY);
        let session = SessionId::from_seed(self.seed.wrapping_add(self.stats.sessions));
        self.stats.sessions += 1;
        self.feed = Some(feed);
        info!(feed = %self.name, session = %session, "Simulated feed connection opened");
        transport.with_session(session)
    }

    /// Publishes a payload, possibly corrupting it.
    pub async fn publish(&mut self, payload: impl Into<Vec<u8>>) -> Result<Delivery, FeedError> {
        let mut payload = payload.into();
        let corrupt = self.corrupt_rate > 0.0 && self.rng.gen_bool(self.corrupt_rate);
        if corrupt {
            // Cut mid-message; never valid JSON for an object or array
            payload.truncate(payload.len() / 2);
        }
        self.send(payload).await?;
        if corrupt {
            self.stats.corrupted += 1;
            debug!(feed = %self.name, "Payload corrupted in transit");
            Ok(Delivery::Corrupted)
        } else {
            Ok(Delivery::Clean)
        }
    }

    /// Publishes a payload exactly as given.
    pub async fn publish_raw(&mut self, payload: impl Into<Vec<u8>>) -> Result<(), FeedError> {
        self.send(payload.into()).await
    }

    /// Drops the current connection; the client sees a connection error.
    pub async fn drop_connection(&mut self, reason: &str) -> Result<(), FeedError> {
        let feed = self
            .feed
            .take()
            .ok_or_else(|| FeedError::closed("no open connection"))?;
        feed.disconnect(reason).await?;
        self.stats.disconnects += 1;
        info!(feed = %self.name, reason, "Simulated feed connection dropped");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.feed.as_ref().is_some_and(|f| !f.is_closed())
    }

    pub fn stats(&self) -> &FeedStats {
        &self.stats
    }

    async fn send(&mut self, payload: Vec<u8>) -> Result<(), FeedError> {
        let feed = self
            .feed
            .as_ref()
            .ok_or_else(|| FeedError::closed("no open connection"))?;
        feed.send_payload(payload).await?;
        self.stats.published += 1;
        Ok(())
    }
}
