//! The Stream Ingestor - feed messages in, validated vehicle batches out.
//!
//! Owns one subscription (one `FeedTransport`). Every message is parsed as a
//! whole: either the entire batch is handed on, or the message is rejected
//! with a `ParseError` and nothing downstream changes.
//!
//! Accepted payloads:
//! 1. A bare JSON array of vehicle records (a full batch)
//! 2. `{"type": "snapshot", "data": [...]}` (a full batch)
//! 3. `{"type": "bus.update", "data": {...}}` (a single-vehicle upsert)

use crate::vehicle::{VehicleRecord, VehicleState};
use ghostwatch_env::{FeedError, FeedTransport, SessionId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info, warn};

// ============================================================================
// ERRORS & EVENTS
// ============================================================================

/// Ingest failures. Neither is fatal to the pipeline.
#[derive(Debug, Error)]
pub enum IngestError {
    /// One payload was malformed and has been discarded
    #[error("Parse error: {0}")]
    ParseError(String),

    /// The stream terminated or could not be established
    #[error("Connection error: {0}")]
    ConnectionError(#[from] FeedError),
}

impl IngestError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }
}

/// A decoded payload.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedPayload {
    /// Complete set of currently reporting vehicles
    Snapshot(Vec<VehicleState>),
    /// One vehicle's new state
    Update(VehicleState),
}

/// What the ingestor hands to the runtime for each received message.
///
/// `Connected` and `Disconnected` are the lifecycle hooks. `Connected` is the
/// first event after a successful `subscribe()`; `Disconnected` is emitted
/// once the transport has been released.
#[derive(Debug)]
pub enum IngestEvent {
    Connected { session: SessionId },
    Snapshot(Vec<VehicleState>),
    Update(VehicleState),
    ParseFailed(IngestError),
    Disconnected(IngestError),
}

// ============================================================================
// PAYLOAD PARSING
// ============================================================================

#[derive(Deserialize)]
#[serde(tag = "type", content = "data")]
enum Envelope {
    #[serde(rename = "snapshot")]
    Snapshot(Vec<VehicleRecord>),
    #[serde(rename = "bus.update")]
    Update(VehicleRecord),
}

/// Parses one message payload.
///
/// A batch is rejected whole if any record is malformed, has an invalid
/// position, or repeats an id already seen in the same batch.
pub fn parse_payload(payload: &[u8]) -> Result<FeedPayload, IngestError> {
    match payload.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'[') => {
            let records: Vec<VehicleRecord> = serde_json::from_slice(payload)
                .map_err(|e| IngestError::parse(format!("invalid batch: {}", e)))?;
            Ok(FeedPayload::Snapshot(validate_batch(records)?))
        }
        Some(b'{') => {
            let envelope: Envelope = serde_json::from_slice(payload)
                .map_err(|e| IngestError::parse(format!("invalid envelope: {}", e)))?;
            match envelope {
                Envelope::Snapshot(records) => Ok(FeedPayload::Snapshot(validate_batch(records)?)),
                Envelope::Update(record) => Ok(FeedPayload::Update(validate_record(record)?)),
            }
        }
        Some(_) => Err(IngestError::parse(
            "payload is neither a JSON array nor an envelope object",
        )),
        None => Err(IngestError::parse("empty payload")),
    }
}

fn validate_record(record: VehicleRecord) -> Result<VehicleState, IngestError> {
    let id = record.id.clone();
    VehicleState::try_from(record)
        .map_err(|e| IngestError::parse(format!("vehicle {}: {}", id, e)))
}

fn validate_batch(records: Vec<VehicleRecord>) -> Result<Vec<VehicleState>, IngestError> {
    let mut seen = HashSet::with_capacity(records.len());
    let mut batch = Vec::with_capacity(records.len());
    for record in records {
        if !seen.insert(record.id.clone()) {
            return Err(IngestError::parse(format!(
                "duplicate vehicle id {:?} in batch",
                record.id
            )));
        }
        batch.push(validate_record(record)?);
    }
    Ok(batch)
}

// ============================================================================
// STREAM INGESTOR
// ============================================================================

/// Per-subscription counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub messages: u64,
    pub bytes: u64,
    pub snapshots: u64,
    pub updates: u64,
    pub parse_errors: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubscriptionState {
    Idle,
    Subscribed,
    Closed,
}

/// Pulls messages from a transport and turns them into `IngestEvent`s.
pub struct StreamIngestor<T: FeedTransport> {
    transport: T,
    state: SubscriptionState,
    /// Subscribed, `Connected` not yet handed out
    announce: bool,
    stats: IngestStats,
}

impl<T: FeedTransport> StreamIngestor<T> {
    /// Wraps an already-open transport.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            state: SubscriptionState::Idle,
            announce: false,
            stats: IngestStats::default(),
        }
    }

    /// Sends the subscribe frame. On failure the transport is released.
    pub async fn subscribe(&mut self) -> Result<(), IngestError> {
        match self.state {
            SubscriptionState::Subscribed => return Ok(()),
            SubscriptionState::Closed => {
                return Err(FeedError::closed("subscription already closed").into())
            }
            SubscriptionState::Idle => {}
        }

        if let Err(e) = self.transport.subscribe().await {
            self.close().await;
            return Err(e.into());
        }
        self.state = SubscriptionState::Subscribed;
        self.announce = true;
        info!(
            endpoint = %self.transport.endpoint(),
            session = %self.transport.session_id(),
            "Subscribed to vehicle feed"
        );
        Ok(())
    }

    /// Waits for the next message and decodes it.
    ///
    /// Cancel-safe as long as the transport's `recv()` is.
    pub async fn next_event(&mut self) -> IngestEvent {
        if self.state == SubscriptionState::Closed {
            return IngestEvent::Disconnected(FeedError::closed("subscription closed").into());
        }
        if self.announce {
            self.announce = false;
            return IngestEvent::Connected {
                session: self.transport.session_id(),
            };
        }

        match self.transport.recv().await {
            Ok(Some(message)) => {
                self.stats.messages += 1;
                self.stats.bytes += message.size() as u64;
                match parse_payload(&message.payload) {
                    Ok(FeedPayload::Snapshot(batch)) => {
                        self.stats.snapshots += 1;
                        debug!(vehicles = batch.len(), "Batch received");
                        IngestEvent::Snapshot(batch)
                    }
                    Ok(FeedPayload::Update(vehicle)) => {
                        self.stats.updates += 1;
                        IngestEvent::Update(vehicle)
                    }
                    Err(e) => {
                        self.stats.parse_errors += 1;
                        IngestEvent::ParseFailed(e)
                    }
                }
            }
            Ok(None) => {
                self.close().await;
                IngestEvent::Disconnected(FeedError::closed("stream ended").into())
            }
            Err(e) if e.is_terminal() => {
                warn!(error = %e, "Vehicle feed disconnected");
                self.close().await;
                IngestEvent::Disconnected(e.into())
            }
            Err(e) => {
                self.stats.parse_errors += 1;
                IngestEvent::ParseFailed(IngestError::parse(e.to_string()))
            }
        }
    }

    /// Releases the transport. Idempotent.
    pub async fn close(&mut self) {
        if self.state != SubscriptionState::Closed {
            self.state = SubscriptionState::Closed;
            self.transport.close().await;
            debug!(session = %self.transport.session_id(), "Subscription closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == SubscriptionState::Closed
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    pub fn session_id(&self) -> SessionId {
        self.transport.session_id()
    }

    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghostwatch_env::ChannelTransport;

    const TWO_BUSES: &str = r#"[
        {"id":"1","route":"B1","lat":40.71,"lon":-74.00,"is_ghost":false},
        {"id":"2","route":"B2","lat":40.72,"lon":-74.01,"is_ghost":true}
    ]"#;

    #[test]
    fn test_parse_bare_batch() {
        let FeedPayload::Snapshot(batch) = parse_payload(TWO_BUSES.as_bytes()).unwrap() else {
            panic!("expected snapshot");
        };
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].id, "1");
        assert!(!batch[0].is_ghost);
        assert_eq!(batch[1].route, "B2");
        assert!(batch[1].is_ghost);
    }

    #[test]
    fn test_parse_empty_batch() {
        assert_eq!(parse_payload(b" [] ").unwrap(), FeedPayload::Snapshot(vec![]));
    }

    #[test]
    fn test_parse_snapshot_envelope() {
        let payload = format!(r#"{{"type":"snapshot","data":{}}}"#, TWO_BUSES);
        match parse_payload(payload.as_bytes()).unwrap() {
            FeedPayload::Snapshot(batch) => assert_eq!(batch.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_update_envelope() {
        let payload = r#"{"type":"bus.update","data":{"vehicle_id":"B101","route_id":"R1","lat":12.97,"lon":77.59,"is_ghost":false,"speed":21.5}}"#;
        match parse_payload(payload.as_bytes()).unwrap() {
            FeedPayload::Update(vehicle) => assert_eq!(vehicle.id, "B101"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(parse_payload(b""), Err(IngestError::ParseError(_))));
        assert!(matches!(parse_payload(b"not json"), Err(IngestError::ParseError(_))));
        assert!(matches!(parse_payload(b"[{\"id\":\"1\"}"), Err(IngestError::ParseError(_))));
        assert!(matches!(
            parse_payload(br#"{"type":"unknown","data":[]}"#),
            Err(IngestError::ParseError(_))
        ));
        // Wrong field type
        assert!(parse_payload(
            br#"[{"id":"1","route":"B1","lat":"north","lon":-74.0,"is_ghost":false}]"#
        )
        .is_err());
    }

    #[test]
    fn test_parse_rejects_whole_batch_on_bad_position() {
        let payload = br#"[
            {"id":"1","route":"B1","lat":40.71,"lon":-74.00,"is_ghost":false},
            {"id":"2","route":"B2","lat":400.0,"lon":-74.01,"is_ghost":false}
        ]"#;
        let err = parse_payload(payload).unwrap_err();
        assert!(err.to_string().contains("vehicle 2"));
    }

    #[test]
    fn test_parse_rejects_duplicate_ids() {
        let payload = br#"[
            {"id":"1","route":"B1","lat":40.71,"lon":-74.00,"is_ghost":false},
            {"id":"1","route":"B1","lat":40.72,"lon":-74.00,"is_ghost":false}
        ]"#;
        let err = parse_payload(payload).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[tokio::test]
    async fn test_ingestor_survives_parse_error() {
        let (feed, transport) = ChannelTransport::pair("test", 8);
        let mut ingestor = StreamIngestor::new(transport);
        ingestor.subscribe().await.unwrap();
        assert!(feed.is_subscribed());
        assert!(matches!(ingestor.next_event().await, IngestEvent::Connected { .. }));

        feed.send_payload("{garbage").await.unwrap();
        feed.send_payload(TWO_BUSES).await.unwrap();

        assert!(matches!(ingestor.next_event().await, IngestEvent::ParseFailed(_)));
        match ingestor.next_event().await {
            IngestEvent::Snapshot(batch) => assert_eq!(batch.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(ingestor.stats().messages, 2);
        assert_eq!(ingestor.stats().parse_errors, 1);
        assert_eq!(ingestor.stats().snapshots, 1);
        assert!(!ingestor.is_closed());
    }

    #[tokio::test]
    async fn test_ingestor_disconnect_releases_transport() {
        let (feed, transport) = ChannelTransport::pair("test", 8);
        let mut ingestor = StreamIngestor::new(transport);
        ingestor.subscribe().await.unwrap();
        assert!(matches!(ingestor.next_event().await, IngestEvent::Connected { .. }));

        feed.disconnect("server restart").await.unwrap();
        assert!(matches!(
            ingestor.next_event().await,
            IngestEvent::Disconnected(IngestError::ConnectionError(_))
        ));
        assert!(ingestor.is_closed());
        assert!(feed.is_closed());

        // Further polling keeps reporting the disconnect without touching the transport
        assert!(matches!(ingestor.next_event().await, IngestEvent::Disconnected(_)));
    }

    #[tokio::test]
    async fn test_connected_is_first_event_after_subscribe() {
        let (feed, transport) = ChannelTransport::pair("test", 8);
        let session = transport.session_id();
        let mut ingestor = StreamIngestor::new(transport);
        ingestor.subscribe().await.unwrap();
        feed.send_payload(TWO_BUSES).await.unwrap();

        match ingestor.next_event().await {
            IngestEvent::Connected { session: s } => assert_eq!(s, session),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(ingestor.next_event().await, IngestEvent::Snapshot(_)));

        // Subscribing again is a no-op and does not re-announce
        ingestor.subscribe().await.unwrap();
        feed.send_payload(TWO_BUSES).await.unwrap();
        assert!(matches!(ingestor.next_event().await, IngestEvent::Snapshot(_)));
    }

    #[tokio::test]
    async fn test_ingestor_stream_end_is_disconnect() {
        let (feed, transport) = ChannelTransport::pair("test", 8);
        let mut ingestor = StreamIngestor::new(transport);
        drop(feed);
        assert!(matches!(ingestor.next_event().await, IngestEvent::Disconnected(_)));
        assert!(ingestor.is_closed());
    }

    #[tokio::test]
    async fn test_ingestor_close_is_idempotent() {
        let (feed, transport) = ChannelTransport::pair("test", 8);
        let mut ingestor = StreamIngestor::new(transport);
        ingestor.close().await;
        ingestor.close().await;
        assert!(feed.is_closed());
        assert!(ingestor.subscribe().await.is_err());
    }
}
