//! The simulated feed server: city + classifier -> wire payloads.
//!
//! Wire format matches what the real backend broadcasts:
//!
//! ```text
//! {"type":"snapshot","data":[{"vehicle_id":"B101","route_id":"R1","lat":..,"lon":..,
//!                             "speed":..,"ghost_score":..,"is_ghost":false}, ...]}
//! {"type":"bus.update","data":{...one record...}}
//! ```

use crate::city::{BusSimulator, UPDATE_PERIOD};
use crate::classifier::{ClassifierConfig, GhostClassifier};
use ghostwatch_env::{ChannelFeed, FeedContext};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// One vehicle as broadcast by the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedRecord {
    pub vehicle_id: String,
    pub route_id: String,
    pub lat: f64,
    pub lon: f64,
    pub speed: f64,
    pub ghost_score: f64,
    pub is_ghost: bool,
}

#[derive(Serialize)]
#[serde(tag = "type", content = "data")]
enum Broadcast<'a> {
    #[serde(rename = "snapshot")]
    Snapshot(&'a [FeedRecord]),
    #[serde(rename = "bus.update")]
    Update(&'a FeedRecord),
}

/// Serializes a full-fleet snapshot message.
pub fn snapshot_payload(records: &[FeedRecord]) -> Result<String, serde_json::Error> {
    serde_json::to_string(&Broadcast::Snapshot(records))
}

/// Serializes a single-vehicle update message.
pub fn update_payload(record: &FeedRecord) -> Result<String, serde_json::Error> {
    serde_json::to_string(&Broadcast::Update(record))
}

/// Runs the simulated city and classifies what it publishes.
pub struct CityPublisher {
    city: BusSimulator,
    classifier: GhostClassifier,
    /// Last published record per vehicle
    published: BTreeMap<String, FeedRecord>,
}

impl CityPublisher {
    pub fn new(physics_seed: u64) -> Self {
        Self::with_classifier(physics_seed, ClassifierConfig::default())
    }

    pub fn with_classifier(physics_seed: u64, config: ClassifierConfig) -> Self {
        Self {
            city: BusSimulator::new(physics_seed),
            classifier: GhostClassifier::new(config),
            published: BTreeMap::new(),
        }
    }

    /// Advances the city one period and returns the full classified fleet.
    pub fn tick(&mut self, now: Duration) -> Vec<FeedRecord> {
        self.city.step(now);

        let mut records = Vec::new();
        for report in self.city.published() {
            let verdict = self.classifier.assess(report, now);
            records.push(FeedRecord {
                vehicle_id: report.id.clone(),
                route_id: report.route.clone(),
                lat: report.position.lat,
                lon: report.position.lon,
                speed: report.speed_kmh,
                ghost_score: verdict.score,
                is_ghost: verdict.is_ghost,
            });
        }
        records
    }

    /// Records that differ from what was last returned by this method,
    /// and remembers `records` as the published state.
    pub fn changed_since_last(&mut self, records: &[FeedRecord]) -> Vec<FeedRecord> {
        let changed: Vec<FeedRecord> = records
            .iter()
            .filter(|r| self.published.get(&r.vehicle_id) != Some(*r))
            .cloned()
            .collect();
        self.published = records
            .iter()
            .map(|r| (r.vehicle_id.clone(), r.clone()))
            .collect();
        changed
    }

    /// Switches a bus on/off; an offline bus also loses its history.
    pub fn set_online(&mut self, id: &str, online: bool) -> bool {
        if !online {
            self.classifier.forget(id);
        }
        self.city.set_online(id, online)
    }

    pub fn city(&self) -> &BusSimulator {
        &self.city
    }
}

/// Publishes a snapshot every `period` of `context` time until the
/// subscriber goes away. The first snapshot goes out immediately.
pub async fn serve_city<Ctx: FeedContext>(
    mut publisher: CityPublisher,
    feed: ChannelFeed,
    context: Arc<Ctx>,
    period: Duration,
) {
    info!(period_secs = period.as_secs_f64(), "Simulated city feed started");

    loop {
        let records = publisher.tick(context.now());
        let ghosts = records.iter().filter(|r| r.is_ghost).count();

        match snapshot_payload(&records) {
            Ok(payload) => {
                if feed.send_payload(payload).await.is_err() {
                    info!("Subscriber gone; simulated city feed stopped");
                    return;
                }
                debug!(vehicles = records.len(), ghosts, "Snapshot published");
            }
            Err(e) => tracing::error!(error = %e, "Failed to serialize snapshot"),
        }

        context.sleep(period).await;
    }
}

/// Default period for `serve_city`.
pub fn default_period() -> Duration {
    UPDATE_PERIOD
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghostwatch_core::{parse_payload, FeedPayload};

    fn at(step: u64) -> Duration {
        UPDATE_PERIOD * step as u32
    }

    #[test]
    fn test_snapshot_payload_parses_as_batch() {
        let mut publisher = CityPublisher::new(42);
        let records = publisher.tick(at(0));
        assert_eq!(records.len(), 6); // sluggish buses haven't reported yet

        let payload = snapshot_payload(&records).unwrap();
        match parse_payload(payload.as_bytes()).unwrap() {
            FeedPayload::Snapshot(batch) => {
                assert_eq!(batch.len(), 6);
                assert_eq!(batch[0].id, "B101");
                assert_eq!(batch[0].route, "R1");
            }
            other => panic!("expected snapshot, got {:?}", other),
        }
    }

    #[test]
    fn test_update_payload_parses_as_update() {
        let mut publisher = CityPublisher::new(42);
        let records = publisher.tick(at(0));
        let payload = update_payload(&records[0]).unwrap();
        assert!(matches!(parse_payload(payload.as_bytes()), Ok(FeedPayload::Update(v)) if v.id == "B101"));
    }

    #[test]
    fn test_sluggish_buses_turn_ghost() {
        let mut publisher = CityPublisher::new(42);
        let mut ghost_ticks = Vec::new();
        for step in 0..20 {
            let records = publisher.tick(at(step));
            if records.iter().any(|r| r.vehicle_id == "B103" && r.is_ghost) {
                ghost_ticks.push(step);
            }
            // Regular buses never turn ghost
            assert!(!records.iter().any(|r| r.vehicle_id == "B101" && r.is_ghost));
        }
        assert_eq!(ghost_ticks, vec![14, 15, 16, 17]);
    }

    #[test]
    fn test_changed_since_last() {
        let mut publisher = CityPublisher::new(42);
        let first = publisher.tick(at(0));
        assert_eq!(publisher.changed_since_last(&first).len(), first.len());
        assert!(publisher.changed_since_last(&first).is_empty());

        let second = publisher.tick(at(1));
        assert_eq!(publisher.changed_since_last(&second).len(), second.len());
    }

    #[tokio::test]
    async fn test_serve_city_stops_when_subscriber_leaves() {
        let (feed, mut transport) = ghostwatch_env::ChannelTransport::pair("city", 4);
        let context = ghostwatch_env::TokioContext::shared();
        let server = tokio::spawn(serve_city(CityPublisher::new(1), feed, context, Duration::from_millis(5)));

        use ghostwatch_env::FeedTransport;
        transport.subscribe().await.unwrap();
        let first = transport.recv().await.unwrap().unwrap();
        assert!(first.as_text().unwrap().starts_with(r#"{"type":"snapshot""#));

        drop(transport);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_serve_city_paces_on_context_clock() {
        use ghostwatch_env::FeedTransport;

        let context = crate::context::SimContext::shared(9);
        let (feed, mut transport) = ghostwatch_env::ChannelTransport::pair("city", 1);
        let server = tokio::spawn(serve_city(CityPublisher::new(3), feed, Arc::clone(&context), at(1)));
        transport.subscribe().await.unwrap();

        // Same city, ticked by hand at 0, 1 and 2 periods
        let mut reference = CityPublisher::new(3);
        for step in 0..3 {
            let expected = snapshot_payload(&reference.tick(at(step))).unwrap();
            let received = transport.recv().await.unwrap().unwrap();
            assert_eq!(received.as_text(), Some(expected.as_str()), "snapshot {step}");
        }
        assert!(context.now() >= at(2));

        drop(transport);
        server.await.unwrap();
    }
}
