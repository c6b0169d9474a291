//! Scenario runner - drives the real pipeline through scripted feeds.
//!
//! Every scenario runs the production `StreamIngestor` + `FleetRuntime` over
//! an in-process channel, on a virtual clock, against a `MemorySurface`.
//! Payloads are published one at a time and pulled immediately, so a run is
//! a pure function of its seed.

use crate::city::UPDATE_PERIOD;
use crate::context::SimContext;
use crate::exporter::{MarkerFrame, SimEvent, SimExport, SimFrame};
use crate::network::{Delivery, FeedStats, SimFeed};
use crate::publisher::{snapshot_payload, update_payload, CityPublisher};
use crate::scenarios::ScenarioId;

use ghostwatch_core::{
    compute_visible, DisconnectPolicy, DisplayFilter, FeedStatus, FleetRuntime, GeoPoint, IngestEvent,
    MarkerSpec, MemorySurface, PipelineMetrics, ReconcilerConfig, RenderDelta, RuntimeConfig, StreamIngestor,
    Viewport,
};
use ghostwatch_env::{ChannelTransport, FeedContext};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const TWO_BUSES: &str = r#"[
    {"id":"1","route":"B1","lat":40.71,"lon":-74.00,"is_ghost":false},
    {"id":"2","route":"B2","lat":40.72,"lon":-74.01,"is_ghost":true}
]"#;

const BUS_ONE_ONLY: &str = r#"[{"id":"1","route":"B1","lat":40.71,"lon":-74.00,"is_ghost":false}]"#;

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total ticks executed
    pub total_ticks: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Vehicles in the fleet at the end
    pub final_vehicle_count: usize,

    /// First failed check, if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    /// Runtime counters
    pub pipeline: PipelineMetrics,

    /// Simulated feed counters
    pub feed: FeedStats,

    /// Assertions evaluated
    pub invariant_checks: u64,

    /// Most ghosts in the fleet at once
    pub max_ghosts: usize,

    /// Frames with at least one ghost in the fleet
    pub ghost_frames: u64,

    /// Surface calls (mount, upsert, remove) issued over the run
    pub surface_ops: u64,
}

/// Runs pipeline scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Virtual time per tick
    tick: Duration,

    /// Maximum duration in seconds (city scenario)
    max_duration_secs: f64,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            tick: UPDATE_PERIOD,
            max_duration_secs: 120.0,
        }
    }

    /// Sets the virtual time per tick.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick.max(Duration::from_millis(1));
        self
    }

    /// Sets the maximum duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs.max(0.0);
        self
    }

    /// Runs a scenario and returns the result.
    pub async fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.run_with_export(scenario).await.0
    }

    /// Runs a scenario and also returns its frame-by-frame export.
    pub async fn run_with_export(&self, scenario: ScenarioId) -> (ScenarioResult, SimExport) {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        match scenario {
            ScenarioId::Baseline => self.run_baseline().await,
            ScenarioId::MalformedPayload => self.run_malformed_payload().await,
            ScenarioId::ConnectionLoss => self.run_connection_loss().await,
            ScenarioId::ViewportHandoff => self.run_viewport_handoff().await,
            ScenarioId::City => self.run_city().await,
        }
    }

    /// GW-001: Baseline - two buses, filter toggle, dropout.
    async fn run_baseline(&self) -> (ScenarioResult, SimExport) {
        info!("GW-001: Baseline - two buses, toggle, dropout");
        let mut h = Harness::new(ScenarioId::Baseline, self.seed, RuntimeConfig::default(), 0.0).await;

        h.advance(self.tick);
        h.deliver(TWO_BUSES).await;
        h.check(h.shown() == ["1", "2"], "first batch renders both buses");
        h.check(
            h.marker_icon_is("2", ghostwatch_core::MarkerIcon::Ghost),
            "bus 2 drawn with the ghost icon",
        );
        h.check_render();
        h.frame();

        // No batch between these two steps
        let batches = h.runtime.metrics().batches_applied;
        h.set_hide_ghosts(true);
        h.check(h.shown() == ["1"], "hiding ghosts leaves only bus 1");
        h.check(
            h.runtime.metrics().batches_applied == batches,
            "filter change re-rendered without a batch",
        );
        h.check_render();
        h.frame();

        h.advance(self.tick);
        h.deliver(BUS_ONE_ONLY).await;
        h.check(!h.runtime.fleet().contains("2"), "bus 2 dropped from the fleet");
        h.check(h.shown() == ["1"], "bus 2 marker gone");
        h.check_render();
        h.frame();

        h.set_hide_ghosts(false);
        h.check(h.shown() == ["1"], "showing ghosts again does not resurrect bus 2");
        h.check_render();
        h.frame();

        info!("✓ Baseline complete: {} checks", h.metrics.invariant_checks);
        h.finish()
    }

    /// GW-002: MalformedPayload - bad batches never reach the map.
    async fn run_malformed_payload(&self) -> (ScenarioResult, SimExport) {
        info!("GW-002: MalformedPayload - discarded batches");
        let mut h = Harness::new(ScenarioId::MalformedPayload, self.seed, RuntimeConfig::default(), 0.0).await;

        h.advance(self.tick);
        h.deliver(TWO_BUSES).await;
        h.frame();

        let malformed: &[(&str, &str)] = &[
            ("truncated", r#"[{"id":"1","route":"B1","lat":40.7"#),
            ("missing field", r#"[{"id":"1","route":"B1","lat":40.71,"is_ghost":false}]"#),
            ("wrong type", r#"[{"id":"1","route":"B1","lat":"north","lon":-74.0,"is_ghost":false}]"#),
            ("latitude out of range", r#"[{"id":"1","route":"B1","lat":91.0,"lon":-74.0,"is_ghost":false}]"#),
            (
                "duplicate id",
                r#"[{"id":"1","route":"B1","lat":40.71,"lon":-74.0,"is_ghost":false},
                    {"id":"1","route":"B1","lat":40.75,"lon":-74.0,"is_ghost":false}]"#,
            ),
            ("unknown envelope", r#"{"type":"bus.delete","data":{"vehicle_id":"1"}}"#),
            ("not json", "GARBAGE"),
            ("empty", ""),
        ];

        for (label, payload) in malformed {
            let before = h.runtime.fleet();
            let generation = h.runtime.generation();

            h.advance(self.tick);
            h.deliver(payload).await;

            h.check(*h.runtime.fleet() == *before, &format!("{label}: fleet unchanged"));
            h.check(h.runtime.generation() == generation, &format!("{label}: no new generation"));
            h.check(!h.ingestor.is_closed(), &format!("{label}: subscription still open"));
            h.check_render();
            h.frame();
        }

        let parse_errors = h.runtime.metrics().parse_errors;
        h.check(
            parse_errors == malformed.len() as u64,
            &format!("{} parse errors counted, got {}", malformed.len(), parse_errors),
        );

        // A good update after all that still applies
        h.advance(self.tick);
        h.deliver(r#"{"type":"bus.update","data":{"vehicle_id":"1","route_id":"B1","lat":40.73,"lon":-74.0,"is_ghost":false}}"#)
            .await;
        h.check(
            h.runtime.fleet().get("1").is_some_and(|v| v.position.lat == 40.73),
            "valid update applied after malformed payloads",
        );
        h.check(h.runtime.status() == FeedStatus::Live, "feed still live");
        h.check_render();
        h.frame();

        info!("✓ MalformedPayload complete: {} payloads discarded", parse_errors);
        h.finish()
    }

    /// GW-003: ConnectionLoss - retain during outage, clear after 30 s.
    async fn run_connection_loss(&self) -> (ScenarioResult, SimExport) {
        info!("GW-003: ConnectionLoss - disconnect policy");
        let clear_after = Duration::from_secs(30);
        let config = RuntimeConfig::default().with_reconciler(ReconcilerConfig {
            disconnect_policy: DisconnectPolicy::ClearAfter(clear_after),
            ..ReconcilerConfig::default()
        });
        let mut h = Harness::new(ScenarioId::ConnectionLoss, self.seed, config, 0.0).await;

        h.advance(self.tick);
        h.deliver(TWO_BUSES).await;
        h.frame();

        h.drop_connection("upstream restart").await;
        h.check(h.runtime.status() == FeedStatus::Disconnected, "status shows disconnect");
        h.check(h.ingestor.is_closed(), "transport released on disconnect");
        h.check(h.runtime.fleet().len() == 2, "last-known fleet retained");
        h.check(h.shown() == ["1", "2"], "last-known fleet still displayed");
        h.frame();

        // Map stays interactive while disconnected
        h.set_hide_ghosts(true);
        h.check(h.shown() == ["1"], "filter works while disconnected");
        h.set_hide_ghosts(false);

        let mut waited = Duration::ZERO;
        while waited + self.tick < clear_after {
            h.advance(self.tick);
            waited += self.tick;
            h.check(h.runtime.fleet().len() == 2, &format!("fleet retained after {}s", waited.as_secs()));
            h.frame();
        }

        while waited < clear_after {
            h.advance(self.tick);
            waited += self.tick;
        }
        h.check(h.runtime.fleet().is_empty(), "fleet cleared once the outage reached 30s");
        h.check(h.runtime.surface().marker_count() == 0, "map emptied with the fleet");
        h.frame();

        h.reconnect().await;
        h.advance(self.tick);
        h.deliver(BUS_ONE_ONLY).await;
        h.check(h.runtime.status() == FeedStatus::Live, "live again after reconnect");
        h.check(h.shown() == ["1"], "fresh batch displayed after reconnect");
        h.check_render();
        h.frame();

        info!("✓ ConnectionLoss complete: cleared after {}s outage", waited.as_secs());
        h.finish()
    }

    /// GW-004: ViewportHandoff - mount once, user owns pan/zoom.
    async fn run_viewport_handoff(&self) -> (ScenarioResult, SimExport) {
        info!("GW-004: ViewportHandoff - one-shot viewport");
        let initial = Viewport::new(GeoPoint { lat: 40.7128, lon: -74.0060 }, 12.0);
        let config = RuntimeConfig::default().with_viewport(initial);
        let mut h = Harness::new(ScenarioId::ViewportHandoff, self.seed, config, 0.0).await;

        h.check(h.runtime.surface().viewport() == Some(initial), "mounted at the initial viewport");

        let user_view = Viewport::new(GeoPoint { lat: 40.7580, lon: -73.9855 }, 15.0);
        h.runtime.surface_mut().pan_to(user_view);

        h.advance(self.tick);
        h.deliver(TWO_BUSES).await;
        h.set_hide_ghosts(true);
        h.set_hide_ghosts(false);
        h.drop_connection("network blip").await;
        h.reconnect().await;
        h.advance(self.tick);
        h.deliver(BUS_ONE_ONLY).await;
        h.check_render();
        h.frame();

        let surface = h.runtime.surface();
        let mounts = surface.mount_count();
        let viewport = surface.viewport();
        h.check(mounts == 1, &format!("exactly one mount command, got {mounts}"));
        h.check(viewport == Some(user_view), "user pan/zoom untouched by renders");

        info!("✓ ViewportHandoff complete");
        h.finish()
    }

    /// GW-005: City - simulated fleet with faults, invariants every tick.
    ///
    /// Even ticks publish a full snapshot, odd ticks publish `bus.update`s
    /// for what changed. 5% of payloads are corrupted, the feed drops for
    /// three ticks mid-run, and B202 is switched off for the middle third.
    async fn run_city(&self) -> (ScenarioResult, SimExport) {
        info!("GW-005: City - Bangalore fleet with faults");
        let mut h = Harness::new(ScenarioId::City, self.seed, RuntimeConfig::default(), 0.05).await;
        let mut publisher = CityPublisher::new(self.seed.wrapping_mul(0x9e3779b97f4a7c15));

        let ticks = ((self.max_duration_secs / self.tick.as_secs_f64()) as u64).max(1);
        let outage = (ticks / 2)..(ticks / 2 + 3);
        let offline_at = ticks / 3;
        let online_at = 2 * ticks / 3;
        let mut need_snapshot = true;

        for tick in 0..ticks {
            h.advance(self.tick);
            let now = h.context.now();

            if tick == offline_at {
                publisher.set_online("B202", false);
                h.event(SimEvent::info("B202 switched off"));
            }
            if tick == online_at {
                publisher.set_online("B202", true);
                h.event(SimEvent::info("B202 back in service"));
            }

            let records = publisher.tick(now);

            if outage.contains(&tick) {
                if tick == outage.start {
                    let shown_before = h.shown();
                    h.drop_connection("simulated outage").await;
                    h.check(h.runtime.status() == FeedStatus::Disconnected, "outage surfaced as disconnect");
                    h.check(h.shown() == shown_before, "map keeps last-known fleet during outage");
                }
                h.check_render();
                h.frame();
                continue;
            }
            if tick == outage.end {
                h.reconnect().await;
                need_snapshot = true;
            }

            if need_snapshot || tick % 2 == 0 {
                let payload = match snapshot_payload(&records) {
                    Ok(p) => p,
                    Err(e) => {
                        h.fail(format!("snapshot serialization failed: {e}"));
                        break;
                    }
                };
                publisher.changed_since_last(&records);
                let generation = h.runtime.generation();
                match h.publish(payload).await {
                    Some(Delivery::Clean) => {
                        need_snapshot = false;
                        let fleet = h.runtime.fleet();
                        let matches = fleet.len() == records.len()
                            && records.iter().all(|r| {
                                fleet.get(&r.vehicle_id).is_some_and(|v| v.is_ghost == r.is_ghost)
                            });
                        h.check(matches, &format!("tick {tick}: fleet equals published snapshot"));
                    }
                    Some(Delivery::Corrupted) => {
                        h.check(
                            h.runtime.generation() == generation,
                            &format!("tick {tick}: corrupted snapshot ignored"),
                        );
                    }
                    None => break,
                }
            } else {
                for record in publisher.changed_since_last(&records) {
                    let payload = match update_payload(&record) {
                        Ok(p) => p,
                        Err(e) => {
                            h.fail(format!("update serialization failed: {e}"));
                            break;
                        }
                    };
                    if h.publish(payload).await.is_none() {
                        break;
                    }
                }
            }

            if tick % 7 == 6 {
                let hide = !h.runtime.filter().hide_ghosts;
                h.set_hide_ghosts(hide);
            }

            h.check_render();
            h.frame();
        }

        if ticks >= 20 {
            h.check(h.metrics.max_ghosts > 0, "sluggish buses were shown as ghosts");
        }

        info!(
            "✓ City complete: {} ticks, max {} ghosts, {} corrupted payloads",
            ticks,
            h.metrics.max_ghosts,
            h.feed.stats().corrupted
        );
        h.finish()
    }
}

// ============================================================================
// HARNESS
// ============================================================================

/// One pipeline under test plus its simulated feed.
struct Harness {
    scenario: ScenarioId,
    seed: u64,
    context: Arc<SimContext>,
    runtime: FleetRuntime<SimContext, MemorySurface>,
    feed: SimFeed,
    ingestor: StreamIngestor<ChannelTransport>,
    export: SimExport,
    pending_events: Vec<SimEvent>,
    metrics: ScenarioMetrics,
    ticks: u64,
    failure: Option<String>,
}

impl Harness {
    async fn new(scenario: ScenarioId, seed: u64, config: RuntimeConfig, corrupt_rate: f64) -> Self {
        let context = SimContext::shared(seed);
        let mut feed = SimFeed::new(scenario.name(), seed).with_corruption(corrupt_rate);
        let transport = feed
            .connect()
            .with_context(Arc::clone(&context) as Arc<dyn FeedContext>);

        let mut runtime = FleetRuntime::new(Arc::clone(&context), MemorySurface::new(), config);
        runtime.start(DisplayFilter::default());

        let mut harness = Self {
            scenario,
            seed,
            context,
            runtime,
            feed,
            ingestor: StreamIngestor::new(transport),
            export: SimExport::new(scenario.name(), seed),
            pending_events: Vec::new(),
            metrics: ScenarioMetrics::default(),
            ticks: 0,
            failure: None,
        };
        harness.subscribe().await;
        harness
    }

    /// Advances the clock one tick and runs housekeeping.
    fn advance(&mut self, dt: Duration) {
        self.context.advance_time(dt);
        self.ticks += 1;
        let delta = self.runtime.check_staleness();
        if delta.removed > 0 {
            self.event(SimEvent::warn(format!("fleet cleared, {} markers removed", delta.removed)));
        }
    }

    /// Publishes `payload` unmodified and processes it.
    async fn deliver(&mut self, payload: &str) -> RenderDelta {
        if let Err(e) = self.feed.publish_raw(payload).await {
            self.fail(format!("publish failed: {e}"));
            return RenderDelta::default();
        }
        self.pull().await
    }

    /// Publishes through the fault injector and processes the result.
    async fn publish(&mut self, payload: String) -> Option<Delivery> {
        match self.feed.publish(payload).await {
            Ok(delivery) => {
                if delivery == Delivery::Corrupted {
                    self.event(SimEvent::warn("payload corrupted in transit"));
                }
                self.pull().await;
                Some(delivery)
            }
            Err(e) => {
                self.fail(format!("publish failed: {e}"));
                None
            }
        }
    }

    async fn pull(&mut self) -> RenderDelta {
        let event = self.ingestor.next_event().await;
        match &event {
            IngestEvent::Connected { session } => debug!(%session, "Scenario feed connected"),
            IngestEvent::ParseFailed(e) => debug!(error = %e, "Scenario payload rejected"),
            IngestEvent::Disconnected(e) => self.event(SimEvent::warn(format!("disconnected: {e}"))),
            _ => {}
        }
        self.runtime.handle_event(event)
    }

    async fn drop_connection(&mut self, reason: &str) {
        if let Err(e) = self.feed.drop_connection(reason).await {
            self.fail(format!("drop_connection failed: {e}"));
            return;
        }
        self.pull().await;
    }

    async fn reconnect(&mut self) {
        let transport = self
            .feed
            .connect()
            .with_context(Arc::clone(&self.context) as Arc<dyn FeedContext>);
        self.ingestor = StreamIngestor::new(transport);
        self.subscribe().await;
        self.event(SimEvent::info("reconnected"));
    }

    /// Subscribes and hands the `Connected` event to the runtime.
    async fn subscribe(&mut self) {
        if let Err(e) = self.ingestor.subscribe().await {
            self.fail(format!("subscribe failed: {e}"));
            return;
        }
        self.pull().await;
        self.check(
            self.runtime.status() == FeedStatus::Connecting,
            "subscription reported as connecting",
        );
    }

    fn set_hide_ghosts(&mut self, hide: bool) {
        self.runtime.set_filter(DisplayFilter::new(hide));
        self.event(SimEvent::info(if hide { "ghosts hidden" } else { "ghosts shown" }));
    }

    fn shown(&self) -> Vec<String> {
        self.runtime.surface().marker_ids().map(str::to_string).collect()
    }

    fn marker_icon_is(&self, id: &str, icon: ghostwatch_core::MarkerIcon) -> bool {
        self.runtime.surface().marker(id).is_some_and(|m| m.icon == icon)
    }

    fn check(&mut self, ok: bool, what: &str) {
        self.metrics.invariant_checks += 1;
        if !ok {
            self.fail(format!("check failed: {what}"));
        }
    }

    /// Surface shows exactly the visible set, each marker current.
    fn check_render(&mut self) {
        let mismatch = self.render_mismatch();
        self.metrics.invariant_checks += 1;
        if let Some(reason) = mismatch {
            self.fail(reason);
        }
    }

    fn render_mismatch(&self) -> Option<String> {
        let fleet = self.runtime.fleet();
        let filter = self.runtime.filter();
        let surface = self.runtime.surface();

        let visible = compute_visible(&fleet, &filter);
        let expected: Vec<&str> = visible.iter().map(|v| v.id.as_str()).collect();
        let shown: Vec<&str> = surface.marker_ids().collect();
        if shown != expected {
            return Some(format!("markers {:?} != visible {:?}", shown, expected));
        }
        if let Some(v) = visible
            .iter()
            .find(|v| surface.marker(&v.id) != Some(&MarkerSpec::for_vehicle(v)))
        {
            return Some(format!("marker {} out of date", v.id));
        }
        if surface.mount_count() != 1 {
            return Some(format!("map mounted {} times", surface.mount_count()));
        }
        None
    }

    fn event(&mut self, event: SimEvent) {
        self.pending_events.push(event);
    }

    fn fail(&mut self, reason: String) {
        warn!(scenario = %self.scenario, %reason, "Scenario check failed");
        if self.failure.is_none() {
            self.failure = Some(reason);
        }
    }

    /// Records what the map shows right now and drains the surface log.
    fn frame(&mut self) {
        let ops = self.runtime.surface_mut().take_ops();
        self.metrics.surface_ops += ops.len() as u64;
        let stats = self.runtime.stats();
        self.metrics.max_ghosts = self.metrics.max_ghosts.max(stats.ghosts);
        if stats.ghosts > 0 {
            self.metrics.ghost_frames += 1;
        }
        let frame = SimFrame {
            time_sec: self.context.now().as_secs_f64(),
            status: self.runtime.status(),
            hide_ghosts: self.runtime.filter().hide_ghosts,
            stats,
            markers: MarkerFrame::capture(self.runtime.surface()),
            events: std::mem::take(&mut self.pending_events),
        };
        self.export.add_frame(frame);
    }

    fn finish(mut self) -> (ScenarioResult, SimExport) {
        self.metrics.pipeline = self.runtime.metrics().clone();
        self.metrics.feed = self.feed.stats().clone();
        let passed = self.failure.is_none();
        self.export.finalize(passed, self.failure.clone());

        let result = ScenarioResult {
            scenario: self.scenario,
            seed: self.seed,
            passed,
            total_ticks: self.ticks,
            final_time_secs: self.context.now().as_secs_f64(),
            final_vehicle_count: self.runtime.fleet().len(),
            failure_reason: self.failure,
            metrics: self.metrics,
        };
        (result, self.export)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghostwatch_core::SurfaceOp;

    #[tokio::test]
    async fn test_harness_starts_connecting_then_goes_live() {
        let mut h = Harness::new(ScenarioId::Baseline, 1, RuntimeConfig::default(), 0.0).await;
        assert_eq!(h.runtime.status(), FeedStatus::Connecting);
        assert!(h.failure.is_none());

        h.deliver(TWO_BUSES).await;
        assert_eq!(h.runtime.status(), FeedStatus::Live);
        assert_eq!(h.shown(), ["1", "2"]);
    }

    #[tokio::test]
    async fn test_frame_drains_surface_log() {
        let mut h = Harness::new(ScenarioId::Baseline, 1, RuntimeConfig::default(), 0.0).await;
        h.deliver(TWO_BUSES).await;
        assert!(matches!(h.runtime.surface().ops().first(), Some(SurfaceOp::Mount(_))));
        h.frame();
        assert!(h.runtime.surface().ops().is_empty());
        assert_eq!(h.metrics.surface_ops, 3);

        // Nothing new to draw: the log stays empty across frames
        h.deliver(TWO_BUSES).await;
        h.frame();
        h.frame();
        assert!(h.runtime.surface().ops().is_empty());
        assert_eq!(h.metrics.surface_ops, 3);

        h.deliver(BUS_ONE_ONLY).await;
        assert_eq!(h.runtime.surface().ops(), &[SurfaceOp::Remove("2".to_string())]);
        h.frame();
        assert_eq!(h.metrics.surface_ops, 4);
        assert_eq!(h.runtime.surface().mount_count(), 1);
    }

    #[tokio::test]
    async fn test_baseline_scenario() {
        let result = ScenarioRunner::new(42).run(ScenarioId::Baseline).await;
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.final_vehicle_count, 1);
        assert_eq!(result.metrics.pipeline.filter_changes, 2);
    }

    #[tokio::test]
    async fn test_malformed_payload_scenario() {
        let result = ScenarioRunner::new(42).run(ScenarioId::MalformedPayload).await;
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.pipeline.parse_errors, 8);
        assert_eq!(result.metrics.pipeline.updates_applied, 1);
    }

    #[tokio::test]
    async fn test_connection_loss_scenario() {
        let result = ScenarioRunner::new(42).run(ScenarioId::ConnectionLoss).await;
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.pipeline.fleet_clears, 1);
        assert_eq!(result.metrics.feed.sessions, 2);
    }

    #[tokio::test]
    async fn test_viewport_handoff_scenario() {
        let result = ScenarioRunner::new(42).run(ScenarioId::ViewportHandoff).await;
        assert!(result.passed, "{:?}", result.failure_reason);
    }

    #[tokio::test]
    async fn test_city_scenario() {
        let (result, export) = ScenarioRunner::new(42)
            .with_duration(120.0)
            .run_with_export(ScenarioId::City)
            .await;
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(export.frames.len(), 24);
        assert!(result.metrics.max_ghosts > 0);
        assert_eq!(result.metrics.pipeline.disconnects, 1);
        assert!(result.metrics.invariant_checks > 24);
        assert!(result.metrics.surface_ops > 0);
    }

    #[tokio::test]
    async fn test_city_is_deterministic() {
        let runner = ScenarioRunner::new(7).with_duration(60.0);
        let a = runner.run(ScenarioId::City).await;
        let b = runner.run(ScenarioId::City).await;
        assert_eq!(a.metrics.feed, b.metrics.feed);
        assert_eq!(a.metrics.pipeline, b.metrics.pipeline);
        assert_eq!(a.final_vehicle_count, b.final_vehicle_count);
    }
}
