//! Fleet Runtime - wires ingestor, reconciler and map view together.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        FleetRuntime                          │
//! │                                                              │
//! │  StreamIngestor ──IngestEvent──► FleetReconciler             │
//! │                                       │ Arc<FleetState>      │
//! │  watch<DisplayFilter> ────────────────┼──► MapViewController │
//! │                                       │          │           │
//! │  watch<FeedStatus> ◄── status ────────┘    RenderSurface     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! One task, one `select!` loop. A batch is reconciled and rendered before
//! the next message is pulled, so nothing here needs a lock.
//!
//! The step methods (`handle_event`, `set_filter`, `check_staleness`) are
//! public so a simulator can drive the runtime tick by tick on a virtual
//! clock; `run` is the same steps driven by real I/O.

use crate::filter::DisplayFilter;
use crate::fleet::FleetState;
use crate::ingestor::{IngestError, IngestEvent, StreamIngestor};
use crate::metrics::{FleetStats, PipelineMetrics};
use crate::reconciler::{FleetReconciler, ReconcilerConfig};
use crate::view::{MapViewController, RenderDelta, RenderSurface, Viewport};
use ghostwatch_env::{FeedContext, FeedTransport};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for a FleetRuntime.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Viewport handed to the surface at mount
    pub initial_viewport: Viewport,

    /// Reconciliation behavior
    pub reconciler: ReconcilerConfig,

    /// No batch for this long while connected marks the feed stale (default: 30s)
    pub stale_after: Duration,

    /// How often `run` checks staleness and the disconnect policy (default: 1s)
    pub stale_check_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            initial_viewport: Viewport::default(),
            reconciler: ReconcilerConfig::default(),
            stale_after: Duration::from_secs(30),
            stale_check_interval: Duration::from_secs(1),
        }
    }
}

impl RuntimeConfig {
    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.initial_viewport = viewport;
        self
    }

    pub fn with_reconciler(mut self, reconciler: ReconcilerConfig) -> Self {
        self.reconciler = reconciler;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }
}

// ============================================================================
// FEED STATUS
// ============================================================================

/// Health of the vehicle feed, as shown to the rider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedStatus {
    /// Subscribing; nothing received yet
    Connecting,
    /// Batches arriving
    Live,
    /// Connected, but no batch within `stale_after`
    Stale,
    /// Connection lost; the map shows last-known data
    Disconnected,
}

impl FeedStatus {
    /// True if the displayed fleet may not reflect reality.
    pub fn is_degraded(&self) -> bool {
        matches!(self, FeedStatus::Stale | FeedStatus::Disconnected)
    }
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FeedStatus::Connecting => "connecting",
            FeedStatus::Live => "live",
            FeedStatus::Stale => "stale",
            FeedStatus::Disconnected => "disconnected",
        };
        f.write_str(label)
    }
}

// ============================================================================
// FLEET RUNTIME
// ============================================================================

/// The ghost-vehicle map pipeline.
///
/// Generic over the context and the rendering surface, so the same runtime
/// drives a terminal map in production and an in-memory surface under
/// simulation.
pub struct FleetRuntime<Ctx, S>
where
    Ctx: FeedContext,
    S: RenderSurface,
{
    context: Arc<Ctx>,
    config: RuntimeConfig,
    reconciler: FleetReconciler,
    view: MapViewController<S>,
    filter: DisplayFilter,
    metrics: PipelineMetrics,
    status_tx: watch::Sender<FeedStatus>,

    /// Context time of the last applied batch or update
    last_data_at: Option<Duration>,

    /// Context time the current outage began
    disconnected_at: Option<Duration>,

    /// Context time the current subscription was established
    connected_at: Option<Duration>,
}

impl<Ctx, S> FleetRuntime<Ctx, S>
where
    Ctx: FeedContext,
    S: RenderSurface,
{
    pub fn new(context: Arc<Ctx>, surface: S, config: RuntimeConfig) -> Self {
        let (status_tx, _) = watch::channel(FeedStatus::Connecting);
        Self {
            view: MapViewController::new(surface, config.initial_viewport),
            reconciler: FleetReconciler::new(config.reconciler.clone()),
            context,
            config,
            filter: DisplayFilter::default(),
            metrics: PipelineMetrics::default(),
            status_tx,
            last_data_at: None,
            disconnected_at: None,
            connected_at: None,
        }
    }

    /// Mounts the map and draws the current fleet.
    pub fn start(&mut self, filter: DisplayFilter) -> RenderDelta {
        self.filter = filter;
        self.render()
    }

    /// Applies one ingest event and re-renders if the fleet changed.
    pub fn handle_event(&mut self, event: IngestEvent) -> RenderDelta {
        match event {
            IngestEvent::Connected { session } => {
                self.connected_at = Some(self.context.now());
                self.disconnected_at = None;
                self.set_status(FeedStatus::Connecting);
                info!(session = %session, retained = self.reconciler.fleet().len(), "Feed connected");
            }
            IngestEvent::Snapshot(batch) => {
                let summary = self.reconciler.apply_batch(batch);
                self.metrics.batches_applied += 1;
                self.mark_live();
                if summary.changed() {
                    return self.render();
                }
            }
            IngestEvent::Update(vehicle) => {
                let changed = self.reconciler.apply_update(vehicle);
                self.metrics.updates_applied += 1;
                self.mark_live();
                if changed {
                    return self.render();
                }
            }
            IngestEvent::ParseFailed(e) => {
                self.metrics.parse_errors += 1;
                warn!(error = %e, vehicles = self.reconciler.fleet().len(), "Discarding malformed payload");
            }
            IngestEvent::Disconnected(e) => {
                self.metrics.disconnects += 1;
                let now = self.context.now();
                self.connected_at = None;
                self.disconnected_at.get_or_insert(now);
                self.set_status(FeedStatus::Disconnected);
                warn!(error = %e, retained = self.reconciler.fleet().len(), "Feed disconnected");
                return self.apply_disconnect_policy(now);
            }
        }
        RenderDelta::default()
    }

    /// Replaces the display filter. Re-renders immediately on a change.
    pub fn set_filter(&mut self, filter: DisplayFilter) -> RenderDelta {
        if filter == self.filter {
            return RenderDelta::default();
        }
        self.filter = filter;
        self.metrics.filter_changes += 1;
        info!(hide_ghosts = filter.hide_ghosts, "Display filter changed");
        self.render()
    }

    /// Periodic housekeeping: staleness and delayed disconnect clearing.
    pub fn check_staleness(&mut self) -> RenderDelta {
        let now = self.context.now();

        if self.disconnected_at.is_some() {
            return self.apply_disconnect_policy(now);
        }

        // Quiet since the later of the last batch and the (re)connect
        let status = *self.status_tx.borrow();
        let since = self.last_data_at.max(self.connected_at);
        if let (FeedStatus::Live | FeedStatus::Connecting, Some(since)) = (status, since) {
            let quiet = now.saturating_sub(since);
            if quiet >= self.config.stale_after {
                warn!(quiet_secs = quiet.as_secs_f64(), %status, "Feed is stale");
                self.set_status(FeedStatus::Stale);
            }
        }
        RenderDelta::default()
    }

    /// Subscribes and processes events until shutdown.
    ///
    /// The ingestor is closed on every exit path. A disconnect does not end
    /// the loop: the last-known fleet stays on the map and the filter stays
    /// live until `shutdown` fires (or its sender is dropped).
    pub async fn run<T: FeedTransport>(
        &mut self,
        ingestor: &mut StreamIngestor<T>,
        mut filter_rx: watch::Receiver<DisplayFilter>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), IngestError> {
        let initial_filter = *filter_rx.borrow_and_update();
        self.start(initial_filter);
        self.set_status(FeedStatus::Connecting);

        if let Err(e) = ingestor.subscribe().await {
            self.metrics.disconnects += 1;
            self.disconnected_at.get_or_insert(self.context.now());
            self.set_status(FeedStatus::Disconnected);
            return Err(e);
        }

        let mut housekeeping = tokio::time::interval(self.config.stale_check_interval);
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut filter_open = true;

        info!(endpoint = %ingestor.endpoint(), "Fleet runtime started");

        while !*shutdown.borrow() {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }

                changed = filter_rx.changed(), if filter_open => {
                    match changed {
                        Ok(()) => {
                            let filter = *filter_rx.borrow_and_update();
                            self.set_filter(filter);
                        }
                        // UI went away; keep the last filter
                        Err(_) => filter_open = false,
                    }
                }

                event = ingestor.next_event(), if !ingestor.is_closed() => {
                    self.handle_event(event);
                }

                _ = housekeeping.tick() => {
                    self.check_staleness();
                }
            }
        }

        ingestor.close().await;
        info!(
            summary = %self.metrics.summary(),
            ingest_bytes = ingestor.stats().bytes,
            "Fleet runtime stopped"
        );
        Ok(())
    }

    fn mark_live(&mut self) {
        self.last_data_at = Some(self.context.now());
        self.disconnected_at = None;
        self.set_status(FeedStatus::Live);
    }

    fn apply_disconnect_policy(&mut self, now: Duration) -> RenderDelta {
        let outage = self
            .disconnected_at
            .map(|t| now.saturating_sub(t))
            .unwrap_or_default();
        if self.reconciler.handle_disconnect(outage) {
            self.metrics.fleet_clears += 1;
            return self.render();
        }
        RenderDelta::default()
    }

    fn set_status(&self, status: FeedStatus) {
        self.status_tx.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
    }

    fn render(&mut self) -> RenderDelta {
        let snapshot = self.reconciler.snapshot();
        let delta = self.view.render(&snapshot, &self.filter);
        self.metrics.renders += 1;
        self.metrics.markers_added += delta.added as u64;
        self.metrics.markers_updated += delta.updated as u64;
        self.metrics.markers_removed += delta.removed as u64;
        delta
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Current fleet snapshot.
    pub fn fleet(&self) -> Arc<FleetState> {
        self.reconciler.snapshot()
    }

    pub fn stats(&self) -> FleetStats {
        self.reconciler.fleet().stats()
    }

    pub fn filter(&self) -> DisplayFilter {
        self.filter
    }

    pub fn status(&self) -> FeedStatus {
        *self.status_tx.borrow()
    }

    /// Receiver for feed-status changes (status bar, degraded banner).
    pub fn status_receiver(&self) -> watch::Receiver<FeedStatus> {
        self.status_tx.subscribe()
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn generation(&self) -> u64 {
        self.reconciler.generation()
    }

    pub fn view(&self) -> &MapViewController<S> {
        &self.view
    }

    pub fn surface(&self) -> &S {
        self.view.surface()
    }

    pub fn surface_mut(&mut self) -> &mut S {
        self.view.surface_mut()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}
