//! GhostWatch Core - live transit map that tells real buses from ghosts
//!
//! A vehicle feed pushes complete fleet batches; each vehicle arrives already
//! classified as real or ghost. This crate keeps the map in sync with it:
//! 1. **Stream Ingestor**: decodes feed messages into validated batches
//! 2. **Fleet State Reconciler**: full-replace merge into the canonical fleet
//! 3. **Map View Controller**: filter + keyed marker diff onto a render surface
//!
//! `FleetRuntime` runs all three on one task.

pub mod vehicle;
pub mod fleet;
pub mod metrics;
pub mod ingestor;
pub mod reconciler;
pub mod filter;
pub mod view;
pub mod surface;
pub mod runtime;
pub mod config;

#[cfg(feature = "dashboard")]
pub mod dashboard;

// Re-export key types for convenience
pub use vehicle::{GeoPoint, PositionError, VehicleRecord, VehicleState};
pub use fleet::FleetState;
pub use metrics::{FleetStats, PipelineMetrics};
pub use ingestor::{parse_payload, FeedPayload, IngestError, IngestEvent, IngestStats, StreamIngestor};
pub use reconciler::{BatchSummary, DisconnectPolicy, FleetReconciler, ReconcilerConfig};
pub use filter::{filter_channel, DisplayFilter, FilterControl};
pub use view::{compute_visible, MapViewController, MarkerIcon, MarkerSpec, RenderDelta, RenderSurface, Viewport};
pub use surface::{MemorySurface, SurfaceOp};
pub use runtime::{FeedStatus, FleetRuntime, RuntimeConfig};
pub use config::{ConfigError, ViewerConfig};

#[cfg(feature = "dashboard")]
pub use dashboard::{terminal_channel, MapDashboard, TerminalSurface};
