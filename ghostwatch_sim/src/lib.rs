//! GhostWatch Simulation Harness
//!
//! Two things live here:
//!
//! - A **simulated city**: buses on three Bangalore routes, a stand-in for
//!   the upstream ghost classifier, and a feed server that broadcasts the
//!   classified fleet in the backend's wire format. The CLI shows it when no
//!   live feed is given.
//! - A **deterministic scenario runner**: the real ingestor/runtime/view
//!   pipeline driven payload by payload on a virtual clock, with faults
//!   injected by a seeded RNG and invariants checked after every step.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ScenarioRunner                         │
//! │                                                             │
//! │  BusSimulator ──► GhostClassifier ──► CityPublisher         │
//! │                                           │ JSON payloads   │
//! │                                      ┌────▼────┐            │
//! │                                      │ SimFeed │ corrupt /  │
//! │                                      └────┬────┘ disconnect │
//! │                                           │ ChannelTransport│
//! │  SimContext ─ virtual clock ─►  StreamIngestor ► FleetRuntime│
//! │                                                  │          │
//! │                                           MemorySurface     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use ghostwatch_sim::{ScenarioRunner, ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::City).await;
//! assert!(result.passed);
//! ```

mod context;
mod city;
mod classifier;
mod publisher;
mod network;
mod runner;
mod exporter;
mod log_surface;
pub mod scenarios;

pub use context::SimContext;
pub use city::{BusReport, BusSimulator, RouteSpec, BANGALORE_ROUTES, SLUGGISH_BUSES, UPDATE_PERIOD};
pub use classifier::{Anomaly, ClassifierConfig, GhostClassifier, Verdict};
pub use publisher::{default_period, serve_city, snapshot_payload, update_payload, CityPublisher, FeedRecord};
pub use network::{Delivery, FeedStats, SimFeed};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use exporter::{MarkerFrame, SimEvent, SimExport, SimFrame};
pub use log_surface::LogSurface;
pub use scenarios::ScenarioId;
