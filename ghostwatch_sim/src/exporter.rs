//! JSON exporter for scenario replays.
//!
//! Each frame is what the map showed at one instant: the markers on the
//! surface, the filter, the feed status and the fleet breakdown.

use ghostwatch_core::{FeedStatus, FleetStats, MarkerIcon, MemorySurface};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// A single frame of scenario output.
#[derive(Debug, Clone, Serialize)]
pub struct SimFrame {
    /// Simulation time in seconds
    pub time_sec: f64,

    pub status: FeedStatus,

    pub hide_ghosts: bool,

    /// Reconciled fleet (before filtering)
    pub stats: FleetStats,

    /// Markers on the surface, in id order
    pub markers: Vec<MarkerFrame>,

    /// Events (disconnects, corrupted payloads, filter toggles, ...)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SimEvent>,
}

/// One marker as drawn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerFrame {
    pub id: String,
    pub route: String,
    pub lat: f64,
    pub lon: f64,
    pub icon: MarkerIcon,
}

impl MarkerFrame {
    /// Captures every marker currently on the surface.
    pub fn capture(surface: &MemorySurface) -> Vec<MarkerFrame> {
        surface
            .markers()
            .iter()
            .map(|(id, m)| MarkerFrame {
                id: id.clone(),
                route: m.route.clone(),
                lat: m.position.lat,
                lon: m.position.lon,
                icon: m.icon,
            })
            .collect()
    }
}

/// Simulation event.
#[derive(Debug, Clone, Serialize)]
pub struct SimEvent {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl SimEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: None,
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: Some("warn".to_string()),
        }
    }
}

/// Complete scenario export.
#[derive(Debug, Clone, Serialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            passed: false,
            failure_reason: None,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
