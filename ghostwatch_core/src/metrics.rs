//! GhostWatch Metrics Module
//! ==========================
//!
//! Two kinds of numbers come out of the pipeline:
//! - **Fleet stats**: how much of the reported fleet is real vs. ghost
//!   (derived from a snapshot, shown in status bars)
//! - **Pipeline counters**: what the pipeline did (batches, parse failures,
//!   marker operations), logged on shutdown and exported by scenarios

use serde::Serialize;

// =============================================================================
// FLEET STATS
// =============================================================================

/// Real/ghost breakdown of one fleet snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FleetStats {
    /// Vehicles currently reported
    pub total: usize,
    /// Vehicles not flagged as ghosts
    pub active: usize,
    /// Vehicles flagged as ghosts
    pub ghosts: usize,
    /// `ghosts / total * 100`, one decimal; 0 for an empty fleet
    pub ghost_percentage: f64,
}

impl FleetStats {
    pub fn new(total: usize, ghosts: usize) -> Self {
        let ghosts = ghosts.min(total);
        let ghost_percentage = if total > 0 {
            ((ghosts as f64 / total as f64) * 1000.0).round() / 10.0
        } else {
            0.0
        };
        Self {
            total,
            active: total - ghosts,
            ghosts,
            ghost_percentage,
        }
    }
}

// =============================================================================
// PIPELINE COUNTERS
// =============================================================================

/// Counters accumulated by the runtime over its lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineMetrics {
    /// Full batches applied to the fleet
    pub batches_applied: u64,
    /// Single-vehicle updates applied
    pub updates_applied: u64,
    /// Payloads discarded as malformed
    pub parse_errors: u64,
    /// Connection losses observed
    pub disconnects: u64,
    /// Times the fleet was cleared by the disconnect policy
    pub fleet_clears: u64,
    /// Filter changes received from the UI
    pub filter_changes: u64,
    /// Render passes executed
    pub renders: u64,
    /// Markers created on the surface
    pub markers_added: u64,
    /// Markers updated in place
    pub markers_updated: u64,
    /// Markers removed from the surface
    pub markers_removed: u64,
}

impl PipelineMetrics {
    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "batches={} updates={} parse_errors={} disconnects={} renders={} markers(+{} ~{} -{})",
            self.batches_applied,
            self.updates_applied,
            self.parse_errors,
            self.disconnects,
            self.renders,
            self.markers_added,
            self.markers_updated,
            self.markers_removed,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fleet_stats_percentage() {
        let stats = FleetStats::new(8, 2);
        assert_eq!(stats.active, 6);
        assert_relative_eq!(stats.ghost_percentage, 25.0);

        // 1/3 rounds to one decimal
        let stats = FleetStats::new(3, 1);
        assert_relative_eq!(stats.ghost_percentage, 33.3);
    }

    #[test]
    fn test_fleet_stats_empty() {
        let stats = FleetStats::new(0, 0);
        assert_eq!(stats.total, 0);
        assert_relative_eq!(stats.ghost_percentage, 0.0);
    }

    #[test]
    fn test_metrics_summary() {
        let metrics = PipelineMetrics {
            batches_applied: 3,
            parse_errors: 1,
            markers_added: 2,
            ..Default::default()
        };
        let line = metrics.summary();
        assert!(line.contains("batches=3"));
        assert!(line.contains("parse_errors=1"));
        assert!(line.contains("+2"));
    }
}
