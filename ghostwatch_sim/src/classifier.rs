//! Ghost classifier for the simulated feed.
//!
//! Stands in for the upstream detection service: the viewer never computes
//! ghost verdicts itself, but the simulated city needs someone to.
//!
//! Score = sum of triggered signals, ghost iff score >= 0.6:
//!
//! | Signal       | Condition                                              | Weight |
//! |--------------|--------------------------------------------------------|--------|
//! | `stale`      | no report for more than 20 s                           | 0.40   |
//! | `not_moving` | < 5 m travelled across the position window (>= 5 pts)  | 0.25   |
//! | `speed_drop` | latest speed < 30% of the moving average (>= 5 pts)    | 0.20   |

use crate::city::BusReport;
use ghostwatch_core::GeoPoint;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

const STALE_WEIGHT: f64 = 0.4;
const NOT_MOVING_WEIGHT: f64 = 0.25;
const SPEED_DROP_WEIGHT: f64 = 0.2;

/// Configuration for the GhostClassifier.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierConfig {
    /// Silence longer than this is stale (default: 20s)
    pub stale_after: Duration,

    /// Published positions kept per vehicle (default: 6)
    pub position_window: usize,

    /// Positions needed before `not_moving` can fire (default: 5)
    pub min_positions: usize,

    /// Total travel below this is "not moving" (default: 5 m)
    pub still_threshold_m: f64,

    /// Speed samples kept per vehicle (default: 60)
    pub speed_window: usize,

    /// Samples needed before `speed_drop` can fire (default: 5)
    pub min_speed_samples: usize,

    /// Latest/average ratio below which speed has dropped (default: 0.3)
    pub speed_drop_ratio: f64,

    /// Score at or above which a vehicle is a ghost (default: 0.6)
    pub ghost_threshold: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(20),
            position_window: 6,
            min_positions: 5,
            still_threshold_m: 5.0,
            speed_window: 60,
            min_speed_samples: 5,
            speed_drop_ratio: 0.3,
            ghost_threshold: 0.6,
        }
    }
}

/// A triggered detection signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Anomaly {
    Stale,
    NotMoving,
    SpeedDrop,
}

impl Anomaly {
    pub fn weight(&self) -> f64 {
        match self {
            Anomaly::Stale => STALE_WEIGHT,
            Anomaly::NotMoving => NOT_MOVING_WEIGHT,
            Anomaly::SpeedDrop => SPEED_DROP_WEIGHT,
        }
    }
}

/// Classification of one vehicle at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub score: f64,
    pub anomalies: Vec<Anomaly>,
    pub is_ghost: bool,
}

#[derive(Debug, Default)]
struct Track {
    positions: VecDeque<GeoPoint>,
    speeds: VecDeque<f64>,
    /// Time of the report already folded into `speeds`
    last_seen: Option<Duration>,
}

/// Per-vehicle history and scoring.
#[derive(Debug, Default)]
pub struct GhostClassifier {
    config: ClassifierConfig,
    tracks: HashMap<String, Track>,
}

impl GhostClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            tracks: HashMap::new(),
        }
    }

    /// Create a classifier with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ClassifierConfig::default())
    }

    /// Scores `report` (the vehicle's latest, possibly old, report) at `now`.
    ///
    /// Call once per publication: every call records the published position,
    /// and a report not seen before also records its speed.
    pub fn assess(&mut self, report: &BusReport, now: Duration) -> Verdict {
        let config = &self.config;
        let track = self.tracks.entry(report.id.clone()).or_default();

        track.positions.push_back(report.position);
        while track.positions.len() > config.position_window {
            track.positions.pop_front();
        }

        if track.last_seen != Some(report.at) {
            track.last_seen = Some(report.at);
            track.speeds.push_back(report.speed_kmh);
            while track.speeds.len() > config.speed_window {
                track.speeds.pop_front();
            }
        }

        let mut anomalies = Vec::new();

        if now.saturating_sub(report.at) > config.stale_after {
            anomalies.push(Anomaly::Stale);
        }

        if track.positions.len() >= config.min_positions {
            let travelled: f64 = track
                .positions
                .iter()
                .zip(track.positions.iter().skip(1))
                .map(|(a, b)| a.distance_m(b))
                .sum();
            if travelled < config.still_threshold_m {
                anomalies.push(Anomaly::NotMoving);
            }
        }

        if track.speeds.len() >= config.min_speed_samples {
            let avg = track.speeds.iter().sum::<f64>() / track.speeds.len() as f64;
            if avg > 0.0 && report.speed_kmh < avg * config.speed_drop_ratio {
                anomalies.push(Anomaly::SpeedDrop);
            }
        }

        let score: f64 = anomalies.iter().map(Anomaly::weight).sum::<f64>().min(1.0);
        Verdict {
            score,
            is_ghost: score >= config.ghost_threshold,
            anomalies,
        }
    }

    /// Drops a vehicle's history (e.g. it left the feed).
    pub fn forget(&mut self, id: &str) {
        self.tracks.remove(id);
    }

    pub fn tracked(&self) -> usize {
        self.tracks.len()
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn report(lat: f64, speed: f64, at_secs: u64) -> BusReport {
        BusReport {
            id: "B1".to_string(),
            route: "R1".to_string(),
            position: GeoPoint::new(lat, 77.59).unwrap(),
            speed_kmh: speed,
            at: Duration::from_secs(at_secs),
        }
    }

    #[test]
    fn test_moving_bus_is_real() {
        let mut classifier = GhostClassifier::with_defaults();
        for i in 0..10 {
            let verdict = classifier.assess(&report(12.97 + i as f64 * 0.001, 25.0, i * 5), Duration::from_secs(i * 5));
            assert!(verdict.anomalies.is_empty());
            assert!(!verdict.is_ghost);
        }
    }

    #[test]
    fn test_stale_alone_is_not_ghost() {
        let mut classifier = GhostClassifier::with_defaults();
        let verdict = classifier.assess(&report(12.97, 25.0, 0), Duration::from_secs(21));
        assert_eq!(verdict.anomalies, vec![Anomaly::Stale]);
        assert_relative_eq!(verdict.score, 0.4);
        assert!(!verdict.is_ghost);
    }

    #[test]
    fn test_stale_and_still_is_ghost() {
        let mut classifier = GhostClassifier::with_defaults();
        let last = report(12.97, 25.0, 0);
        let mut verdict = classifier.assess(&last, Duration::ZERO);
        for tick in 1..=5 {
            verdict = classifier.assess(&last, Duration::from_secs(tick * 5));
        }
        assert_eq!(verdict.anomalies, vec![Anomaly::Stale, Anomaly::NotMoving]);
        assert_relative_eq!(verdict.score, 0.65);
        assert!(verdict.is_ghost);
    }

    #[test]
    fn test_speed_drop() {
        let mut classifier = GhostClassifier::with_defaults();
        for i in 0..5 {
            classifier.assess(&report(12.97 + i as f64 * 0.001, 30.0, i), Duration::from_secs(i));
        }
        let verdict = classifier.assess(&report(12.98, 2.0, 6), Duration::from_secs(6));
        assert_eq!(verdict.anomalies, vec![Anomaly::SpeedDrop]);
        assert!(!verdict.is_ghost);
    }

    #[test]
    fn test_repeated_report_counts_speed_once() {
        let mut classifier = GhostClassifier::with_defaults();
        let same = report(12.97, 30.0, 0);
        for tick in 0..4 {
            classifier.assess(&same, Duration::from_secs(tick));
        }
        assert_eq!(classifier.tracks["B1"].speeds.len(), 1);
        assert_eq!(classifier.tracks["B1"].positions.len(), 4);

        classifier.forget("B1");
        assert_eq!(classifier.tracked(), 0);
    }
}
