//! The Fleet State Reconciler - sole owner and writer of the FleetState.
//!
//! Each batch replaces the fleet wholesale: the fleet afterwards holds exactly
//! the vehicles in the batch, so a vehicle that stops reporting disappears
//! with the next batch instead of lingering at its last position. Batches are
//! applied in the order they are handed over; the last one applied wins.
//!
//! Readers get `Arc<FleetState>` snapshots. A snapshot never changes after
//! it is taken; the next batch writes into a fresh copy if a reader still
//! holds the old one.

use crate::fleet::FleetState;
use crate::vehicle::VehicleState;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// What to do with the fleet when the feed connection is lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisconnectPolicy {
    /// Keep showing the last-known fleet (default)
    #[default]
    Retain,
    /// Empty the fleet as soon as the disconnect is observed
    ClearImmediately,
    /// Empty the fleet once the outage has lasted this long
    ClearAfter(Duration),
}

/// Configuration for the FleetReconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Consecutive batches a vehicle may be missing from before it is
    /// dropped (default: 1 = pure full-replace)
    pub absence_tolerance: u32,

    /// Fleet handling on connection loss (default: Retain)
    pub disconnect_policy: DisconnectPolicy,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            absence_tolerance: 1,
            disconnect_policy: DisconnectPolicy::Retain,
        }
    }
}

/// Outcome of one `apply_batch`, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Ids not previously in the fleet
    pub added: usize,
    /// Ids whose state changed
    pub updated: usize,
    /// Ids re-reported with identical state
    pub unchanged: usize,
    /// Ids dropped because the batch omitted them
    pub removed: usize,
    /// Ids omitted by the batch but kept under the absence tolerance
    pub retained: usize,
}

impl BatchSummary {
    /// True if the batch altered the fleet.
    pub fn changed(&self) -> bool {
        self.added + self.updated + self.removed > 0
    }
}

// ============================================================================
// FLEET RECONCILER
// ============================================================================

/// Owns the canonical FleetState.
pub struct FleetReconciler {
    /// Current fleet; replaced copy-on-write
    fleet: Arc<FleetState>,

    /// Consecutive misses for vehicles kept under the absence tolerance
    absences: HashMap<String, u32>,

    /// Bumped on every change to the fleet
    generation: u64,

    config: ReconcilerConfig,
}

impl FleetReconciler {
    /// Creates a reconciler with an empty fleet.
    pub fn new(config: ReconcilerConfig) -> Self {
        Self {
            fleet: Arc::new(FleetState::new()),
            absences: HashMap::new(),
            generation: 0,
            config,
        }
    }

    /// Create a reconciler with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ReconcilerConfig::default())
    }

    /// Replaces the fleet with the vehicles in `batch`.
    ///
    /// The batch is expected to carry each id at most once (the ingestor
    /// rejects batches that don't); if an id repeats anyway, its last entry
    /// wins and the id is counted once in the summary.
    pub fn apply_batch(&mut self, batch: Vec<VehicleState>) -> BatchSummary {
        let tolerance = self.config.absence_tolerance.max(1);
        let mut summary = BatchSummary::default();

        let mut latest: HashMap<String, VehicleState> = HashMap::with_capacity(batch.len());
        for vehicle in batch {
            latest.insert(vehicle.id.clone(), vehicle);
        }

        let absent: Vec<String> = self
            .fleet
            .ids()
            .filter(|id| !latest.contains_key(*id))
            .map(str::to_string)
            .collect();

        let fleet = Arc::make_mut(&mut self.fleet);

        for id in absent {
            let misses = self.absences.entry(id.clone()).or_insert(0);
            *misses += 1;
            if *misses >= tolerance {
                self.absences.remove(&id);
                fleet.remove(&id);
                summary.removed += 1;
            } else {
                summary.retained += 1;
            }
        }

        for (id, vehicle) in latest {
            self.absences.remove(&id);
            match fleet.get(&id) {
                None => summary.added += 1,
                Some(previous) if *previous == vehicle => {
                    summary.unchanged += 1;
                    continue;
                }
                Some(_) => summary.updated += 1,
            }
            fleet.insert(vehicle);
        }

        if summary.changed() {
            self.generation += 1;
        }
        debug!(
            added = summary.added,
            updated = summary.updated,
            removed = summary.removed,
            retained = summary.retained,
            generation = self.generation,
            "Batch reconciled"
        );
        summary
    }

    /// Upserts a single vehicle without touching the rest of the fleet.
    ///
    /// Returns true if the fleet changed.
    pub fn apply_update(&mut self, vehicle: VehicleState) -> bool {
        if self.fleet.get(&vehicle.id) == Some(&vehicle) {
            return false;
        }
        self.absences.remove(&vehicle.id);
        Arc::make_mut(&mut self.fleet).insert(vehicle);
        self.generation += 1;
        true
    }

    /// Empties the fleet. Returns the number of vehicles dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.fleet.len();
        if dropped > 0 {
            Arc::make_mut(&mut self.fleet).clear();
            self.generation += 1;
        }
        self.absences.clear();
        dropped
    }

    /// Applies the disconnect policy for an outage of the given length.
    ///
    /// Returns true if the fleet was cleared by this call.
    pub fn handle_disconnect(&mut self, outage: Duration) -> bool {
        let should_clear = match self.config.disconnect_policy {
            DisconnectPolicy::Retain => false,
            DisconnectPolicy::ClearImmediately => true,
            DisconnectPolicy::ClearAfter(limit) => outage >= limit,
        };
        if should_clear && !self.fleet.is_empty() {
            let dropped = self.clear();
            info!(dropped, outage_secs = outage.as_secs_f64(), "Fleet cleared after disconnect");
            return true;
        }
        false
    }

    /// Read-only view of the current fleet.
    pub fn snapshot(&self) -> Arc<FleetState> {
        Arc::clone(&self.fleet)
    }

    /// Borrow of the current fleet without bumping the refcount.
    pub fn fleet(&self) -> &FleetState {
        &self.fleet
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vehicle::GeoPoint;
    use proptest::prelude::*;

    fn bus(id: &str, lat: f64, ghost: bool) -> VehicleState {
        VehicleState::new(id, "B1", GeoPoint::new(lat, -74.0).unwrap(), ghost)
    }

    #[test]
    fn test_apply_batch_full_replace() {
        let mut reconciler = FleetReconciler::with_defaults();
        let summary = reconciler.apply_batch(vec![bus("1", 40.71, false), bus("2", 40.72, true)]);
        assert_eq!(summary.added, 2);
        assert_eq!(reconciler.snapshot().len(), 2);

        let summary = reconciler.apply_batch(vec![bus("1", 40.73, false)]);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.removed, 1);

        let snapshot = reconciler.snapshot();
        assert_eq!(snapshot.ids().collect::<Vec<_>>(), vec!["1"]);
        assert_eq!(snapshot.get("1").unwrap().position.lat, 40.73);
    }

    #[test]
    fn test_apply_batch_idempotent() {
        let mut reconciler = FleetReconciler::with_defaults();
        let batch = vec![bus("1", 40.71, false), bus("2", 40.72, true)];

        reconciler.apply_batch(batch.clone());
        let first = reconciler.snapshot();
        let generation = reconciler.generation();

        let summary = reconciler.apply_batch(batch);
        assert_eq!(summary.unchanged, 2);
        assert!(!summary.changed());
        assert_eq!(*reconciler.snapshot(), *first);
        assert_eq!(reconciler.generation(), generation);
    }

    #[test]
    fn test_empty_batch_empties_fleet() {
        let mut reconciler = FleetReconciler::with_defaults();
        reconciler.apply_batch(vec![bus("1", 40.71, false)]);
        let summary = reconciler.apply_batch(vec![]);
        assert_eq!(summary.removed, 1);
        assert!(reconciler.snapshot().is_empty());
    }

    #[test]
    fn test_snapshot_isolated_from_later_batches() {
        let mut reconciler = FleetReconciler::with_defaults();
        reconciler.apply_batch(vec![bus("1", 40.71, false)]);
        let old = reconciler.snapshot();

        reconciler.apply_batch(vec![bus("2", 40.72, true)]);
        assert!(old.contains("1"));
        assert!(!old.contains("2"));
        assert!(reconciler.snapshot().contains("2"));
    }

    #[test]
    fn test_ghost_flag_change_is_an_update() {
        let mut reconciler = FleetReconciler::with_defaults();
        reconciler.apply_batch(vec![bus("1", 40.71, false)]);
        let summary = reconciler.apply_batch(vec![bus("1", 40.71, true)]);
        assert_eq!(summary.updated, 1);
        assert!(reconciler.fleet().get("1").unwrap().is_ghost);
    }

    #[test]
    fn test_repeated_id_counted_once_last_entry_wins() {
        let mut reconciler = FleetReconciler::with_defaults();
        let summary = reconciler.apply_batch(vec![bus("1", 40.71, false), bus("1", 40.75, true)]);
        assert_eq!(summary.added, 1);
        assert_eq!(summary.updated, 0);
        assert_eq!(reconciler.fleet().len(), 1);
        assert!(reconciler.fleet().get("1").unwrap().is_ghost);

        // Against the previous fleet, not against the earlier duplicate
        let summary = reconciler.apply_batch(vec![bus("1", 40.71, false), bus("1", 40.75, true)]);
        assert_eq!(summary, BatchSummary { unchanged: 1, ..Default::default() });
        assert!(!summary.changed());

        let summary = reconciler.apply_batch(vec![bus("1", 40.75, true), bus("1", 40.80, true)]);
        assert_eq!(summary, BatchSummary { updated: 1, ..Default::default() });
        assert_eq!(reconciler.fleet().get("1").unwrap().position.lat, 40.80);
    }

    #[test]
    fn test_absence_tolerance() {
        let mut reconciler = FleetReconciler::new(ReconcilerConfig {
            absence_tolerance: 3,
            ..Default::default()
        });
        reconciler.apply_batch(vec![bus("1", 40.71, false), bus("2", 40.72, false)]);

        // Missing twice: still shown at its last position
        assert_eq!(reconciler.apply_batch(vec![bus("1", 40.71, false)]).retained, 1);
        assert_eq!(reconciler.apply_batch(vec![bus("1", 40.71, false)]).retained, 1);
        assert!(reconciler.fleet().contains("2"));

        // Third consecutive miss drops it
        assert_eq!(reconciler.apply_batch(vec![bus("1", 40.71, false)]).removed, 1);
        assert!(!reconciler.fleet().contains("2"));
    }

    #[test]
    fn test_absence_counter_resets_on_reappearance() {
        let mut reconciler = FleetReconciler::new(ReconcilerConfig {
            absence_tolerance: 2,
            ..Default::default()
        });
        reconciler.apply_batch(vec![bus("1", 40.71, false), bus("2", 40.72, false)]);
        reconciler.apply_batch(vec![bus("1", 40.71, false)]);
        reconciler.apply_batch(vec![bus("1", 40.71, false), bus("2", 40.72, false)]);
        reconciler.apply_batch(vec![bus("1", 40.71, false)]);
        assert!(reconciler.fleet().contains("2"));
    }

    #[test]
    fn test_apply_update_upserts() {
        let mut reconciler = FleetReconciler::with_defaults();
        reconciler.apply_batch(vec![bus("1", 40.71, false)]);

        assert!(reconciler.apply_update(bus("2", 40.72, true)));
        assert!(!reconciler.apply_update(bus("2", 40.72, true)));
        assert_eq!(reconciler.fleet().len(), 2);
    }

    #[test]
    fn test_disconnect_policies() {
        let mut retain = FleetReconciler::with_defaults();
        retain.apply_batch(vec![bus("1", 40.71, false)]);
        assert!(!retain.handle_disconnect(Duration::from_secs(3600)));
        assert_eq!(retain.fleet().len(), 1);

        let mut immediate = FleetReconciler::new(ReconcilerConfig {
            disconnect_policy: DisconnectPolicy::ClearImmediately,
            ..Default::default()
        });
        immediate.apply_batch(vec![bus("1", 40.71, false)]);
        assert!(immediate.handle_disconnect(Duration::ZERO));
        assert!(immediate.fleet().is_empty());

        let mut delayed = FleetReconciler::new(ReconcilerConfig {
            disconnect_policy: DisconnectPolicy::ClearAfter(Duration::from_secs(60)),
            ..Default::default()
        });
        delayed.apply_batch(vec![bus("1", 40.71, false)]);
        assert!(!delayed.handle_disconnect(Duration::from_secs(59)));
        assert!(delayed.handle_disconnect(Duration::from_secs(60)));
        assert!(!delayed.handle_disconnect(Duration::from_secs(61)));
    }

    fn arb_batch() -> impl Strategy<Value = Vec<VehicleState>> {
        prop::collection::vec(("[a-e]", -89.0f64..89.0, any::<bool>()), 0..12).prop_map(|rows| {
            rows.into_iter()
                .map(|(id, lat, ghost)| bus(&id, lat, ghost))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_snapshot_keys_equal_batch_ids(prior in arb_batch(), batch in arb_batch()) {
            let mut reconciler = FleetReconciler::with_defaults();
            reconciler.apply_batch(prior);
            reconciler.apply_batch(batch.clone());

            let mut expected: Vec<String> = batch.iter().map(|v| v.id.clone()).collect();
            expected.sort();
            expected.dedup();
            let keys: Vec<String> = reconciler.snapshot().ids().map(str::to_string).collect();
            prop_assert_eq!(keys, expected);
        }

        #[test]
        fn prop_apply_batch_twice_is_idempotent(batch in arb_batch()) {
            let mut reconciler = FleetReconciler::with_defaults();
            reconciler.apply_batch(batch.clone());
            let once = reconciler.snapshot();
            reconciler.apply_batch(batch);
            prop_assert_eq!(&*reconciler.snapshot(), &*once);
        }
    }
}
