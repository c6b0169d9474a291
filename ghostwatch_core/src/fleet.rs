//! The reconciled fleet snapshot.

use crate::metrics::FleetStats;
use crate::vehicle::VehicleState;
use std::collections::BTreeMap;

/// Mapping from vehicle id to its most recently received state.
///
/// Ordered by id so that everything derived from it (visible sets, marker
/// diffs, exports) comes out in the same order on every run. Only the
/// reconciler mutates a `FleetState`; everyone else sees it through an
/// `Arc` snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FleetState {
    vehicles: BTreeMap<String, VehicleState>,
}

impl FleetState {
    /// Creates an empty fleet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a fleet from vehicles; a later entry replaces an earlier one
    /// with the same id.
    pub fn from_vehicles(vehicles: impl IntoIterator<Item = VehicleState>) -> Self {
        let mut fleet = Self::new();
        for vehicle in vehicles {
            fleet.insert(vehicle);
        }
        fleet
    }

    /// Number of vehicles.
    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    /// Looks up a vehicle by id.
    pub fn get(&self, id: &str) -> Option<&VehicleState> {
        self.vehicles.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.vehicles.contains_key(id)
    }

    /// All vehicles in id order.
    pub fn vehicles(&self) -> impl Iterator<Item = &VehicleState> {
        self.vehicles.values()
    }

    /// All ids in order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.vehicles.keys().map(String::as_str)
    }

    /// Real/ghost counts for status displays.
    pub fn stats(&self) -> FleetStats {
        let total = self.vehicles.len();
        let ghosts = self.vehicles.values().filter(|v| v.is_ghost).count();
        FleetStats::new(total, ghosts)
    }

    pub(crate) fn insert(&mut self, vehicle: VehicleState) -> Option<VehicleState> {
        self.vehicles.insert(vehicle.id.clone(), vehicle)
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<VehicleState> {
        self.vehicles.remove(id)
    }

    pub(crate) fn clear(&mut self) {
        self.vehicles.clear();
    }
}
