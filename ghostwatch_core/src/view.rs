//! The Map View Controller - fleet snapshot + filter in, marker commands out.
//!
//! # Render contract
//!
//! ```text
//!  FleetState ──┐
//!               ├─ compute_visible() ─ diff vs. rendered ─┬─ upsert_marker (new / changed)
//!  DisplayFilter┘                                         └─ remove_marker (gone / filtered)
//! ```
//!
//! - Markers are keyed by vehicle id. A vehicle that stays visible keeps its
//!   marker; only a position/icon/route change reaches the surface.
//! - The viewport is handed to the surface once, at mount. After that the
//!   surface owns center/zoom and the controller never touches it again.

use crate::filter::DisplayFilter;
use crate::fleet::FleetState;
use crate::vehicle::{GeoPoint, VehicleState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

// ============================================================================
// SURFACE INTERFACE
// ============================================================================

/// Map center and zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub center: GeoPoint,
    pub zoom: f64,
}

impl Viewport {
    pub fn new(center: GeoPoint, zoom: f64) -> Self {
        Self { center, zoom }
    }
}

impl Default for Viewport {
    /// Lower Manhattan, street-level zoom.
    fn default() -> Self {
        Self {
            center: GeoPoint {
                lat: 40.7128,
                lon: -74.0060,
            },
            zoom: 12.0,
        }
    }
}

/// The two mutually exclusive marker variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerIcon {
    /// Confirmed in-service vehicle
    Active,
    /// Vehicle flagged as a ghost upstream
    Ghost,
}

impl MarkerIcon {
    /// Selects the icon from the ghost verdict alone.
    #[inline]
    pub fn for_vehicle(vehicle: &VehicleState) -> Self {
        if vehicle.is_ghost {
            MarkerIcon::Ghost
        } else {
            MarkerIcon::Active
        }
    }
}

/// Everything the surface needs to draw one marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerSpec {
    pub position: GeoPoint,
    pub icon: MarkerIcon,
    /// Route label for popups/tooltips
    pub route: String,
}

impl MarkerSpec {
    pub fn for_vehicle(vehicle: &VehicleState) -> Self {
        Self {
            position: vehicle.position,
            icon: MarkerIcon::for_vehicle(vehicle),
            route: vehicle.route.clone(),
        }
    }
}

/// The map rendering surface, as seen by the controller.
///
/// Pan/zoom gestures happen entirely inside the surface; nothing here lets
/// the controller read them back.
pub trait RenderSurface {
    /// Mounts the map at the initial viewport. Called once.
    fn mount(&mut self, viewport: Viewport);

    /// Creates the marker for `id`, or updates it in place if it exists.
    fn upsert_marker(&mut self, id: &str, marker: &MarkerSpec);

    /// Removes the marker for `id`.
    fn remove_marker(&mut self, id: &str);
}

// ============================================================================
// VISIBLE SET
// ============================================================================

/// Vehicles to display: all of them, or only non-ghosts when
/// `filter.hide_ghosts` is set. In id order.
pub fn compute_visible<'a>(fleet: &'a FleetState, filter: &DisplayFilter) -> Vec<&'a VehicleState> {
    fleet.vehicles().filter(|v| filter.admits(v)).collect()
}

// ============================================================================
// MAP VIEW CONTROLLER
// ============================================================================

/// One-shot viewport handoff.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ViewportState {
    /// Not mounted yet; holds the viewport to hand over
    Uninitialized(Viewport),
    /// Surface owns the viewport from here on
    Initialized,
}

/// Marker operations issued by one render pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderDelta {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
}

impl RenderDelta {
    /// Number of surface calls the pass made.
    pub fn operations(&self) -> usize {
        self.added + self.updated + self.removed
    }
}

/// Drives a `RenderSurface` from fleet snapshots.
pub struct MapViewController<S: RenderSurface> {
    surface: S,
    viewport: ViewportState,
    /// What the surface currently shows, keyed by vehicle id
    rendered: BTreeMap<String, MarkerSpec>,
}

impl<S: RenderSurface> MapViewController<S> {
    /// Creates an unmounted controller.
    pub fn new(surface: S, initial_viewport: Viewport) -> Self {
        Self {
            surface,
            viewport: ViewportState::Uninitialized(initial_viewport),
            rendered: BTreeMap::new(),
        }
    }

    /// Hands the initial viewport to the surface.
    ///
    /// Returns true on the first call only; every later call is a no-op.
    pub fn mount(&mut self) -> bool {
        match self.viewport {
            ViewportState::Uninitialized(viewport) => {
                self.surface.mount(viewport);
                self.viewport = ViewportState::Initialized;
                debug!(
                    lat = viewport.center.lat,
                    lon = viewport.center.lon,
                    zoom = viewport.zoom,
                    "Map mounted"
                );
                true
            }
            ViewportState::Initialized => false,
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.viewport == ViewportState::Initialized
    }

    /// Brings the surface in line with `fleet` under `filter`.
    ///
    /// Mounts first if needed. Rendering the same inputs twice issues no
    /// surface calls the second time.
    pub fn render(&mut self, fleet: &FleetState, filter: &DisplayFilter) -> RenderDelta {
        self.mount();

        let mut delta = RenderDelta::default();
        let visible = compute_visible(fleet, filter);

        // Remove markers that left the visible set
        let stale: Vec<String> = self
            .rendered
            .keys()
            .filter(|id| !fleet.get(id).is_some_and(|v| filter.admits(v)))
            .cloned()
            .collect();
        for id in stale {
            self.surface.remove_marker(&id);
            self.rendered.remove(&id);
            delta.removed += 1;
        }

        // Add new markers, update changed ones in place
        for vehicle in visible {
            let spec = MarkerSpec::for_vehicle(vehicle);
            match self.rendered.get(&vehicle.id) {
                Some(current) if *current == spec => delta.unchanged += 1,
                Some(_) => {
                    self.surface.upsert_marker(&vehicle.id, &spec);
                    self.rendered.insert(vehicle.id.clone(), spec);
                    delta.updated += 1;
                }
                None => {
                    self.surface.upsert_marker(&vehicle.id, &spec);
                    self.rendered.insert(vehicle.id.clone(), spec);
                    delta.added += 1;
                }
            }
        }

        delta
    }

    /// Ids currently shown, in order.
    pub fn rendered_ids(&self) -> impl Iterator<Item = &str> {
        self.rendered.keys().map(String::as_str)
    }

    /// The marker currently shown for `id`.
    pub fn marker(&self, id: &str) -> Option<&MarkerSpec> {
        self.rendered.get(id)
    }

    pub fn marker_count(&self) -> usize {
        self.rendered.len()
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn into_surface(self) -> S {
        self.surface
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{MemorySurface, SurfaceOp};
    use proptest::prelude::*;

    fn bus(id: &str, lat: f64, ghost: bool) -> VehicleState {
        VehicleState::new(id, "B1", GeoPoint::new(lat, -74.0).unwrap(), ghost)
    }

    fn two_bus_fleet() -> FleetState {
        FleetState::from_vehicles(vec![bus("1", 40.71, false), bus("2", 40.72, true)])
    }

    #[test]
    fn test_compute_visible_show_all() {
        let fleet = two_bus_fleet();
        let visible = compute_visible(&fleet, &DisplayFilter::new(false));
        let ids: Vec<&str> = visible.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn test_compute_visible_hide_ghosts() {
        let fleet = two_bus_fleet();
        let visible = compute_visible(&fleet, &DisplayFilter::new(true));
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, "1");
    }

    #[test]
    fn test_icon_selected_by_ghost_flag() {
        assert_eq!(MarkerIcon::for_vehicle(&bus("1", 40.71, false)), MarkerIcon::Active);
        assert_eq!(MarkerIcon::for_vehicle(&bus("2", 40.72, true)), MarkerIcon::Ghost);
    }

    #[test]
    fn test_mount_happens_once() {
        let mut controller = MapViewController::new(MemorySurface::new(), Viewport::default());
        assert!(!controller.is_mounted());
        assert!(controller.mount());
        assert!(!controller.mount());

        controller.render(&two_bus_fleet(), &DisplayFilter::default());
        controller.render(&FleetState::new(), &DisplayFilter::default());
        assert_eq!(controller.surface().mount_count(), 1);
    }

    #[test]
    fn test_render_mounts_with_initial_viewport() {
        let viewport = Viewport::new(GeoPoint::new(12.97, 77.59).unwrap(), 14.0);
        let mut controller = MapViewController::new(MemorySurface::new(), viewport);
        controller.render(&FleetState::new(), &DisplayFilter::default());
        assert_eq!(controller.surface().viewport(), Some(viewport));
    }

    #[test]
    fn test_render_is_idempotent() {
        let mut controller = MapViewController::new(MemorySurface::new(), Viewport::default());
        let fleet = two_bus_fleet();
        let first = controller.render(&fleet, &DisplayFilter::default());
        assert_eq!(first.added, 2);

        let ops_before = controller.surface().ops().len();
        let second = controller.render(&fleet, &DisplayFilter::default());
        assert_eq!(second.operations(), 0);
        assert_eq!(second.unchanged, 2);
        assert_eq!(controller.surface().ops().len(), ops_before);
    }

    #[test]
    fn test_moved_vehicle_updates_in_place() {
        let mut controller = MapViewController::new(MemorySurface::new(), Viewport::default());
        controller.render(&two_bus_fleet(), &DisplayFilter::default());
        controller.surface_mut().clear_ops();

        let moved = FleetState::from_vehicles(vec![bus("1", 40.75, false), bus("2", 40.72, true)]);
        let delta = controller.render(&moved, &DisplayFilter::default());
        assert_eq!(delta.updated, 1);
        assert_eq!(delta.removed, 0);
        assert_eq!(
            controller.surface().ops(),
            &[SurfaceOp::Upsert("1".to_string(), MarkerSpec::for_vehicle(&bus("1", 40.75, false)))]
        );
    }

    #[test]
    fn test_reclassified_vehicle_swaps_icon_in_place() {
        let mut controller = MapViewController::new(MemorySurface::new(), Viewport::default());
        controller.render(&two_bus_fleet(), &DisplayFilter::default());

        let flipped = FleetState::from_vehicles(vec![bus("1", 40.71, true), bus("2", 40.72, true)]);
        let delta = controller.render(&flipped, &DisplayFilter::default());
        assert_eq!(delta.updated, 1);
        assert_eq!(controller.marker("1").unwrap().icon, MarkerIcon::Ghost);
        assert!(!controller.surface().ops().iter().any(|op| matches!(op, SurfaceOp::Remove(_))));
    }

    #[test]
    fn test_filter_toggle_removes_and_restores_ghosts() {
        let mut controller = MapViewController::new(MemorySurface::new(), Viewport::default());
        let fleet = two_bus_fleet();
        controller.render(&fleet, &DisplayFilter::new(false));

        let hide = controller.render(&fleet, &DisplayFilter::new(true));
        assert_eq!(hide.removed, 1);
        assert_eq!(controller.rendered_ids().collect::<Vec<_>>(), vec!["1"]);

        let show = controller.render(&fleet, &DisplayFilter::new(false));
        assert_eq!(show.added, 1);
        assert_eq!(controller.marker_count(), 2);
    }

    fn arb_fleet() -> impl Strategy<Value = FleetState> {
        prop::collection::vec(("[a-h]", -80.0f64..80.0, any::<bool>()), 0..16).prop_map(|rows| {
            FleetState::from_vehicles(rows.into_iter().map(|(id, lat, ghost)| bus(&id, lat, ghost)))
        })
    }

    proptest! {
        #[test]
        fn prop_hide_ghosts_yields_exactly_real_vehicles(fleet in arb_fleet()) {
            let visible = compute_visible(&fleet, &DisplayFilter::new(true));
            prop_assert!(visible.iter().all(|v| !v.is_ghost));
            let expected: Vec<&VehicleState> = fleet.vehicles().filter(|v| !v.is_ghost).collect();
            prop_assert_eq!(visible, expected);
        }

        #[test]
        fn prop_show_all_yields_whole_fleet(fleet in arb_fleet()) {
            let visible = compute_visible(&fleet, &DisplayFilter::new(false));
            let expected: Vec<&VehicleState> = fleet.vehicles().collect();
            prop_assert_eq!(visible, expected);
        }

        #[test]
        fn prop_surface_matches_visible_set(a in arb_fleet(), b in arb_fleet(), hide in any::<bool>()) {
            let filter = DisplayFilter::new(hide);
            let mut controller = MapViewController::new(MemorySurface::new(), Viewport::default());
            controller.render(&a, &filter);
            controller.render(&b, &filter);

            let expected: Vec<&str> = compute_visible(&b, &filter).iter().map(|v| v.id.as_str()).collect();
            let shown: Vec<&str> = controller.surface().marker_ids().collect();
            prop_assert_eq!(shown, expected);
            for id in controller.surface().marker_ids() {
                let vehicle = b.get(id).unwrap();
                prop_assert_eq!(controller.surface().marker(id).unwrap().icon, MarkerIcon::for_vehicle(vehicle));
            }
        }
    }
}
