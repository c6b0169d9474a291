//! Headless render surface: the map as log lines.
//!
//! Mount and ghost transitions are logged at `info`, every other marker
//! operation at `debug`.

use ghostwatch_core::{MarkerIcon, MarkerSpec, RenderSurface, Viewport};
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct LogSurface {
    viewport: Option<Viewport>,
    /// Icon of every marker currently placed
    icons: BTreeMap<String, MarkerIcon>,
}

impl LogSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    pub fn marker_count(&self) -> usize {
        self.icons.len()
    }

    pub fn ghost_count(&self) -> usize {
        self.icons.values().filter(|icon| **icon == MarkerIcon::Ghost).count()
    }
}

impl RenderSurface for LogSurface {
    fn mount(&mut self, viewport: Viewport) {
        info!(
            lat = viewport.center.lat,
            lon = viewport.center.lon,
            zoom = viewport.zoom,
            "Map mounted"
        );
        self.viewport = Some(viewport);
    }

    fn upsert_marker(&mut self, id: &str, marker: &MarkerSpec) {
        let previous = self.icons.insert(id.to_string(), marker.icon);
        match (previous, marker.icon) {
            (Some(MarkerIcon::Active), MarkerIcon::Ghost) => {
                info!(vehicle = id, route = %marker.route, "Vehicle flagged as ghost");
            }
            (Some(MarkerIcon::Ghost), MarkerIcon::Active) => {
                info!(vehicle = id, route = %marker.route, "Vehicle back in service");
            }
            (None, icon) => debug!(
                vehicle = id,
                ?icon,
                lat = marker.position.lat,
                lon = marker.position.lon,
                "Marker placed"
            ),
            _ => debug!(
                vehicle = id,
                lat = marker.position.lat,
                lon = marker.position.lon,
                "Marker moved"
            ),
        }
    }

    fn remove_marker(&mut self, id: &str) {
        if self.icons.remove(id).is_some() {
            debug!(vehicle = id, "Marker removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghostwatch_core::GeoPoint;

    fn spec(icon: MarkerIcon) -> MarkerSpec {
        MarkerSpec {
            position: GeoPoint::new(12.97, 77.59).unwrap(),
            icon,
            route: "R1".to_string(),
        }
    }

    #[test]
    fn test_tracks_markers_and_ghosts() {
        let mut surface = LogSurface::new();
        surface.mount(Viewport::default());
        assert_eq!(surface.viewport(), Some(Viewport::default()));

        surface.upsert_marker("B101", &spec(MarkerIcon::Active));
        surface.upsert_marker("B103", &spec(MarkerIcon::Active));
        surface.upsert_marker("B103", &spec(MarkerIcon::Ghost));
        assert_eq!(surface.marker_count(), 2);
        assert_eq!(surface.ghost_count(), 1);

        surface.remove_marker("B103");
        surface.remove_marker("B999");
        assert_eq!(surface.marker_count(), 1);
        assert_eq!(surface.ghost_count(), 0);
    }
}
