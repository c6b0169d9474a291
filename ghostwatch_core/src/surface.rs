//! In-memory `RenderSurface`.
//!
//! Holds the markers a real map would be showing and records every call in
//! order, so tests and scenario exports can inspect exactly what the
//! controller asked for. The call log grows until drained with `take_ops`
//! or `clear_ops`; long-running owners drain it once per frame.

use crate::view::{MarkerSpec, RenderSurface, Viewport};
use std::collections::BTreeMap;

/// One call received by a `MemorySurface`.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceOp {
    Mount(Viewport),
    Upsert(String, MarkerSpec),
    Remove(String),
}

/// A map surface without a map.
#[derive(Debug, Clone, Default)]
pub struct MemorySurface {
    viewport: Option<Viewport>,
    mount_count: usize,
    markers: BTreeMap<String, MarkerSpec>,
    ops: Vec<SurfaceOp>,
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Viewport as last set, by `mount` or by a simulated user gesture.
    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    /// Simulates the user panning/zooming the map.
    pub fn pan_to(&mut self, viewport: Viewport) {
        self.viewport = Some(viewport);
    }

    pub fn mount_count(&self) -> usize {
        self.mount_count
    }

    pub fn marker(&self, id: &str) -> Option<&MarkerSpec> {
        self.markers.get(id)
    }

    /// Ids of displayed markers, in order.
    pub fn marker_ids(&self) -> impl Iterator<Item = &str> {
        self.markers.keys().map(String::as_str)
    }

    pub fn markers(&self) -> &BTreeMap<String, MarkerSpec> {
        &self.markers
    }

    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    /// Calls received since the log was last drained.
    pub fn ops(&self) -> &[SurfaceOp] {
        &self.ops
    }

    /// Drains the call log. Markers and viewport are kept.
    pub fn take_ops(&mut self) -> Vec<SurfaceOp> {
        std::mem::take(&mut self.ops)
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }
}

impl RenderSurface for MemorySurface {
    fn mount(&mut self, viewport: Viewport) {
        self.viewport = Some(viewport);
        self.mount_count += 1;
        self.ops.push(SurfaceOp::Mount(viewport));
    }

    fn upsert_marker(&mut self, id: &str, marker: &MarkerSpec) {
        self.markers.insert(id.to_string(), marker.clone());
        self.ops.push(SurfaceOp::Upsert(id.to_string(), marker.clone()));
    }

    fn remove_marker(&mut self, id: &str) {
        self.markers.remove(id);
        self.ops.push(SurfaceOp::Remove(id.to_string()));
    }
}
