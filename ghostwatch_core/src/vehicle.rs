//! Vehicle data model and the feed's wire record.
//!
//! `VehicleRecord` is exactly what arrives on the wire; `VehicleState` is the
//! validated value the rest of the pipeline works with. The ghost verdict is
//! produced upstream and carried through untouched.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// POSITION
// ============================================================================

/// Coordinate validation failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PositionError {
    #[error("non-finite coordinate (lat={lat}, lon={lon})")]
    NonFinite { lat: f64, lon: f64 },

    #[error("latitude {0} outside [-90, 90]")]
    LatitudeOutOfRange(f64),

    #[error("longitude {0} outside [-180, 180]")]
    LongitudeOutOfRange(f64),
}

/// A WGS84 (latitude, longitude) pair, always finite and in range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// Validates and builds a point.
    pub fn new(lat: f64, lon: f64) -> Result<Self, PositionError> {
        if !lat.is_finite() || !lon.is_finite() {
            return Err(PositionError::NonFinite { lat, lon });
        }
        if !(-90.0..=90.0).contains(&lat) {
            return Err(PositionError::LatitudeOutOfRange(lat));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(PositionError::LongitudeOutOfRange(lon));
        }
        Ok(Self { lat, lon })
    }

    /// Great-circle distance in meters (haversine, mean Earth radius).
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        const EARTH_RADIUS_M: f64 = 6_371_000.0;
        let dlat = (other.lat - self.lat).to_radians();
        let dlon = (other.lon - self.lon).to_radians();
        let a = (dlat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos() * other.lat.to_radians().cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }
}

// ============================================================================
// VEHICLE STATE
// ============================================================================

/// One physically distinct vehicle as last reported by the feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleState {
    /// Stable identifier; the reconciliation key across batches
    pub id: String,

    /// Service line label (opaque)
    pub route: String,

    /// Last reported position
    pub position: GeoPoint,

    /// Upstream classification verdict; never recomputed here
    pub is_ghost: bool,
}

impl VehicleState {
    pub fn new(
        id: impl Into<String>,
        route: impl Into<String>,
        position: GeoPoint,
        is_ghost: bool,
    ) -> Self {
        Self {
            id: id.into(),
            route: route.into(),
            position,
            is_ghost,
        }
    }
}

// ============================================================================
// WIRE RECORD
// ============================================================================

/// One vehicle record as serialized by the feed:
/// `{ id, route, lat, lon, is_ghost }`.
///
/// The backend's broadcast names (`vehicle_id`, `route_id`) are accepted as
/// aliases; any additional fields it sends (speed, ghost_score, ...) are
/// ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleRecord {
    #[serde(alias = "vehicle_id")]
    pub id: String,

    #[serde(alias = "route_id")]
    pub route: String,

    pub lat: f64,

    pub lon: f64,

    pub is_ghost: bool,
}

impl VehicleRecord {
    pub fn new(id: &str, route: &str, lat: f64, lon: f64, is_ghost: bool) -> Self {
        Self {
            id: id.to_string(),
            route: route.to_string(),
            lat,
            lon,
            is_ghost,
        }
    }
}

impl From<&VehicleState> for VehicleRecord {
    fn from(state: &VehicleState) -> Self {
        Self {
            id: state.id.clone(),
            route: state.route.clone(),
            lat: state.position.lat,
            lon: state.position.lon,
            is_ghost: state.is_ghost,
        }
    }
}

impl TryFrom<VehicleRecord> for VehicleState {
    type Error = PositionError;

    fn try_from(record: VehicleRecord) -> Result<Self, Self::Error> {
        let position = GeoPoint::new(record.lat, record.lon)?;
        Ok(VehicleState {
            id: record.id,
            route: record.route,
            position,
            is_ghost: record.is_ghost,
        })
    }
}
