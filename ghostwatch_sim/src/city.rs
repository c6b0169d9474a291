//! Simulated bus city.
//!
//! The BusSimulator is the ground truth for the simulated feed:
//! - Where every bus actually is (sinusoidal loop around its route center)
//! - Which buses report this period, and which silently skip
//! - Which buses are switched off entirely
//!
//! Two buses (B103, B302) are "sluggish": they skip 80% of their updates and
//! barely move when they do report. Nothing here decides what is a ghost;
//! that is the classifier's job.

use ghostwatch_core::GeoPoint;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// How often the simulated buses report.
pub const UPDATE_PERIOD: Duration = Duration::from_secs(5);

/// Buses that skip most updates and crawl.
pub const SLUGGISH_BUSES: &[&str] = &["B103", "B302"];

/// One service line and the buses running it.
#[derive(Debug, Clone, Copy)]
pub struct RouteSpec {
    pub id: &'static str,
    /// Center of the loop
    pub lat: f64,
    pub lon: f64,
    pub buses: &'static [&'static str],
}

/// Three routes around central Bangalore.
pub const BANGALORE_ROUTES: &[RouteSpec] = &[
    RouteSpec {
        id: "R1",
        lat: 12.9716,
        lon: 77.5946,
        buses: &["B101", "B102", "B103"],
    },
    RouteSpec {
        id: "R2",
        lat: 12.9750,
        lon: 77.6000,
        buses: &["B201", "B202"],
    },
    RouteSpec {
        id: "R3",
        lat: 12.9800,
        lon: 77.5900,
        buses: &["B301", "B302", "B303"],
    },
];

/// Loop radius in degrees (about 1 km).
const LOOP_RADIUS_DEG: f64 = 0.01;

/// A position report as a bus's onboard unit would send it.
#[derive(Debug, Clone, PartialEq)]
pub struct BusReport {
    pub id: String,
    pub route: String,
    pub position: GeoPoint,
    pub speed_kmh: f64,
    /// Simulation time the report was produced
    pub at: Duration,
}

#[derive(Debug, Clone)]
struct SimBus {
    route: String,
    /// Position within its route, phases the loop
    index: usize,
    center: (f64, f64),
    sluggish: bool,
    online: bool,
    last_report: Option<BusReport>,
}

/// Ground-truth bus movement.
pub struct BusSimulator {
    /// RNG for GPS noise; separate from any fault-injection RNG
    physics_rng: ChaCha8Rng,

    buses: BTreeMap<String, SimBus>,

    /// Update periods elapsed
    step: u64,

    /// GPS noise standard deviation in degrees
    noise_std_deg: f64,
}

impl BusSimulator {
    /// Creates the Bangalore city with the given physics seed.
    pub fn new(physics_seed: u64) -> Self {
        Self::with_routes(physics_seed, BANGALORE_ROUTES)
    }

    pub fn with_routes(physics_seed: u64, routes: &[RouteSpec]) -> Self {
        let mut buses = BTreeMap::new();
        for route in routes {
            for (index, id) in route.buses.iter().enumerate() {
                buses.insert(
                    id.to_string(),
                    SimBus {
                        route: route.id.to_string(),
                        index,
                        center: (route.lat, route.lon),
                        sluggish: SLUGGISH_BUSES.contains(id),
                        online: true,
                        last_report: None,
                    },
                );
            }
        }
        Self {
            physics_rng: ChaCha8Rng::seed_from_u64(physics_seed),
            buses,
            step: 0,
            noise_std_deg: 0.00001, // ~1 m
        }
    }

    /// Sets the GPS noise standard deviation (degrees).
    pub fn set_position_noise(&mut self, std_deg: f64) {
        self.noise_std_deg = std_deg.max(0.0);
    }

    /// Advances one update period and returns the reports sent in it.
    pub fn step(&mut self, now: Duration) -> Vec<BusReport> {
        let step = self.step as f64;
        let mut reports = Vec::new();

        for (id, bus) in self.buses.iter_mut() {
            if !bus.online {
                continue;
            }
            let phase = step * 0.1 + bus.index as f64;
            let mut lat_offset = phase.sin() * LOOP_RADIUS_DEG;
            let mut lon_offset = phase.cos() * LOOP_RADIUS_DEG;

            if bus.sluggish {
                if self.step % 10 < 8 {
                    continue;
                }
                lat_offset *= 0.1;
                lon_offset *= 0.1;
            }

            let noise_lat: f64 = self.physics_rng.sample(StandardNormal);
            let noise_lon: f64 = self.physics_rng.sample(StandardNormal);
            let lat = bus.center.0 + lat_offset + noise_lat * self.noise_std_deg;
            let lon = bus.center.1 + lon_offset + noise_lon * self.noise_std_deg;

            let position = match GeoPoint::new(lat, lon) {
                Ok(p) => p,
                Err(e) => {
                    warn!(bus = %id, error = %e, "Simulated position out of range, skipping");
                    continue;
                }
            };

            let report = BusReport {
                id: id.clone(),
                route: bus.route.clone(),
                position,
                speed_kmh: 20.0 + bus.index as f64 * 5.0 + 5.0 * (step * 0.1).sin(),
                at: now,
            };
            bus.last_report = Some(report.clone());
            reports.push(report);
        }

        self.step += 1;
        debug!(step = self.step, reports = reports.len(), "City step");
        reports
    }

    /// Switches a bus on or off. An offline bus vanishes from the feed.
    ///
    /// Returns false for an unknown id.
    pub fn set_online(&mut self, id: &str, online: bool) -> bool {
        match self.buses.get_mut(id) {
            Some(bus) => {
                bus.online = online;
                true
            }
            None => false,
        }
    }

    /// Latest report of every online bus that has reported at least once,
    /// in id order. This is what the feed server publishes.
    pub fn published(&self) -> impl Iterator<Item = &BusReport> {
        self.buses
            .values()
            .filter(|b| b.online)
            .filter_map(|b| b.last_report.as_ref())
    }

    pub fn bus_ids(&self) -> impl Iterator<Item = &str> {
        self.buses.keys().map(String::as_str)
    }

    pub fn is_online(&self, id: &str) -> bool {
        self.buses.get(id).is_some_and(|b| b.online)
    }

    pub fn step_count(&self) -> u64 {
        self.step
    }
}
