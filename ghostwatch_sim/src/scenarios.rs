//! Deterministic pipeline scenarios.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// GW-001: two buses, filter toggle, one drops out
    Baseline,

    /// GW-002: malformed payloads never touch the displayed fleet
    MalformedPayload,

    /// GW-003: feed drops; retain vs. clear-after policies
    ConnectionLoss,

    /// GW-004: viewport handed over once, user pan/zoom never overridden
    ViewportHandoff,

    /// GW-005: simulated Bangalore fleet with faults, invariants every tick
    City,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Baseline,
            ScenarioId::MalformedPayload,
            ScenarioId::ConnectionLoss,
            ScenarioId::ViewportHandoff,
            ScenarioId::City,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Baseline => "baseline",
            ScenarioId::MalformedPayload => "malformed_payload",
            ScenarioId::ConnectionLoss => "connection_loss",
            ScenarioId::ViewportHandoff => "viewport_handoff",
            ScenarioId::City => "city",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Baseline => "Two buses, hide/show ghosts, bus 2 drops out of the next batch",
            ScenarioId::MalformedPayload => "Truncated, mistyped, out-of-range and duplicate batches are discarded",
            ScenarioId::ConnectionLoss => "Disconnect keeps last-known fleet; clear-after policy empties it",
            ScenarioId::ViewportHandoff => "Map mounted once; user pan survives every later render",
            ScenarioId::City => "8 buses on 3 routes, 5% corruption, mid-run outage, bus offline/online",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "baseline" | "gw-001" => Ok(ScenarioId::Baseline),
            "malformed_payload" | "malformed" | "gw-002" => Ok(ScenarioId::MalformedPayload),
            "connection_loss" | "disconnect" | "gw-003" => Ok(ScenarioId::ConnectionLoss),
            "viewport_handoff" | "viewport" | "gw-004" => Ok(ScenarioId::ViewportHandoff),
            "city" | "gw-005" => Ok(ScenarioId::City),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
            assert!(!scenario.description().is_empty());
        }
        assert_eq!("GW-003".parse::<ScenarioId>(), Ok(ScenarioId::ConnectionLoss));
        assert!("time_warp".parse::<ScenarioId>().is_err());
    }
}
