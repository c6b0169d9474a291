//! Viewer configuration file.
//!
//! ```json
//! {
//!   "url": "ws://localhost:8000/ws",
//!   "viewport": { "center": { "lat": 12.9716, "lon": 77.5946 }, "zoom": 13.0 },
//!   "hide_ghosts": false,
//!   "absence_tolerance": 1,
//!   "clear_after_secs": 120
//! }
//! ```
//!
//! Every field is optional; missing fields take their defaults.

use crate::filter::DisplayFilter;
use crate::reconciler::{DisconnectPolicy, ReconcilerConfig};
use crate::runtime::RuntimeConfig;
use crate::vehicle::GeoPoint;
use crate::view::Viewport;
use ghostwatch_env::WebSocketConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Highest zoom level a map tile source serves.
pub const MAX_ZOOM: f64 = 22.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        ConfigError::Invalid(msg.into())
    }
}

/// User-facing settings for the viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ViewerConfig {
    /// WebSocket endpoint of the vehicle feed; none = simulated city
    pub url: Option<String>,

    /// Frame sent once after connecting
    pub subscribe_message: Option<String>,

    /// Initial map center and zoom
    pub viewport: Viewport,

    /// Start with ghost vehicles hidden
    pub hide_ghosts: bool,

    /// Batches a vehicle may be missing from before it is dropped
    pub absence_tolerance: u32,

    /// Clear the map as soon as the feed disconnects
    pub clear_on_disconnect: bool,

    /// Clear the map once the feed has been down this long
    pub clear_after_secs: Option<u64>,

    /// Seconds without a batch before the feed is shown as stale
    pub stale_after_secs: u64,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            url: None,
            subscribe_message: None,
            viewport: Viewport::default(),
            hide_ghosts: false,
            absence_tolerance: 1,
            clear_on_disconnect: false,
            clear_after_secs: None,
            stale_after_secs: 30,
        }
    }
}

impl ViewerConfig {
    /// Loads and validates a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Parses and validates a JSON config document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: ViewerConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let center = self.viewport.center;
        GeoPoint::new(center.lat, center.lon)
            .map_err(|e| ConfigError::invalid(format!("viewport center: {e}")))?;

        if !(0.0..=MAX_ZOOM).contains(&self.viewport.zoom) {
            return Err(ConfigError::invalid(format!(
                "zoom {} outside [0, {MAX_ZOOM}]",
                self.viewport.zoom
            )));
        }
        if self.absence_tolerance == 0 {
            return Err(ConfigError::invalid("absence_tolerance must be at least 1"));
        }
        if self.stale_after_secs == 0 {
            return Err(ConfigError::invalid("stale_after_secs must be positive"));
        }
        if self.clear_on_disconnect && self.clear_after_secs.is_some() {
            return Err(ConfigError::invalid(
                "clear_on_disconnect and clear_after_secs are mutually exclusive",
            ));
        }
        if let Some(url) = &self.url {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(ConfigError::invalid(format!("url must be ws:// or wss://, got {url}")));
            }
        }
        Ok(())
    }

    pub fn disconnect_policy(&self) -> DisconnectPolicy {
        match (self.clear_on_disconnect, self.clear_after_secs) {
            (_, Some(secs)) => DisconnectPolicy::ClearAfter(Duration::from_secs(secs)),
            (true, None) => DisconnectPolicy::ClearImmediately,
            (false, None) => DisconnectPolicy::Retain,
        }
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig::default()
            .with_viewport(self.viewport)
            .with_reconciler(ReconcilerConfig {
                absence_tolerance: self.absence_tolerance,
                disconnect_policy: self.disconnect_policy(),
            })
            .with_stale_after(Duration::from_secs(self.stale_after_secs))
    }

    pub fn initial_filter(&self) -> DisplayFilter {
        DisplayFilter::new(self.hide_ghosts)
    }

    /// Transport settings, if a live endpoint is configured.
    pub fn websocket_config(&self) -> Option<WebSocketConfig> {
        let url = self.url.as_ref()?;
        let mut ws = WebSocketConfig::new(url.clone());
        if let Some(frame) = &self.subscribe_message {
            ws = ws.with_subscribe_message(frame.clone());
        }
        Some(ws)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_defaults_are_valid() {
        let config = ViewerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.disconnect_policy(), DisconnectPolicy::Retain);
        assert!(config.websocket_config().is_none());

        let runtime = config.runtime_config();
        assert_eq!(runtime.reconciler.absence_tolerance, 1);
        assert_eq!(runtime.stale_after, Duration::from_secs(30));
    }

    #[test]
    fn test_partial_document() {
        let config = ViewerConfig::from_json(
            r#"{
                "url": "ws://localhost:8000/ws",
                "viewport": {"center": {"lat": 12.9716, "lon": 77.5946}, "zoom": 13.0},
                "hide_ghosts": true,
                "clear_after_secs": 120
            }"#,
        )
        .unwrap();

        assert!(config.initial_filter().hide_ghosts);
        assert_relative_eq!(config.viewport.center.lat, 12.9716);
        assert_eq!(
            config.disconnect_policy(),
            DisconnectPolicy::ClearAfter(Duration::from_secs(120))
        );
        assert_eq!(config.websocket_config().unwrap().url, "ws://localhost:8000/ws");
    }

    #[test]
    fn test_rejects_bad_values() {
        let bad_center = r#"{"viewport": {"center": {"lat": 95.0, "lon": 0.0}, "zoom": 12.0}}"#;
        assert!(matches!(ViewerConfig::from_json(bad_center), Err(ConfigError::Invalid(_))));

        let zero_tolerance = r#"{"absence_tolerance": 0}"#;
        assert!(matches!(ViewerConfig::from_json(zero_tolerance), Err(ConfigError::Invalid(_))));

        let both = r#"{"clear_on_disconnect": true, "clear_after_secs": 5}"#;
        assert!(matches!(ViewerConfig::from_json(both), Err(ConfigError::Invalid(_))));

        let http = r#"{"url": "http://example.com"}"#;
        assert!(matches!(ViewerConfig::from_json(http), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_unknown_field_is_json_error() {
        let result = ViewerConfig::from_json(r#"{"hide_ghost": true}"#);
        assert!(matches!(result, Err(ConfigError::Json(_))));
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("ghostwatch-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"clear_on_disconnect": true}"#).unwrap();
        let config = ViewerConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.disconnect_policy(), DisconnectPolicy::ClearImmediately);

        assert!(matches!(ViewerConfig::from_file(&path), Err(ConfigError::Io(_))));
    }
}
