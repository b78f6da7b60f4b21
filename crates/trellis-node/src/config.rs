//! Daemon configuration from `TRELLIS_*` environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use trellis_overlay::{Coordinates, Locator, OverlayConfig};

/// A variable that is set but cannot be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {var}: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("invalid overlay configuration: {0}")]
    Overlay(#[from] trellis_overlay::Error),
}

/// Settings for one node process.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Address the TCP listener binds.
    pub listen_addr: SocketAddr,
    /// Locator announced to peers. Defaults to the bound address.
    pub advertise: Option<Locator>,
    /// Nodes to join through. Empty founds a new overlay.
    pub bootstrap: Vec<Locator>,
    /// Position in the proximity space.
    pub coords: Coordinates,
    pub overlay: OverlayConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 7400)),
            advertise: None,
            bootstrap: Vec::new(),
            coords: Coordinates::origin(2),
            overlay: OverlayConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; unset variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("TRELLIS_LISTEN_ADDR") {
            config.listen_addr = addr.parse().map_err(|e| invalid("TRELLIS_LISTEN_ADDR", e))?;
        }
        config.advertise = lookup("TRELLIS_ADVERTISE_ADDR")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(Locator::new);
        config.bootstrap = lookup("TRELLIS_BOOTSTRAP")
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(Locator::from)
                    .collect()
            })
            .unwrap_or_default();

        if let Some(coords) = lookup("TRELLIS_COORDS") {
            let position = coords
                .split(',')
                .map(|c| c.trim().parse::<f64>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| invalid("TRELLIS_COORDS", e))?;
            config.coords = Coordinates::point(&position);
            config
                .coords
                .validate()
                .map_err(|e| invalid("TRELLIS_COORDS", e))?;
        }

        let mut overlay = OverlayConfig::default();
        if let Some(size) = lookup("TRELLIS_LEAF_SIZE") {
            overlay = overlay.with_leaf_size(size.parse().map_err(|e| invalid("TRELLIS_LEAF_SIZE", e))?);
        }
        if let Some(size) = lookup("TRELLIS_NEIGHBORHOOD_SIZE") {
            overlay = overlay
                .with_neighborhood_size(size.parse().map_err(|e| invalid("TRELLIS_NEIGHBORHOOD_SIZE", e))?);
        }
        if let Some(ms) = lookup("TRELLIS_PING_INTERVAL_MS") {
            overlay = overlay.with_ping_interval(millis("TRELLIS_PING_INTERVAL_MS", &ms)?);
        }
        if let Some(ms) = lookup("TRELLIS_ACK_THRESHOLD_MS") {
            overlay = overlay.with_ack_threshold(millis("TRELLIS_ACK_THRESHOLD_MS", &ms)?);
        }
        if let Some(ms) = lookup("TRELLIS_JOIN_TIMEOUT_MS") {
            overlay = overlay.with_join_timeout(millis("TRELLIS_JOIN_TIMEOUT_MS", &ms)?);
        }
        overlay.validate()?;
        config.overlay = overlay;

        Ok(config)
    }
}

fn invalid(var: &'static str, err: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        var,
        reason: err.to_string(),
    }
}

fn millis(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse()
        .map(Duration::from_millis)
        .map_err(|e| invalid(var, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<NodeConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        NodeConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.listen_addr.port(), 7400);
        assert!(config.bootstrap.is_empty());
        assert!(config.advertise.is_none());
        assert_eq!(config.overlay.leaf_size, 8);
    }

    #[test]
    fn reads_bootstrap_list_and_coords() {
        let config = from_pairs(&[
            ("TRELLIS_LISTEN_ADDR", "127.0.0.1:9100"),
            ("TRELLIS_BOOTSTRAP", "10.0.0.1:7400, 10.0.0.2:7400,,"),
            ("TRELLIS_COORDS", "1.5,-2"),
            ("TRELLIS_LEAF_SIZE", "16"),
        ])
        .unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9100".parse().unwrap());
        assert_eq!(
            config.bootstrap,
            vec![Locator::new("10.0.0.1:7400"), Locator::new("10.0.0.2:7400")]
        );
        assert_eq!(config.coords, Coordinates::point(&[1.5, -2.0]));
        assert_eq!(config.overlay.leaf_size, 16);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            from_pairs(&[("TRELLIS_LISTEN_ADDR", "nowhere")]),
            Err(ConfigError::Invalid { var: "TRELLIS_LISTEN_ADDR", .. })
        ));
        assert!(matches!(
            from_pairs(&[("TRELLIS_COORDS", "1,x")]),
            Err(ConfigError::Invalid { var: "TRELLIS_COORDS", .. })
        ));
        // Odd leaf sizes cannot be split into two halves.
        assert!(matches!(
            from_pairs(&[("TRELLIS_LEAF_SIZE", "7")]),
            Err(ConfigError::Overlay(_))
        ));
    }
}
