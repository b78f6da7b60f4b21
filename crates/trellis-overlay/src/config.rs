//! Overlay configuration.
//!
//! Fixed at construction and shared read-only by the tables and protocols,
//! so several overlay instances can live in one process.

use std::time::Duration;

use trellis_id::IdSpace;

use crate::error::{Error, Result};

/// Configuration for one overlay node.
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    /// Identifier digit layout.
    pub space: IdSpace,

    /// Leaf set size `L`, split evenly below and above the local id.
    pub leaf_size: usize,

    /// Neighborhood set size `M`.
    pub neighborhood_size: usize,

    /// Period of the liveness probe cycle.
    pub ping_interval: Duration,

    /// A slot whose last ack is older than this is suspect.
    pub ack_threshold: Duration,

    /// How long routing repair waits on one row before escalating.
    pub repair_timeout: Duration,

    /// How long a joiner waits for its join response.
    pub join_timeout: Duration,

    /// How long a joiner waits for nearby-node answers.
    pub nearby_timeout: Duration,

    /// Number of candidates probed when looking for a nearby bootstrap.
    pub nearby_requests: usize,

    /// Window for fire-and-forget departure notices on shutdown.
    pub shutdown_grace: Duration,

    /// Reject peers whose id is not the hash of their locator.
    pub verify_ids: bool,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            space: IdSpace::HEX,
            leaf_size: 8,
            neighborhood_size: 10,
            ping_interval: Duration::from_secs(10),
            ack_threshold: Duration::from_secs(5),
            repair_timeout: Duration::from_secs(2),
            join_timeout: Duration::from_secs(30),
            nearby_timeout: Duration::from_secs(5),
            nearby_requests: 3,
            shutdown_grace: Duration::from_millis(500),
            verify_ids: true,
        }
    }
}

impl OverlayConfig {
    /// Set the identifier digit layout.
    #[must_use]
    pub fn with_space(mut self, space: IdSpace) -> Self {
        self.space = space;
        self
    }

    /// Set the leaf set size.
    #[must_use]
    pub fn with_leaf_size(mut self, size: usize) -> Self {
        self.leaf_size = size;
        self
    }

    /// Set the neighborhood set size.
    #[must_use]
    pub fn with_neighborhood_size(mut self, size: usize) -> Self {
        self.neighborhood_size = size;
        self
    }

    /// Set the probe period.
    #[must_use]
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Set the staleness threshold.
    #[must_use]
    pub fn with_ack_threshold(mut self, threshold: Duration) -> Self {
        self.ack_threshold = threshold;
        self
    }

    /// Set the per-row routing repair wait.
    #[must_use]
    pub fn with_repair_timeout(mut self, timeout: Duration) -> Self {
        self.repair_timeout = timeout;
        self
    }

    /// Set the join response timeout.
    #[must_use]
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Set the nearby discovery timeout.
    #[must_use]
    pub fn with_nearby_timeout(mut self, timeout: Duration) -> Self {
        self.nearby_timeout = timeout;
        self
    }

    /// Set the shutdown grace period.
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Accept peers without checking their id against their locator.
    ///
    /// Used when identifiers are assigned rather than hashed.
    #[must_use]
    pub fn without_id_verification(mut self) -> Self {
        self.verify_ids = false;
        self
    }

    /// Slots per leaf-set half.
    pub fn leaf_half(&self) -> usize {
        self.leaf_size / 2
    }

    /// Check the configuration for values the tables cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.leaf_size < 2 || self.leaf_size % 2 != 0 {
            return Err(Error::InvalidConfig(format!(
                "leaf_size must be even and at least 2, got {}",
                self.leaf_size
            )));
        }
        if self.neighborhood_size == 0 {
            return Err(Error::InvalidConfig("neighborhood_size must be positive".into()));
        }
        if self.ping_interval.is_zero() || self.ack_threshold.is_zero() {
            return Err(Error::InvalidConfig("probe timings must be non-zero".into()));
        }
        // Staleness is judged one threshold after the probes go out.
        if self.ack_threshold >= self.ping_interval {
            return Err(Error::InvalidConfig(format!(
                "ack_threshold ({:?}) must be shorter than ping_interval ({:?})",
                self.ack_threshold, self.ping_interval
            )));
        }
        Ok(())
    }
}
