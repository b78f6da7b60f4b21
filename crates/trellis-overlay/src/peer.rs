//! Peer descriptors and table entries.
//!
//! [`PeerInfo`] is the value that travels on the wire. [`Peer`] is what a
//! table slot holds: the descriptor plus liveness bookkeeping and an
//! optional open link. Every table owns its own `Peer` values, so the same
//! remote node may appear in several tables with independent state.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use trellis_id::{Coordinates, NodeId};

use crate::link::Link;

/// Opaque network address of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Locator(pub String);

impl Locator {
    /// Wrap an address string.
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    /// The address as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Locator {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identity, address and coordinates of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: NodeId,
    pub locator: Locator,
    pub coords: Coordinates,
}

impl PeerInfo {
    /// Describe a node whose id is derived from its locator.
    pub fn hashed(locator: Locator, coords: Coordinates) -> Self {
        Self {
            id: NodeId::hash(locator.as_str()),
            locator,
            coords,
        }
    }

    /// Describe a node with an explicitly assigned id.
    pub fn new(id: NodeId, locator: Locator, coords: Coordinates) -> Self {
        Self { id, locator, coords }
    }
}

/// A table slot entry.
pub struct Peer {
    info: PeerInfo,
    proximity: f64,
    last_ack: Instant,
    suspect: bool,
    link: Option<Arc<dyn Link>>,
}

impl Peer {
    /// Create an entry with its proximity to the local node already computed.
    pub fn new(info: PeerInfo, proximity: f64, now: Instant) -> Self {
        Self {
            info,
            proximity,
            last_ack: now,
            suspect: false,
            link: None,
        }
    }

    pub fn info(&self) -> &PeerInfo {
        &self.info
    }

    pub fn id(&self) -> NodeId {
        self.info.id
    }

    /// Proximity distance from the local node.
    pub fn proximity(&self) -> f64 {
        self.proximity
    }

    pub fn last_ack(&self) -> Instant {
        self.last_ack
    }

    /// Whether the entry failed its last staleness check.
    pub fn is_suspect(&self) -> bool {
        self.suspect
    }

    /// Live entries are eligible as next hops.
    pub fn is_live(&self) -> bool {
        !self.suspect
    }

    pub fn mark_suspect(&mut self) {
        self.suspect = true;
    }

    /// Record proof of life.
    pub fn touch(&mut self, now: Instant) {
        self.last_ack = now;
        self.suspect = false;
    }

    /// Whether no ack has arrived within `threshold`.
    pub fn is_stale(&self, now: Instant, threshold: Duration) -> bool {
        now.saturating_duration_since(self.last_ack) > threshold
    }

    /// Take newer descriptor data for the same node.
    ///
    /// Liveness is untouched. A changed locator invalidates the open link.
    pub fn refresh(&mut self, info: PeerInfo, proximity: f64) {
        debug_assert_eq!(info.id, self.info.id);
        if info.locator != self.info.locator {
            self.link = None;
        }
        self.info = info;
        self.proximity = proximity;
    }

    /// The open link, if any.
    pub fn link(&self) -> Option<Arc<dyn Link>> {
        self.link.clone()
    }

    /// Attach `link` unless one is already open; returns the link to use.
    pub fn attach_link(&mut self, link: Arc<dyn Link>) -> Arc<dyn Link> {
        self.link.get_or_insert(link).clone()
    }

    /// Drop the link held by this slot.
    pub fn detach_link(&mut self) -> Option<Arc<dyn Link>> {
        self.link.take()
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.info.id.short())
            .field("locator", &self.info.locator)
            .field("proximity", &self.proximity)
            .field("suspect", &self.suspect)
            .field("linked", &self.link.is_some())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A peer descriptor with an assigned id at a 1-D position.
    pub fn info(id: u128, x: f64) -> PeerInfo {
        PeerInfo::new(NodeId::new(id), Locator::new(format!("mem://{id:x}")), Coordinates::point(&[x]))
    }

    /// A table entry with an explicit proximity.
    pub fn peer(id: u128, proximity: f64) -> Peer {
        Peer::new(info(id, proximity), proximity, Instant::now())
    }
}
