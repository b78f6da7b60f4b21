//! Trellis Overlay
//!
//! Per-node routing state for a prefix-routed overlay and the next-hop
//! decision built on it.
//!
//! # Tables
//!
//! - [`RoutingTable`]: one row per shared-prefix length, one column per
//!   digit. A slot is only replaced by a peer closer in the proximity metric.
//! - [`LeafSet`]: the `L/2` numerically closest peers below and above the
//!   local id. Authoritative for keys inside its span.
//! - [`NeighborhoodSet`]: the `M` peers closest in the proximity metric.
//!
//! [`OverlayState`] owns all three and applies the join, state update,
//! liveness and repair rules. Routing ([`OverlayState::next_hop`]) never
//! forwards to a node farther from the key than the current one.
//!
//! # Transport
//!
//! The overlay talks to the network through the [`Transport`] and [`Link`]
//! traits and the bincode-encoded [`Message`] envelope. Concrete transports
//! live in `trellis-protocols`.

mod config;
mod error;
mod leaf_set;
mod link;
mod message;
mod neighborhood;
mod peer;
mod router;
mod routing_table;
mod state;

pub use config::OverlayConfig;
pub use error::{Error, RejectReason, Result, TransportError};
pub use leaf_set::{LeafSet, Side};
pub use link::{Link, Transport};
pub use message::{
    JoinRequest, JoinResponse, Message, MessageId, MessageKind, Payload, RoutingRow, StateUpdate,
};
pub use neighborhood::NeighborhoodSet;
pub use peer::{Locator, Peer, PeerInfo};
pub use router::{NextHop, RouteDecision, RouteGroups};
pub use routing_table::{InsertOutcome, RoutingTable};
pub use state::{
    Failure, IngestReport, MemberView, Membership, OverlayState, OverlayStats, Probe, RepairOutcome,
    RoutingView, Slot, TableKind,
};

pub use trellis_id::{Coordinates, EuclideanProximity, IdSpace, NodeId, Proximity};
