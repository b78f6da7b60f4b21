//! Membership and delivery notifications.

use serde::{Deserialize, Serialize};
use trellis_overlay::{MessageId, NodeId, PeerInfo};

/// Something the application may want to react to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OverlayEvent {
    /// A peer entered our tables for the first time.
    PeerArrived(PeerInfo),

    /// A peer was removed after failing or leaving.
    PeerDeparted(NodeId),

    /// Data routed to keys this node is responsible for.
    Delivered {
        id: MessageId,
        source: NodeId,
        keys: Vec<NodeId>,
        data: Vec<u8>,
    },
}
