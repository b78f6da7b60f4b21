//! Wire messages.
//!
//! Every message carries an id, the overlay keys it is addressed to and a
//! typed payload. The opcode is the payload variant; [`Message::kind`]
//! exposes it for logging. Encoding is bincode.

use std::fmt;

use serde::{Deserialize, Serialize};
use trellis_id::NodeId;

use crate::error::Result;
use crate::leaf_set::Side;
use crate::peer::PeerInfo;
use crate::state::Slot;

/// Correlates a message across hops and in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl MessageId {
    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// One routing-table row as shipped to other nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRow {
    /// Node whose table the row came from.
    pub owner: NodeId,
    /// Row index.
    pub prefix: usize,
    /// Live entries of the row.
    pub entries: Vec<PeerInfo>,
}

/// A join request travelling towards the joiner's id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Nodes traversed so far, joiner first.
    pub path: Vec<PeerInfo>,
    /// One row per traversed hop, in path order.
    pub rows: Vec<RoutingRow>,
}

impl JoinRequest {
    pub fn new(joiner: PeerInfo) -> Self {
        Self {
            path: vec![joiner],
            rows: Vec::new(),
        }
    }

    /// The joining node.
    pub fn joiner(&self) -> Option<&PeerInfo> {
        self.path.first()
    }
}

/// Everything the terminal node of a join hands back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinResponse {
    /// Full path, joiner first, terminal node last.
    pub path: Vec<PeerInfo>,
    pub rows: Vec<RoutingRow>,
    /// Terminal node's leaf set.
    pub leaf_set: Vec<PeerInfo>,
    /// Terminal node's neighborhood set.
    pub neighborhood: Vec<PeerInfo>,
}

impl JoinResponse {
    /// The node that terminated the join.
    pub fn terminal(&self) -> Option<&PeerInfo> {
        self.path.last()
    }
}

/// Full state of a node, used to announce arrival and to answer it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub source: PeerInfo,
    pub rows: Vec<RoutingRow>,
    pub leaf_set: Vec<PeerInfo>,
    pub neighborhood: Vec<PeerInfo>,
    /// Ask the recipient to answer with its own state.
    pub send_back: bool,
}

/// Message body; one variant per opcode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    JoinRequest(JoinRequest),
    JoinResponse(JoinResponse),
    StateRequest(StateUpdate),
    StateResponse(StateUpdate),
    PingRequest {
        source: PeerInfo,
        slot: Slot,
    },
    PingResponse {
        responder: NodeId,
        slot: Slot,
    },
    LeafRequest {
        source: PeerInfo,
        side: Side,
        failed: NodeId,
    },
    LeafResponse {
        sender: NodeId,
        side: Side,
        failed: NodeId,
        leaves: Vec<PeerInfo>,
    },
    NeighborRequest {
        source: PeerInfo,
        failed: NodeId,
    },
    NeighborResponse {
        sender: NodeId,
        failed: NodeId,
        neighbors: Vec<PeerInfo>,
    },
    RouteRequest {
        source: PeerInfo,
        prefix: usize,
        digit: usize,
    },
    RouteResponse {
        sender: NodeId,
        prefix: usize,
        digit: usize,
        entry: PeerInfo,
    },
    NearbyRequest {
        source: PeerInfo,
    },
    NearbyResponse {
        sender: NodeId,
        nearby: PeerInfo,
    },
    NearbyNotJoined {
        sender: NodeId,
    },
    Data {
        source: NodeId,
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
    Departure {
        source: NodeId,
    },
}

/// Opcode of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    JoinRequest,
    JoinResponse,
    StateRequest,
    StateResponse,
    PingRequest,
    PingResponse,
    LeafRequest,
    LeafResponse,
    NeighborRequest,
    NeighborResponse,
    RouteRequest,
    RouteResponse,
    NearbyRequest,
    NearbyResponse,
    NearbyNotJoined,
    Data,
    Departure,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::JoinRequest => "JOIN_REQUEST",
            MessageKind::JoinResponse => "JOIN_RESPONSE",
            MessageKind::StateRequest => "STATE_REQUEST",
            MessageKind::StateResponse => "STATE_RESPONSE",
            MessageKind::PingRequest => "PING_REQUEST",
            MessageKind::PingResponse => "PING_RESPONSE",
            MessageKind::LeafRequest => "LEAF_REQUEST",
            MessageKind::LeafResponse => "LEAF_RESPONSE",
            MessageKind::NeighborRequest => "NEIGHBOR_REQUEST",
            MessageKind::NeighborResponse => "NEIGHBOR_RESPONSE",
            MessageKind::RouteRequest => "ROUTE_REQUEST",
            MessageKind::RouteResponse => "ROUTE_RESPONSE",
            MessageKind::NearbyRequest => "NEARBY_REQUEST",
            MessageKind::NearbyResponse => "NEARBY_RESPONSE",
            MessageKind::NearbyNotJoined => "NEARBY_NOT_JOINED",
            MessageKind::Data => "DATA",
            MessageKind::Departure => "DEPARTURE",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An overlay message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    /// Keys the message is routed towards. Empty for point-to-point control traffic.
    pub destinations: Vec<NodeId>,
    pub payload: Payload,
}

impl Message {
    /// A control message sent directly to a known peer.
    pub fn direct(payload: Payload) -> Self {
        Self {
            id: MessageId::random(),
            destinations: Vec::new(),
            payload,
        }
    }

    /// A message routed towards `destinations`.
    pub fn routed(destinations: Vec<NodeId>, payload: Payload) -> Self {
        Self {
            id: MessageId::random(),
            destinations,
            payload,
        }
    }

    /// Same id and payload, narrowed to a subset of destinations.
    pub fn with_destinations(&self, destinations: Vec<NodeId>) -> Self {
        Self {
            id: self.id,
            destinations,
            payload: self.payload.clone(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match &self.payload {
            Payload::JoinRequest(_) => MessageKind::JoinRequest,
            Payload::JoinResponse(_) => MessageKind::JoinResponse,
            Payload::StateRequest(_) => MessageKind::StateRequest,
            Payload::StateResponse(_) => MessageKind::StateResponse,
            Payload::PingRequest { .. } => MessageKind::PingRequest,
            Payload::PingResponse { .. } => MessageKind::PingResponse,
            Payload::LeafRequest { .. } => MessageKind::LeafRequest,
            Payload::LeafResponse { .. } => MessageKind::LeafResponse,
            Payload::NeighborRequest { .. } => MessageKind::NeighborRequest,
            Payload::NeighborResponse { .. } => MessageKind::NeighborResponse,
            Payload::RouteRequest { .. } => MessageKind::RouteRequest,
            Payload::RouteResponse { .. } => MessageKind::RouteResponse,
            Payload::NearbyRequest { .. } => MessageKind::NearbyRequest,
            Payload::NearbyResponse { .. } => MessageKind::NearbyResponse,
            Payload::NearbyNotJoined { .. } => MessageKind::NearbyNotJoined,
            Payload::Data { .. } => MessageKind::Data,
            Payload::Departure { .. } => MessageKind::Departure,
        }
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::test_support::info;

    #[test]
    fn join_request_starts_with_joiner() {
        let joiner = info(0x80, 1.0);
        let req = JoinRequest::new(joiner.clone());
        assert_eq!(req.joiner(), Some(&joiner));
        assert!(req.rows.is_empty());
    }

    #[test]
    fn data_survives_codec() {
        let msg = Message::routed(
            vec![NodeId::new(7), NodeId::new(9)],
            Payload::Data {
                source: NodeId::new(1),
                data: b"hello".to_vec(),
            },
        );
        let decoded = Message::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.kind(), MessageKind::Data);
    }

    #[test]
    fn state_update_survives_codec() {
        let update = StateUpdate {
            source: info(1, 0.0),
            rows: vec![RoutingRow {
                owner: NodeId::new(1),
                prefix: 0,
                entries: vec![info(u128::MAX, 3.0)],
            }],
            leaf_set: vec![info(2, 1.0)],
            neighborhood: vec![info(3, 0.5)],
            send_back: true,
        };
        let msg = Message::direct(Payload::StateRequest(update));
        let decoded = Message::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.kind().to_string(), "STATE_REQUEST");
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let msg = Message::direct(Payload::Departure { source: NodeId::new(5) });
        let bytes = msg.to_bytes().unwrap();
        assert!(Message::from_bytes(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn narrowing_keeps_id() {
        let msg = Message::routed(vec![NodeId::new(1), NodeId::new(2)], Payload::Departure { source: NodeId::new(3) });
        let narrowed = msg.with_destinations(vec![NodeId::new(2)]);
        assert_eq!(narrowed.id, msg.id);
        assert_eq!(narrowed.destinations, vec![NodeId::new(2)]);
    }
}
