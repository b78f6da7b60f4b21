//! Next-hop selection.
//!
//! Three steps, tried in order:
//!
//! 1. If the target falls inside the leaf-set span, go to the live leaf
//!    closest to it, or deliver locally if we are at least as close.
//! 2. Otherwise use the routing-table entry that extends the shared
//!    prefix by one digit.
//! 3. If that slot is empty or suspect, pick any live known node that
//!    shares at least as long a prefix with us and is strictly closer to
//!    the target than we are.
//!
//! Every forward strictly decreases the numeric distance to the target, so
//! a message cannot loop.

use std::sync::Arc;

use trellis_id::NodeId;

use crate::link::Link;
use crate::peer::{Peer, PeerInfo};
use crate::state::{OverlayState, Slot};

/// Where a message for some key goes next.
#[derive(Debug, Clone)]
pub enum RouteDecision {
    /// This node is responsible for the key.
    Deliver,
    /// Send to this peer.
    Forward(NextHop),
}

impl RouteDecision {
    pub fn next_hop(&self) -> Option<&NextHop> {
        match self {
            RouteDecision::Deliver => None,
            RouteDecision::Forward(hop) => Some(hop),
        }
    }
}

/// A chosen next hop and the slot it came from.
#[derive(Debug, Clone)]
pub struct NextHop {
    pub peer: PeerInfo,
    pub slot: Slot,
    /// Already open link, if the slot has one.
    pub link: Option<Arc<dyn Link>>,
}

impl NextHop {
    fn from_peer(peer: &Peer, slot: Slot) -> Self {
        Self {
            peer: peer.info().clone(),
            slot,
            link: peer.link(),
        }
    }
}

/// Destinations split by next hop.
#[derive(Debug, Default)]
pub struct RouteGroups {
    /// Keys this node is responsible for.
    pub local: Vec<NodeId>,
    /// Keys per next hop, in first-seen order.
    pub remote: Vec<(NextHop, Vec<NodeId>)>,
}

impl OverlayState {
    /// Decide the next hop for `target`.
    pub fn next_hop(&self, target: NodeId) -> RouteDecision {
        let local = self.local_id();
        if target == local {
            return RouteDecision::Deliver;
        }
        let own_distance = local.absolute_distance(&target);

        if self.leaves().covers(target) {
            return match self.leaves().closest_live(target) {
                Some(leaf) if leaf.id().absolute_distance(&target) < own_distance => {
                    let position = self.leaves().position_of(leaf.id()).unwrap_or_default();
                    RouteDecision::Forward(NextHop::from_peer(leaf, Slot::Leaf { position }))
                }
                _ => RouteDecision::Deliver,
            };
        }

        let space = self.space();
        let prefix = space.prefix_length(local, target);
        let digit = space.digit_at(target, prefix);
        if let Some(entry) = self.routing().get(prefix, digit).filter(|p| p.is_live()) {
            return RouteDecision::Forward(NextHop::from_peer(entry, Slot::Routing { prefix, digit }));
        }

        self.rare_case(target, prefix, own_distance)
    }

    fn rare_case(&self, target: NodeId, prefix: usize, own_distance: u128) -> RouteDecision {
        let local = self.local_id();
        let space = self.space();
        let eligible = |p: &Peer| {
            p.is_live()
                && space.prefix_length(local, p.id()) >= prefix
                && p.id().absolute_distance(&target) < own_distance
        };

        let leaves = self.leaves().iter().map(|p| {
            let position = self.leaves().position_of(p.id()).unwrap_or_default();
            (p, Slot::Leaf { position })
        });
        let neighbors = self
            .neighbors()
            .iter()
            .enumerate()
            .map(|(position, p)| (p, Slot::Neighbor { position }));
        let routing = self
            .routing()
            .iter()
            .map(|(prefix, digit, p)| (p, Slot::Routing { prefix, digit }));

        let mut best: Option<(&Peer, Slot)> = None;
        for (peer, slot) in leaves.chain(neighbors).chain(routing) {
            if !eligible(peer) {
                continue;
            }
            let closer = match best {
                Some((current, _)) => {
                    peer.id().absolute_distance(&target) < current.id().absolute_distance(&target)
                }
                None => true,
            };
            if closer {
                best = Some((peer, slot));
            }
        }

        match best {
            Some((peer, slot)) => RouteDecision::Forward(NextHop::from_peer(peer, slot)),
            None => RouteDecision::Deliver,
        }
    }

    /// Split `targets` into locally delivered keys and keys per next hop.
    pub fn group_by_next_hop(&self, targets: &[NodeId]) -> RouteGroups {
        let mut groups = RouteGroups::default();
        for &target in targets {
            match self.next_hop(target) {
                RouteDecision::Deliver => groups.local.push(target),
                RouteDecision::Forward(hop) => {
                    match groups.remote.iter_mut().find(|(h, _)| h.peer.id == hop.peer.id) {
                        Some((_, keys)) => keys.push(target),
                        None => groups.remote.push((hop, vec![target])),
                    }
                }
            }
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OverlayConfig;
    use crate::message::{RoutingRow, StateUpdate};
    use crate::peer::test_support::info;
    use tokio::time::Instant;

    fn state(id: u128) -> OverlayState {
        OverlayState::new(info(id, 0.0), OverlayConfig::default().without_id_verification()).unwrap()
    }

    fn hop_id(decision: &RouteDecision) -> Option<NodeId> {
        decision.next_hop().map(|h| h.peer.id)
    }

    #[test]
    fn own_id_delivers() {
        let s = state(42);
        assert!(matches!(s.next_hop(NodeId::new(42)), RouteDecision::Deliver));
    }

    #[test]
    fn lone_node_delivers_everything() {
        let s = state(42);
        assert!(matches!(s.next_hop(NodeId::MAX), RouteDecision::Deliver));
        assert!(matches!(s.next_hop(NodeId::MIN), RouteDecision::Deliver));
    }

    #[test]
    fn leaf_closer_than_self_forwards() {
        let mut s = state(1_000);
        s.learn(&info(1_100, 1.0), Instant::now());
        assert_eq!(hop_id(&s.next_hop(NodeId::new(1_090))), Some(NodeId::new(1_100)));
        assert_eq!(hop_id(&s.next_hop(NodeId::new(1_020))), None, "we are closer");
    }

    #[test]
    fn suspect_leaf_not_used() {
        let mut s = state(1_000);
        let now = Instant::now();
        s.learn(&info(1_100, 1.0), now);
        s.mark_suspect(Slot::Leaf { position: 0 }, NodeId::new(1_100));
        // Target still covered by the span, and no live leaf remains on that side.
        assert!(matches!(s.next_hop(NodeId::new(1_090)), RouteDecision::Deliver));
    }

    #[test]
    fn routing_table_used_outside_span() {
        let mut s = state(0);
        let now = Instant::now();
        // Fill the upper half so the span ends at 4.
        for id in 1..=4 {
            s.learn(&info(id, 1.0), now);
        }
        let far = 0xa000_0000_0000_0000_0000_0000_0000_0000u128;
        s.add_routing_node(&info(far, 1.0), now).unwrap();
        let target = NodeId::new(0xa100_0000_0000_0000_0000_0000_0000_0000);
        let decision = s.next_hop(target);
        assert_eq!(hop_id(&decision), Some(NodeId::new(far)));
        assert!(matches!(
            decision.next_hop().map(|h| h.slot),
            Some(Slot::Routing { prefix: 0, digit: 10 })
        ));
    }

    #[test]
    fn rare_case_scans_all_tables() {
        let mut s = state(0);
        let now = Instant::now();
        for id in 1..=4 {
            s.learn(&info(id, 1.0), now);
        }
        // Slot (0, 0xa) is empty, but a node in slot (0, 0x9) is closer to the target.
        let near = 0x9000_0000_0000_0000_0000_0000_0000_0000u128;
        s.add_routing_node(&info(near, 1.0), now).unwrap();
        let target = NodeId::new(0xa100_0000_0000_0000_0000_0000_0000_0000);
        assert_eq!(hop_id(&s.next_hop(target)), Some(NodeId::new(near)));
    }

    #[test]
    fn gossiped_row_used_below_empty_half() {
        let local = 0x8000_0000_0000_0000_0000_0000_0000_0000u128;
        let source = 0x9000_0000_0000_0000_0000_0000_0000_0000u128;
        let far_low = 0x1000_0000_0000_0000_0000_0000_0000_0000u128;
        let mut s = state(local);
        let update = StateUpdate {
            source: info(source, 1.0),
            rows: vec![RoutingRow {
                owner: NodeId::new(source),
                prefix: 0,
                entries: vec![info(far_low, 2.0)],
            }],
            leaf_set: Vec::new(),
            neighborhood: Vec::new(),
            send_back: false,
        };
        s.update_state(&update, Instant::now());

        // Nothing on the lower side of the leaf set, yet the gossiped entry is
        // far closer than this node.
        let target = NodeId::new(0x0500_0000_0000_0000_0000_0000_0000_0000);
        assert_eq!(hop_id(&s.next_hop(target)), Some(NodeId::new(far_low)));
        let in_slot = NodeId::new(0x1500_0000_0000_0000_0000_0000_0000_0000);
        assert_eq!(hop_id(&s.next_hop(in_slot)), Some(NodeId::new(far_low)));
    }

    #[test]
    fn groups_share_next_hop() {
        let mut s = state(1_000);
        let now = Instant::now();
        s.learn(&info(1_100, 1.0), now);
        let groups = s.group_by_next_hop(&[NodeId::new(1_090), NodeId::new(1_000), NodeId::new(1_099)]);
        assert_eq!(groups.local, vec![NodeId::new(1_000)]);
        assert_eq!(groups.remote.len(), 1);
        assert_eq!(groups.remote[0].1, vec![NodeId::new(1_090), NodeId::new(1_099)]);
    }
}
