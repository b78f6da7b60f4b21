//! Leaf set: the numerically closest peers on either side of the local id.
//!
//! Each half holds at most `L/2` peers sorted ascending by id. The lower
//! half keeps the peers just below the local id, the upper half those just
//! above it. `min_leaf` and `max_leaf` cache the extremes.
//!
//! While a half is not full there is no known peer beyond it on that side,
//! so the covered span extends to the end of the id space in that
//! direction.

use serde::{Deserialize, Serialize};
use trellis_id::NodeId;

use crate::peer::Peer;
use crate::routing_table::InsertOutcome;

/// Which half of the leaf set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Below,
    Above,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Below => Side::Above,
            Side::Above => Side::Below,
        }
    }
}

#[derive(Debug)]
pub struct LeafSet {
    local: NodeId,
    half: usize,
    below: Vec<Peer>,
    above: Vec<Peer>,
    min_leaf: NodeId,
    max_leaf: NodeId,
}

impl LeafSet {
    /// Create an empty leaf set of total size `size`.
    pub fn new(local: NodeId, size: usize) -> Self {
        Self {
            local,
            half: size / 2,
            below: Vec::with_capacity(size / 2),
            above: Vec::with_capacity(size / 2),
            min_leaf: local,
            max_leaf: local,
        }
    }

    /// Side of the local id `id` falls on; `None` for the local id.
    pub fn side_of(&self, id: NodeId) -> Option<Side> {
        match id.cmp(&self.local) {
            std::cmp::Ordering::Less => Some(Side::Below),
            std::cmp::Ordering::Greater => Some(Side::Above),
            std::cmp::Ordering::Equal => None,
        }
    }

    fn half_mut(&mut self, side: Side) -> &mut Vec<Peer> {
        match side {
            Side::Below => &mut self.below,
            Side::Above => &mut self.above,
        }
    }

    /// Members of one half, ascending by id.
    pub fn half(&self, side: Side) -> &[Peer] {
        match side {
            Side::Below => &self.below,
            Side::Above => &self.above,
        }
    }

    pub fn is_full(&self, side: Side) -> bool {
        self.half(side).len() >= self.half
    }

    /// Insert `peer` if it is closer to the local id than the farthest
    /// member of its half, or the half has room.
    pub fn insert(&mut self, peer: Peer) -> InsertOutcome {
        let Some(side) = self.side_of(peer.id()) else {
            return InsertOutcome::Unchanged;
        };
        let cap = self.half;
        let id = peer.id();
        let members = self.half_mut(side);

        let pos = match members.binary_search_by_key(&id, Peer::id) {
            Ok(existing) => {
                let proximity = peer.proximity();
                members[existing].refresh(peer.info().clone(), proximity);
                return InsertOutcome::Refreshed;
            }
            Err(pos) => pos,
        };

        let outcome = if members.len() < cap {
            members.insert(pos, peer);
            InsertOutcome::Inserted
        } else {
            match side {
                // Farthest below is the smallest id.
                Side::Below if pos > 0 => {
                    let evicted = members.remove(0);
                    members.insert(pos - 1, peer);
                    InsertOutcome::Replaced { evicted: evicted.id() }
                }
                // Farthest above is the largest id.
                Side::Above if pos < members.len() => {
                    let evicted = members.pop().map(|p| p.id()).unwrap_or(id);
                    members.insert(pos, peer);
                    InsertOutcome::Replaced { evicted }
                }
                _ => InsertOutcome::Unchanged,
            }
        };
        self.update_bounds();
        outcome
    }

    fn update_bounds(&mut self) {
        self.min_leaf = self.below.first().map_or(self.local, Peer::id);
        self.max_leaf = self.above.last().map_or(self.local, Peer::id);
    }

    /// Smallest member id, or the local id when the lower half is empty.
    pub fn min_leaf(&self) -> NodeId {
        self.min_leaf
    }

    /// Largest member id, or the local id when the upper half is empty.
    pub fn max_leaf(&self) -> NodeId {
        self.max_leaf
    }

    /// Inclusive id range for which this leaf set is authoritative.
    ///
    /// An empty half contributes the local id, so targets on that side fall
    /// through to the routing table.
    pub fn span(&self) -> (NodeId, NodeId) {
        (self.min_leaf, self.max_leaf)
    }

    /// Whether `target` falls inside the covered span.
    pub fn covers(&self, target: NodeId) -> bool {
        let (low, high) = self.span();
        low <= target && target <= high
    }

    /// The live member of `target`'s half numerically closest to `target`.
    pub fn closest_live(&self, target: NodeId) -> Option<&Peer> {
        let side = self.side_of(target)?;
        self.half(side)
            .iter()
            .filter(|p| p.is_live())
            .min_by_key(|p| p.id().absolute_distance(&target))
    }

    /// Member closest to `target` when `target` is inside the span.
    ///
    /// `None` means the target lies outside the span, or there is no live
    /// member on its side.
    pub fn find_closest(&self, target: NodeId) -> Option<&Peer> {
        if !self.covers(target) {
            return None;
        }
        self.closest_live(target)
    }

    pub fn get(&self, id: NodeId) -> Option<&Peer> {
        let side = self.side_of(id)?;
        let members = self.half(side);
        members.binary_search_by_key(&id, Peer::id).ok().map(|i| &members[i])
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Peer> {
        let side = self.side_of(id)?;
        let members = self.half_mut(side);
        match members.binary_search_by_key(&id, Peer::id) {
            Ok(i) => Some(&mut members[i]),
            Err(_) => None,
        }
    }

    /// Slot position: lower half `0..L/2`, upper half `L/2..L`.
    pub fn position_of(&self, id: NodeId) -> Option<usize> {
        let side = self.side_of(id)?;
        let members = self.half(side);
        let index = members.binary_search_by_key(&id, Peer::id).ok()?;
        Some(match side {
            Side::Below => index,
            Side::Above => self.half + index,
        })
    }

    pub fn remove(&mut self, id: NodeId) -> Option<Peer> {
        let side = self.side_of(id)?;
        let members = self.half_mut(side);
        let index = members.binary_search_by_key(&id, Peer::id).ok()?;
        let removed = members.remove(index);
        self.update_bounds();
        Some(removed)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// All members, ascending by id.
    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.below.iter().chain(self.above.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Peer> {
        self.below.iter_mut().chain(self.above.iter_mut())
    }

    pub fn len(&self) -> usize {
        self.below.len() + self.above.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
