//! Neighborhood set: the peers closest to us in the proximity metric.

use trellis_id::NodeId;

use crate::peer::Peer;
use crate::routing_table::InsertOutcome;

/// Up to `M` peers sorted by ascending proximity.
#[derive(Debug)]
pub struct NeighborhoodSet {
    local: NodeId,
    capacity: usize,
    members: Vec<Peer>,
}

impl NeighborhoodSet {
    pub fn new(local: NodeId, capacity: usize) -> Self {
        Self {
            local,
            capacity,
            members: Vec::with_capacity(capacity),
        }
    }

    /// Insert `peer` if there is room or it is strictly closer than the farthest member.
    pub fn insert(&mut self, peer: Peer) -> InsertOutcome {
        if peer.id() == self.local {
            return InsertOutcome::Unchanged;
        }
        if let Some(existing) = self.members.iter().position(|p| p.id() == peer.id()) {
            let proximity = peer.proximity();
            if self.members[existing].proximity() == proximity {
                self.members[existing].refresh(peer.info().clone(), proximity);
            } else {
                let mut current = self.members.remove(existing);
                current.refresh(peer.info().clone(), proximity);
                self.place(current);
            }
            return InsertOutcome::Refreshed;
        }
        if self.members.len() < self.capacity {
            self.place(peer);
            return InsertOutcome::Inserted;
        }
        match self.members.last() {
            Some(farthest) if peer.proximity() < farthest.proximity() => {
                let evicted = self.members.pop().map_or(peer.id(), |p| p.id());
                self.place(peer);
                InsertOutcome::Replaced { evicted }
            }
            _ => InsertOutcome::Unchanged,
        }
    }

    // Equal distances go after existing members.
    fn place(&mut self, peer: Peer) {
        let pos = self.members.partition_point(|p| p.proximity() <= peer.proximity());
        self.members.insert(pos, peer);
    }

    /// Proximity of the closest member.
    pub fn min_neighbor(&self) -> Option<f64> {
        self.members.first().map(Peer::proximity)
    }

    /// Proximity of the farthest member.
    pub fn max_neighbor(&self) -> Option<f64> {
        self.members.last().map(Peer::proximity)
    }

    pub fn get(&self, id: NodeId) -> Option<&Peer> {
        self.members.iter().find(|p| p.id() == id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Peer> {
        self.members.iter_mut().find(|p| p.id() == id)
    }

    pub fn position_of(&self, id: NodeId) -> Option<usize> {
        self.members.iter().position(|p| p.id() == id)
    }

    pub fn remove(&mut self, id: NodeId) -> Option<Peer> {
        let index = self.position_of(id)?;
        Some(self.members.remove(index))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Members closest first.
    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.members.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Peer> {
        self.members.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::test_support::peer;
    use proptest::prelude::*;

    fn set(capacity: usize) -> NeighborhoodSet {
        NeighborhoodSet::new(NodeId::new(0), capacity)
    }

    fn proximities(s: &NeighborhoodSet) -> Vec<f64> {
        s.iter().map(Peer::proximity).collect()
    }

    #[test]
    fn sorted_by_proximity() {
        let mut s = set(3);
        s.insert(peer(1, 5.0));
        s.insert(peer(2, 1.0));
        s.insert(peer(3, 3.0));
        assert_eq!(proximities(&s), vec![1.0, 3.0, 5.0]);
        assert_eq!(s.min_neighbor(), Some(1.0));
        assert_eq!(s.max_neighbor(), Some(5.0));
    }

    #[test]
    fn full_set_replaces_only_strictly_closer() {
        let mut s = set(2);
        s.insert(peer(1, 1.0));
        s.insert(peer(2, 4.0));
        assert_eq!(s.insert(peer(3, 4.0)), InsertOutcome::Unchanged);
        assert_eq!(
            s.insert(peer(4, 2.0)),
            InsertOutcome::Replaced { evicted: NodeId::new(2) }
        );
        assert_eq!(proximities(&s), vec![1.0, 2.0]);
    }

    #[test]
    fn refresh_resorts() {
        let mut s = set(3);
        s.insert(peer(1, 1.0));
        s.insert(peer(2, 2.0));
        assert_eq!(s.insert(peer(1, 3.0)), InsertOutcome::Refreshed);
        assert_eq!(s.position_of(NodeId::new(1)), Some(1));
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn refresh_at_same_proximity_keeps_order() {
        let mut s = set(3);
        s.insert(peer(1, 1.0));
        s.insert(peer(2, 1.0));
        assert_eq!(s.insert(peer(1, 1.0)), InsertOutcome::Refreshed);
        let order: Vec<NodeId> = s.iter().map(Peer::id).collect();
        assert_eq!(order, vec![NodeId::new(1), NodeId::new(2)]);
    }

    #[test]
    fn local_ignored() {
        let mut s = set(3);
        assert_eq!(s.insert(peer(0, 0.0)), InsertOutcome::Unchanged);
        assert!(s.is_empty());
    }

    proptest! {
        #[test]
        fn holds_the_m_closest(entries in prop::collection::btree_map(1u128..500, 0u32..1000, 0..40)) {
            let mut s = set(5);
            for (id, prox) in &entries {
                s.insert(peer(*id, f64::from(*prox)));
            }
            let mut expected: Vec<f64> = entries.values().map(|p| f64::from(*p)).collect();
            expected.sort_by(f64::total_cmp);
            expected.truncate(5);
            prop_assert_eq!(proximities(&s), expected);
        }
    }
}
