//! Prefix routing table.
//!
//! Row `i` holds peers sharing exactly `i` leading digits with the local
//! id; column `j` is the peer's digit at position `i`. An occupied slot is
//! only ever replaced by a strictly closer peer (by proximity), so the table
//! improves monotonically.

use trellis_id::{IdSpace, NodeId};

use crate::peer::Peer;

/// Result of offering a peer to a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Took an empty slot.
    Inserted,
    /// Displaced a worse entry.
    Replaced { evicted: NodeId },
    /// The same node was already there; descriptor updated.
    Refreshed,
    /// Nothing changed.
    Unchanged,
}

impl InsertOutcome {
    /// Whether the peer is now in the table and was not before.
    pub fn is_new(&self) -> bool {
        matches!(self, InsertOutcome::Inserted | InsertOutcome::Replaced { .. })
    }
}

/// `max_prefix x max_digits` grid of optional peers.
#[derive(Debug)]
pub struct RoutingTable {
    local: NodeId,
    space: IdSpace,
    rows: Vec<Vec<Option<Peer>>>,
}

impl RoutingTable {
    pub fn new(local: NodeId, space: IdSpace) -> Self {
        let rows = (0..space.max_prefix())
            .map(|_| (0..space.max_digits()).map(|_| None).collect())
            .collect();
        Self { local, space, rows }
    }

    pub fn space(&self) -> IdSpace {
        self.space
    }

    /// The slot `id` belongs in, or `None` for the local id.
    pub fn slot_for(&self, id: NodeId) -> Option<(usize, usize)> {
        if id == self.local {
            return None;
        }
        let prefix = self.space.prefix_length(self.local, id);
        Some((prefix, self.space.digit_at(id, prefix)))
    }

    /// Insert `peer` if its slot is empty or it is strictly closer than the occupant.
    pub fn insert(&mut self, peer: Peer) -> InsertOutcome {
        let Some((prefix, digit)) = self.slot_for(peer.id()) else {
            return InsertOutcome::Unchanged;
        };
        let slot = &mut self.rows[prefix][digit];
        match slot {
            None => {
                *slot = Some(peer);
                InsertOutcome::Inserted
            }
            Some(current) if current.id() == peer.id() => {
                let proximity = peer.proximity();
                current.refresh(peer.info().clone(), proximity);
                InsertOutcome::Refreshed
            }
            Some(current) if peer.proximity() < current.proximity() => {
                let evicted = current.id();
                *slot = Some(peer);
                InsertOutcome::Replaced { evicted }
            }
            Some(_) => InsertOutcome::Unchanged,
        }
    }

    /// Unconditionally install `peer` at `(prefix, digit)`; used by repair.
    ///
    /// Returns the displaced entry. The caller guarantees the peer fits the slot.
    pub fn replace(&mut self, prefix: usize, digit: usize, peer: Peer) -> Option<Peer> {
        debug_assert_eq!(self.slot_for(peer.id()), Some((prefix, digit)));
        self.rows[prefix][digit].replace(peer)
    }

    pub fn get(&self, prefix: usize, digit: usize) -> Option<&Peer> {
        self.rows.get(prefix)?.get(digit)?.as_ref()
    }

    pub fn get_mut(&mut self, prefix: usize, digit: usize) -> Option<&mut Peer> {
        self.rows.get_mut(prefix)?.get_mut(digit)?.as_mut()
    }

    /// Look up the entry for `id` at its natural slot.
    pub fn find(&self, id: NodeId) -> Option<&Peer> {
        let (prefix, digit) = self.slot_for(id)?;
        self.get(prefix, digit).filter(|p| p.id() == id)
    }

    pub fn find_mut(&mut self, id: NodeId) -> Option<&mut Peer> {
        let (prefix, digit) = self.slot_for(id)?;
        self.get_mut(prefix, digit).filter(|p| p.id() == id)
    }

    /// Remove `id` from its slot.
    pub fn remove(&mut self, id: NodeId) -> Option<Peer> {
        let (prefix, digit) = self.slot_for(id)?;
        let slot = &mut self.rows[prefix][digit];
        if slot.as_ref().map(Peer::id) == Some(id) {
            slot.take()
        } else {
            None
        }
    }

    /// Entries of one row with their digit.
    pub fn row(&self, prefix: usize) -> impl Iterator<Item = (usize, &Peer)> {
        self.rows
            .get(prefix)
            .into_iter()
            .flat_map(|row| row.iter().enumerate())
            .filter_map(|(digit, slot)| slot.as_ref().map(|p| (digit, p)))
    }

    /// All entries with their coordinates.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &Peer)> {
        self.rows.iter().enumerate().flat_map(|(prefix, row)| {
            row.iter()
                .enumerate()
                .filter_map(move |(digit, slot)| slot.as_ref().map(|p| (prefix, digit, p)))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, usize, &mut Peer)> {
        self.rows.iter_mut().enumerate().flat_map(|(prefix, row)| {
            row.iter_mut()
                .enumerate()
                .filter_map(move |(digit, slot)| slot.as_mut().map(|p| (prefix, digit, p)))
        })
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::test_support::peer;
    use proptest::prelude::*;

    const LOCAL: u128 = 0x1234_0000_0000_0000_0000_0000_0000_0000;

    fn table() -> RoutingTable {
        RoutingTable::new(NodeId::new(LOCAL), IdSpace::HEX)
    }

    #[test]
    fn slot_follows_prefix_and_digit() {
        let t = table();
        let id = NodeId::new(0x1239_0000_0000_0000_0000_0000_0000_0000);
        assert_eq!(t.slot_for(id), Some((3, 9)));
        assert_eq!(t.slot_for(NodeId::new(LOCAL)), None);
    }

    #[test]
    fn local_id_is_ignored() {
        let mut t = table();
        assert_eq!(t.insert(peer(LOCAL, 0.0)), InsertOutcome::Unchanged);
        assert!(t.is_empty());
    }

    #[test]
    fn closer_peer_replaces() {
        let mut t = table();
        let far = 0x9000_0000_0000_0000_0000_0000_0000_0001;
        let near = 0x9000_0000_0000_0000_0000_0000_0000_0002;
        assert_eq!(t.insert(peer(far, 5.0)), InsertOutcome::Inserted);
        assert_eq!(t.insert(peer(near, 7.0)), InsertOutcome::Unchanged);
        assert_eq!(
            t.insert(peer(near, 2.0)),
            InsertOutcome::Replaced { evicted: NodeId::new(far) }
        );
        assert_eq!(t.get(0, 9).map(Peer::id), Some(NodeId::new(near)));
    }

    #[test]
    fn equal_proximity_keeps_incumbent() {
        let mut t = table();
        let a = 0x9000_0000_0000_0000_0000_0000_0000_0001;
        let b = 0x9000_0000_0000_0000_0000_0000_0000_0002;
        t.insert(peer(a, 3.0));
        assert_eq!(t.insert(peer(b, 3.0)), InsertOutcome::Unchanged);
        assert_eq!(t.get(0, 9).map(Peer::id), Some(NodeId::new(a)));
    }

    #[test]
    fn reinsert_refreshes() {
        let mut t = table();
        let a = 0x9000_0000_0000_0000_0000_0000_0000_0001;
        t.insert(peer(a, 3.0));
        assert_eq!(t.insert(peer(a, 4.0)), InsertOutcome::Refreshed);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn remove_only_matching_id() {
        let mut t = table();
        let a = 0x9000_0000_0000_0000_0000_0000_0000_0001;
        let b = 0x9000_0000_0000_0000_0000_0000_0000_0002;
        t.insert(peer(a, 3.0));
        assert!(t.remove(NodeId::new(b)).is_none());
        assert!(t.remove(NodeId::new(a)).is_some());
        assert!(t.is_empty());
    }

    proptest! {
        #[test]
        fn entries_sit_in_their_slot(ids in prop::collection::vec(any::<u128>(), 1..64)) {
            let mut t = table();
            for (k, id) in ids.iter().enumerate() {
                t.insert(peer(*id, k as f64));
            }
            let local = NodeId::new(LOCAL);
            for (i, j, p) in t.iter() {
                prop_assert_eq!(IdSpace::HEX.prefix_length(local, p.id()), i);
                prop_assert_eq!(IdSpace::HEX.digit_at(p.id(), i), j);
                prop_assert_ne!(p.id(), local);
            }
        }

        #[test]
        fn slot_proximity_never_worsens(entries in prop::collection::hash_map(0u128..1000, 0.0f64..100.0, 1..32)) {
            // Every candidate maps to slot (0, 9).
            let base = 0x9000_0000_0000_0000_0000_0000_0000_0000u128;
            let mut t = table();
            let mut previous = f64::INFINITY;
            for (id, prox) in entries {
                t.insert(peer(base + id, prox));
                let current = t.get(0, 9).map(Peer::proximity).unwrap();
                prop_assert!(current <= previous);
                prop_assert!(current <= prox);
                previous = current;
            }
        }
    }
}
