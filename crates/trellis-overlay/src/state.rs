//! Aggregate overlay state: the three tables behind one owner.
//!
//! All mutation happens through `&mut OverlayState`, so whoever holds the
//! write lock sees a consistent view across tables. Every method takes the
//! current instant explicitly; nothing here reads a clock.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;
use trellis_id::{Coordinates, EuclideanProximity, IdSpace, NodeId, Proximity};

use crate::config::OverlayConfig;
use crate::error::{Error, RejectReason, Result};
use crate::leaf_set::{LeafSet, Side};
use crate::link::Link;
use crate::message::{JoinResponse, RoutingRow, StateUpdate};
use crate::neighborhood::NeighborhoodSet;
use crate::peer::{Peer, PeerInfo};
use crate::routing_table::{InsertOutcome, RoutingTable};

/// The three tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableKind {
    Leaf,
    Neighborhood,
    Routing,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TableKind::Leaf => "leaf",
            TableKind::Neighborhood => "neighborhood",
            TableKind::Routing => "routing",
        })
    }
}

/// A table slot. Leaf and neighborhood positions are informational since
/// entries shift on insert; those slots are resolved by peer id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    Leaf { position: usize },
    Neighbor { position: usize },
    Routing { prefix: usize, digit: usize },
}

impl Slot {
    pub fn kind(&self) -> TableKind {
        match self {
            Slot::Leaf { .. } => TableKind::Leaf,
            Slot::Neighbor { .. } => TableKind::Neighborhood,
            Slot::Routing { .. } => TableKind::Routing,
        }
    }
}

/// A liveness probe to send.
#[derive(Debug, Clone)]
pub struct Probe {
    pub slot: Slot,
    pub peer: PeerInfo,
    pub link: Option<Arc<dyn Link>>,
    pub suspect: bool,
}

impl Probe {
    fn new(slot: Slot, peer: &Peer) -> Self {
        Self {
            slot,
            peer: peer.info().clone(),
            link: peer.link(),
            suspect: peer.is_suspect(),
        }
    }
}

/// A slot whose occupant missed its ack deadline.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub slot: Slot,
    pub peer: PeerInfo,
}

/// What a bulk ingestion changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    /// Peers that were unknown before and are now in at least one table.
    pub arrivals: Vec<PeerInfo>,
    /// Entries refused by admission checks.
    pub rejected: usize,
}

impl IngestReport {
    fn record_arrival(&mut self, info: &PeerInfo) {
        if !self.arrivals.iter().any(|p| p.id == info.id) {
            self.arrivals.push(info.clone());
        }
    }
}

/// Result of installing repair candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    /// The failed entry was replaced.
    Repaired { failed: NodeId, installed: Vec<NodeId> },
    /// The entry recovered or was already gone; nothing to repair.
    AlreadyResolved,
    /// No usable replacement; the suspect entry stays.
    NoCandidate,
}

/// Counts of live table entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayStats {
    pub leaf_set: usize,
    pub neighborhood: usize,
    pub routing_entries: usize,
    pub suspects: usize,
}

/// One table entry in a membership view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberView {
    pub peer: PeerInfo,
    pub proximity: f64,
    pub suspect: bool,
}

/// A routing-table entry in a membership view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingView {
    pub prefix: usize,
    pub digit: usize,
    pub member: MemberView,
}

/// Serializable copy of everything this node knows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub local: PeerInfo,
    pub leaf_set: Vec<MemberView>,
    pub neighborhood: Vec<MemberView>,
    pub routing: Vec<RoutingView>,
}

impl Membership {
    /// Ids in the leaf set, ascending.
    pub fn leaf_ids(&self) -> Vec<NodeId> {
        self.leaf_set.iter().map(|m| m.peer.id).collect()
    }

    /// Ids in the neighborhood set, closest first.
    pub fn neighbor_ids(&self) -> Vec<NodeId> {
        self.neighborhood.iter().map(|m| m.peer.id).collect()
    }
}

fn view(peer: &Peer) -> MemberView {
    MemberView {
        peer: peer.info().clone(),
        proximity: peer.proximity(),
        suspect: peer.is_suspect(),
    }
}

/// Routing table, leaf set and neighborhood set of one node.
#[derive(Debug)]
pub struct OverlayState {
    config: OverlayConfig,
    local: PeerInfo,
    proximity: Arc<dyn Proximity>,
    routing: RoutingTable,
    leaves: LeafSet,
    neighbors: NeighborhoodSet,
}

impl OverlayState {
    /// Create empty tables using Euclidean proximity.
    pub fn new(local: PeerInfo, config: OverlayConfig) -> Result<Self> {
        Self::with_proximity(local, config, Arc::new(EuclideanProximity))
    }

    /// Create empty tables with a custom proximity metric.
    pub fn with_proximity(local: PeerInfo, config: OverlayConfig, proximity: Arc<dyn Proximity>) -> Result<Self> {
        config.validate()?;
        local.coords.validate()?;
        Ok(Self {
            routing: RoutingTable::new(local.id, config.space),
            leaves: LeafSet::new(local.id, config.leaf_size),
            neighbors: NeighborhoodSet::new(local.id, config.neighborhood_size),
            config,
            local,
            proximity,
        })
    }

    pub fn local(&self) -> &PeerInfo {
        &self.local
    }

    pub fn local_id(&self) -> NodeId {
        self.local.id
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    pub fn space(&self) -> IdSpace {
        self.config.space
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    pub fn leaves(&self) -> &LeafSet {
        &self.leaves
    }

    pub fn neighbors(&self) -> &NeighborhoodSet {
        &self.neighbors
    }

    /// Proximity from the local node to `coords`.
    pub fn distance_to(&self, coords: &Coordinates) -> f64 {
        self.proximity.distance(&self.local.coords, coords)
    }

    /// Proximity between two arbitrary coordinate sets.
    pub fn distance_between(&self, a: &Coordinates, b: &Coordinates) -> f64 {
        self.proximity.distance(a, b)
    }

    /// Admission checks applied to every peer before it enters a table.
    pub fn admit(&self, info: &PeerInfo) -> Result<()> {
        let reject = |reason| Error::Rejected { id: info.id, reason };
        if let Err(e) = info.coords.validate() {
            return Err(reject(RejectReason::BadCoordinates(e.to_string())));
        }
        if !self.local.coords.is_compatible(&info.coords) {
            return Err(reject(RejectReason::DimensionMismatch {
                expected: self.local.coords.dimensions(),
                actual: info.coords.dimensions(),
            }));
        }
        if self.config.verify_ids && NodeId::hash(info.locator.as_str()) != info.id {
            return Err(reject(RejectReason::IdMismatch(info.locator.clone())));
        }
        Ok(())
    }

    fn entry(&self, info: &PeerInfo, now: Instant) -> Result<Peer> {
        self.admit(info)?;
        Ok(Peer::new(info.clone(), self.distance_to(&info.coords), now))
    }

    /// Offer a peer to the routing table.
    pub fn add_routing_node(&mut self, info: &PeerInfo, now: Instant) -> Result<InsertOutcome> {
        if info.id == self.local.id {
            return Ok(InsertOutcome::Unchanged);
        }
        let peer = self.entry(info, now)?;
        Ok(self.routing.insert(peer))
    }

    /// Offer a peer to the leaf set.
    pub fn add_leaf_node(&mut self, info: &PeerInfo, now: Instant) -> Result<InsertOutcome> {
        if info.id == self.local.id {
            return Ok(InsertOutcome::Unchanged);
        }
        let peer = self.entry(info, now)?;
        Ok(self.leaves.insert(peer))
    }

    /// Offer a peer to the neighborhood set.
    pub fn add_neighbor_node(&mut self, info: &PeerInfo, now: Instant) -> Result<InsertOutcome> {
        if info.id == self.local.id {
            return Ok(InsertOutcome::Unchanged);
        }
        let peer = self.entry(info, now)?;
        Ok(self.neighbors.insert(peer))
    }

    fn add_to(&mut self, table: TableKind, info: &PeerInfo, now: Instant) -> Result<InsertOutcome> {
        match table {
            TableKind::Leaf => self.add_leaf_node(info, now),
            TableKind::Neighborhood => self.add_neighbor_node(info, now),
            TableKind::Routing => self.add_routing_node(info, now),
        }
    }

    fn offer(&mut self, table: TableKind, info: &PeerInfo, now: Instant, report: &mut IngestReport) {
        let known = self.knows(info.id);
        match self.add_to(table, info, now) {
            Ok(outcome) if !known && outcome.is_new() => report.record_arrival(info),
            Ok(_) => {}
            Err(e) => {
                report.rejected += 1;
                debug!(peer = %info.id.short(), table = %table, error = %e, "Peer refused");
            }
        }
    }

    /// Offer a peer to every table.
    pub fn learn(&mut self, info: &PeerInfo, now: Instant) -> IngestReport {
        let mut report = IngestReport::default();
        for table in [TableKind::Leaf, TableKind::Neighborhood, TableKind::Routing] {
            self.offer(table, info, now, &mut report);
        }
        report
    }

    /// Whether `id` occupies any slot.
    pub fn knows(&self, id: NodeId) -> bool {
        self.leaves.contains(id) || self.neighbors.contains(id) || self.routing.find(id).is_some()
    }

    /// Record first-hand proof that `id` is alive in every slot it holds.
    pub fn touch(&mut self, id: NodeId, now: Instant) {
        if let Some(p) = self.leaves.get_mut(id) {
            p.touch(now);
        }
        if let Some(p) = self.neighbors.get_mut(id) {
            p.touch(now);
        }
        if let Some(p) = self.routing.find_mut(id) {
            p.touch(now);
        }
    }

    /// Seed empty tables from a join response.
    ///
    /// Rows and path members go to the routing table. The terminal node's
    /// leaf set seeds ours and the terminal node itself joins it. The
    /// terminal node's neighborhood and the first hop after us seed the
    /// neighborhood set.
    pub fn parse_sets(&mut self, response: &JoinResponse, now: Instant) -> IngestReport {
        let mut report = IngestReport::default();
        for row in &response.rows {
            for entry in &row.entries {
                self.offer(TableKind::Routing, entry, now, &mut report);
            }
        }
        for entry in &response.leaf_set {
            self.offer(TableKind::Leaf, entry, now, &mut report);
        }
        for entry in &response.neighborhood {
            self.offer(TableKind::Neighborhood, entry, now, &mut report);
            self.offer(TableKind::Routing, entry, now, &mut report);
        }
        for hop in response.path.iter().skip(1) {
            self.offer(TableKind::Routing, hop, now, &mut report);
        }
        if let Some(first_hop) = response.path.get(1) {
            self.offer(TableKind::Neighborhood, first_hop, now, &mut report);
        }
        if let Some(terminal) = response.terminal() {
            self.offer(TableKind::Leaf, terminal, now, &mut report);
            self.touch(terminal.id, now);
        }
        report
    }

    /// Merge another node's announced state.
    pub fn update_state(&mut self, update: &StateUpdate, now: Instant) -> IngestReport {
        let mut report = self.learn(&update.source, now);
        self.touch(update.source.id, now);

        let shared = self.space().prefix_length(self.local.id, update.source.id);
        for row in update.rows.iter().filter(|r| r.prefix <= shared) {
            for entry in &row.entries {
                self.offer(TableKind::Routing, entry, now, &mut report);
            }
        }
        for entry in &update.leaf_set {
            self.offer(TableKind::Leaf, entry, now, &mut report);
            self.offer(TableKind::Routing, entry, now, &mut report);
        }
        for entry in &update.neighborhood {
            self.offer(TableKind::Neighborhood, entry, now, &mut report);
            self.offer(TableKind::Routing, entry, now, &mut report);
        }
        report
    }

    /// Live entries of routing row `prefix`.
    pub fn routing_row(&self, prefix: usize) -> RoutingRow {
        RoutingRow {
            owner: self.local.id,
            prefix,
            entries: self
                .routing
                .row(prefix)
                .filter(|(_, p)| p.is_live())
                .map(|(_, p)| p.info().clone())
                .collect(),
        }
    }

    /// Live leaf set members.
    pub fn leaf_infos(&self) -> Vec<PeerInfo> {
        self.leaves.iter().filter(|p| p.is_live()).map(|p| p.info().clone()).collect()
    }

    /// Live leaf set members on one side.
    pub fn leaf_infos_on(&self, side: Side) -> Vec<PeerInfo> {
        self.leaves
            .half(side)
            .iter()
            .filter(|p| p.is_live())
            .map(|p| p.info().clone())
            .collect()
    }

    /// Live neighborhood members.
    pub fn neighbor_infos(&self) -> Vec<PeerInfo> {
        self.neighbors.iter().filter(|p| p.is_live()).map(|p| p.info().clone()).collect()
    }

    /// Our state as announced to other nodes. Suspect entries are left out.
    pub fn state_update(&self, send_back: bool) -> StateUpdate {
        let rows = (0..self.space().max_prefix())
            .map(|prefix| self.routing_row(prefix))
            .filter(|row| !row.entries.is_empty())
            .collect();
        StateUpdate {
            source: self.local.clone(),
            rows,
            leaf_set: self.leaf_infos(),
            neighborhood: self.neighbor_infos(),
            send_back,
        }
    }

    /// Every distinct peer in any table, ascending by id.
    pub fn known_peers(&self) -> Vec<PeerInfo> {
        let mut peers = BTreeMap::new();
        let all = self
            .leaves
            .iter()
            .chain(self.neighbors.iter())
            .chain(self.routing.iter().map(|(_, _, p)| p));
        for peer in all {
            peers.entry(peer.id()).or_insert_with(|| peer.info().clone());
        }
        peers.into_values().collect()
    }

    /// The node (ourselves included) closest in proximity to `coords`.
    pub fn find_nearby(&self, coords: &Coordinates) -> PeerInfo {
        let mut best = &self.local;
        let mut best_distance = self.distance_between(&self.local.coords, coords);
        let all = self
            .leaves
            .iter()
            .chain(self.neighbors.iter())
            .chain(self.routing.iter().map(|(_, _, p)| p))
            .filter(|p| p.is_live());
        for peer in all {
            let d = self.distance_between(&peer.info().coords, coords);
            if d < best_distance {
                best = peer.info();
                best_distance = d;
            }
        }
        best.clone()
    }

    fn slot_peer(&self, slot: Slot, id: NodeId) -> Option<&Peer> {
        match slot {
            Slot::Routing { prefix, digit } => self.routing.get(prefix, digit).filter(|p| p.id() == id),
            Slot::Leaf { .. } => self.leaves.get(id),
            Slot::Neighbor { .. } => self.neighbors.get(id),
        }
    }

    fn slot_peer_mut(&mut self, slot: Slot, id: NodeId) -> Option<&mut Peer> {
        match slot {
            Slot::Routing { prefix, digit } => self.routing.get_mut(prefix, digit).filter(|p| p.id() == id),
            Slot::Leaf { .. } => self.leaves.get_mut(id),
            Slot::Neighbor { .. } => self.neighbors.get_mut(id),
        }
    }

    /// Whether `slot` still holds `id`.
    pub fn holds(&self, slot: Slot, id: NodeId) -> bool {
        self.slot_peer(slot, id).is_some()
    }

    /// Whether the entry for `id` at `slot` is suspect.
    pub fn is_suspect(&self, slot: Slot, id: NodeId) -> bool {
        self.slot_peer(slot, id).is_some_and(Peer::is_suspect)
    }

    /// Slot handles for every occupied slot.
    pub fn probes(&self) -> Vec<Probe> {
        let leaves = self
            .leaves
            .iter()
            .enumerate()
            .map(|(position, p)| Probe::new(Slot::Leaf { position }, p));
        let neighbors = self
            .neighbors
            .iter()
            .enumerate()
            .map(|(position, p)| Probe::new(Slot::Neighbor { position }, p));
        let routing = self
            .routing
            .iter()
            .map(|(prefix, digit, p)| Probe::new(Slot::Routing { prefix, digit }, p));
        leaves.chain(neighbors).chain(routing).collect()
    }

    /// Slot handles for the live entries of one table.
    pub fn live_probes(&self, kind: TableKind) -> Vec<Probe> {
        self.probes()
            .into_iter()
            .filter(|p| p.slot.kind() == kind && !p.suspect)
            .collect()
    }

    /// Live entries of routing row `prefix`, skipping column `skip_digit` if given.
    pub fn row_probes(&self, prefix: usize, skip_digit: Option<usize>) -> Vec<Probe> {
        self.routing
            .row(prefix)
            .filter(|(digit, p)| Some(*digit) != skip_digit && p.is_live())
            .map(|(digit, p)| Probe::new(Slot::Routing { prefix, digit }, p))
            .collect()
    }

    /// Apply a ping ack from `responder` for `slot`. Returns whether a slot was refreshed.
    pub fn handle_ack(&mut self, responder: NodeId, slot: Slot, now: Instant) -> bool {
        match self.slot_peer_mut(slot, responder) {
            Some(peer) => {
                peer.touch(now);
                true
            }
            None => false,
        }
    }

    /// Mark every entry whose last ack is too old as suspect and return them.
    pub fn check_nodes(&mut self, now: Instant) -> Vec<Failure> {
        let threshold = self.config.ack_threshold;
        let mut failures = Vec::new();
        for (position, peer) in self.leaves.iter_mut().enumerate() {
            if peer.is_stale(now, threshold) {
                peer.mark_suspect();
                failures.push(Failure {
                    slot: Slot::Leaf { position },
                    peer: peer.info().clone(),
                });
            }
        }
        for (position, peer) in self.neighbors.iter_mut().enumerate() {
            if peer.is_stale(now, threshold) {
                peer.mark_suspect();
                failures.push(Failure {
                    slot: Slot::Neighbor { position },
                    peer: peer.info().clone(),
                });
            }
        }
        for (prefix, digit, peer) in self.routing.iter_mut() {
            if peer.is_stale(now, threshold) {
                peer.mark_suspect();
                failures.push(Failure {
                    slot: Slot::Routing { prefix, digit },
                    peer: peer.info().clone(),
                });
            }
        }
        failures
    }

    /// Mark the entry for `id` at `slot` suspect, e.g. after a failed send.
    pub fn mark_suspect(&mut self, slot: Slot, id: NodeId) -> bool {
        match self.slot_peer_mut(slot, id) {
            Some(peer) => {
                peer.mark_suspect();
                true
            }
            None => false,
        }
    }

    /// Replace a failed leaf with candidates from another leaf set.
    ///
    /// The failed entry is removed only if at least one admissible
    /// candidate on its side is not already a member.
    pub fn repair_leaf(&mut self, failed: NodeId, candidates: &[PeerInfo], now: Instant) -> RepairOutcome {
        let Some(side) = self.leaves.side_of(failed) else {
            return RepairOutcome::AlreadyResolved;
        };
        if !self.leaves.get(failed).is_some_and(Peer::is_suspect) {
            return RepairOutcome::AlreadyResolved;
        }
        let usable: Vec<&PeerInfo> = candidates
            .iter()
            .filter(|c| c.id != failed && c.id != self.local.id)
            .filter(|c| self.leaves.side_of(c.id) == Some(side))
            .filter(|c| !self.leaves.contains(c.id))
            .filter(|c| self.admit(c).is_ok())
            .collect();
        if usable.is_empty() {
            return RepairOutcome::NoCandidate;
        }

        self.leaves.remove(failed);
        let mut installed = Vec::new();
        for candidate in candidates.iter().filter(|c| c.id != failed) {
            if let Ok(outcome) = self.add_leaf_node(candidate, now) {
                if outcome.is_new() {
                    installed.push(candidate.id);
                }
            }
        }
        installed.retain(|id| self.leaves.contains(*id));
        RepairOutcome::Repaired { failed, installed }
    }

    /// Replace a failed neighbor with the closest unknown candidate.
    pub fn repair_neighbor(&mut self, failed: NodeId, candidates: &[PeerInfo], now: Instant) -> RepairOutcome {
        if !self.neighbors.get(failed).is_some_and(Peer::is_suspect) {
            return RepairOutcome::AlreadyResolved;
        }
        let best = candidates
            .iter()
            .filter(|c| c.id != failed && c.id != self.local.id)
            .filter(|c| !self.neighbors.contains(c.id))
            .filter(|c| self.admit(c).is_ok())
            .min_by(|a, b| self.distance_to(&a.coords).total_cmp(&self.distance_to(&b.coords)));
        let Some(best) = best.cloned() else {
            return RepairOutcome::NoCandidate;
        };

        self.neighbors.remove(failed);
        match self.add_neighbor_node(&best, now) {
            Ok(outcome) if outcome.is_new() => RepairOutcome::Repaired {
                failed,
                installed: vec![best.id],
            },
            _ => RepairOutcome::Repaired {
                failed,
                installed: Vec::new(),
            },
        }
    }

    /// Install a routing repair reply for slot `(prefix, digit)`.
    ///
    /// A suspect occupant is replaced outright; a live one only by a
    /// strictly closer candidate.
    pub fn repair_routing(
        &mut self,
        prefix: usize,
        digit: usize,
        candidate: &PeerInfo,
        now: Instant,
    ) -> Result<RepairOutcome> {
        if self.routing.slot_for(candidate.id) != Some((prefix, digit)) {
            return Err(Error::Rejected {
                id: candidate.id,
                reason: RejectReason::WrongSlot { prefix, digit },
            });
        }
        let peer = self.entry(candidate, now)?;
        let suspect = self.routing.get(prefix, digit).filter(|p| p.is_suspect()).map(Peer::id);
        match suspect {
            Some(failed) if failed != candidate.id => {
                self.routing.replace(prefix, digit, peer);
                Ok(RepairOutcome::Repaired {
                    failed,
                    installed: vec![candidate.id],
                })
            }
            _ => match self.routing.insert(peer) {
                InsertOutcome::Replaced { evicted } => Ok(RepairOutcome::Repaired {
                    failed: evicted,
                    installed: vec![candidate.id],
                }),
                _ => Ok(RepairOutcome::AlreadyResolved),
            },
        }
    }

    /// Drop `id` from every table. Returns whether anything was removed.
    pub fn remove_peer(&mut self, id: NodeId) -> bool {
        let leaf = self.leaves.remove(id).is_some();
        let neighbor = self.neighbors.remove(id).is_some();
        let routing = self.routing.remove(id).is_some();
        leaf || neighbor || routing
    }

    /// The open link for `id` at `slot`.
    pub fn link_for(&self, slot: Slot, id: NodeId) -> Option<Arc<dyn Link>> {
        self.slot_peer(slot, id).and_then(Peer::link)
    }

    /// Store a freshly opened link in `slot` if it still holds `id`.
    ///
    /// Returns the link the slot now uses, which may be one another task
    /// attached first. `None` means the slot changed hands.
    pub fn attach_link(&mut self, slot: Slot, id: NodeId, link: Arc<dyn Link>) -> Option<Arc<dyn Link>> {
        self.slot_peer_mut(slot, id).map(|p| p.attach_link(link))
    }

    /// Drop the link held for `id` at `slot`, e.g. after it failed.
    pub fn detach_link(&mut self, slot: Slot, id: NodeId) -> bool {
        self.slot_peer_mut(slot, id).and_then(Peer::detach_link).is_some()
    }

    /// Detach every link. Returns how many were held.
    pub fn close_links(&mut self) -> usize {
        let mut closed = 0;
        let leaves = self.leaves.iter_mut();
        let neighbors = self.neighbors.iter_mut();
        let routing = self.routing.iter_mut().map(|(_, _, p)| p);
        for peer in leaves.chain(neighbors).chain(routing) {
            if peer.detach_link().is_some() {
                closed += 1;
            }
        }
        closed
    }

    /// Live entry counts.
    pub fn stats(&self) -> OverlayStats {
        let suspects = self
            .leaves
            .iter()
            .chain(self.neighbors.iter())
            .chain(self.routing.iter().map(|(_, _, p)| p))
            .filter(|p| p.is_suspect())
            .count();
        OverlayStats {
            leaf_set: self.leaves.iter().filter(|p| p.is_live()).count(),
            neighborhood: self.neighbors.iter().filter(|p| p.is_live()).count(),
            routing_entries: self.routing.iter().filter(|(_, _, p)| p.is_live()).count(),
            suspects,
        }
    }

    /// Copy of all three tables.
    pub fn membership(&self) -> Membership {
        Membership {
            local: self.local.clone(),
            leaf_set: self.leaves.iter().map(view).collect(),
            neighborhood: self.neighbors.iter().map(view).collect(),
            routing: self
                .routing
                .iter()
                .map(|(prefix, digit, p)| RoutingView {
                    prefix,
                    digit,
                    member: view(p),
                })
                .collect(),
        }
    }
}
