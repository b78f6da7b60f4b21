//! Liveness probing and table repair.
//!
//! Each maintenance round pings every occupied slot, waits one ack
//! threshold, then marks slots without a fresh ack as suspect. Suspect
//! entries are skipped by routing and a repair starts for each:
//!
//! - leaf: ask the live leaves on the other side for their half on the
//!   failed side
//! - neighbor: ask the live neighbors for their neighborhood sets
//! - routing `(i, j)`: ask the live entries of row `i`, then `i + 1`, and
//!   so on, for their `(i, j)` entry, until the slot is repaired
//!
//! At most one repair per slot is in flight.

use std::sync::Arc;

use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, trace, warn};
use trellis_overlay::{
    Message, NodeId, OverlayState, Payload, PeerInfo, RepairOutcome, Side, Slot, TableKind,
};

use crate::error::Result;
use crate::events::OverlayEvent;
use crate::node::OverlayNode;

/// Identifies a repair so the same slot is not repaired twice at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum RepairKey {
    Leaf(NodeId),
    Neighbor(NodeId),
    Routing { prefix: usize, digit: usize },
}

impl RepairKey {
    fn for_slot(slot: Slot, id: NodeId) -> Self {
        match slot {
            Slot::Leaf { .. } => RepairKey::Leaf(id),
            Slot::Neighbor { .. } => RepairKey::Neighbor(id),
            Slot::Routing { prefix, digit } => RepairKey::Routing { prefix, digit },
        }
    }
}

impl OverlayNode {
    /// One probe cycle: ping, wait, check, repair.
    pub async fn maintenance_round(self: Arc<Self>) {
        let probes = self.state.read().await.probes();
        let pinged = probes.len();
        for probe in probes {
            let message = Message::direct(Payload::PingRequest {
                source: self.local.clone(),
                slot: probe.slot,
            });
            // Failure marks the slot suspect.
            let _ = self.dispatcher.send_to_slot(probe.into(), &message).await;
        }
        trace!(pinged, "Pings sent");

        sleep(self.config.ack_threshold).await;
        if self.is_shut_down() {
            return;
        }

        let failures = self.state.write().await.check_nodes(Instant::now());
        if !failures.is_empty() {
            info!(count = failures.len(), "Unresponsive entries found");
        }
        for failure in failures {
            self.start_repair(failure.slot, failure.peer).await;
        }
    }

    async fn start_repair(self: &Arc<Self>, slot: Slot, failed: PeerInfo) {
        let key = RepairKey::for_slot(slot, failed.id);
        if !self.repairs.lock().await.insert(key) {
            trace!(?key, "Repair already in flight");
            return;
        }
        let node = Arc::clone(self);
        tokio::spawn(async move {
            match slot {
                Slot::Leaf { .. } => node.repair_leaf(&failed).await,
                Slot::Neighbor { .. } => node.repair_neighbor(&failed).await,
                Slot::Routing { prefix, digit } => node.repair_routing(prefix, digit, &failed).await,
            }
            node.repairs.lock().await.remove(&key);
        });
    }

    async fn repair_leaf(&self, failed: &PeerInfo) {
        let (side, targets) = {
            let state = self.state.read().await;
            let Some(side) = state.leaves().side_of(failed.id) else {
                return;
            };
            let live = state.live_probes(TableKind::Leaf);
            // The opposite half first; at the edge of the id space it may be empty.
            let (opposite, same): (Vec<_>, Vec<_>) = live
                .into_iter()
                .partition(|p| state.leaves().side_of(p.peer.id) == Some(side.opposite()));
            (side, if opposite.is_empty() { same } else { opposite })
        };
        if targets.is_empty() {
            warn!(failed = %failed.id.short(), "No live leaves to ask for a replacement");
            return;
        }
        debug!(failed = %failed.id.short(), ?side, asked = targets.len(), "Repairing leaf");

        let request = Message::direct(Payload::LeafRequest {
            source: self.local.clone(),
            side,
            failed: failed.id,
        });
        for target in targets {
            let _ = self.dispatcher.send_to_slot(target.into(), &request).await;
        }
        // Hold the in-flight mark while answers come in.
        sleep(self.config.repair_timeout).await;
    }

    async fn repair_neighbor(&self, failed: &PeerInfo) {
        let targets = self.state.read().await.live_probes(TableKind::Neighborhood);
        if targets.is_empty() {
            warn!(failed = %failed.id.short(), "No live neighbors to ask for a replacement");
            return;
        }
        debug!(failed = %failed.id.short(), asked = targets.len(), "Repairing neighbor");

        let request = Message::direct(Payload::NeighborRequest {
            source: self.local.clone(),
            failed: failed.id,
        });
        for target in targets {
            let _ = self.dispatcher.send_to_slot(target.into(), &request).await;
        }
        sleep(self.config.repair_timeout).await;
    }

    async fn repair_routing(&self, prefix: usize, digit: usize, failed: &PeerInfo) {
        let slot = Slot::Routing { prefix, digit };
        let request = Message::direct(Payload::RouteRequest {
            source: self.local.clone(),
            prefix,
            digit,
        });

        for row in prefix..self.config.space.max_prefix() {
            let targets = {
                let state = self.state.read().await;
                if !state.is_suspect(slot, failed.id) {
                    return;
                }
                // The failed column is only skipped in its own row.
                state.row_probes(row, (row == prefix).then_some(digit))
            };
            if targets.is_empty() {
                continue;
            }
            trace!(prefix, digit, row, asked = targets.len(), "Asking row for routing entry");
            for target in targets {
                let _ = self.dispatcher.send_to_slot(target.into(), &request).await;
            }

            let resolved = async {
                loop {
                    // Registered before the check so a wakeup in between is not lost.
                    let notified = self.route_repaired.notified();
                    if !self.state.read().await.is_suspect(slot, failed.id) {
                        break;
                    }
                    notified.await;
                }
            };
            if timeout(self.config.repair_timeout, resolved).await.is_ok() {
                debug!(prefix, digit, "Routing slot repaired");
                return;
            }
        }
        debug!(prefix, digit, failed = %failed.id.short(), "Routing repair found no replacement");
    }

    pub(crate) async fn handle_leaf_request(&self, source: PeerInfo, side: Side, failed: NodeId) -> Result<()> {
        let leaves = self.state.read().await.leaf_infos_on(side);
        let reply = Message::direct(Payload::LeafResponse {
            sender: self.local.id,
            side,
            failed,
            leaves,
        });
        self.dispatcher.send_direct(&source.locator, &reply).await?;
        Ok(())
    }

    pub(crate) async fn handle_leaf_response(&self, failed: NodeId, leaves: Vec<PeerInfo>) {
        self.install_repair(TableKind::Leaf, &leaves, |state, now| {
            state.repair_leaf(failed, &leaves, now)
        })
        .await;
    }

    pub(crate) async fn handle_neighbor_request(&self, source: PeerInfo, failed: NodeId) -> Result<()> {
        let neighbors = self.state.read().await.neighbor_infos();
        let reply = Message::direct(Payload::NeighborResponse {
            sender: self.local.id,
            failed,
            neighbors,
        });
        self.dispatcher.send_direct(&source.locator, &reply).await?;
        Ok(())
    }

    pub(crate) async fn handle_neighbor_response(&self, failed: NodeId, neighbors: Vec<PeerInfo>) {
        self.install_repair(TableKind::Neighborhood, &neighbors, |state, now| {
            state.repair_neighbor(failed, &neighbors, now)
        })
        .await;
    }

    pub(crate) async fn handle_route_request(&self, source: PeerInfo, prefix: usize, digit: usize) -> Result<()> {
        let entry = self
            .state
            .read()
            .await
            .routing()
            .get(prefix, digit)
            .filter(|p| p.is_live() && p.id() != source.id)
            .map(|p| p.info().clone());
        let Some(entry) = entry else {
            return Ok(());
        };
        let reply = Message::direct(Payload::RouteResponse {
            sender: self.local.id,
            prefix,
            digit,
            entry,
        });
        self.dispatcher.send_direct(&source.locator, &reply).await?;
        Ok(())
    }

    pub(crate) async fn handle_route_response(&self, prefix: usize, digit: usize, entry: PeerInfo) {
        let candidates = [entry];
        self.install_repair(TableKind::Routing, &candidates, |state, now| {
            match state.repair_routing(prefix, digit, &candidates[0], now) {
                Ok(outcome) => outcome,
                Err(e) => {
                    debug!(prefix, digit, error = %e, "Routing repair reply refused");
                    RepairOutcome::AlreadyResolved
                }
            }
        })
        .await;
        self.route_repaired.notify_waiters();
    }

    async fn install_repair<F>(&self, table: TableKind, candidates: &[PeerInfo], install: F)
    where
        F: FnOnce(&mut OverlayState, Instant) -> RepairOutcome,
    {
        let (outcome, arrived, departed) = {
            let mut state = self.state.write().await;
            let unknown: Vec<&PeerInfo> = candidates.iter().filter(|p| !state.knows(p.id)).collect();
            let outcome = install(&mut *state, Instant::now());
            let arrived: Vec<PeerInfo> = unknown
                .into_iter()
                .filter(|p| state.knows(p.id))
                .cloned()
                .collect();
            let departed = match &outcome {
                RepairOutcome::Repaired { failed, .. } if !state.knows(*failed) => Some(*failed),
                _ => None,
            };
            (outcome, arrived, departed)
        };

        match &outcome {
            RepairOutcome::Repaired { failed, installed } => {
                info!(
                    table = %table,
                    failed = %failed.short(),
                    installed = installed.len(),
                    "Entry repaired"
                );
            }
            RepairOutcome::NoCandidate => {
                debug!(table = %table, "Repair reply had no usable candidate");
            }
            RepairOutcome::AlreadyResolved => {
                trace!(table = %table, "Repair reply for a resolved slot");
            }
        }
        for peer in arrived {
            self.emit(OverlayEvent::PeerArrived(peer));
        }
        if let Some(failed) = departed {
            self.emit(OverlayEvent::PeerDeparted(failed));
        }
    }
}
