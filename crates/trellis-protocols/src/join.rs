//! Joining the overlay.
//!
//! A joiner first asks its bootstrap nodes for the member closest to it in
//! the proximity metric, then sends a join request keyed on its own id
//! through that member. Every hop appends itself and the routing row
//! matching its shared prefix with the joiner. The node where routing
//! ends answers the joiner directly with the accumulated rows plus its own
//! leaf and neighborhood sets. The joiner seeds its tables from that and
//! announces itself to everyone it now knows and to every node on the
//! join path.

use std::collections::BTreeMap;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};
use trellis_overlay::{
    JoinRequest, JoinResponse, Locator, Message, NodeId, Payload, PeerInfo, RouteDecision,
};

use crate::error::{Error, Result};
use crate::node::OverlayNode;

/// Reply to a nearby-node query.
#[derive(Debug, Clone, PartialEq)]
pub enum NearbyAnswer {
    Found(PeerInfo),
    NotJoined(NodeId),
}

/// Forwarding attempts for a join request whose next hop failed.
const MAX_JOIN_FORWARDS: usize = 3;

impl OverlayNode {
    /// Join through `bootstraps`, or found a new overlay if there are none.
    pub async fn join(&self, bootstraps: &[Locator]) -> Result<()> {
        if self.is_joined() {
            return Err(Error::AlreadyJoined);
        }
        if self.is_shut_down() {
            return Err(Error::ShuttingDown);
        }
        if bootstraps.is_empty() {
            self.set_joined(true);
            info!(id = %self.local.id.short(), "Founded a new overlay");
            return Ok(());
        }

        let nearby = self.find_nearby_node(bootstraps).await?;
        debug!(via = %nearby.id.short(), locator = %nearby.locator, "Joining through nearby node");

        let (tx, rx) = oneshot::channel();
        *self.pending_join.lock().await = Some(tx);
        let request = Message::routed(
            vec![self.local.id],
            Payload::JoinRequest(JoinRequest::new(self.local.clone())),
        );
        if let Err(e) = self.dispatcher.send_direct(&nearby.locator, &request).await {
            self.pending_join.lock().await.take();
            return Err(e.into());
        }

        let response = match timeout(self.config.join_timeout, rx).await {
            Ok(Ok(response)) => response,
            _ => {
                self.pending_join.lock().await.take();
                warn!(timeout = ?self.config.join_timeout, "No join response");
                return Err(Error::JoinTimeout(self.config.join_timeout));
            }
        };

        let report = self.state.write().await.parse_sets(&response, Instant::now());
        self.set_joined(true);
        info!(
            id = %self.local.id.short(),
            hops = response.path.len().saturating_sub(1),
            learned = report.arrivals.len(),
            "Joined overlay"
        );
        self.announce_arrivals(report);
        self.announce_state(&response.path).await;
        Ok(())
    }

    /// Send our state to every known peer and to `extra`, asking for theirs
    /// in return. Each peer is contacted once.
    pub(crate) async fn announce_state(&self, extra: &[PeerInfo]) {
        let (known, update) = {
            let state = self.state.read().await;
            (state.known_peers(), state.state_update(true))
        };
        let mut targets: BTreeMap<NodeId, PeerInfo> = known.into_iter().map(|p| (p.id, p)).collect();
        for peer in extra.iter().filter(|p| p.id != self.local.id) {
            targets.entry(peer.id).or_insert_with(|| peer.clone());
        }

        let message = Message::direct(Payload::StateRequest(update));
        for peer in targets.values() {
            if let Err(e) = self.dispatcher.send_direct(&peer.locator, &message).await {
                debug!(peer = %peer.id.short(), error = %e, "State announcement not delivered");
            }
        }
        debug!(recipients = targets.len(), "State announced");
    }

    /// Ask bootstrap nodes for the member closest to us.
    async fn find_nearby_node(&self, bootstraps: &[Locator]) -> Result<PeerInfo> {
        let asked_max = self.config.nearby_requests.max(1);
        let (tx, mut rx) = mpsc::channel(asked_max);
        *self.pending_nearby.lock().await = Some(tx);

        let request = Message::direct(Payload::NearbyRequest {
            source: self.local.clone(),
        });
        let mut asked = 0;
        for locator in bootstraps.iter().take(asked_max) {
            match self.dispatcher.send_direct(locator, &request).await {
                Ok(()) => asked += 1,
                Err(e) => warn!(bootstrap = %locator, error = %e, "Bootstrap unreachable"),
            }
        }

        let deadline = Instant::now() + self.config.nearby_timeout;
        let mut best: Option<(f64, PeerInfo)> = None;
        let mut answered = 0;
        while answered < asked {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(NearbyAnswer::Found(candidate))) => {
                    answered += 1;
                    if candidate.id == self.local.id {
                        continue;
                    }
                    let distance = self.state.read().await.distance_to(&candidate.coords);
                    if best.as_ref().map_or(true, |(d, _)| distance < *d) {
                        best = Some((distance, candidate));
                    }
                }
                Ok(Some(NearbyAnswer::NotJoined(sender))) => {
                    answered += 1;
                    debug!(bootstrap = %sender.short(), "Bootstrap has not joined yet");
                }
                Ok(None) | Err(_) => break,
            }
        }
        self.pending_nearby.lock().await.take();

        best.map(|(_, peer)| peer)
            .ok_or_else(|| Error::BootstrapUnreachable(bootstraps.to_vec()))
    }

    pub(crate) async fn handle_nearby_request(&self, source: PeerInfo) -> Result<()> {
        let reply = if self.is_joined() {
            let nearby = self.state.read().await.find_nearby(&source.coords);
            Payload::NearbyResponse {
                sender: self.local.id,
                nearby,
            }
        } else {
            Payload::NearbyNotJoined { sender: self.local.id }
        };
        self.dispatcher
            .send_direct(&source.locator, &Message::direct(reply))
            .await?;
        Ok(())
    }

    pub(crate) async fn handle_nearby_answer(&self, answer: NearbyAnswer) {
        match self.pending_nearby.lock().await.as_ref() {
            Some(tx) => {
                let _ = tx.try_send(answer);
            }
            None => debug!(?answer, "Nearby answer outside discovery"),
        }
    }

    pub(crate) async fn handle_join_request(&self, mut request: JoinRequest) -> Result<()> {
        let Some(joiner) = request.joiner().cloned() else {
            return Ok(());
        };
        if !self.is_joined() {
            debug!(joiner = %joiner.id.short(), "Join request before joining, dropping");
            return Ok(());
        }

        let row = {
            let state = self.state.read().await;
            let prefix = state.space().prefix_length(self.local.id, joiner.id);
            state.routing_row(prefix)
        };
        request.path.push(self.local.clone());
        request.rows.push(row);

        for attempt in 0..MAX_JOIN_FORWARDS {
            let decision = self.state.read().await.next_hop(joiner.id);
            let hop = match decision {
                RouteDecision::Forward(hop) if hop.peer.id != joiner.id => hop,
                _ => return self.terminate_join(&joiner, request).await,
            };
            let next = hop.peer.id;
            let message = Message::routed(vec![joiner.id], Payload::JoinRequest(request.clone()));
            match self.dispatcher.send_to_slot(hop.into(), &message).await {
                Ok(()) => {
                    debug!(joiner = %joiner.id.short(), next = %next.short(), "Join forwarded");
                    return Ok(());
                }
                Err(e) => {
                    debug!(joiner = %joiner.id.short(), next = %next.short(), attempt, error = %e, "Join forward failed");
                }
            }
        }
        self.terminate_join(&joiner, request).await
    }

    async fn terminate_join(&self, joiner: &PeerInfo, request: JoinRequest) -> Result<()> {
        let response = {
            let state = self.state.read().await;
            JoinResponse {
                path: request.path,
                rows: request.rows,
                leaf_set: state.leaf_infos(),
                neighborhood: state.neighbor_infos(),
            }
        };
        let hops = response.path.len().saturating_sub(1);
        self.dispatcher
            .send_direct(&joiner.locator, &Message::direct(Payload::JoinResponse(response)))
            .await?;
        info!(joiner = %joiner.id.short(), hops, "Join terminated here");
        Ok(())
    }

    pub(crate) async fn handle_join_response(&self, response: JoinResponse) -> Result<()> {
        match self.pending_join.lock().await.take() {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => debug!("Unexpected join response"),
        }
        Ok(())
    }
}
