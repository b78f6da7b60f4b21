//! Overlay node.
//!
//! Owns the overlay state behind an `Arc<RwLock<_>>`, drains its inbox, and
//! runs the maintenance timer. Every inbound message is handled on its own
//! task so a slow peer never stalls the loop.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex, Notify, RwLock};
use tokio::time::{timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};
use trellis_overlay::{
    IngestReport, JoinResponse, Membership, Message, MessageId, NodeId, OverlayConfig, OverlayState,
    OverlayStats, Payload, PeerInfo, StateUpdate, Transport,
};

use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::events::OverlayEvent;
use crate::join::NearbyAnswer;
use crate::repair::RepairKey;

/// Buffered events per subscriber before the slowest one lags.
const EVENT_CAPACITY: usize = 256;

/// Reroute attempts for a routed message whose next hop failed.
const MAX_ROUTE_ATTEMPTS: usize = 3;

/// One participant in the overlay.
pub struct OverlayNode {
    pub(crate) local: PeerInfo,
    pub(crate) config: OverlayConfig,
    pub(crate) state: Arc<RwLock<OverlayState>>,
    pub(crate) dispatcher: Dispatcher,
    events: broadcast::Sender<OverlayEvent>,
    joined: AtomicBool,
    pub(crate) pending_join: Mutex<Option<oneshot::Sender<JoinResponse>>>,
    pub(crate) pending_nearby: Mutex<Option<mpsc::Sender<NearbyAnswer>>>,
    pub(crate) repairs: Mutex<HashSet<RepairKey>>,
    pub(crate) route_repaired: Notify,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for OverlayNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayNode")
            .field("id", &self.local.id.short())
            .field("locator", &self.local.locator)
            .field("joined", &self.is_joined())
            .finish()
    }
}

impl OverlayNode {
    /// Create a node with empty tables.
    pub fn new(local: PeerInfo, config: OverlayConfig, transport: Arc<dyn Transport>) -> Result<Arc<Self>> {
        let state = OverlayState::new(local, config)?;
        Ok(Self::with_state(state, transport))
    }

    /// Create a node around prepared state, e.g. with a custom proximity metric.
    pub fn with_state(state: OverlayState, transport: Arc<dyn Transport>) -> Arc<Self> {
        let local = state.local().clone();
        let config = state.config().clone();
        let state = Arc::new(RwLock::new(state));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            dispatcher: Dispatcher::new(Arc::clone(&state), transport),
            local,
            config,
            state,
            events,
            joined: AtomicBool::new(false),
            pending_join: Mutex::new(None),
            pending_nearby: Mutex::new(None),
            repairs: Mutex::new(HashSet::new()),
            route_repaired: Notify::new(),
            shutdown,
        })
    }

    pub fn local(&self) -> &PeerInfo {
        &self.local
    }

    pub fn id(&self) -> NodeId {
        self.local.id
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    /// Shared handle to the tables.
    pub fn state(&self) -> Arc<RwLock<OverlayState>> {
        Arc::clone(&self.state)
    }

    /// Whether the node has joined (or founded) an overlay.
    pub fn is_joined(&self) -> bool {
        self.joined.load(Ordering::SeqCst)
    }

    pub(crate) fn set_joined(&self, joined: bool) {
        self.joined.store(joined, Ordering::SeqCst);
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Receiver that flips to `true` when the node stops.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Subscribe to membership and delivery events.
    pub fn subscribe(&self) -> broadcast::Receiver<OverlayEvent> {
        self.events.subscribe()
    }

    /// Copy of all tables.
    pub async fn current_membership(&self) -> Membership {
        self.state.read().await.membership()
    }

    pub async fn stats(&self) -> OverlayStats {
        self.state.read().await.stats()
    }

    pub(crate) fn emit(&self, event: OverlayEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub(crate) fn announce_arrivals(&self, report: IngestReport) {
        if report.rejected > 0 {
            debug!(rejected = report.rejected, "Ignored invalid peer entries");
        }
        for peer in report.arrivals {
            debug!(peer = %peer.id.short(), locator = %peer.locator, "Peer arrived");
            self.emit(OverlayEvent::PeerArrived(peer));
        }
    }

    /// Drain `inbox` and drive maintenance until shutdown.
    pub async fn run(self: Arc<Self>, mut inbox: mpsc::Receiver<Message>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(self.config.ping_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        info!(
            id = %self.local.id.short(),
            locator = %self.local.locator,
            "Overlay node running"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                received = inbox.recv() => match received {
                    Some(message) => {
                        let node = Arc::clone(&self);
                        tokio::spawn(async move { node.handle_message(message).await });
                    }
                    None => {
                        info!("Inbox closed");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if self.is_joined() {
                        let node = Arc::clone(&self);
                        tokio::spawn(async move { node.maintenance_round().await });
                    }
                }
                _ = shutdown.changed() => {}
            }
        }
        debug!(id = %self.local.id.short(), "Overlay loop stopped");
    }

    /// Dispatch one inbound message by opcode.
    pub async fn handle_message(self: Arc<Self>, message: Message) {
        let kind = message.kind();
        let Message { id, destinations, payload } = message;
        trace!(message = %id, kind = %kind, "Handling message");

        let result = match payload {
            Payload::JoinRequest(request) => self.handle_join_request(request).await,
            Payload::JoinResponse(response) => self.handle_join_response(response).await,
            Payload::StateRequest(update) => self.handle_state(update, true).await,
            Payload::StateResponse(update) => self.handle_state(update, false).await,
            Payload::PingRequest { source, slot } => {
                let reply = Message::direct(Payload::PingResponse {
                    responder: self.local.id,
                    slot,
                });
                self.dispatcher
                    .send_direct(&source.locator, &reply)
                    .await
                    .map_err(Error::from)
            }
            Payload::PingResponse { responder, slot } => {
                let refreshed = self.state.write().await.handle_ack(responder, slot, Instant::now());
                if !refreshed {
                    trace!(responder = %responder.short(), ?slot, "Ack for a slot that changed hands");
                }
                Ok(())
            }
            Payload::LeafRequest { source, side, failed } => self.handle_leaf_request(source, side, failed).await,
            Payload::LeafResponse { failed, leaves, .. } => {
                self.handle_leaf_response(failed, leaves).await;
                Ok(())
            }
            Payload::NeighborRequest { source, failed } => self.handle_neighbor_request(source, failed).await,
            Payload::NeighborResponse { failed, neighbors, .. } => {
                self.handle_neighbor_response(failed, neighbors).await;
                Ok(())
            }
            Payload::RouteRequest { source, prefix, digit } => {
                self.handle_route_request(source, prefix, digit).await
            }
            Payload::RouteResponse { prefix, digit, entry, .. } => {
                self.handle_route_response(prefix, digit, entry).await;
                Ok(())
            }
            Payload::NearbyRequest { source } => self.handle_nearby_request(source).await,
            Payload::NearbyResponse { nearby, .. } => {
                self.handle_nearby_answer(NearbyAnswer::Found(nearby)).await;
                Ok(())
            }
            Payload::NearbyNotJoined { sender } => {
                self.handle_nearby_answer(NearbyAnswer::NotJoined(sender)).await;
                Ok(())
            }
            payload @ Payload::Data { .. } => {
                self.route_message(Message {
                    id,
                    destinations,
                    payload,
                })
                .await
            }
            Payload::Departure { source } => {
                self.handle_departure(source).await;
                Ok(())
            }
        };

        if let Err(e) = result {
            debug!(message = %id, kind = %kind, error = %e, "Message handling failed");
        }
    }

    async fn handle_state(&self, update: StateUpdate, is_request: bool) -> Result<()> {
        let report = self.state.write().await.update_state(&update, Instant::now());
        self.announce_arrivals(report);

        if is_request && update.send_back {
            let reply = self.state.read().await.state_update(false);
            let message = Message::direct(Payload::StateResponse(reply));
            self.dispatcher.send_direct(&update.source.locator, &message).await?;
        }
        Ok(())
    }

    async fn handle_departure(&self, source: NodeId) {
        let removed = self.state.write().await.remove_peer(source);
        if removed {
            info!(peer = %source.short(), "Peer departed");
            self.emit(OverlayEvent::PeerDeparted(source));
        }
    }

    /// Route `data` to the node responsible for `key`.
    pub async fn route(&self, key: NodeId, data: Vec<u8>) -> Result<MessageId> {
        self.route_many(vec![key], data).await
    }

    /// Route one payload to several keys, sending one copy per distinct next hop.
    pub async fn route_many(&self, keys: Vec<NodeId>, data: Vec<u8>) -> Result<MessageId> {
        if self.is_shut_down() {
            return Err(Error::ShuttingDown);
        }
        let message = Message::routed(
            keys,
            Payload::Data {
                source: self.local.id,
                data,
            },
        );
        let id = message.id;
        self.route_message(message).await?;
        Ok(id)
    }

    pub(crate) async fn route_message(&self, message: Message) -> Result<()> {
        let mut pending = message.destinations.clone();
        for attempt in 0..MAX_ROUTE_ATTEMPTS {
            if pending.is_empty() {
                break;
            }
            let groups = self.state.read().await.group_by_next_hop(&pending);
            if !groups.local.is_empty() {
                self.deliver_locally(&message, groups.local);
            }

            let mut retry = Vec::new();
            for (hop, keys) in groups.remote {
                let next = hop.peer.id;
                let narrowed = message.with_destinations(keys);
                match self.dispatcher.send_to_slot(hop.into(), &narrowed).await {
                    Ok(()) => {
                        trace!(message = %message.id, next = %next.short(), keys = narrowed.destinations.len(), "Forwarded");
                    }
                    Err(e) => {
                        debug!(message = %message.id, next = %next.short(), attempt, error = %e, "Forwarding failed, rerouting");
                        retry.extend(narrowed.destinations);
                    }
                }
            }
            pending = retry;
        }

        if !pending.is_empty() {
            warn!(
                message = %message.id,
                keys = pending.len(),
                "Dropping message after repeated forwarding failures"
            );
        }
        Ok(())
    }

    fn deliver_locally(&self, message: &Message, keys: Vec<NodeId>) {
        match &message.payload {
            Payload::Data { source, data } => {
                debug!(message = %message.id, source = %source.short(), keys = keys.len(), "Delivered");
                self.emit(OverlayEvent::Delivered {
                    id: message.id,
                    source: *source,
                    keys,
                    data: data.clone(),
                });
            }
            other => {
                warn!(message = %message.id, payload = ?other, "Routed message with non-data payload");
            }
        }
    }

    /// Leave the overlay: tell known peers within the grace period, then close all links.
    pub async fn shutdown(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }
        let peers = self.state.read().await.known_peers();
        let notice = Message::direct(Payload::Departure { source: self.local.id });

        let notify = async {
            for peer in &peers {
                if let Err(e) = self.dispatcher.send_direct(&peer.locator, &notice).await {
                    debug!(peer = %peer.id.short(), error = %e, "Departure notice not delivered");
                }
            }
        };
        if timeout(self.config.shutdown_grace, notify).await.is_err() {
            debug!("Shutdown grace period expired");
        }

        self.stop().await;
        info!(id = %self.local.id.short(), notified = peers.len(), "Left overlay");
    }

    /// Stop without telling anyone, as a crash would.
    pub async fn abort(&self) {
        self.shutdown.send_replace(true);
        self.stop().await;
        info!(id = %self.local.id.short(), "Overlay node aborted");
    }

    async fn stop(&self) {
        self.set_joined(false);
        let closed = self.state.write().await.close_links();
        debug!(closed, "Links closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryNetwork;
    use std::time::Duration;
    use trellis_overlay::{Coordinates, Locator};

    fn peer(id: u128, x: f64) -> PeerInfo {
        PeerInfo::new(NodeId::new(id), Locator::new(format!("mem://{id:032x}")), Coordinates::point(&[x]))
    }

    fn config() -> OverlayConfig {
        OverlayConfig::default().without_id_verification()
    }

    async fn spawn_node(net: &MemoryNetwork, info: PeerInfo) -> Arc<OverlayNode> {
        let inbox = net.register(info.locator.clone()).await;
        let node = OverlayNode::new(info, config(), Arc::new(net.clone())).unwrap();
        tokio::spawn(Arc::clone(&node).run(inbox));
        node
    }

    #[tokio::test]
    async fn lone_node_delivers_locally() {
        let net = MemoryNetwork::new();
        let node = spawn_node(&net, peer(5, 0.0)).await;
        node.join(&[]).await.unwrap();
        assert!(node.is_joined());

        let mut events = node.subscribe();
        let id = node.route(NodeId::new(u128::MAX), b"hi".to_vec()).await.unwrap();
        match events.recv().await.unwrap() {
            OverlayEvent::Delivered { id: got, keys, data, .. } => {
                assert_eq!(got, id);
                assert_eq!(keys, vec![NodeId::new(u128::MAX)]);
                assert_eq!(data, b"hi");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_join_rejected() {
        let net = MemoryNetwork::new();
        let node = spawn_node(&net, peer(5, 0.0)).await;
        node.join(&[]).await.unwrap();
        assert!(matches!(node.join(&[]).await, Err(Error::AlreadyJoined)));
    }

    #[tokio::test]
    async fn departure_removes_peer() {
        let net = MemoryNetwork::new();
        let node = spawn_node(&net, peer(5, 0.0)).await;
        node.join(&[]).await.unwrap();
        node.state.write().await.learn(&peer(9, 1.0), Instant::now());

        let mut events = node.subscribe();
        Arc::clone(&node)
            .handle_message(Message::direct(Payload::Departure { source: NodeId::new(9) }))
            .await;
        assert_eq!(events.recv().await.unwrap(), OverlayEvent::PeerDeparted(NodeId::new(9)));
        assert!(!node.state.read().await.knows(NodeId::new(9)));
    }

    #[tokio::test]
    async fn shutdown_refuses_routing() {
        let net = MemoryNetwork::new();
        let node = spawn_node(&net, peer(5, 0.0)).await;
        node.join(&[]).await.unwrap();
        node.shutdown().await;
        assert!(!node.is_joined());
        assert!(matches!(node.route(NodeId::new(1), Vec::new()).await, Err(Error::ShuttingDown)));
    }

    #[tokio::test]
    async fn ping_is_answered() {
        let net = MemoryNetwork::new();
        let node = spawn_node(&net, peer(5, 0.0)).await;
        node.join(&[]).await.unwrap();

        let prober = peer(7, 1.0);
        let mut prober_inbox = net.register(prober.locator.clone()).await;
        let slot = trellis_overlay::Slot::Leaf { position: 0 };
        Arc::clone(&node)
            .handle_message(Message::direct(Payload::PingRequest { source: prober, slot }))
            .await;

        let reply = tokio::time::timeout(Duration::from_secs(1), prober_inbox.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            reply.payload,
            Payload::PingResponse {
                responder: NodeId::new(5),
                slot
            }
        );
    }
}
