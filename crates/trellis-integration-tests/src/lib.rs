//! Shared harness for multi-node overlay scenarios.
//!
//! Nodes run their real protocol loops on a [`MemoryNetwork`]. Ids are
//! assigned explicitly so scenarios can place nodes precisely.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use trellis_overlay::{Coordinates, Locator, NodeId, OverlayConfig, PeerInfo};
use trellis_protocols::{MemoryNetwork, OverlayNode};

/// Install a test-friendly subscriber once. Respects `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "trellis=warn".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Descriptor for a node with an explicit id.
pub fn peer(id: u128, position: &[f64]) -> PeerInfo {
    PeerInfo::new(
        NodeId::new(id),
        Locator::new(format!("mem://{id:032x}")),
        Coordinates::point(position),
    )
}

/// Short timers, explicit ids.
pub fn test_config() -> OverlayConfig {
    OverlayConfig::default()
        .without_id_verification()
        .with_ping_interval(Duration::from_secs(1))
        .with_ack_threshold(Duration::from_millis(400))
        .with_repair_timeout(Duration::from_millis(300))
        .with_join_timeout(Duration::from_secs(5))
        .with_nearby_timeout(Duration::from_secs(1))
        .with_shutdown_grace(Duration::from_millis(100))
}

/// A set of nodes sharing one simulated network.
#[derive(Debug)]
pub struct Cluster {
    pub net: MemoryNetwork,
    pub config: OverlayConfig,
    pub nodes: Vec<Arc<OverlayNode>>,
}

impl Default for Cluster {
    fn default() -> Self {
        Self::new(test_config())
    }
}

impl Cluster {
    pub fn new(config: OverlayConfig) -> Self {
        Self {
            net: MemoryNetwork::new(),
            config,
            nodes: Vec::new(),
        }
    }

    /// Start a node's loop without joining.
    pub async fn spawn(&mut self, info: PeerInfo) -> Arc<OverlayNode> {
        let inbox = self.net.register(info.locator.clone()).await;
        let node = OverlayNode::new(info, self.config.clone(), Arc::new(self.net.clone()))
            .expect("valid test node");
        tokio::spawn(Arc::clone(&node).run(inbox));
        self.nodes.push(Arc::clone(&node));
        node
    }

    /// Start a node that founds a new overlay.
    pub async fn found(&mut self, info: PeerInfo) -> Arc<OverlayNode> {
        let node = self.spawn(info).await;
        node.join(&[]).await.expect("founding never fails");
        node
    }

    /// Start a node and join it through `bootstrap`.
    pub async fn join_via(&mut self, info: PeerInfo, bootstrap: &OverlayNode) -> Arc<OverlayNode> {
        let node = self.spawn(info).await;
        node.join(&[bootstrap.local().locator.clone()])
            .await
            .expect("join through a live bootstrap");
        node
    }

    /// The node with `id`.
    pub fn node(&self, id: NodeId) -> Option<&Arc<OverlayNode>> {
        self.nodes.iter().find(|n| n.id() == id)
    }

    /// Id of the node numerically closest to `key`.
    pub fn closest_to(&self, key: NodeId) -> Option<NodeId> {
        self.nodes
            .iter()
            .filter(|n| !n.is_shut_down())
            .map(|n| n.id())
            .min_by_key(|id| id.absolute_distance(&key))
    }

    /// Crash a node: stop it silently and make it unreachable.
    pub async fn crash(&self, id: NodeId) {
        if let Some(node) = self.node(id) {
            node.abort().await;
            self.net.set_down(&node.local().locator, true).await;
        }
    }
}

/// Poll `check` until it holds or `within` elapses.
pub async fn eventually<F, Fut>(within: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
