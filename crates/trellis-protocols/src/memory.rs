//! In-process transport.
//!
//! Every registered locator gets an inbox. Messages go through the real
//! codec on the way so the wire format is exercised. Locators can be taken
//! down to simulate crashed or partitioned nodes.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tracing::trace;
use trellis_overlay::{Link, Locator, Message, Transport, TransportError};

/// Inbox depth per endpoint.
const INBOX_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct NetworkInner {
    endpoints: RwLock<HashMap<Locator, mpsc::Sender<Message>>>,
    down: RwLock<HashSet<Locator>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
    delivered: AtomicUsize,
}

/// Link and traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub links_opened: usize,
    pub links_closed: usize,
    pub messages_delivered: usize,
}

impl NetworkStats {
    /// Links currently alive.
    pub fn open_links(&self) -> usize {
        self.links_opened - self.links_closed
    }
}

/// A simulated network shared by all nodes of a test.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an inbox for `locator`, replacing any previous one.
    pub async fn register(&self, locator: Locator) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        self.inner.endpoints.write().await.insert(locator.clone(), tx);
        self.inner.down.write().await.remove(&locator);
        rx
    }

    /// Remove the inbox for `locator`.
    pub async fn unregister(&self, locator: &Locator) {
        self.inner.endpoints.write().await.remove(locator);
    }

    /// Make `locator` unreachable (or reachable again).
    pub async fn set_down(&self, locator: &Locator, down: bool) {
        let mut set = self.inner.down.write().await;
        if down {
            set.insert(locator.clone());
        } else {
            set.remove(locator);
        }
    }

    pub fn stats(&self) -> NetworkStats {
        NetworkStats {
            links_opened: self.inner.opened.load(Ordering::Relaxed),
            links_closed: self.inner.closed.load(Ordering::Relaxed),
            messages_delivered: self.inner.delivered.load(Ordering::Relaxed),
        }
    }

    async fn reachable(&self, locator: &Locator) -> bool {
        !self.inner.down.read().await.contains(locator)
            && self.inner.endpoints.read().await.contains_key(locator)
    }
}

#[async_trait]
impl Transport for MemoryNetwork {
    async fn connect(&self, locator: &Locator) -> Result<Arc<dyn Link>, TransportError> {
        if !self.reachable(locator).await {
            return Err(TransportError::Unreachable(locator.clone()));
        }
        self.inner.opened.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(MemoryLink {
            remote: locator.clone(),
            inner: Arc::clone(&self.inner),
        }))
    }
}

/// A link into another endpoint's inbox.
#[derive(Debug)]
pub struct MemoryLink {
    remote: Locator,
    inner: Arc<NetworkInner>,
}

#[async_trait]
impl Link for MemoryLink {
    fn remote(&self) -> &Locator {
        &self.remote
    }

    async fn send(&self, message: &Message) -> Result<(), TransportError> {
        if self.inner.down.read().await.contains(&self.remote) {
            return Err(TransportError::Closed(self.remote.clone()));
        }
        let sender = self
            .inner
            .endpoints
            .read()
            .await
            .get(&self.remote)
            .cloned()
            .ok_or_else(|| TransportError::Closed(self.remote.clone()))?;

        let bytes = message.to_bytes().map_err(|e| TransportError::Codec(e.to_string()))?;
        let decoded = Message::from_bytes(&bytes).map_err(|e| TransportError::Codec(e.to_string()))?;

        trace!(to = %self.remote, kind = %decoded.kind(), bytes = bytes.len(), "memory send");
        sender
            .send(decoded)
            .await
            .map_err(|_| TransportError::Closed(self.remote.clone()))?;
        self.inner.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        self.inner.closed.fetch_add(1, Ordering::Relaxed);
    }
}
