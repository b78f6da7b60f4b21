//! Outbound sends.
//!
//! Sends to table members go through the link cached in their slot,
//! opening it on first use. A failed send marks the slot suspect and drops
//! its link so the next attempt reconnects.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;
use trellis_overlay::{
    Link, Locator, Message, NextHop, OverlayState, PeerInfo, Probe, Slot, Transport, TransportError,
};

/// Where a slot-bound message goes.
#[derive(Debug, Clone)]
pub struct SlotTarget {
    pub slot: Slot,
    pub peer: PeerInfo,
    pub link: Option<Arc<dyn Link>>,
}

impl From<NextHop> for SlotTarget {
    fn from(hop: NextHop) -> Self {
        Self {
            slot: hop.slot,
            peer: hop.peer,
            link: hop.link,
        }
    }
}

impl From<Probe> for SlotTarget {
    fn from(probe: Probe) -> Self {
        Self {
            slot: probe.slot,
            peer: probe.peer,
            link: probe.link,
        }
    }
}

/// Sends messages on behalf of one node.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    state: Arc<RwLock<OverlayState>>,
    transport: Arc<dyn Transport>,
}

impl Dispatcher {
    pub fn new(state: Arc<RwLock<OverlayState>>, transport: Arc<dyn Transport>) -> Self {
        Self { state, transport }
    }

    /// Send to a table member over its slot link.
    pub async fn send_to_slot(&self, target: SlotTarget, message: &Message) -> Result<(), TransportError> {
        let result = self.try_send_to_slot(&target, message).await;
        if let Err(e) = &result {
            debug!(
                peer = %target.peer.id.short(),
                slot = ?target.slot,
                kind = %message.kind(),
                error = %e,
                "Send failed, marking slot suspect"
            );
            let mut state = self.state.write().await;
            state.detach_link(target.slot, target.peer.id);
            state.mark_suspect(target.slot, target.peer.id);
        }
        result
    }

    async fn try_send_to_slot(&self, target: &SlotTarget, message: &Message) -> Result<(), TransportError> {
        let link = match &target.link {
            Some(link) => Arc::clone(link),
            None => {
                let fresh = self.transport.connect(&target.peer.locator).await?;
                // Lost the race or the slot changed hands: use whatever the slot holds, or a one-off.
                self.state
                    .write()
                    .await
                    .attach_link(target.slot, target.peer.id, Arc::clone(&fresh))
                    .unwrap_or(fresh)
            }
        };
        link.send(message).await
    }

    /// Send to a node that is not necessarily in our tables.
    pub async fn send_direct(&self, locator: &Locator, message: &Message) -> Result<(), TransportError> {
        self.transport.send_once(locator, message).await
    }
}
