//! Trellis node binary
//!
//! Runs one overlay node over TCP, configured from `TRELLIS_*` variables.

mod config;

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trellis_overlay::PeerInfo;
use trellis_protocols::{tcp, OverlayEvent, OverlayNode, TcpTransport};

use crate::config::NodeConfig;

/// Inbound messages buffered between the listener and the node loop.
const INBOX_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trellis=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = NodeConfig::from_env()?;
    let (listener, bound) = tcp::bind(config.listen_addr).await?;
    let locator = config.advertise.clone().unwrap_or(bound);
    let local = PeerInfo::hashed(locator, config.coords.clone());
    tracing::info!(id = %local.id, locator = %local.locator, "Starting Trellis node");

    let node = OverlayNode::new(local, config.overlay.clone(), Arc::new(TcpTransport))?;
    let (inbox_tx, inbox) = mpsc::channel(INBOX_CAPACITY);
    let listener_task = tokio::spawn(tcp::serve(listener, inbox_tx, node.shutdown_signal()));
    let node_task = tokio::spawn(Arc::clone(&node).run(inbox));
    tokio::spawn(log_events(node.subscribe()));

    if let Err(e) = node.join(&config.bootstrap).await {
        tracing::error!(error = %e, "Join failed");
        node.abort().await;
        return Err(e.into());
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupted, leaving overlay");

    let membership = node.current_membership().await;
    println!("{}", serde_json::to_string_pretty(&membership)?);

    node.shutdown().await;
    let _ = tokio::join!(listener_task, node_task);
    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<OverlayEvent>) {
    loop {
        match events.recv().await {
            Ok(OverlayEvent::PeerArrived(peer)) => {
                tracing::info!(peer = %peer.id.short(), locator = %peer.locator, "Peer arrived");
            }
            Ok(OverlayEvent::PeerDeparted(id)) => {
                tracing::info!(peer = %id.short(), "Peer departed");
            }
            Ok(OverlayEvent::Delivered { id, source, keys, data }) => {
                tracing::info!(
                    message = %id,
                    source = %source.short(),
                    keys = keys.len(),
                    bytes = data.len(),
                    "Data delivered"
                );
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event log lagging");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
