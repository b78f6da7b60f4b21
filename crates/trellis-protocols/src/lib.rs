//! Trellis Protocols - Join, State Exchange and Repair
//!
//! This crate runs the overlay defined in `trellis-overlay` over a real or
//! simulated network.
//!
//! # Overview
//!
//! An [`OverlayNode`] owns one node's tables and reacts to inbound
//! messages:
//!
//! - **Join**: discover a nearby member through the bootstrap nodes, route
//!   a join request to the node numerically closest to our id, seed the
//!   tables from the collected rows and sets, then exchange state with
//!   everyone learned.
//! - **Routing**: [`OverlayNode::route_many`] sends one copy of a payload
//!   per distinct next hop and delivers keys this node is responsible for
//!   as [`OverlayEvent::Delivered`].
//! - **Liveness**: every ping interval each table entry is pinged; entries
//!   without an ack are marked suspect and repaired from peers' tables.
//!
//! # Transports
//!
//! - [`MemoryNetwork`]: in-process transport for tests and simulations.
//! - [`TcpTransport`]: length-prefixed bincode frames over TCP.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use trellis_overlay::{Coordinates, OverlayConfig, PeerInfo};
//! use trellis_protocols::{tcp, OverlayNode, TcpTransport};
//!
//! let (listener, locator) = tcp::bind("0.0.0.0:7400".parse()?).await?;
//! let local = PeerInfo::hashed(locator, Coordinates::point(&[0.0, 0.0]));
//! let node = OverlayNode::new(local, OverlayConfig::default(), Arc::new(TcpTransport))?;
//!
//! let (inbox_tx, inbox) = tokio::sync::mpsc::channel(1024);
//! tokio::spawn(tcp::serve(listener, inbox_tx, node.shutdown_signal()));
//! tokio::spawn(Arc::clone(&node).run(inbox));
//! node.join(&bootstraps).await?;
//! ```

mod dispatch;
mod error;
mod events;
mod join;
mod memory;
mod node;
mod repair;
pub mod tcp;

pub use dispatch::{Dispatcher, SlotTarget};
pub use error::{Error, Result};
pub use events::OverlayEvent;
pub use join::NearbyAnswer;
pub use memory::{MemoryNetwork, NetworkStats};
pub use node::OverlayNode;
pub use tcp::{TcpLink, TcpTransport};
