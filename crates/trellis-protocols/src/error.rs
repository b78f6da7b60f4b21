//! Error types for trellis-protocols.

use std::time::Duration;

use thiserror::Error;
use trellis_overlay::{Locator, TransportError};

/// Result type for trellis-protocols operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running the overlay protocols.
#[derive(Debug, Error)]
pub enum Error {
    /// Table or codec error from the overlay layer.
    #[error(transparent)]
    Overlay(#[from] trellis_overlay::Error),

    /// A send or connect failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No join response arrived in time.
    #[error("join timed out after {0:?}")]
    JoinTimeout(Duration),

    /// None of the bootstrap nodes answered.
    #[error("no bootstrap node answered: {0:?}")]
    BootstrapUnreachable(Vec<Locator>),

    /// The node is already part of an overlay.
    #[error("node has already joined")]
    AlreadyJoined,

    /// The node has been shut down.
    #[error("node is shutting down")]
    ShuttingDown,

    /// Socket-level failure outside a link.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
