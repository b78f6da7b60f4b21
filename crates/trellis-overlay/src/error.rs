//! Error types for trellis-overlay.

use thiserror::Error;
use trellis_id::NodeId;

use crate::peer::Locator;

/// Result type for overlay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while maintaining or using the overlay tables.
#[derive(Debug, Error)]
pub enum Error {
    /// Sending to a peer failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A message could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// Peer data failed validation and was not inserted.
    #[error("rejected peer {id}: {reason}")]
    Rejected { id: NodeId, reason: RejectReason },

    /// The configuration cannot be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An identifier or coordinate error.
    #[error(transparent)]
    Id(#[from] trellis_id::Error),
}

/// Why a peer was refused at ingestion.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectReason {
    /// The id is not the hash of the peer's locator.
    #[error("id does not match the hash of locator {0}")]
    IdMismatch(Locator),

    /// The coordinates are unusable.
    #[error("bad coordinates: {0}")]
    BadCoordinates(String),

    /// The coordinates live in a different space than ours.
    #[error("coordinate dimensions differ: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The peer is not a valid entry for the slot it was offered for.
    #[error("peer does not belong in routing slot ({prefix}, {digit})")]
    WrongSlot { prefix: usize, digit: usize },
}

/// Failures reported by a [`Transport`](crate::Transport) or [`Link`](crate::Link).
#[derive(Debug, Error)]
pub enum TransportError {
    /// No connection could be established.
    #[error("peer at {0} is unreachable")]
    Unreachable(Locator),

    /// The link was closed by either side.
    #[error("link to {0} is closed")]
    Closed(Locator),

    /// Socket-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),
}

impl From<bincode::Error> for TransportError {
    fn from(e: bincode::Error) -> Self {
        TransportError::Codec(e.to_string())
    }
}
