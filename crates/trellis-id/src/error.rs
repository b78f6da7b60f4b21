//! Error types for trellis-id.

use thiserror::Error;

/// Result type for identifier operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while parsing or validating identifiers and coordinates.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// The input is not a 32-digit hexadecimal identifier.
    #[error("invalid node id {input:?}: {reason}")]
    InvalidHex { input: String, reason: String },

    /// The digit base does not evenly divide the identifier width.
    #[error("unsupported digit width of {0} bits (expected 1, 2, 4 or 8)")]
    InvalidDigitBits(u32),

    /// Coordinates contain non-finite or negative components.
    #[error("invalid coordinates: {0}")]
    InvalidCoordinates(String),
}
