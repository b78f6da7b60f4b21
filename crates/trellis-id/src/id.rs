//! 128-bit overlay identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, IdSpace, Result};

/// A node identifier in the 128-bit overlay space.
///
/// Totally ordered by numeric value. Immutable once assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct NodeId(pub u128);

impl NodeId {
    /// Smallest identifier.
    pub const MIN: Self = Self(0);

    /// Largest identifier.
    pub const MAX: Self = Self(u128::MAX);

    /// Identifier length in bytes.
    pub const BYTES: usize = 16;

    /// Create from a raw value.
    pub const fn new(value: u128) -> Self {
        Self(value)
    }

    /// The raw numeric value.
    pub const fn value(&self) -> u128 {
        self.0
    }

    /// Create from big-endian bytes.
    pub const fn from_bytes(bytes: [u8; Self::BYTES]) -> Self {
        Self(u128::from_be_bytes(bytes))
    }

    /// Big-endian byte representation.
    pub const fn to_bytes(&self) -> [u8; Self::BYTES] {
        self.0.to_be_bytes()
    }

    /// Derive an identifier from a network identity.
    ///
    /// Takes the first 16 bytes of the BLAKE3 digest.
    pub fn hash(name: impl AsRef<[u8]>) -> Self {
        let digest = blake3::hash(name.as_ref());
        let mut bytes = [0u8; Self::BYTES];
        bytes.copy_from_slice(&digest.as_bytes()[..Self::BYTES]);
        Self::from_bytes(bytes)
    }

    /// Convert to a 32-digit hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Parse a 32-digit hex string.
    pub fn from_hex(input: &str) -> Result<Self> {
        let decoded = hex::decode(input).map_err(|e| Error::InvalidHex {
            input: input.to_string(),
            reason: e.to_string(),
        })?;
        let bytes: [u8; Self::BYTES] = decoded.try_into().map_err(|v: Vec<u8>| Error::InvalidHex {
            input: input.to_string(),
            reason: format!("expected {} bytes, got {}", Self::BYTES, v.len()),
        })?;
        Ok(Self::from_bytes(bytes))
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(8);
        hex
    }

    /// Unsigned numeric distance. Not modular: the space is a line.
    pub const fn absolute_distance(&self, other: &NodeId) -> u128 {
        self.0.abs_diff(other.0)
    }

    /// Number of leading hex digits shared with `other`.
    pub fn prefix_length(&self, other: &NodeId) -> usize {
        IdSpace::HEX.prefix_length(*self, *other)
    }

    /// The hex digit at `index` (0 = most significant).
    pub fn digit_at(&self, index: usize) -> usize {
        IdSpace::HEX.digit_at(*self, index)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl From<u128> for NodeId {
    fn from(value: u128) -> Self {
        Self(value)
    }
}
