//! Trellis Identifiers
//!
//! Fixed-width identifiers for a prefix-routed peer-to-peer overlay.
//!
//! # Identifier Space
//!
//! Every node is named by a 128-bit [`NodeId`], derived from its network
//! identity with BLAKE3. Identifiers are read as a string of digits in base
//! `2^b` (default `b = 4`, so 32 hex digits). Two operations drive routing:
//!
//! - **Prefix length**: how many leading digits two identifiers share
//! - **Digit at**: the i-th digit of an identifier
//!
//! Numeric closeness uses the plain absolute difference of the two values.
//! The space is ordered, not a ring: "below" and "above" are ordinary
//! comparisons.
//!
//! # Proximity
//!
//! Network closeness is a separate metric over virtual [`Coordinates`],
//! supplied by a [`Proximity`] implementation.

mod coords;
mod error;
mod id;
mod space;

pub use coords::{Coordinates, EuclideanProximity, Proximity};
pub use error::{Error, Result};
pub use id::NodeId;
pub use space::IdSpace;

/// Width of an identifier in bits.
pub const ID_BITS: u32 = 128;

/// Default number of bits per routing digit.
pub const DEFAULT_DIGIT_BITS: u32 = 4;

const _: () = assert!(ID_BITS % DEFAULT_DIGIT_BITS == 0);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_space_is_hex() {
        assert_eq!(IdSpace::default(), IdSpace::HEX);
        assert_eq!(IdSpace::HEX.max_prefix(), 32);
        assert_eq!(IdSpace::HEX.max_digits(), 16);
    }
}
