//! Digit decomposition of the identifier space.
//!
//! An identifier of 128 bits is read as `128 / b` digits of `b` bits each.
//! The routing table has one row per digit position and one column per
//! digit value.

use serde::{Deserialize, Serialize};

use crate::{Error, NodeId, Result, DEFAULT_DIGIT_BITS, ID_BITS};

/// Digit layout of the identifier space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdSpace {
    digit_bits: u32,
}

impl IdSpace {
    /// Base-16 digits, 32 per identifier.
    pub const HEX: Self = Self { digit_bits: DEFAULT_DIGIT_BITS };

    /// Create a space with `digit_bits` bits per digit.
    pub fn new(digit_bits: u32) -> Result<Self> {
        match digit_bits {
            1 | 2 | 4 | 8 => Ok(Self { digit_bits }),
            other => Err(Error::InvalidDigitBits(other)),
        }
    }

    /// Bits per digit (`b`).
    pub const fn digit_bits(&self) -> u32 {
        self.digit_bits
    }

    /// Digits per identifier; also the number of routing-table rows.
    pub const fn max_prefix(&self) -> usize {
        (ID_BITS / self.digit_bits) as usize
    }

    /// Distinct digit values; also the number of routing-table columns.
    pub const fn max_digits(&self) -> usize {
        1 << self.digit_bits
    }

    /// Count of leading digits shared by `a` and `b`.
    ///
    /// Equal identifiers share all [`max_prefix`](Self::max_prefix) digits.
    pub const fn prefix_length(&self, a: NodeId, b: NodeId) -> usize {
        let diff = a.value() ^ b.value();
        if diff == 0 {
            return self.max_prefix();
        }
        (diff.leading_zeros() / self.digit_bits) as usize
    }

    /// The digit of `id` at position `index` (0 = most significant).
    ///
    /// # Panics
    ///
    /// Panics if `index >= max_prefix()`.
    pub fn digit_at(&self, id: NodeId, index: usize) -> usize {
        assert!(
            index < self.max_prefix(),
            "digit index {index} out of range for {} digits",
            self.max_prefix()
        );
        let shift = ID_BITS - (index as u32 + 1) * self.digit_bits;
        let mask = (1u128 << self.digit_bits) - 1;
        ((id.value() >> shift) & mask) as usize
    }
}

impl Default for IdSpace {
    fn default() -> Self {
        Self::HEX
    }
}
