//! Switching blocks and the tree network composing them.
//!
//! # Example
//!
//! ```rust
//! use dalin_dem::DemNetwork;
//!
//! let network = DemNetwork::new(4).unwrap();
//! let mut rng = fastrand::Rng::with_seed(0);
//! let [a, b] = network.split(17, &mut rng).unwrap();
//! assert_eq!(a + b, 17);
//! ```
use crate::{DemError, MAX_DEM_BITS};

/// Segmenting switching block.
///
/// Splits `code` into a code for the next (twice as heavy) tree level and a count in `0..=2` of
/// unit elements at the current weight, such that `2 * top + bottom == code`. Odd codes split
/// without randomization; even codes use `bit` to pick between `bottom = 0` and `bottom = 2`,
/// except at the boundaries `0` and `max` of the level where only one split keeps `top` in range.
pub fn segmenting_switch(code: u32, max: u32, bit: bool) -> (u32, u32) {
    let bottom = if code % 2 == 1 {
        1
    } else if code == 0 {
        0
    } else if code >= max {
        2
    } else if bit {
        2
    } else {
        0
    };
    ((code - bottom) / 2, bottom)
}

/// Non-segmenting switching block.
///
/// Splits a unit-element count `code` in `0..=2` into one element per sub-DAC. Even counts split
/// evenly; for a count of 1, `bit` selects which sub-DAC receives the element.
pub fn non_segmenting_switch(code: u32, bit: bool) -> (u32, u32) {
    if code % 2 == 1 {
        let half = code / 2;
        if bit {
            (half, half + 1)
        } else {
            (half + 1, half)
        }
    } else {
        (code / 2, code / 2)
    }
}

/// Tree of switching blocks splitting one logical code into two sub-DAC codes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DemNetwork {
    bits: u32,
}

impl DemNetwork {
    /// Create a network for two sub-DACs of `bits` bits each.
    pub fn new(bits: u32) -> Result<Self, DemError> {
        if bits == 0 || bits > MAX_DEM_BITS {
            return Err(DemError::Bits(bits));
        }
        Ok(Self { bits })
    }

    /// Word size of each sub-DAC
    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Largest logical code, `2(2^Nb - 1)`.
    pub fn max_code(&self) -> u32 {
        Self::level_max(self.bits)
    }

    /// Number of random bits consumed per split, `2 Nb - 1`.
    pub fn bits_per_split(&self) -> usize {
        2 * self.bits as usize - 1
    }

    fn level_max(bits: u32) -> u32 {
        2 * ((1u32 << bits) - 1)
    }

    /// Split a logical code using bits drawn from `bit`. Exactly [`Self::bits_per_split`] bits are
    /// drawn, whether or not they influence the result.
    pub fn split_with(
        &self,
        code: u32,
        mut bit: impl FnMut() -> bool,
    ) -> Result<[u32; 2], DemError> {
        let max = self.max_code();
        if code > max {
            return Err(DemError::OutOfRange { code, max });
        }

        let mut codes = [0u32; 2];
        let mut carry = code;
        for level in 0..self.bits - 1 {
            let level_max = Self::level_max(self.bits - level);
            let (top, bottom) = segmenting_switch(carry, level_max, bit());
            let (a, b) = non_segmenting_switch(bottom, bit());
            codes[0] |= a << level;
            codes[1] |= b << level;
            carry = top;
        }
        let (a, b) = non_segmenting_switch(carry, bit());
        codes[0] |= a << (self.bits - 1);
        codes[1] |= b << (self.bits - 1);
        Ok(codes)
    }

    /// Split a logical code using random bits.
    pub fn split(&self, code: u32, rng: &mut fastrand::Rng) -> Result<[u32; 2], DemError> {
        self.split_with(code, || rng.bool())
    }
}
