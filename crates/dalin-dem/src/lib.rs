//! # `dalin_dem`
//!
//! Dynamic element matching for a DAC built out of two identical sub-DACs. A logical code is split
//! by a binary tree of switching blocks into one code per sub-DAC; the sum of both codes always
//! equals the logical code, and random tie-break bits choose between the equivalent splits to
//! whiten the error caused by mismatch between the sub-DACs.
#![warn(missing_docs)]

use thiserror::Error;

pub mod network;
pub mod quantizer;

pub use network::DemNetwork;
pub use quantizer::{DemOutput, DemQuantizer};

/// Largest word size of a sub-DAC supported by the network
pub const MAX_DEM_BITS: u32 = 24;

/// Dynamic element matching errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DemError {
    /// Unsupported word size
    #[error("DEM network supports 1 to {MAX_DEM_BITS} bits per sub-DAC, got {0}")]
    Bits(u32),
    /// Logical code outside of `[0, 2(2^Nb - 1)]`
    #[error("Code {code} exceeds the DEM input range (max. code {max})")]
    OutOfRange {
        /// Offending code
        code: u32,
        /// Largest logical code
        max: u32,
    },
    /// Level lookup or signal length error
    #[error("Level model error: {0}")]
    Level(#[from] dalin_core::Error),
}
