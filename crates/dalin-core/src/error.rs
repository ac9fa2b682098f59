//! Error type for the quantizer and level model.
use thiserror::Error;

/// Precondition failures of the quantizer/level model. All of them are programming or
/// configuration errors; none are recoverable by retrying.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A code was looked up outside of `[0, max]`.
    #[error("Code {code} is out of range (max. code {max})")]
    OutOfRange {
        /// Offending code
        code: i64,
        /// Largest valid code
        max: u32,
    },
    /// The quantizer parameters do not describe a valid quantizer.
    #[error("Invalid quantizer configuration: {0}")]
    InvalidQuantizer(String),
    /// A channel index is not present in a level table or code sequence.
    #[error("Channel {channel} is not available ({channels} channels)")]
    MissingChannel {
        /// Requested channel
        channel: usize,
        /// Number of available channels
        channels: usize,
    },
    /// A level table does not hold exactly one level per code.
    #[error("Expected {expected} levels per channel, got {actual}")]
    LevelCount {
        /// Number of codes of the quantizer
        expected: usize,
        /// Number of levels provided
        actual: usize,
    },
    /// Two arrays which must be sample-aligned have different lengths.
    #[error("Length mismatch for {what}: expected {expected}, got {actual}")]
    LengthMismatch {
        /// Name of the mismatched array
        what: &'static str,
        /// Required length
        expected: usize,
        /// Provided length
        actual: usize,
    },
}
