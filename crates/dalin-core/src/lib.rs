//! # `dalin_core`
//!
//! Provides the definitions shared by every code generator of `dalin`: the quantizer description,
//! calibrated level tables, the feedback level model switch and the code sequences handed to the
//! physical DAC.
#![warn(missing_docs)]

pub mod codes;
pub mod error;
pub mod levels;
pub mod quantizer;
pub mod util;

pub use codes::CodeSequence;
pub use error::Error;
pub use levels::{ChannelLevels, LevelModel, LevelTable};
pub use quantizer::{CodeType, QuantizerPreset, QuantizerSpec};
