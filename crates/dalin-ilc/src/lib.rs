//! # `dalin_ilc`
//!
//! Iterative learning control around a quantizer. A feed-forward signal is added to the reference
//! ahead of an inner quantizer (noise-shaping, direct or DEM), and refined over repeated runs of
//! the same reference from the error between the reference and the reconstruction-filtered DAC
//! output:
//!
//! ```text
//! u_{k+1} = Q (u_k + L e_k)
//! ```
//!
//! The `Q` filter and learning matrix `L` are derived from the plant impulse response and three
//! weighting matrices. Before iterating, the pair is checked for stability and monotone
//! convergence of the learning loop `Q - L G`.
//!
//! # Example
//!
//! ```rust
//! use dalin_core::{ChannelLevels, LevelModel, QuantizerPreset};
//! use dalin_filters::StateSpace;
//! use dalin_ilc::{DirectQuantizer, IterativeLearningControl, LearningOperators, LearningWeights};
//!
//! let plant = StateSpace::from_transfer_function(&[0.5, 0.0], &[1.0, -0.5]).unwrap();
//! let weights = LearningWeights::standard(16).unwrap();
//! let operators = LearningOperators::from_plant(&plant, &weights).unwrap();
//! let ilc = IterativeLearningControl::new(operators, 4).unwrap();
//!
//! let mut inner = DirectQuantizer::new(
//!     ChannelLevels::ideal(QuantizerPreset::Generic6Bit.spec()),
//!     LevelModel::Ideal,
//! );
//! let outcome = ilc.run(&mut inner, &[0.25; 16], None).unwrap();
//! assert_eq!(outcome.codes.len(), 16);
//! assert_eq!(outcome.rms_errors.len(), 4);
//! ```
#![warn(missing_docs)]

use thiserror::Error;

use dalin_dem::DemError;
use dalin_filters::FilterError;
use dalin_nsq::NsqError;

pub mod inner;
pub mod learning;
pub mod operators;
pub mod periodic;

pub use inner::{DemInner, DirectQuantizer, InnerOutput, InnerQuantizer};
pub use learning::{IlcOutcome, IterativeLearningControl};
pub use operators::{Certificate, LearningOperators, LearningWeights};
pub use periodic::{PeriodicLayout, PeriodicOutcome};

/// Iterative learning control errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IlcError {
    /// Level lookup or signal length error
    #[error("Level model error: {0}")]
    Level(#[from] dalin_core::Error),
    /// Plant error
    #[error("Plant error: {0}")]
    Filter(#[from] FilterError),
    /// Inner noise-shaping quantizer error
    #[error("Noise-shaping quantizer error: {0}")]
    Nsq(#[from] NsqError),
    /// Inner DEM quantizer error
    #[error("DEM quantizer error: {0}")]
    Dem(#[from] DemError),
    /// A weighting matrix is not symmetric positive definite
    #[error("The {0} weighting matrix is not positive definite")]
    NotPositiveDefinite(&'static str),
    /// A matrix or signal does not match the size of the learning operators
    #[error("Dimension mismatch for {what}: expected {expected}, got {actual}")]
    Dimension {
        /// Mismatched matrix or signal
        what: &'static str,
        /// Expected dimension
        expected: usize,
        /// Actual dimension
        actual: usize,
    },
    /// A matrix that had to be inverted is singular
    #[error("Singular matrix in {0}")]
    Singular(&'static str),
    /// The learning loop is neither stable nor monotonically convergent
    #[error(
        "Learning operators rejected: spectral radius {spectral_radius}, monotone convergence \
         radius {monotone_radius} (both must not exceed 1)"
    )]
    Certificate {
        /// Spectral radius of `Q - L G`
        spectral_radius: f64,
        /// Largest eigenvalue of `(Q - L G)(Q - L G)ᵀ`
        monotone_radius: f64,
    },
    /// No iteration requested
    #[error("At least one learning iteration is required")]
    Iterations,
    /// Periodic layout without a period
    #[error("Invalid periodic layout: period {period}, padding {padding}")]
    Layout {
        /// Period length
        period: usize,
        /// Padding length
        padding: usize,
    },
    /// The signal does not hold a single padded period
    #[error("Signal of {len} samples is shorter than one padded period of {required} samples")]
    SignalTooShort {
        /// Signal length
        len: usize,
        /// Padded period length
        required: usize,
    },
}
