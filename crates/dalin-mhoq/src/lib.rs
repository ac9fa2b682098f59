//! # `dalin_mhoq`
//!
//! Moving-horizon optimal quantizer. At every sample, the codes of the next `N` samples are chosen
//! to minimize the energy of the reconstruction-filtered tracking error over the horizon, subject
//! to the filter dynamics; only the first code is committed before the horizon moves on by one
//! sample.
//!
//! The per-step integer least-squares problem is handed to a [`HorizonSolver`]. The default
//! [`BranchAndBound`] solver is exact; [`Greedy`] picks one code after the other and serves as a
//! cheap baseline.
//!
//! # Example
//!
//! ```rust
//! use dalin_core::{ChannelLevels, LevelModel, QuantizerPreset};
//! use dalin_filters::design::butterworth_lowpass;
//! use dalin_mhoq::{Formulation, MovingHorizonQuantizer};
//!
//! let plant = butterworth_lowpass(2, 0.25).unwrap().to_state_space().unwrap();
//! let levels = ChannelLevels::ideal(QuantizerPreset::Generic4Bit.spec());
//! let mhoq =
//!     MovingHorizonQuantizer::new(plant, levels, LevelModel::Ideal, Formulation::Integer, 2)
//!         .unwrap();
//! let output = mhoq.run(&[0.0; 6]).unwrap();
//! assert_eq!(output.codes, vec![8; 4]);
//! ```
#![warn(missing_docs)]

use thiserror::Error;

use dalin_filters::FilterError;

pub mod quantizer;
pub mod solver;

pub use quantizer::{Formulation, HorizonStep, MhoqOutput, MhoqState, MovingHorizonQuantizer};
pub use solver::{
    BranchAndBound, CandidateSet, Greedy, HorizonProblem, HorizonSolution, HorizonSolver,
};

/// Moving-horizon quantizer errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MhoqError {
    /// Level lookup error
    #[error("Level model error: {0}")]
    Level(#[from] dalin_core::Error),
    /// The plant cannot be used for prediction
    #[error("Plant error: {0}")]
    Filter(#[from] FilterError),
    /// The prediction horizon is empty
    #[error("Prediction horizon must be at least one sample")]
    Horizon,
    /// A reference window does not cover the horizon
    #[error("Reference window has {actual} samples, the horizon is {expected} samples long")]
    Window {
        /// Horizon length
        expected: usize,
        /// Window length
        actual: usize,
    },
    /// The signal is shorter than the prediction horizon
    #[error("Signal of {len} samples is shorter than the {horizon} samples horizon")]
    SignalTooShort {
        /// Signal length
        len: usize,
        /// Horizon length
        horizon: usize,
    },
    /// The solver returned no valid decision
    #[error("No feasible code sequence at sample {step}")]
    Infeasible {
        /// Sample index of the failed step
        step: usize,
    },
}
