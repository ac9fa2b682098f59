//! Errors raised while building or transforming linear systems.
use thiserror::Error;

use crate::TimeDomain;

/// Linear system errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    /// Matrix dimensions do not agree with the system order
    #[error("Dimension mismatch for {what}: expected {expected}, got {actual}")]
    Dimension {
        /// Mismatched matrix
        what: &'static str,
        /// Expected dimension
        expected: usize,
        /// Actual dimension
        actual: usize,
    },
    /// Transfer function coefficients cannot be realized
    #[error("Invalid transfer function: {0}")]
    InvalidTransferFunction(String),
    /// A discrete system has poles on or outside of the unit circle
    #[error("Discrete-time system is unstable (spectral radius {radius})")]
    Unstable {
        /// Largest pole magnitude
        radius: f64,
    },
    /// A continuous system has poles on or right of the imaginary axis
    #[error("Continuous-time system is unstable (spectral abscissa {abscissa})")]
    UnstableContinuous {
        /// Largest pole real part
        abscissa: f64,
    },
    /// A Gramian is not positive definite; the realization is not minimal
    #[error("Realization is not minimal: the {0} Gramian is not positive definite")]
    NotMinimal(&'static str),
    /// A matrix that had to be inverted is singular
    #[error("Singular matrix in {0}")]
    Singular(&'static str),
    /// The operation is only defined for the other time domain
    #[error("Operation requires a {expected:?}-time system")]
    Domain {
        /// Required time domain
        expected: TimeDomain,
    },
}
