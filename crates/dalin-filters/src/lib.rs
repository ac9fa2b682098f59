//! # `dalin_filters`
//!
//! Single-input single-output linear systems in state-space form, with the tooling needed by the
//! code generators: transfer function conversion, Lyapunov equations, balanced realizations, and
//! the design of the plant and noise-shaping filters.
#![warn(missing_docs)]

pub mod balance;
pub mod design;
pub mod error;
pub mod lyapunov;
pub mod statespace;

pub use balance::BalancedRealization;
pub use design::TransferFunction;
pub use error::FilterError;
pub use statespace::{StateSpace, TimeDomain};
