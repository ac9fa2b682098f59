//! # `dalin`
//!
//! Code generation for linearising non-ideal multi-level DACs. Given a reference signal and the
//! measured output levels of a DAC, the methods of this crate produce the code sequence driving
//! the DAC:
//!
//! - direct rounding, the baseline every other method is compared against,
//! - error-feedback noise shaping ([`nsq`]),
//! - moving-horizon optimal quantization against a reconstruction filter ([`mhoq`]),
//! - iterative learning control around any of the above ([`ilc`]),
//! - dynamic element matching over two sub-DACs ([`dem`]).
//!
//! The member crates are re-exported here; [`config::RunConfig`] selects and runs one method from
//! a TOML document.
//!
//! # Example
//!
//! ```rust
//! use dalin::config::RunConfig;
//! use dalin::{LevelTable, QuantizerPreset};
//!
//! let config = RunConfig::from_toml_str(
//!     r#"
//!     quantizer = "generic4-bit"
//!     method = { kind = "direct" }
//!     "#,
//! )
//! .unwrap();
//! let table = LevelTable::ideal(&QuantizerPreset::Generic4Bit.spec(), 1);
//! let mut rng = fastrand::Rng::with_seed(0);
//! let generated = config.generate(&[0.0; 4], &table, None, &mut rng).unwrap();
//! assert_eq!(generated.codes.channel(0).unwrap(), &[8, 8, 8, 8]);
//! ```
#![warn(missing_docs)]

use thiserror::Error;

pub use dalin_core::*;
pub use dalin_dem as dem;
pub use dalin_filters as filters;
pub use dalin_ilc as ilc;
pub use dalin_mhoq as mhoq;
pub use dalin_nsq as nsq;

pub mod config;

/// Errors of a configured run
#[derive(Debug, Error)]
pub enum RunError {
    /// The configuration document could not be parsed
    #[error("TOML Parse Error: {0}")]
    Toml(#[from] toml::de::Error),
    /// The configuration could not be written
    #[error("TOML Serialize Error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    /// The method always drives a fixed set of channels
    #[error("Method {method} cannot linearize channel {channel}")]
    UnsupportedChannel {
        /// Short name of the method
        method: &'static str,
        /// Requested channel
        channel: usize,
    },
    /// Quantizer, level table or signal error
    #[error("Level model error: {0}")]
    Level(#[from] dalin_core::Error),
    /// Plant or noise transfer function error
    #[error("Filter error: {0}")]
    Filter(#[from] dalin_filters::FilterError),
    /// Noise-shaping quantizer error
    #[error("Noise-shaping quantizer error: {0}")]
    Nsq(#[from] dalin_nsq::NsqError),
    /// Moving-horizon quantizer error
    #[error("Moving-horizon quantizer error: {0}")]
    Mhoq(#[from] dalin_mhoq::MhoqError),
    /// Learning controller error
    #[error("Iterative learning control error: {0}")]
    Ilc(#[from] dalin_ilc::IlcError),
    /// DEM quantizer error
    #[error("DEM quantizer error: {0}")]
    Dem(#[from] dalin_dem::DemError),
}
