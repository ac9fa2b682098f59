//! # `dalin_nsq`
//!
//! Noise-shaping feedback quantizer. Each sample is requantized after subtracting the filtered
//! quantization error of the previous samples, which pushes the error of the non-ideal DAC levels
//! out of the signal band.
//!
//! The loop filter `M = 1 - NTF` runs in balanced coordinates. The feedback error is computed
//! either against the ideal levels, or against the calibrated levels of the channel, in which case
//! the loop also shapes the static non-linearity of the DAC.
//!
//! # Example
//!
//! ```rust
//! use dalin_core::{ChannelLevels, LevelModel, QuantizerPreset};
//! use dalin_filters::design::second_order_ntf;
//! use dalin_nsq::NoiseShapingQuantizer;
//!
//! let levels = ChannelLevels::ideal(QuantizerPreset::Generic4Bit.spec());
//! let nsq = NoiseShapingQuantizer::new(&second_order_ntf(), levels, LevelModel::Ideal).unwrap();
//! let output = nsq.run(&[0.0, 0.1, 0.2], None).unwrap();
//! assert_eq!(output.codes[0], 8);
//! ```
#![warn(missing_docs)]

use nalgebra::DVector;
use thiserror::Error;

use dalin_core::util::{check_dither, dither_at, SaturationCounter, DEFAULT_SATURATION_THRESHOLD};
use dalin_core::{ChannelLevels, CodeSequence, LevelModel};
use dalin_filters::{design, FilterError, StateSpace, TimeDomain, TransferFunction};

/// Noise-shaping quantizer errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NsqError {
    /// Level lookup or signal length error
    #[error("Level model error: {0}")]
    Level(#[from] dalin_core::Error),
    /// The loop filter could not be built or balanced
    #[error("Loop filter error: {0}")]
    Filter(#[from] FilterError),
    /// The loop filter has direct feedthrough, or is not discrete-time
    #[error("Loop filter must be a strictly proper discrete-time system")]
    LoopFilter,
}

/// State threaded through the sample loop.
#[derive(Debug, Clone, PartialEq)]
pub struct NsqState {
    filter_state: DVector<f64>,
    saturation: SaturationCounter,
}

impl NsqState {
    /// State vector of the (balanced) loop filter
    pub fn filter_state(&self) -> &DVector<f64> {
        &self.filter_state
    }

    /// Saturation events recorded so far
    pub fn saturation(&self) -> &SaturationCounter {
        &self.saturation
    }
}

/// Result of quantizing one sample.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct NsqStep {
    /// Selected code, always within the code range
    pub code: u32,
    /// Level of the code under the feedback model
    pub level: f64,
    /// Whether the code had to be clamped
    pub saturated: bool,
}

/// Result of quantizing a whole signal.
#[derive(Debug, Clone, PartialEq)]
pub struct NsqOutput {
    /// Selected codes
    pub codes: Vec<u32>,
    /// Levels of the selected codes under the feedback model
    pub levels: Vec<f64>,
    /// Number of saturated samples
    pub saturations: usize,
    /// Whether the saturation warning threshold was reached
    pub threshold_exceeded: bool,
}

impl NsqOutput {
    /// Wrap the codes into a single-channel code sequence.
    pub fn into_sequence(self, bits: u32) -> Result<CodeSequence, dalin_core::Error> {
        CodeSequence::single(bits, self.codes)
    }
}

/// Error-feedback noise-shaping quantizer for a single DAC channel.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseShapingQuantizer {
    filter: StateSpace<f64>,
    levels: ChannelLevels,
    model: LevelModel,
    saturation_threshold: usize,
}

impl NoiseShapingQuantizer {
    /// Create a quantizer realizing the given noise transfer function.
    ///
    /// # Arguments
    ///
    /// * `ntf`: Monic noise transfer function, see [`design::loop_filter`]
    /// * `levels`: Ideal and calibrated levels of the channel
    /// * `model`: Levels used to compute the feedback error
    ///
    /// returns: Result<NoiseShapingQuantizer, NsqError>
    pub fn new(
        ntf: &TransferFunction,
        levels: ChannelLevels,
        model: LevelModel,
    ) -> Result<Self, NsqError> {
        let filter = design::loop_filter(ntf)?.to_state_space()?;
        Self::from_loop_filter(filter, levels, model)
    }

    /// Create a quantizer from a loop filter given in state-space form. The filter is balanced
    /// before use, and must be stable, minimal and strictly proper.
    pub fn from_loop_filter(
        filter: StateSpace<f64>,
        levels: ChannelLevels,
        model: LevelModel,
    ) -> Result<Self, NsqError> {
        if filter.domain != TimeDomain::Discrete || filter.d != 0.0 {
            return Err(NsqError::LoopFilter);
        }
        let filter = filter.balanced()?;
        Ok(Self {
            filter,
            levels,
            model,
            saturation_threshold: DEFAULT_SATURATION_THRESHOLD,
        })
    }

    /// Set the number of saturated samples after which a warning is logged.
    pub fn with_saturation_threshold(mut self, threshold: usize) -> Self {
        self.saturation_threshold = threshold;
        self
    }

    /// Channel levels of this quantizer
    pub fn levels(&self) -> &ChannelLevels {
        &self.levels
    }

    /// Feedback level model
    pub fn model(&self) -> LevelModel {
        self.model
    }

    /// Balanced loop filter
    pub fn loop_filter(&self) -> &StateSpace<f64> {
        &self.filter
    }

    /// Zero state, with an empty saturation counter.
    pub fn initial_state(&self) -> NsqState {
        NsqState {
            filter_state: self.filter.zero_state(),
            saturation: SaturationCounter::new(self.saturation_threshold),
        }
    }

    /// Quantize one sample.
    pub fn step(
        &self,
        state: NsqState,
        x: f64,
        dither: f64,
    ) -> Result<(NsqStep, NsqState), NsqError> {
        let NsqState {
            filter_state,
            mut saturation,
        } = state;
        let w = x - self.filter.output(&filter_state);
        let (code, saturated) = self.levels.spec().quantize_clamped(w + dither);
        if saturated && saturation.record() {
            log::warn!(
                "Noise-shaping quantizer saturated {} times, the loop may be unstable",
                saturation.threshold()
            );
        }
        let level = self.levels.level(code, self.model)?;
        let (_, filter_state) = self.filter.step(&filter_state, level - w);
        Ok((
            NsqStep {
                code,
                level,
                saturated,
            },
            NsqState {
                filter_state,
                saturation,
            },
        ))
    }

    /// Quantize a whole signal from the zero state.
    ///
    /// # Arguments
    ///
    /// * `x`: Input signal
    /// * `dither`: Optional dither, added before requantization; must cover the input
    ///
    /// returns: Result<NsqOutput, NsqError>
    #[profiling::function]
    pub fn run(&self, x: &[f64], dither: Option<&[f64]>) -> Result<NsqOutput, NsqError> {
        check_dither(dither, x.len())?;
        let mut state = self.initial_state();
        let mut codes = Vec::with_capacity(x.len());
        let mut levels = Vec::with_capacity(x.len());
        for (i, &sample) in x.iter().enumerate() {
            let (step, next) = self.step(state, sample, dither_at(dither, i))?;
            codes.push(step.code);
            levels.push(step.level);
            state = next;
        }

        let saturation = state.saturation;
        if saturation.exceeded() {
            log::warn!(
                "Noise-shaping quantizer saturated {} times over {} samples",
                saturation.count(),
                x.len()
            );
        }
        Ok(NsqOutput {
            codes,
            levels,
            saturations: saturation.count(),
            threshold_exceeded: saturation.exceeded(),
        })
    }
}
