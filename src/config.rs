//! Run configuration: which quantizer, which level model, and which code generation method.
//!
//! Configurations are TOML documents:
//!
//! ```toml
//! quantizer = "generic6-bit"
//! model = "calibrated"
//!
//! [method]
//! kind = "mhoq"
//! horizon = 3
//! plant = { kind = "reconstruction", preset = "fs-1m" }
//! ```
use serde::{Deserialize, Serialize};

use dalin_core::util::check_dither;
use dalin_core::{
    ChannelLevels, CodeSequence, LevelModel, LevelTable, QuantizerPreset, QuantizerSpec,
};
use dalin_dem::DemQuantizer;
use dalin_filters::design::{self, ReconstructionFilter, TransferFunction};
use dalin_filters::{FilterError, StateSpace};
use dalin_ilc::{
    DemInner, DirectQuantizer, InnerQuantizer, IterativeLearningControl, LearningOperators,
    LearningWeights, PeriodicLayout,
};
use dalin_mhoq::{BranchAndBound, Formulation, Greedy, HorizonSolver, MovingHorizonQuantizer};
use dalin_nsq::NoiseShapingQuantizer;

use crate::RunError;

/// Quantizer of a run, either a named preset or explicit parameters.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuantizerConfig {
    /// Named DAC setup
    Preset(QuantizerPreset),
    /// Explicit word size and range
    Custom(QuantizerSpec),
}

impl QuantizerConfig {
    /// Quantizer description
    pub fn spec(&self) -> QuantizerSpec {
        match *self {
            Self::Preset(preset) => preset.spec(),
            Self::Custom(spec) => spec,
        }
    }
}

impl From<QuantizerPreset> for QuantizerConfig {
    fn from(value: QuantizerPreset) -> Self {
        Self::Preset(value)
    }
}

/// Reconstruction filter seen by the optimizing methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PlantConfig {
    /// Arbitrary discrete transfer function, in descending powers of `z`
    TransferFunction {
        /// Numerator coefficients
        b: Vec<f64>,
        /// Denominator coefficients
        a: Vec<f64>,
    },
    /// Butterworth lowpass filter
    Butterworth {
        /// Filter order
        order: usize,
        /// Cutoff frequency, normalized to Nyquist
        cutoff: f64,
    },
    /// Filter fitted to a measured DAC output
    Reconstruction {
        /// Sampling rate the filter was fitted for
        preset: ReconstructionFilter,
    },
}

impl PlantConfig {
    /// State-space realization of the plant
    pub fn state_space(&self) -> Result<StateSpace<f64>, FilterError> {
        match self {
            Self::TransferFunction { b, a } => StateSpace::from_transfer_function(b, a),
            Self::Butterworth { order, cutoff } => {
                design::butterworth_lowpass(*order, *cutoff)?.to_state_space()
            }
            Self::Reconstruction { preset } => preset.transfer_function().to_state_space(),
        }
    }
}

/// Noise transfer function of a noise-shaping quantizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ShapingConfig {
    /// `1 - z⁻¹`
    FirstOrder,
    /// `(1 - z⁻¹)²`
    #[default]
    SecondOrder,
    /// Arbitrary monic noise transfer function
    TransferFunction {
        /// Numerator coefficients
        b: Vec<f64>,
        /// Denominator coefficients
        a: Vec<f64>,
    },
}

impl ShapingConfig {
    /// Noise transfer function
    pub fn ntf(&self) -> TransferFunction {
        match self {
            Self::FirstOrder => design::first_order_ntf(),
            Self::SecondOrder => design::second_order_ntf(),
            Self::TransferFunction { b, a } => TransferFunction::new(b.clone(), a.clone()),
        }
    }
}

/// Per-step solver of the moving-horizon quantizer.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SolverConfig {
    /// Exact search
    #[default]
    BranchAndBound,
    /// Exact search stopped after `node-limit` nodes
    BoundedBranchAndBound {
        /// Node budget per step
        #[serde(rename = "node-limit")]
        node_limit: usize,
    },
    /// Sequential nearest choice
    Greedy,
}

/// Quantizer run inside the learning loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum InnerConfig {
    /// Memoryless rounding
    #[default]
    Direct,
    /// Noise-shaping quantizer
    NoiseShaping {
        /// Noise transfer function
        #[serde(default)]
        shaping: ShapingConfig,
    },
    /// DEM quantizer over two sub-DACs
    Dem,
}

/// Scalar weights of the learning operators.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct WeightsConfig {
    /// Tracking error weight
    pub tracking: f64,
    /// Feed-forward effort weight
    pub effort: f64,
    /// Feed-forward increment weight
    pub increment: f64,
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self {
            tracking: 1.0,
            effort: 1e-4,
            increment: 1e-1,
        }
    }
}

impl WeightsConfig {
    fn weights(&self, n: usize) -> Result<LearningWeights, RunError> {
        Ok(LearningWeights::scaled_identity(
            n,
            self.tracking,
            self.effort,
            self.increment,
        )?)
    }
}

fn default_saturation_threshold() -> usize {
    dalin_core::util::DEFAULT_SATURATION_THRESHOLD
}

/// Code generation method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Method {
    /// Memoryless rounding to the nearest code
    Direct,
    /// Error-feedback noise shaping
    NoiseShaping {
        /// Noise transfer function
        #[serde(default)]
        shaping: ShapingConfig,
        /// Saturated samples before a warning is logged
        #[serde(
            default = "default_saturation_threshold",
            rename = "saturation-threshold"
        )]
        saturation_threshold: usize,
    },
    /// Moving-horizon optimal quantization
    Mhoq {
        /// Reconstruction filter used for prediction
        plant: PlantConfig,
        /// Prediction horizon
        horizon: usize,
        /// Decision variables of the per-step problem
        #[serde(default)]
        formulation: Formulation,
        /// Per-step solver
        #[serde(default)]
        solver: SolverConfig,
    },
    /// Iterative learning control over the whole reference
    Ilc {
        /// Reconstruction filter the tracking error is measured through
        plant: PlantConfig,
        /// Quantizer inside the learning loop
        #[serde(default)]
        inner: InnerConfig,
        /// Number of learning iterations
        iterations: usize,
        /// Weights of the learning operators
        #[serde(default)]
        weights: WeightsConfig,
    },
    /// Iterative learning control over a periodic reference, one padded period at a time
    IlcPeriodic {
        /// Reconstruction filter the tracking error is measured through
        plant: PlantConfig,
        /// Quantizer inside the learning loop
        #[serde(default)]
        inner: InnerConfig,
        /// Number of learning iterations per segment
        iterations: usize,
        /// Weights of the learning operators
        #[serde(default)]
        weights: WeightsConfig,
        /// Period of the reference, in samples
        period: usize,
        /// Samples added on each side of a period
        padding: usize,
    },
    /// Dynamic element matching over two sub-DACs.
    ///
    /// The split is exact in the code domain, so the level model is not used. Both sub-DACs are
    /// always driven from channels 0 and 1 of the level table; any other `channel` is rejected.
    Dem,
}

impl Method {
    /// Short name of the method, as written in configuration files
    pub fn name(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::NoiseShaping { .. } => "noise-shaping",
            Self::Mhoq { .. } => "mhoq",
            Self::Ilc { .. } => "ilc",
            Self::IlcPeriodic { .. } => "ilc-periodic",
            Self::Dem => "dem",
        }
    }
}

/// Codes generated for a reference signal.
#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    /// Generated codes, one channel per sub-DAC
    pub codes: CodeSequence,
    /// Reference sample matching the first code
    pub start: usize,
}

/// Complete description of a code generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunConfig {
    /// Quantizer of a DAC channel (of each sub-DAC for DEM)
    pub quantizer: QuantizerConfig,
    /// Channel of the level table to linearize. DEM only accepts channel 0.
    #[serde(default)]
    pub channel: usize,
    /// Levels fed back by the method
    #[serde(default)]
    pub model: LevelModel,
    /// Code generation method
    pub method: Method,
}

impl RunConfig {
    /// Create a configuration for channel 0 with ideal level feedback.
    pub fn new(quantizer: impl Into<QuantizerConfig>, method: Method) -> Self {
        Self {
            quantizer: quantizer.into(),
            channel: 0,
            model: LevelModel::Ideal,
            method,
        }
    }

    /// Parse a configuration from a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, RunError> {
        Ok(toml::from_str(s)?)
    }

    /// Write this configuration as a TOML document.
    pub fn to_toml_string(&self) -> Result<String, RunError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Generate the codes for a reference signal.
    ///
    /// # Arguments
    ///
    /// * `reference`: Reference signal, in volts
    /// * `table`: Calibrated levels; DEM reads both sub-DACs from channels 0 and 1
    /// * `dither`: Optional dither, added to the reference before quantization
    /// * `rng`: Source of the DEM tie-break bits
    ///
    /// returns: Result<Generated, RunError>
    pub fn generate(
        &self,
        reference: &[f64],
        table: &LevelTable,
        dither: Option<&[f64]>,
        rng: &mut fastrand::Rng,
    ) -> Result<Generated, RunError> {
        check_dither(dither, reference.len())?;
        let spec = self.quantizer.spec();
        log::info!(
            "Generating {} samples of {}-bit codes with method {}",
            reference.len(),
            spec.bits(),
            self.method.name()
        );

        let (codes, start) = match &self.method {
            Method::Direct => {
                let mut direct = DirectQuantizer::new(self.channel_levels(table)?, self.model);
                (direct.quantize(reference, dither)?.codes, 0)
            }
            Method::NoiseShaping {
                shaping,
                saturation_threshold,
            } => {
                let nsq = NoiseShapingQuantizer::new(
                    &shaping.ntf(),
                    self.channel_levels(table)?,
                    self.model,
                )?
                .with_saturation_threshold(*saturation_threshold);
                (nsq.run(reference, dither)?.into_sequence(spec.bits())?, 0)
            }
            Method::Mhoq {
                plant,
                horizon,
                formulation,
                solver,
            } => {
                let mhoq = MovingHorizonQuantizer::new(
                    plant.state_space()?,
                    self.channel_levels(table)?,
                    self.model,
                    *formulation,
                    *horizon,
                )?;
                let dithered: Vec<f64> = reference
                    .iter()
                    .enumerate()
                    .map(|(i, &x)| x + dalin_core::util::dither_at(dither, i))
                    .collect();
                let codes = match solver {
                    SolverConfig::BranchAndBound => run_mhoq(mhoq, &dithered)?,
                    SolverConfig::BoundedBranchAndBound { node_limit } => run_mhoq(
                        mhoq.with_solver(BranchAndBound::with_node_limit(*node_limit)),
                        &dithered,
                    )?,
                    SolverConfig::Greedy => run_mhoq(mhoq.with_solver(Greedy), &dithered)?,
                };
                (CodeSequence::single(spec.bits(), codes)?, 0)
            }
            Method::Ilc {
                plant,
                inner,
                iterations,
                weights,
            } => {
                let ilc = controller(plant, weights, reference.len(), *iterations)?;
                let mut inner = self.inner_quantizer(inner, table, rng)?;
                let outcome = ilc.run(inner.as_mut(), reference, dither)?;
                (outcome.codes, 0)
            }
            Method::IlcPeriodic {
                plant,
                inner,
                iterations,
                weights,
                period,
                padding,
            } => {
                let layout = PeriodicLayout::new(*period, *padding)?;
                let ilc = controller(plant, weights, layout.segment_len(), *iterations)?;
                let mut inner = self.inner_quantizer(inner, table, rng)?;
                let outcome = ilc.run_periodic(inner.as_mut(), layout, reference, dither)?;
                (outcome.codes, outcome.start)
            }
            Method::Dem => {
                if self.channel != 0 {
                    return Err(RunError::UnsupportedChannel {
                        method: self.method.name(),
                        channel: self.channel,
                    });
                }
                // Both sub-DACs must be present in the table
                ChannelLevels::new(spec, table, 1)?;
                let dem = DemQuantizer::new(spec)?;
                (dem.run(reference, dither, rng)?.codes, 0)
            }
        };
        Ok(Generated { codes, start })
    }

    fn channel_levels(&self, table: &LevelTable) -> Result<ChannelLevels, RunError> {
        Ok(ChannelLevels::new(self.quantizer.spec(), table, self.channel)?)
    }

    fn inner_quantizer(
        &self,
        inner: &InnerConfig,
        table: &LevelTable,
        rng: &mut fastrand::Rng,
    ) -> Result<Box<dyn InnerQuantizer>, RunError> {
        Ok(match inner {
            InnerConfig::Direct => {
                Box::new(DirectQuantizer::new(self.channel_levels(table)?, self.model))
            }
            InnerConfig::NoiseShaping { shaping } => Box::new(NoiseShapingQuantizer::new(
                &shaping.ntf(),
                self.channel_levels(table)?,
                self.model,
            )?),
            InnerConfig::Dem => Box::new(DemInner::new(
                DemQuantizer::new(self.quantizer.spec())?,
                table,
                self.model,
                fastrand::Rng::with_seed(rng.u64(..)),
            )?),
        })
    }
}

fn controller(
    plant: &PlantConfig,
    weights: &WeightsConfig,
    n: usize,
    iterations: usize,
) -> Result<IterativeLearningControl, RunError> {
    let operators = LearningOperators::from_plant(&plant.state_space()?, &weights.weights(n)?)?;
    Ok(IterativeLearningControl::new(operators, iterations)?)
}

fn run_mhoq<S: HorizonSolver>(
    mhoq: MovingHorizonQuantizer<S>,
    x: &[f64],
) -> Result<Vec<u32>, RunError> {
    Ok(mhoq.run(x)?.codes)
}
