//! Receding-horizon loop around a [`HorizonSolver`].
//!
//! With the plant state `x`, the reference window `r` and the realized values `v` of the codes
//! over the horizon, the filtered tracking error is
//!
//! ```text
//! e_k = C A^k x + Σ_{i ≤ k} h_{k-i} (v_i - r_i)
//! ```
//!
//! where `h` is the impulse response of the plant. Stacking the horizon gives `e = Γ v - t` with
//! `t = Γ r - f`, `f` being the free response of the plant.
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use dalin_core::{ChannelLevels, CodeSequence, LevelModel};
use dalin_filters::{FilterError, StateSpace, TimeDomain};

use crate::solver::{BranchAndBound, CandidateSet, HorizonProblem, HorizonSolver};
use crate::MhoqError;

/// Decision variables of the per-step problem.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Formulation {
    /// Decisions are codes on the ideal code grid, in LSB units. The selected level model only
    /// enters the state update, where a code realizes its grid value plus its INL.
    #[default]
    Integer,
    /// Decisions select one level of the selected level model, in output units.
    OneHot,
}

/// State threaded through the sample loop.
#[derive(Debug, Clone, PartialEq)]
pub struct MhoqState {
    plant_state: DVector<f64>,
    sample: usize,
}

impl MhoqState {
    /// State estimate of the plant, in decision units
    pub fn plant_state(&self) -> &DVector<f64> {
        &self.plant_state
    }

    /// Number of committed samples
    pub fn sample(&self) -> usize {
        self.sample
    }
}

/// Result of one receding-horizon step.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct HorizonStep {
    /// Committed code
    pub code: u32,
    /// Level of the committed code under the selected model
    pub level: f64,
    /// Predicted cost of the horizon
    pub cost: f64,
}

/// Result of quantizing a whole signal.
#[derive(Debug, Clone, PartialEq)]
pub struct MhoqOutput {
    /// Committed codes, one per sample except for the last `N` samples of the signal
    pub codes: Vec<u32>,
    /// Levels of the committed codes under the selected model
    pub levels: Vec<f64>,
    /// Predicted cost of each step
    pub costs: Vec<f64>,
}

impl MhoqOutput {
    /// Wrap the codes into a single-channel code sequence.
    pub fn into_sequence(self, bits: u32) -> Result<CodeSequence, dalin_core::Error> {
        CodeSequence::single(bits, self.codes)
    }
}

/// Moving-horizon optimal quantizer for a single DAC channel.
#[derive(Debug, Clone, PartialEq)]
pub struct MovingHorizonQuantizer<S = BranchAndBound> {
    plant: StateSpace<f64>,
    levels: ChannelLevels,
    model: LevelModel,
    formulation: Formulation,
    solver: S,
    gamma: DMatrix<f64>,
    candidates: CandidateSet,
    realized: Vec<f64>,
    initial_state: DVector<f64>,
}

impl MovingHorizonQuantizer {
    /// Create a quantizer using the exact [`BranchAndBound`] solver.
    ///
    /// # Arguments
    ///
    /// * `plant`: Discrete-time reconstruction filter. Stability is not required.
    /// * `levels`: Ideal and calibrated levels of the channel
    /// * `model`: Levels realized by the committed codes
    /// * `formulation`: Decision variables of the per-step problem
    /// * `horizon`: Prediction horizon `N`, at least 1
    ///
    /// returns: Result<MovingHorizonQuantizer, MhoqError>
    pub fn new(
        plant: StateSpace<f64>,
        levels: ChannelLevels,
        model: LevelModel,
        formulation: Formulation,
        horizon: usize,
    ) -> Result<Self, MhoqError> {
        if horizon == 0 {
            return Err(MhoqError::Horizon);
        }
        if plant.domain != TimeDomain::Discrete {
            return Err(FilterError::Domain {
                expected: TimeDomain::Discrete,
            }
            .into());
        }

        let h = plant.impulse_response(horizon);
        let gamma = DMatrix::from_fn(horizon, horizon, |r, c| if r >= c { h[r - c] } else { 0.0 });

        let spec = levels.spec();
        let model_levels = levels.levels(model);
        let (candidates, realized) = match formulation {
            Formulation::Integer => {
                let ideal = spec.ideal_levels();
                let realized = model_levels
                    .iter()
                    .zip(&ideal)
                    .enumerate()
                    .map(|(code, (level, ideal))| code as f64 + (level - ideal) / spec.qstep())
                    .collect();
                (CandidateSet::uniform(spec.level_count()), realized)
            }
            Formulation::OneHot => (
                CandidateSet::new(model_levels.to_vec()),
                model_levels.to_vec(),
            ),
        };

        Ok(Self {
            initial_state: plant.zero_state(),
            plant,
            levels,
            model,
            formulation,
            solver: BranchAndBound::new(),
            gamma,
            candidates,
            realized,
        })
    }
}

impl<S: HorizonSolver> MovingHorizonQuantizer<S> {
    /// Replace the per-step solver.
    pub fn with_solver<T: HorizonSolver>(self, solver: T) -> MovingHorizonQuantizer<T> {
        MovingHorizonQuantizer {
            plant: self.plant,
            levels: self.levels,
            model: self.model,
            formulation: self.formulation,
            solver,
            gamma: self.gamma,
            candidates: self.candidates,
            realized: self.realized,
            initial_state: self.initial_state,
        }
    }

    /// Start from the given plant state estimate instead of the zero state. The state is
    /// expressed in decision units (LSB for [`Formulation::Integer`]).
    pub fn with_initial_state(mut self, state: DVector<f64>) -> Result<Self, MhoqError> {
        if state.len() != self.plant.order() {
            return Err(FilterError::Dimension {
                what: "initial state",
                expected: self.plant.order(),
                actual: state.len(),
            }
            .into());
        }
        self.initial_state = state;
        Ok(self)
    }

    /// Prediction horizon `N`
    pub fn horizon(&self) -> usize {
        self.gamma.nrows()
    }

    /// Decision variables of the per-step problem
    pub fn formulation(&self) -> Formulation {
        self.formulation
    }

    /// Level model of the committed codes
    pub fn model(&self) -> LevelModel {
        self.model
    }

    /// Channel levels of this quantizer
    pub fn levels(&self) -> &ChannelLevels {
        &self.levels
    }

    /// Reconstruction filter used for prediction
    pub fn plant(&self) -> &StateSpace<f64> {
        &self.plant
    }

    /// Per-step solver
    pub fn solver(&self) -> &S {
        &self.solver
    }

    /// State at the start of a signal.
    pub fn initial_state(&self) -> MhoqState {
        MhoqState {
            plant_state: self.initial_state.clone(),
            sample: 0,
        }
    }

    fn to_decision(&self, x: f64) -> f64 {
        match self.formulation {
            Formulation::Integer => self.levels.spec().to_code_domain(x),
            Formulation::OneHot => x,
        }
    }

    /// Commit one code for the first sample of `window`, which must hold the next `N` reference
    /// samples.
    pub fn step(
        &self,
        state: MhoqState,
        window: &[f64],
    ) -> Result<(HorizonStep, MhoqState), MhoqError> {
        let n = self.horizon();
        if window.len() != n {
            return Err(MhoqError::Window {
                expected: n,
                actual: window.len(),
            });
        }
        let MhoqState { plant_state, sample } = state;

        let reference: Vec<f64> = window.iter().map(|&x| self.to_decision(x)).collect();
        let mut free = DVector::zeros(n);
        let mut x = plant_state.clone();
        for k in 0..n {
            free[k] = self.plant.output(&x);
            x = &self.plant.a * x;
        }
        let target = &self.gamma * DVector::from_column_slice(&reference) - free;

        let problem = HorizonProblem {
            gamma: &self.gamma,
            target: &target,
            hint: &reference,
            candidates: &self.candidates,
        };
        let solution = self
            .solver
            .solve(&problem)
            .ok_or(MhoqError::Infeasible { step: sample })?;
        let code = match solution.codes.first() {
            Some(&code) if (code as usize) < self.realized.len() => code,
            _ => return Err(MhoqError::Infeasible { step: sample }),
        };
        log::debug!(
            "Sample {sample}: committed code {code}, predicted cost {}",
            solution.cost
        );

        let (_, plant_state) = self
            .plant
            .step(&plant_state, self.realized[code as usize] - reference[0]);
        Ok((
            HorizonStep {
                code,
                level: self.levels.level(code, self.model)?,
                cost: solution.cost,
            },
            MhoqState {
                plant_state,
                sample: sample + 1,
            },
        ))
    }

    /// Quantize a whole signal. The last `N` samples only serve as lookahead, so the output holds
    /// `x.len() - N` codes.
    #[profiling::function]
    pub fn run(&self, x: &[f64]) -> Result<MhoqOutput, MhoqError> {
        let n = self.horizon();
        if x.len() < n {
            return Err(MhoqError::SignalTooShort {
                len: x.len(),
                horizon: n,
            });
        }
        let len = x.len() - n;
        let mut output = MhoqOutput {
            codes: Vec::with_capacity(len),
            levels: Vec::with_capacity(len),
            costs: Vec::with_capacity(len),
        };
        let mut state = self.initial_state();
        for window in x.windows(n).take(len) {
            let (step, next) = self.step(state, window)?;
            output.codes.push(step.code);
            output.levels.push(step.level);
            output.costs.push(step.cost);
            state = next;
        }
        Ok(output)
    }
}
