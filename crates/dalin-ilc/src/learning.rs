//! Iteration loop of the learning controller.
use nalgebra::DVector;

use dalin_core::util::rms;
use dalin_core::CodeSequence;

use crate::inner::InnerQuantizer;
use crate::operators::LearningOperators;
use crate::IlcError;

/// Result of a learning run.
#[derive(Debug, Clone, PartialEq)]
pub struct IlcOutcome {
    /// Codes of the last iteration
    pub codes: CodeSequence,
    /// Feed-forward signal after the last update
    pub feedforward: Vec<f64>,
    /// RMS tracking error of each iteration, starting with the initial feed-forward
    pub rms_errors: Vec<f64>,
}

/// Learning controller: fixed operators and iteration count.
#[derive(Debug, Clone, PartialEq)]
pub struct IterativeLearningControl {
    operators: LearningOperators,
    iterations: usize,
}

impl IterativeLearningControl {
    /// Create a learning controller running `iterations` iterations (at least one).
    pub fn new(operators: LearningOperators, iterations: usize) -> Result<Self, IlcError> {
        if iterations == 0 {
            return Err(IlcError::Iterations);
        }
        Ok(Self {
            operators,
            iterations,
        })
    }

    /// Learning operators
    pub fn operators(&self) -> &LearningOperators {
        &self.operators
    }

    /// Number of iterations
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Signal length the controller is sized for
    pub fn size(&self) -> usize {
        self.operators.size()
    }

    /// Learn from a zero feed-forward signal.
    pub fn run<Q: InnerQuantizer + ?Sized>(
        &self,
        inner: &mut Q,
        reference: &[f64],
        dither: Option<&[f64]>,
    ) -> Result<IlcOutcome, IlcError> {
        let initial = vec![0.0; reference.len()];
        self.run_from(inner, reference, dither, &initial)
    }

    /// Learn from the given initial feed-forward signal.
    ///
    /// # Arguments
    ///
    /// * `inner`: Quantizer driven with the reference plus the feed-forward signal
    /// * `reference`: Reference, of the size of the operators
    /// * `dither`: Optional dither passed to the inner quantizer on every iteration
    /// * `initial`: Initial feed-forward signal, of the size of the operators
    ///
    /// returns: Result<IlcOutcome, IlcError>
    #[profiling::function]
    pub fn run_from<Q: InnerQuantizer + ?Sized>(
        &self,
        inner: &mut Q,
        reference: &[f64],
        dither: Option<&[f64]>,
        initial: &[f64],
    ) -> Result<IlcOutcome, IlcError> {
        let n = self.size();
        for (what, len) in [("reference", reference.len()), ("feed-forward", initial.len())] {
            if len != n {
                return Err(IlcError::Dimension {
                    what,
                    expected: n,
                    actual: len,
                });
            }
        }

        let reference = DVector::from_column_slice(reference);
        let mut u = DVector::from_column_slice(initial);
        let mut rms_errors = Vec::with_capacity(self.iterations);
        let mut codes = None;
        for iteration in 0..self.iterations {
            let input = &reference + &u;
            let output = inner.quantize(input.as_slice(), dither)?;
            let y = self
                .operators
                .plant_output(&DVector::from_vec(output.levels));
            let error = &reference - y;
            let rms_error = rms(error.as_slice());
            log::debug!("Learning iteration {iteration}: RMS tracking error {rms_error:.3e}");
            rms_errors.push(rms_error);
            u = self.operators.update(&u, &error);
            codes = Some(output.codes);
        }

        Ok(IlcOutcome {
            // At least one iteration ran
            codes: codes.ok_or(IlcError::Iterations)?,
            feedforward: u.as_slice().to_vec(),
            rms_errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::TAU;

    use rstest::rstest;

    use dalin_core::{ChannelLevels, LevelModel, LevelTable, QuantizerPreset};
    use dalin_dem::DemQuantizer;
    use dalin_filters::design::second_order_ntf;
    use dalin_filters::StateSpace;
    use dalin_nsq::NoiseShapingQuantizer;

    use crate::inner::{DemInner, DirectQuantizer};
    use crate::operators::LearningWeights;

    use super::*;

    const LEN: usize = 64;

    fn controller(iterations: usize) -> IterativeLearningControl {
        let plant = StateSpace::from_transfer_function(&[0.5, 0.0], &[1.0, -0.5]).unwrap();
        let weights = LearningWeights::standard(LEN).unwrap();
        let operators = LearningOperators::from_plant(&plant, &weights).unwrap();
        IterativeLearningControl::new(operators, iterations).unwrap()
    }

    fn reference() -> Vec<f64> {
        (0..LEN)
            .map(|k| 0.6 * (TAU * k as f64 / 32.0).sin())
            .collect()
    }

    fn inner(kind: &str) -> Box<dyn InnerQuantizer> {
        let spec = QuantizerPreset::Generic6Bit.spec();
        let levels = ChannelLevels::ideal(spec);
        match kind {
            "nsq" => Box::new(
                NoiseShapingQuantizer::new(&second_order_ntf(), levels, LevelModel::Ideal)
                    .unwrap(),
            ),
            "direct" => Box::new(DirectQuantizer::new(levels, LevelModel::Ideal)),
            _ => Box::new(
                DemInner::new(
                    DemQuantizer::new(spec).unwrap(),
                    &LevelTable::ideal(&spec, 2),
                    LevelModel::Ideal,
                    fastrand::Rng::with_seed(17),
                )
                .unwrap(),
            ),
        }
    }

    #[rstest]
    fn learning_reduces_tracking_error(#[values("nsq", "direct", "dem")] kind: &str) {
        let ilc = controller(10);
        let mut inner = inner(kind);
        let outcome = ilc.run(inner.as_mut(), &reference(), None).unwrap();

        assert_eq!(10, outcome.rms_errors.len());
        assert_eq!(LEN, outcome.codes.len());
        assert_eq!(LEN, outcome.feedforward.len());
        let baseline = outcome.rms_errors[0];
        assert!(baseline > 0.05, "baseline {baseline}");
        for (i, e) in outcome.rms_errors.iter().enumerate().skip(1) {
            assert!(*e < 0.25 * baseline, "iteration {i}: {e} vs {baseline}");
        }
        // Once converged the error wanders around the quantization noise floor, so it only has
        // to stay below the third iteration's error up to the RMS of a uniform rounding error.
        let floor = QuantizerPreset::Generic6Bit.spec().qstep() / 12f64.sqrt();
        let settled = outcome.rms_errors[2];
        for (i, e) in outcome.rms_errors.iter().enumerate().skip(3) {
            assert!(*e <= settled + floor, "iteration {i}: {e} vs {settled}");
        }
        let max = outcome.codes.max_code();
        assert!(outcome
            .codes
            .channels()
            .iter()
            .flatten()
            .all(|&c| c <= max));
    }

    #[test]
    fn single_iteration_is_plain_quantizer() {
        let ilc = controller(1);
        let mut inner = inner("nsq");
        let x = reference();
        let outcome = ilc.run(inner.as_mut(), &x, None).unwrap();
        let expected = inner.quantize(&x, None).unwrap();
        assert_eq!(expected.codes, outcome.codes);
        assert_eq!(1, outcome.rms_errors.len());
    }

    #[test]
    fn warm_start_keeps_learned_feedforward() {
        let ilc = controller(6);
        let mut inner = inner("direct");
        let x = reference();
        let cold = ilc.run(inner.as_mut(), &x, None).unwrap();
        let warm = ilc
            .run_from(inner.as_mut(), &x, None, &cold.feedforward)
            .unwrap();
        assert!(warm.rms_errors[0] < 0.25 * cold.rms_errors[0]);
    }

    #[test]
    fn rejects_mismatched_signals() {
        let ilc = controller(2);
        let mut inner = inner("direct");
        assert_eq!(
            Err(IlcError::Dimension {
                what: "reference",
                expected: LEN,
                actual: 10
            }),
            ilc.run(inner.as_mut(), &[0.0; 10], None)
        );
        assert_eq!(
            Err(IlcError::Dimension {
                what: "feed-forward",
                expected: LEN,
                actual: 3
            }),
            ilc.run_from(inner.as_mut(), &reference(), None, &[0.0; 3])
        );
        assert!(matches!(
            ilc.run(inner.as_mut(), &reference(), Some(&[0.0; 3][..])),
            Err(IlcError::Level(_))
        ));
    }

    #[test]
    fn rejects_zero_iterations() {
        let operators = controller(1).operators().clone();
        assert_eq!(
            Err(IlcError::Iterations),
            IterativeLearningControl::new(operators, 0)
        );
    }
}
