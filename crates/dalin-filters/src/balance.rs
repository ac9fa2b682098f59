//! Gramians and balanced realizations.
//!
//! A balanced realization is a state-space coordinate system in which the controllability and
//! observability Gramians are equal and diagonal, holding the Hankel singular values of the system
//! in decreasing order. Running the noise-shaping loop filter in balanced coordinates keeps its
//! states well-scaled.
use nalgebra::{Cholesky, DMatrix, DVector, RealField};
use numeric_literals::replace_float_literals;

use crate::lyapunov::{continuous_lyapunov, discrete_lyapunov};
use crate::statespace::to_f64;
use crate::{FilterError, StateSpace, TimeDomain};

/// Result of balancing a system.
#[derive(Debug, Clone, PartialEq)]
pub struct BalancedRealization<T: RealField> {
    /// Balanced system, equivalent to the original
    pub system: StateSpace<T>,
    /// Hankel singular values, in decreasing order
    pub hankel_singular_values: DVector<T>,
    /// Transformation from balanced to original states, `x = T x'`
    pub transform: DMatrix<T>,
}

impl<T: RealField + Copy> StateSpace<T> {
    /// Controllability and observability Gramians of a stable system.
    ///
    /// returns: Result<(controllability, observability), FilterError>
    #[profiling::function]
    pub fn gramians(&self) -> Result<(DMatrix<T>, DMatrix<T>), FilterError> {
        self.check_stable()?;
        let bb = &self.b * self.b.transpose();
        let cc = self.c.transpose() * &self.c;
        let at = self.a.transpose();
        match self.domain {
            TimeDomain::Discrete => Ok((
                discrete_lyapunov(&self.a, &bb)?,
                discrete_lyapunov(&at, &cc)?,
            )),
            TimeDomain::Continuous => Ok((
                continuous_lyapunov(&self.a, &bb)?,
                continuous_lyapunov(&at, &cc)?,
            )),
        }
    }

    /// Compute the balanced realization of a stable, minimal system.
    ///
    /// Fails with [`FilterError::Unstable`] (or its continuous counterpart) when the system is not
    /// stable, and with [`FilterError::NotMinimal`] when one of its Gramians is not positive
    /// definite.
    #[profiling::function]
    #[replace_float_literals(nalgebra::convert::<f64, T>(literal))]
    pub fn balanced_realization(&self) -> Result<BalancedRealization<T>, FilterError> {
        let n = self.order();
        if n == 0 {
            return Ok(BalancedRealization {
                system: self.clone(),
                hankel_singular_values: DVector::zeros(0),
                transform: DMatrix::zeros(0, 0),
            });
        }

        let (wr, wo) = self.gramians()?;
        let lr = Cholesky::new(wr)
            .ok_or(FilterError::NotMinimal("controllability"))?
            .unpack();
        let lo = Cholesky::new(wo)
            .ok_or(FilterError::NotMinimal("observability"))?
            .unpack();

        let svd = (lo.transpose() * &lr).svd(false, true);
        let v_t = svd
            .v_t
            .ok_or(FilterError::Singular("Hankel singular value decomposition"))?;

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&i, &j| {
            svd.singular_values[j]
                .partial_cmp(&svd.singular_values[i])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let sigma = DVector::from_iterator(n, order.iter().map(|&i| svd.singular_values[i]));
        let v_t = DMatrix::from_fn(n, n, |r, c| v_t[(order[r], c)]);

        let smallest = sigma[n - 1];
        if smallest <= sigma[0] * 1e-12 {
            return Err(FilterError::NotMinimal("Hankel"));
        }

        let scale = DMatrix::from_diagonal(&sigma.map(|s| 1.0 / s.sqrt()));
        let transform = lr * v_t.transpose() * scale;
        let system = self.similarity(&transform)?;
        log::debug!(
            "Balanced order {n} system, Hankel singular values {:?}",
            sigma.iter().map(|&s| to_f64(s)).collect::<Vec<_>>()
        );
        Ok(BalancedRealization {
            system,
            hankel_singular_values: sigma,
            transform,
        })
    }

    /// Balanced equivalent of this system. See [`Self::balanced_realization`].
    pub fn balanced(&self) -> Result<Self, FilterError> {
        self.balanced_realization().map(|b| b.system)
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::{dmatrix, dvector, RowDVector};
    use rstest::rstest;

    use super::*;

    fn random_stable_system(rng: &mut fastrand::Rng, n: usize) -> StateSpace<f64> {
        let a = DMatrix::from_fn(n, n, |_, _| 2.0 * rng.f64() - 1.0);
        let norm = a.row_iter().map(|r| r.abs().sum()).fold(0.0, f64::max);
        let a = a * (0.9 / norm);
        let b = DVector::from_fn(n, |_, _| 2.0 * rng.f64() - 1.0);
        let c = RowDVector::from_fn(n, |_, _| 2.0 * rng.f64() - 1.0);
        StateSpace::discrete(a, b, c, rng.f64()).unwrap()
    }

    #[rstest]
    fn balanced_system_is_equivalent(#[values(1, 2, 3, 5)] order: usize) {
        let mut rng = fastrand::Rng::with_seed(order as u64);
        let system = random_stable_system(&mut rng, order);
        let balanced = system.balanced_realization().unwrap();

        let input: Vec<f64> = (0..64).map(|_| 2.0 * rng.f64() - 1.0).collect();
        let expected = system.simulate(&input);
        let actual = balanced.system.simulate(&input);
        for (e, a) in expected.iter().zip(&actual) {
            assert!((e - a).abs() < 1e-9, "{e} != {a}");
        }
    }

    #[rstest]
    fn balanced_gramians_are_diagonal(#[values(2, 3, 4)] order: usize) {
        let mut rng = fastrand::Rng::with_seed(100 + order as u64);
        let system = random_stable_system(&mut rng, order);
        let balanced = system.balanced_realization().unwrap();
        let (wr, wo) = balanced.system.gramians().unwrap();
        let sigma = DMatrix::from_diagonal(&balanced.hankel_singular_values);
        assert!((wr - &sigma).amax() < 1e-9);
        assert!((wo - &sigma).amax() < 1e-9);

        let sv = &balanced.hankel_singular_values;
        assert!(sv.as_slice().windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn second_order_loop_filter() {
        // M(z) = 2z⁻¹ - z⁻²
        let system: StateSpace<f64> =
            StateSpace::from_transfer_function(&[0.0, 2.0, -1.0], &[1.0, 0.0, 0.0]).unwrap();
        let balanced = system.balanced().unwrap();
        assert_eq!(2, balanced.order());
        let h = balanced.impulse_response(4);
        for (expected, actual) in [0.0, 2.0, -1.0, 0.0].into_iter().zip(h) {
            assert!((expected - actual).abs() < 1e-12);
        }
    }

    #[test]
    fn continuous_system() {
        let system: StateSpace<f64> = StateSpace::continuous(
            dmatrix![-1.0, 0.0; 1.0, -2.0],
            dvector![1.0, 0.0],
            RowDVector::from_row_slice(&[0.0, 1.0]),
            0.0,
        )
        .unwrap();
        let balanced = system.balanced_realization().unwrap();
        let (wr, wo) = balanced.system.gramians().unwrap();
        assert!((&wr - &wo).amax() < 1e-9);
        assert!(wr[(0, 1)].abs() < 1e-9);
    }

    #[test]
    fn rejects_unstable() {
        let system = StateSpace::from_transfer_function(&[1.0], &[1.0, -1.5]).unwrap();
        assert!(matches!(
            system.balanced(),
            Err(FilterError::Unstable { radius }) if (radius - 1.5).abs() < 1e-12
        ));
    }

    #[test]
    fn rejects_non_minimal() {
        // Second state is unobservable
        let system = StateSpace::discrete(
            dmatrix![0.5, 0.0; 0.0, 0.2],
            dvector![1.0, 1.0],
            RowDVector::from_row_slice(&[1.0, 0.0]),
            0.0,
        )
        .unwrap();
        assert_eq!(
            Err(FilterError::NotMinimal("observability")),
            system.balanced()
        );
    }

    #[test]
    fn gain_is_already_balanced() {
        let system = StateSpace::gain(2.0);
        let balanced = system.balanced_realization().unwrap();
        assert_eq!(system, balanced.system);
        assert!(balanced.hankel_singular_values.is_empty());
    }
}
