//! Single-input single-output linear state-space systems of arbitrary order.
//!
//! # Example
//!
//! ```rust
//! use dalin_filters::statespace::StateSpace;
//!
//! // y[n] = 0.5 y[n-1] + 0.5 u[n-1]
//! let filter = StateSpace::from_transfer_function(&[0.5], &[1.0, -0.5]).unwrap();
//! let h = filter.impulse_response(3);
//! assert_eq!(h, vec![0.0, 0.5, 0.25]);
//! ```
use nalgebra::{Complex, DMatrix, DVector, RealField, RowDVector, Scalar};
use numeric_literals::replace_float_literals;

use crate::FilterError;

/// Time domain of a state-space system.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum TimeDomain {
    /// `x[n+1] = A x[n] + B u[n]`
    #[default]
    Discrete,
    /// `dx/dt = A x + B u`
    Continuous,
}

/// Linear SISO state-space system with direct access to its matrices.
///
/// The output equation is `y = C x + D u`.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSpace<T: Scalar = f64> {
    /// Internal state matrix
    pub a: DMatrix<T>,
    /// Input -> state vector
    pub b: DVector<T>,
    /// State -> output vector
    pub c: RowDVector<T>,
    /// Input -> output gain
    pub d: T,
    /// Time domain of the system
    pub domain: TimeDomain,
}

pub(crate) fn to_f64<T: RealField>(value: T) -> f64 {
    nalgebra::try_convert::<T, f64>(value).unwrap_or(f64::NAN)
}

impl<T: RealField + Copy> StateSpace<T> {
    /// Create a state-space system, checking that the matrices agree with the order given by `A`.
    pub fn new(
        a: DMatrix<T>,
        b: DVector<T>,
        c: RowDVector<T>,
        d: T,
        domain: TimeDomain,
    ) -> Result<Self, FilterError> {
        let n = a.nrows();
        for (what, actual) in [("A", a.ncols()), ("B", b.nrows()), ("C", c.ncols())] {
            if actual != n {
                return Err(FilterError::Dimension {
                    what,
                    expected: n,
                    actual,
                });
            }
        }
        Ok(Self {
            a,
            b,
            c,
            d,
            domain,
        })
    }

    /// Create a discrete-time system.
    pub fn discrete(
        a: DMatrix<T>,
        b: DVector<T>,
        c: RowDVector<T>,
        d: T,
    ) -> Result<Self, FilterError> {
        Self::new(a, b, c, d, TimeDomain::Discrete)
    }

    /// Create a continuous-time system.
    pub fn continuous(
        a: DMatrix<T>,
        b: DVector<T>,
        c: RowDVector<T>,
        d: T,
    ) -> Result<Self, FilterError> {
        Self::new(a, b, c, d, TimeDomain::Continuous)
    }

    /// Memoryless discrete-time system of order 0.
    pub fn gain(d: T) -> Self {
        Self {
            a: DMatrix::zeros(0, 0),
            b: DVector::zeros(0),
            c: RowDVector::zeros(0),
            d,
            domain: TimeDomain::Discrete,
        }
    }

    /// Realize a discrete transfer function in controllable canonical form.
    ///
    /// # Arguments
    ///
    /// * `b`: Numerator coefficients, in descending powers of `z`
    /// * `a`: Denominator coefficients, in descending powers of `z`
    ///
    /// returns: Result<StateSpace<T>, FilterError>
    ///
    /// The numerator is padded with leading zeros to the length of the denominator, and both are
    /// normalized by the leading denominator coefficient. The transfer function must be proper.
    #[replace_float_literals(nalgebra::convert::<f64, T>(literal))]
    pub fn from_transfer_function(b: &[T], a: &[T]) -> Result<Self, FilterError> {
        let a_start = a.iter().position(|v| !v.is_zero()).ok_or_else(|| {
            FilterError::InvalidTransferFunction("denominator is zero".to_string())
        })?;
        let a = &a[a_start..];
        let b_start = b.iter().position(|v| !v.is_zero()).unwrap_or(b.len());
        let b = &b[b_start..];
        if b.len() > a.len() {
            return Err(FilterError::InvalidTransferFunction(format!(
                "improper transfer function (numerator degree {} > denominator degree {})",
                b.len() - 1,
                a.len() - 1
            )));
        }

        let a0 = a[0];
        let den: Vec<T> = a.iter().map(|&v| v / a0).collect();
        let mut num = vec![T::zero(); a.len()];
        for (dst, &src) in num[a.len() - b.len()..].iter_mut().zip(b) {
            *dst = src / a0;
        }

        let d = num[0];
        let n = den.len() - 1;
        if n == 0 {
            return Ok(Self::gain(d));
        }

        let mut am = DMatrix::zeros(n, n);
        for j in 0..n {
            am[(0, j)] = -den[j + 1];
        }
        for i in 1..n {
            am[(i, i - 1)] = 1.0;
        }
        let mut bm = DVector::zeros(n);
        bm[0] = 1.0;
        let cm = RowDVector::from_iterator(n, (0..n).map(|j| num[j + 1] - d * den[j + 1]));
        Self::discrete(am, bm, cm, d)
    }

    /// Order of the system (number of states)
    pub fn order(&self) -> usize {
        self.a.nrows()
    }

    /// Zero state vector of the right size for this system
    pub fn zero_state(&self) -> DVector<T> {
        DVector::zeros(self.order())
    }

    /// Output of the strictly proper part of the system, `C x`.
    pub fn output(&self, state: &DVector<T>) -> T {
        if self.order() == 0 {
            return T::zero();
        }
        (&self.c * state)[0]
    }

    /// Advance a discrete system by one sample, returning its output and next state.
    pub fn step(&self, state: &DVector<T>, input: T) -> (T, DVector<T>) {
        let y = self.output(state) + self.d * input;
        let next = &self.a * state + &self.b * input;
        (y, next)
    }

    /// Simulate a discrete system from the zero state.
    pub fn simulate(&self, input: &[T]) -> Vec<T> {
        let mut state = self.zero_state();
        input
            .iter()
            .map(|&u| {
                let (y, next) = self.step(&state, u);
                state = next;
                y
            })
            .collect()
    }

    /// First `len` samples of the impulse response `[D, CB, CAB, CA²B, ...]`.
    pub fn impulse_response(&self, len: usize) -> Vec<T> {
        let mut h = Vec::with_capacity(len);
        if len == 0 {
            return h;
        }
        h.push(self.d);
        let mut x = self.b.clone();
        for _ in 1..len {
            h.push(self.output(&x));
            x = &self.a * x;
        }
        h
    }

    /// Eigenvalues of the state matrix.
    pub fn poles(&self) -> Vec<Complex<T>> {
        if self.order() == 0 {
            return vec![];
        }
        self.a.complex_eigenvalues().iter().copied().collect()
    }

    /// Largest pole magnitude
    pub fn spectral_radius(&self) -> T {
        self.poles()
            .into_iter()
            .map(|p| (p.re * p.re + p.im * p.im).sqrt())
            .fold(T::zero(), |acc, m| acc.max(m))
    }

    /// Largest pole real part, or `None` for a system of order 0.
    pub fn spectral_abscissa(&self) -> Option<T> {
        self.poles().into_iter().map(|p| p.re).reduce(|a, b| a.max(b))
    }

    /// Returns an error unless all poles are strictly inside the stability region of the system's
    /// time domain.
    #[replace_float_literals(nalgebra::convert::<f64, T>(literal))]
    pub fn check_stable(&self) -> Result<(), FilterError> {
        match self.domain {
            TimeDomain::Discrete => {
                let radius = self.spectral_radius();
                if radius < 1.0 {
                    Ok(())
                } else {
                    Err(FilterError::Unstable {
                        radius: to_f64(radius),
                    })
                }
            }
            TimeDomain::Continuous => match self.spectral_abscissa() {
                Some(abscissa) if abscissa >= 0.0 => Err(FilterError::UnstableContinuous {
                    abscissa: to_f64(abscissa),
                }),
                _ => Ok(()),
            },
        }
    }

    /// Apply the state transformation `x = T x'`, returning `(T⁻¹AT, T⁻¹B, CT, D)`.
    pub fn similarity(&self, t: &DMatrix<T>) -> Result<Self, FilterError> {
        let n = self.order();
        if t.nrows() != n || t.ncols() != n {
            return Err(FilterError::Dimension {
                what: "similarity transform",
                expected: n,
                actual: t.nrows().max(t.ncols()),
            });
        }
        let t_inv = t
            .clone()
            .try_inverse()
            .ok_or(FilterError::Singular("similarity transform"))?;
        Ok(Self {
            a: &t_inv * &self.a * t,
            b: &t_inv * &self.b,
            c: &self.c * t,
            d: self.d,
            domain: self.domain,
        })
    }
}
