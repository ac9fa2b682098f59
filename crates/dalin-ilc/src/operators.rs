//! Learning operators and their convergence certificate.
//!
//! With the plant output matrix `G` (lower-triangular Toeplitz matrix of the impulse response),
//! tracking error weight `We`, control effort weight `Wf` and control increment weight `Wdf`,
//! the operators minimizing the next-iteration quadratic cost are
//!
//! ```text
//! Q = (Gᵀ We G + Wf + Wdf)⁻¹ (Gᵀ We G + Wdf)
//! L = (Gᵀ We G + Wdf)⁻¹ Gᵀ We
//! ```
use nalgebra::{Cholesky, DMatrix, DVector};

use dalin_filters::{FilterError, StateSpace, TimeDomain};

use crate::IlcError;

/// Weighting matrices of the learning operator design.
#[derive(Debug, Clone, PartialEq)]
pub struct LearningWeights {
    tracking: DMatrix<f64>,
    effort: DMatrix<f64>,
    increment: DMatrix<f64>,
}

fn check_positive_definite(m: &DMatrix<f64>, what: &'static str) -> Result<(), IlcError> {
    let scale = m.amax().max(1.0);
    if (m - m.transpose()).amax() > 1e-12 * scale || Cholesky::new(m.clone()).is_none() {
        return Err(IlcError::NotPositiveDefinite(what));
    }
    Ok(())
}

fn check_square(m: &DMatrix<f64>, n: usize, what: &'static str) -> Result<(), IlcError> {
    for actual in [m.nrows(), m.ncols()] {
        if actual != n {
            return Err(IlcError::Dimension {
                what,
                expected: n,
                actual,
            });
        }
    }
    Ok(())
}

impl LearningWeights {
    /// Create a set of weights. All three matrices must be square, of the same size, symmetric and
    /// positive definite.
    ///
    /// # Arguments
    ///
    /// * `tracking`: Tracking error weight `We`
    /// * `effort`: Control effort weight `Wf`
    /// * `increment`: Control increment weight `Wdf`
    ///
    /// returns: Result<LearningWeights, IlcError>
    pub fn new(
        tracking: DMatrix<f64>,
        effort: DMatrix<f64>,
        increment: DMatrix<f64>,
    ) -> Result<Self, IlcError> {
        let n = tracking.nrows();
        for (m, what) in [
            (&tracking, "tracking"),
            (&effort, "effort"),
            (&increment, "increment"),
        ] {
            check_square(m, n, what)?;
            check_positive_definite(m, what)?;
        }
        Ok(Self {
            tracking,
            effort,
            increment,
        })
    }

    /// Scaled identity weights for signals of `n` samples.
    pub fn scaled_identity(
        n: usize,
        tracking: f64,
        effort: f64,
        increment: f64,
    ) -> Result<Self, IlcError> {
        let identity = DMatrix::<f64>::identity(n, n);
        Self::new(&identity * tracking, &identity * effort, identity * increment)
    }

    /// Weights `We = I`, `Wf = 1e-4 I`, `Wdf = 0.1 I`.
    pub fn standard(n: usize) -> Result<Self, IlcError> {
        Self::scaled_identity(n, 1.0, 1e-4, 1e-1)
    }

    /// Signal length the weights are sized for
    pub fn size(&self) -> usize {
        self.tracking.nrows()
    }

    /// Tracking error weight `We`
    pub fn tracking(&self) -> &DMatrix<f64> {
        &self.tracking
    }

    /// Control effort weight `Wf`
    pub fn effort(&self) -> &DMatrix<f64> {
        &self.effort
    }

    /// Control increment weight `Wdf`
    pub fn increment(&self) -> &DMatrix<f64> {
        &self.increment
    }
}

/// Stability and monotone convergence figures of a learning loop `Q - L G`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Certificate {
    /// Spectral radius of `Q - L G`
    pub spectral_radius: f64,
    /// Largest eigenvalue of `(Q - L G)(Q - L G)ᵀ`
    pub monotone_radius: f64,
}

impl Certificate {
    /// Numerical slack allowed above 1 on both figures.
    pub const TOLERANCE: f64 = 1e-9;

    /// Evaluate the certificate of a learning loop.
    #[profiling::function]
    pub fn of(q: &DMatrix<f64>, l: &DMatrix<f64>, g: &DMatrix<f64>) -> Self {
        let loop_matrix = q - l * g;
        if loop_matrix.is_empty() {
            return Self {
                spectral_radius: 0.0,
                monotone_radius: 0.0,
            };
        }
        let spectral_radius = loop_matrix
            .complex_eigenvalues()
            .iter()
            .map(|p| p.norm())
            .fold(0.0, f64::max);
        let monotone_radius = (&loop_matrix * loop_matrix.transpose())
            .symmetric_eigenvalues()
            .iter()
            .copied()
            .fold(0.0, f64::max);
        Self {
            spectral_radius,
            monotone_radius,
        }
    }

    /// Whether the learning loop is stable
    pub fn is_stable(&self) -> bool {
        self.spectral_radius <= 1.0 + Self::TOLERANCE
    }

    /// Whether the norm of the error decreases monotonically from one iteration to the next
    pub fn is_monotone(&self) -> bool {
        self.monotone_radius <= 1.0 + Self::TOLERANCE
    }
}

/// `Q` filter, learning matrix `L` and plant output matrix `G` of a learning loop.
///
/// Operators are sized for one signal length and never change once built.
#[derive(Debug, Clone, PartialEq)]
pub struct LearningOperators {
    q: DMatrix<f64>,
    l: DMatrix<f64>,
    g: DMatrix<f64>,
    certificate: Certificate,
}

impl LearningOperators {
    /// Design the operators from the impulse response of the plant. Only the first
    /// `weights.size()` samples of the impulse response are used.
    pub fn design(impulse_response: &[f64], weights: &LearningWeights) -> Result<Self, IlcError> {
        let n = weights.size();
        if impulse_response.len() < n {
            return Err(IlcError::Dimension {
                what: "impulse response",
                expected: n,
                actual: impulse_response.len(),
            });
        }
        let g = DMatrix::from_fn(n, n, |r, c| {
            if r >= c {
                impulse_response[r - c]
            } else {
                0.0
            }
        });

        let gt_we = g.transpose() * &weights.tracking;
        let gt_we_g = &gt_we * &g;
        let with_increment = &gt_we_g + &weights.increment;
        let q = Cholesky::new(&with_increment + &weights.effort)
            .ok_or(IlcError::Singular("Q filter"))?
            .solve(&with_increment);
        let l = Cholesky::new(with_increment)
            .ok_or(IlcError::Singular("learning matrix"))?
            .solve(&gt_we);
        Self::from_matrices(q, l, g)
    }

    /// Design the operators from the impulse response of a discrete-time plant.
    pub fn from_plant(plant: &StateSpace<f64>, weights: &LearningWeights) -> Result<Self, IlcError> {
        if plant.domain != TimeDomain::Discrete {
            return Err(FilterError::Domain {
                expected: TimeDomain::Discrete,
            }
            .into());
        }
        Self::design(&plant.impulse_response(weights.size()), weights)
    }

    /// Use externally designed operators. The certificate is still checked.
    pub fn from_matrices(
        q: DMatrix<f64>,
        l: DMatrix<f64>,
        g: DMatrix<f64>,
    ) -> Result<Self, IlcError> {
        let n = q.nrows();
        check_square(&q, n, "Q filter")?;
        check_square(&l, n, "learning matrix")?;
        check_square(&g, n, "plant output matrix")?;

        let certificate = Certificate::of(&q, &l, &g);
        log::info!(
            "Learning loop spectral radius {:.6}, monotone convergence radius {:.6}",
            certificate.spectral_radius,
            certificate.monotone_radius
        );
        if !(certificate.is_stable() && certificate.is_monotone()) {
            return Err(IlcError::Certificate {
                spectral_radius: certificate.spectral_radius,
                monotone_radius: certificate.monotone_radius,
            });
        }
        Ok(Self { q, l, g, certificate })
    }

    /// Signal length the operators are sized for
    pub fn size(&self) -> usize {
        self.q.nrows()
    }

    /// `Q` filter
    pub fn q(&self) -> &DMatrix<f64> {
        &self.q
    }

    /// Learning matrix
    pub fn l(&self) -> &DMatrix<f64> {
        &self.l
    }

    /// Plant output matrix
    pub fn g(&self) -> &DMatrix<f64> {
        &self.g
    }

    /// Certificate of the learning loop
    pub fn certificate(&self) -> Certificate {
        self.certificate
    }

    /// Filtered plant output `G y` of a DAC output signal.
    pub fn plant_output(&self, y: &DVector<f64>) -> DVector<f64> {
        &self.g * y
    }

    /// Next feed-forward signal, `Q (u + L e)`.
    pub fn update(&self, u: &DVector<f64>, e: &DVector<f64>) -> DVector<f64> {
        &self.q * (u + &self.l * e)
    }
}
