//! Solvers for the Lyapunov equations used to compute Gramians.
//!
//! Both solvers vectorize the equation with Kronecker products and solve the resulting
//! `n² x n²` linear system by LU decomposition. This is exact up to rounding and perfectly adequate
//! for the low system orders found in loop filters and plant models.
use nalgebra::{DMatrix, DVector, RealField};
use numeric_literals::replace_float_literals;

use crate::FilterError;

fn check_square<T: RealField>(
    a: &DMatrix<T>,
    q: &DMatrix<T>,
) -> Result<usize, FilterError> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(FilterError::Dimension {
            what: "Lyapunov A",
            expected: n,
            actual: a.ncols(),
        });
    }
    if q.nrows() != n || q.ncols() != n {
        return Err(FilterError::Dimension {
            what: "Lyapunov Q",
            expected: n,
            actual: q.nrows().max(q.ncols()),
        });
    }
    Ok(n)
}

#[replace_float_literals(nalgebra::convert::<f64, T>(literal))]
fn solve_vectorized<T: RealField + Copy>(
    lhs: DMatrix<T>,
    q: &DMatrix<T>,
    n: usize,
    negate: bool,
) -> Result<DMatrix<T>, FilterError> {
    let mut rhs = DVector::from_column_slice(q.as_slice());
    if negate {
        rhs.neg_mut();
    }
    let x = lhs
        .lu()
        .solve(&rhs)
        .ok_or(FilterError::Singular("Lyapunov equation"))?;
    let x = DMatrix::from_column_slice(n, n, x.as_slice());
    Ok((&x + x.transpose()) * 0.5)
}

/// Solve the discrete Lyapunov equation `A X Aᵀ - X + Q = 0`.
#[profiling::function]
pub fn discrete_lyapunov<T: RealField + Copy>(
    a: &DMatrix<T>,
    q: &DMatrix<T>,
) -> Result<DMatrix<T>, FilterError> {
    let n = check_square(a, q)?;
    if n == 0 {
        return Ok(DMatrix::zeros(0, 0));
    }
    let lhs = DMatrix::identity(n * n, n * n) - a.kronecker(a);
    solve_vectorized(lhs, q, n, false)
}

/// Solve the continuous Lyapunov equation `A X + X Aᵀ + Q = 0`.
#[profiling::function]
pub fn continuous_lyapunov<T: RealField + Copy>(
    a: &DMatrix<T>,
    q: &DMatrix<T>,
) -> Result<DMatrix<T>, FilterError> {
    let n = check_square(a, q)?;
    if n == 0 {
        return Ok(DMatrix::zeros(0, 0));
    }
    let eye = DMatrix::<T>::identity(n, n);
    let lhs = eye.kronecker(a) + a.kronecker(&eye);
    solve_vectorized(lhs, q, n, true)
}

#[cfg(test)]
mod tests {
    use nalgebra::dmatrix;

    use super::*;

    fn residual_discrete(a: &DMatrix<f64>, x: &DMatrix<f64>, q: &DMatrix<f64>) -> f64 {
        (a * x * a.transpose() - x + q).amax()
    }

    #[test]
    fn scalar_discrete() {
        let x: DMatrix<f64> = discrete_lyapunov(&dmatrix![0.5], &dmatrix![1.0]).unwrap();
        assert!((x[(0, 0)] - 4.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn scalar_continuous() {
        let x: DMatrix<f64> = continuous_lyapunov(&dmatrix![-2.0], &dmatrix![1.0]).unwrap();
        assert!((x[(0, 0)] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn discrete_residual_is_small() {
        let a = dmatrix![0.5, 0.2, 0.0; -0.1, 0.3, 0.4; 0.0, 0.1, -0.6];
        let q = dmatrix![2.0, 0.5, 0.0; 0.5, 1.0, 0.1; 0.0, 0.1, 0.5];
        let x = discrete_lyapunov(&a, &q).unwrap();
        assert!(residual_discrete(&a, &x, &q) < 1e-12);
        assert_eq!(x, x.transpose());
    }

    #[test]
    fn continuous_residual_is_small() {
        let a = dmatrix![-1.0, 2.0; 0.0, -3.0];
        let q = dmatrix![1.0, 0.0; 0.0, 2.0];
        let x = continuous_lyapunov(&a, &q).unwrap();
        let residual = (&a * &x + &x * a.transpose() + &q).amax();
        assert!(residual < 1e-12);
    }

    #[test]
    fn singular_equation() {
        // Eigenvalue on the unit circle: I - A⊗A is singular
        let result = discrete_lyapunov(&dmatrix![1.0], &dmatrix![1.0]);
        assert_eq!(Err(FilterError::Singular("Lyapunov equation")), result);
    }

    #[test]
    fn rejects_non_square() {
        let result = discrete_lyapunov(&DMatrix::<f64>::zeros(2, 3), &DMatrix::zeros(2, 2));
        assert!(matches!(result, Err(FilterError::Dimension { .. })));
    }
}
