//! Dense linear algebra for the optimization driver
//!
//! The normal-equation solver factors the damped Gauss-Newton system with
//! faer's dense Cholesky and caches the assembled Hessian and gradient for
//! the step-quality computation. The covariance helper inverts `J^T J`
//! through an SVD with a relative singular-value cutoff.

use faer::linalg::solvers::{Llt, Solve};
use faer::{Mat, Side};
use nalgebra::{DMatrix, DVector};
use thiserror::Error;
use tracing::error;

/// Smallest damping diagonal entry used with Marquardt scaling
const MIN_DIAGONAL: f64 = 1e-6;
/// Largest damping diagonal entry used with Marquardt scaling
const MAX_DIAGONAL: f64 = 1e32;

/// Linear algebra specific error types for slra-solver
#[derive(Debug, Clone, Error)]
pub enum LinAlgError {
    /// Matrix factorization failed (Cholesky, SVD, etc.)
    #[error("Matrix factorization failed: {0}")]
    FactorizationFailed(String),

    /// Singular or near-singular matrix detected
    #[error("Singular matrix detected (matrix is not invertible)")]
    SingularMatrix,

    /// SVD did not produce the requested factors
    #[error("SVD computation failed")]
    SvdFailed,
}

impl LinAlgError {
    /// Log the error with tracing::error and return self for chaining
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error together with the original third-party source error
    ///
    /// Used at faer call sites so the library error (e.g. `LltError`) is kept
    /// in the log even though our own error type does not wrap it.
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for linear algebra operations
pub type LinAlgResult<T> = Result<T, LinAlgError>;

/// Solution of one damped normal-equation solve
#[derive(Debug)]
pub struct DampedSolve {
    /// The step `dx` solving `(J^T J + lambda * D) dx = -J^T f`
    pub step: DVector<f64>,
    /// Diagonal `D` of the damping term (all ones without Marquardt scaling)
    pub damping_diag: DVector<f64>,
}

/// Dense Cholesky solver for the damped normal equations
///
/// Caches the Hessian `J^T J` and gradient `J^T f` assembled during the last
/// solve so callers can reuse them for step-quality and convergence checks.
#[derive(Default)]
pub struct NormalEquationSolver {
    hessian: Option<DMatrix<f64>>,
    gradient: Option<DVector<f64>>,
}

impl NormalEquationSolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Solve `(J^T J + lambda * D) dx = -J^T f`
    ///
    /// With `marquardt_scaling` the damping diagonal `D` is the clamped
    /// diagonal of `J^T J`; otherwise `D` is the identity.
    ///
    /// # Errors
    /// Returns [`LinAlgError::SingularMatrix`] when the damped Hessian has no
    /// Cholesky factorization, or when the solve yields non-finite step
    /// components. An exactly singular matrix can still factor with a zero
    /// pivot, so the factorization alone does not catch every degenerate
    /// system.
    pub fn solve_damped(
        &mut self,
        jacobian: &DMatrix<f64>,
        residuals: &DVector<f64>,
        lambda: f64,
        marquardt_scaling: bool,
    ) -> LinAlgResult<DampedSolve> {
        let hessian = jacobian.transpose() * jacobian;
        let gradient = jacobian.transpose() * residuals;
        let n = hessian.nrows();

        let damping_diag = if marquardt_scaling {
            DVector::from_fn(n, |i, _| hessian[(i, i)].clamp(MIN_DIAGONAL, MAX_DIAGONAL))
        } else {
            DVector::repeat(n, 1.0)
        };

        let augmented = Mat::from_fn(n, n, |i, j| {
            let h = hessian[(i, j)];
            if i == j {
                h + lambda * damping_diag[i]
            } else {
                h
            }
        });
        let rhs = Mat::from_fn(n, 1, |i, _| -gradient[i]);

        let llt = Llt::new(augmented.as_ref(), Side::Lower)
            .map_err(|e| LinAlgError::SingularMatrix.log_with_source(e))?;
        let solution = llt.solve(&rhs);
        let step = DVector::from_fn(n, |i, _| solution[(i, 0)]);
        if step.iter().any(|v| !v.is_finite()) {
            return Err(LinAlgError::SingularMatrix.log());
        }

        self.hessian = Some(hessian);
        self.gradient = Some(gradient);

        Ok(DampedSolve { step, damping_diag })
    }

    /// Cached Hessian `J^T J` from the last solve
    pub fn hessian(&self) -> Option<&DMatrix<f64>> {
        self.hessian.as_ref()
    }

    /// Cached gradient `J^T f` from the last solve
    pub fn gradient(&self) -> Option<&DVector<f64>> {
        self.gradient.as_ref()
    }
}

/// Covariance of the least-squares solution, `(J^T J)^{-1}`
///
/// Computed from the SVD of `J`; singular values at or below
/// `eps_rel * s_max` are treated as zero and their directions excluded, so
/// rank-deficient Jacobians yield the pseudo-inverse covariance.
pub fn covariance_from_jacobian(
    jacobian: &DMatrix<f64>,
    eps_rel: f64,
) -> LinAlgResult<DMatrix<f64>> {
    let svd = jacobian.clone().svd(false, true);
    let v_t = svd.v_t.ok_or(LinAlgError::SvdFailed)?;
    let singular_values = &svd.singular_values;

    let s_max = singular_values.iter().cloned().fold(0.0_f64, f64::max);
    let cutoff = eps_rel.max(f64::EPSILON) * s_max;

    let n = v_t.ncols();
    let mut covariance = DMatrix::zeros(n, n);
    for k in 0..singular_values.len() {
        let s = singular_values[k];
        if s > cutoff {
            let v_k = v_t.row(k).transpose();
            covariance += &v_k * v_k.transpose() / (s * s);
        }
    }
    Ok(covariance)
}
