//! Gamma matrix engines: Cholesky factorization and directional derivatives
//!
//! For a structure with `n` samples and rank-reduction dimension `d`, the
//! Gamma matrix is the `(n*d) x (n*d)` weight matrix of the inner least-norm
//! problem, parameterized by the rank-reducing matrix `R`. A stripe's Gamma is
//! block diagonal over the stripe blocks, which the composite engines here
//! ([`StripedCholesky`], [`StripedDGamma`]) exploit: per-block factorization
//! runs in parallel via `rayon`, and every solve partitions the vector into
//! independent per-block sub-solves.

pub mod cholesky;
pub mod dgamma;

use nalgebra::{DMatrix, DVector};
use thiserror::Error;
use tracing::error;

pub use cholesky::StripedCholesky;
pub use dgamma::StripedDGamma;

/// Gamma factorization and derivative errors
#[derive(Debug, Clone, Error)]
pub enum GammaError {
    /// Gamma(R) is not positive definite for the given R
    #[error("Gamma matrix is not positive definite")]
    NotPositiveDefinite,

    /// One block of a striped Gamma could not be factorized
    #[error("Gamma factorization failed in stripe block {block}")]
    SingularGamma {
        block: usize,
        #[source]
        source: Box<GammaError>,
    },

    /// A solve was attempted before a successful factorization
    #[error("Gamma solve requested before factorization")]
    NotFactorized,

    /// Vector length does not match the factorization dimension
    #[error("Vector has length {found}, Gamma factorization expects {expected}")]
    VectorLength { expected: usize, found: usize },
}

impl GammaError {
    /// Log the error with tracing::error and return self for chaining
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }
}

/// Cholesky factorization engine for a Gamma matrix
///
/// The engine is created for a fixed structure and rank-reduction dimension
/// `d`; [`factorize`](CholeskyFactor::factorize) recomputes the factorization
/// for a new `R`, and the solve methods apply the current factors to vectors
/// of length `n * d`.
pub trait CholeskyFactor: Send {
    /// Recompute the Cholesky factorization of Gamma(R)
    ///
    /// # Errors
    /// Returns [`GammaError::NotPositiveDefinite`] (or
    /// [`GammaError::SingularGamma`] for stripes) when Gamma(R) has no
    /// Cholesky factorization.
    fn factorize(&mut self, r: &DMatrix<f64>) -> Result<(), GammaError>;

    /// Solve with the Cholesky factor: `L z = yr` or, when `transpose` is
    /// set, `L^T z = yr`. The solution overwrites `yr`.
    fn solve_factor(&self, yr: &mut DVector<f64>, transpose: bool) -> Result<(), GammaError>;

    /// Solve with the full Gamma matrix: `Gamma z = yr`, overwriting `yr`
    fn solve_gamma(&self, yr: &mut DVector<f64>) -> Result<(), GammaError>;
}

/// Directional-derivative engine for a Gamma matrix
///
/// Both operations consume the whitened residual `yr` of length `n * d`.
/// Engines may keep internal scratch storage, hence `&mut self`.
pub trait DGamma: Send {
    /// Accumulate the gradient bilinear form `yr^T (dGamma/dR) yr` into `grad`
    ///
    /// `grad` has the shape of `R` (`m x d`); entry `(i, j)` receives the form
    /// evaluated at the derivative of Gamma with respect to `R[i, j]`. The
    /// previous contents of `grad` are discarded.
    ///
    /// # Errors
    /// Returns [`GammaError::VectorLength`] when `yr` does not have the
    /// engine's `n * d` length.
    fn bilinear_form(
        &mut self,
        grad: &mut DMatrix<f64>,
        r: &DMatrix<f64>,
        yr: &DVector<f64>,
    ) -> Result<(), GammaError>;

    /// Evaluate the directional derivative `(dGamma/dR[i, j]) yr` into `res`
    ///
    /// `res` has the length of `yr`; the previous contents are discarded.
    ///
    /// # Errors
    /// Returns [`GammaError::VectorLength`] when `res` or `yr` does not have
    /// the engine's `n * d` length.
    fn directional_derivative(
        &mut self,
        res: &mut DVector<f64>,
        r: &DMatrix<f64>,
        i: usize,
        j: usize,
        yr: &DVector<f64>,
    ) -> Result<(), GammaError>;
}
