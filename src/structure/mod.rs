//! Structure specifications for structured low-rank approximation
//!
//! A [`Structure`] describes how a parameter vector `p` maps to a structured
//! data matrix (Hankel, Toeplitz, banded, ...) and owns the construction of the
//! Gamma-matrix machinery that goes with it: a Cholesky factorization engine and
//! a directional-derivative engine, both specialized to a fixed rank reduction.
//!
//! The composite [`StripedStructure`] stacks several structures vertically and
//! is the main entry point for mosaic and block-wise problems.

pub mod striped;

use crate::gamma::{CholeskyFactor, DGamma};
use nalgebra::{DMatrix, DVector};
use thiserror::Error;

pub use striped::StripedStructure;

/// Structure specification errors
#[derive(Debug, Clone, Error)]
pub enum StructureError {
    /// A striped structure was assembled from an empty block list
    #[error("Striped structure requires at least one block (empty stripe)")]
    EmptyStripe,

    /// A stripe block disagrees with the stripe on the data matrix width
    #[error("Stripe block {block} has width {found}, expected {expected}")]
    BlockWidthMismatch {
        block: usize,
        expected: usize,
        found: usize,
    },

    /// Parameter vector length does not match the structure's parameter count
    #[error("Parameter vector has length {found}, structure expects {expected}")]
    ParameterLength { expected: usize, found: usize },
}

/// A structure specification: the map from parameters to a structured matrix
///
/// Implementations describe an `n x m` structured matrix built from `np`
/// parameters, and act as factories for the Gamma-matrix engines tied to the
/// structure. `d` below is the column dimension of the rank-reducing matrix
/// `R` (size `m x d`), fixed when the engines are created.
pub trait Structure {
    /// Number of rows `n` of the structured data matrix
    fn sample_count(&self) -> usize;

    /// Number of parameters `np` describing the matrix
    fn param_count(&self) -> usize;

    /// Number of columns `m` of the structured data matrix
    fn block_width(&self) -> usize;

    /// Build the structured `n x m` matrix from the parameter vector `p`
    ///
    /// # Errors
    /// Returns [`StructureError::ParameterLength`] if `p` has the wrong length.
    fn fill_matrix(&self, p: &DVector<f64>) -> Result<DMatrix<f64>, StructureError>;

    /// Apply the structured correction step to the parameter vector
    ///
    /// Given the rank-reducing matrix `r` (`m x d`) and the whitened residual
    /// `yr` (length `n * d`, row-major by sample), subtract the structured
    /// correction from `p` in place. When `scaled` is true the correction is
    /// weighted for parameters shared between matrix entries.
    fn correct_parameters(
        &self,
        p: &mut DVector<f64>,
        r: &DMatrix<f64>,
        yr: &DVector<f64>,
        scaled: bool,
    );

    /// Create a Cholesky factorization engine for this structure's Gamma matrix
    ///
    /// `d` is the rank-reduction dimension; `reg_gamma` is an optional diagonal
    /// regularization added to Gamma before factorization (0.0 disables it).
    fn create_cholesky(&self, d: usize, reg_gamma: f64) -> Box<dyn CholeskyFactor>;

    /// Create a directional-derivative engine for this structure's Gamma matrix
    fn create_dgamma(&self, d: usize) -> Box<dyn DGamma>;
}
