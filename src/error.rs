//! Error types for the slra-solver library
//!
//! This module provides the main error and result types used throughout the library.
//! All errors use the `thiserror` crate for automatic trait implementations.
//!
//! # Error Hierarchy
//!
//! The library uses a hierarchical error system where:
//! - **`SlraError`** is the top-level error exposed to users via public APIs
//! - **Module errors** (`StructureError`, `GammaError`, etc.) are wrapped inside SlraError
//! - **Error sources** are preserved, allowing full error chain inspection
//!
//! Example error chain:
//! ```text
//! SlraError::Gamma(
//!     GammaError::SingularGamma {
//!         block: 2,
//!         source: NotPositiveDefinite,
//!     }
//! )
//! ```

use crate::{
    gamma::GammaError, linalg::LinAlgError, optimizer::OptimizerError, structure::StructureError,
};
use std::error::Error as StdError;
use thiserror::Error;

/// Main result type used throughout the slra-solver library
pub type SlraResult<T> = Result<T, SlraError>;

/// Main error type for the slra-solver library
///
/// This is the top-level error type exposed by public APIs. It wraps module-specific
/// errors while preserving the full error chain for debugging.
///
/// # Error Chain Access
///
/// You can access the full error chain using the `chain()` method:
///
/// ```rust,ignore
/// if let Err(e) = optimize(&mut cost, &options, &mut x, None) {
///     warn!("Error: {}", e);
///     warn!("Full chain: {}", e.chain());
/// }
/// ```
#[derive(Debug, Error)]
pub enum SlraError {
    /// Structure specification errors (stripe assembly, parameter vectors)
    #[error(transparent)]
    Structure(#[from] StructureError),

    /// Gamma matrix factorization and derivative errors
    #[error(transparent)]
    Gamma(#[from] GammaError),

    /// Linear algebra errors
    #[error(transparent)]
    LinearAlgebra(#[from] LinAlgError),

    /// Optimization driver and algorithm errors
    #[error(transparent)]
    Optimizer(#[from] OptimizerError),
}

// Module-specific errors are automatically converted via #[from] attributes above.

impl SlraError {
    /// Get the full error chain as a string for logging and debugging.
    ///
    /// This method traverses the error source chain and returns a formatted string
    /// showing the hierarchy of errors from the top-level SlraError down to the
    /// root cause.
    pub fn chain(&self) -> String {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();

        while let Some(err) = source {
            chain.push(format!("  → {}", err));
            source = err.source();
        }

        chain.join("\n")
    }

    /// Get a compact single-line error chain for logging
    ///
    /// Similar to `chain()` but formats as a single line with arrow separators.
    pub fn chain_compact(&self) -> String {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();

        while let Some(err) = source {
            chain.push(err.to_string());
            source = err.source();
        }

        chain.join(" → ")
    }
}
