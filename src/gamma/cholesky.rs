//! Striped Cholesky factorization
//!
//! The Gamma matrix of a striped structure is block diagonal, one block per
//! stripe block. [`StripedCholesky`] owns one child [`CholeskyFactor`] per
//! block and partitions every vector into consecutive chunks of `n_k * d`
//! entries. Factorization of the blocks is independent and runs in parallel.

use crate::gamma::{CholeskyFactor, GammaError};
use crate::structure::{StripedStructure, Structure};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use tracing::debug;

/// Block-diagonal Cholesky engine for striped structures
pub struct StripedCholesky {
    factors: Vec<Box<dyn CholeskyFactor>>,
    /// Chunk length `n_k * d` per stripe block
    chunk_sizes: Vec<usize>,
}

impl StripedCholesky {
    /// Create the composite engine by delegating to each stripe block
    pub fn new(structure: &StripedStructure, d: usize, reg_gamma: f64) -> Self {
        let factors = structure
            .blocks()
            .iter()
            .map(|b| b.create_cholesky(d, reg_gamma))
            .collect();
        let chunk_sizes = structure
            .blocks()
            .iter()
            .map(|b| b.sample_count() * d)
            .collect();
        Self {
            factors,
            chunk_sizes,
        }
    }

    fn total_len(&self) -> usize {
        self.chunk_sizes.iter().sum()
    }

    fn check_len(&self, yr: &DVector<f64>) -> Result<(), GammaError> {
        let expected = self.total_len();
        if yr.len() != expected {
            return Err(GammaError::VectorLength {
                expected,
                found: yr.len(),
            }
            .log());
        }
        Ok(())
    }
}

impl CholeskyFactor for StripedCholesky {
    fn factorize(&mut self, r: &DMatrix<f64>) -> Result<(), GammaError> {
        self.factors
            .par_iter_mut()
            .enumerate()
            .try_for_each(|(block, factor)| {
                factor.factorize(r).map_err(|e| {
                    debug!("stripe block {} factorization failed: {}", block, e);
                    GammaError::SingularGamma {
                        block,
                        source: Box::new(e),
                    }
                })
            })
    }

    fn solve_factor(&self, yr: &mut DVector<f64>, transpose: bool) -> Result<(), GammaError> {
        self.check_len(yr)?;
        let mut off = 0;
        for (factor, &len) in self.factors.iter().zip(&self.chunk_sizes) {
            let mut chunk = yr.rows(off, len).into_owned();
            factor.solve_factor(&mut chunk, transpose)?;
            yr.rows_mut(off, len).copy_from(&chunk);
            off += len;
        }
        Ok(())
    }

    fn solve_gamma(&self, yr: &mut DVector<f64>) -> Result<(), GammaError> {
        self.check_len(yr)?;
        let mut off = 0;
        for (factor, &len) in self.factors.iter().zip(&self.chunk_sizes) {
            let mut chunk = yr.rows(off, len).into_owned();
            factor.solve_gamma(&mut chunk)?;
            yr.rows_mut(off, len).copy_from(&chunk);
            off += len;
        }
        Ok(())
    }
}
