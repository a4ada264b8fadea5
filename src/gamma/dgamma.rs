//! Striped directional derivatives of the Gamma matrix
//!
//! Because a stripe's Gamma is block diagonal, both derivative operations
//! decompose over stripe blocks: the gradient bilinear form is a sum of
//! per-block forms, and the directional derivative maps each block's residual
//! chunk to the matching output chunk with no cross-block coupling.

use crate::gamma::{DGamma, GammaError};
use crate::structure::{StripedStructure, Structure};
use nalgebra::{DMatrix, DVector};

/// Block-diagonal directional-derivative engine for striped structures
pub struct StripedDGamma {
    operators: Vec<Box<dyn DGamma>>,
    /// Chunk length `n_k * d` per stripe block
    chunk_sizes: Vec<usize>,
    /// Scratch for per-block gradient contributions, shaped like R
    scratch: DMatrix<f64>,
}

impl StripedDGamma {
    /// Create the composite engine by delegating to each stripe block
    pub fn new(structure: &StripedStructure, d: usize) -> Self {
        let operators = structure
            .blocks()
            .iter()
            .map(|b| b.create_dgamma(d))
            .collect();
        let chunk_sizes = structure
            .blocks()
            .iter()
            .map(|b| b.sample_count() * d)
            .collect();
        Self {
            operators,
            chunk_sizes,
            scratch: DMatrix::zeros(structure.block_width(), d),
        }
    }

    fn check_len(&self, v: &DVector<f64>) -> Result<(), GammaError> {
        let expected = self.chunk_sizes.iter().sum();
        if v.len() != expected {
            return Err(GammaError::VectorLength {
                expected,
                found: v.len(),
            }
            .log());
        }
        Ok(())
    }
}

impl DGamma for StripedDGamma {
    fn bilinear_form(
        &mut self,
        grad: &mut DMatrix<f64>,
        r: &DMatrix<f64>,
        yr: &DVector<f64>,
    ) -> Result<(), GammaError> {
        self.check_len(yr)?;
        let Self {
            operators,
            chunk_sizes,
            scratch,
        } = self;

        grad.fill(0.0);
        let mut off = 0;
        for (op, &len) in operators.iter_mut().zip(chunk_sizes.iter()) {
            let yr_sub = yr.rows(off, len).into_owned();
            scratch.fill(0.0);
            op.bilinear_form(scratch, r, &yr_sub)?;
            *grad += &*scratch;
            off += len;
        }
        Ok(())
    }

    fn directional_derivative(
        &mut self,
        res: &mut DVector<f64>,
        r: &DMatrix<f64>,
        i: usize,
        j: usize,
        yr: &DVector<f64>,
    ) -> Result<(), GammaError> {
        self.check_len(yr)?;
        self.check_len(res)?;
        debug_assert!(i < r.nrows() && j < r.ncols());
        let mut off = 0;
        for (op, &len) in self.operators.iter_mut().zip(self.chunk_sizes.iter()) {
            let yr_sub = yr.rows(off, len).into_owned();
            let mut res_sub = DVector::zeros(len);
            op.directional_derivative(&mut res_sub, r, i, j, &yr_sub)?;
            res.rows_mut(off, len).copy_from(&res_sub);
            off += len;
        }
        Ok(())
    }
}
