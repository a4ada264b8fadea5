//! Vertically striped composite structure
//!
//! A [`StripedStructure`] stacks a sequence of child structures on top of each
//! other. All children must agree on the matrix width `m`; rows, parameters
//! and residuals are partitioned into consecutive per-block ranges. The Gamma
//! matrix of a stripe is block diagonal, which the composite engines in
//! [`crate::gamma`] exploit.

use crate::gamma::{CholeskyFactor, DGamma, StripedCholesky, StripedDGamma};
use crate::structure::{Structure, StructureError};
use nalgebra::{DMatrix, DVector};

/// Composite structure made of vertically stacked blocks
pub struct StripedStructure {
    blocks: Vec<Box<dyn Structure>>,
    /// Cached total row count over all blocks
    total_rows: usize,
    /// Cached total parameter count over all blocks
    total_params: usize,
    /// Common width of all blocks
    width: usize,
    /// Index of a block with the largest row count (first on ties)
    max_block: usize,
}

impl StripedStructure {
    /// Assemble a stripe from child structures
    ///
    /// # Errors
    /// Returns [`StructureError::EmptyStripe`] for an empty block list and
    /// [`StructureError::BlockWidthMismatch`] if any block disagrees on width.
    pub fn new(blocks: Vec<Box<dyn Structure>>) -> Result<Self, StructureError> {
        let width = blocks
            .first()
            .ok_or(StructureError::EmptyStripe)?
            .block_width();

        for (block, b) in blocks.iter().enumerate() {
            if b.block_width() != width {
                return Err(StructureError::BlockWidthMismatch {
                    block,
                    expected: width,
                    found: b.block_width(),
                });
            }
        }

        let total_rows = blocks.iter().map(|b| b.sample_count()).sum();
        let total_params = blocks.iter().map(|b| b.param_count()).sum();

        let mut max_block = 0;
        for (k, b) in blocks.iter().enumerate() {
            if b.sample_count() > blocks[max_block].sample_count() {
                max_block = k;
            }
        }

        Ok(Self {
            blocks,
            total_rows,
            total_params,
            width,
            max_block,
        })
    }

    /// Number of child blocks
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Child blocks in stacking order
    pub fn blocks(&self) -> &[Box<dyn Structure>] {
        &self.blocks
    }

    /// Index of a block with the maximal row count (ties resolve to the first)
    pub fn max_block_index(&self) -> usize {
        self.max_block
    }

    /// Row count of the largest block
    pub fn max_block_rows(&self) -> usize {
        self.blocks[self.max_block].sample_count()
    }
}

impl Structure for StripedStructure {
    fn sample_count(&self) -> usize {
        self.total_rows
    }

    fn param_count(&self) -> usize {
        self.total_params
    }

    fn block_width(&self) -> usize {
        self.width
    }

    fn fill_matrix(&self, p: &DVector<f64>) -> Result<DMatrix<f64>, StructureError> {
        if p.len() != self.total_params {
            return Err(StructureError::ParameterLength {
                expected: self.total_params,
                found: p.len(),
            });
        }

        let mut c = DMatrix::zeros(self.total_rows, self.width);
        let mut row = 0;
        let mut off = 0;
        for b in &self.blocks {
            let p_sub = p.rows(off, b.param_count()).into_owned();
            let block = b.fill_matrix(&p_sub)?;
            c.view_mut((row, 0), (b.sample_count(), self.width))
                .copy_from(&block);
            row += b.sample_count();
            off += b.param_count();
        }
        Ok(c)
    }

    fn correct_parameters(
        &self,
        p: &mut DVector<f64>,
        r: &DMatrix<f64>,
        yr: &DVector<f64>,
        scaled: bool,
    ) {
        let d = r.ncols();
        let mut row = 0;
        let mut off = 0;
        for b in &self.blocks {
            let mut p_sub = p.rows(off, b.param_count()).into_owned();
            let yr_sub = yr.rows(row * d, b.sample_count() * d).into_owned();
            b.correct_parameters(&mut p_sub, r, &yr_sub, scaled);
            p.rows_mut(off, b.param_count()).copy_from(&p_sub);
            row += b.sample_count();
            off += b.param_count();
        }
    }

    fn create_cholesky(&self, d: usize, reg_gamma: f64) -> Box<dyn CholeskyFactor> {
        Box::new(StripedCholesky::new(self, d, reg_gamma))
    }

    fn create_dgamma(&self, d: usize) -> Box<dyn DGamma> {
        Box::new(StripedDGamma::new(self, d))
    }
}
