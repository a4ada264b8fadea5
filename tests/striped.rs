//! Integration tests for the striped structure engine and its use through
//! the optimization driver.
//!
//! The fixture is a weighted row-block structure: each of `rows` samples
//! contributes `width` parameters stored row-major, the data matrix is the
//! parameter matrix scaled by `weight`, and the per-sample Gamma block is
//! `weight² R^T R + reg I`. Every Gamma property is row-local, so stripe
//! separability can be checked exactly.

use nalgebra::{dmatrix, DMatrix, DVector};
use slra_solver::{
    optimize, CholeskyFactor, CostFunction, DGamma, GammaError, Method, OptimizeOptions,
    StripedStructure, Structure, StructureError,
};

struct RowBlockStructure {
    rows: usize,
    width: usize,
    weight: f64,
}

impl Structure for RowBlockStructure {
    fn sample_count(&self) -> usize {
        self.rows
    }

    fn param_count(&self) -> usize {
        self.rows * self.width
    }

    fn block_width(&self) -> usize {
        self.width
    }

    fn fill_matrix(&self, p: &DVector<f64>) -> Result<DMatrix<f64>, StructureError> {
        if p.len() != self.param_count() {
            return Err(StructureError::ParameterLength {
                expected: self.param_count(),
                found: p.len(),
            });
        }
        Ok(DMatrix::from_fn(self.rows, self.width, |i, j| {
            self.weight * p[i * self.width + j]
        }))
    }

    fn correct_parameters(
        &self,
        p: &mut DVector<f64>,
        r: &DMatrix<f64>,
        yr: &DVector<f64>,
        scaled: bool,
    ) {
        let d = r.ncols();
        let factor = if scaled { 0.5 } else { 1.0 };
        for i in 0..self.rows {
            let y_i = yr.rows(i * d, d).into_owned();
            let delta = r * &y_i;
            for j in 0..self.width {
                p[i * self.width + j] -= factor * self.weight * delta[j];
            }
        }
    }

    fn create_cholesky(&self, d: usize, reg_gamma: f64) -> Box<dyn CholeskyFactor> {
        Box::new(RowBlockCholesky {
            rows: self.rows,
            weight: self.weight,
            reg_gamma,
            d,
            factor: None,
        })
    }

    fn create_dgamma(&self, d: usize) -> Box<dyn DGamma> {
        Box::new(RowBlockDGamma {
            rows: self.rows,
            weight: self.weight,
            d,
        })
    }
}

/// Per-row Gamma block `weight² R^T R + reg I`, identical for every row.
struct RowBlockCholesky {
    rows: usize,
    weight: f64,
    reg_gamma: f64,
    d: usize,
    factor: Option<nalgebra::Cholesky<f64, nalgebra::Dyn>>,
}

impl RowBlockCholesky {
    fn block_gamma(&self, r: &DMatrix<f64>) -> DMatrix<f64> {
        self.weight * self.weight * (r.transpose() * r)
            + DMatrix::identity(self.d, self.d) * self.reg_gamma
    }
}

impl CholeskyFactor for RowBlockCholesky {
    fn factorize(&mut self, r: &DMatrix<f64>) -> Result<(), GammaError> {
        let gamma = self.block_gamma(r);
        self.factor = Some(nalgebra::Cholesky::new(gamma).ok_or(GammaError::NotPositiveDefinite)?);
        Ok(())
    }

    fn solve_factor(&self, yr: &mut DVector<f64>, transpose: bool) -> Result<(), GammaError> {
        let factor = self.factor.as_ref().ok_or(GammaError::NotFactorized)?;
        let l = factor.l();
        for i in 0..self.rows {
            let chunk = yr.rows(i * self.d, self.d).into_owned();
            let solved = if transpose {
                l.transpose()
                    .solve_upper_triangular(&chunk)
                    .ok_or(GammaError::NotPositiveDefinite)?
            } else {
                l.solve_lower_triangular(&chunk)
                    .ok_or(GammaError::NotPositiveDefinite)?
            };
            yr.rows_mut(i * self.d, self.d).copy_from(&solved);
        }
        Ok(())
    }

    fn solve_gamma(&self, yr: &mut DVector<f64>) -> Result<(), GammaError> {
        let factor = self.factor.as_ref().ok_or(GammaError::NotFactorized)?;
        for i in 0..self.rows {
            let chunk = yr.rows(i * self.d, self.d).into_owned();
            let solved = factor.solve(&chunk);
            yr.rows_mut(i * self.d, self.d).copy_from(&solved);
        }
        Ok(())
    }
}

/// Exact derivatives of the per-row Gamma block with respect to R.
struct RowBlockDGamma {
    rows: usize,
    weight: f64,
    d: usize,
}

impl DGamma for RowBlockDGamma {
    fn bilinear_form(
        &mut self,
        grad: &mut DMatrix<f64>,
        r: &DMatrix<f64>,
        yr: &DVector<f64>,
    ) -> Result<(), GammaError> {
        let w2 = self.weight * self.weight;
        grad.fill(0.0);
        for i in 0..self.rows {
            let y_i = yr.rows(i * self.d, self.d).into_owned();
            let ry = r * &y_i;
            *grad += 2.0 * w2 * &ry * y_i.transpose();
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
        let w2 = self.weight * self.weight;
        for t in 0..self.rows {
            let y_t = yr.rows(t * self.d, self.d).into_owned();
            let ry = r * &y_t;
            for a in 0..self.d {
                let mut value = w2 * r[(i, a)] * y_t[j];
                if a == j {
                    value += w2 * ry[i];
                }
                res[t * self.d + a] = value;
            }
        }
        Ok(())
    }
}

fn elementary(rows: usize, width: usize, weight: f64) -> RowBlockStructure {
    RowBlockStructure {
        rows,
        width,
        weight,
    }
}

fn stripe(specs: &[(usize, f64)], width: usize) -> StripedStructure {
    let blocks: Vec<Box<dyn Structure>> = specs
        .iter()
        .map(|&(rows, weight)| Box::new(elementary(rows, width, weight)) as Box<dyn Structure>)
        .collect();
    StripedStructure::new(blocks).unwrap()
}

fn test_vector(len: usize) -> DVector<f64> {
    DVector::from_fn(len, |i, _| ((i * 7 + 3) % 11) as f64 / 4.0 - 1.0)
}

#[test]
fn single_block_composite_matches_elementary() {
    let r = dmatrix![0.8; -0.6]; // width 2, d 1
    let d = 1;
    let composite = stripe(&[(4, 1.5)], 2);
    let plain = elementary(4, 2, 1.5);

    // fill_matrix
    let p = test_vector(8);
    assert_eq!(
        composite.fill_matrix(&p).unwrap(),
        plain.fill_matrix(&p).unwrap()
    );

    // correct_parameters
    let yr = test_vector(4);
    let mut p_composite = p.clone();
    let mut p_plain = p.clone();
    composite.correct_parameters(&mut p_composite, &r, &yr, true);
    plain.correct_parameters(&mut p_plain, &r, &yr, true);
    assert!((p_composite - p_plain).norm() < 1e-14);

    // cholesky solves
    let mut c_composite = composite.create_cholesky(d, 1e-3);
    let mut c_plain = plain.create_cholesky(d, 1e-3);
    c_composite.factorize(&r).unwrap();
    c_plain.factorize(&r).unwrap();
    for transpose in [false, true] {
        let mut a = test_vector(4);
        let mut b = a.clone();
        c_composite.solve_factor(&mut a, transpose).unwrap();
        c_plain.solve_factor(&mut b, transpose).unwrap();
        assert!((a - b).norm() < 1e-14);
    }
    let mut a = test_vector(4);
    let mut b = a.clone();
    c_composite.solve_gamma(&mut a).unwrap();
    c_plain.solve_gamma(&mut b).unwrap();
    assert!((a - b).norm() < 1e-14);

    // derivatives
    let mut dg_composite = composite.create_dgamma(d);
    let mut dg_plain = plain.create_dgamma(d);
    let mut grad_a = DMatrix::zeros(2, 1);
    let mut grad_b = DMatrix::zeros(2, 1);
    dg_composite.bilinear_form(&mut grad_a, &r, &yr).unwrap();
    dg_plain.bilinear_form(&mut grad_b, &r, &yr).unwrap();
    assert!((grad_a - grad_b).norm() < 1e-14);

    let mut res_a = DVector::zeros(4);
    let mut res_b = DVector::zeros(4);
    dg_composite
        .directional_derivative(&mut res_a, &r, 1, 0, &yr)
        .unwrap();
    dg_plain
        .directional_derivative(&mut res_b, &r, 1, 0, &yr)
        .unwrap();
    assert!((res_a - res_b).norm() < 1e-14);
}

#[test]
fn two_identical_blocks_solve_blockwise() {
    let r = dmatrix![1.0; 0.5];
    let composite = stripe(&[(3, 2.0), (3, 2.0)], 2);
    let plain = elementary(3, 2, 2.0);

    let mut c_composite = composite.create_cholesky(1, 0.1);
    let mut c_plain = plain.create_cholesky(1, 0.1);
    c_composite.factorize(&r).unwrap();
    c_plain.factorize(&r).unwrap();

    let v = test_vector(6);
    let mut full = v.clone();
    c_composite.solve_gamma(&mut full).unwrap();

    let mut first = v.rows(0, 3).into_owned();
    let mut second = v.rows(3, 3).into_owned();
    c_plain.solve_gamma(&mut first).unwrap();
    c_plain.solve_gamma(&mut second).unwrap();

    assert!((full.rows(0, 3).into_owned() - first).norm() < 1e-12);
    assert!((full.rows(3, 3).into_owned() - second).norm() < 1e-12);
}

#[test]
fn heterogeneous_stripe_solves_separably() {
    let r = dmatrix![0.3; 1.2];
    let composite = stripe(&[(2, 1.0), (4, 3.0)], 2);

    let mut cholesky = composite.create_cholesky(1, 0.05);
    cholesky.factorize(&r).unwrap();

    let v = test_vector(6);
    let mut full = v.clone();
    cholesky.solve_gamma(&mut full).unwrap();

    for ((rows, weight), offset, len) in [((2usize, 1.0), 0usize, 2usize), ((4, 3.0), 2, 4)] {
        let block = elementary(rows, 2, weight);
        let mut engine = block.create_cholesky(1, 0.05);
        engine.factorize(&r).unwrap();
        let mut chunk = v.rows(offset, len).into_owned();
        engine.solve_gamma(&mut chunk).unwrap();
        assert!((full.rows(offset, len).into_owned() - chunk).norm() < 1e-12);
    }
}

#[test]
fn bilinear_form_adds_over_blocks() {
    let r = dmatrix![0.7; -0.2];
    let composite = stripe(&[(2, 1.0), (3, 2.5)], 2);

    let yr = test_vector(5);
    let mut dgamma = composite.create_dgamma(1);
    let mut grad = DMatrix::zeros(2, 1);
    dgamma.bilinear_form(&mut grad, &r, &yr).unwrap();

    let mut expected = DMatrix::zeros(2, 1);
    for ((rows, weight), offset, len) in [((2usize, 1.0), 0usize, 2usize), ((3, 2.5), 2, 3)] {
        let block = elementary(rows, 2, weight);
        let mut engine = block.create_dgamma(1);
        let mut partial = DMatrix::zeros(2, 1);
        engine
            .bilinear_form(&mut partial, &r, &yr.rows(offset, len).into_owned())
            .unwrap();
        expected += partial;
    }
    assert!((grad - expected).norm() < 1e-12);
}

#[test]
fn directional_derivative_matches_finite_difference() {
    // d = 2 so both indices of R are exercised.
    let r = dmatrix![0.9, 0.1; -0.4, 1.1];
    let composite = stripe(&[(2, 1.0), (1, 2.0)], 2);
    let d = 2;
    let yr = test_vector(6);

    let apply_gamma = |r: &DMatrix<f64>| -> DVector<f64> {
        // Gamma is block diagonal with per-row blocks weight² R^T R.
        let mut out = DVector::zeros(6);
        let weights = [1.0, 1.0, 2.0];
        for t in 0..3 {
            let gamma = weights[t] * weights[t] * (r.transpose() * r);
            let y_t = yr.rows(t * d, d).into_owned();
            out.rows_mut(t * d, d).copy_from(&(&gamma * y_t));
        }
        out
    };

    let mut dgamma = composite.create_dgamma(d);
    let h = 1e-6;
    for i in 0..2 {
        for j in 0..2 {
            let mut res = DVector::zeros(6);
            dgamma.directional_derivative(&mut res, &r, i, j, &yr).unwrap();

            let mut r_plus = r.clone();
            let mut r_minus = r.clone();
            r_plus[(i, j)] += h;
            r_minus[(i, j)] -= h;
            let fd = (apply_gamma(&r_plus) - apply_gamma(&r_minus)) / (2.0 * h);
            assert!(
                (res - fd).norm() < 1e-6,
                "mismatch at R[{}, {}]",
                i,
                j
            );
        }
    }
}

#[test]
fn factorization_failure_names_the_block() {
    // Zero weight and zero regularization make a semi-definite Gamma block.
    let r = dmatrix![1.0; 0.0];
    let composite = stripe(&[(2, 1.0), (2, 0.0)], 2);
    let mut cholesky = composite.create_cholesky(1, 0.0);
    match cholesky.factorize(&r) {
        Err(GammaError::SingularGamma { block, .. }) => assert_eq!(block, 1),
        other => panic!("expected singular gamma, got {:?}", other.err()),
    }
}

/// Whitened distance to a target, with the whitening factor taken from a
/// striped Gamma factorization at a fixed R.
struct WhitenedCost {
    cholesky: Box<dyn CholeskyFactor>,
    width: usize,
    target: DVector<f64>,
}

impl WhitenedCost {
    fn new(structure: &StripedStructure, r: &DMatrix<f64>, target: DVector<f64>) -> Self {
        let mut cholesky = structure.create_cholesky(r.ncols(), 0.2);
        cholesky
            .factorize(r)
            .expect("fixture Gamma must be positive definite");
        Self {
            cholesky,
            width: structure.block_width(),
            target,
        }
    }
}

impl CostFunction for WhitenedCost {
    fn residual_count(&self) -> usize {
        self.target.len()
    }
    fn sample_count(&self) -> usize {
        self.target.len()
    }
    fn block_width(&self) -> usize {
        self.width
    }
    fn sample_dimension(&self) -> usize {
        1
    }
    fn residuals(&mut self, x: &DVector<f64>, f: &mut DVector<f64>) {
        f.copy_from(&(x - &self.target));
        self.cholesky
            .solve_factor(f, false)
            .expect("factorized in the constructor");
    }
    fn jacobian(&mut self, _x: &DVector<f64>, jac: &mut DMatrix<f64>) {
        let n = self.target.len();
        for k in 0..n {
            let mut e_k = DVector::zeros(n);
            e_k[k] = 1.0;
            self.cholesky
                .solve_factor(&mut e_k, false)
                .expect("factorized in the constructor");
            jac.set_column(k, &e_k);
        }
    }
    fn gradient(&mut self, x: &DVector<f64>, g: &mut DVector<f64>) {
        let n = self.target.len();
        let mut f = DVector::zeros(n);
        let mut jac = DMatrix::zeros(n, n);
        self.residuals(x, &mut f);
        self.jacobian(x, &mut jac);
        g.copy_from(&(2.0 * jac.transpose() * f));
    }
}

#[test]
fn driver_minimizes_whitened_cost_through_stripe() {
    let r = dmatrix![1.0; -0.5];
    let structure = stripe(&[(2, 1.0), (3, 2.0)], 2);
    let target = test_vector(5);

    for method in [Method::LevenbergMarquardt, Method::QuasiNewton] {
        let mut cost = WhitenedCost::new(&structure, &r, target.clone());
        let options = OptimizeOptions::default()
            .with_method(method)
            .with_step_size(0.5)
            .with_tolerances(0.0, 1e-10, 1e-6, 1e-6)
            .with_max_iterations(200);
        let mut x = DVector::zeros(5);
        let result = optimize(&mut cost, &options, &mut x, None).unwrap();
        assert!(result.converged(), "{:?}: {:?}", method, result.status);
        assert!(
            (x - &target).norm() < 1e-4,
            "{:?} did not reach the target",
            method
        );
        assert!(result.objective < 1e-8);
    }
}
