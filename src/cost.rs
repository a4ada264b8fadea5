//! Cost function contract consumed by the optimization driver
//!
//! A [`CostFunction`] wraps a structured low-rank problem behind the handful
//! of evaluations the solver families need: residuals and Jacobians for
//! Levenberg-Marquardt, scalar objective and gradient for the quasi-Newton
//! family, and the objective alone for Nelder-Mead. Implementations typically
//! hold a [`crate::structure::Structure`] with its Gamma engines and refresh
//! the Cholesky factorization as the iterate moves; evaluation methods take
//! `&mut self` for exactly that reason.

use nalgebra::{DMatrix, DVector};

/// Evaluation interface for a structured low-rank cost
///
/// The iterate `x` stores the rank-reducing matrix row-major, so its length is
/// [`sample_count`](CostFunction::sample_count) times
/// [`sample_dimension`](CostFunction::sample_dimension). Two residual systems
/// are exposed: the plain one and an optionally reweighted "corrected" one;
/// by default the corrected variants fall through to the plain ones.
pub trait CostFunction {
    /// Number of residuals of the plain system
    fn residual_count(&self) -> usize;

    /// Number of residuals of the corrected system
    fn corrected_residual_count(&self) -> usize {
        self.residual_count()
    }

    /// Row count of the iterate matrix
    fn sample_count(&self) -> usize;

    /// Column count of the underlying data matrix
    fn block_width(&self) -> usize;

    /// Column count of the iterate matrix
    fn sample_dimension(&self) -> usize;

    /// Length of the flattened iterate vector
    fn parameter_count(&self) -> usize {
        self.sample_count() * self.sample_dimension()
    }

    /// Evaluate the plain residual vector at `x` into `f`
    fn residuals(&mut self, x: &DVector<f64>, f: &mut DVector<f64>);

    /// Evaluate the plain Jacobian at `x` into `jac`
    fn jacobian(&mut self, x: &DVector<f64>, jac: &mut DMatrix<f64>);

    /// Evaluate residuals and Jacobian together
    ///
    /// Implementations sharing work between the two evaluations (such as a
    /// single Gamma factorization per iterate) should override this.
    fn residuals_and_jacobian(&mut self, x: &DVector<f64>, f: &mut DVector<f64>, jac: &mut DMatrix<f64>) {
        self.residuals(x, f);
        self.jacobian(x, jac);
    }

    /// Evaluate the corrected residual vector at `x` into `f`
    fn corrected_residuals(&mut self, x: &DVector<f64>, f: &mut DVector<f64>) {
        self.residuals(x, f);
    }

    /// Evaluate the corrected Jacobian at `x` into `jac`
    fn corrected_jacobian(&mut self, x: &DVector<f64>, jac: &mut DMatrix<f64>) {
        self.jacobian(x, jac);
    }

    /// Evaluate corrected residuals and Jacobian together
    fn corrected_residuals_and_jacobian(
        &mut self,
        x: &DVector<f64>,
        f: &mut DVector<f64>,
        jac: &mut DMatrix<f64>,
    ) {
        self.corrected_residuals(x, f);
        self.corrected_jacobian(x, jac);
    }

    /// Scalar objective at `x`
    ///
    /// Defaults to the squared norm of the plain residual vector, which is the
    /// identity tying the scalar and least-squares views of the problem.
    fn objective(&mut self, x: &DVector<f64>) -> f64 {
        let mut f = DVector::zeros(self.residual_count());
        self.residuals(x, &mut f);
        f.norm_squared()
    }

    /// Gradient of the objective at `x` into `g`
    fn gradient(&mut self, x: &DVector<f64>, g: &mut DVector<f64>);

    /// Evaluate objective and gradient together, returning the objective
    fn objective_and_gradient(&mut self, x: &DVector<f64>, g: &mut DVector<f64>) -> f64 {
        self.gradient(x, g);
        self.objective(x)
    }
}
