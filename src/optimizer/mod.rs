//! Optimization driver for structured low-rank approximation.
//!
//! This module provides the top-level [`optimize`] entry point dispatching to
//! three solver families over a caller-supplied [`CostFunction`]:
//! - Levenberg-Marquardt (plain or Marquardt-scaled damping)
//! - quasi-Newton line-search methods (BFGS variants, conjugate gradients)
//! - derivative-free Nelder-Mead simplex variants

use crate::cost::CostFunction;
use crate::error::SlraError;
use crate::linalg::{self, covariance_from_jacobian};
use nalgebra::{DMatrix, DVector};
use std::fmt;
use thiserror::Error;
use tracing::{error, info};

pub mod levenberg_marquardt;
pub mod nelder_mead;
pub mod quasi_newton;

pub use levenberg_marquardt::LmSolver;
pub use nelder_mead::NmSolver;
pub use quasi_newton::QnSolver;

/// Solver family selected by [`OptimizeOptions::method`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Levenberg-Marquardt on the residual system
    #[default]
    LevenbergMarquardt,
    /// Gradient-based line-search methods on the scalar objective
    QuasiNewton,
    /// Derivative-free Nelder-Mead simplex on the scalar objective
    NelderMead,
}

impl Method {
    /// Decode the integer method code used by external front ends
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Method::LevenbergMarquardt),
            1 => Some(Method::QuasiNewton),
            2 => Some(Method::NelderMead),
            _ => None,
        }
    }

    /// Number of submethods available within the family
    pub fn submethod_count(&self) -> usize {
        match self {
            Method::LevenbergMarquardt => 2,
            Method::QuasiNewton => 4,
            Method::NelderMead => 3,
        }
    }

    /// Human-readable name of a submethod of this family
    pub fn submethod_name(&self, submethod: usize) -> &'static str {
        match (self, submethod) {
            (Method::LevenbergMarquardt, 0) => "plain damping",
            (Method::LevenbergMarquardt, _) => "scaled damping",
            (Method::QuasiNewton, 0) => "BFGS",
            (Method::QuasiNewton, 1) => "BFGS with Wolfe line search",
            (Method::QuasiNewton, 2) => "conjugate gradient (Fletcher-Reeves)",
            (Method::QuasiNewton, _) => "conjugate gradient (Polak-Ribiere)",
            (Method::NelderMead, 0) => "simplex",
            (Method::NelderMead, 1) => "simplex (squared size)",
            (Method::NelderMead, _) => "simplex (randomized start)",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::LevenbergMarquardt => write!(f, "Levenberg-Marquardt"),
            Method::QuasiNewton => write!(f, "quasi-Newton"),
            Method::NelderMead => write!(f, "Nelder-Mead"),
        }
    }
}

/// Verbosity of the driver's progress reporting
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Display {
    /// No output
    Off,
    /// Final diagnostic line only
    #[default]
    Final,
    /// One line per iteration plus the final diagnostic
    Iteration,
}

/// Optimizer-specific error types for slra-solver
#[derive(Debug, Clone, Error)]
pub enum OptimizerError {
    /// Method, submethod or tolerance settings are inconsistent
    #[error("Invalid optimizer configuration: {0}")]
    InvalidConfiguration(String),

    /// Iterate length does not match the cost function's parameter count
    #[error("Iterate has length {found}, cost function expects {expected}")]
    IterateLength { expected: usize, found: usize },

    /// Linear algebra operation failed
    #[error("Linear algebra error: {0}")]
    LinAlg(#[from] linalg::LinAlgError),
}

impl OptimizerError {
    /// Log the error with tracing::error and return self for chaining
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }
}

/// Result type for optimizer operations
pub type OptimizerResult<T> = Result<T, OptimizerError>;

/// Which convergence test terminated the iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergedBy {
    /// Component-wise step tolerance on the iterate
    StepTolerance,
    /// Gradient norm tolerance
    GradientTolerance,
    /// Both tests passed at the same iteration
    Both,
    /// Simplex size tolerance (Nelder-Mead)
    SimplexSize,
}

impl fmt::Display for ConvergedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvergedBy::StepTolerance => write!(f, "tolerance for the iterate"),
            ConvergedBy::GradientTolerance => write!(f, "tolerance for the gradient"),
            ConvergedBy::Both => write!(f, "tolerances for the iterate and the gradient"),
            ConvergedBy::SimplexSize => write!(f, "tolerance for the simplex size"),
        }
    }
}

/// Status of an optimization run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationStatus {
    /// A convergence tolerance was reached
    Converged(ConvergedBy),
    /// The iteration budget ran out before any tolerance was reached
    IterationLimitExceeded,
    /// The solver could not make any further progress
    NoProgress,
    /// Progress in the objective value fell below machine precision
    ObjectiveStalled,
    /// Change in the iterate fell below machine precision
    ParametersStalled,
    /// Change along the gradient fell below machine precision
    GradientStalled,
}

impl OptimizationStatus {
    /// Whether the run ended by reaching a convergence tolerance
    pub fn converged(&self) -> bool {
        matches!(self, OptimizationStatus::Converged(_))
    }
}

impl fmt::Display for OptimizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationStatus::Converged(by) => write!(f, "Converged by {}", by),
            OptimizationStatus::IterationLimitExceeded => write!(f, "Iteration limit exceeded"),
            OptimizationStatus::NoProgress => write!(f, "No further progress possible"),
            OptimizationStatus::ObjectiveStalled => {
                write!(f, "Objective progress below machine precision")
            }
            OptimizationStatus::ParametersStalled => {
                write!(f, "Iterate change below machine precision")
            }
            OptimizationStatus::GradientStalled => {
                write!(f, "Gradient change below machine precision")
            }
        }
    }
}

/// Configuration of one [`optimize`] run
#[derive(Debug, Clone)]
pub struct OptimizeOptions {
    /// Solver family
    pub method: Method,
    /// Submethod within the family, see [`Method::submethod_count`]
    pub submethod: usize,
    /// Minimize the corrected residual system instead of the plain one
    pub use_corrected_residuals: bool,
    /// Initial step: line-search seed (quasi-Newton) or simplex edge length
    pub step_size: f64,
    /// Absolute component-wise step tolerance
    pub eps_abs: f64,
    /// Relative component-wise step tolerance
    pub eps_rel: f64,
    /// Gradient norm tolerance
    pub eps_grad: f64,
    /// Simplex size tolerance (Nelder-Mead)
    pub eps_x: f64,
    /// Iteration budget; zero performs no iterations
    pub max_iterations: usize,
    /// Progress reporting verbosity
    pub display: Display,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            method: Method::LevenbergMarquardt,
            submethod: 0,
            use_corrected_residuals: false,
            step_size: 0.001,
            eps_abs: 0.0,
            eps_rel: 1e-5,
            eps_grad: 1e-5,
            eps_x: 1e-5,
            max_iterations: 100,
            display: Display::Off,
        }
    }
}

impl OptimizeOptions {
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_submethod(mut self, submethod: usize) -> Self {
        self.submethod = submethod;
        self
    }

    pub fn with_corrected_residuals(mut self, use_corrected: bool) -> Self {
        self.use_corrected_residuals = use_corrected;
        self
    }

    pub fn with_step_size(mut self, step_size: f64) -> Self {
        self.step_size = step_size;
        self
    }

    pub fn with_tolerances(mut self, eps_abs: f64, eps_rel: f64, eps_grad: f64, eps_x: f64) -> Self {
        self.eps_abs = eps_abs;
        self.eps_rel = eps_rel;
        self.eps_grad = eps_grad;
        self.eps_x = eps_x;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_display(mut self, display: Display) -> Self {
        self.display = display;
        self
    }

    /// Check the configuration for internal consistency
    ///
    /// # Errors
    /// Returns [`OptimizerError::InvalidConfiguration`] for unknown submethods,
    /// negative tolerances or a non-positive initial step.
    pub fn validate(&self) -> OptimizerResult<()> {
        if self.submethod >= self.method.submethod_count() {
            return Err(OptimizerError::InvalidConfiguration(format!(
                "submethod {} out of range for {} ({} available)",
                self.submethod,
                self.method,
                self.method.submethod_count()
            ))
            .log());
        }
        if self.eps_abs < 0.0 || self.eps_rel < 0.0 || self.eps_grad < 0.0 || self.eps_x < 0.0 {
            return Err(
                OptimizerError::InvalidConfiguration("tolerances must be non-negative".into())
                    .log(),
            );
        }
        if self.step_size <= 0.0 {
            return Err(
                OptimizerError::InvalidConfiguration("step size must be positive".into()).log(),
            );
        }
        Ok(())
    }
}

/// Result of one [`optimize`] run
#[derive(Debug, Clone, Copy)]
pub struct OptimizeResult {
    /// How the run terminated
    pub status: OptimizationStatus,
    /// Number of iterations performed
    pub iterations: usize,
    /// Objective value at the final iterate
    pub objective: f64,
}

impl OptimizeResult {
    /// Whether the run ended by reaching a convergence tolerance
    pub fn converged(&self) -> bool {
        self.status.converged()
    }

    /// Which tolerance terminated the run, if any
    pub fn converged_by(&self) -> Option<ConvergedBy> {
        match self.status {
            OptimizationStatus::Converged(by) => Some(by),
            _ => None,
        }
    }
}

/// Outcome of one solver family iteration
pub(crate) enum StepOutcome {
    /// The iterate moved; convergence tests apply
    Progress,
    /// The solver cannot improve the iterate any further
    Stall(OptimizationStatus),
}

/// Component-wise step test: `|dx_i| < eps_abs + eps_rel * |x_i|` for all `i`
pub(crate) fn step_within_tolerance(
    dx: &DVector<f64>,
    x: &DVector<f64>,
    eps_abs: f64,
    eps_rel: f64,
) -> bool {
    dx.iter()
        .zip(x.iter())
        .all(|(&dxi, &xi)| dxi.abs() < eps_abs + eps_rel * xi.abs())
}

/// L1 norm of the gradient, used by the least-squares gradient test
pub(crate) fn gradient_norm_l1(g: &DVector<f64>) -> f64 {
    g.iter().map(|gi| gi.abs()).sum()
}

enum FamilySolver {
    Lm(LmSolver),
    Qn(QnSolver),
    Nm(NmSolver),
}

/// Minimize a structured low-rank cost starting from `x`
///
/// Dispatches to the solver family selected in `options`, runs its iteration
/// until a convergence tolerance is met, the solver stalls or the iteration
/// budget runs out, and writes the final iterate back into `x`. For the
/// Levenberg-Marquardt family, when `covariance` is given it receives the
/// parameter covariance `(J^T J)^{-1}` at the final iterate.
///
/// # Errors
/// Returns [`SlraError`] for inconsistent configurations, an iterate whose
/// length disagrees with the cost function, or a failed covariance
/// computation. Stalls and exhausted iteration budgets are reported through
/// [`OptimizeResult::status`], not as errors.
pub fn optimize(
    cost: &mut dyn CostFunction,
    options: &OptimizeOptions,
    x: &mut DVector<f64>,
    covariance: Option<&mut DMatrix<f64>>,
) -> Result<OptimizeResult, SlraError> {
    options.validate()?;
    if x.len() != cost.parameter_count() {
        return Err(OptimizerError::IterateLength {
            expected: cost.parameter_count(),
            found: x.len(),
        }
        .log()
        .into());
    }

    if options.display != Display::Off {
        info!(
            "optimizing with {} ({})",
            options.method,
            options.method.submethod_name(options.submethod)
        );
    }

    let mut solver = match options.method {
        Method::LevenbergMarquardt => FamilySolver::Lm(LmSolver::new(cost, x.clone(), options)),
        Method::QuasiNewton => FamilySolver::Qn(QnSolver::new(cost, x.clone(), options)),
        Method::NelderMead => FamilySolver::Nm(NmSolver::new(cost, x.clone(), options)),
    };

    if options.display == Display::Iteration {
        if let FamilySolver::Lm(lm) = &solver {
            info!(
                "{:3}: f0 = {:16.11}, ||f0'|| = {:16.8}, ||x|| = {:10.8}",
                0,
                lm.objective(),
                lm.gradient().norm(),
                lm.x().norm()
            );
        }
    }

    let mut iterations = 0;
    let mut step_converged = false;
    let mut grad_converged = false;
    let mut stall: Option<OptimizationStatus> = None;

    while !step_converged && !grad_converged && stall.is_none() && iterations < options.max_iterations
    {
        iterations += 1;
        match &mut solver {
            FamilySolver::Lm(lm) => match lm.step(cost) {
                StepOutcome::Stall(status) => stall = Some(status),
                StepOutcome::Progress => {
                    step_converged =
                        step_within_tolerance(lm.dx(), lm.x(), options.eps_abs, options.eps_rel);
                    grad_converged = gradient_norm_l1(lm.gradient()) < options.eps_grad;
                    if options.display == Display::Iteration {
                        info!(
                            "{:3}: f0 = {:16.11}, ||f0'|| = {:16.8}, ||x|| = {:10.8}",
                            iterations,
                            lm.objective(),
                            lm.gradient().norm(),
                            lm.x().norm()
                        );
                    }
                }
            },
            FamilySolver::Qn(qn) => match qn.step(cost) {
                StepOutcome::Stall(status) => stall = Some(status),
                StepOutcome::Progress => {
                    step_converged =
                        step_within_tolerance(qn.dx(), qn.x(), options.eps_abs, options.eps_rel);
                    grad_converged = qn.gradient().norm() < options.eps_grad;
                    if options.display == Display::Iteration {
                        info!(
                            "{:3}: f0 = {:16.11}, ||f0'|| = {:16.8}",
                            iterations,
                            qn.objective(),
                            qn.gradient().norm()
                        );
                    }
                }
            },
            FamilySolver::Nm(nm) => match nm.step(cost) {
                StepOutcome::Stall(status) => stall = Some(status),
                StepOutcome::Progress => {
                    step_converged = nm.size() < options.eps_x;
                    if options.display == Display::Iteration {
                        info!(
                            "{:3}: f0 = {:16.11}, size = {:10.8}",
                            iterations,
                            nm.objective(),
                            nm.size()
                        );
                    }
                }
            },
        }
    }

    let status = if step_converged || grad_converged {
        let by = match (&solver, step_converged, grad_converged) {
            (FamilySolver::Nm(_), _, _) => ConvergedBy::SimplexSize,
            (_, true, true) => ConvergedBy::Both,
            (_, true, false) => ConvergedBy::StepTolerance,
            _ => ConvergedBy::GradientTolerance,
        };
        OptimizationStatus::Converged(by)
    } else if let Some(status) = stall {
        status
    } else {
        OptimizationStatus::IterationLimitExceeded
    };

    let objective = match &solver {
        FamilySolver::Lm(lm) => {
            x.copy_from(lm.x());
            lm.objective()
        }
        FamilySolver::Qn(qn) => {
            x.copy_from(qn.x());
            qn.objective()
        }
        FamilySolver::Nm(nm) => {
            x.copy_from(nm.x());
            nm.objective()
        }
    };

    if let (FamilySolver::Lm(lm), Some(cov)) = (&solver, covariance) {
        *cov = covariance_from_jacobian(lm.jacobian(), options.eps_rel)
            .map_err(OptimizerError::from)?;
    }

    if options.display != Display::Off {
        match &status {
            OptimizationStatus::Converged(by) => {
                info!("optimization terminated by reaching the {}", by)
            }
            OptimizationStatus::IterationLimitExceeded => info!(
                "optimization terminated by reaching the maximum number of iterations; \
                 the result may be far from optimal"
            ),
            OptimizationStatus::NoProgress => {
                info!("possible lack of convergence: no further progress")
            }
            OptimizationStatus::ObjectiveStalled => {
                info!("lack of convergence: progress in objective value below machine precision")
            }
            OptimizationStatus::ParametersStalled => {
                info!("lack of convergence: change in parameters below machine precision")
            }
            OptimizationStatus::GradientStalled => {
                info!("lack of convergence: change in gradient below machine precision")
            }
        }
        info!("found minimum: {:16.11}", objective);
    }

    Ok(OptimizeResult {
        status,
        iterations,
        objective,
    })
}


#[cfg(test)]
pub(crate) mod test_fixtures {
    use crate::cost::CostFunction;
    use nalgebra::{DMatrix, DVector};

    /// Linear least squares `f = A x - b` with a diagonal `A`, exact gradient
    /// and Jacobian. The minimum is `x_i = b_i / a_i`.
    pub struct LinearCost {
        diag: DVector<f64>,
        b: DVector<f64>,
    }

    impl LinearCost {
        pub fn identity(n: usize) -> Self {
            Self {
                diag: DVector::repeat(n, 1.0),
                b: DVector::zeros(n),
            }
        }

        pub fn diagonal(diag: &[f64]) -> Self {
            Self {
                diag: DVector::from_row_slice(diag),
                b: DVector::zeros(diag.len()),
            }
        }
    }

    impl CostFunction for LinearCost {
        fn residual_count(&self) -> usize {
            self.b.len()
        }
        fn sample_count(&self) -> usize {
            self.b.len()
        }
        fn block_width(&self) -> usize {
            self.b.len()
        }
        fn sample_dimension(&self) -> usize {
            1
        }
        fn residuals(&mut self, x: &DVector<f64>, f: &mut DVector<f64>) {
            f.copy_from(&(self.diag.component_mul(x) - &self.b));
        }
        fn jacobian(&mut self, _x: &DVector<f64>, jac: &mut DMatrix<f64>) {
            jac.fill(0.0);
            for i in 0..self.diag.len() {
                jac[(i, i)] = self.diag[i];
            }
        }
        fn gradient(&mut self, x: &DVector<f64>, g: &mut DVector<f64>) {
            let f = self.diag.component_mul(x) - &self.b;
            g.copy_from(&(2.0 * self.diag.component_mul(&f)));
        }
    }

    /// The Rosenbrock function in residual form: `r = (10 (y - x^2), 1 - x)`.
    pub struct RosenbrockCost;

    impl CostFunction for RosenbrockCost {
        fn residual_count(&self) -> usize {
            2
        }
        fn sample_count(&self) -> usize {
            2
        }
        fn block_width(&self) -> usize {
            2
        }
        fn sample_dimension(&self) -> usize {
            1
        }
        fn residuals(&mut self, x: &DVector<f64>, f: &mut DVector<f64>) {
            f[0] = 10.0 * (x[1] - x[0] * x[0]);
            f[1] = 1.0 - x[0];
        }
        fn jacobian(&mut self, x: &DVector<f64>, jac: &mut DMatrix<f64>) {
            jac[(0, 0)] = -20.0 * x[0];
            jac[(0, 1)] = 10.0;
            jac[(1, 0)] = -1.0;
            jac[(1, 1)] = 0.0;
        }
        fn gradient(&mut self, x: &DVector<f64>, g: &mut DVector<f64>) {
            let mut f = DVector::zeros(2);
            let mut jac = DMatrix::zeros(2, 2);
            self.residuals(x, &mut f);
            self.jacobian(x, &mut jac);
            g.copy_from(&(2.0 * jac.transpose() * f));
        }
    }
}
