//! Levenberg-Marquardt iteration for the residual system.
//!
//! Minimizes `f(x) = ||r(x)||²` by solving the damped normal equations at
//! each iteration:
//!
//! ```text
//! (J^T·J + λD)·h = -J^T·r
//! ```
//!
//! Two damping shapes are available as submethods: `D = I` (plain) and
//! `D = diag(J^T·J)` (Marquardt scaling, which makes the step invariant to
//! per-parameter rescaling).
//!
//! # Step Acceptance and Damping Update
//!
//! Each proposed step is evaluated by the gain ratio
//!
//! ```text
//! ρ = (actual reduction) / (predicted reduction)
//! ```
//!
//! Steps with `ρ > 0` are accepted and the damping decreases by Nielsen's
//! formula `λ ← λ · max(1/3, 1 - (2ρ - 1)³)`; rejected steps increase the
//! damping geometrically and retry. When the damping saturates without an
//! acceptable step the iteration reports a stall, classified by which
//! quantity stopped moving at machine precision.

use crate::cost::CostFunction;
use crate::linalg::NormalEquationSolver;
use crate::optimizer::{OptimizationStatus, OptimizeOptions, StepOutcome};
use nalgebra::{DMatrix, DVector};
use tracing::debug;

/// Initial damping parameter
const DAMPING_INIT: f64 = 1e-4;
/// Smallest damping after a run of accepted steps
const DAMPING_MIN: f64 = 1e-12;
/// Damping saturation; a rejected step at this level is a stall
const DAMPING_MAX: f64 = 1e12;
/// Predicted reductions below this are treated as zero
const MIN_PREDICTED_REDUCTION: f64 = 1e-15;

/// Damping shape used in the augmented normal equations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LmVariant {
    /// `D = I`
    Plain,
    /// `D = diag(J^T J)`, clamped away from zero
    Scaled,
}

/// Levenberg-Marquardt solver state over one optimization run
pub struct LmSolver {
    variant: LmVariant,
    corrected: bool,
    x: DVector<f64>,
    /// Residuals at `x`
    f: DVector<f64>,
    /// Jacobian at `x`
    jac: DMatrix<f64>,
    /// `J^T f` at `x`
    gradient: DVector<f64>,
    /// Last accepted step
    dx: DVector<f64>,
    /// `||f||²` at `x`
    objective: f64,
    damping: f64,
    nu: f64,
    solver: NormalEquationSolver,
}

impl LmSolver {
    /// Initialize the iteration at `x`, evaluating residuals and Jacobian once
    pub(crate) fn new(
        cost: &mut dyn CostFunction,
        x: DVector<f64>,
        options: &OptimizeOptions,
    ) -> Self {
        let corrected = options.use_corrected_residuals;
        let residual_count = if corrected {
            cost.corrected_residual_count()
        } else {
            cost.residual_count()
        };
        let parameter_count = cost.parameter_count();

        let mut f = DVector::zeros(residual_count);
        let mut jac = DMatrix::zeros(residual_count, parameter_count);
        if corrected {
            cost.corrected_residuals_and_jacobian(&x, &mut f, &mut jac);
        } else {
            cost.residuals_and_jacobian(&x, &mut f, &mut jac);
        }
        let gradient = jac.transpose() * &f;
        let objective = f.norm_squared();

        Self {
            variant: if options.submethod == 1 {
                LmVariant::Scaled
            } else {
                LmVariant::Plain
            },
            corrected,
            x,
            f,
            jac,
            gradient,
            dx: DVector::zeros(parameter_count),
            objective,
            damping: DAMPING_INIT,
            nu: 2.0,
            solver: NormalEquationSolver::new(),
        }
    }

    pub(crate) fn x(&self) -> &DVector<f64> {
        &self.x
    }

    pub(crate) fn dx(&self) -> &DVector<f64> {
        &self.dx
    }

    pub(crate) fn gradient(&self) -> &DVector<f64> {
        &self.gradient
    }

    pub(crate) fn jacobian(&self) -> &DMatrix<f64> {
        &self.jac
    }

    pub(crate) fn objective(&self) -> f64 {
        self.objective
    }

    fn eval_residuals(&self, cost: &mut dyn CostFunction, x: &DVector<f64>, f: &mut DVector<f64>) {
        if self.corrected {
            cost.corrected_residuals(x, f);
        } else {
            cost.residuals(x, f);
        }
    }

    /// Perform one accepted step, retrying with increased damping on rejection
    pub(crate) fn step(&mut self, cost: &mut dyn CostFunction) -> StepOutcome {
        loop {
            let marquardt = self.variant == LmVariant::Scaled;
            let solve = match self.solver.solve_damped(&self.jac, &self.f, self.damping, marquardt)
            {
                Ok(solve) => solve,
                Err(e) => {
                    debug!("damped solve failed at lambda = {:e}: {}", self.damping, e);
                    if self.damping >= DAMPING_MAX {
                        return StepOutcome::Stall(OptimizationStatus::NoProgress);
                    }
                    self.increase_damping();
                    continue;
                }
            };
            let dx = solve.step;

            let x_trial = &self.x + &dx;
            let mut f_trial = DVector::zeros(self.f.len());
            self.eval_residuals(cost, &x_trial, &mut f_trial);
            let objective_trial = f_trial.norm_squared();

            let actual = self.objective - objective_trial;
            // Model reduction of ||f||² for the damped step:
            // dx^T (lambda * D dx - g), always positive for a descent solve.
            let predicted =
                dx.dot(&(self.damping * solve.damping_diag.component_mul(&dx) - &self.gradient));
            let rho = compute_step_quality(actual, predicted);

            if rho > 0.0 && objective_trial.is_finite() {
                self.x = x_trial;
                self.f = f_trial;
                if self.corrected {
                    cost.corrected_jacobian(&self.x, &mut self.jac);
                } else {
                    cost.jacobian(&self.x, &mut self.jac);
                }
                self.gradient = self.jac.transpose() * &self.f;
                self.objective = objective_trial;
                self.dx = dx;

                // Nielsen's update
                let c = 2.0 * rho - 1.0;
                self.damping = (self.damping * (1.0_f64 / 3.0).max(1.0 - c * c * c))
                    .max(DAMPING_MIN);
                self.nu = 2.0;
                return StepOutcome::Progress;
            }

            if self.damping >= DAMPING_MAX {
                return StepOutcome::Stall(self.classify_stall(&dx, actual));
            }
            self.increase_damping();
        }
    }

    fn increase_damping(&mut self) {
        self.damping = (self.damping * self.nu).min(DAMPING_MAX);
        self.nu *= 2.0;
    }

    /// Classify a saturated-damping stall by which quantity stopped moving
    fn classify_stall(&self, dx: &DVector<f64>, actual: f64) -> OptimizationStatus {
        let eps = f64::EPSILON;
        if actual.abs() <= eps * self.objective {
            OptimizationStatus::ObjectiveStalled
        } else if dx.norm() <= eps * (self.x.norm() + eps) {
            OptimizationStatus::ParametersStalled
        } else if self.gradient.dot(dx).abs() <= eps * self.objective {
            OptimizationStatus::GradientStalled
        } else {
            OptimizationStatus::NoProgress
        }
    }
}

/// Gain ratio of a proposed step, guarding a vanishing predicted reduction
fn compute_step_quality(actual: f64, predicted: f64) -> f64 {
    if predicted.abs() < MIN_PREDICTED_REDUCTION {
        if actual > 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        actual / predicted
    }
}
