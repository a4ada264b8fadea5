//! Quasi-Newton line-search iteration on the scalar objective.
//!
//! Four submethods share one iteration skeleton (descent direction, line
//! search, curvature update):
//! - BFGS with a backtracking Armijo line search
//! - BFGS with a strong Wolfe line search
//! - conjugate gradient, Fletcher-Reeves
//! - conjugate gradient, Polak-Ribiere (with the non-negativity restart)
//!
//! The BFGS variants maintain the inverse Hessian approximation directly,
//! with the initial-scaling heuristic `H₀ = (s^T y / y^T y) I` after the
//! first accepted step and a cautious-update guard that skips the rank-two
//! update when the curvature condition degenerates (Li & Fukushima).

use crate::cost::CostFunction;
use crate::optimizer::{OptimizationStatus, OptimizeOptions, StepOutcome};
use nalgebra::{DMatrix, DVector};
use tracing::debug;

/// Armijo sufficient-decrease constant
const C1: f64 = 1e-4;
/// Wolfe curvature constant
const C2: f64 = 0.9;
/// Smallest line-search step before giving up
const MIN_ALPHA: f64 = 1e-16;
/// Bracketing expansions before the Wolfe search gives up
const MAX_BRACKET: usize = 20;
/// Zoom bisections before the Wolfe search gives up
const MAX_ZOOM: usize = 30;
/// Curvature threshold below which the BFGS update is skipped
const CURVATURE_MIN: f64 = 1e-14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QnVariant {
    Bfgs,
    BfgsWolfe,
    ConjugateFr,
    ConjugatePr,
}

/// Quasi-Newton solver state over one optimization run
pub struct QnSolver {
    variant: QnVariant,
    x: DVector<f64>,
    objective: f64,
    /// Gradient at `x`
    g: DVector<f64>,
    /// Last accepted step
    dx: DVector<f64>,
    /// Inverse Hessian approximation (BFGS variants)
    b_inv: DMatrix<f64>,
    /// Gradient at the previous iterate (conjugate gradient variants)
    prev_g: Option<DVector<f64>>,
    /// Previous search direction (conjugate gradient variants)
    prev_dir: Option<DVector<f64>>,
    /// Seed step length for the first line search
    step_size: f64,
    first: bool,
    scaled_once: bool,
}

impl QnSolver {
    /// Initialize the iteration at `x`, evaluating objective and gradient once
    pub(crate) fn new(
        cost: &mut dyn CostFunction,
        x: DVector<f64>,
        options: &OptimizeOptions,
    ) -> Self {
        let n = x.len();
        let mut g = DVector::zeros(n);
        let objective = cost.objective_and_gradient(&x, &mut g);

        Self {
            variant: match options.submethod {
                0 => QnVariant::Bfgs,
                1 => QnVariant::BfgsWolfe,
                2 => QnVariant::ConjugateFr,
                _ => QnVariant::ConjugatePr,
            },
            x,
            objective,
            g,
            dx: DVector::zeros(n),
            b_inv: DMatrix::identity(n, n),
            prev_g: None,
            prev_dir: None,
            step_size: options.step_size,
            first: true,
            scaled_once: false,
        }
    }

    pub(crate) fn x(&self) -> &DVector<f64> {
        &self.x
    }

    pub(crate) fn dx(&self) -> &DVector<f64> {
        &self.dx
    }

    pub(crate) fn gradient(&self) -> &DVector<f64> {
        &self.g
    }

    pub(crate) fn objective(&self) -> f64 {
        self.objective
    }

    fn direction(&self) -> DVector<f64> {
        match self.variant {
            QnVariant::Bfgs | QnVariant::BfgsWolfe => -(&self.b_inv * &self.g),
            QnVariant::ConjugateFr | QnVariant::ConjugatePr => {
                match (&self.prev_g, &self.prev_dir) {
                    (Some(prev_g), Some(prev_dir)) => {
                        let denom = prev_g.norm_squared();
                        if denom <= f64::EPSILON {
                            return -self.g.clone();
                        }
                        let beta = match self.variant {
                            QnVariant::ConjugateFr => self.g.norm_squared() / denom,
                            _ => (self.g.norm_squared() - self.g.dot(prev_g)) / denom,
                        };
                        // Negative beta restarts with steepest descent.
                        -&self.g + beta.max(0.0) * prev_dir
                    }
                    _ => -self.g.clone(),
                }
            }
        }
    }

    /// Perform one line-search step along the current descent direction
    pub(crate) fn step(&mut self, cost: &mut dyn CostFunction) -> StepOutcome {
        let mut d = self.direction();
        if self.g.dot(&d) >= 0.0 {
            // Not a descent direction; restart from steepest descent.
            debug!("restarting with steepest descent");
            self.b_inv = DMatrix::identity(self.x.len(), self.x.len());
            d = -self.g.clone();
        }
        let g0_dot_d = self.g.dot(&d);
        if g0_dot_d >= 0.0 {
            // Gradient is numerically zero; nothing to move along.
            return StepOutcome::Stall(OptimizationStatus::NoProgress);
        }

        let alpha0 = if self.first { self.step_size } else { 1.0 };
        let search = match self.variant {
            QnVariant::Bfgs => {
                backtracking_search(cost, &self.x, &d, self.objective, g0_dot_d, alpha0)
            }
            _ => wolfe_search(cost, &self.x, &d, self.objective, g0_dot_d, alpha0),
        };
        let Some(found) = search else {
            return StepOutcome::Stall(OptimizationStatus::NoProgress);
        };

        let s = found.alpha * &d;
        let y = &found.gradient - &self.g;

        match self.variant {
            QnVariant::Bfgs | QnVariant::BfgsWolfe => self.update_inverse_hessian(&s, &y),
            QnVariant::ConjugateFr | QnVariant::ConjugatePr => {
                self.prev_g = Some(self.g.clone());
                self.prev_dir = Some(d);
            }
        }

        self.x += &s;
        self.dx = s;
        self.g = found.gradient;
        self.objective = found.value;
        self.first = false;
        StepOutcome::Progress
    }

    /// BFGS rank-two update of the inverse Hessian approximation
    fn update_inverse_hessian(&mut self, s: &DVector<f64>, y: &DVector<f64>) {
        let sy = s.dot(y);
        if sy <= CURVATURE_MIN {
            debug!("skipping BFGS update, curvature s'y = {:e}", sy);
            return;
        }

        if !self.scaled_once {
            let yy = y.norm_squared();
            if yy > 0.0 {
                let n = self.x.len();
                self.b_inv = DMatrix::identity(n, n) * (sy / yy);
            }
            self.scaled_once = true;
        }

        // Cautious update: require s'y / s's bounded away from zero relative
        // to the gradient magnitude (Li & Fukushima).
        let ss = s.norm_squared();
        if ss <= f64::EPSILON || sy / ss < 1e-6 * self.g.norm() {
            return;
        }

        let rho = 1.0 / sy;
        let hy = &self.b_inv * y;
        let yhy = y.dot(&hy);
        self.b_inv -= rho * (&hy * s.transpose());
        self.b_inv -= rho * (s * hy.transpose());
        self.b_inv += (rho * rho * yhy + rho) * (s * s.transpose());
    }
}

struct LineSearchResult {
    alpha: f64,
    value: f64,
    gradient: DVector<f64>,
}

/// Objective and gradient along the ray `x + alpha d`
fn eval_along(
    cost: &mut dyn CostFunction,
    x: &DVector<f64>,
    d: &DVector<f64>,
    alpha: f64,
) -> (f64, DVector<f64>) {
    let trial = x + alpha * d;
    let mut g = DVector::zeros(x.len());
    let value = cost.objective_and_gradient(&trial, &mut g);
    (value, g)
}

/// Backtracking Armijo line search, halving the step until decrease suffices
fn backtracking_search(
    cost: &mut dyn CostFunction,
    x: &DVector<f64>,
    d: &DVector<f64>,
    f0: f64,
    g0_dot_d: f64,
    alpha0: f64,
) -> Option<LineSearchResult> {
    let mut alpha = alpha0;
    while alpha >= MIN_ALPHA {
        let (value, gradient) = eval_along(cost, x, d, alpha);
        if value.is_finite() && value <= f0 + C1 * alpha * g0_dot_d {
            return Some(LineSearchResult {
                alpha,
                value,
                gradient,
            });
        }
        alpha *= 0.5;
    }
    None
}

/// Strong Wolfe line search: bracketing phase followed by a zoom phase
fn wolfe_search(
    cost: &mut dyn CostFunction,
    x: &DVector<f64>,
    d: &DVector<f64>,
    f0: f64,
    g0_dot_d: f64,
    alpha0: f64,
) -> Option<LineSearchResult> {
    let mut alpha_prev = 0.0;
    let mut f_prev = f0;
    let mut alpha = alpha0;

    for i in 0..MAX_BRACKET {
        let (value, gradient) = eval_along(cost, x, d, alpha);
        let slope = gradient.dot(d);

        if !value.is_finite() || value > f0 + C1 * alpha * g0_dot_d || (i > 0 && value >= f_prev) {
            return zoom(cost, x, d, f0, g0_dot_d, alpha_prev, f_prev, alpha);
        }
        if slope.abs() <= -C2 * g0_dot_d {
            return Some(LineSearchResult {
                alpha,
                value,
                gradient,
            });
        }
        if slope >= 0.0 {
            return zoom(cost, x, d, f0, g0_dot_d, alpha, value, alpha_prev);
        }

        alpha_prev = alpha;
        f_prev = value;
        alpha *= 2.0;
    }
    None
}

/// Zoom phase of the strong Wolfe search (bisection refinement)
#[allow(clippy::too_many_arguments)]
fn zoom(
    cost: &mut dyn CostFunction,
    x: &DVector<f64>,
    d: &DVector<f64>,
    f0: f64,
    g0_dot_d: f64,
    mut alpha_lo: f64,
    mut f_lo: f64,
    mut alpha_hi: f64,
) -> Option<LineSearchResult> {
    for _ in 0..MAX_ZOOM {
        let alpha = 0.5 * (alpha_lo + alpha_hi);
        if (alpha_hi - alpha_lo).abs() < MIN_ALPHA {
            break;
        }
        let (value, gradient) = eval_along(cost, x, d, alpha);
        let slope = gradient.dot(d);

        if !value.is_finite() || value > f0 + C1 * alpha * g0_dot_d || value >= f_lo {
            alpha_hi = alpha;
        } else {
            if slope.abs() <= -C2 * g0_dot_d {
                return Some(LineSearchResult {
                    alpha,
                    value,
                    gradient,
                });
            }
            if slope * (alpha_hi - alpha_lo) >= 0.0 {
                alpha_hi = alpha_lo;
            }
            alpha_lo = alpha;
            f_lo = value;
        }
    }
    None
}
