//! Derivative-free Nelder-Mead simplex iteration on the scalar objective.
//!
//! Maintains `n + 1` vertices and applies the classic reflection, expansion,
//! contraction and shrink moves. The three submethods differ only in the
//! starting simplex and the size measure:
//! - simplex: axis-aligned start, size = mean vertex distance to the centroid
//! - simplex (squared size): axis-aligned start, size = root-mean-square
//!   vertex distance, cheaper to track on large problems
//! - simplex (randomized start): randomly oriented start with the
//!   root-mean-square size, useful when the axis-aligned simplex degenerates

use crate::cost::CostFunction;
use crate::optimizer::{OptimizeOptions, StepOutcome};
use nalgebra::DVector;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Reflection coefficient
const ALPHA: f64 = 1.0;
/// Expansion coefficient
const GAMMA: f64 = 2.0;
/// Contraction coefficient
const BETA: f64 = 0.5;
/// Shrink coefficient
const SIGMA: f64 = 0.5;
/// Seed for the randomized starting simplex, fixed for reproducible runs
const SIMPLEX_SEED: u64 = 0x5143_6839_a2b1_77c4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NmVariant {
    Simplex,
    Simplex2,
    Simplex2Rand,
}

/// Nelder-Mead solver state over one optimization run
pub struct NmSolver {
    variant: NmVariant,
    vertices: Vec<DVector<f64>>,
    values: Vec<f64>,
    /// Reported iterate: the seed point until a step runs, then the best
    /// vertex. Keeps the result untouched when no iteration is performed,
    /// even though a start vertex may already beat the seed.
    x: DVector<f64>,
    fx: f64,
}

impl NmSolver {
    /// Build and evaluate the starting simplex around `x`
    pub(crate) fn new(
        cost: &mut dyn CostFunction,
        x: DVector<f64>,
        options: &OptimizeOptions,
    ) -> Self {
        let n = x.len();
        let step = options.step_size;
        let variant = match options.submethod {
            0 => NmVariant::Simplex,
            1 => NmVariant::Simplex2,
            _ => NmVariant::Simplex2Rand,
        };

        let mut vertices = Vec::with_capacity(n + 1);
        vertices.push(x.clone());
        match variant {
            NmVariant::Simplex | NmVariant::Simplex2 => {
                for i in 0..n {
                    let mut v = x.clone();
                    v[i] += step;
                    vertices.push(v);
                }
            }
            NmVariant::Simplex2Rand => {
                let mut rng = StdRng::seed_from_u64(SIMPLEX_SEED);
                for _ in 0..n {
                    let mut v = x.clone();
                    for k in 0..n {
                        v[k] += step * rng.gen_range(-1.0..=1.0);
                    }
                    vertices.push(v);
                }
            }
        }

        let values: Vec<f64> = vertices.iter().map(|v| cost.objective(v)).collect();
        let fx = values[0];
        Self {
            variant,
            vertices,
            values,
            x,
            fx,
        }
    }

    /// Current iterate
    pub(crate) fn x(&self) -> &DVector<f64> {
        &self.x
    }

    /// Objective at the current iterate
    pub(crate) fn objective(&self) -> f64 {
        self.fx
    }

    fn best(&self) -> usize {
        let mut best = 0;
        for (k, &v) in self.values.iter().enumerate() {
            if v < self.values[best] {
                best = k;
            }
        }
        best
    }

    fn worst_two(&self) -> (usize, usize) {
        let mut worst = 0;
        for (k, &v) in self.values.iter().enumerate() {
            if v > self.values[worst] {
                worst = k;
            }
        }
        let mut second = if worst == 0 { 1 } else { 0 };
        for (k, &v) in self.values.iter().enumerate() {
            if k != worst && v > self.values[second] {
                second = k;
            }
        }
        (worst, second)
    }

    /// Characteristic simplex size used by the convergence test
    pub(crate) fn size(&self) -> f64 {
        let n1 = self.vertices.len() as f64;
        let mut centroid = DVector::zeros(self.vertices[0].len());
        for v in &self.vertices {
            centroid += v;
        }
        centroid /= n1;

        match self.variant {
            NmVariant::Simplex => {
                self.vertices.iter().map(|v| (v - &centroid).norm()).sum::<f64>() / n1
            }
            _ => (self
                .vertices
                .iter()
                .map(|v| (v - &centroid).norm_squared())
                .sum::<f64>()
                / n1)
                .sqrt(),
        }
    }

    /// Perform one reflect/expand/contract/shrink move
    pub(crate) fn step(&mut self, cost: &mut dyn CostFunction) -> StepOutcome {
        self.advance(cost);
        let best = self.best();
        self.x = self.vertices[best].clone();
        self.fx = self.values[best];
        StepOutcome::Progress
    }

    fn advance(&mut self, cost: &mut dyn CostFunction) {
        let best = self.best();
        let (worst, second) = self.worst_two();

        // Centroid of the face opposite the worst vertex.
        let n = self.vertices[0].len();
        let mut centroid = DVector::zeros(n);
        for (k, v) in self.vertices.iter().enumerate() {
            if k != worst {
                centroid += v;
            }
        }
        centroid /= (self.vertices.len() - 1) as f64;

        let reflected = &centroid + ALPHA * (&centroid - &self.vertices[worst]);
        let f_reflected = cost.objective(&reflected);

        if f_reflected < self.values[best] {
            let expanded = &centroid + GAMMA * (&centroid - &self.vertices[worst]);
            let f_expanded = cost.objective(&expanded);
            if f_expanded < f_reflected {
                self.vertices[worst] = expanded;
                self.values[worst] = f_expanded;
            } else {
                self.vertices[worst] = reflected;
                self.values[worst] = f_reflected;
            }
            return;
        }

        if f_reflected < self.values[second] {
            self.vertices[worst] = reflected;
            self.values[worst] = f_reflected;
            return;
        }

        // Contraction, outside when the reflected point improved on the worst.
        let contracted = if f_reflected < self.values[worst] {
            &centroid + BETA * (&reflected - &centroid)
        } else {
            &centroid - BETA * (&centroid - &self.vertices[worst])
        };
        let f_contracted = cost.objective(&contracted);

        if f_contracted < f_reflected.min(self.values[worst]) {
            self.vertices[worst] = contracted;
            self.values[worst] = f_contracted;
            return;
        }

        // Shrink everything toward the best vertex.
        let anchor = self.vertices[best].clone();
        for (k, v) in self.vertices.iter_mut().enumerate() {
            if k != best {
                *v = &anchor + SIGMA * (&*v - &anchor);
            }
        }
        for (k, v) in self.vertices.iter().enumerate() {
            if k != best {
                self.values[k] = cost.objective(v);
            }
        }
    }
}
