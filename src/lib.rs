//! # SLRA Solver
//!
//! A Rust library for the numerical core of structured low-rank approximation
//! (SLRA): finding the closest rank-deficient structured matrix (Hankel,
//! Toeplitz, mosaic, ...) to given data, as used in system identification and
//! approximate realization.
//!
//! ## Features
//!
//! - **Multiple Optimization Families**: Levenberg-Marquardt, quasi-Newton
//!   line-search methods and derivative-free Nelder-Mead simplex, all behind
//!   one driver
//! - **Striped Structure Engine**: composite structures stack heterogeneous
//!   blocks; their block-diagonal Gamma matrices factor per block, in parallel
//! - **Pluggable Cost Functions**: the driver only sees the [`CostFunction`]
//!   trait, so any structured problem can ride the same solvers
//! - **Dense Linear Algebra Backend**: damped normal equations via faer's
//!   Cholesky, covariance via SVD
//!
//! ## Solver Families
//!
//! - **Levenberg-Marquardt**: plain or Marquardt-scaled damping on the
//!   residual system
//! - **Quasi-Newton**: BFGS (Armijo or strong Wolfe line search) and
//!   Fletcher-Reeves / Polak-Ribiere conjugate gradients
//! - **Nelder-Mead**: three simplex variants, no derivatives required

pub mod cost;
pub mod error;
pub mod gamma;
pub mod linalg;
pub mod logger;
pub mod optimizer;
pub mod structure;

pub use cost::CostFunction;
pub use error::{SlraError, SlraResult};

pub use gamma::{CholeskyFactor, DGamma, GammaError, StripedCholesky, StripedDGamma};
pub use structure::{StripedStructure, Structure, StructureError};

pub use linalg::{covariance_from_jacobian, LinAlgError, NormalEquationSolver};
pub use logger::{init_logger, init_logger_with_level};
pub use optimizer::{
    optimize, ConvergedBy, Display, Method, OptimizationStatus, OptimizeOptions, OptimizeResult,
    OptimizerError,
};
