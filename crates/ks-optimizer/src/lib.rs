//! # ks-optimizer
//!
//! Mean-variance (Markowitz) allocation for Keystone.
//!
//! Provides the constraint set (bounds, budget, group caps), an ADMM
//! quadratic-programming solver, the `optimize` entry point with its status
//! reporting, and efficient-frontier and random-portfolio sweeps.
//!
//! The optimizer only sees plain vectors and matrices; it does not know where
//! the expected returns and covariance came from.

mod constraints;
mod frontier;
mod markowitz;
mod qp;
mod settings;

pub use constraints::{Constraints, GroupConstraint};
pub use frontier::{efficient_frontier, random_search, FrontierPoint, RandomSearchResult};
pub use markowitz::{
    optimize, optimize_from, Allocation, OptimizationResult, OptimizationStatus,
};
pub use settings::SolverSettings;
