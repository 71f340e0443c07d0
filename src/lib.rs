//! Weighted projection onto systems of linear restrictions.
//!
//! Given a start point `x0`, positive weights `w` and restrictions
//! `a_i·x = b_i` (first `neq` rows) and `a_i·x <= b_i` (remaining rows), this
//! crate looks for a point close to `x0` in the metric
//! `sum_j w_j (x_j - x0_j)^2` that satisfies every restriction.
//!
//! How it works (high level):
//! - Normalize the restrictions into sparse rows (dense faer matrix, 1-based
//!   triplets or faer CSC input).
//! - Sweep the rows in order; project the estimate onto every equality and
//!   onto every inequality violated by more than `eps`.
//! - Stop when the L-infinity violation is <= `eps`, the estimate diverges or
//!   `max_iter` sweeps have run.
//!
//! Calling it:
//! - One-shot: [`project`] (dense) or [`sparse_project`] (triplets).
//! - Reuse: [`compile_dense`] / [`compile_sparse`] / [`compile_csc`] once,
//!   then [`CompiledRestrictions::solve`] per start point.
//! - Numerical outcomes are reported in [`SpaResult::status`]; invalid input
//!   is an `Err`.
//!
//! Example:
//! ```rust
//! use spa_rs::{sparse_project, SolveStatus, SpaOptions};
//!
//! // y >= x and x >= 1 - y, written as x - y <= 0 and -x - y <= -1.
//! let triplets = [(1, 1, 1.0), (1, 2, -1.0), (2, 1, -1.0), (2, 2, -1.0)];
//! let b = [0.0, -1.0];
//! let result = sparse_project(&[0.8, -0.2], &triplets, &b, 0, None, &SpaOptions::default())
//!     .unwrap();
//! assert_eq!(result.status, SolveStatus::Converged);
//! assert!((result.x[0] - 0.5).abs() < 1e-6 && (result.x[1] - 0.5).abs() < 1e-6);
//! ```

mod compiled;
mod project;
mod report;
mod restriction;
mod solver;

pub use compiled::CompiledRestrictions;
pub use project::{compile_csc, compile_dense, compile_sparse, project, sparse_project, SpaError};
pub use report::{IterationReport, Reporter, SolveStatus, SpaResult, SpaStats, StdoutReporter};
pub use restriction::{RestrictionError, RestrictionSystem, RowKind, RowRef};
pub use solver::{SolveError, SpaOptions, DEFAULT_DIVERGENCE_BOUND, DEFAULT_EPS, DEFAULT_MAX_ITER};
