use core::fmt;
use std::time::Duration;

use faer_core::sparse::SparseColMatRef;
use faer_core::MatRef;

use crate::compiled::CompiledRestrictions;
use crate::report::{SolveStatus, SpaResult, SpaStats};
use crate::restriction::{RestrictionError, RestrictionSystem};
use crate::solver::{validate_point, SolveError, SpaOptions};

/// Errors returned by the one-shot projection functions.
#[derive(Debug, Clone, PartialEq)]
pub enum SpaError {
    /// The restrictions could not be normalized.
    Restriction(RestrictionError),
    /// The start vector, weights or options were rejected.
    Solve(SolveError),
}

impl fmt::Display for SpaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Restriction(err) => write!(f, "invalid restrictions: {err}"),
            Self::Solve(err) => write!(f, "invalid solve input: {err}"),
        }
    }
}

impl std::error::Error for SpaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Restriction(err) => Some(err),
            Self::Solve(err) => Some(err),
        }
    }
}

impl From<RestrictionError> for SpaError {
    fn from(err: RestrictionError) -> Self {
        Self::Restriction(err)
    }
}

impl From<SolveError> for SpaError {
    fn from(err: SolveError) -> Self {
        Self::Solve(err)
    }
}

/// Compiles a dense coefficient matrix `a` with `a·x = b` for the first `neq`
/// rows and `a·x <= b` for the rest.
pub fn compile_dense(
    a: MatRef<'_, f64>,
    b: &[f64],
    neq: usize,
) -> Result<CompiledRestrictions, RestrictionError> {
    RestrictionSystem::from_dense(a, b, neq).map(CompiledRestrictions::new)
}

/// Compiles 1-based `(row, col, coef)` triplets; see
/// [`RestrictionSystem::from_triplets`].
pub fn compile_sparse(
    triplets: &[(usize, usize, f64)],
    b: &[f64],
    neq: usize,
) -> Result<CompiledRestrictions, RestrictionError> {
    RestrictionSystem::from_triplets(triplets, b, neq).map(CompiledRestrictions::new)
}

/// Compiles a zero-based faer CSC matrix.
pub fn compile_csc(
    a: SparseColMatRef<'_, usize, f64>,
    b: &[f64],
    neq: usize,
) -> Result<CompiledRestrictions, RestrictionError> {
    RestrictionSystem::from_csc(a, b, neq).map(CompiledRestrictions::new)
}

/// Projects `x` onto `{a·x = b (first neq rows), a·x <= b (rest)}` in the
/// metric `diag(w)`, compiling the restrictions for a single use.
pub fn project(
    x: &[f64],
    a: MatRef<'_, f64>,
    b: &[f64],
    neq: usize,
    w: Option<&[f64]>,
    options: &SpaOptions,
) -> Result<SpaResult, SpaError> {
    solve_once(x, w, options, || compile_dense(a, b, neq))
}

/// Same as [`project`] with restrictions given as 1-based triplets.
pub fn sparse_project(
    x: &[f64],
    triplets: &[(usize, usize, f64)],
    b: &[f64],
    neq: usize,
    w: Option<&[f64]>,
    options: &SpaOptions,
) -> Result<SpaResult, SpaError> {
    solve_once(x, w, options, || compile_sparse(triplets, b, neq))
}

fn solve_once(
    x: &[f64],
    w: Option<&[f64]>,
    options: &SpaOptions,
    compile: impl FnOnce() -> Result<CompiledRestrictions, RestrictionError>,
) -> Result<SpaResult, SpaError> {
    let compiled = match compile() {
        Ok(compiled) => compiled,
        Err(RestrictionError::Alloc) => {
            validate_point(x, w, options)?;
            log::debug!("restriction storage could not be allocated");
            let stats = SpaStats {
                status: SolveStatus::AllocationFailed,
                iterations: 0,
                tol: f64::INFINITY,
                objective: 0.0,
                duration: Duration::ZERO,
            };
            return Ok(SpaResult::new(x.to_vec(), stats));
        }
        Err(err) => return Err(err.into()),
    };
    Ok(compiled.solve(x, w, options)?)
}
