use core::fmt;

use crate::report::{Reporter, SpaResult, SpaStats};
use crate::restriction::RestrictionSystem;
use crate::solver::{check_width, run, validate, SolveError, SpaOptions, Weights};

/// A normalized restriction system ready to be projected onto repeatedly.
///
/// Solving never mutates the handle, so one handle can be shared by
/// reference across threads with every solve owning its own estimate.
#[derive(Debug, Clone)]
pub struct CompiledRestrictions {
    system: RestrictionSystem,
}

impl CompiledRestrictions {
    pub fn new(system: RestrictionSystem) -> Self {
        let degenerate = system.degenerate_rows();
        if !degenerate.is_empty() {
            let rows: Vec<usize> = degenerate.iter().map(|row| row + 1).collect();
            log::warn!(
                "{} restriction row(s) without nonzero coefficients will never be corrected: \
                 {rows:?}",
                rows.len()
            );
        }
        log::debug!(
            "compiled {} restrictions ({} equalities) on {} variables with {} nonzeros",
            system.nrows(),
            system.neq(),
            system.ncols(),
            system.nnz()
        );
        Self { system }
    }

    pub fn system(&self) -> &RestrictionSystem {
        &self.system
    }

    /// Number of variables referenced by the restrictions.
    pub fn nvar(&self) -> usize {
        self.system.ncols()
    }

    pub fn nconstraints(&self) -> usize {
        self.system.nrows()
    }

    pub fn neq(&self) -> usize {
        self.system.neq()
    }

    /// Projects `x` onto the restrictions in the metric `diag(w)`.
    ///
    /// `w` defaults to all ones. The returned estimate is a fresh vector.
    pub fn solve(
        &self,
        x: &[f64],
        w: Option<&[f64]>,
        options: &SpaOptions,
    ) -> Result<SpaResult, SolveError> {
        self.solve_with_reporter(x, w, options, None)
    }

    /// Like [`solve`](Self::solve) with per-pass reports sent to `reporter`.
    pub fn solve_with_reporter(
        &self,
        x: &[f64],
        w: Option<&[f64]>,
        options: &SpaOptions,
        reporter: Option<&mut dyn Reporter>,
    ) -> Result<SpaResult, SolveError> {
        validate(&self.system, x, w, options)?;
        let mut estimate = x.to_vec();
        let stats = run(&self.system, x, &mut estimate, Weights(w), options, reporter);
        Ok(SpaResult::new(estimate, stats))
    }

    /// Projects `x` and writes the estimate into `out` (same length as `x`).
    pub fn solve_in_place(
        &self,
        x: &[f64],
        out: &mut [f64],
        w: Option<&[f64]>,
        options: &SpaOptions,
        reporter: Option<&mut dyn Reporter>,
    ) -> Result<SpaStats, SolveError> {
        validate(&self.system, x, w, options)?;
        if out.len() != x.len() {
            return Err(SolveError::OutputLen {
                expected: x.len(),
                actual: out.len(),
            });
        }
        out.copy_from_slice(x);
        Ok(run(&self.system, x, out, Weights(w), options, reporter))
    }

    /// L-infinity violation of `x` against the restrictions.
    ///
    /// `x` must have the same shape [`solve`](Self::solve) accepts.
    pub fn residual(&self, x: &[f64]) -> Result<f64, SolveError> {
        check_width(&self.system, x)?;
        Ok(self.system.residual(x))
    }
}

impl From<RestrictionSystem> for CompiledRestrictions {
    fn from(system: RestrictionSystem) -> Self {
        Self::new(system)
    }
}

impl fmt::Display for CompiledRestrictions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nrows = self.system.nrows();
        let neq = self.system.neq();
        write!(
            f,
            "linear restriction system: {nrows} rows ({neq} equalities, {} inequalities)",
            nrows - neq
        )?;
        write!(
            f,
            " on {} variables, {} nonzeros",
            self.system.ncols(),
            self.system.nnz()
        )?;
        let degenerate = self.system.degenerate_rows().len();
        if degenerate > 0 {
            write!(f, ", {degenerate} degenerate")?;
        }
        Ok(())
    }
}
