use core::fmt;

use dyn_stack::{GlobalPodBuffer, PodStack, StackReq};
use std::time::{Duration, Instant};

use crate::report::{emit_line, IterationReport, Reporter, SolveStatus, SpaStats, StdoutReporter};
use crate::restriction::RestrictionSystem;

/// Default convergence tolerance on the L-infinity violation.
pub const DEFAULT_EPS: f64 = 1e-8;
/// Default number of passes over all rows.
pub const DEFAULT_MAX_ITER: usize = 1000;
/// Default growth factor after which a solve is declared diverged.
pub const DEFAULT_DIVERGENCE_BOUND: f64 = 1e12;

/// Errors specific to a solve call.
///
/// Indices are 1-based.
#[derive(Debug, Clone, PartialEq)]
pub enum SolveError {
    /// The start vector does not fit the restriction system.
    DimensionMismatch { expected: usize, actual: usize },
    /// The weight vector length differs from the start vector length.
    WeightLen { expected: usize, actual: usize },
    /// A weight is zero, negative or NaN.
    NonPositiveWeight { index: usize, value: f64 },
    /// A weight is infinite.
    NonFiniteWeight { index: usize },
    /// A start vector entry is NaN or infinite.
    NonFiniteStart { index: usize },
    /// `eps` is negative or NaN.
    InvalidTolerance { eps: f64 },
    /// The output buffer length differs from the start vector length.
    OutputLen { expected: usize, actual: usize },
}

impl fmt::Display for SolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DimensionMismatch { expected, actual } => {
                write!(f, "x length {actual} does not match expected {expected}")
            }
            Self::WeightLen { expected, actual } => {
                write!(f, "w length {actual} does not match x length {expected}")
            }
            Self::NonPositiveWeight { index, value } => {
                write!(f, "weight w[{index}] = {value} is not positive")
            }
            Self::NonFiniteWeight { index } => write!(f, "weight w[{index}] is not finite"),
            Self::NonFiniteStart { index } => write!(f, "x[{index}] is not finite"),
            Self::InvalidTolerance { eps } => {
                write!(f, "tolerance eps = {eps} must be a non-negative number")
            }
            Self::OutputLen { expected, actual } => {
                write!(f, "output length {actual} does not match x length {expected}")
            }
        }
    }
}

impl std::error::Error for SolveError {}

/// Options controlling the successive projection loop.
#[derive(Debug, Clone)]
pub struct SpaOptions {
    /// Converge when the L-infinity violation is <= eps. Inequality rows
    /// violated by no more than eps are left alone.
    pub eps: f64,
    /// Maximum number of full passes over the rows.
    pub max_iter: usize,
    /// Diverge when ||x||_inf > divergence_bound * max(1, ||x0||_inf, ||b||_inf).
    pub divergence_bound: f64,
    /// Emit a per-pass table and the elapsed time through `log`/stdout.
    pub verbose: bool,
}

impl Default for SpaOptions {
    fn default() -> Self {
        Self {
            eps: DEFAULT_EPS,
            max_iter: DEFAULT_MAX_ITER,
            divergence_bound: DEFAULT_DIVERGENCE_BOUND,
            verbose: false,
        }
    }
}

/// Diagonal of the metric; `None` stands for unit weights.
#[derive(Clone, Copy)]
pub(crate) struct Weights<'a>(pub(crate) Option<&'a [f64]>);

impl Weights<'_> {
    #[inline]
    fn get(&self, j: usize) -> f64 {
        match self.0 {
            Some(w) => w[j],
            None => 1.0,
        }
    }
}

/// Checks a start vector and weights against a restriction system.
pub(crate) fn validate(
    system: &RestrictionSystem,
    x: &[f64],
    w: Option<&[f64]>,
    options: &SpaOptions,
) -> Result<(), SolveError> {
    check_width(system, x)?;
    validate_point(x, w, options)
}

/// Dense and CSC systems need exactly `ncols` entries, triplet systems at least `ncols`.
pub(crate) fn check_width(system: &RestrictionSystem, x: &[f64]) -> Result<(), SolveError> {
    let ncols = system.ncols();
    if x.len() < ncols || (system.has_fixed_width() && x.len() != ncols) {
        return Err(SolveError::DimensionMismatch {
            expected: ncols,
            actual: x.len(),
        });
    }
    Ok(())
}

/// Checks everything that does not depend on the restriction system.
pub(crate) fn validate_point(
    x: &[f64],
    w: Option<&[f64]>,
    options: &SpaOptions,
) -> Result<(), SolveError> {
    if !(options.eps >= 0.0) {
        return Err(SolveError::InvalidTolerance { eps: options.eps });
    }
    if let Some(index) = x.iter().position(|v| !v.is_finite()) {
        return Err(SolveError::NonFiniteStart { index: index + 1 });
    }
    if let Some(w) = w {
        if w.len() != x.len() {
            return Err(SolveError::WeightLen {
                expected: x.len(),
                actual: w.len(),
            });
        }
        for (index, &value) in w.iter().enumerate() {
            if !(value > 0.0) {
                return Err(SolveError::NonPositiveWeight {
                    index: index + 1,
                    value,
                });
            }
            if value.is_infinite() {
                return Err(SolveError::NonFiniteWeight { index: index + 1 });
            }
        }
    }
    Ok(())
}

enum ReporterSlot<'a> {
    External(&'a mut dyn Reporter),
    Local(StdoutReporter),
    None,
}

impl<'a> ReporterSlot<'a> {
    fn new(reporter: Option<&'a mut dyn Reporter>, verbose: bool) -> Self {
        match reporter {
            Some(r) => Self::External(r),
            None if verbose => Self::Local(StdoutReporter::new()),
            None => Self::None,
        }
    }

    fn as_mut(&mut self) -> Option<&mut dyn Reporter> {
        match self {
            Self::External(r) => Some(*r),
            Self::Local(r) => Some(r),
            Self::None => None,
        }
    }
}

/// Runs successive projection on `x` in place.
///
/// `x0` is the start point (used for the objective and the divergence scale);
/// `x` must hold a copy of it on entry and holds the last estimate on return.
/// Inputs are assumed validated.
pub(crate) fn run(
    system: &RestrictionSystem,
    x0: &[f64],
    x: &mut [f64],
    w: Weights<'_>,
    options: &SpaOptions,
    reporter: Option<&mut dyn Reporter>,
) -> SpaStats {
    let start = Instant::now();
    let mut reporter = ReporterSlot::new(reporter, options.verbose);
    let nrows = system.nrows();

    // One projection denominator sum_j (a_ij / s_i)^2 / w_j per row, with s_i the
    // row scale, so huge or tiny coefficients neither overflow nor vanish.
    let mut buffer = match StackReq::try_new::<f64>(nrows)
        .ok()
        .and_then(|req| GlobalPodBuffer::try_new(req).ok())
    {
        Some(buffer) => buffer,
        None => {
            log::debug!("could not allocate workspace for {nrows} rows");
            let stats = SpaStats {
                status: SolveStatus::AllocationFailed,
                iterations: 0,
                tol: system.residual(x),
                objective: 0.0,
                duration: Duration::ZERO,
            };
            return finish_stats(stats, start, options.verbose, &mut reporter);
        }
    };
    let stack = PodStack::new(&mut buffer);
    let (denominators, _) = stack.make_raw::<f64>(nrows);
    compute_denominators(denominators, system, w);

    let scale = max_abs(x0).max(system.max_abs_rhs()).max(1.0);
    let bound = options.divergence_bound * scale;

    let mut iterations = 0;
    let mut corrections = 0;
    let mut step_inf = 0.0;
    let (status, tol) = loop {
        let tol = system.residual(x);
        let x_inf = max_abs(x);

        if iterations > 0 {
            if let Some(reporter) = reporter.as_mut() {
                reporter.on_iteration(&IterationReport {
                    iteration: iterations,
                    residual: tol,
                    corrections,
                    step_inf,
                    x_inf,
                });
            }
        }

        if tol <= options.eps {
            break (SolveStatus::Converged, tol);
        }
        if !tol.is_finite() || !(x_inf <= bound) {
            break (SolveStatus::Diverged, tol);
        }
        if iterations >= options.max_iter {
            break (SolveStatus::IterationLimit, tol);
        }

        (corrections, step_inf) = sweep(system, denominators, x, w, options.eps);
        iterations += 1;
    };

    let stats = SpaStats {
        status,
        iterations,
        tol,
        objective: objective(x0, x, w),
        duration: start.elapsed(),
    };
    log::debug!(
        "projection {status} after {iterations} passes (tol {tol:.3e}, objective {:.3e})",
        stats.objective
    );
    finish_stats(stats, start, options.verbose, &mut reporter)
}

fn compute_denominators(out: &mut [f64], system: &RestrictionSystem, w: Weights<'_>) {
    let cols = system.col_indices();
    let values = system.values();
    let scales = system.row_scales();
    for (row, slot) in out.iter_mut().enumerate() {
        let mut sum = 0.0;
        for idx in system.row_range(row) {
            let a = values[idx] / scales[row];
            sum += a * a / w.get(cols[idx]);
        }
        *slot = sum;
    }
}

/// One pass over all rows in order. Returns the number of projections and
/// the largest step multiplier applied.
fn sweep(
    system: &RestrictionSystem,
    denominators: &[f64],
    x: &mut [f64],
    w: Weights<'_>,
    eps: f64,
) -> (usize, f64) {
    let cols = system.col_indices();
    let values = system.values();
    let rhs = system.rhs();
    let scales = system.row_scales();
    let neq = system.neq();

    let mut corrections = 0;
    let mut step_inf: f64 = 0.0;
    for (row, &denominator) in denominators.iter().enumerate() {
        let range = system.row_range(row);
        // Degenerate rows cannot be moved by projection.
        if range.is_empty() {
            continue;
        }
        // Everything below works on the row divided by its scale; the
        // correction v * a_j / (w_j * sum a^2 / w) is invariant under it.
        let scale = scales[row];
        let mut dot = 0.0;
        for idx in range.clone() {
            dot += values[idx] / scale * x[cols[idx]];
        }
        let violation = dot - rhs[row] / scale;
        let needs_correction = if row < neq {
            violation != 0.0
        } else {
            violation > eps / scale
        };
        if !needs_correction {
            continue;
        }

        let step = violation / denominator;
        for idx in range {
            let col = cols[idx];
            x[col] -= step * (values[idx] / scale) / w.get(col);
        }
        corrections += 1;
        step_inf = step_inf.max((step / scale).abs());
    }
    (corrections, step_inf)
}

fn objective(x0: &[f64], x: &[f64], w: Weights<'_>) -> f64 {
    let mut sum = 0.0;
    for (j, (a, b)) in x0.iter().zip(x.iter()).enumerate() {
        let d = a - b;
        sum += w.get(j) * d * d;
    }
    sum
}

/// Largest absolute entry; NaN if any entry is NaN.
fn max_abs(x: &[f64]) -> f64 {
    let mut max = 0.0;
    for &v in x {
        let v = v.abs();
        if v.is_nan() {
            return f64::NAN;
        }
        if v > max {
            max = v;
        }
    }
    max
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs >= 1.0 {
        format!("{:.3} s", secs)
    } else if secs >= 1e-3 {
        format!("{:.3} ms", secs * 1e3)
    } else if secs >= 1e-6 {
        format!("{:.3} us", secs * 1e6)
    } else {
        format!("{:.0} ns", secs * 1e9)
    }
}

fn finish_stats(
    stats: SpaStats,
    start: Instant,
    verbose: bool,
    reporter: &mut ReporterSlot<'_>,
) -> SpaStats {
    if let Some(reporter) = reporter.as_mut() {
        reporter.on_finish();
    }
    if verbose {
        let elapsed = format_duration(start.elapsed());
        emit_line(&format!("{} in {elapsed}", stats.status));
    }
    stats
}
