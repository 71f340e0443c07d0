use core::fmt;
use std::time::Duration;

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets};

/// Terminal state of a projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// Every restriction holds within `eps`.
    Converged,
    /// Working storage could not be allocated; no pass was run.
    AllocationFailed,
    /// The estimate or residual left the numerically reasonable range.
    Diverged,
    /// `max_iter` passes ran without convergence.
    IterationLimit,
}

impl SolveStatus {
    /// Integer status code: 0 converged, 1 allocation failure, 2 divergence,
    /// 3 iteration limit.
    pub fn code(self) -> i32 {
        match self {
            Self::Converged => 0,
            Self::AllocationFailed => 1,
            Self::Diverged => 2,
            Self::IterationLimit => 3,
        }
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Converged => "converged",
            Self::AllocationFailed => "allocation failed",
            Self::Diverged => "diverged",
            Self::IterationLimit => "iteration limit reached",
        };
        f.write_str(text)
    }
}

/// Summary of a solve that wrote its estimate into a caller buffer.
#[derive(Debug, Clone)]
pub struct SpaStats {
    pub status: SolveStatus,
    /// Completed passes over all rows.
    pub iterations: usize,
    /// L-infinity violation of the final estimate.
    pub tol: f64,
    /// `sum_j w_j (x0_j - x_j)^2`.
    pub objective: f64,
    pub duration: Duration,
}

/// Owned outcome of a projection.
///
/// `x` always holds the last estimate, also when `status` is not
/// [`SolveStatus::Converged`].
#[derive(Debug, Clone)]
pub struct SpaResult {
    pub x: Vec<f64>,
    pub status: SolveStatus,
    /// L-infinity violation of `x`; infinite when the restrictions could not
    /// even be stored.
    pub tol: f64,
    pub iterations: usize,
    pub duration: Duration,
    pub objective: f64,
}

impl SpaResult {
    pub(crate) fn new(x: Vec<f64>, stats: SpaStats) -> Self {
        Self {
            x,
            status: stats.status,
            tol: stats.tol,
            iterations: stats.iterations,
            duration: stats.duration,
            objective: stats.objective,
        }
    }

    pub fn is_converged(&self) -> bool {
        self.status == SolveStatus::Converged
    }
}

#[derive(Debug, Clone)]
pub struct IterationReport {
    pub iteration: usize,
    /// L-infinity violation after the pass.
    pub residual: f64,
    /// Rows projected during the pass.
    pub corrections: usize,
    /// Largest |v_i / sum_j a_ij^2 / w_j| applied during the pass.
    pub step_inf: f64,
    pub x_inf: f64,
}

pub(crate) fn emit_line(line: &str) {
    if log::log_enabled!(log::Level::Info) {
        log::info!("{line}");
    } else {
        println!("{line}");
    }
}

pub trait Reporter {
    fn on_iteration(&mut self, report: &IterationReport);
    fn on_finish(&mut self) {}
}

/// Collects pass reports and prints them as a table when the solve ends.
pub struct StdoutReporter {
    rows: Vec<IterationReport>,
}

impl StdoutReporter {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }
}

impl Default for StdoutReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for StdoutReporter {
    fn on_iteration(&mut self, report: &IterationReport) {
        self.rows.push(report.clone());
    }

    fn on_finish(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        if !log::log_enabled!(log::Level::Info) {
            println!();
        }
        let mut table = Table::new();
        table.load_preset(presets::UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            Cell::new("pass").set_alignment(CellAlignment::Right),
            Cell::new("residual").set_alignment(CellAlignment::Right),
            Cell::new("corrections").set_alignment(CellAlignment::Right),
            Cell::new("step").set_alignment(CellAlignment::Right),
            Cell::new("|x|").set_alignment(CellAlignment::Right),
        ]);
        for row in &self.rows {
            table.add_row(vec![
                Cell::new(row.iteration).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.4e}", row.residual)).set_alignment(CellAlignment::Right),
                Cell::new(row.corrections).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.1e}", row.step_inf)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.3e}", row.x_inf)).set_alignment(CellAlignment::Right),
            ]);
        }

        for line in table.to_string().lines() {
            emit_line(line);
        }
        self.rows.clear();
    }
}
