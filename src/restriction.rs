use core::fmt;
use core::ops::Range;

use faer_core::sparse::SparseColMatRef;
use faer_core::MatRef;

/// Whether a restriction row is `a·x = b` or `a·x <= b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Equality,
    Inequality,
}

/// Borrowed view of one normalized restriction row.
#[derive(Debug, Clone, Copy)]
pub struct RowRef<'a> {
    /// Zero-based, strictly increasing column indices.
    pub cols: &'a [usize],
    /// Nonzero coefficients aligned with `cols`.
    pub values: &'a [f64],
    pub rhs: f64,
    pub kind: RowKind,
}

/// Validation errors raised while normalizing a restriction system.
///
/// Row and column numbers in the variants are 1-based, as supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum RestrictionError {
    /// The system declares no rows.
    EmptySystem,
    /// `b` does not have one entry per declared row.
    RhsLen { expected: usize, actual: usize },
    /// `neq` exceeds the number of rows.
    NeqTooLarge { neq: usize, nrows: usize },
    /// A triplet refers to row 0 or to a row beyond `b`.
    RowIndexOutOfBounds { entry: usize, row: usize, nrows: usize },
    /// A triplet refers to column 0.
    ColIndexOutOfBounds { entry: usize, col: usize },
    /// A coefficient is NaN or infinite (possibly after summing duplicates).
    NonFiniteCoefficient { row: usize, col: usize },
    /// A right-hand side is NaN or infinite.
    NonFiniteRhs { row: usize },
    /// Storage for the normalized rows could not be allocated.
    Alloc,
}

impl fmt::Display for RestrictionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptySystem => write!(f, "restriction system has no rows"),
            Self::RhsLen { expected, actual } => {
                write!(f, "b length {actual} does not match number of rows {expected}")
            }
            Self::NeqTooLarge { neq, nrows } => {
                write!(f, "neq {neq} exceeds number of rows {nrows}")
            }
            Self::RowIndexOutOfBounds { entry, row, nrows } => {
                write!(f, "row index {row} of entry {entry} is outside 1..={nrows}")
            }
            Self::ColIndexOutOfBounds { entry, col } => {
                write!(f, "column index {col} of entry {entry} must be at least 1")
            }
            Self::NonFiniteCoefficient { row, col } => {
                write!(f, "coefficient at ({row},{col}) is not finite")
            }
            Self::NonFiniteRhs { row } => write!(f, "b[{row}] is not finite"),
            Self::Alloc => write!(f, "allocation of restriction storage failed"),
        }
    }
}

impl std::error::Error for RestrictionError {}

/// Row-compressed linear restriction system.
///
/// Rows `0..neq` are equalities `a·x = b`, the remaining rows inequalities
/// `a·x <= b`. Column indices within a row are sorted, unique, and carry
/// nonzero coefficients only. The value is never mutated after construction.
#[derive(Debug, Clone)]
pub struct RestrictionSystem {
    ncols: usize,
    fixed_width: bool,
    neq: usize,
    row_ptrs: Vec<usize>,
    col_indices: Vec<usize>,
    values: Vec<f64>,
    rhs: Vec<f64>,
    row_scales: Vec<f64>,
    degenerate: Vec<usize>,
}

impl RestrictionSystem {
    /// Normalizes a dense `nrows × ncols` coefficient matrix.
    ///
    /// Literal zero coefficients are dropped; the variable count is `a.ncols()`.
    pub fn from_dense(
        a: MatRef<'_, f64>,
        b: &[f64],
        neq: usize,
    ) -> Result<Self, RestrictionError> {
        let nrows = a.nrows();
        let ncols = a.ncols();
        check_shape(nrows, b, neq)?;

        let mut nnz = 0usize;
        for i in 0..nrows {
            for j in 0..ncols {
                let value = a.read(i, j);
                if !value.is_finite() {
                    return Err(RestrictionError::NonFiniteCoefficient {
                        row: i + 1,
                        col: j + 1,
                    });
                }
                if value != 0.0 {
                    nnz += 1;
                }
            }
        }

        let mut row_ptrs = try_with_capacity(nrows + 1)?;
        let mut col_indices = try_with_capacity(nnz)?;
        let mut values = try_with_capacity(nnz)?;
        row_ptrs.push(0);
        for i in 0..nrows {
            for j in 0..ncols {
                let value = a.read(i, j);
                if value != 0.0 {
                    col_indices.push(j);
                    values.push(value);
                }
            }
            row_ptrs.push(col_indices.len());
        }

        Self::finish(ncols, true, neq, row_ptrs, col_indices, values, b)
    }

    /// Normalizes 1-based `(row, col, coef)` triplets.
    ///
    /// The number of rows is `b.len()` and the variable count is the largest
    /// column referenced. Duplicate `(row, col)` pairs are summed and entries
    /// whose sum is exactly zero are dropped.
    pub fn from_triplets(
        triplets: &[(usize, usize, f64)],
        b: &[f64],
        neq: usize,
    ) -> Result<Self, RestrictionError> {
        let nrows = b.len();
        check_shape(nrows, b, neq)?;

        let mut ncols = 0;
        for (entry, &(row, col, value)) in triplets.iter().enumerate() {
            if row == 0 || row > nrows {
                return Err(RestrictionError::RowIndexOutOfBounds {
                    entry: entry + 1,
                    row,
                    nrows,
                });
            }
            if col == 0 {
                return Err(RestrictionError::ColIndexOutOfBounds {
                    entry: entry + 1,
                    col,
                });
            }
            if !value.is_finite() {
                return Err(RestrictionError::NonFiniteCoefficient { row, col });
            }
            ncols = ncols.max(col);
        }

        let entries = triplets
            .iter()
            .map(|&(row, col, value)| (row - 1, col - 1, value));
        let (row_ptrs, col_indices, values) = assemble(nrows, triplets.len(), entries)?;
        Self::finish(ncols, false, neq, row_ptrs, col_indices, values, b)
    }

    /// Normalizes a zero-based column-compressed matrix as produced by faer.
    ///
    /// Duplicate entries within a column are summed like triplets; the
    /// variable count is `a.ncols()`.
    pub fn from_csc(
        a: SparseColMatRef<'_, usize, f64>,
        b: &[f64],
        neq: usize,
    ) -> Result<Self, RestrictionError> {
        let nrows = a.nrows();
        let ncols = a.ncols();
        check_shape(nrows, b, neq)?;

        let symbolic = a.symbolic();
        let col_ptrs = symbolic.col_ptrs();
        let nnz_per_col = symbolic.nnz_per_col();
        let row_indices = symbolic.row_indices();
        let all_values = a.values();
        let col_range = |col: usize| -> Range<usize> {
            let start = col_ptrs[col];
            match nnz_per_col {
                Some(nnz) => start..start + nnz[col],
                None => start..col_ptrs[col + 1],
            }
        };

        let mut count = 0;
        for col in 0..ncols {
            for idx in col_range(col) {
                if !all_values[idx].is_finite() {
                    return Err(RestrictionError::NonFiniteCoefficient {
                        row: row_indices[idx] + 1,
                        col: col + 1,
                    });
                }
                count += 1;
            }
        }

        let entries = (0..ncols).flat_map(|col| {
            col_range(col).map(move |idx| (row_indices[idx], col, all_values[idx]))
        });
        let (row_ptrs, col_indices, values) = assemble(nrows, count, entries)?;
        Self::finish(ncols, true, neq, row_ptrs, col_indices, values, b)
    }

    fn finish(
        ncols: usize,
        fixed_width: bool,
        neq: usize,
        row_ptrs: Vec<usize>,
        col_indices: Vec<usize>,
        values: Vec<f64>,
        b: &[f64],
    ) -> Result<Self, RestrictionError> {
        let mut rhs = try_with_capacity(b.len())?;
        rhs.extend_from_slice(b);

        let mut row_scales = try_with_capacity(b.len())?;
        for row in 0..b.len() {
            let scale = values[row_ptrs[row]..row_ptrs[row + 1]]
                .iter()
                .fold(0.0, |acc: f64, v| acc.max(v.abs()));
            row_scales.push(scale);
        }

        let degenerate = (0..b.len())
            .filter(|&row| row_ptrs[row] == row_ptrs[row + 1])
            .collect();

        Ok(Self {
            ncols,
            fixed_width,
            neq,
            row_ptrs,
            col_indices,
            values,
            rhs,
            row_scales,
            degenerate,
        })
    }

    /// Number of restriction rows.
    pub fn nrows(&self) -> usize {
        self.rhs.len()
    }

    /// Number of variables the rows refer to.
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Whether a start vector must have exactly `ncols` entries.
    ///
    /// Dense and CSC input declare their width; triplet input only bounds it
    /// from below, so longer vectors carry unconstrained trailing variables.
    pub fn has_fixed_width(&self) -> bool {
        self.fixed_width
    }

    /// Number of leading equality rows.
    pub fn neq(&self) -> usize {
        self.neq
    }

    /// Number of stored nonzero coefficients.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn is_equality(&self, row: usize) -> bool {
        row < self.neq
    }

    /// Zero-based rows with no nonzero coefficient.
    ///
    /// Projection cannot move such a row; it still counts towards the residual
    /// whenever its right-hand side makes it unsatisfiable.
    pub fn degenerate_rows(&self) -> &[usize] {
        &self.degenerate
    }

    pub fn row_ptrs(&self) -> &[usize] {
        &self.row_ptrs
    }

    pub fn col_indices(&self) -> &[usize] {
        &self.col_indices
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn rhs(&self) -> &[f64] {
        &self.rhs
    }

    /// Largest |coefficient| per row; 0 for degenerate rows.
    pub fn row_scales(&self) -> &[f64] {
        &self.row_scales
    }

    /// Index range into `col_indices` / `values` for the given row.
    pub fn row_range(&self, row: usize) -> Range<usize> {
        self.row_ptrs[row]..self.row_ptrs[row + 1]
    }

    pub fn row(&self, row: usize) -> RowRef<'_> {
        let range = self.row_range(row);
        RowRef {
            cols: &self.col_indices[range.clone()],
            values: &self.values[range],
            rhs: self.rhs[row],
            kind: if self.is_equality(row) {
                RowKind::Equality
            } else {
                RowKind::Inequality
            },
        }
    }

    pub fn rows(&self) -> impl Iterator<Item = RowRef<'_>> + '_ {
        (0..self.nrows()).map(move |row| self.row(row))
    }

    /// `a_row · x - b_row`.
    pub fn violation(&self, row: usize, x: &[f64]) -> f64 {
        let range = self.row_range(row);
        let mut sum = 0.0;
        for (&col, &value) in self.col_indices[range.clone()]
            .iter()
            .zip(&self.values[range])
        {
            sum += value * x[col];
        }
        sum - self.rhs[row]
    }

    /// L-infinity violation of `x`: `|a·x - b|` over equalities and
    /// `max(a·x - b, 0)` over inequalities. NaN propagates.
    pub fn residual(&self, x: &[f64]) -> f64 {
        let mut max: f64 = 0.0;
        for row in 0..self.nrows() {
            let v = self.violation(row, x);
            if v.is_nan() {
                return f64::NAN;
            }
            let v = if self.is_equality(row) { v.abs() } else { v.max(0.0) };
            if v > max {
                max = v;
            }
        }
        max
    }

    pub(crate) fn max_abs_rhs(&self) -> f64 {
        self.rhs.iter().fold(0.0, |acc: f64, v| acc.max(v.abs()))
    }
}

fn check_shape(nrows: usize, b: &[f64], neq: usize) -> Result<(), RestrictionError> {
    if nrows == 0 {
        return Err(RestrictionError::EmptySystem);
    }
    if b.len() != nrows {
        return Err(RestrictionError::RhsLen {
            expected: nrows,
            actual: b.len(),
        });
    }
    if neq > nrows {
        return Err(RestrictionError::NeqTooLarge { neq, nrows });
    }
    if let Some(row) = b.iter().position(|v| !v.is_finite()) {
        return Err(RestrictionError::NonFiniteRhs { row: row + 1 });
    }
    Ok(())
}

fn try_with_capacity<T>(len: usize) -> Result<Vec<T>, RestrictionError> {
    let mut out = Vec::new();
    out.try_reserve_exact(len)
        .map_err(|_| RestrictionError::Alloc)?;
    Ok(out)
}

/// Buckets zero-based `(row, col, value)` entries by row, then sorts each row
/// by column, sums duplicates and drops exact zeros.
fn assemble<I>(
    nrows: usize,
    count: usize,
    entries: I,
) -> Result<(Vec<usize>, Vec<usize>, Vec<f64>), RestrictionError>
where
    I: Iterator<Item = (usize, usize, f64)> + Clone,
{
    let mut cursor: Vec<usize> = try_with_capacity(nrows + 1)?;
    cursor.resize(nrows + 1, 0);
    for (row, _, _) in entries.clone() {
        cursor[row + 1] += 1;
    }
    for row in 0..nrows {
        cursor[row + 1] += cursor[row];
    }

    let mut bucket: Vec<(usize, f64)> = try_with_capacity(count)?;
    bucket.resize(count, (0, 0.0));
    for (row, col, value) in entries {
        bucket[cursor[row]] = (col, value);
        cursor[row] += 1;
    }
    // cursor[row] now holds the end of the row, i.e. the start of row + 1.

    let mut row_ptrs = try_with_capacity(nrows + 1)?;
    let mut col_indices = try_with_capacity(count)?;
    let mut values = try_with_capacity(count)?;
    row_ptrs.push(0);
    let mut start = 0;
    for row in 0..nrows {
        let end = cursor[row];
        let slice = &mut bucket[start..end];
        slice.sort_unstable_by_key(|&(col, _)| col);

        let mut idx = 0;
        while idx < slice.len() {
            let col = slice[idx].0;
            let mut sum = 0.0;
            while idx < slice.len() && slice[idx].0 == col {
                sum += slice[idx].1;
                idx += 1;
            }
            if !sum.is_finite() {
                return Err(RestrictionError::NonFiniteCoefficient {
                    row: row + 1,
                    col: col + 1,
                });
            }
            if sum != 0.0 {
                col_indices.push(col);
                values.push(sum);
            }
        }
        row_ptrs.push(col_indices.len());
        start = end;
    }

    Ok((row_ptrs, col_indices, values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer_core::mat;

    #[test]
    fn triplets_sum_duplicates_and_drop_zeros() {
        let triplets = [
            (1, 2, 1.0),
            (1, 1, 2.0),
            (1, 2, 0.5),
            (2, 1, 1.0),
            (2, 1, -1.0),
            (2, 3, 4.0),
        ];
        let system = RestrictionSystem::from_triplets(&triplets, &[1.0, 2.0], 1).unwrap();
        assert_eq!(system.nrows(), 2);
        assert_eq!(system.ncols(), 3);
        assert_eq!(system.row(0).cols, &[0, 1]);
        assert_eq!(system.row(0).values, &[2.0, 1.5]);
        assert_eq!(system.row(0).kind, RowKind::Equality);
        assert_eq!(system.row(1).cols, &[2]);
        assert_eq!(system.row(1).values, &[4.0]);
        assert_eq!(system.row(1).kind, RowKind::Inequality);
        assert!(system.degenerate_rows().is_empty());
    }

    #[test]
    fn dense_matches_triplets() {
        let data = [1.0, -1.0, 0.0, -1.0, -1.0, 3.0];
        let a = mat::from_row_major_slice::<f64>(&data, 2, 3);
        let dense = RestrictionSystem::from_dense(a, &[0.0, -1.0], 0).unwrap();
        let sparse = RestrictionSystem::from_triplets(
            &[(2, 3, 3.0), (1, 1, 1.0), (2, 1, -1.0), (1, 2, -1.0), (2, 2, -1.0)],
            &[0.0, -1.0],
            0,
        )
        .unwrap();
        assert_eq!(dense.row_ptrs(), sparse.row_ptrs());
        assert_eq!(dense.col_indices(), sparse.col_indices());
        assert_eq!(dense.values(), sparse.values());
        for (d, s) in dense.rows().zip(sparse.rows()) {
            assert_eq!(d.rhs, s.rhs);
            assert_eq!(d.kind, RowKind::Inequality);
        }
        assert!(dense.has_fixed_width());
        assert!(!sparse.has_fixed_width());
    }

    #[test]
    fn cancelled_row_is_degenerate() {
        let triplets = [(1, 1, 1.0), (2, 2, 1.0), (2, 2, -1.0)];
        let system = RestrictionSystem::from_triplets(&triplets, &[1.0, 0.0], 0).unwrap();
        assert_eq!(system.degenerate_rows(), &[1]);
        assert!(system.row(1).cols.is_empty());
        assert_eq!(system.row_scales(), &[1.0, 0.0]);
    }

    #[test]
    fn extreme_coefficients_are_not_degenerate() {
        let triplets = [(1, 1, 1e200), (1, 2, -3e200), (2, 2, 1e-200)];
        let system = RestrictionSystem::from_triplets(&triplets, &[1.0, 0.0], 0).unwrap();
        assert!(system.degenerate_rows().is_empty());
        assert_eq!(system.row_scales(), &[3e200, 1e-200]);
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(
            RestrictionSystem::from_triplets(&[], &[], 0).unwrap_err(),
            RestrictionError::EmptySystem
        );
        assert_eq!(
            RestrictionSystem::from_triplets(&[(0, 1, 1.0)], &[1.0], 0).unwrap_err(),
            RestrictionError::RowIndexOutOfBounds { entry: 1, row: 0, nrows: 1 }
        );
        assert_eq!(
            RestrictionSystem::from_triplets(&[(1, 1, 1.0), (2, 1, 1.0)], &[1.0], 0).unwrap_err(),
            RestrictionError::RowIndexOutOfBounds { entry: 2, row: 2, nrows: 1 }
        );
        assert_eq!(
            RestrictionSystem::from_triplets(&[(1, 0, 1.0)], &[1.0], 0).unwrap_err(),
            RestrictionError::ColIndexOutOfBounds { entry: 1, col: 0 }
        );
        assert_eq!(
            RestrictionSystem::from_triplets(&[(1, 1, 1.0)], &[1.0], 2).unwrap_err(),
            RestrictionError::NeqTooLarge { neq: 2, nrows: 1 }
        );
        assert_eq!(
            RestrictionSystem::from_triplets(&[(1, 1, f64::NAN)], &[1.0], 0).unwrap_err(),
            RestrictionError::NonFiniteCoefficient { row: 1, col: 1 }
        );

        let data = [1.0, 1.0];
        let a = mat::from_row_major_slice::<f64>(&data, 1, 2);
        assert_eq!(
            RestrictionSystem::from_dense(a, &[1.0, 2.0], 0).unwrap_err(),
            RestrictionError::RhsLen { expected: 1, actual: 2 }
        );
        assert_eq!(
            RestrictionSystem::from_dense(a, &[f64::INFINITY], 0).unwrap_err(),
            RestrictionError::NonFiniteRhs { row: 1 }
        );
    }

    #[test]
    fn residual_counts_equalities_both_ways() {
        let system =
            RestrictionSystem::from_triplets(&[(1, 1, 1.0), (2, 2, 1.0)], &[1.0, 1.0], 1).unwrap();
        assert_eq!(system.residual(&[0.5, 0.0]), 0.5);
        assert_eq!(system.residual(&[1.5, 0.0]), 0.5);
        assert_eq!(system.residual(&[1.0, 3.0]), 2.0);
        assert_eq!(system.residual(&[1.0, -3.0]), 0.0);
    }
}
