//! Banded linear systems.
//!
//! The collocation Jacobian of the boundary-value solver, the spline slope
//! system and the implicit Feynman-Kac step are all banded. They are factored
//! with Gaussian elimination and partial pivoting restricted to the band, so
//! the cost stays linear in the system size.

use crate::error::{RobustError, Result};

/// Square matrix with `lower` sub-diagonals and `upper` super-diagonals.
///
/// Storage is row-major with room for the `lower` extra super-diagonals that
/// row interchanges can create during factorization.
#[derive(Clone, Debug)]
pub struct BandedMatrix {
    size: usize,
    lower: usize,
    upper: usize,
    width: usize,
    data: Vec<f64>,
}

impl BandedMatrix {
    pub fn zeros(size: usize, lower: usize, upper: usize) -> Self {
        let width = 2 * lower + upper + 1;
        Self {
            size,
            lower,
            upper,
            width,
            data: vec![0.0; size * width],
        }
    }

    /// Builds a tridiagonal matrix from its three diagonals.
    ///
    /// `sub[i]` sits at `(i + 1, i)` and `sup[i]` at `(i, i + 1)`.
    pub fn tridiagonal(sub: &[f64], diag: &[f64], sup: &[f64]) -> Result<Self> {
        let n = diag.len();
        if n == 0 {
            return Err(RobustError::dimension_mismatch("tridiagonal size", 1, 0));
        }
        if sub.len() != n - 1 {
            return Err(RobustError::dimension_mismatch("sub-diagonal", n - 1, sub.len()));
        }
        if sup.len() != n - 1 {
            return Err(RobustError::dimension_mismatch("super-diagonal", n - 1, sup.len()));
        }
        let mut matrix = Self::zeros(n, 1, 1);
        for i in 0..n {
            matrix.set(i, i, diag[i]);
            if i + 1 < n {
                matrix.set(i + 1, i, sub[i]);
                matrix.set(i, i + 1, sup[i]);
            }
        }
        Ok(matrix)
    }

    fn offset(&self, row: usize, col: usize) -> usize {
        debug_assert!(col + self.lower >= row, "({row}, {col}) below the band");
        debug_assert!(col <= row + self.lower + self.upper, "({row}, {col}) above the band");
        row * self.width + (col + self.lower - row)
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        if col + self.lower < row || col > row + self.lower + self.upper {
            return 0.0;
        }
        self.data[self.offset(row, col)]
    }

    /// Writes an entry inside the declared band.
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        debug_assert!(col <= row + self.upper, "({row}, {col}) outside declared band");
        let offset = self.offset(row, col);
        self.data[offset] = value;
    }

    /// Multiplies the matrix with `x`.
    #[cfg(test)]
    fn mul_vec(&self, x: &[f64]) -> Vec<f64> {
        (0..self.size)
            .map(|row| {
                let first = row.saturating_sub(self.lower);
                let last = (row + self.upper).min(self.size - 1);
                (first..=last).map(|col| self.get(row, col) * x[col]).sum()
            })
            .collect()
    }

    /// Factors the matrix in place; `context` names the system in singularity errors.
    pub fn factor(mut self, context: &'static str) -> Result<BandedLu> {
        let n = self.size;
        let kl = self.lower;
        let reach = self.lower + self.upper;
        let mut pivots = Vec::with_capacity(n);
        let mut multipliers = vec![0.0; n * kl.max(1)];

        let scale = self
            .data
            .iter()
            .fold(0.0_f64, |acc, value| acc.max(value.abs()));
        if !scale.is_finite() {
            return Err(RobustError::NumericalError { context });
        }
        let threshold = scale * f64::EPSILON * n as f64;

        for k in 0..n {
            let last_row = (k + kl).min(n - 1);
            let mut pivot = k;
            let mut pivot_abs = self.get(k, k).abs();
            for row in (k + 1)..=last_row {
                let candidate = self.get(row, k).abs();
                if candidate > pivot_abs {
                    pivot = row;
                    pivot_abs = candidate;
                }
            }
            if pivot_abs <= threshold || pivot_abs == 0.0 {
                return Err(RobustError::singular(context));
            }
            pivots.push(pivot);

            let last_col = (k + reach).min(n - 1);
            if pivot != k {
                for col in k..=last_col {
                    let a = self.offset(k, col);
                    let b = self.offset(pivot, col);
                    self.data.swap(a, b);
                }
            }

            let diagonal = self.get(k, k);
            for row in (k + 1)..=last_row {
                let factor = self.get(row, k) / diagonal;
                multipliers[k * kl + (row - k - 1)] = factor;
                if factor == 0.0 {
                    continue;
                }
                let head = self.offset(row, k);
                self.data[head] = 0.0;
                for col in (k + 1)..=last_col {
                    let source = self.get(k, col);
                    let target = self.offset(row, col);
                    self.data[target] -= factor * source;
                }
            }
        }

        Ok(BandedLu {
            factors: self,
            pivots,
            multipliers,
        })
    }
}

/// LU factorization of a [`BandedMatrix`] with partial pivoting.
#[derive(Clone, Debug)]
pub struct BandedLu {
    factors: BandedMatrix,
    pivots: Vec<usize>,
    multipliers: Vec<f64>,
}

impl BandedLu {
    /// Solves `A x = rhs`.
    pub fn solve(&self, rhs: &[f64]) -> Result<Vec<f64>> {
        let n = self.factors.size;
        if rhs.len() != n {
            return Err(RobustError::dimension_mismatch("banded rhs", n, rhs.len()));
        }
        let kl = self.factors.lower;
        let reach = self.factors.lower + self.factors.upper;
        let mut x = rhs.to_vec();

        for k in 0..n {
            x.swap(k, self.pivots[k]);
            let last_row = (k + kl).min(n - 1);
            for row in (k + 1)..=last_row {
                x[row] -= self.multipliers[k * kl + (row - k - 1)] * x[k];
            }
        }

        for row in (0..n).rev() {
            let last_col = (row + reach).min(n - 1);
            let mut acc = x[row];
            for col in (row + 1)..=last_col {
                acc -= self.factors.get(row, col) * x[col];
            }
            x[row] = acc / self.factors.get(row, row);
        }
        Ok(x)
    }
}

/// Solves a tridiagonal system in one call.
pub fn solve_tridiagonal(
    sub: &[f64],
    diag: &[f64],
    sup: &[f64],
    rhs: &[f64],
    context: &'static str,
) -> Result<Vec<f64>> {
    BandedMatrix::tridiagonal(sub, diag, sup)?
        .factor(context)?
        .solve(rhs)
}
