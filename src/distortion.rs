//! Worst-case drift distortions recovered from a matched value function.

use nalgebra::{DMatrix, Vector2};
use serde::{Deserialize, Serialize};

use crate::bvp::{HalfLineOde, HjbOde};
use crate::control::QuadraticControl;
use crate::error::{RobustError, Result};
use crate::grid::StateGrid;
use crate::model::{ModelParameters, CAPITAL_SCALE};

/// Distortion coordinates on the state grid.
///
/// Rows 0 and 1 hold the structured distortion `η_s = σ⁻¹ (s1, s2)`; rows 2
/// and 3 hold the unstructured worst case `η_u = η_s - (1/θ) σᵀ (0.01, v')`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriftDistortion {
    values: DMatrix<f64>,
    s1: Vec<f64>,
    s2: Vec<f64>,
}

impl DriftDistortion {
    /// Assembles a distortion from a `4 × N` array and the controls behind it.
    pub fn new(values: DMatrix<f64>, s1: Vec<f64>, s2: Vec<f64>) -> Result<Self> {
        if values.nrows() != 4 {
            return Err(RobustError::dimension_mismatch("distortion rows", 4, values.nrows()));
        }
        let n = values.ncols();
        for (context, found) in [("s1 controls", s1.len()), ("s2 controls", s2.len())] {
            if found != n {
                return Err(RobustError::dimension_mismatch(context, n, found));
            }
        }
        Ok(Self { values, s1, s2 })
    }

    /// The `4 × N` array `[η_s; η_u]`.
    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.values.ncols() == 0
    }

    /// Structured distortion at grid index `j`.
    pub fn structured(&self, j: usize) -> Vector2<f64> {
        Vector2::new(self.values[(0, j)], self.values[(1, j)])
    }

    /// Worst-case distortion at grid index `j`.
    pub fn worst_case(&self, j: usize) -> Vector2<f64> {
        Vector2::new(self.values[(2, j)], self.values[(3, j)])
    }

    /// Row `row` of the array as an owned vector.
    pub fn row(&self, row: usize) -> Vec<f64> {
        self.values.row(row).iter().copied().collect()
    }

    /// Minimizing capital control on the grid.
    pub fn s1(&self) -> &[f64] {
        &self.s1
    }

    /// Minimizing state control on the grid.
    pub fn s2(&self) -> &[f64] {
        &self.s2
    }
}

/// Computes the distortion field implied by the slopes `dv` of a matched solution.
pub fn drift_distortion(
    control: &QuadraticControl<'_>,
    grid: &StateGrid,
    dv: &[f64],
    theta: f64,
) -> Result<DriftDistortion> {
    let n = grid.len();
    if dv.len() != n {
        return Err(RobustError::dimension_mismatch("value slopes", n, dv.len()));
    }
    let params = control.params();
    let sigma = params.sigma();
    let lu = sigma.lu();
    let penalty = if theta.is_infinite() { 0.0 } else { 1.0 / theta };

    let branches = control.minimize_many(grid.points(), dv)?;
    let mut values = DMatrix::zeros(4, n);
    let mut s1 = Vec::with_capacity(n);
    let mut s2 = Vec::with_capacity(n);
    for (j, (&z, branch)) in grid.points().iter().zip(&branches).enumerate() {
        let capital = control.companion_s1(z, dv[j], branch.s2)?;
        let structured = lu
            .solve(&Vector2::new(capital, branch.s2))
            .ok_or_else(|| RobustError::singular("volatility matrix"))?;
        let worst = structured - penalty * sigma.transpose() * Vector2::new(CAPITAL_SCALE, dv[j]);

        values[(0, j)] = structured[0];
        values[(1, j)] = structured[1];
        values[(2, j)] = worst[0];
        values[(3, j)] = worst[1];
        s1.push(capital);
        s2.push(branch.s2);
    }

    Ok(DriftDistortion { values, s1, s2 })
}

/// Drifts of `(k, z)` under the worst-case model plus the curvature of the value function.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorstCaseDrift {
    pub capital: Vec<f64>,
    pub state: Vec<f64>,
    /// `v''` recomputed from the HJB equation at every grid point.
    pub curvature: Vec<f64>,
}

/// Shifts the baseline drifts by `σ η_u` and evaluates the HJB curvature on the grid.
pub fn update_drift(
    ode: &HjbOde<'_>,
    grid: &StateGrid,
    level: &[f64],
    slope: &[f64],
    distortion: &DriftDistortion,
) -> Result<WorstCaseDrift> {
    let n = grid.len();
    for (context, found) in [
        ("value levels", level.len()),
        ("value slopes", slope.len()),
        ("distortion columns", distortion.len()),
    ] {
        if found != n {
            return Err(RobustError::dimension_mismatch(context, n, found));
        }
    }
    let params: &ModelParameters = ode.control().params();

    let mut drift = WorstCaseDrift {
        capital: Vec::with_capacity(n),
        state: Vec::with_capacity(n),
        curvature: Vec::with_capacity(n),
    };
    for (j, &z) in grid.points().iter().enumerate() {
        let shift = params.sigma() * distortion.worst_case(j);
        drift.capital.push(shift[0] + params.k_drift(z));
        drift.state.push(shift[1] + params.centered_z_drift(z));
        drift.curvature.push(ode.curvature(z, level[j], slope[j])?);
    }
    Ok(drift)
}
