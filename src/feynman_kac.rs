//! Forward Feynman-Kac solves and the quantile curves sampled from them.
//!
//! `φ(t, z) = E[f(z_t) | z_0 = z]` solves `∂φ/∂t = L φ` with `φ(0, ·) = f`.
//! Each step is implicit in the interior nodes, using the previous values at
//! the two edge nodes, and the edges are then extrapolated linearly.

use log::debug;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::entropy::interior_coefficients;
use crate::error::{RobustError, Result};
use crate::grid::StateGrid;
use crate::linalg::BandedMatrix;
use crate::model::ModelParameters;
use crate::options::ForwardOptions;

/// Marches `initial` forward under drift `drift` and diffusion `diffusion`.
///
/// Returns an `N × (steps + 1)` array whose column `t` holds `φ` after `t` steps.
pub fn forward_expectation(
    grid: &StateGrid,
    drift: &[f64],
    diffusion: f64,
    initial: &[f64],
    options: &ForwardOptions,
) -> Result<DMatrix<f64>> {
    let n = grid.len();
    if n < 4 {
        return Err(RobustError::dimension_mismatch("forward grid size", 4, n));
    }
    for (context, found) in [("forward drift", drift.len()), ("forward initial value", initial.len())] {
        if found != n {
            return Err(RobustError::dimension_mismatch(context, n, found));
        }
    }
    if !(options.time_step > 0.0) {
        return Err(RobustError::invalid("time step", options.time_step));
    }

    let dt = options.time_step;
    let spacing = grid.spacing();
    let m = n - 2;
    let mut sub = vec![0.0; m - 1];
    let mut diag = vec![0.0; m];
    let mut sup = vec![0.0; m - 1];
    let mut edge_lower = 0.0;
    let mut edge_upper = 0.0;
    for k in 0..m {
        let [below, center, above] = interior_coefficients(drift[k + 1], diffusion, spacing);
        diag[k] = 1.0 - dt * center;
        if k > 0 {
            sub[k - 1] = -dt * below;
        } else {
            edge_lower = dt * below;
        }
        if k + 1 < m {
            sup[k] = -dt * above;
        } else {
            edge_upper = dt * above;
        }
    }
    let system = BandedMatrix::tridiagonal(&sub, &diag, &sup)?.factor("forward expectation system")?;

    let steps = options.steps();
    let mut paths = DMatrix::zeros(n, steps + 1);
    paths.column_mut(0).copy_from_slice(initial);
    let mut previous = initial.to_vec();
    let mut rhs = vec![0.0; m];
    for step in 1..=steps {
        rhs.copy_from_slice(&previous[1..n - 1]);
        rhs[0] += edge_lower * previous[0];
        rhs[m - 1] += edge_upper * previous[n - 1];
        let interior = system.solve(&rhs)?;

        previous[1..n - 1].copy_from_slice(&interior);
        previous[0] = 2.0 * interior[0] - interior[1];
        previous[n - 1] = 2.0 * interior[m - 1] - interior[m - 2];
        paths.column_mut(step).copy_from_slice(&previous);
    }
    debug!("forward expectation: {steps} steps of {dt} on {n} nodes");
    Ok(paths)
}

/// Quantile `level` of the stationary distribution `N(z̄, |σz|² / (2βz))` of `z`.
pub fn stationary_quantile(params: &ModelParameters, level: f64) -> Result<f64> {
    if !(level > 0.0 && level < 1.0) {
        return Err(RobustError::invalid("quantile level", level));
    }
    let std = params.stationary_std();
    let normal = Normal::new(params.z_bar(), std).map_err(|_| RobustError::invalid("stationary std", std))?;
    Ok(normal.inverse_cdf(level))
}

/// Linearly interpolates every column of `paths` at state `z`.
pub fn sample_at(grid: &StateGrid, paths: &DMatrix<f64>, z: f64) -> Result<Vec<f64>> {
    if paths.nrows() != grid.len() {
        return Err(RobustError::dimension_mismatch("path rows", grid.len(), paths.nrows()));
    }
    let (cell, weight) = grid.locate(z)?;
    Ok(paths
        .column_iter()
        .map(|column| {
            if weight == 0.0 {
                column[cell]
            } else {
                (1.0 - weight) * column[cell] + weight * column[cell + 1]
            }
        })
        .collect())
}

/// Time series of an expectation at three quantiles of the stationary distribution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantileCurves {
    /// Quantile levels, e.g. `[0.1, 0.5, 0.9]`.
    pub levels: [f64; 3],
    /// One time series per level.
    pub series: [Vec<f64>; 3],
}

impl QuantileCurves {
    /// Samples `paths` at the stationary quantiles `levels`.
    pub fn sample(
        params: &ModelParameters,
        grid: &StateGrid,
        paths: &DMatrix<f64>,
        levels: [f64; 3],
    ) -> Result<Self> {
        let mut series: [Vec<f64>; 3] = Default::default();
        for (slot, &level) in series.iter_mut().zip(&levels) {
            *slot = sample_at(grid, paths, stationary_quantile(params, level)?)?;
        }
        Ok(Self { levels, series })
    }

    /// Applies `x ↦ scale·x + offset` to every series.
    pub fn affine(&self, scale: f64, offset: f64) -> Self {
        Self {
            levels: self.levels,
            series: self
                .series
                .clone()
                .map(|s| s.into_iter().map(|x| scale * x + offset).collect()),
        }
    }

    /// Pointwise difference `self - other`.
    pub fn minus(&self, other: &Self) -> Self {
        let mut series = self.series.clone();
        for (left, right) in series.iter_mut().zip(&other.series) {
            for (x, y) in left.iter_mut().zip(right) {
                *x -= y;
            }
        }
        Self {
            levels: self.levels,
            series,
        }
    }

    /// Number of time points in each series.
    pub fn horizon_len(&self) -> usize {
        self.series[0].len()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn short_horizon() -> ForwardOptions {
        ForwardOptions {
            horizon: 5.0,
            time_step: 0.1,
            ..ForwardOptions::default()
        }
    }

    #[test]
    fn constants_are_preserved_without_drift() {
        let grid = StateGrid::symmetric(0.0, 1.0, 0.1).unwrap();
        let drift = vec![0.0; grid.len()];
        let initial = vec![3.25; grid.len()];
        let paths = forward_expectation(&grid, &drift, 7.46e-4, &initial, &short_horizon()).unwrap();

        assert_eq!(paths.ncols(), 51);
        for value in paths.iter() {
            assert_relative_eq!(*value, 3.25, epsilon = 1e-12);
        }
    }

    #[test]
    fn driftless_diffusion_preserves_linear_functions() {
        let grid = StateGrid::symmetric(0.0, 1.0, 0.1).unwrap();
        let drift = vec![0.0; grid.len()];
        let initial: Vec<f64> = grid.points().iter().map(|z| 2.0 * z - 0.5).collect();
        let paths = forward_expectation(&grid, &drift, 0.01, &initial, &short_horizon()).unwrap();
        for t in [1, 25, 50] {
            for j in 0..grid.len() {
                assert_relative_eq!(paths[(j, t)], initial[j], epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn repeated_solves_are_identical() {
        let grid = StateGrid::symmetric(0.0, 1.0, 0.1).unwrap();
        let drift: Vec<f64> = grid.points().iter().map(|z| -0.014 * z + 0.002).collect();
        let initial: Vec<f64> = grid.points().iter().map(|z| z * z).collect();
        let first = forward_expectation(&grid, &drift, 7.46e-4, &initial, &short_horizon()).unwrap();
        let second = forward_expectation(&grid, &drift, 7.46e-4, &initial, &short_horizon()).unwrap();
        assert_eq!(first, second);
        assert!(forward_expectation(&grid, &drift[1..], 7.46e-4, &initial, &short_horizon()).is_err());
    }

    #[test]
    fn sampling_at_a_node_is_exact() {
        let grid = StateGrid::symmetric(0.0, 1.0, 0.1).unwrap();
        let paths = DMatrix::from_fn(grid.len(), 4, |i, t| (i as f64).sin() + t as f64 * 0.37);
        for &node in &[4usize, 10, 20] {
            let z = grid.points()[node];
            let sampled = sample_at(&grid, &paths, z).unwrap();
            for (t, value) in sampled.iter().enumerate() {
                assert_relative_eq!(*value, paths[(node, t)], max_relative = 1e-14);
            }
        }
        assert!(sample_at(&grid, &paths, 1.5).is_err());
    }

    #[test]
    fn stationary_median_is_the_long_run_mean() {
        let params = ModelParameters::default();
        assert_relative_eq!(stationary_quantile(&params, 0.5).unwrap(), params.z_bar(), epsilon = 1e-12);
        let upper = stationary_quantile(&params, 0.9).unwrap();
        let lower = stationary_quantile(&params, 0.1).unwrap();
        assert_relative_eq!(upper, -lower, epsilon = 1e-9);
        assert!(stationary_quantile(&params, 1.0).is_err());
    }
}
