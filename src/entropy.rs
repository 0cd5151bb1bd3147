//! Relative and Chernoff entropy of the worst-case model.
//!
//! Both quantities are computed from a finite-difference discretization of the
//! generator of `z` under a distorted drift,
//!
//! ```text
//! L f = μ(z) f' + ½ |σz|² f''
//! ```
//!
//! with central differences in the interior. The first and last rows use
//! one-sided differences, which are only first-order accurate at the edge node.

use log::{debug, warn};
use nalgebra::{linalg::Schur, DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::distortion::DriftDistortion;
use crate::error::{RobustError, Result};
use crate::grid::StateGrid;
use crate::model::ModelParameters;
use crate::options::ChernoffOptions;
use crate::solving::minimize_bounded;

/// Interior coefficients `(f[j-1], f[j], f[j+1])` of the generator at drift `mu`.
pub(crate) fn interior_coefficients(mu: f64, diffusion: f64, spacing: f64) -> [f64; 3] {
    let advection = mu / (2.0 * spacing);
    let dispersion = 0.5 * diffusion / (spacing * spacing);
    [
        -advection + dispersion,
        -2.0 * dispersion,
        advection + dispersion,
    ]
}

/// Dense generator matrix for the drift field `drift` plus an optional diagonal `decay`.
pub fn generator_matrix(
    drift: &[f64],
    diffusion: f64,
    spacing: f64,
    decay: Option<&[f64]>,
) -> Result<DMatrix<f64>> {
    let n = drift.len();
    if n < 3 {
        return Err(RobustError::dimension_mismatch("generator size", 3, n));
    }
    if let Some(decay) = decay {
        if decay.len() != n {
            return Err(RobustError::dimension_mismatch("generator decay", n, decay.len()));
        }
    }

    let dispersion = 0.5 * diffusion / (spacing * spacing);
    let mut matrix = DMatrix::zeros(n, n);

    // forward stencil
    let mu = drift[0] / spacing;
    matrix[(0, 0)] = -mu + dispersion;
    matrix[(0, 1)] = mu - 2.0 * dispersion;
    matrix[(0, 2)] = dispersion;

    for j in 1..n - 1 {
        let [below, center, above] = interior_coefficients(drift[j], diffusion, spacing);
        matrix[(j, j - 1)] = below;
        matrix[(j, j)] = center;
        matrix[(j, j + 1)] = above;
    }

    // backward stencil
    let last = n - 1;
    let mu = drift[last] / spacing;
    matrix[(last, last)] = mu + dispersion;
    matrix[(last, last - 1)] = -mu - 2.0 * dispersion;
    matrix[(last, last - 2)] = dispersion;

    if let Some(decay) = decay {
        for (j, rate) in decay.iter().enumerate() {
            matrix[(j, j)] += rate;
        }
    }
    Ok(matrix)
}

fn check_columns(grid: &StateGrid, distortion: &DriftDistortion) -> Result<()> {
    if distortion.len() != grid.len() {
        return Err(RobustError::dimension_mismatch(
            "distortion columns",
            grid.len(),
            distortion.len(),
        ));
    }
    Ok(())
}

/// Relative entropy `q` of the worst-case model with respect to the structured one.
///
/// Solves `-L x = ½ |η_u - η_s|²` under the worst-case drift, with the column
/// of the long-run mean replaced by ones to remove the additive constant, and
/// returns `√(2 x(z̄))`.
pub fn relative_entropy(
    params: &ModelParameters,
    grid: &StateGrid,
    distortion: &DriftDistortion,
) -> Result<f64> {
    check_columns(grid, distortion)?;
    let sigma_z = params.sigma_z();
    let drift: Vec<f64> = grid
        .points()
        .iter()
        .enumerate()
        .map(|(j, &z)| sigma_z.dot(&distortion.worst_case(j)) + params.z_drift(z))
        .collect();

    let mut system = -generator_matrix(&drift, params.sigma_z_norm_sq(), grid.spacing(), None)?;
    system.column_mut(grid.center_index()).fill(1.0);
    let rhs = DVector::from_iterator(
        grid.len(),
        (0..grid.len()).map(|j| {
            let gap = distortion.worst_case(j) - distortion.structured(j);
            0.5 * gap.norm_squared()
        }),
    );

    let solution = system
        .lu()
        .solve(&rhs)
        .ok_or_else(|| RobustError::singular("relative entropy system"))?;
    let pinned = solution[grid.center_index()];
    if !(pinned >= 0.0) {
        // Tiny negative values are rounding noise around zero distortion.
        if pinned > -1e-14 {
            return Ok(0.0);
        }
        return Err(RobustError::NumericalError {
            context: "negative relative entropy",
        });
    }
    Ok((2.0 * pinned).sqrt())
}

/// Chernoff entropy of the worst-case distortion and the implied half-life.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChernoffEntropy {
    /// Decay rate of the detection-error bound.
    pub rate: f64,
    /// Minimizing tilting exponent in `[0, 1]`.
    pub exponent: f64,
}

impl ChernoffEntropy {
    /// `ln 2 / rate`, infinite when the rate is not positive.
    pub fn half_life(&self) -> f64 {
        if self.rate > 0.0 {
            std::f64::consts::LN_2 / self.rate
        } else {
            f64::INFINITY
        }
    }
}

/// Largest real part among the eigenvalues of the tilted generator at exponent `s`.
fn dominant_eigenvalue(
    params: &ModelParameters,
    grid: &StateGrid,
    distortion: &DriftDistortion,
    s: f64,
) -> Result<f64> {
    let sigma_z = params.sigma_z();
    let mut drift = Vec::with_capacity(grid.len());
    let mut decay = Vec::with_capacity(grid.len());
    for (j, &z) in grid.points().iter().enumerate() {
        let eta = distortion.worst_case(j);
        drift.push(s * sigma_z.dot(&eta) + params.z_drift(z));
        decay.push(-0.5 * s * (1.0 - s) * eta.norm_squared());
    }
    let matrix = generator_matrix(&drift, params.sigma_z_norm_sq(), grid.spacing(), Some(&decay))?;
    let schur = Schur::try_new(matrix, f64::EPSILON, 10_000).ok_or(RobustError::NumericalError {
        context: "Schur decomposition of the tilted generator",
    })?;
    Ok(schur
        .complex_eigenvalues()
        .iter()
        .map(|lambda| lambda.re)
        .fold(f64::NEG_INFINITY, f64::max))
}

/// Minimizes the dominant eigenvalue of the tilted generator over `s ∈ [0, 1]`.
pub fn chernoff_entropy(
    params: &ModelParameters,
    grid: &StateGrid,
    distortion: &DriftDistortion,
    options: &ChernoffOptions,
) -> Result<ChernoffEntropy> {
    check_columns(grid, distortion)?;
    let minimum = minimize_bounded(
        0.0,
        1.0,
        options.start,
        options.tolerance,
        options.max_iterations,
        |s| dominant_eigenvalue(params, grid, distortion, s),
    )?;
    if !minimum.converged {
        warn!(
            "Chernoff minimization stopped after {} iterations at s = {}",
            minimum.iterations, minimum.x
        );
    }
    let entropy = ChernoffEntropy {
        rate: -minimum.value,
        exponent: minimum.x,
    };
    debug!(
        "Chernoff entropy {:.6e} at s = {:.4}, half-life {:.2}",
        entropy.rate,
        entropy.exponent,
        entropy.half_life()
    );
    Ok(entropy)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::Vector2;

    use super::*;

    fn constant_distortion(n: usize, structured: Vector2<f64>, worst: Vector2<f64>) -> DriftDistortion {
        let mut values = DMatrix::zeros(4, n);
        for j in 0..n {
            values[(0, j)] = structured[0];
            values[(1, j)] = structured[1];
            values[(2, j)] = worst[0];
            values[(3, j)] = worst[1];
        }
        DriftDistortion::new(values, vec![0.0; n], vec![0.0; n]).unwrap()
    }

    #[test]
    fn generator_rows_sum_to_zero() {
        let drift = [0.3, -0.1, 0.05, 0.2, -0.4];
        let matrix = generator_matrix(&drift, 0.02, 0.1, None).unwrap();
        for row in matrix.row_iter() {
            assert!(row.sum().abs() < 1e-10);
        }
        assert!(generator_matrix(&drift[..2], 0.02, 0.1, None).is_err());
    }

    #[test]
    fn edge_rows_are_one_sided() {
        let h = 0.1;
        let z: Vec<f64> = (0..5).map(|j| j as f64 * h).collect();
        let square = DVector::from_iterator(5, z.iter().map(|z| z * z));

        // Pure diffusion: the second difference is exact for a quadratic.
        let diffusion = generator_matrix(&[0.0; 5], 2.0, h, None).unwrap() * &square;
        assert_relative_eq!(diffusion[0], 2.0, epsilon = 1e-10);
        assert_relative_eq!(diffusion[4], 2.0, epsilon = 1e-10);

        // Unit drift: forward and backward differences miss 2z by one step.
        let transport = generator_matrix(&[1.0; 5], 0.0, h, None).unwrap() * &square;
        assert_relative_eq!(transport[0], 2.0 * z[0] + h, epsilon = 1e-12);
        assert_relative_eq!(transport[4], 2.0 * z[4] - h, epsilon = 1e-12);
    }

    #[test]
    fn zero_distortion_has_zero_entropy() {
        let params = ModelParameters::default();
        let grid = StateGrid::symmetric(params.z_bar(), 1.0, 0.1).unwrap();
        let distortion = constant_distortion(grid.len(), Vector2::zeros(), Vector2::zeros());
        let q = relative_entropy(&params, &grid, &distortion).unwrap();
        assert_eq!(q, 0.0);
    }

    #[test]
    fn constant_gap_gives_its_own_norm() {
        let params = ModelParameters::default();
        let grid = StateGrid::symmetric(params.z_bar(), 1.0, 0.1).unwrap();
        let distortion = constant_distortion(
            grid.len(),
            Vector2::new(0.1, -0.2),
            Vector2::new(0.4, 0.2),
        );
        let q = relative_entropy(&params, &grid, &distortion).unwrap();
        assert_relative_eq!(q, 0.5, epsilon = 1e-8);
    }

    #[test]
    fn chernoff_rate_gains_an_eighth_of_the_squared_distortion() {
        // Orthogonal to σz, so the tilt only enters through the diagonal decay.
        let params = ModelParameters::default();
        let grid = StateGrid::symmetric(params.z_bar(), 0.5, 0.1).unwrap();
        let sigma_z = params.sigma_z();
        let eta = Vector2::new(sigma_z[1], -sigma_z[0]) * 20.0;
        let options = ChernoffOptions::default();

        let baseline = constant_distortion(grid.len(), Vector2::zeros(), Vector2::zeros());
        let tilted = constant_distortion(grid.len(), Vector2::zeros(), eta);
        let base = chernoff_entropy(&params, &grid, &baseline, &options).unwrap();
        let entropy = chernoff_entropy(&params, &grid, &tilted, &options).unwrap();

        assert_relative_eq!(entropy.exponent, 0.5, epsilon = 1e-3);
        assert_relative_eq!(
            entropy.rate - base.rate,
            eta.norm_squared() / 8.0,
            max_relative = 1e-6
        );
        assert_relative_eq!(
            entropy.half_life(),
            std::f64::consts::LN_2 / entropy.rate,
            max_relative = 1e-12
        );
    }
}
