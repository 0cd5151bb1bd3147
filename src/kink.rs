//! Matching the two half-line solutions at the kink.
//!
//! The value function is solved separately on `[lower, z̄]` and `[z̄, upper]`
//! with the asymptotic slopes imposed at the outer ends and a common unknown
//! slope `v'(z̄)` imposed at the kink. The kink slope is chosen so that both
//! halves agree in level at `z̄`.

use log::{debug, info};
use nalgebra::DMatrix;

use crate::boundary::BoundarySlopes;
use crate::bvp::{solve_half_line, HalfLine, HalfLineOde, KinkSide, OdeSolution};
use crate::error::Result;
use crate::grid::StateGrid;
use crate::options::{BvpOptions, KinkOptions};
use crate::solving::{grid_seed, refine_root, RootSummary};

/// Offset from the kink at which the one-sided curvatures are reported.
const KINK_OFFSET: f64 = 1e-6;

/// Both half-line solutions resampled onto the state grid.
#[derive(Clone, Debug)]
pub struct MatchedSolution {
    kink_slope: f64,
    residual: f64,
    values: DMatrix<f64>,
    kink_curvature: [f64; 2],
    refinement: RootSummary,
}

impl MatchedSolution {
    /// Matched slope `v'(z̄)`.
    pub fn kink_slope(&self) -> f64 {
        self.kink_slope
    }

    /// Absolute level mismatch `|v(z̄⁻) - v(z̄⁺)|` at the matched slope.
    pub fn residual(&self) -> f64 {
        self.residual
    }

    /// `2 × N` array of `v` and `v'` on the state grid.
    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    pub fn level(&self) -> Vec<f64> {
        self.values.row(0).iter().copied().collect()
    }

    pub fn slope(&self) -> Vec<f64> {
        self.values.row(1).iter().copied().collect()
    }

    /// `v''` just left and just right of the kink.
    pub fn kink_curvature(&self) -> [f64; 2] {
        self.kink_curvature
    }

    /// Diagnostics of the secant refinement.
    pub fn refinement(&self) -> &RootSummary {
        &self.refinement
    }

    /// Whether the mismatch is small enough for the solution to be used at all.
    pub fn is_usable(&self, reject_threshold: f64) -> bool {
        self.residual <= reject_threshold
    }

    /// Flat solution on a single node with the given level mismatch.
    #[cfg(test)]
    pub(crate) fn flat(residual: f64) -> Self {
        Self {
            kink_slope: 0.0,
            residual,
            values: DMatrix::zeros(2, 1),
            kink_curvature: [0.0; 2],
            refinement: RootSummary {
                root: 0.0,
                value: residual,
                evaluations: 0,
                converged: true,
            },
        }
    }
}

/// Searches the kink slope for one ODE, grid and set of asymptotic slopes.
pub struct KinkMatcher<'a, O> {
    ode: &'a O,
    grid: &'a StateGrid,
    slopes: &'a BoundarySlopes,
    bvp: &'a BvpOptions,
    options: &'a KinkOptions,
}

impl<'a, O: HalfLineOde> KinkMatcher<'a, O> {
    pub fn new(
        ode: &'a O,
        grid: &'a StateGrid,
        slopes: &'a BoundarySlopes,
        bvp: &'a BvpOptions,
        options: &'a KinkOptions,
    ) -> Self {
        Self {
            ode,
            grid,
            slopes,
            bvp,
            options,
        }
    }

    fn solve_halves(&self, kink_slope: f64) -> Result<(OdeSolution, OdeSolution)> {
        let negative = HalfLine {
            lower: self.grid.lower(),
            upper: self.grid.center(),
            lower_slope: self.slopes.left,
            upper_slope: kink_slope,
            kink: KinkSide::Upper,
        };
        let positive = HalfLine {
            lower: self.grid.center(),
            upper: self.grid.upper(),
            lower_slope: kink_slope,
            upper_slope: self.slopes.right,
            kink: KinkSide::Lower,
        };
        Ok((
            solve_half_line(self.ode, negative, self.bvp)?,
            solve_half_line(self.ode, positive, self.bvp)?,
        ))
    }

    /// Level mismatch `v(z̄⁻) - v(z̄⁺)` for a trial kink slope.
    pub fn mismatch(&self, kink_slope: f64) -> Result<f64> {
        let (negative, positive) = self.solve_halves(kink_slope)?;
        Ok(negative.last().0 - positive.first().0)
    }

    /// Grid search over interior candidates followed by secant refinement.
    ///
    /// Boundary-value failures reject a candidate during the grid search but
    /// propagate from the refinement.
    pub fn solve(&self) -> Result<MatchedSolution> {
        let candidates = self
            .slopes
            .interior_candidates(self.options.candidates, self.options.shrink);
        let seed = grid_seed(&candidates, "matching the kink slope", |dv0| {
            self.mismatch(dv0).map(Some)
        })?;
        debug!("kink seed {} with mismatch {:.3e}", seed.x, seed.value);

        let refinement = refine_root(&seed, &self.options.root, |dv0| self.mismatch(dv0))?;
        let kink_slope = refinement.root;
        let (negative, positive) = self.solve_halves(kink_slope)?;
        let (v_left, _) = negative.last();
        let (v_right, _) = positive.first();
        let residual = (v_left - v_right).abs();

        let [left_level, left_slope] = negative.resample(self.grid.negative_half())?;
        let [right_level, right_slope] = positive.resample(&self.grid.positive_half()[1..])?;
        let n = self.grid.len();
        let mut values = DMatrix::zeros(2, n);
        for (j, (v, dv)) in left_level
            .iter()
            .chain(&right_level)
            .zip(left_slope.iter().chain(&right_slope))
            .enumerate()
        {
            values[(0, j)] = *v;
            values[(1, j)] = *dv;
        }

        let center = self.grid.center();
        let kink_curvature = [
            self.ode.curvature(center - KINK_OFFSET, v_left, kink_slope)?,
            self.ode.curvature(center + KINK_OFFSET, v_right, kink_slope)?,
        ];
        info!(
            "kink matched: v'(z̄) = {kink_slope:.6}, residual {residual:.3e} after {} evaluations",
            refinement.evaluations
        );

        Ok(MatchedSolution {
            kink_slope,
            residual,
            values,
            kink_curvature,
            refinement,
        })
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    /// `v'' = v + z`; with these slopes the solution is `eᶻ + ½e⁻ᶻ - z`.
    struct Linear;

    impl HalfLineOde for Linear {
        fn curvature(&self, z: f64, v: f64, _dv: f64) -> Result<f64> {
            Ok(v + z)
        }
    }

    fn exact(z: f64) -> (f64, f64) {
        (z.exp() + 0.5 * (-z).exp() - z, z.exp() - 0.5 * (-z).exp() - 1.0)
    }

    #[test]
    fn recovers_the_closed_form_solution() {
        let grid = StateGrid::symmetric(0.0, 1.0, 0.1).unwrap();
        let slopes = BoundarySlopes::new(exact(-1.0).1, exact(1.0).1);
        let bvp = BvpOptions::default();
        let options = KinkOptions::default();
        let matched = KinkMatcher::new(&Linear, &grid, &slopes, &bvp, &options)
            .solve()
            .unwrap();

        assert!(matched.residual() < 1e-6, "residual {}", matched.residual());
        assert!(matched.is_usable(options.reject_threshold));
        assert_relative_eq!(matched.kink_slope(), -0.5, epsilon = 1e-3);
        assert_eq!(matched.values().ncols(), grid.len());

        let level = matched.level();
        for (z, v) in grid.points().iter().zip(&level) {
            assert_relative_eq!(*v, exact(*z).0, epsilon = 1e-3);
        }
        let [left, right] = matched.kink_curvature();
        assert_relative_eq!(left, 1.5, epsilon = 1e-3);
        assert_relative_eq!(right, 1.5, epsilon = 1e-3);
    }

    #[test]
    fn mismatch_changes_sign_across_the_true_slope() {
        let grid = StateGrid::symmetric(0.0, 1.0, 0.1).unwrap();
        let slopes = BoundarySlopes::new(exact(-1.0).1, exact(1.0).1);
        let bvp = BvpOptions::default();
        let options = KinkOptions::default();
        let matcher = KinkMatcher::new(&Linear, &grid, &slopes, &bvp, &options);
        let below = matcher.mismatch(-0.8).unwrap();
        let above = matcher.mismatch(-0.2).unwrap();
        assert!(below * above < 0.0);
    }
}
