//! Not-a-knot cubic spline used to resample half-line solutions onto the state grid.

use crate::error::{RobustError, Result};
use crate::linalg::solve_tridiagonal;

/// Piecewise cubic interpolant stored as node values and node slopes.
#[derive(Clone, Debug)]
pub struct CubicSpline {
    knots: Vec<f64>,
    values: Vec<f64>,
    slopes: Vec<f64>,
}

impl CubicSpline {
    /// Fits a `C²` spline whose first two and last two pieces share a cubic.
    pub fn not_a_knot(knots: &[f64], values: &[f64]) -> Result<Self> {
        let n = knots.len();
        if values.len() != n {
            return Err(RobustError::dimension_mismatch("spline values", n, values.len()));
        }
        if n < 2 {
            return Err(RobustError::dimension_mismatch("spline knots", 2, n));
        }
        if knots.windows(2).any(|pair| !(pair[1] > pair[0])) {
            return Err(RobustError::NumericalError {
                context: "spline knots must increase strictly",
            });
        }

        let dx: Vec<f64> = knots.windows(2).map(|pair| pair[1] - pair[0]).collect();
        let secant: Vec<f64> = values
            .windows(2)
            .zip(&dx)
            .map(|(pair, h)| (pair[1] - pair[0]) / h)
            .collect();

        let slopes = match n {
            2 => vec![secant[0]; 2],
            3 => {
                // A single parabola through the three points.
                let curvature = (secant[1] - secant[0]) / (knots[2] - knots[0]);
                vec![
                    secant[0] - curvature * dx[0],
                    secant[0] + curvature * dx[0],
                    secant[1] + curvature * dx[1],
                ]
            }
            _ => Self::not_a_knot_slopes(&dx, &secant)?,
        };

        Ok(Self {
            knots: knots.to_vec(),
            values: values.to_vec(),
            slopes,
        })
    }

    fn not_a_knot_slopes(dx: &[f64], secant: &[f64]) -> Result<Vec<f64>> {
        let n = dx.len() + 1;
        let mut sub = vec![0.0; n - 1];
        let mut diag = vec![0.0; n];
        let mut sup = vec![0.0; n - 1];
        let mut rhs = vec![0.0; n];

        for i in 1..n - 1 {
            sub[i - 1] = dx[i];
            diag[i] = 2.0 * (dx[i - 1] + dx[i]);
            sup[i] = dx[i - 1];
            rhs[i] = 3.0 * (dx[i] * secant[i - 1] + dx[i - 1] * secant[i]);
        }

        let span = dx[0] + dx[1];
        diag[0] = dx[1];
        sup[0] = span;
        rhs[0] = ((dx[0] + 2.0 * span) * dx[1] * secant[0] + dx[0] * dx[0] * secant[1]) / span;

        let m = n - 1;
        let span = dx[m - 1] + dx[m - 2];
        diag[m] = dx[m - 2];
        sub[m - 1] = span;
        rhs[m] = (dx[m - 1] * dx[m - 1] * secant[m - 2]
            + (2.0 * span + dx[m - 1]) * dx[m - 2] * secant[m - 1])
            / span;

        solve_tridiagonal(&sub, &diag, &sup, &rhs, "spline slopes")
    }

    /// Evaluates the spline; points outside the knots use the nearest end piece.
    pub fn evaluate(&self, x: f64) -> f64 {
        let last = self.knots.len() - 2;
        let cell = self
            .knots
            .partition_point(|&knot| knot <= x)
            .saturating_sub(1)
            .min(last);

        let h = self.knots[cell + 1] - self.knots[cell];
        let t = x - self.knots[cell];
        let (y0, y1) = (self.values[cell], self.values[cell + 1]);
        let (s0, s1) = (self.slopes[cell], self.slopes[cell + 1]);
        let secant = (y1 - y0) / h;
        let c2 = (3.0 * secant - 2.0 * s0 - s1) / h;
        let c3 = (s0 + s1 - 2.0 * secant) / (h * h);
        y0 + t * (s0 + t * (c2 + t * c3))
    }

    /// Evaluates the spline at every point of `points`.
    pub fn sample(&self, points: &[f64]) -> Vec<f64> {
        points.iter().map(|&x| self.evaluate(x)).collect()
    }
}
