//! Half-line boundary-value solves of the HJB equation.
//!
//! The second-order equation `v'' = g(z, v, v')` is written as the first-order
//! system `y = (v, v')`, `y' = (v', g)` with Neumann data at both ends of a
//! half-line. It is discretized by fourth-order Hermite-Simpson collocation
//! (three-stage Lobatto IIIA) and solved with a damped Newton iteration whose
//! banded Jacobian is factored in linear time. After each solve the
//! collocation residual is measured between nodes and the mesh is refined
//! where it exceeds the tolerance.

use log::{debug, trace};
use nalgebra::DMatrix;

use crate::control::QuadraticControl;
use crate::error::{RobustError, Result};
use crate::linalg::BandedMatrix;
use crate::options::BvpOptions;
use crate::spline::CubicSpline;

/// A scalar second-order ODE `v'' = g(z, v, v')`.
pub trait HalfLineOde {
    /// Second derivative implied at state `z` by level `v` and slope `dv`.
    fn curvature(&self, z: f64, v: f64, dv: f64) -> Result<f64>;
}

/// The HJB equation for a fixed robustness penalty `θ`.
///
/// ```text
/// v'' = 2 / |σz|² · (δ v − min_s(...) + 1/(2θ) · |σᵀ (0.01, v')|²)
/// ```
#[derive(Clone, Copy, Debug)]
pub struct HjbOde<'a> {
    control: QuadraticControl<'a>,
    theta: f64,
}

impl<'a> HjbOde<'a> {
    pub fn new(control: QuadraticControl<'a>, theta: f64) -> Self {
        Self { control, theta }
    }

    pub fn theta(&self) -> f64 {
        self.theta
    }

    pub fn control(&self) -> &QuadraticControl<'a> {
        &self.control
    }

    /// Weight `1/(2θ)` on the exposure penalty; zero for `θ = ∞`.
    fn penalty(&self) -> f64 {
        if self.theta.is_infinite() {
            0.0
        } else {
            0.5 / self.theta
        }
    }
}

impl HalfLineOde for HjbOde<'_> {
    fn curvature(&self, z: f64, v: f64, dv: f64) -> Result<f64> {
        let params = self.control.params();
        let minimum = self.control.minimize(z, dv)?;
        Ok(2.0 / params.sigma_z_norm_sq()
            * (params.delta() * v - minimum.objective + self.penalty() * params.exposure_norm_sq(dv)))
    }
}

/// Which end of a half-line touches the kink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KinkSide {
    Lower,
    Upper,
}

/// A half-line problem: the interval and the slope imposed at each end.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HalfLine {
    pub lower: f64,
    pub upper: f64,
    pub lower_slope: f64,
    pub upper_slope: f64,
    pub kink: KinkSide,
}

impl HalfLine {
    fn kink_point(&self) -> (f64, f64) {
        match self.kink {
            KinkSide::Lower => (self.lower, self.lower_slope),
            KinkSide::Upper => (self.upper, self.upper_slope),
        }
    }
}

/// Converged solution of one half-line.
#[derive(Clone, Debug)]
pub struct OdeSolution {
    mesh: Vec<f64>,
    /// Row 0 holds `v`, row 1 holds `v'`.
    values: DMatrix<f64>,
    max_residual: f64,
}

impl OdeSolution {
    /// Final adaptive mesh.
    pub fn mesh(&self) -> &[f64] {
        &self.mesh
    }

    /// `2 × N` array of value levels and slopes on the mesh.
    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    /// Largest relative collocation residual on the final mesh.
    pub fn max_residual(&self) -> f64 {
        self.max_residual
    }

    /// `(v, v')` at the left end.
    pub fn first(&self) -> (f64, f64) {
        (self.values[(0, 0)], self.values[(1, 0)])
    }

    /// `(v, v')` at the right end.
    pub fn last(&self) -> (f64, f64) {
        let n = self.mesh.len() - 1;
        (self.values[(0, n)], self.values[(1, n)])
    }

    /// Resamples both rows onto `points` with not-a-knot cubic splines.
    pub fn resample(&self, points: &[f64]) -> Result<[Vec<f64>; 2]> {
        let level: Vec<f64> = self.values.row(0).iter().copied().collect();
        let slope: Vec<f64> = self.values.row(1).iter().copied().collect();
        let level = CubicSpline::not_a_knot(&self.mesh, &level)?;
        let slope = CubicSpline::not_a_knot(&self.mesh, &slope)?;
        Ok([level.sample(points), slope.sample(points)])
    }
}

type State = [f64; 2];
type Jacobian = [[f64; 2]; 2];

fn rhs<O: HalfLineOde>(ode: &O, z: f64, y: State) -> Result<State> {
    let curvature = ode.curvature(z, y[0], y[1])?;
    if !curvature.is_finite() {
        return Err(RobustError::NumericalError {
            context: "HJB right-hand side",
        });
    }
    Ok([y[1], curvature])
}

fn rhs_jacobian<O: HalfLineOde>(ode: &O, z: f64, y: State, f: State) -> Result<Jacobian> {
    let mut jac = [[0.0, 1.0], [0.0, 0.0]];
    for component in 0..2 {
        let step = 1.49e-8 * y[component].abs().max(1.0);
        let mut shifted = y;
        shifted[component] += step;
        let curvature = ode.curvature(z, shifted[0], shifted[1])?;
        jac[1][component] = (curvature - f[1]) / step;
    }
    Ok(jac)
}

fn mat_mul(a: &Jacobian, b: &Jacobian) -> Jacobian {
    let mut out = [[0.0; 2]; 2];
    for i in 0..2 {
        for j in 0..2 {
            out[i][j] = a[i][0] * b[0][j] + a[i][1] * b[1][j];
        }
    }
    out
}

/// Collocation residuals and the quantities needed to differentiate them.
struct Residual {
    values: Vec<f64>,
    f_nodes: Vec<State>,
    f_mid: Vec<State>,
    y_mid: Vec<State>,
}

impl Residual {
    fn cost(&self) -> f64 {
        self.values.iter().map(|r| r * r).sum()
    }
}

struct Collocation<'o, O> {
    ode: &'o O,
    half: HalfLine,
}

impl<O: HalfLineOde> Collocation<'_, O> {
    fn residual(&self, mesh: &[f64], y: &[State]) -> Result<Residual> {
        let m = mesh.len();
        let f_nodes = mesh
            .iter()
            .zip(y)
            .map(|(&z, &state)| rhs(self.ode, z, state))
            .collect::<Result<Vec<_>>>()?;

        let mut values = vec![0.0; 2 * m];
        let mut f_mid = Vec::with_capacity(m - 1);
        let mut y_mid = Vec::with_capacity(m - 1);
        values[0] = y[0][1] - self.half.lower_slope;
        for i in 0..m - 1 {
            let h = mesh[i + 1] - mesh[i];
            let mid_state = [
                0.5 * (y[i][0] + y[i + 1][0]) - h / 8.0 * (f_nodes[i + 1][0] - f_nodes[i][0]),
                0.5 * (y[i][1] + y[i + 1][1]) - h / 8.0 * (f_nodes[i + 1][1] - f_nodes[i][1]),
            ];
            let f_m = rhs(self.ode, mesh[i] + 0.5 * h, mid_state)?;
            for c in 0..2 {
                values[1 + 2 * i + c] = y[i + 1][c]
                    - y[i][c]
                    - h / 6.0 * (f_nodes[i][c] + 4.0 * f_m[c] + f_nodes[i + 1][c]);
            }
            f_mid.push(f_m);
            y_mid.push(mid_state);
        }
        values[2 * m - 1] = y[m - 1][1] - self.half.upper_slope;

        Ok(Residual {
            values,
            f_nodes,
            f_mid,
            y_mid,
        })
    }

    fn jacobian(&self, mesh: &[f64], y: &[State], residual: &Residual) -> Result<BandedMatrix> {
        let m = mesh.len();
        let node_jac = mesh
            .iter()
            .zip(y)
            .zip(&residual.f_nodes)
            .map(|((&z, &state), &f)| rhs_jacobian(self.ode, z, state, f))
            .collect::<Result<Vec<_>>>()?;

        let mut matrix = BandedMatrix::zeros(2 * m, 2, 2);
        matrix.set(0, 1, 1.0);
        for i in 0..m - 1 {
            let h = mesh[i + 1] - mesh[i];
            let z_mid = mesh[i] + 0.5 * h;
            let mid_jac = rhs_jacobian(self.ode, z_mid, residual.y_mid[i], residual.f_mid[i])?;

            // d y_mid / d y_i = I/2 + h/8 J_i, d y_mid / d y_{i+1} = I/2 - h/8 J_{i+1}
            let mut left_mid = [[0.0; 2]; 2];
            let mut right_mid = [[0.0; 2]; 2];
            for r in 0..2 {
                for c in 0..2 {
                    let identity = if r == c { 0.5 } else { 0.0 };
                    left_mid[r][c] = identity + h / 8.0 * node_jac[i][r][c];
                    right_mid[r][c] = identity - h / 8.0 * node_jac[i + 1][r][c];
                }
            }
            let left_chain = mat_mul(&mid_jac, &left_mid);
            let right_chain = mat_mul(&mid_jac, &right_mid);

            for r in 0..2 {
                let row = 1 + 2 * i + r;
                for c in 0..2 {
                    let identity = if r == c { 1.0 } else { 0.0 };
                    let left = -identity - h / 6.0 * (node_jac[i][r][c] + 4.0 * left_chain[r][c]);
                    let right =
                        identity - h / 6.0 * (node_jac[i + 1][r][c] + 4.0 * right_chain[r][c]);
                    matrix.set(row, 2 * i + c, left);
                    matrix.set(row, 2 * i + 2 + c, right);
                }
            }
        }
        matrix.set(2 * m - 1, 2 * m - 1, 1.0);
        Ok(matrix)
    }

    /// Damped Newton iteration on a fixed mesh. Returns whether the step size converged.
    fn newton(&self, mesh: &[f64], y: &mut Vec<State>, options: &BvpOptions) -> Result<bool> {
        const ARMIJO: f64 = 0.2;
        const BACKTRACKS: usize = 6;

        let mut residual = self.residual(mesh, y)?;
        for iteration in 0..options.max_newton_iterations {
            let jacobian = self.jacobian(mesh, y, &residual)?;
            let step = jacobian
                .factor("collocation Jacobian")?
                .solve(&residual.values)?;

            let cost = residual.cost();
            let mut alpha = 1.0;
            let mut accepted: Option<(f64, Vec<State>, Residual)> = None;
            for _ in 0..BACKTRACKS {
                let trial: Vec<State> = y
                    .iter()
                    .enumerate()
                    .map(|(i, state)| {
                        [
                            state[0] - alpha * step[2 * i],
                            state[1] - alpha * step[2 * i + 1],
                        ]
                    })
                    .collect();
                match self.residual(mesh, &trial) {
                    Ok(trial_residual) => {
                        let sufficient = trial_residual.cost() < (1.0 - 2.0 * alpha * ARMIJO) * cost;
                        accepted = Some((alpha, trial, trial_residual));
                        if sufficient {
                            break;
                        }
                    }
                    Err(err) if err.is_trial_failure() => {
                        trace!("collocation trial step rejected: {err}");
                    }
                    Err(err) => return Err(err),
                }
                alpha *= 0.5;
            }

            let Some((alpha, next, next_residual)) = accepted else {
                return Err(self.failure(mesh, f64::INFINITY));
            };
            let scale = 1.0 + next.iter().fold(0.0_f64, |acc, s| acc.max(s[0].abs()).max(s[1].abs()));
            let largest_step = alpha * step.iter().fold(0.0_f64, |acc, s| acc.max(s.abs()));
            *y = next;
            residual = next_residual;
            trace!("newton iteration {iteration}: step {largest_step:.3e}, cost {:.3e}", residual.cost());
            if largest_step <= options.newton_tolerance * scale {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Relative residual of the cubic interpolant between nodes, one value per interval.
    fn interval_residuals(&self, mesh: &[f64], y: &[State]) -> Result<Vec<f64>> {
        // Interior Lobatto points of the five-point rule, as fractions of the interval.
        let offset = 21.0_f64.sqrt() / 14.0;
        let fractions = [0.5 - offset, 0.5 + offset];
        let f_nodes = mesh
            .iter()
            .zip(y)
            .map(|(&z, &state)| rhs(self.ode, z, state))
            .collect::<Result<Vec<_>>>()?;

        (0..mesh.len() - 1)
            .map(|i| {
                let h = mesh[i + 1] - mesh[i];
                let mut worst = 0.0_f64;
                for &t in &fractions {
                    let (value, derivative) = hermite(y[i], y[i + 1], f_nodes[i], f_nodes[i + 1], h, t);
                    let f = match rhs(self.ode, mesh[i] + t * h, value) {
                        Ok(f) => f,
                        Err(err) if err.is_trial_failure() => return Ok(f64::INFINITY),
                        Err(err) => return Err(err),
                    };
                    for c in 0..2 {
                        worst = worst.max((derivative[c] - f[c]).abs() / (1.0 + f[c].abs()));
                    }
                }
                Ok(worst)
            })
            .collect()
    }

    fn failure(&self, mesh: &[f64], max_residual: f64) -> RobustError {
        RobustError::BvpNonConvergence {
            lower: self.half.lower,
            upper: self.half.upper,
            nodes: mesh.len(),
            max_residual,
        }
    }
}

/// Cubic Hermite interpolant on one interval at fraction `t`: value and derivative.
fn hermite(y0: State, y1: State, f0: State, f1: State, h: f64, t: f64) -> (State, State) {
    let h00 = 2.0 * t.powi(3) - 3.0 * t * t + 1.0;
    let h10 = t.powi(3) - 2.0 * t * t + t;
    let h01 = -2.0 * t.powi(3) + 3.0 * t * t;
    let h11 = t.powi(3) - t * t;
    let d00 = (6.0 * t * t - 6.0 * t) / h;
    let d10 = 3.0 * t * t - 4.0 * t + 1.0;
    let d01 = (-6.0 * t * t + 6.0 * t) / h;
    let d11 = 3.0 * t * t - 2.0 * t;

    let mut value = [0.0; 2];
    let mut derivative = [0.0; 2];
    for c in 0..2 {
        value[c] = h00 * y0[c] + h10 * h * f0[c] + h01 * y1[c] + h11 * h * f1[c];
        derivative[c] = d00 * y0[c] + d10 * f0[c] + d01 * y1[c] + d11 * f1[c];
    }
    (value, derivative)
}

/// Solves one half-line problem.
///
/// The initial mesh has `options.initial_nodes` evenly spaced nodes and the
/// initial guess is the linear ramp through zero at the kink with the kink
/// slope. Fails with [`RobustError::BvpNonConvergence`] when the mesh would
/// exceed `options.max_nodes` or Newton cannot make progress.
pub fn solve_half_line<O: HalfLineOde>(
    ode: &O,
    half: HalfLine,
    options: &BvpOptions,
) -> Result<OdeSolution> {
    if !(half.upper > half.lower) {
        return Err(RobustError::invalid("half-line width", half.upper - half.lower));
    }
    let nodes = options.initial_nodes.max(2);
    let mut mesh: Vec<f64> = (0..nodes)
        .map(|i| half.lower + (half.upper - half.lower) * i as f64 / (nodes - 1) as f64)
        .collect();
    let (kink, slope) = half.kink_point();
    let mut y: Vec<State> = mesh.iter().map(|&z| [slope * (z - kink), slope]).collect();

    let collocation = Collocation { ode, half };
    loop {
        let newton_converged = collocation.newton(&mesh, &mut y, options)?;
        let residuals = collocation.interval_residuals(&mesh, &y)?;
        let max_residual = residuals.iter().cloned().fold(0.0_f64, f64::max);
        debug!(
            "half-line [{}, {}]: {} nodes, max residual {max_residual:.3e}, newton converged {newton_converged}",
            half.lower,
            half.upper,
            mesh.len()
        );

        if newton_converged && max_residual <= options.tolerance {
            let mut values = DMatrix::zeros(2, mesh.len());
            for (j, state) in y.iter().enumerate() {
                values[(0, j)] = state[0];
                values[(1, j)] = state[1];
            }
            return Ok(OdeSolution {
                mesh,
                values,
                max_residual,
            });
        }

        let (refined_mesh, refined_y) = if max_residual <= options.tolerance {
            // Newton stalled on an accurate mesh: split every interval.
            refine(&collocation, &mesh, &y, &vec![f64::INFINITY; mesh.len() - 1], 0.0)?
        } else {
            refine(&collocation, &mesh, &y, &residuals, options.tolerance)?
        };
        if refined_mesh.len() > options.max_nodes {
            return Err(collocation.failure(&refined_mesh, max_residual));
        }
        mesh = refined_mesh;
        y = refined_y;
    }
}

/// Inserts one node into intervals with moderate residuals and two into the rest.
fn refine<O: HalfLineOde>(
    collocation: &Collocation<'_, O>,
    mesh: &[f64],
    y: &[State],
    residuals: &[f64],
    tolerance: f64,
) -> Result<(Vec<f64>, Vec<State>)> {
    let f_nodes = mesh
        .iter()
        .zip(y)
        .map(|(&z, &state)| rhs(collocation.ode, z, state))
        .collect::<Result<Vec<_>>>()?;

    let mut new_mesh = Vec::with_capacity(2 * mesh.len());
    let mut new_y = Vec::with_capacity(2 * mesh.len());
    for i in 0..mesh.len() - 1 {
        new_mesh.push(mesh[i]);
        new_y.push(y[i]);
        let residual = residuals[i];
        if residual <= tolerance {
            continue;
        }
        let fractions: &[f64] = if residual < 100.0 * tolerance {
            &[0.5]
        } else {
            &[1.0 / 3.0, 2.0 / 3.0]
        };
        let h = mesh[i + 1] - mesh[i];
        for &t in fractions {
            let (value, _) = hermite(y[i], y[i + 1], f_nodes[i], f_nodes[i + 1], h, t);
            new_mesh.push(mesh[i] + t * h);
            new_y.push(value);
        }
    }
    new_mesh.push(mesh[mesh.len() - 1]);
    new_y.push(y[y.len() - 1]);
    Ok((new_mesh, new_y))
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    /// `v'' = v + z`, solved by `v = A eᶻ + B e⁻ᶻ − z`.
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
    fn linear_problem_matches_closed_form() {
        let half = HalfLine {
            lower: 0.0,
            upper: 1.5,
            lower_slope: exact(0.0).1,
            upper_slope: exact(1.5).1,
            kink: KinkSide::Lower,
        };
        let solution = solve_half_line(&Linear, half, &BvpOptions::default()).unwrap();
        assert!(solution.max_residual() <= 1e-3);
        for (j, &z) in solution.mesh().iter().enumerate() {
            let (v, dv) = exact(z);
            assert_relative_eq!(solution.values()[(0, j)], v, epsilon = 1e-4);
            assert_relative_eq!(solution.values()[(1, j)], dv, epsilon = 1e-4);
        }
        assert_relative_eq!(solution.first().1, exact(0.0).1, epsilon = 1e-10);
        assert_relative_eq!(solution.last().1, exact(1.5).1, epsilon = 1e-10);

        let grid = [0.0, 0.3, 0.75, 1.5];
        let [level, _] = solution.resample(&grid).unwrap();
        for (z, v) in grid.iter().zip(level) {
            assert_relative_eq!(v, exact(*z).0, epsilon = 1e-3);
        }
    }

    #[test]
    fn mesh_cap_is_reported() {
        let half = HalfLine {
            lower: 0.0,
            upper: 6.0,
            lower_slope: exact(0.0).1,
            upper_slope: exact(6.0).1,
            kink: KinkSide::Lower,
        };
        let options = BvpOptions {
            tolerance: 1e-10,
            max_nodes: 12,
            ..BvpOptions::default()
        };
        let result = solve_half_line(&Linear, half, &options);
        assert!(matches!(result, Err(RobustError::BvpNonConvergence { .. })));
    }

    #[test]
    fn empty_interval_is_rejected() {
        let half = HalfLine {
            lower: 1.0,
            upper: 1.0,
            lower_slope: 0.0,
            upper_slope: 0.0,
            kink: KinkSide::Upper,
        };
        assert!(solve_half_line(&Linear, half, &BvpOptions::default()).is_err());
    }
}
