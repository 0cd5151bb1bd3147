//! Scalar solvers shared by the kink matcher, the θ calibration and the Chernoff evaluator.
//!
//! Both nested root-finding problems in the pipeline follow the same recipe:
//! try a short list of candidates, seed a secant iteration at the candidate
//! with the smallest residual, and keep the iteration inside any sign-change
//! bracket the candidates revealed. [`grid_seed`] and [`refine_root`] implement the
//! two stages; [`minimize_bounded`] is Brent's method on an interval.

use log::{debug, warn};

use crate::error::{RobustError, Result};

/// Configuration for the secant refinement of a scalar root.
#[derive(Clone, Debug)]
pub struct RootOptions {
    /// Maximum number of objective evaluations performed by the refinement.
    pub max_evaluations: usize,
    /// Relative tolerance between consecutive iterates.
    pub x_tolerance: f64,
    /// Absolute residual at which the iteration stops immediately.
    pub f_tolerance: f64,
    /// Iterates are kept strictly above this value.
    pub lower_bound: f64,
}

impl Default for RootOptions {
    fn default() -> Self {
        Self {
            max_evaluations: 100,
            x_tolerance: 1.49012e-8,
            f_tolerance: 1e-12,
            lower_bound: f64::NEG_INFINITY,
        }
    }
}

impl RootOptions {
    pub fn with_max_evaluations(mut self, max_evaluations: usize) -> Self {
        self.max_evaluations = max_evaluations.max(1);
        self
    }

    pub fn with_lower_bound(mut self, lower_bound: f64) -> Self {
        self.lower_bound = lower_bound;
        self
    }

    pub fn with_x_tolerance(mut self, x_tolerance: f64) -> Self {
        self.x_tolerance = x_tolerance;
        self
    }
}

/// Adjacent candidates whose residuals have opposite signs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bracket {
    pub lower: f64,
    pub lower_value: f64,
    pub upper: f64,
    pub upper_value: f64,
}

impl Bracket {
    fn contains(&self, x: f64) -> bool {
        x > self.lower && x < self.upper
    }

    fn shrink(&mut self, x: f64, value: f64) {
        if value.signum() == self.lower_value.signum() {
            self.lower = x;
            self.lower_value = value;
        } else {
            self.upper = x;
            self.upper_value = value;
        }
    }
}

/// Starting point selected by [`grid_seed`].
#[derive(Clone, Debug, PartialEq)]
pub struct Seed {
    /// Candidate with the smallest absolute residual.
    pub x: f64,
    /// Residual at `x`.
    pub value: f64,
    /// Sign-change bracket among adjacent admissible candidates, if any.
    pub bracket: Option<Bracket>,
}

/// Diagnostics of a root refinement.
#[derive(Clone, Debug, PartialEq)]
pub struct RootSummary {
    /// Best iterate found (smallest absolute residual).
    pub root: f64,
    /// Residual at `root`.
    pub value: f64,
    /// Objective evaluations spent by the refinement.
    pub evaluations: usize,
    /// Whether a tolerance was met before the evaluation cap.
    pub converged: bool,
}

/// Evaluates every candidate and returns the one with the smallest absolute residual.
///
/// `residual` returns `Ok(None)` for a candidate it rejects outright. Errors that
/// mark a failed numerical trial also reject the candidate; any other error is
/// propagated.
pub fn grid_seed<F>(candidates: &[f64], context: &'static str, mut residual: F) -> Result<Seed>
where
    F: FnMut(f64) -> Result<Option<f64>>,
{
    let mut values: Vec<Option<f64>> = Vec::with_capacity(candidates.len());
    for &candidate in candidates {
        let value = match residual(candidate) {
            Ok(Some(value)) if value.is_finite() => Some(value),
            Ok(_) => {
                warn!("{context}: candidate {candidate} rejected");
                None
            }
            Err(err) if err.is_trial_failure() => {
                warn!("{context}: candidate {candidate} failed: {err}");
                None
            }
            Err(err) => return Err(err),
        };
        debug!("{context}: candidate {candidate} -> {value:?}");
        values.push(value);
    }

    let best = values
        .iter()
        .enumerate()
        .filter_map(|(index, value)| value.map(|v| (index, v)))
        .min_by(|(_, a), (_, b)| a.abs().total_cmp(&b.abs()))
        .ok_or(RobustError::NoAdmissibleCandidate { context })?;

    let mut bracket: Option<Bracket> = None;
    let mut bracket_score = f64::INFINITY;
    for index in 1..candidates.len() {
        if let (Some(left), Some(right)) = (values[index - 1], values[index]) {
            let score = left.abs().min(right.abs());
            if left.signum() != right.signum() && score < bracket_score {
                bracket_score = score;
                let (x0, x1) = (candidates[index - 1], candidates[index]);
                bracket = Some(if x0 <= x1 {
                    Bracket {
                        lower: x0,
                        lower_value: left,
                        upper: x1,
                        upper_value: right,
                    }
                } else {
                    Bracket {
                        lower: x1,
                        lower_value: right,
                        upper: x0,
                        upper_value: left,
                    }
                });
            }
        }
    }

    Ok(Seed {
        x: candidates[best.0],
        value: best.1,
        bracket,
    })
}

/// Drives `objective` to zero with a safeguarded secant iteration started at `seed`.
///
/// The first secant slope comes from a forward difference. Steps that leave a
/// known sign-change bracket fall back to bisection, and steps are capped at a
/// hundred times the scale of the seed. When the evaluation cap is reached the
/// best iterate is returned with `converged = false`; errors from `objective`
/// propagate.
pub fn refine_root<F>(seed: &Seed, options: &RootOptions, mut objective: F) -> Result<RootSummary>
where
    F: FnMut(f64) -> Result<f64>,
{
    if seed.value.abs() <= options.f_tolerance {
        return Ok(RootSummary {
            root: seed.x,
            value: seed.value,
            evaluations: 0,
            converged: true,
        });
    }

    let scale = seed.x.abs().max(1.0);
    let max_step = 100.0 * scale;
    let mut bracket = seed.bracket;
    let mut best = (seed.x, seed.value);
    let mut evaluate = |x: f64| -> Result<f64> {
        let value = objective(x)?;
        if !value.is_finite() {
            return Err(RobustError::NumericalError {
                context: "root refinement objective",
            });
        }
        Ok(value)
    };

    let (mut x_prev, mut f_prev) = (seed.x, seed.value);
    let mut x_cur = seed.x + 1e-6 * scale;
    if x_cur <= options.lower_bound {
        x_cur = seed.x - 1e-6 * scale;
    }
    let mut f_cur = evaluate(x_cur)?;
    let mut spent = 1usize;

    loop {
        if f_cur.abs() < best.1.abs() {
            best = (x_cur, f_cur);
        }
        if f_cur.abs() <= options.f_tolerance {
            return Ok(RootSummary {
                root: x_cur,
                value: f_cur,
                evaluations: spent,
                converged: true,
            });
        }
        if spent >= options.max_evaluations {
            warn!("root refinement stopped after {spent} evaluations; best residual {}", best.1);
            return Ok(RootSummary {
                root: best.0,
                value: best.1,
                evaluations: spent,
                converged: false,
            });
        }

        let slope = (f_cur - f_prev) / (x_cur - x_prev);
        let mut x_next = if slope != 0.0 && slope.is_finite() {
            x_cur + (-f_cur / slope).clamp(-max_step, max_step)
        } else {
            f64::NAN
        };
        if let Some(bracket) = &bracket {
            if !bracket.contains(x_next) {
                x_next = 0.5 * (bracket.lower + bracket.upper);
            }
        }
        if !x_next.is_finite() {
            warn!("root refinement stalled on a flat secant at {x_cur}");
            return Ok(RootSummary {
                root: best.0,
                value: best.1,
                evaluations: spent,
                converged: false,
            });
        }
        if x_next <= options.lower_bound {
            x_next = 0.5 * (x_cur + options.lower_bound);
        }

        let f_next = evaluate(x_next)?;
        spent += 1;
        debug!("root refinement: f({x_next}) = {f_next}");
        if let Some(bracket) = bracket.as_mut() {
            bracket.shrink(x_next, f_next);
        }

        let step = (x_next - x_cur).abs();
        x_prev = x_cur;
        f_prev = f_cur;
        x_cur = x_next;
        f_cur = f_next;

        if step <= options.x_tolerance * (x_prev.abs() + options.x_tolerance) {
            if f_cur.abs() < best.1.abs() {
                best = (x_cur, f_cur);
            }
            return Ok(RootSummary {
                root: best.0,
                value: best.1,
                evaluations: spent,
                converged: true,
            });
        }
    }
}

/// Result of [`minimize_bounded`].
#[derive(Clone, Debug, PartialEq)]
pub struct Minimum {
    pub x: f64,
    pub value: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Brent's bounded minimization of `f` over `[lower, upper]`, started at `start`.
pub fn minimize_bounded<F>(
    lower: f64,
    upper: f64,
    start: f64,
    tolerance: f64,
    max_iterations: usize,
    mut f: F,
) -> Result<Minimum>
where
    F: FnMut(f64) -> Result<f64>,
{
    if !(lower < upper) {
        return Err(RobustError::invalid("minimization interval", upper - lower));
    }
    const GOLDEN: f64 = 0.381_966_011_250_105_1;
    let sqrt_eps = f64::EPSILON.sqrt();

    let (mut a, mut b) = (lower, upper);
    let mut x = start.clamp(lower, upper);
    if x <= a || x >= b {
        x = a + GOLDEN * (b - a);
    }
    let mut fx = f(x)?;
    let (mut w, mut fw, mut v, mut fv) = (x, fx, x, fx);
    let (mut d, mut e) = (0.0_f64, 0.0_f64);

    for iteration in 0..max_iterations {
        let midpoint = 0.5 * (a + b);
        let tol1 = sqrt_eps * x.abs() + tolerance / 3.0;
        let tol2 = 2.0 * tol1;
        if (x - midpoint).abs() <= tol2 - 0.5 * (b - a) {
            return Ok(Minimum {
                x,
                value: fx,
                iterations: iteration,
                converged: true,
            });
        }

        let mut golden = true;
        if e.abs() > tol1 {
            let r = (x - w) * (fx - fv);
            let mut q = (x - v) * (fx - fw);
            let mut p = (x - v) * q - (x - w) * r;
            q = 2.0 * (q - r);
            if q > 0.0 {
                p = -p;
            }
            q = q.abs();
            let previous = e;
            e = d;
            if p.abs() < (0.5 * q * previous).abs() && p > q * (a - x) && p < q * (b - x) {
                d = p / q;
                let u = x + d;
                if u - a < tol2 || b - u < tol2 {
                    d = tol1.copysign(midpoint - x);
                }
                golden = false;
            }
        }
        if golden {
            e = if x >= midpoint { a - x } else { b - x };
            d = GOLDEN * e;
        }

        let u = if d.abs() >= tol1 {
            x + d
        } else {
            x + tol1.copysign(d)
        };
        let fu = f(u)?;

        if fu <= fx {
            if u >= x {
                a = x;
            } else {
                b = x;
            }
            v = w;
            fv = fw;
            w = x;
            fw = fx;
            x = u;
            fx = fu;
        } else {
            if u < x {
                a = u;
            } else {
                b = u;
            }
            if fu <= fw || w == x {
                v = w;
                fv = fw;
                w = u;
                fw = fu;
            } else if fu <= fv || v == x || v == w {
                v = u;
                fv = fu;
            }
        }
    }

    warn!("bounded minimization hit its iteration cap at x = {x}");
    Ok(Minimum {
        x,
        value: fx,
        iterations: max_iterations,
        converged: false,
    })
}
