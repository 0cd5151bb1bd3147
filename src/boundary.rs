//! Asymptotic slopes of the value function, used as derivative boundary conditions.
//!
//! Far from the mean the HJB right-hand side settles on a fixed point where the
//! slope `ν` and the controls `(s1, s2)` solve
//!
//! ```text
//! (s2 - δ - βz) ν + 0.01 (βk + s1)                    = 0
//! ν (a s1 + b s2) - 0.01 (b s1 + d s2 + ρ2)           = 0
//! ½ (a s1² + 2 b s1 s2 + d s2²) + ρ2 (s2 - βz)        = 0
//! ```
//!
//! Eliminating `ν` between the first two equations leaves a conic whose
//! difference with twice the third is linear in `(s1, s2)`, so the system
//! reduces to one quadratic and is solved in closed form.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{RobustError, Result};
use crate::model::{AmbiguityTargets, ModelParameters, CAPITAL_SCALE};

/// One real solution of the asymptotic system.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AsymptoticRoot {
    pub nu: f64,
    pub s1: f64,
    pub s2: f64,
}

/// Derivative boundary values for the two half-lines.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundarySlopes {
    /// Largest real slope, imposed at the left end of the state interval.
    pub left: f64,
    /// Smallest real slope, imposed at the right end.
    pub right: f64,
    /// Every real solution that passed verification.
    pub roots: Vec<AsymptoticRoot>,
}

impl BoundarySlopes {
    /// Builds slopes directly, e.g. for a synthetic ODE with known asymptotics.
    pub fn new(left: f64, right: f64) -> Self {
        Self {
            left,
            right,
            roots: Vec::new(),
        }
    }

    /// Evenly spaced kink-slope candidates covering the interior `1 - 2·shrink` of `[right, left]`.
    pub fn interior_candidates(&self, count: usize, shrink: f64) -> Vec<f64> {
        let width = self.left - self.right;
        let start = self.right + shrink * width;
        let end = self.left - shrink * width;
        match count {
            0 => Vec::new(),
            1 => vec![0.5 * (start + end)],
            _ => (0..count)
                .map(|i| start + (end - start) * i as f64 / (count - 1) as f64)
                .collect(),
        }
    }
}

/// Solves the asymptotic system and returns the extreme real slopes.
pub fn approximate_boundary(
    params: &ModelParameters,
    targets: &AmbiguityTargets,
) -> Result<BoundarySlopes> {
    let (a, b, d) = (params.a(), params.b(), params.d());
    let (beta_k, beta_z) = (params.beta_k(), params.beta_z());
    let rho2 = targets.rho2();
    let c = params.delta() + beta_z;

    let p = a * beta_k - b * c;
    let q = b * beta_k - c * d - rho2;
    let r = rho2 * (beta_z - params.delta());

    let mut candidates: Vec<(f64, f64)> = Vec::new();
    if p.abs() >= q.abs() && p != 0.0 {
        // s1 = α s2 + β
        let (alpha, beta) = (-q / p, -r / p);
        let roots = real_quadratic_roots(
            a * alpha * alpha + 2.0 * b * alpha + d,
            2.0 * (a * alpha * beta + b * beta + rho2),
            a * beta * beta - 2.0 * rho2 * beta_z,
        );
        candidates.extend(roots.into_iter().map(|s2| (alpha * s2 + beta, s2)));
    } else if q != 0.0 {
        // s2 = α s1 + β
        let (alpha, beta) = (-p / q, -r / q);
        let roots = real_quadratic_roots(
            a + 2.0 * b * alpha + d * alpha * alpha,
            2.0 * (b * beta + d * alpha * beta + rho2 * alpha),
            d * beta * beta + 2.0 * rho2 * beta - 2.0 * rho2 * beta_z,
        );
        candidates.extend(roots.into_iter().map(|s1| (s1, alpha * s1 + beta)));
    } else {
        return Err(RobustError::NoRealBoundary);
    }

    let mut roots: Vec<AsymptoticRoot> = candidates
        .into_iter()
        .filter_map(|(s1, s2)| {
            let gap = c - s2;
            if gap.abs() <= f64::EPSILON * c.abs().max(1.0) {
                return None;
            }
            Some(AsymptoticRoot {
                nu: CAPITAL_SCALE * (beta_k + s1) / gap,
                s1,
                s2,
            })
        })
        .collect();

    // The elimination divides by `s2 - c`; recover a root sitting exactly there.
    let s1 = -beta_k;
    let denominator = a * s1 + b * c;
    if denominator != 0.0 {
        let nu = CAPITAL_SCALE * (b * s1 + d * c + rho2) / denominator;
        roots.push(AsymptoticRoot { nu, s1, s2: c });
    }

    roots.retain(|root| {
        let residual = asymptotic_residual(params, targets, root);
        root.nu.is_finite() && residual <= 1e-8
    });
    debug!("asymptotic boundary roots: {roots:?}");

    let left = roots
        .iter()
        .map(|root| root.nu)
        .fold(f64::NEG_INFINITY, f64::max);
    let right = roots.iter().map(|root| root.nu).fold(f64::INFINITY, f64::min);
    if roots.is_empty() {
        return Err(RobustError::NoRealBoundary);
    }
    Ok(BoundarySlopes { left, right, roots })
}

/// Largest scaled residual of the three asymptotic equations at `root`.
pub fn asymptotic_residual(
    params: &ModelParameters,
    targets: &AmbiguityTargets,
    root: &AsymptoticRoot,
) -> f64 {
    let (a, b, d) = (params.a(), params.b(), params.d());
    let rho2 = targets.rho2();
    let AsymptoticRoot { nu, s1, s2 } = *root;

    let f1 = (-params.delta() - params.beta_z() + s2) * nu + CAPITAL_SCALE * (params.beta_k() + s1);
    let f2 = nu * (a * s1 + b * s2) - CAPITAL_SCALE * (b * s1 + d * s2 + rho2);
    let f3 = 0.5 * (a * s1 * s1 + 2.0 * b * s1 * s2 + d * s2 * s2) + rho2 * (s2 - params.beta_z());

    let scale1 = (nu * s2).abs() + CAPITAL_SCALE * (params.beta_k().abs() + s1.abs()) + 1e-12;
    let scale2 = (nu * (a * s1).abs()).abs()
        + (nu * b * s2).abs()
        + CAPITAL_SCALE * ((b * s1).abs() + (d * s2).abs() + rho2)
        + 1e-12;
    let scale3 = 0.5 * (a * s1 * s1 + 2.0 * (b * s1 * s2).abs() + d * s2 * s2)
        + rho2 * (s2.abs() + params.beta_z())
        + 1e-12;
    (f1.abs() / scale1)
        .max(f2.abs() / scale2)
        .max(f3.abs() / scale3)
}

fn real_quadratic_roots(a: f64, b: f64, c: f64) -> Vec<f64> {
    let scale = a.abs().max(b.abs()).max(c.abs());
    if scale == 0.0 {
        return Vec::new();
    }
    if a.abs() <= 1e-14 * scale {
        return if b != 0.0 { vec![-c / b] } else { Vec::new() };
    }
    let discriminant = b * b - 4.0 * a * c;
    if discriminant < 0.0 {
        return Vec::new();
    }
    // Cancellation-free form of the two roots.
    let q = -0.5 * (b + discriminant.sqrt().copysign(b));
    if q == 0.0 {
        return vec![0.0, 0.0];
    }
    vec![q / a, c / q]
}
