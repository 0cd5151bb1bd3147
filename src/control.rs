//! Closed-form minimization embedded in the HJB right-hand side.
//!
//! At every state the decision maker minimizes `0.01 s1 + v' s2` (plus the
//! baseline drifts) over controls `(s1, s2)` restricted to the ellipse
//!
//! ```text
//! ½ (a s1² + 2 b s1 s2 + d s2²) + C1(z) s2 + C0(z) = 0
//! ```
//!
//! `s1` is eliminated through its lower root [`QuadraticControl::companion_s1`];
//! the first-order condition in `s2` is then a quadratic whose two roots are
//! the two analytic branches returned by [`QuadraticControl::branches`].

use serde::{Deserialize, Serialize};

use crate::error::{RobustError, Result};
use crate::model::{AmbiguityTargets, ModelParameters, CAPITAL_SCALE};

/// One branch of the first-order condition: the control `s2` and the objective it attains.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControlBranch {
    pub s2: f64,
    pub objective: f64,
}

/// The pointwise minimization for a fixed model and ambiguity configuration.
#[derive(Clone, Copy, Debug)]
pub struct QuadraticControl<'a> {
    params: &'a ModelParameters,
    targets: &'a AmbiguityTargets,
}

impl<'a> QuadraticControl<'a> {
    pub fn new(params: &'a ModelParameters, targets: &'a AmbiguityTargets) -> Self {
        Self { params, targets }
    }

    pub fn params(&self) -> &'a ModelParameters {
        self.params
    }

    pub fn targets(&self) -> &'a AmbiguityTargets {
        self.targets
    }

    /// `C1(z) = ρ1 + ρ2 (z - z̄)`.
    fn entropy_slope(&self, z: f64) -> f64 {
        self.params.rho1() + self.targets.rho2() * (z - self.params.z_bar())
    }

    /// `C0(z)`, the part of the ellipse equation that does not involve the controls.
    fn entropy_level(&self, z: f64) -> f64 {
        let q0s = self.targets.q0s();
        self.entropy_slope(z) * self.params.centered_z_drift(z)
            + 0.5 * self.params.sigma_z_norm_sq() * self.targets.rho2()
            - 0.5 * q0s * q0s
    }

    /// Lower root `s1` of the ellipse equation for a given `s2`.
    ///
    /// `dv` only labels the [`RobustError::InfeasibleControl`] raised when the
    /// ellipse misses `s2`.
    pub fn companion_s1(&self, z: f64, dv: f64, s2: f64) -> Result<f64> {
        let a = 0.5 * self.params.a();
        let b = self.params.b() * s2;
        let c = 0.5 * self.params.d() * s2 * s2 + self.entropy_slope(z) * s2 + self.entropy_level(z);
        let discriminant = b * b - 4.0 * a * c;
        if discriminant < 0.0 {
            return Err(RobustError::InfeasibleControl { z, dv });
        }
        Ok((-b - discriminant.sqrt()) / (2.0 * a))
    }

    /// Objective `0.01 (k drift + s1) + v' (z drift + s2)` at control `s2`.
    pub fn objective(&self, z: f64, dv: f64, s2: f64) -> Result<f64> {
        let s1 = self.companion_s1(z, dv, s2)?;
        Ok(CAPITAL_SCALE * (self.params.k_drift(z) + s1)
            + dv * (self.params.centered_z_drift(z) + s2))
    }

    /// Both roots of the first-order condition in `s2`, each with its objective value.
    ///
    /// Fails with [`RobustError::InfeasibleControl`] when either quadratic has a
    /// negative discriminant.
    pub fn branches(&self, z: f64, dv: f64) -> Result<[ControlBranch; 2]> {
        let (a, b, d) = (self.params.a(), self.params.b(), self.params.d());
        let half_a = 0.5 * a;
        let c0 = self.entropy_level(z);
        let c1 = self.entropy_slope(z);
        let c2 = 0.5 * d;
        let cross = b * b / (2.0 * half_a) - 2.0 * c2;
        let tilt = (dv / CAPITAL_SCALE - b / (2.0 * half_a)).powi(2);

        let qa = tilt * b * b - 4.0 * half_a * tilt * c2 - cross * cross;
        let qb = 2.0 * c1 * cross - 4.0 * half_a * tilt * c1;
        let qc = -4.0 * half_a * c0 * tilt - c1 * c1;

        let discriminant = qb * qb - 4.0 * qa * qc;
        if discriminant < 0.0 {
            return Err(RobustError::InfeasibleControl { z, dv });
        }
        let root = discriminant.sqrt();
        let mut branches = [(-qb + root) / (2.0 * qa), (-qb - root) / (2.0 * qa)].map(|s2| {
            ControlBranch {
                s2,
                objective: f64::NAN,
            }
        });
        for branch in branches.iter_mut() {
            if !branch.s2.is_finite() {
                return Err(RobustError::NumericalError {
                    context: "degenerate control quadratic",
                });
            }
            branch.objective = self.objective(z, dv, branch.s2)?;
        }
        Ok(branches)
    }

    /// The branch with the smaller objective; ties keep the `+√` root.
    pub fn minimize(&self, z: f64, dv: f64) -> Result<ControlBranch> {
        let [first, second] = self.branches(z, dv)?;
        Ok(if first.objective <= second.objective {
            first
        } else {
            second
        })
    }

    /// [`minimize`](Self::minimize) over paired arrays of states and slopes.
    pub fn minimize_many(&self, z: &[f64], dv: &[f64]) -> Result<Vec<ControlBranch>> {
        if z.len() != dv.len() {
            return Err(RobustError::dimension_mismatch(
                "control slopes",
                z.len(),
                dv.len(),
            ));
        }
        z.iter()
            .zip(dv)
            .map(|(&z, &dv)| self.minimize(z, dv))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::{Distribution, Normal};

    use super::*;

    fn setup() -> (ModelParameters, AmbiguityTargets) {
        let params = ModelParameters::default();
        let targets = AmbiguityTargets::new(&params, 0.05, 0.1, None).unwrap();
        (params, targets)
    }

    #[test]
    fn minimum_never_exceeds_either_branch() {
        let (params, targets) = setup();
        let control = QuadraticControl::new(&params, &targets);
        let mut rng = SmallRng::seed_from_u64(17);
        let slopes = Normal::new(0.2, 0.4).unwrap();
        let mut feasible = 0;
        for _ in 0..500 {
            let z = rng.gen_range(-2.5..2.5);
            let dv = slopes.sample(&mut rng);
            let Ok(branches) = control.branches(z, dv) else {
                continue;
            };
            let best = control.minimize(z, dv).unwrap();
            assert!(best.objective <= branches[0].objective);
            assert!(best.objective <= branches[1].objective);
            feasible += 1;
        }
        assert!(feasible > 100, "only {feasible} feasible draws");
    }

    #[test]
    fn selected_controls_lie_on_the_entropy_ellipse() {
        let (params, targets) = setup();
        let control = QuadraticControl::new(&params, &targets);
        for (z, dv) in [(0.5, 0.1), (-1.2, 0.3), (2.0, -0.05)] {
            let Ok(best) = control.minimize(z, dv) else {
                continue;
            };
            let s2 = best.s2;
            let s1 = control.companion_s1(z, dv, s2).unwrap();
            let ellipse = 0.5 * (params.a() * s1 * s1 + 2.0 * params.b() * s1 * s2 + params.d() * s2 * s2)
                + control.entropy_slope(z) * s2
                + control.entropy_level(z);
            assert!(ellipse.abs() < 1e-9, "ellipse residual {ellipse}");
        }
    }

    #[test]
    fn vectorized_minimization_matches_scalar_calls() {
        let (params, targets) = setup();
        let control = QuadraticControl::new(&params, &targets);
        let z = [0.3, 0.7, 1.1];
        let dv = [0.02, 0.05, 0.08];
        let many = control.minimize_many(&z, &dv).unwrap();
        for i in 0..3 {
            assert_eq!(many[i], control.minimize(z[i], dv[i]).unwrap());
        }
        assert!(control.minimize_many(&z, &dv[..2]).is_err());
    }

    #[test]
    fn infeasible_companion_reports_the_slope() {
        let (params, targets) = setup();
        let control = QuadraticControl::new(&params, &targets);
        match control.companion_s1(0.4, 0.25, 10.0) {
            Err(RobustError::InfeasibleControl { z, dv }) => {
                assert_eq!(z, 0.4);
                assert_eq!(dv, 0.25);
            }
            other => panic!("expected an infeasible control, got {other:?}"),
        }
    }
}
