//! Calibration of the robustness penalty `θ` to a target relative entropy.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::boundary::BoundarySlopes;
use crate::bvp::HjbOde;
use crate::control::QuadraticControl;
use crate::distortion::{drift_distortion, DriftDistortion};
use crate::entropy::relative_entropy;
use crate::error::{RobustError, Result};
use crate::grid::StateGrid;
use crate::kink::{KinkMatcher, MatchedSolution};
use crate::model::{AmbiguityTargets, ModelParameters};
use crate::options::SolverOptions;
use crate::solving::{grid_seed, refine_root};

/// Whether a calibrated model can be trusted downstream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveStatus {
    Unsolved,
    Solved,
}

impl SolveStatus {
    pub fn is_solved(self) -> bool {
        self == Self::Solved
    }
}

/// Outcome of a calibration: the penalty and the diagnostics behind the status.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub theta: f64,
    pub status: SolveStatus,
    /// `|v(z̄⁻) - v(z̄⁺)|` at the calibrated `θ`; absent when no root search ran.
    pub kink_residual: Option<f64>,
    /// Implied minus target relative entropy at the calibrated `θ`.
    ///
    /// The model counts as solved only when the absolute value is within tolerance,
    /// so falling short of the target by more than the tolerance also leaves it unsolved.
    pub entropy_residual: Option<f64>,
    /// Pipeline runs spent by grid search and refinement together.
    pub evaluations: usize,
}

/// The full kink → distortion → entropy chain evaluated at one `θ`.
#[derive(Clone, Debug)]
pub struct ThetaTrial {
    pub theta: f64,
    pub matched: MatchedSolution,
    pub distortion: DriftDistortion,
    /// Relative entropy implied by the distortion.
    pub entropy: f64,
}

/// Searches `θ` for one model, target and grid.
pub struct ThetaCalibrator<'a> {
    params: &'a ModelParameters,
    targets: &'a AmbiguityTargets,
    grid: &'a StateGrid,
    slopes: &'a BoundarySlopes,
    options: &'a SolverOptions,
}

impl<'a> ThetaCalibrator<'a> {
    pub fn new(
        params: &'a ModelParameters,
        targets: &'a AmbiguityTargets,
        grid: &'a StateGrid,
        slopes: &'a BoundarySlopes,
        options: &'a SolverOptions,
    ) -> Self {
        Self {
            params,
            targets,
            grid,
            slopes,
            options,
        }
    }

    /// Runs the kink matcher, the distortion and the entropy evaluator at `theta`.
    pub fn evaluate(&self, theta: f64) -> Result<ThetaTrial> {
        let control = QuadraticControl::new(self.params, self.targets);
        let ode = HjbOde::new(control, theta);
        let matched = KinkMatcher::new(
            &ode,
            self.grid,
            self.slopes,
            &self.options.bvp,
            &self.options.kink,
        )
        .solve()?;
        let distortion = drift_distortion(&control, self.grid, &matched.slope(), theta)?;
        let entropy = relative_entropy(self.params, self.grid, &distortion)?;
        Ok(ThetaTrial {
            theta,
            matched,
            distortion,
            entropy,
        })
    }

    /// Calibrates `θ` and returns the diagnostics with the trial at the calibrated value.
    ///
    /// An infinite entropy target yields `θ = ∞` immediately with no trial.
    pub fn calibrate(&self) -> Result<(Calibration, Option<ThetaTrial>)> {
        if self.targets.is_fully_worst_case() {
            info!("infinite entropy target: θ = ∞");
            return Ok((
                Calibration {
                    theta: f64::INFINITY,
                    status: SolveStatus::Solved,
                    kink_residual: None,
                    entropy_residual: None,
                    evaluations: 0,
                },
                None,
            ));
        }

        search_theta(self.targets.qus(), self.options, |theta| self.evaluate(theta))
    }
}

/// Grid search over the `θ` candidates followed by secant refinement of the entropy gap.
///
/// A candidate is dropped when its kink residual exceeds the reject threshold,
/// when its boundary-value solves fail, or when no kink slope could be matched
/// at all. Errors raised during refinement propagate.
fn search_theta<E>(
    target: f64,
    options: &SolverOptions,
    mut evaluate: E,
) -> Result<(Calibration, Option<ThetaTrial>)>
where
    E: FnMut(f64) -> Result<ThetaTrial>,
{
    let settings = &options.calibration;
    let reject_threshold = options.kink.reject_threshold;
    let mut trials: Vec<ThetaTrial> = Vec::new();

    let seed = grid_seed(&settings.theta_candidates, "calibrating θ", |theta| {
        let trial = match evaluate(theta) {
            Ok(trial) => trial,
            Err(RobustError::NoAdmissibleCandidate { context }) => {
                warn!("no kink slope matched at θ = {theta} while {context}");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        let gap = trial.entropy - target;
        let usable = trial.matched.is_usable(reject_threshold);
        trials.push(trial);
        Ok(usable.then_some(gap))
    })?;
    let summary = refine_root(&seed, &settings.root, |theta| {
        let trial = evaluate(theta)?;
        let gap = trial.entropy - target;
        trials.push(trial);
        Ok(gap)
    })?;
    let evaluations = settings.theta_candidates.len() + summary.evaluations;

    let trial = match trials.into_iter().rev().find(|trial| trial.theta == summary.root) {
        Some(trial) => trial,
        None => evaluate(summary.root)?,
    };
    let kink_residual = trial.matched.residual();
    let entropy_residual = trial.entropy - target;
    let status = if entropy_residual.abs() < settings.entropy_tolerance
        && kink_residual < settings.kink_tolerance
    {
        SolveStatus::Solved
    } else {
        SolveStatus::Unsolved
    };

    if status.is_solved() {
        info!(
            "θ calibrated to {:.6} (entropy residual {entropy_residual:.3e}, kink residual {kink_residual:.3e})",
            summary.root
        );
    } else {
        warn!(
            "θ calibration left the model unsolved at θ = {} (entropy residual {entropy_residual:.3e}, kink residual {kink_residual:.3e})",
            summary.root
        );
    }

    Ok((
        Calibration {
            theta: summary.root,
            status,
            kink_residual: Some(kink_residual),
            entropy_residual: Some(entropy_residual),
            evaluations,
        },
        Some(trial),
    ))
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    use super::*;
    use crate::boundary::approximate_boundary;

    /// Trial at `theta` with the given implied entropy and kink mismatch.
    fn trial(theta: f64, entropy: f64, kink_residual: f64) -> ThetaTrial {
        ThetaTrial {
            theta,
            matched: MatchedSolution::flat(kink_residual),
            distortion: DriftDistortion::new(DMatrix::zeros(4, 1), vec![0.0], vec![0.0]).unwrap(),
            entropy,
        }
    }

    #[test]
    fn infinite_target_skips_the_search() {
        let params = ModelParameters::default();
        let targets = AmbiguityTargets::new(&params, 0.05, f64::INFINITY, None).unwrap();
        let grid = StateGrid::symmetric(params.z_bar(), 2.5, 0.05).unwrap();
        let slopes = approximate_boundary(&params, &targets).unwrap();
        let options = SolverOptions::default();

        let (calibration, trial) = ThetaCalibrator::new(&params, &targets, &grid, &slopes, &options)
            .calibrate()
            .unwrap();
        assert!(calibration.theta.is_infinite());
        assert_eq!(calibration.status, SolveStatus::Solved);
        assert_eq!(calibration.evaluations, 0);
        assert!(calibration.entropy_residual.is_none());
        assert!(trial.is_none());
    }

    #[test]
    fn failed_and_mismatched_candidates_are_dropped() {
        let options = SolverOptions::default();
        let mut visited = Vec::new();
        // Entropy 0.05 / θ crosses the 0.1 target at θ = 0.5.
        let (calibration, chosen) = search_theta(0.1, &options, |theta| {
            visited.push(theta);
            if theta == 0.1 {
                Err(RobustError::NoAdmissibleCandidate {
                    context: "matching the kink slope",
                })
            } else if theta == 0.2 {
                Err(RobustError::BvpNonConvergence {
                    lower: -2.5,
                    upper: 0.0,
                    nodes: 1_001,
                    max_residual: 1.0,
                })
            } else if theta == 0.3 {
                Ok(trial(theta, 0.1, 5.0))
            } else {
                Ok(trial(theta, 0.05 / theta, 0.0))
            }
        })
        .unwrap();

        assert_eq!(&visited[..8], options.calibration.theta_candidates.as_slice());
        assert_eq!(calibration.status, SolveStatus::Solved);
        assert_relative_eq!(calibration.theta, 0.5, epsilon = 1e-6);
        assert!(calibration.entropy_residual.unwrap().abs() < 1e-2);
        assert_eq!(calibration.kink_residual, Some(0.0));
        assert_eq!(chosen.unwrap().theta, calibration.theta);
    }

    #[test]
    fn every_candidate_failing_is_reported_for_theta() {
        let options = SolverOptions::default();
        let err = search_theta(0.1, &options, |_| {
            Err(RobustError::NoAdmissibleCandidate {
                context: "matching the kink slope",
            })
        })
        .unwrap_err();
        match err {
            RobustError::NoAdmissibleCandidate { context } => assert_eq!(context, "calibrating θ"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn unmatched_kinks_reject_theta_instead_of_aborting() {
        let params = ModelParameters::default();
        let targets = AmbiguityTargets::new(&params, 0.05, 0.1, None).unwrap();
        let grid = StateGrid::symmetric(params.z_bar(), 2.5, 0.05).unwrap();
        let slopes = approximate_boundary(&params, &targets).unwrap();
        let mut options = SolverOptions::default();
        options.bvp.tolerance = 1e-14;
        options.bvp.max_nodes = 12;

        let err = ThetaCalibrator::new(&params, &targets, &grid, &slopes, &options)
            .calibrate()
            .unwrap_err();
        match err {
            RobustError::NoAdmissibleCandidate { context } => assert_eq!(context, "calibrating θ"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn refinement_respects_the_evaluation_cap() {
        let options = SolverOptions::default();
        let cap = options.calibration.root.max_evaluations;
        let mut runs = 0;
        // The entropy gap never closes, so the secant keeps pushing towards θ = 0.
        let (calibration, chosen) = search_theta(0.1, &options, |theta| {
            runs += 1;
            Ok(trial(theta, 1.1 + 0.01 * theta, 0.0))
        })
        .unwrap();

        let candidates = options.calibration.theta_candidates.len();
        assert!(calibration.evaluations <= candidates + cap);
        assert_eq!(calibration.evaluations, runs);
        assert_eq!(calibration.status, SolveStatus::Unsolved);
        assert!(calibration.theta > 0.0);
        assert!(chosen.is_some());
    }

    #[test]
    fn missing_the_target_from_below_stays_unsolved() {
        let mut options = SolverOptions::default();
        options.calibration.theta_candidates = vec![0.4];
        options.calibration.root = options.calibration.root.clone().with_max_evaluations(1);
        // Flat entropy 0.05 below the target: a negative gap is still a miss.
        let (calibration, _) = search_theta(0.1, &options, |theta| Ok(trial(theta, 0.05, 0.0))).unwrap();
        assert_eq!(calibration.status, SolveStatus::Unsolved);
        assert_relative_eq!(calibration.entropy_residual.unwrap(), -0.05, epsilon = 1e-12);
    }
}
