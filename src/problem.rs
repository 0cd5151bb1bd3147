//! End-to-end pipeline: boundary slopes, `θ` calibration, half-life, drift update and
//! shock-price elasticities.

use log::{info, warn};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::boundary::{approximate_boundary, BoundarySlopes};
use crate::bvp::HjbOde;
use crate::calibration::{Calibration, SolveStatus, ThetaCalibrator, ThetaTrial};
use crate::control::QuadraticControl;
use crate::distortion::{update_drift, DriftDistortion, WorstCaseDrift};
use crate::entropy::{chernoff_entropy, ChernoffEntropy};
use crate::error::Result;
use crate::feynman_kac::{forward_expectation, QuantileCurves};
use crate::grid::StateGrid;
use crate::model::{AmbiguityTargets, ModelParameters, CAPITAL_SCALE};
use crate::options::SolverOptions;

/// A model and an ambiguity configuration to be solved together.
#[derive(Clone, Debug)]
pub struct RobustProblem {
    params: ModelParameters,
    targets: AmbiguityTargets,
}

impl RobustProblem {
    pub fn new(params: ModelParameters, targets: AmbiguityTargets) -> Self {
        Self { params, targets }
    }

    /// Accessor for the baseline model.
    pub fn params(&self) -> &ModelParameters {
        &self.params
    }

    /// Accessor for the ambiguity targets.
    pub fn targets(&self) -> &AmbiguityTargets {
        &self.targets
    }

    /// State grid centered on the long-run mean with the configured spacing.
    pub fn grid(&self, options: &SolverOptions) -> Result<StateGrid> {
        StateGrid::symmetric(self.params.z_bar(), options.half_width, options.grid_spacing)
    }

    /// Runs the full pipeline.
    ///
    /// Derived quantities (half-life, worst-case drifts, elasticities) are only
    /// produced for models that end up [`SolveStatus::Solved`].
    pub fn solve(&self, options: &SolverOptions) -> Result<SolvedModel> {
        let grid = self.grid(options)?;
        let boundary = approximate_boundary(&self.params, &self.targets)?;
        info!(
            "asymptotic slopes: left {:.6}, right {:.6}",
            boundary.left, boundary.right
        );

        let calibrator = ThetaCalibrator::new(&self.params, &self.targets, &grid, &boundary, options);
        let (calibration, trial) = calibrator.calibrate()?;
        let trial = match trial {
            Some(trial) => trial,
            None => calibrator.evaluate(calibration.theta)?,
        };

        let mut model = SolvedModel::from_trial(&grid, boundary, calibration, &trial);
        if !model.status.is_solved() {
            warn!("skipping derived outputs for an unsolved model");
            return Ok(model);
        }

        if options.compute_half_life {
            let chernoff = chernoff_entropy(&self.params, &grid, &trial.distortion, &options.chernoff)?;
            info!("half-life {:.2} quarters", chernoff.half_life());
            model.half_life = Some(chernoff.half_life());
            model.chernoff = Some(chernoff);
        }

        let control = QuadraticControl::new(&self.params, &self.targets);
        let ode = HjbOde::new(control, model.theta);
        model.drift = Some(update_drift(
            &ode,
            &grid,
            &trial.matched.level(),
            &trial.matched.slope(),
            &trial.distortion,
        )?);

        model.elasticities = Some(ShockPriceElasticities::compute(
            &self.params,
            &grid,
            &trial.distortion,
            options,
        )?);
        info!("pipeline finished for θ = {}", model.theta);
        Ok(model)
    }
}

/// Shock-price elasticities for both shocks, each sampled at three stationary quantiles.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShockPriceElasticities {
    /// `-E[h_i] + 0.01 σk[i]`.
    pub shock: [QuantileCurves; 2],
    /// `-E[r_i]`.
    pub ambiguity: [QuantileCurves; 2],
    /// `E[r_i] - E[h_i]`.
    pub misspecification: [QuantileCurves; 2],
}

impl ShockPriceElasticities {
    /// Runs the forward solver on every distortion coordinate under the worst-case drift of `z`.
    pub fn compute(
        params: &ModelParameters,
        grid: &StateGrid,
        distortion: &DriftDistortion,
        options: &SolverOptions,
    ) -> Result<Self> {
        let sigma_z = params.sigma_z();
        let drift: Vec<f64> = grid
            .points()
            .iter()
            .enumerate()
            .map(|(j, &z)| sigma_z.dot(&distortion.worst_case(j)) + params.z_drift(z))
            .collect();
        let forward = &options.forward;
        let expectation = |row: usize| -> Result<QuantileCurves> {
            let paths: DMatrix<f64> = forward_expectation(
                grid,
                &drift,
                params.sigma_z_norm_sq(),
                &distortion.row(row),
                forward,
            )?;
            QuantileCurves::sample(params, grid, &paths, forward.quantiles)
        };

        let structured = [expectation(0)?, expectation(1)?];
        let worst = [expectation(2)?, expectation(3)?];
        let sigma_k = params.sigma_k();
        Ok(Self {
            shock: [
                worst[0].affine(-1.0, CAPITAL_SCALE * sigma_k[0]),
                worst[1].affine(-1.0, CAPITAL_SCALE * sigma_k[1]),
            ],
            ambiguity: [structured[0].affine(-1.0, 0.0), structured[1].affine(-1.0, 0.0)],
            misspecification: [structured[0].minus(&worst[0]), structured[1].minus(&worst[1])],
        })
    }
}

/// Everything the pipeline produces for one model and ambiguity configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolvedModel {
    /// Calibration status; derived fields are `None` unless solved.
    pub status: SolveStatus,
    /// Robustness penalty, infinite for the fully worst-case model.
    pub theta: f64,
    /// Diagnostics of the `θ` search.
    pub calibration: Calibration,
    /// Asymptotic slopes used as boundary conditions.
    pub boundary: BoundarySlopes,
    /// State grid.
    pub states: Vec<f64>,
    /// `2 × N` array of `v` and `v'` on the grid.
    pub value: DMatrix<f64>,
    /// Matched slope at the long-run mean.
    pub kink_slope: f64,
    /// Level mismatch at the kink for the reported solution.
    pub kink_residual: f64,
    /// `v''` just left and just right of the kink.
    pub kink_curvature: [f64; 2],
    /// Relative entropy implied by the reported distortion.
    pub entropy: f64,
    /// `[η_s; η_u]` on the grid, with the minimizing controls.
    pub distortion: DriftDistortion,
    pub drift: Option<WorstCaseDrift>,
    pub chernoff: Option<ChernoffEntropy>,
    /// Half-life of detection errors in quarters.
    pub half_life: Option<f64>,
    pub elasticities: Option<ShockPriceElasticities>,
}

impl SolvedModel {
    fn from_trial(
        grid: &StateGrid,
        boundary: BoundarySlopes,
        calibration: Calibration,
        trial: &ThetaTrial,
    ) -> Self {
        Self {
            status: calibration.status,
            theta: calibration.theta,
            calibration,
            boundary,
            states: grid.points().to_vec(),
            value: trial.matched.values().clone(),
            kink_slope: trial.matched.kink_slope(),
            kink_residual: trial.matched.residual(),
            kink_curvature: trial.matched.kink_curvature(),
            entropy: trial.entropy,
            distortion: trial.distortion.clone(),
            drift: None,
            chernoff: None,
            half_life: None,
            elasticities: None,
        }
    }

    /// Number of grid points.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
