//! Solver configuration. Defaults reproduce the settings of the published calibration.

use crate::solving::RootOptions;

/// Controls the collocation boundary-value solver used on each half-line.
#[derive(Clone, Debug)]
pub struct BvpOptions {
    /// Number of evenly spaced nodes in the initial mesh.
    pub initial_nodes: usize,
    /// Admissible relative collocation residual on every mesh interval.
    pub tolerance: f64,
    /// Mesh size beyond which the solve is declared non-convergent.
    pub max_nodes: usize,
    /// Newton iterations attempted per mesh before refining anyway.
    pub max_newton_iterations: usize,
    /// Relative step size below which Newton iterations stop.
    pub newton_tolerance: f64,
}

impl Default for BvpOptions {
    fn default() -> Self {
        Self {
            initial_nodes: 10,
            tolerance: 1e-3,
            max_nodes: 1_000,
            max_newton_iterations: 8,
            newton_tolerance: 1e-10,
        }
    }
}

/// Controls the search for the slope `v'` at the kink.
#[derive(Clone, Debug)]
pub struct KinkOptions {
    /// Number of evenly spaced candidates in the coarse grid search.
    pub candidates: usize,
    /// Fraction of the admissible slope interval trimmed from each end before the grid search.
    pub shrink: f64,
    /// Value mismatch above which the matched solution is considered unusable.
    pub reject_threshold: f64,
    /// Refinement settings for the secant stage.
    pub root: RootOptions,
}

impl Default for KinkOptions {
    fn default() -> Self {
        Self {
            candidates: 5,
            shrink: 0.2,
            reject_threshold: 1.0,
            root: RootOptions::default(),
        }
    }
}

/// Controls the calibration of the robustness penalty `θ`.
#[derive(Clone, Debug)]
pub struct CalibrationOptions {
    /// Coarse candidates evaluated before refinement.
    pub theta_candidates: Vec<f64>,
    /// Refinement settings; the evaluation cap bounds the number of pipeline runs.
    pub root: RootOptions,
    /// Admissible gap between implied and target relative entropy.
    pub entropy_tolerance: f64,
    /// Admissible value mismatch at the kink.
    pub kink_tolerance: f64,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        Self {
            theta_candidates: vec![0.1, 0.2, 0.3, 0.4, 0.6, 0.8, 1.0, 1.2],
            root: RootOptions::default()
                .with_max_evaluations(20)
                .with_lower_bound(0.0),
            entropy_tolerance: 1e-2,
            kink_tolerance: 1e-4,
        }
    }
}

/// Controls the bounded minimization over the Chernoff tilting exponent.
#[derive(Clone, Debug)]
pub struct ChernoffOptions {
    /// Starting exponent inside `[0, 1]`.
    pub start: f64,
    /// Absolute tolerance on the exponent.
    pub tolerance: f64,
    /// Iteration cap of the bounded minimizer.
    pub max_iterations: usize,
}

impl Default for ChernoffOptions {
    fn default() -> Self {
        Self {
            start: 0.5,
            tolerance: 1e-5,
            max_iterations: 100,
        }
    }
}

/// Controls the forward Feynman-Kac solve and the quantiles it is sampled at.
#[derive(Clone, Debug)]
pub struct ForwardOptions {
    /// Horizon in quarters.
    pub horizon: f64,
    /// Time step in quarters.
    pub time_step: f64,
    /// Quantiles of the stationary distribution of `z` reported in each bundle.
    pub quantiles: [f64; 3],
}

impl Default for ForwardOptions {
    fn default() -> Self {
        Self {
            horizon: 1_000.0,
            time_step: 0.1,
            quantiles: [0.1, 0.5, 0.9],
        }
    }
}

impl ForwardOptions {
    /// Number of implicit time steps taken over the horizon.
    pub fn steps(&self) -> usize {
        (self.horizon / self.time_step).round() as usize
    }
}

/// Aggregated configuration used by [`RobustProblem`](crate::RobustProblem).
#[derive(Clone, Debug)]
pub struct SolverOptions {
    /// Spacing of the state grid.
    pub grid_spacing: f64,
    /// Half-width of the state interval around the long-run mean.
    pub half_width: f64,
    /// Whether to compute the Chernoff half-life (the most expensive stage).
    pub compute_half_life: bool,
    pub bvp: BvpOptions,
    pub kink: KinkOptions,
    pub calibration: CalibrationOptions,
    pub chernoff: ChernoffOptions,
    pub forward: ForwardOptions,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            grid_spacing: 0.01,
            half_width: 2.5,
            compute_half_life: true,
            bvp: BvpOptions::default(),
            kink: KinkOptions::default(),
            calibration: CalibrationOptions::default(),
            chernoff: ChernoffOptions::default(),
            forward: ForwardOptions::default(),
        }
    }
}

impl SolverOptions {
    /// Override the state-grid spacing while preserving other defaults.
    pub fn with_grid_spacing(mut self, spacing: f64) -> Self {
        self.grid_spacing = spacing;
        self
    }

    /// Enable or disable the Chernoff half-life computation.
    pub fn with_half_life(mut self, enabled: bool) -> Self {
        self.compute_half_life = enabled;
        self
    }

    /// Override the boundary-value solver settings.
    pub fn with_bvp(mut self, bvp: BvpOptions) -> Self {
        self.bvp = bvp;
        self
    }

    /// Override the θ calibration settings.
    pub fn with_calibration(mut self, calibration: CalibrationOptions) -> Self {
        self.calibration = calibration;
        self
    }

    /// Override the forward-solve horizon and time step.
    pub fn with_forward(mut self, forward: ForwardOptions) -> Self {
        self.forward = forward;
        self
    }
}
