use tenuous::boundary::approximate_boundary;
use tenuous::calibration::ThetaCalibrator;
use tenuous::options::ForwardOptions;
use tenuous::{AmbiguityTargets, ModelParameters, RobustProblem, SolveStatus, SolverOptions};

/// Coarse grid and short horizon so that the full pipeline stays cheap.
fn fast_options() -> SolverOptions {
    SolverOptions::default()
        .with_grid_spacing(0.05)
        .with_half_life(false)
        .with_forward(ForwardOptions {
            horizon: 20.0,
            ..ForwardOptions::default()
        })
}

/// The macro-finance calibration with q0s = 0.05 and qus = 0.1 must calibrate.
#[test]
fn default_calibration_is_solved() {
    let params = ModelParameters::default();
    let targets = AmbiguityTargets::new(&params, 0.05, 0.1, None).unwrap();
    let options = fast_options();
    let solved = RobustProblem::new(params, targets).solve(&options).unwrap();

    assert_eq!(solved.status, SolveStatus::Solved);
    assert!(solved.theta.is_finite() && solved.theta > 0.0);
    assert!(solved.calibration.kink_residual.unwrap() < 1e-4);
    assert!(solved.calibration.entropy_residual.unwrap().abs() < 1e-2);
    assert_eq!(solved.distortion.len(), solved.len());
    assert_eq!(solved.value.ncols(), solved.len());

    let drift = solved.drift.as_ref().unwrap();
    assert_eq!(drift.capital.len(), solved.len());
    assert!(solved.half_life.is_none());

    let elasticities = solved.elasticities.as_ref().unwrap();
    let steps = options.forward.steps() + 1;
    for bundle in elasticities
        .shock
        .iter()
        .chain(&elasticities.ambiguity)
        .chain(&elasticities.misspecification)
    {
        assert_eq!(bundle.horizon_len(), steps);
        assert!(bundle.series.iter().flatten().all(|x| x.is_finite()));
    }
}

/// θ0 → implied entropy → calibration recovers θ0.
#[test]
fn calibration_recovers_a_known_theta() {
    let params = ModelParameters::default();
    let options = fast_options();
    let reference = AmbiguityTargets::new(&params, 0.05, 0.1, None).unwrap();
    let problem = RobustProblem::new(params.clone(), reference);
    let grid = problem.grid(&options).unwrap();
    let slopes = approximate_boundary(&params, &reference).unwrap();

    let theta0 = 0.5;
    let implied = ThetaCalibrator::new(&params, &reference, &grid, &slopes, &options)
        .evaluate(theta0)
        .unwrap()
        .entropy;

    let targets = AmbiguityTargets::new(&params, 0.05, implied, None).unwrap();
    let (calibration, trial) = ThetaCalibrator::new(&params, &targets, &grid, &slopes, &options)
        .calibrate()
        .unwrap();

    assert_eq!(calibration.status, SolveStatus::Solved);
    assert!((calibration.theta - theta0).abs() < 1e-3 * theta0, "θ̂ = {}", calibration.theta);
    assert_eq!(trial.unwrap().theta, calibration.theta);
}

/// An infinite entropy target solves the fully worst-case model without a θ search.
#[test]
fn infinite_target_is_solved_without_search() {
    let params = ModelParameters::default();
    let targets = AmbiguityTargets::new(&params, 0.05, f64::INFINITY, None).unwrap();
    let solved = RobustProblem::new(params, targets)
        .solve(&fast_options())
        .unwrap();

    assert_eq!(solved.status, SolveStatus::Solved);
    assert!(solved.theta.is_infinite());
    assert_eq!(solved.calibration.evaluations, 0);
    assert!(solved.calibration.kink_residual.is_none());

    // Without the penalty the worst case coincides with the structured distortion.
    for j in 0..solved.len() {
        assert_eq!(solved.distortion.structured(j), solved.distortion.worst_case(j));
    }
    assert!(solved.entropy.abs() < 1e-12);

    let json = serde_json::to_value(&solved).unwrap();
    assert_eq!(json["status"], "Solved");
    assert_eq!(json["states"].as_array().unwrap().len(), solved.len());
}

/// The default configuration end to end: 501 grid points, the Chernoff half-life
/// and 1000 quarters of elasticities at a 0.1 step.
#[test]
#[cfg_attr(debug_assertions, ignore = "full default grid; run with --release")]
fn default_configuration_end_to_end() {
    let params = ModelParameters::default();
    let targets = AmbiguityTargets::new(&params, 0.05, 0.1, None).unwrap();
    let options = SolverOptions::default();
    assert!(options.compute_half_life);
    let solved = RobustProblem::new(params, targets).solve(&options).unwrap();

    assert_eq!(solved.status, SolveStatus::Solved);
    assert_eq!(solved.len(), 501);
    assert_eq!(solved.distortion.len(), 501);
    assert!((solved.theta - 0.2979).abs() < 1e-3, "θ = {}", solved.theta);

    let half_life = solved.half_life.unwrap();
    assert!(half_life.is_finite() && half_life > 0.0);
    let chernoff = solved.chernoff.as_ref().unwrap();
    assert!(chernoff.rate > 0.0);
    assert!(chernoff.exponent >= 0.0 && chernoff.exponent <= 1.0);

    let elasticities = solved.elasticities.as_ref().unwrap();
    for bundle in elasticities
        .shock
        .iter()
        .chain(&elasticities.ambiguity)
        .chain(&elasticities.misspecification)
    {
        assert_eq!(bundle.horizon_len(), 10_001);
        assert!(bundle.series.iter().flatten().all(|x| x.is_finite()));
    }
}
