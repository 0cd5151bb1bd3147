use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tenuous::control::QuadraticControl;
use tenuous::distortion::drift_distortion;
use tenuous::entropy::relative_entropy;
use tenuous::feynman_kac::forward_expectation;
use tenuous::options::ForwardOptions;
use tenuous::{AmbiguityTargets, ModelParameters, StateGrid};

fn setup() -> (ModelParameters, AmbiguityTargets, StateGrid) {
    let params = ModelParameters::default();
    let targets = AmbiguityTargets::new(&params, 0.05, 0.1, None).unwrap();
    let grid = StateGrid::symmetric(params.z_bar(), 2.5, 0.01).unwrap();
    (params, targets, grid)
}

fn bench_minimizer(c: &mut Criterion) {
    let (params, targets, grid) = setup();
    let control = QuadraticControl::new(&params, &targets);
    let slopes = vec![0.5; grid.len()];

    c.bench_function("control_minimize_grid", |b| {
        b.iter(|| control.minimize_many(black_box(grid.points()), black_box(&slopes)).unwrap());
    });
}

fn bench_relative_entropy(c: &mut Criterion) {
    let (params, targets, grid) = setup();
    let control = QuadraticControl::new(&params, &targets);
    let slopes = vec![0.5; grid.len()];
    let distortion = drift_distortion(&control, &grid, &slopes, 0.5).unwrap();

    c.bench_function("relative_entropy_501", |b| {
        b.iter(|| relative_entropy(&params, &grid, black_box(&distortion)).unwrap());
    });
}

fn bench_forward(c: &mut Criterion) {
    let (params, _, grid) = setup();
    let drift: Vec<f64> = grid.points().iter().map(|&z| params.z_drift(z)).collect();
    let initial: Vec<f64> = grid.points().iter().map(|z| z * z).collect();
    let options = ForwardOptions {
        horizon: 100.0,
        ..ForwardOptions::default()
    };

    c.bench_function("forward_expectation_1000_steps", |b| {
        b.iter(|| {
            forward_expectation(&grid, &drift, params.sigma_z_norm_sq(), black_box(&initial), &options)
                .unwrap()
        });
    });
}

criterion_group!(benches, bench_minimizer, bench_relative_entropy, bench_forward);
criterion_main!(benches);
