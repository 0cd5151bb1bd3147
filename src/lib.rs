//! Robust control under tenuous model ambiguity.
//!
//! A decision maker values a growing capital stock whose drift depends on a
//! slowly mean-reverting state `z`. She fears that the baseline dynamics are
//! misspecified: structured alternatives within a relative-entropy bound `q0s`
//! are entertained explicitly, and unstructured alternatives are penalized by
//! a robustness parameter `θ`. This crate solves the resulting HJB equation
//! and reports the worst-case drift distortions together with the statistics
//! used to interpret them.
//!
//! The pipeline consists of
//!
//! - a closed-form pointwise minimization embedded in the HJB equation (`control` module),
//! - asymptotic slopes used as boundary conditions (`boundary` module),
//! - collocation solves on the two half-lines split at the long-run mean (`bvp` module),
//! - matching of the half-line solutions at the kink (`kink` module),
//! - drift distortions and worst-case drifts (`distortion` module),
//! - relative and Chernoff entropies from generator discretizations (`entropy` module),
//! - calibration of `θ` to a target relative entropy (`calibration` module), and
//! - forward Feynman-Kac solves behind the shock-price elasticities (`feynman_kac` module).
//!
//! Everything is single-threaded and deterministic. Independent ambiguity
//! configurations share no state and can be solved in parallel by the caller.
//!
//! # Quick start
//!
//! ```no_run
//! use tenuous::{AmbiguityTargets, ModelParameters, RobustProblem, SolverOptions};
//!
//! let params = ModelParameters::default();
//! let targets = AmbiguityTargets::new(&params, 0.05, 0.1, None).expect("valid targets");
//!
//! let problem = RobustProblem::new(params, targets);
//! let solved = problem.solve(&SolverOptions::default()).expect("pipeline ran");
//!
//! if solved.status.is_solved() {
//!     println!("θ = {}, half-life = {:?}", solved.theta, solved.half_life);
//! }
//! ```

pub mod boundary;
pub mod bvp;
pub mod calibration;
pub mod control;
pub mod distortion;
pub mod entropy;
pub mod error;
pub mod feynman_kac;
pub mod grid;
pub mod kink;
pub mod linalg;
pub mod model;
pub mod options;
pub mod problem;
pub mod solving;
pub mod spline;

pub use calibration::{Calibration, SolveStatus};
pub use error::{Result, RobustError};
pub use grid::StateGrid;
pub use model::{AmbiguityTargets, ModelParameters};
pub use options::SolverOptions;
pub use problem::{RobustProblem, ShockPriceElasticities, SolvedModel};
