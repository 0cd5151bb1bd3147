use thiserror::Error;

/// Unified error type for `tenuous` operations.
#[derive(Debug, Error)]
pub enum RobustError {
    /// Raised when the embedded control quadratic has no real root at `(z, v')`.
    #[error("control quadratic has a negative discriminant at z = {z}, v' = {dv}")]
    InfeasibleControl {
        /// State at which the minimization was attempted.
        z: f64,
        /// Value-function slope supplied to the minimizer.
        dv: f64,
    },

    /// Raised when a half-line boundary-value solve does not converge.
    #[error(
        "boundary-value solve on [{lower}, {upper}] did not converge with {nodes} nodes; \
         worst relative residual {max_residual}"
    )]
    BvpNonConvergence {
        /// Left end of the half-line.
        lower: f64,
        /// Right end of the half-line.
        upper: f64,
        /// Mesh size at termination.
        nodes: usize,
        /// Largest relative collocation residual observed on the final mesh.
        max_residual: f64,
    },

    /// Raised when linear algebra operations encounter a singular system.
    #[error("matrix in {context} is singular")]
    SingularMatrix { context: &'static str },

    /// Raised when a grid search rejects every candidate it was given.
    #[error("every grid-search candidate was rejected while {context}")]
    NoAdmissibleCandidate { context: &'static str },

    /// Raised when the asymptotic boundary system has no real solution.
    #[error("asymptotic boundary system has no real solution")]
    NoRealBoundary,

    /// Raised when a model or solver parameter is outside its admissible range.
    #[error("parameter `{name}` is invalid: {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    /// Raised when provided arrays have incompatible dimensions.
    #[error("dimension mismatch in {context}: expected {expected} but found {found}")]
    DimensionMismatch {
        /// Human-readable context describing the operation.
        context: &'static str,
        /// The required dimension.
        expected: usize,
        /// The dimension that was actually supplied.
        found: usize,
    },

    /// Raised when a point that must lie on the state grid does not.
    #[error("state {state} is not covered by the grid [{lower}, {upper}]")]
    OffGrid { state: f64, lower: f64, upper: f64 },

    /// Raised when numerical routines produce NaN or infinities.
    #[error("encountered a non-finite value during {context}")]
    NumericalError { context: &'static str },
}

impl RobustError {
    /// Helper to format a [`DimensionMismatch`](RobustError::DimensionMismatch) error.
    pub fn dimension_mismatch(context: &'static str, expected: usize, found: usize) -> Self {
        Self::DimensionMismatch {
            context,
            expected,
            found,
        }
    }

    /// Helper to raise when a matrix factorization fails due to singularity.
    pub fn singular(context: &'static str) -> Self {
        Self::SingularMatrix { context }
    }

    /// Helper for rejecting a parameter value.
    pub fn invalid(name: &'static str, value: f64) -> Self {
        Self::InvalidParameter { name, value }
    }

    /// Whether the error marks a numerical trial that failed rather than bad input.
    ///
    /// Grid searches drop candidates that fail this way instead of aborting.
    pub fn is_trial_failure(&self) -> bool {
        matches!(
            self,
            Self::InfeasibleControl { .. }
                | Self::BvpNonConvergence { .. }
                | Self::SingularMatrix { .. }
                | Self::NumericalError { .. }
        )
    }
}

/// Type alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, RobustError>;
