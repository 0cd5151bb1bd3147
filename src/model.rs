//! Baseline model parameters and the ambiguity targets chosen by the user.

use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};

use crate::error::{RobustError, Result};

/// Scale applied to the capital drift in the decision maker's objective.
pub const CAPITAL_SCALE: f64 = 0.01;

/// Drift and volatility coefficients of the baseline `(k, z)` process.
///
/// The fast state `k` grows at `αk + βk (z - z̄)` and the slow state `z`
/// mean-reverts at rate `βz` towards `z̄ = αz / βz`. Both load on two
/// independent Brownian shocks through the rows of `σ = [σkᵀ; σzᵀ]`.
/// The scalar coefficients `a`, `b`, `d` are fixed functions of `σ`
/// computed once at construction.
///
/// Only the primitive coefficients are serialized; deserialization goes through
/// [`ModelParametersBuilder::build`] so that the derived coefficients always match `σ`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ModelParametersBuilder", into = "ModelParametersBuilder")]
pub struct ModelParameters {
    alpha_k: f64,
    alpha_z: f64,
    beta_k: f64,
    beta_z: f64,
    sigma_k: Vector2<f64>,
    sigma_z: Vector2<f64>,
    delta: f64,
    rho1: f64,
    sigma: Matrix2<f64>,
    a: f64,
    b: f64,
    d: f64,
}

impl Default for ModelParameters {
    /// The macro-finance calibration with a single persistent growth state.
    fn default() -> Self {
        Self::derive(
            0.484,
            0.0,
            1.0,
            0.014,
            Vector2::new(0.477, 0.0),
            Vector2::new(0.011, 0.025),
            0.002,
            0.0,
        )
    }
}

impl ModelParameters {
    /// Starts a builder pre-populated with the default calibration.
    pub fn builder() -> ModelParametersBuilder {
        ModelParametersBuilder::default()
    }

    #[allow(clippy::too_many_arguments)]
    fn derive(
        alpha_k: f64,
        alpha_z: f64,
        beta_k: f64,
        beta_z: f64,
        sigma_k: Vector2<f64>,
        sigma_z: Vector2<f64>,
        delta: f64,
        rho1: f64,
    ) -> Self {
        let sigma = Matrix2::new(sigma_k[0], sigma_k[1], sigma_z[0], sigma_z[1]);
        let det_sq = sigma.determinant().powi(2);
        Self {
            alpha_k,
            alpha_z,
            beta_k,
            beta_z,
            sigma_k,
            sigma_z,
            delta,
            rho1,
            sigma,
            a: sigma_z.norm_squared() / det_sq,
            b: -sigma_k.dot(&sigma_z) / det_sq,
            d: sigma_k.norm_squared() / det_sq,
        }
    }

    pub fn alpha_k(&self) -> f64 {
        self.alpha_k
    }

    pub fn alpha_z(&self) -> f64 {
        self.alpha_z
    }

    pub fn beta_k(&self) -> f64 {
        self.beta_k
    }

    pub fn beta_z(&self) -> f64 {
        self.beta_z
    }

    /// Exposure of the fast state to the two shocks.
    pub fn sigma_k(&self) -> &Vector2<f64> {
        &self.sigma_k
    }

    /// Exposure of the mean-reverting state to the two shocks.
    pub fn sigma_z(&self) -> &Vector2<f64> {
        &self.sigma_z
    }

    /// Subjective discount rate.
    pub fn delta(&self) -> f64 {
        self.delta
    }

    /// Constant term of the entropy-bound quadratic in `z`.
    pub fn rho1(&self) -> f64 {
        self.rho1
    }

    /// Stacked volatility matrix with rows `σkᵀ` and `σzᵀ`.
    pub fn sigma(&self) -> &Matrix2<f64> {
        &self.sigma
    }

    /// `|σz|² / det(σ)²`.
    pub fn a(&self) -> f64 {
        self.a
    }

    /// `-σk·σz / det(σ)²`.
    pub fn b(&self) -> f64 {
        self.b
    }

    /// `|σk|² / det(σ)²`.
    pub fn d(&self) -> f64 {
        self.d
    }

    /// Squared diffusion of the `z` process.
    pub fn sigma_z_norm_sq(&self) -> f64 {
        self.sigma_z.norm_squared()
    }

    /// Long-run mean `z̄ = αz / βz`.
    pub fn z_bar(&self) -> f64 {
        self.alpha_z / self.beta_z
    }

    /// Baseline drift of `z` used by the generator discretizations.
    pub fn z_drift(&self, z: f64) -> f64 {
        self.alpha_z - self.beta_z * z
    }

    /// Baseline drift of `z` written around the long-run mean, as it enters the HJB equation.
    pub fn centered_z_drift(&self, z: f64) -> f64 {
        self.alpha_z - self.beta_z * (z - self.z_bar())
    }

    /// Baseline drift of `k`.
    pub fn k_drift(&self, z: f64) -> f64 {
        self.alpha_k + self.beta_k * (z - self.z_bar())
    }

    /// Standard deviation of the stationary distribution of `z`.
    pub fn stationary_std(&self) -> f64 {
        (self.sigma_z_norm_sq() / (2.0 * self.beta_z)).sqrt()
    }

    /// Quadratic form `[0.01, v'] σ σᵀ [0.01, v']ᵀ` penalised by `1 / (2θ)` in the HJB equation.
    pub fn exposure_norm_sq(&self, dv: f64) -> f64 {
        let loading = self.sigma.transpose() * Vector2::new(CAPITAL_SCALE, dv);
        loading.norm_squared()
    }
}

/// Builder that validates the baseline process before constructing [`ModelParameters`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelParametersBuilder {
    alpha_k: f64,
    alpha_z: f64,
    beta_k: f64,
    beta_z: f64,
    sigma_k: Vector2<f64>,
    sigma_z: Vector2<f64>,
    delta: f64,
    rho1: f64,
}

impl Default for ModelParametersBuilder {
    fn default() -> Self {
        ModelParameters::default().into()
    }
}

impl ModelParametersBuilder {
    pub fn alpha_k(mut self, value: f64) -> Self {
        self.alpha_k = value;
        self
    }

    pub fn alpha_z(mut self, value: f64) -> Self {
        self.alpha_z = value;
        self
    }

    pub fn beta_k(mut self, value: f64) -> Self {
        self.beta_k = value;
        self
    }

    pub fn beta_z(mut self, value: f64) -> Self {
        self.beta_z = value;
        self
    }

    pub fn sigma_k(mut self, value: [f64; 2]) -> Self {
        self.sigma_k = Vector2::from(value);
        self
    }

    pub fn sigma_z(mut self, value: [f64; 2]) -> Self {
        self.sigma_z = Vector2::from(value);
        self
    }

    pub fn delta(mut self, value: f64) -> Self {
        self.delta = value;
        self
    }

    pub fn rho1(mut self, value: f64) -> Self {
        self.rho1 = value;
        self
    }

    /// Finalizes construction after checking that the process is well posed.
    pub fn build(self) -> Result<ModelParameters> {
        for (name, value) in [
            ("alpha_k", self.alpha_k),
            ("alpha_z", self.alpha_z),
            ("beta_k", self.beta_k),
            ("rho1", self.rho1),
        ] {
            if !value.is_finite() {
                return Err(RobustError::invalid(name, value));
            }
        }
        if !(self.beta_z > 0.0 && self.beta_z.is_finite()) {
            return Err(RobustError::invalid("beta_z", self.beta_z));
        }
        if !(self.delta > 0.0 && self.delta.is_finite()) {
            return Err(RobustError::invalid("delta", self.delta));
        }
        if self.sigma_z.norm_squared() <= 0.0 {
            return Err(RobustError::invalid("sigma_z", self.sigma_z.norm()));
        }

        let params = ModelParameters::derive(
            self.alpha_k,
            self.alpha_z,
            self.beta_k,
            self.beta_z,
            self.sigma_k,
            self.sigma_z,
            self.delta,
            self.rho1,
        );
        let det = params.sigma.determinant();
        if det == 0.0 || !det.is_finite() {
            return Err(RobustError::singular("volatility matrix"));
        }
        Ok(params)
    }
}

impl TryFrom<ModelParametersBuilder> for ModelParameters {
    type Error = RobustError;

    fn try_from(builder: ModelParametersBuilder) -> Result<Self> {
        builder.build()
    }
}

impl From<ModelParameters> for ModelParametersBuilder {
    fn from(params: ModelParameters) -> Self {
        Self {
            alpha_k: params.alpha_k,
            alpha_z: params.alpha_z,
            beta_k: params.beta_k,
            beta_z: params.beta_z,
            sigma_k: params.sigma_k,
            sigma_z: params.sigma_z,
            delta: params.delta,
            rho1: params.rho1,
        }
    }
}

/// The ambiguity configuration of one solved case.
///
/// `q0s` bounds the statistical distance of structured alternatives from the
/// baseline, `qus` is the relative entropy the worst-case model should reach
/// (`f64::INFINITY` requests the fully worst-case solution) and `rho2` weights
/// the quadratic entropy bound in `z`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AmbiguityTargets {
    q0s: f64,
    qus: f64,
    rho2: f64,
}

impl AmbiguityTargets {
    /// Creates targets, deriving `ρ2 = q0s² / |σz|²` when none is supplied.
    pub fn new(
        params: &ModelParameters,
        q0s: f64,
        qus: f64,
        rho2: Option<f64>,
    ) -> Result<Self> {
        if !(q0s >= 0.0 && q0s.is_finite()) {
            return Err(RobustError::invalid("q0s", q0s));
        }
        if !(qus >= 0.0) {
            return Err(RobustError::invalid("qus", qus));
        }
        let rho2 = rho2.unwrap_or_else(|| Self::restricted_rho2(params, q0s));
        if !(rho2 >= 0.0 && rho2.is_finite()) {
            return Err(RobustError::invalid("rho2", rho2));
        }
        Ok(Self { q0s, qus, rho2 })
    }

    /// Creates targets with `ρ2` set to `scale` times the restricted value `q0s² / |σz|²`.
    pub fn with_rho_scale(
        params: &ModelParameters,
        q0s: f64,
        qus: f64,
        scale: f64,
    ) -> Result<Self> {
        if !(scale >= 0.0 && scale.is_finite()) {
            return Err(RobustError::invalid("rho scale", scale));
        }
        Self::new(params, q0s, qus, Some(scale * Self::restricted_rho2(params, q0s)))
    }

    fn restricted_rho2(params: &ModelParameters, q0s: f64) -> f64 {
        q0s * q0s / params.sigma_z_norm_sq()
    }

    /// Bound on the structured models' deviation from the baseline.
    pub fn q0s(&self) -> f64 {
        self.q0s
    }

    /// Target worst-case relative entropy; infinite for the fully worst-case model.
    pub fn qus(&self) -> f64 {
        self.qus
    }

    /// Weight on the quadratic term of the entropy bound.
    pub fn rho2(&self) -> f64 {
        self.rho2
    }

    /// Whether the target asks for the unrestricted worst case.
    pub fn is_fully_worst_case(&self) -> bool {
        self.qus.is_infinite()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn default_calibration_derives_volatility_coefficients() {
        let params = ModelParameters::default();
        let det: f64 = 0.477 * 0.025;
        assert_relative_eq!(params.a(), (0.011_f64.powi(2) + 0.025_f64.powi(2)) / det.powi(2));
        assert_relative_eq!(params.b(), -(0.477 * 0.011) / det.powi(2));
        assert_relative_eq!(params.d(), 0.477_f64.powi(2) / det.powi(2));
        assert_eq!(params.z_bar(), 0.0);
    }

    #[test]
    fn builder_rejects_singular_volatility() {
        let result = ModelParameters::builder()
            .sigma_k([1.0, 2.0])
            .sigma_z([0.5, 1.0])
            .build();
        assert!(matches!(result, Err(RobustError::SingularMatrix { .. })));
    }

    #[test]
    fn deserialization_rederives_and_validates() {
        let json = serde_json::to_value(ModelParameters::default()).unwrap();
        assert!(json.get("a").is_none());
        assert!(json.get("sigma").is_none());

        let restored: ModelParameters = serde_json::from_value(json.clone()).unwrap();
        let base = ModelParameters::default();
        assert_relative_eq!(restored.a(), base.a(), max_relative = 1e-12);
        assert_relative_eq!(restored.b(), base.b(), max_relative = 1e-12);
        assert_relative_eq!(restored.d(), base.d(), max_relative = 1e-12);

        let mut explosive = json;
        explosive["beta_z"] = serde_json::json!(-0.5);
        assert!(serde_json::from_value::<ModelParameters>(explosive).is_err());
    }

    #[test]
    fn targets_derive_restricted_rho2() {
        let params = ModelParameters::default();
        let targets = AmbiguityTargets::new(&params, 0.05, 0.1, None).unwrap();
        assert_relative_eq!(targets.rho2(), 0.0025 / params.sigma_z_norm_sq());

        let halved = AmbiguityTargets::with_rho_scale(&params, 0.05, 0.1, 0.5).unwrap();
        assert_relative_eq!(halved.rho2(), 0.5 * targets.rho2());
        assert!(!targets.is_fully_worst_case());
    }
}
