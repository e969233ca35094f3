use std::collections::BTreeMap;

use statrs::function::gamma::ln_gamma;

use crate::error::QmraError;

/// A dose-response model: `p_infection(d)` maps an ingested organism count to
/// the probability of infection from a single exposure event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DoseResponseModel {
    /// Exact Beta-Binomial (hypergeometric) model. The survival probability is
    /// computed entirely in log-gamma space so large doses cannot overflow.
    BetaBinomial { alpha: f64, beta: f64 },
    /// Approximate Beta-Poisson: `1 − (1 + d/β)^(−α)`. The approximation
    /// breaks down for β < 1; such models are flagged, never silently used.
    BetaPoisson { alpha: f64, beta: f64 },
    /// Single-hit exponential: `1 − exp(−r·d)`.
    Exponential { r: f64 },
}

pub const BETA_BINOMIAL: &str = "beta_binomial";
pub const BETA_POISSON: &str = "beta_poisson";
pub const EXPONENTIAL: &str = "exponential";

fn require_positive(name: &str, value: f64) -> Result<f64, QmraError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(QmraError::InvalidParameter(format!("{name} must be finite and > 0, got {value}")))
    }
}

impl DoseResponseModel {
    pub fn beta_binomial(alpha: f64, beta: f64) -> Result<Self, QmraError> {
        Ok(DoseResponseModel::BetaBinomial {
            alpha: require_positive("beta_binomial alpha", alpha)?,
            beta: require_positive("beta_binomial beta", beta)?,
        })
    }

    pub fn beta_poisson(alpha: f64, beta: f64) -> Result<Self, QmraError> {
        Ok(DoseResponseModel::BetaPoisson {
            alpha: require_positive("beta_poisson alpha", alpha)?,
            beta: require_positive("beta_poisson beta", beta)?,
        })
    }

    pub fn exponential(r: f64) -> Result<Self, QmraError> {
        Ok(DoseResponseModel::Exponential { r: require_positive("exponential r", r)? })
    }

    /// Build a model from its registry name and parameter map.
    /// Unrecognised names fail with `UnknownModel`; missing or out-of-range
    /// parameters fail with `InvalidParameter`.
    pub fn from_name(name: &str, params: &BTreeMap<String, f64>) -> Result<Self, QmraError> {
        let get = |key: &str| {
            params.get(key).copied().ok_or_else(|| {
                QmraError::InvalidParameter(format!("model `{name}` is missing parameter `{key}`"))
            })
        };
        match name {
            BETA_BINOMIAL => Self::beta_binomial(get("alpha")?, get("beta")?),
            BETA_POISSON => Self::beta_poisson(get("alpha")?, get("beta")?),
            EXPONENTIAL => Self::exponential(get("r")?),
            other => Err(QmraError::UnknownModel(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DoseResponseModel::BetaBinomial { .. } => BETA_BINOMIAL,
            DoseResponseModel::BetaPoisson { .. } => BETA_POISSON,
            DoseResponseModel::Exponential { .. } => EXPONENTIAL,
        }
    }

    /// True when the model is a Beta-Poisson outside its validity region
    /// (β < 1). Results computed with such a model carry a warning tag.
    pub fn approximation_invalid(&self) -> bool {
        matches!(self, DoseResponseModel::BetaPoisson { beta, .. } if *beta < 1.0)
    }

    /// P(infection | dose). Doses are non-negative; a negative dose is a
    /// caller error, not a sampling outcome.
    pub fn p_infection(&self, dose: f64) -> Result<f64, QmraError> {
        if !dose.is_finite() || dose < 0.0 {
            return Err(QmraError::InvalidParameter(format!(
                "dose must be finite and >= 0, got {dose}"
            )));
        }
        let p = match *self {
            DoseResponseModel::BetaBinomial { alpha, beta } => {
                // log q(d) = lnΓ(β+d) + lnΓ(α+β) − lnΓ(α+β+d) − lnΓ(β),
                // grouped as paired differences so that at d = 0 both pairs
                // cancel bitwise and P(0) = 0 exactly.
                let log_q = (ln_gamma(beta + dose) - ln_gamma(beta))
                    + (ln_gamma(alpha + beta) - ln_gamma(alpha + beta + dose));
                1.0 - log_q.exp()
            }
            DoseResponseModel::BetaPoisson { alpha, beta } => {
                1.0 - (1.0 + dose / beta).powf(-alpha)
            }
            DoseResponseModel::Exponential { r } => 1.0 - (-r * dose).exp(),
        };
        Ok(p.clamp(0.0, 1.0))
    }

    /// Vectorized `p_infection` over a dose array.
    pub fn p_infection_vec(&self, doses: &[f64]) -> Result<Vec<f64>, QmraError> {
        doses.iter().map(|&d| self.p_infection(d)).collect()
    }
}
