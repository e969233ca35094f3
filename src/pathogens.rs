use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::dose_response::{BETA_BINOMIAL, DoseResponseModel};
use crate::error::QmraError;

pub const NOROVIRUS: &str = "norovirus";

/// Built-in pathogen parameter file shipped with the crate.
const BUILTIN_PATHOGENS: &str = include_str!("../data/pathogens.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathogenClass {
    Virus,
    Bacterium,
    Protozoan,
}

/// Illness burden attached to infection.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct HealthImpact {
    #[serde(rename = "probability_illness_given_infection")]
    pub p_illness_given_infection: f64,
    #[serde(rename = "population_susceptibility")]
    pub p_susceptible: f64,
    /// Must equal `p_illness_given_infection × p_susceptible`.
    #[serde(rename = "illness_to_infection_ratio")]
    pub illness_ratio: f64,
}

/// One named dose-response parameterization with its literature source.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelEntry {
    pub source: Option<String>,
    #[serde(flatten)]
    pub params: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Pathogen {
    pub name: String,
    pub pathogen_type: PathogenClass,
    pub default_model: String,
    pub dose_response_models: BTreeMap<String, ModelEntry>,
    pub health_impact_data: HealthImpact,
}

/// Immutable registry of pathogen dose-response parameters and health-impact
/// data. Built once, then shared read-only across scenarios and workers; a
/// load failure is fatal to the caller.
#[derive(Debug, Clone)]
pub struct PathogenRegistry {
    pathogens: BTreeMap<String, Pathogen>,
}

impl PathogenRegistry {
    /// Load the parameter file shipped with the crate.
    pub fn builtin() -> Result<Self, QmraError> {
        Self::from_json(BUILTIN_PATHOGENS)
    }

    pub fn from_json(json: &str) -> Result<Self, QmraError> {
        let pathogens: BTreeMap<String, Pathogen> = serde_json::from_str(json)
            .map_err(|e| QmraError::InvalidInput(format!("pathogen parameter file: {e}")))?;
        let registry = PathogenRegistry { pathogens };
        registry.validate()?;
        Ok(registry)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, QmraError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            QmraError::InvalidInput(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    fn validate(&self) -> Result<(), QmraError> {
        for (id, pathogen) in &self.pathogens {
            if !pathogen.dose_response_models.contains_key(&pathogen.default_model) {
                return Err(QmraError::InvalidParameter(format!(
                    "pathogen `{id}` declares default model `{}` but does not define it",
                    pathogen.default_model
                )));
            }
            // Every declared parameterization must construct, not just the
            // default, so bad data fails at load rather than mid-batch.
            for (model_name, entry) in &pathogen.dose_response_models {
                DoseResponseModel::from_name(model_name, &entry.params).map_err(|e| {
                    QmraError::InvalidParameter(format!("pathogen `{id}`, model `{model_name}`: {e}"))
                })?;
            }

            let hi = &pathogen.health_impact_data;
            for (field, value) in [
                ("probability_illness_given_infection", hi.p_illness_given_infection),
                ("population_susceptibility", hi.p_susceptible),
                ("illness_to_infection_ratio", hi.illness_ratio),
            ] {
                if !(0.0..=1.0).contains(&value) {
                    return Err(QmraError::InvalidParameter(format!(
                        "pathogen `{id}`: {field} = {value} outside [0, 1]"
                    )));
                }
            }
            let derived = hi.p_illness_given_infection * hi.p_susceptible;
            if (derived - hi.illness_ratio).abs() > 1e-6 {
                return Err(QmraError::InvalidParameter(format!(
                    "pathogen `{id}`: illness_to_infection_ratio {} != {} × {}",
                    hi.illness_ratio, hi.p_illness_given_infection, hi.p_susceptible
                )));
            }

            if id == NOROVIRUS {
                self.validate_norovirus(pathogen)?;
            }
        }
        Ok(())
    }

    /// Norovirus must default to the exact Beta-Binomial(0.04, 0.055): its
    /// β ≪ 1 puts the Beta-Poisson approximation far outside validity, so a
    /// file configuring that default is rejected outright.
    fn validate_norovirus(&self, pathogen: &Pathogen) -> Result<(), QmraError> {
        if pathogen.default_model != BETA_BINOMIAL {
            return Err(QmraError::InvalidParameter(format!(
                "norovirus default model must be `{BETA_BINOMIAL}`, got `{}` \
                 (beta = 0.055 << 1 invalidates the beta_poisson approximation)",
                pathogen.default_model
            )));
        }
        let entry = &pathogen.dose_response_models[BETA_BINOMIAL];
        let alpha = entry.params.get("alpha").copied();
        let beta = entry.params.get("beta").copied();
        if alpha != Some(0.04) || beta != Some(0.055) {
            return Err(QmraError::InvalidParameter(format!(
                "norovirus beta_binomial must carry alpha = 0.04, beta = 0.055, got {alpha:?}, {beta:?}"
            )));
        }
        Ok(())
    }

    pub fn list_pathogens(&self) -> Vec<&str> {
        self.pathogens.keys().map(String::as_str).collect()
    }

    pub fn get(&self, pathogen_id: &str) -> Result<&Pathogen, QmraError> {
        self.pathogens
            .get(pathogen_id)
            .ok_or_else(|| QmraError::UnknownPathogen(pathogen_id.to_string()))
    }

    pub fn default_model(&self, pathogen_id: &str) -> Result<&str, QmraError> {
        Ok(&self.get(pathogen_id)?.default_model)
    }

    pub fn parameters(&self, pathogen_id: &str, model_name: &str) -> Result<&ModelEntry, QmraError> {
        self.get(pathogen_id)?
            .dose_response_models
            .get(model_name)
            .ok_or_else(|| QmraError::UnknownModel(model_name.to_string()))
    }

    pub fn health_impact(&self, pathogen_id: &str) -> Result<&HealthImpact, QmraError> {
        Ok(&self.get(pathogen_id)?.health_impact_data)
    }

    /// Construct the dose-response model for a pathogen: the named one, or
    /// the pathogen's default when `model_name` is `None`.
    pub fn model(
        &self,
        pathogen_id: &str,
        model_name: Option<&str>,
    ) -> Result<DoseResponseModel, QmraError> {
        let pathogen = self.get(pathogen_id)?;
        let name = model_name.unwrap_or(&pathogen.default_model);
        let entry = pathogen
            .dose_response_models
            .get(name)
            .ok_or_else(|| QmraError::UnknownModel(name.to_string()))?;
        DoseResponseModel::from_name(name, &entry.params)
    }
}
