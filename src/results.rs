use serde::{Deserialize, Serialize};

use crate::engine::percentiles;
use crate::error::QmraError;

/// WHO recreational-water guideline: tolerable annual infection risk per
/// person. Fixed; any other benchmark is downstream configuration.
pub const WHO_ANNUAL_RISK_THRESHOLD: f64 = 1e-4;

/// Probability of at least one infection over `events_per_year` independent
/// exposure events.
pub fn annual_risk(p_event: f64, events_per_year: f64) -> f64 {
    1.0 - (1.0 - p_event).powf(events_per_year)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compliance {
    #[serde(rename = "COMPLIANT")]
    Compliant,
    #[serde(rename = "NON-COMPLIANT")]
    NonCompliant,
}

impl Compliance {
    pub fn as_str(self) -> &'static str {
        match self {
            Compliance::Compliant => "COMPLIANT",
            Compliance::NonCompliant => "NON-COMPLIANT",
        }
    }
}

/// Verdict against the WHO threshold, on the median annual infection risk.
pub fn compliance_verdict(median_annual_infection_risk: f64) -> Compliance {
    if median_annual_infection_risk <= WHO_ANNUAL_RISK_THRESHOLD {
        Compliance::Compliant
    } else {
        Compliance::NonCompliant
    }
}

/// 5th / median / 95th summary of a Monte Carlo output vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentileTriple {
    pub p5: f64,
    pub p50: f64,
    pub p95: f64,
}

impl PercentileTriple {
    pub fn from_values(values: &[f64]) -> Self {
        let ps = percentiles(values, &[5.0, 50.0, 95.0]);
        PercentileTriple { p5: ps[0], p50: ps[1], p95: ps[2] }
    }

    pub fn is_ordered(&self) -> bool {
        self.p5 <= self.p50 && self.p50 <= self.p95
    }

    pub fn is_finite(&self) -> bool {
        self.p5.is_finite() && self.p50.is_finite() && self.p95.is_finite()
    }
}

/// One completed (scenario, site) assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentResult {
    pub scenario_id: String,
    pub site: Option<String>,
    pub pathogen: String,
    pub model: String,
    pub iterations: usize,
    pub seed: u64,
    /// Per-event infection probability.
    pub p_infection: PercentileTriple,
    pub annual_infection_risk: PercentileTriple,
    pub annual_illness_risk: PercentileTriple,
    /// Median per-event illness probability.
    pub p_illness_median: f64,
    /// Exposed population × median annual infection risk.
    pub expected_annual_infections: f64,
    pub expected_annual_illnesses: f64,
    pub compliance: Compliance,
    pub dilution_method: String,
    pub pathogen_method: String,
    /// Caveats attached during the run (e.g. a Beta-Poisson fit used outside
    /// its validity region).
    pub warnings: Vec<String>,
}

impl AssessmentResult {
    /// Every numeric field finite and every percentile triple ordered — the
    /// schema contract downstream consumers rely on.
    pub fn check_integrity(&self) -> Result<(), QmraError> {
        for (label, triple) in [
            ("p_infection", &self.p_infection),
            ("annual_infection_risk", &self.annual_infection_risk),
            ("annual_illness_risk", &self.annual_illness_risk),
        ] {
            if !triple.is_finite() {
                return Err(QmraError::InvalidInput(format!(
                    "{label} carries a non-finite percentile in `{}`",
                    self.scenario_id
                )));
            }
            if !triple.is_ordered() {
                return Err(QmraError::InvalidInput(format!(
                    "{label} percentiles out of order in `{}`",
                    self.scenario_id
                )));
            }
        }
        let counts = [
            self.p_illness_median,
            self.expected_annual_infections,
            self.expected_annual_illnesses,
        ];
        if counts.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(QmraError::InvalidInput(format!(
                "negative or non-finite expected counts in `{}`",
                self.scenario_id
            )));
        }
        Ok(())
    }
}

/// A scenario that could not be assessed. Numeric fields are absent by
/// construction; consumers key off `error_kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedScenario {
    pub scenario_id: String,
    pub site: Option<String>,
    pub error_kind: String,
    pub error_message: String,
}

/// Batch element: a completed assessment or a recorded failure. A failing
/// scenario never unwinds the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScenarioOutcome {
    Completed(AssessmentResult),
    Failed(FailedScenario),
}

impl ScenarioOutcome {
    pub fn scenario_id(&self) -> &str {
        match self {
            ScenarioOutcome::Completed(r) => &r.scenario_id,
            ScenarioOutcome::Failed(f) => &f.scenario_id,
        }
    }

    pub fn site(&self) -> Option<&str> {
        match self {
            ScenarioOutcome::Completed(r) => r.site.as_deref(),
            ScenarioOutcome::Failed(f) => f.site.as_deref(),
        }
    }

    pub fn as_completed(&self) -> Option<&AssessmentResult> {
        match self {
            ScenarioOutcome::Completed(r) => Some(r),
            ScenarioOutcome::Failed(_) => None,
        }
    }
}
