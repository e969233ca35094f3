use rayon::prelude::*;

use crate::distributions::Distribution;
use crate::dose::{
    self, BAF_MAX, BAF_MEAN, BAF_MIN, BAF_STD, DURATION_MAX, DURATION_MIN, DURATION_MODE,
    DoseModel, INGESTION_RATE_MAX, INGESTION_RATE_MEAN, INGESTION_RATE_MIN, INGESTION_RATE_SD,
    MEAL_ALPHA, MEAL_BETA, MEAL_GAMMA, MEAL_MAX_G, MEAL_MIN_G,
};
use crate::engine::{MonteCarloEngine, percentile};
use crate::error::QmraError;
use crate::pathogens::PathogenRegistry;
use crate::results::{
    AssessmentResult, FailedScenario, PercentileTriple, ScenarioOutcome, annual_risk,
    compliance_verdict,
};
use crate::scenario::{
    ConcentrationSpec, DilutionLibrary, DilutionSpec, ExposureRoute, IngestionSpec, ScenarioConfig,
};

/// splitmix64 finalizer over seed and ordinal. Scenario and site RNGs are
/// derived from the batch seed this way, so rayon scheduling cannot perturb
/// any result.
fn derive_seed(seed: u64, ordinal: u64) -> u64 {
    let mut z = seed ^ ordinal.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Runs scenario batches against a shared read-only pathogen registry.
///
/// Scenarios are independent and run in parallel; emission order always
/// matches input order, and a failing scenario is recorded, never propagated.
pub struct Orchestrator<'a> {
    registry: &'a PathogenRegistry,
    base_seed: u64,
}

impl<'a> Orchestrator<'a> {
    pub fn new(registry: &'a PathogenRegistry, base_seed: u64) -> Self {
        Orchestrator { registry, base_seed }
    }

    /// Run every scenario, one outcome per (scenario, site) pair.
    pub fn run_batch(
        &self,
        scenarios: &[ScenarioConfig],
        dilution: &DilutionLibrary,
    ) -> Vec<ScenarioOutcome> {
        scenarios
            .par_iter()
            .enumerate()
            .map(|(ordinal, sc)| self.run_scenario(ordinal, sc, dilution))
            .collect::<Vec<_>>()
            .into_iter()
            .flatten()
            .collect()
    }

    /// Run one scenario across its dilution sites.
    pub fn run_scenario(
        &self,
        ordinal: usize,
        sc: &ScenarioConfig,
        dilution: &DilutionLibrary,
    ) -> Vec<ScenarioOutcome> {
        let fail = |site: Option<&str>, e: &QmraError| {
            ScenarioOutcome::Failed(FailedScenario {
                scenario_id: sc.scenario_id.clone(),
                site: site.map(str::to_string),
                error_kind: e.kind().to_string(),
                error_message: e.to_string(),
            })
        };

        if let Err(e) = sc.validate() {
            return vec![fail(None, &e)];
        }
        let scenario_seed = sc.seed.unwrap_or_else(|| derive_seed(self.base_seed, ordinal as u64));

        match &sc.dilution {
            DilutionSpec::Fixed(factor) => {
                let binding = Distribution::fixed(*factor);
                let outcome = binding
                    .and_then(|dist| self.assess(sc, scenario_seed, None, dist))
                    .map_or_else(|e| fail(None, &e), ScenarioOutcome::Completed);
                vec![outcome]
            }
            DilutionSpec::Ecdf { dataset } | DilutionSpec::Median { dataset } => {
                let Some(data) = dilution.get(dataset) else {
                    let e = QmraError::InvalidInput(format!(
                        "scenario `{}` references unknown dilution dataset `{dataset}`",
                        sc.scenario_id
                    ));
                    return vec![fail(None, &e)];
                };
                if data.is_empty() {
                    let e = QmraError::InvalidInput(format!("dilution dataset `{dataset}` is empty"));
                    return vec![fail(None, &e)];
                }
                data.sites()
                    .enumerate()
                    .map(|(site_ordinal, (site, factors))| {
                        let binding = match &sc.dilution {
                            DilutionSpec::Ecdf { .. } => {
                                Distribution::empirical_cdf(factors.to_vec())
                            }
                            _ => Distribution::fixed(percentile(factors, 50.0)),
                        };
                        let seed = derive_seed(scenario_seed, site_ordinal as u64);
                        binding
                            .and_then(|dist| self.assess(sc, seed, Some(site), dist))
                            .map_or_else(|e| fail(Some(site), &e), ScenarioOutcome::Completed)
                    })
                    .collect()
            }
        }
    }

    fn assess(
        &self,
        sc: &ScenarioConfig,
        seed: u64,
        site: Option<&str>,
        dilution_binding: Distribution,
    ) -> Result<AssessmentResult, QmraError> {
        let pathogen = self.registry.get(&sc.pathogen)?;
        let model = self.registry.model(&sc.pathogen, sc.model.as_deref())?;
        let model_name = sc.model.clone().unwrap_or_else(|| pathogen.default_model.clone());

        let mut warnings = Vec::new();
        if model.approximation_invalid() {
            warnings.push("beta_poisson_approximation_invalid_beta_below_1".to_string());
        }

        let mut engine = MonteCarloEngine::new(seed);
        self.bind_concentration(&mut engine, sc)?;
        self.bind_ingestion(&mut engine, sc)?;
        engine.add(dose::names::DILUTION, dilution_binding);
        if let Some(sigma) = sc.lrv_sigma {
            engine.add(
                dose::names::TREATMENT_LRV,
                Distribution::normal(sc.treatment_lrv, sigma)?,
            );
        }
        if sc.route == ExposureRoute::ShellfishConsumption {
            engine.add(
                dose::names::BAF,
                Distribution::truncated_normal(BAF_MEAN, BAF_STD, BAF_MIN, BAF_MAX)?,
            );
        }

        let dose_model = DoseModel { fixed_lrv: sc.treatment_lrv, discretize: sc.discretize_dose };
        let run = engine.run("p_infection_event", sc.iterations, |samples, rng| {
            let doses = dose_model.doses(samples, rng)?;
            model.p_infection_vec(&doses)
        })?;

        let impact = pathogen.health_impact_data;
        let p_event = &run.values;
        let p_illness: Vec<f64> = p_event.iter().map(|p| p * impact.illness_ratio).collect();
        let annual_infection: Vec<f64> =
            p_event.iter().map(|p| annual_risk(*p, sc.events_per_year)).collect();
        let annual_illness: Vec<f64> =
            p_illness.iter().map(|p| annual_risk(*p, sc.events_per_year)).collect();

        let p_infection = PercentileTriple::from_values(p_event);
        let annual_infection_risk = PercentileTriple::from_values(&annual_infection);
        let annual_illness_risk = PercentileTriple::from_values(&annual_illness);

        let result = AssessmentResult {
            scenario_id: sc.scenario_id.clone(),
            site: site.map(str::to_string),
            pathogen: sc.pathogen.clone(),
            model: model_name,
            iterations: sc.iterations,
            seed,
            p_infection,
            annual_infection_risk,
            annual_illness_risk,
            p_illness_median: percentile(&p_illness, 50.0),
            expected_annual_infections: sc.population as f64 * annual_infection_risk.p50,
            expected_annual_illnesses: sc.population as f64 * annual_illness_risk.p50,
            compliance: compliance_verdict(annual_infection_risk.p50),
            dilution_method: sc.dilution.method().to_string(),
            pathogen_method: sc.concentration.method().to_string(),
            warnings,
        };
        result.check_integrity()?;
        Ok(result)
    }

    /// Concentration binding. The Method Harmonisation Factor scales it here,
    /// once: ×18.5 for shellfish tissue comparisons, ×1 for water.
    fn bind_concentration(
        &self,
        engine: &mut MonteCarloEngine,
        sc: &ScenarioConfig,
    ) -> Result<(), QmraError> {
        let mhf = sc.route.mhf();
        let dist = match &sc.concentration {
            ConcentrationSpec::Fixed(c) => Distribution::fixed(c * mhf)?,
            ConcentrationSpec::HockeyStick { min, median, max, .. } => Distribution::hockey_stick(
                min * mhf,
                median * mhf,
                max * mhf,
                sc.hockey_stick_p(),
            )?,
        };
        engine.add(dose::names::PATHOGEN_CONCENTRATION, dist);
        Ok(())
    }

    fn bind_ingestion(
        &self,
        engine: &mut MonteCarloEngine,
        sc: &ScenarioConfig,
    ) -> Result<(), QmraError> {
        match sc.ingestion {
            IngestionSpec::FixedMl(v) => {
                engine.add(dose::names::VOLUME, Distribution::fixed(v)?);
            }
            IngestionSpec::UniformMl { min, max } => {
                engine.add(dose::names::VOLUME, Distribution::uniform(min, max)?);
            }
            IngestionSpec::RateTimesDuration => {
                engine.add(
                    dose::names::INGESTION_RATE,
                    Distribution::truncated_lognormal_from_moments(
                        INGESTION_RATE_MEAN,
                        INGESTION_RATE_SD,
                        INGESTION_RATE_MIN,
                        INGESTION_RATE_MAX,
                    )?,
                );
                engine.add(
                    dose::names::DURATION,
                    Distribution::triangular(DURATION_MIN, DURATION_MODE, DURATION_MAX)?,
                );
            }
            IngestionSpec::ShellfishMeal => {
                engine.add(
                    dose::names::VOLUME,
                    Distribution::truncated_log_logistic(
                        MEAL_ALPHA, MEAL_BETA, MEAL_GAMMA, MEAL_MIN_G, MEAL_MAX_G,
                    )?,
                );
            }
        }
        Ok(())
    }
}
