use crate::distributions::DEFAULT_HOCKEY_STICK_P;
use crate::dose::{MHF_SHELLFISH, MHF_WATER};
use crate::engine::DEFAULT_ITERATIONS;
use crate::error::QmraError;
use crate::pathogens::NOROVIRUS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureRoute {
    PrimaryContact,
    ShellfishConsumption,
}

impl ExposureRoute {
    /// Method Harmonisation Factor applied to the concentration binding.
    pub fn mhf(self) -> f64 {
        match self {
            ExposureRoute::PrimaryContact => MHF_WATER,
            ExposureRoute::ShellfishConsumption => MHF_SHELLFISH,
        }
    }

    pub fn parse(text: &str) -> Result<Self, QmraError> {
        match text.trim().to_ascii_lowercase().as_str() {
            "primary_contact" | "swimming" => Ok(ExposureRoute::PrimaryContact),
            "shellfish_consumption" | "shellfish" => Ok(ExposureRoute::ShellfishConsumption),
            other => Err(QmraError::InvalidInput(format!("unknown exposure route `{other}`"))),
        }
    }
}

/// Source-water pathogen concentration binding (organisms/L).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConcentrationSpec {
    Fixed(f64),
    HockeyStick { min: f64, median: f64, max: f64, p: Option<f64> },
}

impl ConcentrationSpec {
    /// Method tag echoed on results.
    pub fn method(&self) -> &'static str {
        match self {
            ConcentrationSpec::Fixed(_) => "Fixed",
            ConcentrationSpec::HockeyStick { .. } => "HockeyStick",
        }
    }
}

/// Receiving-water dilution binding. The dataset variants loop every site in
/// the named dilution dataset, emitting one result per site.
#[derive(Debug, Clone, PartialEq)]
pub enum DilutionSpec {
    Fixed(f64),
    /// Empirical CDF over each site's observed factors.
    Ecdf { dataset: String },
    /// Deterministic per-site median of the observed factors.
    Median { dataset: String },
}

impl DilutionSpec {
    pub fn method(&self) -> &'static str {
        match self {
            DilutionSpec::Fixed(_) => "Fixed",
            DilutionSpec::Ecdf { .. } => "ECDF",
            DilutionSpec::Median { .. } => "Median",
        }
    }

    pub fn dataset(&self) -> Option<&str> {
        match self {
            DilutionSpec::Fixed(_) => None,
            DilutionSpec::Ecdf { dataset } | DilutionSpec::Median { dataset } => {
                Some(dataset.as_str())
            }
        }
    }
}

/// Ingested-volume binding. Water routes use mL; the shellfish meal is grams
/// of tissue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IngestionSpec {
    FixedMl(f64),
    UniformMl { min: f64, max: f64 },
    /// Swimming default: ingestion rate (mL/h) × exposure duration (h).
    RateTimesDuration,
    /// Shellfish default: meal size from the truncated log-logistic fit.
    ShellfishMeal,
}

/// One assessment scenario. Consumed by the orchestrator for a single batch
/// run.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioConfig {
    pub scenario_id: String,
    pub pathogen: String,
    /// `None` selects the registry default for the pathogen.
    pub model: Option<String>,
    pub route: ExposureRoute,
    /// Treatment log10 reduction value.
    pub treatment_lrv: f64,
    /// Log-units standard deviation of the LRV, drawn per iteration.
    pub lrv_sigma: Option<f64>,
    pub concentration: ConcentrationSpec,
    pub dilution: DilutionSpec,
    pub ingestion: IngestionSpec,
    pub events_per_year: f64,
    pub population: u64,
    pub iterations: usize,
    /// Scenario RNG seed; derived from the batch seed and ordinal when absent.
    pub seed: Option<u64>,
    /// Resolve fractional doses to whole organisms via a Bernoulli draw.
    pub discretize_dose: bool,
}

impl ScenarioConfig {
    /// A scenario with the common defaults: registry model, no LRV
    /// uncertainty, N = 10 000, derived seed, discretization on.
    pub fn new(
        scenario_id: impl Into<String>,
        pathogen: impl Into<String>,
        route: ExposureRoute,
    ) -> Self {
        ScenarioConfig {
            scenario_id: scenario_id.into(),
            pathogen: pathogen.into(),
            model: None,
            route,
            treatment_lrv: 0.0,
            lrv_sigma: None,
            concentration: ConcentrationSpec::Fixed(0.0),
            dilution: DilutionSpec::Fixed(1.0),
            ingestion: match route {
                ExposureRoute::PrimaryContact => IngestionSpec::RateTimesDuration,
                ExposureRoute::ShellfishConsumption => IngestionSpec::ShellfishMeal,
            },
            events_per_year: 1.0,
            population: 0,
            iterations: DEFAULT_ITERATIONS,
            seed: None,
            discretize_dose: true,
        }
    }

    pub fn validate(&self) -> Result<(), QmraError> {
        if self.scenario_id.trim().is_empty() {
            return Err(QmraError::InvalidInput("scenario_id must not be empty".to_string()));
        }
        if !self.treatment_lrv.is_finite() || self.treatment_lrv < 0.0 {
            return Err(QmraError::InvalidParameter(format!(
                "treatment LRV must be >= 0, got {}",
                self.treatment_lrv
            )));
        }
        if let Some(sigma) = self.lrv_sigma
            && !(sigma.is_finite() && sigma > 0.0)
        {
            return Err(QmraError::InvalidParameter(format!(
                "LRV uncertainty must be > 0 when given, got {sigma}"
            )));
        }
        if !(self.events_per_year.is_finite() && self.events_per_year > 0.0) {
            return Err(QmraError::InvalidParameter(format!(
                "exposure frequency must be > 0 events/year, got {}",
                self.events_per_year
            )));
        }
        if self.iterations == 0 {
            return Err(QmraError::InvalidParameter("iteration count must be >= 1".to_string()));
        }
        match self.concentration {
            ConcentrationSpec::Fixed(c) if !(c.is_finite() && c >= 0.0) => {
                return Err(QmraError::InvalidParameter(format!(
                    "fixed concentration must be >= 0 organisms/L, got {c}"
                )));
            }
            ConcentrationSpec::HockeyStick { min, median, max, .. }
                if !(min < median && median < max) =>
            {
                return Err(QmraError::InvalidParameter(format!(
                    "hockey-stick concentration requires min < median < max, got ({min}, {median}, {max})"
                )));
            }
            _ => {}
        }
        if let DilutionSpec::Fixed(d) = &self.dilution
            && !(*d >= 1.0)
        {
            return Err(QmraError::InvalidInput(format!(
                "fixed dilution factor must be >= 1, got {d}"
            )));
        }
        match self.ingestion {
            IngestionSpec::FixedMl(v) if !(v.is_finite() && v > 0.0) => {
                return Err(QmraError::InvalidParameter(format!(
                    "fixed ingestion volume must be > 0 mL, got {v}"
                )));
            }
            IngestionSpec::UniformMl { min, max } if !(min >= 0.0 && min < max) => {
                return Err(QmraError::InvalidParameter(format!(
                    "uniform ingestion volume requires 0 <= min < max, got [{min}, {max}]"
                )));
            }
            _ => {}
        }
        Ok(())
    }

    pub fn hockey_stick_p(&self) -> f64 {
        match self.concentration {
            ConcentrationSpec::HockeyStick { p: Some(p), .. } => p,
            _ => DEFAULT_HOCKEY_STICK_P,
        }
    }
}

/// Empirical dilution observations for one spatial dataset, keyed by site.
/// Site order is the input order and fixes result emission order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DilutionDataset {
    sites: Vec<(String, Vec<f64>)>,
}

impl DilutionDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append observed factors for a site, creating the site on first use.
    /// Factors below 1 would amplify the discharge and are rejected.
    pub fn add_observations(
        &mut self,
        site: &str,
        factors: impl IntoIterator<Item = f64>,
    ) -> Result<(), QmraError> {
        let column = match self.sites.iter_mut().find(|(name, _)| name == site) {
            Some((_, column)) => column,
            None => {
                self.sites.push((site.to_string(), Vec::new()));
                &mut self.sites.last_mut().expect("just pushed").1
            }
        };
        for factor in factors {
            if !(factor >= 1.0) || !factor.is_finite() {
                return Err(QmraError::InvalidInput(format!(
                    "dilution factor for site `{site}` must be a finite value >= 1, got {factor}"
                )));
            }
            column.push(factor);
        }
        Ok(())
    }

    pub fn sites(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.sites.iter().map(|(name, factors)| (name.as_str(), factors.as_slice()))
    }

    pub fn get(&self, site: &str) -> Option<&[f64]> {
        self.sites.iter().find(|(name, _)| name == site).map(|(_, f)| f.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

/// Named dilution datasets available to a batch.
#[derive(Debug, Clone, Default)]
pub struct DilutionLibrary {
    datasets: Vec<(String, DilutionDataset)>,
}

impl DilutionLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, dataset: DilutionDataset) {
        let name = name.into();
        match self.datasets.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = dataset,
            None => self.datasets.push((name, dataset)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&DilutionDataset> {
        self.datasets.iter().find(|(n, _)| n == name).map(|(_, d)| d)
    }
}

/// A full batch: base seed, scenarios in run order, and the dilution data
/// they reference.
pub struct StudyConfig {
    pub base_seed: u64,
    pub scenarios: Vec<ScenarioConfig>,
    pub dilution: DilutionLibrary,
}

impl StudyConfig {
    /// The built-in outfall study: one wastewater discharge assessed along a
    /// transect, under secondary treatment, UV upgrade, a raw-discharge
    /// bound, and a shellfish harvesting area.
    pub fn canonical() -> Self {
        // ── Dilution transect ─────────────────────────────────────────────────
        // Near-field model output: no dilution at the discharge point, an
        // order of magnitude by 50 m, two to three orders by 1 km.
        let mut transect = DilutionDataset::new();
        transect
            .add_observations("Discharge", [1.0; 10])
            .expect("canonical dilution data is valid");
        transect
            .add_observations(
                "50m",
                [4.2, 5.1, 6.3, 7.0, 8.4, 9.8, 11.2, 12.5, 13.9, 15.0],
            )
            .expect("canonical dilution data is valid");
        transect
            .add_observations(
                "1000m",
                [302.0, 318.0, 341.0, 365.0, 389.0, 412.0, 436.0, 458.0, 480.0, 497.0],
            )
            .expect("canonical dilution data is valid");

        let mut dilution = DilutionLibrary::new();
        dilution.insert("outfall_transect", transect);

        // ── Effluent concentration ────────────────────────────────────────────
        // Raw-influent norovirus spans roughly half an order of magnitude
        // either side of 1e6 gc/L in the sampling campaign.
        let influent = ConcentrationSpec::HockeyStick {
            min: 5e5,
            median: 1e6,
            max: 2e6,
            p: None,
        };

        let swim = |id: &str, lrv: f64| {
            let mut sc = ScenarioConfig::new(id, NOROVIRUS, ExposureRoute::PrimaryContact);
            sc.treatment_lrv = lrv;
            sc.concentration = influent;
            sc.dilution = DilutionSpec::Ecdf { dataset: "outfall_transect".to_string() };
            sc.events_per_year = 25.0;
            sc.population = 15_000;
            sc
        };

        // ── Scenarios ─────────────────────────────────────────────────────────
        let mut raw_discharge =
            ScenarioConfig::new("raw-discharge", NOROVIRUS, ExposureRoute::PrimaryContact);
        raw_discharge.concentration = ConcentrationSpec::Fixed(1e6);
        raw_discharge.ingestion = IngestionSpec::FixedMl(50.0);
        raw_discharge.events_per_year = 20.0;
        raw_discharge.population = 10_000;

        let mut shellfish =
            ScenarioConfig::new("shellfish-harvest", NOROVIRUS, ExposureRoute::ShellfishConsumption);
        shellfish.treatment_lrv = 3.0;
        shellfish.lrv_sigma = Some(0.3);
        shellfish.concentration = influent;
        shellfish.dilution = DilutionSpec::Median { dataset: "outfall_transect".to_string() };
        shellfish.events_per_year = 12.0;
        shellfish.population = 5_000;

        StudyConfig {
            base_seed: 42,
            scenarios: vec![
                swim("secondary-swim", 3.0),
                swim("uv-swim", 8.0),
                raw_discharge,
                shellfish,
            ],
            dilution,
        }
    }
}
