use rand::Rng;

use crate::engine::Samples;
use crate::error::QmraError;

/// Well-known binding names the orchestrator registers in the engine and the
/// dose model reads back out of the joint sample matrix.
pub mod names {
    pub const PATHOGEN_CONCENTRATION: &str = "pathogen_concentration";
    pub const VOLUME: &str = "volume";
    pub const DILUTION: &str = "dilution";
    pub const TREATMENT_LRV: &str = "treatment_lrv";
    pub const BAF: &str = "baf";
    pub const INGESTION_RATE: &str = "ingestion_rate";
    pub const DURATION: &str = "duration";
}

/// Method Harmonisation Factor: scaling between water-based measurements and
/// tissue-exposure assessments. Applied once, inside the concentration
/// binding.
pub const MHF_WATER: f64 = 1.0;
pub const MHF_SHELLFISH: f64 = 18.5;

/// Shellfish bioaccumulation factor, TruncatedNormal(44.9, 20.93) on [1, 100].
pub const BAF_MEAN: f64 = 44.9;
pub const BAF_STD: f64 = 20.93;
pub const BAF_MIN: f64 = 1.0;
pub const BAF_MAX: f64 = 100.0;

/// Swimming ingestion rate (mL/h): lognormal with arithmetic mean 53 and
/// sd 75, truncated to [5, 200].
pub const INGESTION_RATE_MEAN: f64 = 53.0;
pub const INGESTION_RATE_SD: f64 = 75.0;
pub const INGESTION_RATE_MIN: f64 = 5.0;
pub const INGESTION_RATE_MAX: f64 = 200.0;

/// Swimming exposure duration (h): Triangular(0.2, 1.0, 4.0).
pub const DURATION_MIN: f64 = 0.2;
pub const DURATION_MODE: f64 = 1.0;
pub const DURATION_MAX: f64 = 4.0;

/// Shellfish meal size (g): log-logistic(2.2046, 75.072, −0.9032) on [5, 800].
pub const MEAL_ALPHA: f64 = 2.2046;
pub const MEAL_BETA: f64 = 75.072;
pub const MEAL_GAMMA: f64 = -0.9032;
pub const MEAL_MIN_G: f64 = 5.0;
pub const MEAL_MAX_G: f64 = 800.0;

const ML_PER_LITRE: f64 = 1_000.0;

/// Apply a log10 reduction: `C · 10^(−lrv)`.
pub fn treated_concentration(concentration: f64, lrv: f64) -> f64 {
    concentration * 10f64.powf(-lrv)
}

/// Dilute into the receiving water. Factors below 1 would amplify the
/// discharge and always indicate broken input data.
pub fn receiving_concentration(c_treated: f64, dilution: f64) -> Result<f64, QmraError> {
    if !(dilution >= 1.0) {
        return Err(QmraError::InvalidInput(format!(
            "dilution factor must be >= 1, got {dilution}"
        )));
    }
    Ok(c_treated / dilution)
}

/// Concentration in shellfish tissue from the ambient water concentration.
pub fn tissue_concentration(c_recv: f64, baf: f64) -> f64 {
    c_recv * baf
}

/// Expected organisms ingested: organisms/L × ingested litres. `volume` is in
/// mL for water (or g for shellfish tissue, where organisms/kg cancels the
/// same factor of 1000).
pub fn ingested_dose(concentration: f64, volume: f64) -> f64 {
    concentration * volume / ML_PER_LITRE
}

/// Whole organisms are ingested, not fractions: keep the integer part and
/// resolve the remainder with a Bernoulli draw, preserving the expectation.
pub fn discretize_dose(d_raw: f64, rng: &mut impl Rng) -> f64 {
    let whole = d_raw.floor();
    let frac = d_raw - whole;
    if frac > 0.0 && rng.random_bool(frac) { whole + 1.0 } else { whole }
}

/// Per-scenario dose computation over the joint sample matrix.
///
/// Reads the well-known bindings: concentration, dilution, and either a
/// direct volume column or the rate × duration pair. The optional
/// `treatment_lrv` column (per-iteration uncertainty draw) overrides
/// `fixed_lrv`; the optional `baf` column switches the exposure medium to
/// shellfish tissue.
#[derive(Debug, Clone, Copy)]
pub struct DoseModel {
    pub fixed_lrv: f64,
    pub discretize: bool,
}

impl DoseModel {
    pub fn doses(&self, samples: &Samples, rng: &mut impl Rng) -> Result<Vec<f64>, QmraError> {
        let conc = samples.require(names::PATHOGEN_CONCENTRATION)?;
        let dilution = samples.require(names::DILUTION)?;
        let volume = samples.get(names::VOLUME);
        let rate = samples.get(names::INGESTION_RATE);
        let duration = samples.get(names::DURATION);
        let lrv = samples.get(names::TREATMENT_LRV);
        let baf = samples.get(names::BAF);

        if volume.is_none() && (rate.is_none() || duration.is_none()) {
            return Err(QmraError::InvalidInput(
                "ingestion requires either a `volume` binding or both `ingestion_rate` and `duration`"
                    .to_string(),
            ));
        }
        if self.fixed_lrv < 0.0 {
            return Err(QmraError::InvalidParameter(format!(
                "treatment LRV must be >= 0, got {}",
                self.fixed_lrv
            )));
        }

        let n = conc.len();
        let mut doses = Vec::with_capacity(n);
        for i in 0..n {
            let l = lrv.map_or(self.fixed_lrv, |col| col[i]);
            let c_treated = treated_concentration(conc[i], l);
            let c_recv = receiving_concentration(c_treated, dilution[i])?;
            let c_exposure = match baf {
                Some(col) => tissue_concentration(c_recv, col[i]),
                None => c_recv,
            };
            let v = match volume {
                Some(col) => col[i],
                // Checked above: both columns present when volume is absent.
                None => rate.expect("checked")[i] * duration.expect("checked")[i],
            };
            let d_raw = ingested_dose(c_exposure, v);
            doses.push(if self.discretize { discretize_dose(d_raw, rng) } else { d_raw });
        }
        Ok(doses)
    }
}
