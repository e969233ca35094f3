use std::io;
use std::path::Path;

use csv::StringRecord;

use crate::error::QmraError;
use crate::results::ScenarioOutcome;
use crate::scenario::{
    ConcentrationSpec, DilutionDataset, DilutionSpec, ExposureRoute, IngestionSpec, ScenarioConfig,
};

/// Sentinel printed in numeric columns of failed rows.
const NOT_AVAILABLE: &str = "NA";

fn csv_error(e: csv::Error) -> QmraError {
    QmraError::InvalidInput(format!("csv: {e}"))
}

/// Header lookup tolerating aliases; unknown columns are simply never looked
/// up, which is how they get ignored.
struct Columns {
    headers: StringRecord,
}

impl Columns {
    fn new(headers: StringRecord) -> Self {
        Columns { headers }
    }

    fn find(&self, aliases: &[&str]) -> Option<usize> {
        self.headers.iter().position(|h| aliases.iter().any(|a| h.trim() == *a))
    }

    fn require(&self, aliases: &[&str]) -> Result<usize, QmraError> {
        self.find(aliases).ok_or_else(|| {
            QmraError::InvalidInput(format!(
                "missing required column `{}` (have: {})",
                aliases.join("` or `"),
                self.headers.iter().collect::<Vec<_>>().join(", ")
            ))
        })
    }
}

fn field<'r>(record: &'r StringRecord, idx: usize) -> Option<&'r str> {
    record.get(idx).map(str::trim).filter(|s| !s.is_empty())
}

fn parse_f64(text: &str, row: usize, column: &str) -> Result<f64, QmraError> {
    text.parse::<f64>().map_err(|_| {
        QmraError::InvalidInput(format!("row {row}: `{column}` is not a number: `{text}`"))
    })
}

fn opt_f64(
    record: &StringRecord,
    idx: Option<usize>,
    row: usize,
    column: &str,
) -> Result<Option<f64>, QmraError> {
    idx.and_then(|i| field(record, i)).map(|s| parse_f64(s, row, column)).transpose()
}

// ── Dilution table ───────────────────────────────────────────────────────────

/// Read a dilution table: `Site_Name` (or `Location`) and `Dilution_Factor`,
/// one observation per row; repeated sites accumulate into an ECDF sample.
/// Extra columns (time, distance, tidal state) are ignored.
pub fn read_dilution_csv<R: io::Read>(reader: R) -> Result<DilutionDataset, QmraError> {
    let mut csv = csv::Reader::from_reader(reader);
    let columns = Columns::new(csv.headers().map_err(csv_error)?.clone());
    let site_idx = columns.require(&["Site_Name", "Location"])?;
    let factor_idx = columns.require(&["Dilution_Factor"])?;

    let mut dataset = DilutionDataset::new();
    for (row_no, record) in csv.records().enumerate() {
        let record = record.map_err(csv_error)?;
        let row = row_no + 2; // header is row 1
        let site = field(&record, site_idx).ok_or_else(|| {
            QmraError::InvalidInput(format!("row {row}: empty site name"))
        })?;
        let factor_text = field(&record, factor_idx).ok_or_else(|| {
            QmraError::InvalidInput(format!("row {row}: empty Dilution_Factor"))
        })?;
        let factor = parse_f64(factor_text, row, "Dilution_Factor")?;
        dataset.add_observations(site, [factor])?;
    }
    Ok(dataset)
}

pub fn read_dilution_file(path: impl AsRef<Path>) -> Result<DilutionDataset, QmraError> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .map_err(|e| QmraError::InvalidInput(format!("cannot open {}: {e}", path.display())))?;
    read_dilution_csv(file)
}

// ── Concentration table ──────────────────────────────────────────────────────

/// Read a pathogen-concentration table: each row is either a fixed
/// `Effluent_Conc` or a `Min_/Median_/Max_Concentration` triple with an
/// optional `P_Breakpoint`.
pub fn read_concentration_csv<R: io::Read>(reader: R) -> Result<Vec<ConcentrationSpec>, QmraError> {
    let mut csv = csv::Reader::from_reader(reader);
    let columns = Columns::new(csv.headers().map_err(csv_error)?.clone());
    let fixed_idx = columns.find(&["Effluent_Conc"]);
    let min_idx = columns.find(&["Min_Concentration"]);
    let med_idx = columns.find(&["Median_Concentration"]);
    let max_idx = columns.find(&["Max_Concentration"]);
    let p_idx = columns.find(&["P_Breakpoint"]);
    if fixed_idx.is_none() && (min_idx.is_none() || med_idx.is_none() || max_idx.is_none()) {
        return Err(QmraError::InvalidInput(
            "concentration table needs `Effluent_Conc` or the Min/Median/Max_Concentration triple"
                .to_string(),
        ));
    }

    let mut specs = Vec::new();
    for (row_no, record) in csv.records().enumerate() {
        let record = record.map_err(csv_error)?;
        let row = row_no + 2;
        let min = opt_f64(&record, min_idx, row, "Min_Concentration")?;
        let median = opt_f64(&record, med_idx, row, "Median_Concentration")?;
        let max = opt_f64(&record, max_idx, row, "Max_Concentration")?;
        let spec = match (min, median, max) {
            (Some(min), Some(median), Some(max)) => ConcentrationSpec::HockeyStick {
                min,
                median,
                max,
                p: opt_f64(&record, p_idx, row, "P_Breakpoint")?,
            },
            (None, None, None) => {
                let fixed = opt_f64(&record, fixed_idx, row, "Effluent_Conc")?.ok_or_else(|| {
                    QmraError::InvalidInput(format!("row {row}: no concentration given"))
                })?;
                ConcentrationSpec::Fixed(fixed)
            }
            _ => {
                return Err(QmraError::InvalidInput(format!(
                    "row {row}: partial concentration triple; give all of Min/Median/Max_Concentration"
                )));
            }
        };
        specs.push(spec);
    }
    Ok(specs)
}

// ── Scenario table ───────────────────────────────────────────────────────────

/// Read a scenario table into run-ready configurations. Required columns:
/// `Scenario_ID`, `Pathogen` (or `Pathogen_ID`), `Exposure_Route`,
/// `Treatment_LRV`, `Exposure_Frequency_per_Year`, `Exposed_Population`.
/// The concentration binding comes from `Effluent_Conc` or the
/// `Min_/Median_/Max_Concentration` triple; ingestion from `Volume_mL` or
/// `Volume_Min`/`Volume_Max`, defaulting to the route-specific distribution;
/// dilution from `Dilution_Factor` or `Dilution_Dataset` (+ optional
/// `Dilution_Method` of `ECDF`/`Median`). Unknown columns are ignored.
pub fn read_scenario_csv<R: io::Read>(reader: R) -> Result<Vec<ScenarioConfig>, QmraError> {
    let mut csv = csv::Reader::from_reader(reader);
    let columns = Columns::new(csv.headers().map_err(csv_error)?.clone());

    let id_idx = columns.require(&["Scenario_ID"])?;
    let pathogen_idx = columns.require(&["Pathogen", "Pathogen_ID"])?;
    let route_idx = columns.require(&["Exposure_Route"])?;
    let lrv_idx = columns.require(&["Treatment_LRV"])?;
    let freq_idx = columns.require(&["Exposure_Frequency_per_Year"])?;
    let pop_idx = columns.require(&["Exposed_Population"])?;

    let lrv_sigma_idx = columns.find(&["Treatment_LRV_Uncertainty"]);
    let model_idx = columns.find(&["Model"]);
    let conc_idx = columns.find(&["Effluent_Conc"]);
    let conc_min_idx = columns.find(&["Min_Concentration"]);
    let conc_med_idx = columns.find(&["Median_Concentration"]);
    let conc_max_idx = columns.find(&["Max_Concentration"]);
    let conc_p_idx = columns.find(&["P_Breakpoint"]);
    let dil_factor_idx = columns.find(&["Dilution_Factor"]);
    let dil_dataset_idx = columns.find(&["Dilution_Dataset"]);
    let dil_method_idx = columns.find(&["Dilution_Method"]);
    let vol_idx = columns.find(&["Volume_mL"]);
    let vol_min_idx = columns.find(&["Volume_Min"]);
    let vol_max_idx = columns.find(&["Volume_Max"]);
    let iterations_idx = columns.find(&["Iterations"]);
    let seed_idx = columns.find(&["Seed"]);

    let mut scenarios = Vec::new();
    for (row_no, record) in csv.records().enumerate() {
        let record = record.map_err(csv_error)?;
        let row = row_no + 2;
        let require = |idx: usize, name: &str| {
            field(&record, idx)
                .ok_or_else(|| QmraError::InvalidInput(format!("row {row}: empty `{name}`")))
        };

        let route = ExposureRoute::parse(require(route_idx, "Exposure_Route")?)?;
        let mut sc = ScenarioConfig::new(
            require(id_idx, "Scenario_ID")?,
            require(pathogen_idx, "Pathogen")?,
            route,
        );
        sc.model = model_idx.and_then(|i| field(&record, i)).map(str::to_string);
        sc.treatment_lrv =
            parse_f64(require(lrv_idx, "Treatment_LRV")?, row, "Treatment_LRV")?;
        sc.lrv_sigma = opt_f64(&record, lrv_sigma_idx, row, "Treatment_LRV_Uncertainty")?;
        sc.events_per_year = parse_f64(
            require(freq_idx, "Exposure_Frequency_per_Year")?,
            row,
            "Exposure_Frequency_per_Year",
        )?;
        let pop_text = require(pop_idx, "Exposed_Population")?;
        sc.population = pop_text.parse::<u64>().map_err(|_| {
            QmraError::InvalidInput(format!(
                "row {row}: `Exposed_Population` must be a non-negative integer: `{pop_text}`"
            ))
        })?;

        // Concentration: the hockey-stick triple wins over a fixed value.
        let min = opt_f64(&record, conc_min_idx, row, "Min_Concentration")?;
        let median = opt_f64(&record, conc_med_idx, row, "Median_Concentration")?;
        let max = opt_f64(&record, conc_max_idx, row, "Max_Concentration")?;
        sc.concentration = match (min, median, max) {
            (Some(min), Some(median), Some(max)) => ConcentrationSpec::HockeyStick {
                min,
                median,
                max,
                p: opt_f64(&record, conc_p_idx, row, "P_Breakpoint")?,
            },
            (None, None, None) => {
                let fixed = opt_f64(&record, conc_idx, row, "Effluent_Conc")?.ok_or_else(|| {
                    QmraError::InvalidInput(format!(
                        "row {row}: need `Effluent_Conc` or the Min/Median/Max_Concentration triple"
                    ))
                })?;
                ConcentrationSpec::Fixed(fixed)
            }
            _ => {
                return Err(QmraError::InvalidInput(format!(
                    "row {row}: partial concentration triple; give all of Min/Median/Max_Concentration"
                )));
            }
        };

        // Dilution: explicit factor, else a named dataset, else undiluted.
        sc.dilution = match (
            opt_f64(&record, dil_factor_idx, row, "Dilution_Factor")?,
            dil_dataset_idx.and_then(|i| field(&record, i)),
        ) {
            (Some(factor), _) => DilutionSpec::Fixed(factor),
            (None, Some(dataset)) => {
                let method = dil_method_idx.and_then(|i| field(&record, i)).unwrap_or("ECDF");
                match method {
                    "ECDF" => DilutionSpec::Ecdf { dataset: dataset.to_string() },
                    "Median" => DilutionSpec::Median { dataset: dataset.to_string() },
                    other => {
                        return Err(QmraError::InvalidInput(format!(
                            "row {row}: unknown Dilution_Method `{other}` (ECDF or Median)"
                        )));
                    }
                }
            }
            (None, None) => DilutionSpec::Fixed(1.0),
        };

        // Ingestion: explicit volume, uniform range, or the route default
        // already set by `ScenarioConfig::new`.
        let vol = opt_f64(&record, vol_idx, row, "Volume_mL")?;
        let vol_min = opt_f64(&record, vol_min_idx, row, "Volume_Min")?;
        let vol_max = opt_f64(&record, vol_max_idx, row, "Volume_Max")?;
        match (vol, vol_min, vol_max) {
            (Some(v), _, _) => sc.ingestion = IngestionSpec::FixedMl(v),
            (None, Some(min), Some(max)) => sc.ingestion = IngestionSpec::UniformMl { min, max },
            (None, None, None) => {}
            _ => {
                return Err(QmraError::InvalidInput(format!(
                    "row {row}: give both Volume_Min and Volume_Max for a uniform volume"
                )));
            }
        }

        if let Some(n) = opt_f64(&record, iterations_idx, row, "Iterations")? {
            sc.iterations = n as usize;
        }
        if let Some(seed) = opt_f64(&record, seed_idx, row, "Seed")? {
            sc.seed = Some(seed as u64);
        }

        sc.validate()?;
        scenarios.push(sc);
    }
    Ok(scenarios)
}

pub fn read_scenario_file(path: impl AsRef<Path>) -> Result<Vec<ScenarioConfig>, QmraError> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .map_err(|e| QmraError::InvalidInput(format!("cannot open {}: {e}", path.display())))?;
    read_scenario_csv(file)
}

// ── Result table ─────────────────────────────────────────────────────────────

pub const RESULT_COLUMNS: [&str; 23] = [
    "Scenario_ID",
    "Site",
    "Pathogen",
    "Model",
    "Iterations",
    "Seed",
    "Pinf_Median",
    "Pinf_5th",
    "Pinf_95th",
    "Annual_Risk_Median",
    "Annual_Risk_5th",
    "Annual_Risk_95th",
    "Annual_Illness_Risk",
    "Annual_Illness_5th",
    "Annual_Illness_95th",
    "Population_Impact",
    "Population_Illness_Cases",
    "Compliance_Status",
    "Dilution_Method",
    "Pathogen_Method",
    "Warnings",
    "Error_Kind",
    "Error_Message",
];

/// Write one row per outcome. Numbers use the shortest round-trip `f64`
/// rendering (full double precision); failed rows carry `NA` sentinels, a
/// `FAILED` status, and the error pair.
pub fn write_results_csv<W: io::Write>(
    writer: W,
    outcomes: &[ScenarioOutcome],
) -> Result<(), QmraError> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(RESULT_COLUMNS).map_err(csv_error)?;

    for outcome in outcomes {
        match outcome {
            ScenarioOutcome::Completed(r) => {
                let record: [String; 23] = [
                    r.scenario_id.clone(),
                    r.site.clone().unwrap_or_default(),
                    r.pathogen.clone(),
                    r.model.clone(),
                    r.iterations.to_string(),
                    r.seed.to_string(),
                    r.p_infection.p50.to_string(),
                    r.p_infection.p5.to_string(),
                    r.p_infection.p95.to_string(),
                    r.annual_infection_risk.p50.to_string(),
                    r.annual_infection_risk.p5.to_string(),
                    r.annual_infection_risk.p95.to_string(),
                    r.annual_illness_risk.p50.to_string(),
                    r.annual_illness_risk.p5.to_string(),
                    r.annual_illness_risk.p95.to_string(),
                    r.expected_annual_infections.to_string(),
                    r.expected_annual_illnesses.to_string(),
                    r.compliance.as_str().to_string(),
                    r.dilution_method.clone(),
                    r.pathogen_method.clone(),
                    r.warnings.join("; "),
                    String::new(),
                    String::new(),
                ];
                csv.write_record(&record).map_err(csv_error)?;
            }
            ScenarioOutcome::Failed(f) => {
                let mut record = vec![
                    f.scenario_id.as_str(),
                    f.site.as_deref().unwrap_or(""),
                    NOT_AVAILABLE,
                    NOT_AVAILABLE,
                ];
                record.extend(std::iter::repeat_n(NOT_AVAILABLE, 13));
                record.push("FAILED");
                record.push(NOT_AVAILABLE);
                record.push(NOT_AVAILABLE);
                record.push("");
                record.push(f.error_kind.as_str());
                record.push(f.error_message.as_str());
                csv.write_record(&record).map_err(csv_error)?;
            }
        }
    }
    csv.flush().map_err(|e| QmraError::InvalidInput(format!("csv: {e}")))?;
    Ok(())
}
