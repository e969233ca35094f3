//! End-to-end batch scenarios through the public API only: canonical
//! exposure set-ups from the outfall study, checked on consequences that are
//! robust to the sampling stream.

use qmra::orchestrator::Orchestrator;
use qmra::pathogens::{NOROVIRUS, PathogenRegistry};
use qmra::results::{Compliance, ScenarioOutcome, annual_risk};
use qmra::scenario::{
    ConcentrationSpec, DilutionDataset, DilutionLibrary, DilutionSpec, ExposureRoute,
    IngestionSpec, ScenarioConfig, StudyConfig,
};
use qmra::tables::{read_dilution_csv, read_scenario_csv};

fn registry() -> PathogenRegistry {
    PathogenRegistry::builtin().expect("builtin registry must load")
}

fn run_one(sc: ScenarioConfig, dilution: &DilutionLibrary) -> Vec<ScenarioOutcome> {
    let reg = registry();
    let orch = Orchestrator::new(&reg, 42);
    orch.run_batch(&[sc], dilution)
}

fn transect() -> DilutionLibrary {
    let mut data = DilutionDataset::new();
    data.add_observations("Discharge", [1.0; 10]).unwrap();
    data.add_observations("50m", [4.0, 5.0, 6.5, 8.0, 9.0, 10.5, 12.0, 13.0, 14.0, 15.0]).unwrap();
    data.add_observations(
        "1000m",
        [300.0, 320.0, 345.0, 370.0, 395.0, 420.0, 445.0, 465.0, 485.0, 500.0],
    )
    .unwrap();
    let mut lib = DilutionLibrary::new();
    lib.insert("transect", data);
    lib
}

// ── Direct discharge, single exposure ────────────────────────────────────────

/// 1000 org/L, no treatment, no dilution, 1 L ingested: the dose is exactly
/// 1000 every iteration, so the whole distribution collapses onto the
/// dose-response curve and annual risk equals per-event risk at f = 1.
#[test]
fn undiluted_single_exposure_collapses_onto_the_curve() {
    let mut sc = ScenarioConfig::new("e1", NOROVIRUS, ExposureRoute::PrimaryContact);
    sc.concentration = ConcentrationSpec::Fixed(1_000.0);
    sc.ingestion = IngestionSpec::FixedMl(1_000.0);
    sc.events_per_year = 1.0;
    sc.population = 1;
    sc.seed = Some(42);

    let outcomes = run_one(sc, &DilutionLibrary::new());
    let r = outcomes[0].as_completed().expect("must complete");

    let expected = registry().model(NOROVIRUS, None).unwrap().p_infection(1_000.0).unwrap();
    assert!((r.p_infection.p50 - expected).abs() < 1e-12);
    assert!(r.p_infection.p50 > 0.5, "a 1000-organism dose is close to the saturation plateau");
    assert!((r.annual_infection_risk.p50 - r.p_infection.p50).abs() < 1e-12);
    assert_eq!(r.compliance, Compliance::NonCompliant);
}

// ── Secondary treatment, sub-organism doses ──────────────────────────────────

fn secondary_treatment() -> ScenarioConfig {
    let mut sc = ScenarioConfig::new("e2", NOROVIRUS, ExposureRoute::PrimaryContact);
    sc.concentration = ConcentrationSpec::Fixed(1e6);
    sc.treatment_lrv = 3.0;
    sc.dilution = DilutionSpec::Fixed(100.0);
    sc.ingestion = IngestionSpec::FixedMl(50.0);
    sc.events_per_year = 20.0;
    sc.population = 10_000;
    sc.seed = Some(42);
    sc
}

/// Continuous dose 0.5 sits between the 0.1 and 1.0 anchors of the curve;
/// twenty events a year push essentially everyone over the threshold.
#[test]
fn secondary_treatment_continuous_dose() {
    let mut sc = secondary_treatment();
    sc.discretize_dose = false;
    let outcomes = run_one(sc, &DilutionLibrary::new());
    let r = outcomes[0].as_completed().unwrap();

    assert!(
        (0.38..=0.43).contains(&r.p_infection.p50),
        "P(0.5 organisms) = {} away from the sub-organism band",
        r.p_infection.p50
    );
    assert!(r.annual_infection_risk.p50 > 0.99);
    assert!(
        (9_900.0..=10_000.0).contains(&r.expected_annual_infections),
        "population impact {} outside [9900, 10000]",
        r.expected_annual_infections
    );
    assert_eq!(r.compliance, Compliance::NonCompliant);
}

/// With discretization on, a raw dose of 0.5 resolves to 0 or 1 whole
/// organisms: the per-event distribution is two-point, so the 5th percentile
/// sits at zero and the 95th on the single-organism response.
#[test]
fn secondary_treatment_discretized_dose_is_two_point() {
    let outcomes = run_one(secondary_treatment(), &DilutionLibrary::new());
    let r = outcomes[0].as_completed().unwrap();

    assert_eq!(r.p_infection.p5, 0.0);
    assert!(
        (0.41..=0.43).contains(&r.p_infection.p95),
        "upper atom {} should match the one-organism response 0.4211",
        r.p_infection.p95
    );
    assert!(r.annual_infection_risk.p95 > 0.99);
}

// ── UV upgrade ───────────────────────────────────────────────────────────────

/// Eight logs of treatment leave ~5e-6 organisms per event; virtually every
/// discretized dose is zero, and the site complies.
#[test]
fn uv_treatment_complies() {
    let mut sc = secondary_treatment();
    sc.scenario_id = "e3".to_string();
    sc.treatment_lrv = 8.0;
    let outcomes = run_one(sc, &DilutionLibrary::new());
    let r = outcomes[0].as_completed().unwrap();

    assert_eq!(r.annual_infection_risk.p50, 0.0);
    assert_eq!(r.compliance, Compliance::Compliant);
}

// ── Spatial transect ─────────────────────────────────────────────────────────

fn spatial(lrv: f64) -> ScenarioConfig {
    let mut sc = ScenarioConfig::new("e4", NOROVIRUS, ExposureRoute::PrimaryContact);
    sc.concentration = ConcentrationSpec::HockeyStick { min: 5e5, median: 1e6, max: 2e6, p: None };
    sc.treatment_lrv = lrv;
    sc.dilution = DilutionSpec::Ecdf { dataset: "transect".to_string() };
    sc.ingestion = IngestionSpec::FixedMl(50.0);
    sc.events_per_year = 25.0;
    sc.population = 15_000;
    sc.discretize_dose = false;
    sc.seed = Some(42);
    sc
}

#[test]
fn annual_risk_falls_monotonically_with_distance() {
    let outcomes = run_one(spatial(3.0), &transect());
    assert_eq!(outcomes.len(), 3);
    let sites: Vec<Option<&str>> = outcomes.iter().map(|o| o.site()).collect();
    assert_eq!(sites, vec![Some("Discharge"), Some("50m"), Some("1000m")]);

    let medians: Vec<f64> = outcomes
        .iter()
        .map(|o| o.as_completed().unwrap().annual_infection_risk.p50)
        .collect();
    assert!(
        medians[0] > medians[1] && medians[1] > medians[2],
        "risk must fall along the transect: {medians:?}"
    );
    assert_eq!(outcomes[0].as_completed().unwrap().compliance, Compliance::NonCompliant);
}

#[test]
fn heavier_treatment_shifts_the_far_field_toward_compliance() {
    let lrv3 = run_one(spatial(3.0), &transect());
    let lrv8 = run_one(spatial(8.0), &transect());
    let far_lrv3 = lrv3[2].as_completed().unwrap().annual_infection_risk.p50;
    let far_lrv8 = lrv8[2].as_completed().unwrap().annual_infection_risk.p50;
    assert!(far_lrv8 < far_lrv3);
    assert!(far_lrv8 < 1e-2, "five extra logs must collapse the far-field risk, got {far_lrv8}");
}

// ── Treatment sweep ──────────────────────────────────────────────────────────

#[test]
fn annual_risk_is_non_increasing_in_lrv() {
    let run = |lrv: f64, discretize: bool| {
        let mut sc = secondary_treatment();
        sc.scenario_id = format!("e5-lrv{lrv}");
        sc.treatment_lrv = lrv;
        sc.discretize_dose = discretize;
        let outcomes = run_one(sc, &DilutionLibrary::new());
        outcomes[0].as_completed().unwrap().annual_infection_risk.p50
    };

    for discretize in [false, true] {
        let sweep: Vec<f64> = [0.0, 3.0, 8.0, 9.3].iter().map(|&l| run(l, discretize)).collect();
        for pair in sweep.windows(2) {
            assert!(
                pair[1] <= pair[0],
                "annual risk rose with more treatment (discretize={discretize}): {sweep:?}"
            );
        }
        assert!(sweep[0] > 0.99, "untreated discharge must be extreme risk");
    }
}

// ── Shellfish route ──────────────────────────────────────────────────────────

#[test]
fn shellfish_serving_risk_is_positive_and_annualizes() {
    let mut sc = ScenarioConfig::new("e6", NOROVIRUS, ExposureRoute::ShellfishConsumption);
    sc.concentration = ConcentrationSpec::Fixed(1_000.0);
    sc.dilution = DilutionSpec::Fixed(10.0);
    sc.events_per_year = 12.0;
    sc.population = 5_000;
    sc.seed = Some(42);

    let outcomes = run_one(sc, &DilutionLibrary::new());
    let r = outcomes[0].as_completed().unwrap();

    assert!(r.p_infection.p50 > 0.0, "a contaminated harvesting area must carry serving risk");
    assert_eq!(r.pathogen_method, "Fixed");
    // Annualization is the monotone transform 1 − (1 − p)^f, so the median
    // annual risk tracks the transformed median per-event risk.
    let expected = annual_risk(r.p_infection.p50, 12.0);
    assert!(
        (r.annual_infection_risk.p50 - expected).abs() < 1e-3,
        "median annual {} vs transformed median {}",
        r.annual_infection_risk.p50,
        expected
    );
    assert!(r.annual_infection_risk.p50 >= r.p_infection.p50);
}

// ── Batch-level contracts ────────────────────────────────────────────────────

/// The full canonical study is a pure function of its seed: serialized
/// outcome streams from two runs must be byte-identical.
#[test]
fn canonical_study_is_reproducible() {
    let reg = registry();
    let render = || {
        let study = StudyConfig::canonical();
        let orch = Orchestrator::new(&reg, study.base_seed);
        let outcomes = orch.run_batch(&study.scenarios, &study.dilution);
        outcomes
            .iter()
            .map(|o| serde_json::to_string(o).unwrap())
            .collect::<Vec<_>>()
            .join("\n")
    };
    assert_eq!(render(), render());
}

#[test]
fn every_canonical_outcome_satisfies_the_result_schema() {
    let reg = registry();
    let study = StudyConfig::canonical();
    let orch = Orchestrator::new(&reg, study.base_seed);
    for outcome in orch.run_batch(&study.scenarios, &study.dilution) {
        let r = outcome.as_completed().unwrap_or_else(|| panic!("{outcome:?} failed"));
        r.check_integrity().expect("schema contract");
        assert!(r.p_infection.is_ordered());
        assert!(r.annual_infection_risk.is_ordered());
        assert!(r.annual_illness_risk.is_ordered());
        assert_eq!(r.compliance, qmra::results::compliance_verdict(r.annual_infection_risk.p50));
    }
}

/// Tabular inputs end to end: dilution CSV + scenario CSV → batch → results.
#[test]
fn csv_inputs_drive_a_spatial_batch() {
    let dilution_csv = "\
Site_Name,Dilution_Factor,Distance_m
Discharge,1.0,0
Discharge,1.0,0
50m,5.0,50
50m,9.0,50
50m,14.0,50
";
    let scenario_csv = "\
Scenario_ID,Pathogen,Exposure_Route,Treatment_LRV,Min_Concentration,Median_Concentration,Max_Concentration,Dilution_Dataset,Volume_mL,Exposure_Frequency_per_Year,Exposed_Population,Seed
T1,norovirus,primary_contact,3.0,500000,1000000,2000000,survey,50,25,15000,42
";
    let dataset = read_dilution_csv(dilution_csv.as_bytes()).unwrap();
    let mut library = DilutionLibrary::new();
    library.insert("survey", dataset);
    let scenarios = read_scenario_csv(scenario_csv.as_bytes()).unwrap();

    let reg = registry();
    let outcomes = Orchestrator::new(&reg, 1).run_batch(&scenarios, &library);
    assert_eq!(outcomes.len(), 2, "one outcome per surveyed site");
    for outcome in &outcomes {
        let r = outcome.as_completed().expect("CSV-driven scenario must complete");
        assert_eq!(r.pathogen_method, "HockeyStick");
        assert_eq!(r.dilution_method, "ECDF");
    }
}
