use std::fs::File;
use std::io::{BufWriter, Write};

use qmra::orchestrator::Orchestrator;
use qmra::pathogens::PathogenRegistry;
use qmra::results::ScenarioOutcome;
use qmra::scenario::StudyConfig;
use qmra::tables::write_results_csv;

fn main() {
    // A registry that fails to load is unusable; nothing downstream can run.
    let registry = PathogenRegistry::builtin().unwrap_or_else(|e| {
        eprintln!("fatal: pathogen registry failed to load: {e}");
        std::process::exit(1);
    });

    let study = StudyConfig::canonical();
    let orchestrator = Orchestrator::new(&registry, study.base_seed);
    let outcomes = orchestrator.run_batch(&study.scenarios, &study.dilution);

    let file = File::create("results.ndjson").expect("failed to create results.ndjson");
    let mut writer = BufWriter::new(file);
    for outcome in &outcomes {
        serde_json::to_writer(&mut writer, outcome).expect("failed to serialize outcome");
        writeln!(writer).expect("failed to write newline");
    }

    let csv_file = File::create("results.csv").expect("failed to create results.csv");
    write_results_csv(BufWriter::new(csv_file), &outcomes)
        .expect("failed to write results.csv");

    println!("Outcomes emitted: {}", outcomes.len());
    println!("\n{:<20} {:<12} {:>14} {:>16}  {}", "Scenario", "Site", "Annual risk", "Infections/yr", "Verdict");
    for outcome in &outcomes {
        match outcome {
            ScenarioOutcome::Completed(r) => {
                println!(
                    "{:<20} {:<12} {:>14.6e} {:>16.1}  {}",
                    r.scenario_id,
                    r.site.as_deref().unwrap_or("-"),
                    r.annual_infection_risk.p50,
                    r.expected_annual_infections,
                    r.compliance.as_str(),
                );
            }
            ScenarioOutcome::Failed(f) => {
                println!(
                    "{:<20} {:<12} {:>14} {:>16}  FAILED: {} — {}",
                    f.scenario_id,
                    f.site.as_deref().unwrap_or("-"),
                    "-",
                    "-",
                    f.error_kind,
                    f.error_message,
                );
            }
        }
    }
}
