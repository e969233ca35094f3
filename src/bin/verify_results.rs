//! Result-stream checker for qmra batch output.
//!
//! Reads `results.ndjson` (or the first positional argument), deserializes it
//! with the same `ScenarioOutcome` type the engine writes, then prints a
//! PASS/FAIL line per schema invariant:
//!   Inv 1 — percentile ordering (p5 ≤ p50 ≤ p95 for all three triples)
//!   Inv 2 — finite probabilities in [0, 1]
//!   Inv 3 — verdict consistency against the fixed annual-risk threshold
//!   Inv 4 — illness risk never exceeds infection risk
//!   Inv 5 — failed rows carry an error kind and message

use std::fs::File;
use std::io::{BufRead, BufReader};

use qmra::results::{ScenarioOutcome, compliance_verdict};

fn main() {
    let path = std::env::args().nth(1).unwrap_or_else(|| "results.ndjson".to_string());

    let file = File::open(&path).unwrap_or_else(|e| {
        eprintln!("error: cannot open {path} — {e}");
        eprintln!("Run `cargo run --release` first to generate the result stream.");
        std::process::exit(1);
    });

    let mut outcomes: Vec<ScenarioOutcome> = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.unwrap_or_else(|e| {
            eprintln!("error reading line {}: {}", line_no + 1, e);
            std::process::exit(1);
        });
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ScenarioOutcome>(&line) {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => {
                eprintln!("error: failed to deserialize line {}: {}", line_no + 1, e);
                eprintln!("  line: {line}");
                std::process::exit(1);
            }
        }
    }

    let mut violations: Vec<String> = Vec::new();

    let mut ordering_fail = false;
    let mut range_fail = false;
    let mut verdict_fail = false;
    let mut illness_fail = false;
    let mut error_pair_fail = false;

    for outcome in &outcomes {
        let tag = match outcome.site() {
            Some(site) => format!("{}/{site}", outcome.scenario_id()),
            None => outcome.scenario_id().to_string(),
        };
        match outcome {
            ScenarioOutcome::Completed(r) => {
                for (label, triple) in [
                    ("Pinf", &r.p_infection),
                    ("Annual", &r.annual_infection_risk),
                    ("AnnualIllness", &r.annual_illness_risk),
                ] {
                    if !triple.is_ordered() {
                        ordering_fail = true;
                        violations.push(format!(
                            "{tag}: {label} percentiles out of order ({}, {}, {})",
                            triple.p5, triple.p50, triple.p95
                        ));
                    }
                    for v in [triple.p5, triple.p50, triple.p95] {
                        if !v.is_finite() || !(0.0..=1.0).contains(&v) {
                            range_fail = true;
                            violations.push(format!("{tag}: {label} value {v} outside [0, 1]"));
                        }
                    }
                }
                if r.compliance != compliance_verdict(r.annual_infection_risk.p50) {
                    verdict_fail = true;
                    violations.push(format!(
                        "{tag}: verdict {:?} inconsistent with median annual risk {}",
                        r.compliance, r.annual_infection_risk.p50
                    ));
                }
                if r.annual_illness_risk.p50 > r.annual_infection_risk.p50 {
                    illness_fail = true;
                    violations.push(format!(
                        "{tag}: illness risk {} exceeds infection risk {}",
                        r.annual_illness_risk.p50, r.annual_infection_risk.p50
                    ));
                }
            }
            ScenarioOutcome::Failed(f) => {
                if f.error_kind.is_empty() || f.error_message.is_empty() {
                    error_pair_fail = true;
                    violations.push(format!("{tag}: failed row missing error kind or message"));
                }
            }
        }
    }

    fn status(fail: bool) -> &'static str {
        if fail { "FAIL" } else { "PASS" }
    }

    println!("=== Result-Stream Invariants ===");
    println!("  [{}] Inv 1 — percentile ordering", status(ordering_fail));
    println!("  [{}] Inv 2 — finite probabilities in [0, 1]", status(range_fail));
    println!("  [{}] Inv 3 — verdict matches the annual-risk threshold", status(verdict_fail));
    println!("  [{}] Inv 4 — illness risk <= infection risk", status(illness_fail));
    println!("  [{}] Inv 5 — failed rows carry an error pair", status(error_pair_fail));

    let completed = outcomes.iter().filter(|o| o.as_completed().is_some()).count();
    if violations.is_empty() {
        println!(
            "  All invariants PASS ({} outcomes checked, {completed} completed, {} failed)",
            outcomes.len(),
            outcomes.len() - completed
        );
    } else {
        println!("\n  {} violation(s) detected:", violations.len());
        for v in &violations {
            println!("    {v}");
        }
        std::process::exit(1);
    }
}
