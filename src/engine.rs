use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::distributions::Distribution;
use crate::error::QmraError;

/// Default Monte Carlo iteration count.
pub const DEFAULT_ITERATIONS: usize = 10_000;

/// Default percentile grid for summaries.
pub const DEFAULT_PERCENTILES: [f64; 5] = [5.0, 25.0, 50.0, 75.0, 95.0];

/// The joint sample matrix: one column of `n` draws per bound distribution,
/// in insertion order.
#[derive(Debug, Clone)]
pub struct Samples {
    names: Vec<String>,
    columns: Vec<Vec<f64>>,
}

impl Samples {
    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.names.iter().position(|n| n == name).map(|i| self.columns[i].as_slice())
    }

    pub fn require(&self, name: &str) -> Result<&[f64], QmraError> {
        self.get(name)
            .ok_or_else(|| QmraError::InvalidInput(format!("no distribution bound as `{name}`")))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn iterations(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }
}

/// One derived output vector from a Monte Carlo run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub variable: String,
    pub values: Vec<f64>,
}

impl RunResult {
    pub fn statistics(&self) -> Statistics {
        statistics(&self.values)
    }

    pub fn percentiles(&self, ps: &[f64]) -> Vec<f64> {
        percentiles(&self.values, ps)
    }
}

/// Named-distribution Monte Carlo engine.
///
/// A single ChaCha20 RNG seeded at construction drives every draw, and
/// columns are sampled in the insertion order of `add`, so two engines with
/// the same seed and the same bindings produce identical sample matrices.
pub struct MonteCarloEngine {
    rng: ChaCha20Rng,
    seed: u64,
    distributions: Vec<(String, Distribution)>,
}

impl MonteCarloEngine {
    pub fn new(seed: u64) -> Self {
        MonteCarloEngine {
            rng: ChaCha20Rng::seed_from_u64(seed),
            seed,
            distributions: Vec::new(),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Bind a distribution under a unique name. Rebinding an existing name
    /// replaces the distribution but keeps its position in the draw order.
    pub fn add(&mut self, name: impl Into<String>, dist: Distribution) {
        let name = name.into();
        match self.distributions.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = dist,
            None => self.distributions.push((name, dist)),
        }
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.distributions.iter().any(|(n, _)| n == name)
    }

    /// Draw `n` samples from one bound distribution.
    pub fn sample(&mut self, name: &str, n: usize) -> Result<Vec<f64>, QmraError> {
        let MonteCarloEngine { rng, distributions, .. } = self;
        let dist = distributions
            .iter()
            .find(|(bound, _)| bound == name)
            .map(|(_, d)| d)
            .ok_or_else(|| QmraError::InvalidInput(format!("no distribution bound as `{name}`")))?;
        Ok(dist.sample_n(n, rng))
    }

    /// Draw the full joint sample matrix, column by column in binding order.
    pub fn draw(&mut self, n: usize) -> Samples {
        let mut names = Vec::with_capacity(self.distributions.len());
        let mut columns = Vec::with_capacity(self.distributions.len());
        for (name, dist) in &self.distributions {
            names.push(name.clone());
            columns.push(dist.sample_n(n, &mut self.rng));
        }
        Samples { names, columns }
    }

    /// Draw the joint samples, then let `model_fn` derive one output value per
    /// iteration. The model also receives the engine RNG for per-iteration
    /// stochastic steps (dose discretization). The derived vector must have
    /// length `n` and be finite everywhere; the first offending iteration is
    /// reported otherwise.
    pub fn run<F>(&mut self, variable: &str, n: usize, model_fn: F) -> Result<RunResult, QmraError>
    where
        F: FnOnce(&Samples, &mut ChaCha20Rng) -> Result<Vec<f64>, QmraError>,
    {
        let samples = self.draw(n);
        let values = model_fn(&samples, &mut self.rng)?;
        if values.len() != n {
            return Err(QmraError::InvalidInput(format!(
                "model for `{variable}` returned {} values for {n} iterations",
                values.len()
            )));
        }
        if let Some(bad) = values.iter().position(|v| !v.is_finite()) {
            return Err(QmraError::NumericFailure {
                iteration: bad,
                detail: format!("`{variable}` = {}", values[bad]),
            });
        }
        Ok(RunResult { variable: variable.to_string(), values })
    }
}

/// Five-number summary of a sample vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Statistics {
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

pub fn statistics(values: &[f64]) -> Statistics {
    debug_assert!(!values.is_empty(), "statistics of an empty sample");
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let (mut min, mut max) = (f64::INFINITY, f64::NEG_INFINITY);
    for &v in values {
        min = min.min(v);
        max = max.max(v);
    }
    Statistics { mean, median: percentile(values, 50.0), std: var.sqrt(), min, max }
}

/// Percentile with linear interpolation between order statistics.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    debug_assert!(!values.is_empty(), "percentile of an empty sample");
    let mut sorted = values.to_vec();
    sorted.sort_unstable_by(f64::total_cmp);
    sorted_percentile(&sorted, p)
}

pub fn percentiles(values: &[f64], ps: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_unstable_by(f64::total_cmp);
    ps.iter().map(|&p| sorted_percentile(&sorted, p)).collect()
}

fn sorted_percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = (p / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> MonteCarloEngine {
        MonteCarloEngine::new(42)
    }

    // ── Binding and sampling ─────────────────────────────────────────────────

    #[test]
    fn sample_unknown_name_fails() {
        let mut eng = engine();
        assert!(matches!(eng.sample("missing", 10), Err(QmraError::InvalidInput(_))));
    }

    #[test]
    fn add_replaces_but_keeps_draw_order() {
        let mut eng = engine();
        eng.add("a", Distribution::fixed(1.0).unwrap());
        eng.add("b", Distribution::fixed(2.0).unwrap());
        eng.add("a", Distribution::fixed(9.0).unwrap());
        let samples = eng.draw(3);
        let names: Vec<&str> = samples.names().collect();
        assert_eq!(names, vec!["a", "b"], "rebinding must not move `a` to the back");
        assert_eq!(samples.get("a").unwrap(), &[9.0, 9.0, 9.0]);
    }

    #[test]
    fn draw_produces_one_column_per_binding() {
        let mut eng = engine();
        eng.add("u", Distribution::uniform(0.0, 1.0).unwrap());
        eng.add("n", Distribution::normal(5.0, 1.0).unwrap());
        let samples = eng.draw(100);
        assert_eq!(samples.iterations(), 100);
        assert_eq!(samples.get("u").unwrap().len(), 100);
        assert_eq!(samples.get("n").unwrap().len(), 100);
        assert!(samples.get("x").is_none());
    }

    /// Two engines with the same seed and bindings must produce identical
    /// joint matrices — the reproducibility contract.
    #[test]
    fn identical_seeds_give_identical_matrices() {
        let build = || {
            let mut eng = MonteCarloEngine::new(7);
            eng.add("conc", Distribution::hockey_stick(10.0, 100.0, 1_000.0, 0.95).unwrap());
            eng.add("vol", Distribution::uniform(10.0, 100.0).unwrap());
            eng.draw(1_000)
        };
        let (a, b) = (build(), build());
        assert_eq!(a.get("conc").unwrap(), b.get("conc").unwrap());
        assert_eq!(a.get("vol").unwrap(), b.get("vol").unwrap());
    }

    /// Insertion order is the sampling order: swapping it must change the
    /// stream each column sees.
    #[test]
    fn binding_order_determines_stream_assignment() {
        let draw = |first: &str, second: &str| {
            let mut eng = MonteCarloEngine::new(7);
            eng.add(first, Distribution::uniform(0.0, 1.0).unwrap());
            eng.add(second, Distribution::uniform(0.0, 1.0).unwrap());
            let s = eng.draw(50);
            (s.get("a").unwrap().to_vec(), s.get("b").unwrap().to_vec())
        };
        let (a1, b1) = draw("a", "b");
        let (a2, b2) = draw("b", "a");
        assert_eq!(a1, b2, "first-bound column must always consume the stream first");
        assert_eq!(b1, a2);
    }

    // ── run ──────────────────────────────────────────────────────────────────

    #[test]
    fn run_passes_joint_samples_to_model() {
        let mut eng = engine();
        eng.add("x", Distribution::fixed(2.0).unwrap());
        eng.add("y", Distribution::fixed(3.0).unwrap());
        let result = eng
            .run("xy", 10, |samples, _| {
                let x = samples.require("x")?;
                let y = samples.require("y")?;
                Ok(x.iter().zip(y).map(|(a, b)| a * b).collect())
            })
            .unwrap();
        assert_eq!(result.variable, "xy");
        assert!(result.values.iter().all(|v| *v == 6.0));
    }

    #[test]
    fn run_reports_first_non_finite_iteration() {
        let mut eng = engine();
        eng.add("x", Distribution::fixed(1.0).unwrap());
        let err = eng
            .run("bad", 5, |_, _| Ok(vec![0.1, 0.2, f64::NAN, 0.4, f64::NAN]))
            .unwrap_err();
        assert!(
            matches!(err, QmraError::NumericFailure { iteration: 2, .. }),
            "expected NumericFailure at iteration 2, got {err:?}"
        );
    }

    #[test]
    fn run_rejects_wrong_length_output() {
        let mut eng = engine();
        let err = eng.run("short", 10, |_, _| Ok(vec![1.0; 9])).unwrap_err();
        assert!(matches!(err, QmraError::InvalidInput(_)));
    }

    // ── statistics ───────────────────────────────────────────────────────────

    #[test]
    fn statistics_on_known_vector() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let stats = statistics(&values);
        assert!((stats.mean - 5.0).abs() < 1e-12);
        assert!((stats.std - 2.0).abs() < 1e-12);
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 9.0);
        assert!((stats.median - 4.5).abs() < 1e-12);
    }

    #[test]
    fn percentiles_interpolate_and_order() {
        let values: Vec<f64> = (0..=100).map(|i| i as f64).collect();
        let ps = percentiles(&values, &DEFAULT_PERCENTILES);
        assert_eq!(ps, vec![5.0, 25.0, 50.0, 75.0, 95.0]);
        let unsorted = [9.0, 1.0, 5.0, 3.0, 7.0];
        assert_eq!(percentile(&unsorted, 50.0), 5.0);
        assert_eq!(percentile(&unsorted, 0.0), 1.0);
        assert_eq!(percentile(&unsorted, 100.0), 9.0);
    }
}
