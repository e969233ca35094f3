use rand::Rng;
use rand_distr::Distribution as _;
use rand_distr::{LogNormal, Normal, Triangular};

use crate::error::QmraError;

/// Default breakpoint probability for the Hockey-Stick distribution.
pub const DEFAULT_HOCKEY_STICK_P: f64 = 0.95;

/// Attempts before a truncated rejection sampler gives up and clamps.
const MAX_REJECTIONS: usize = 1_000;

/// Right-skewed piecewise-linear distribution with four break points
/// {x_min, x_median, x_p, x_max}. Region masses are fixed by construction:
///
///   [x_min, x_median]  rises 0 → h1, mass 0.5, so h1 = 1/(x_median − x_min)
///   [x_median, x_p]    h1 → h2, mass p − 0.5
///   [x_p, x_max]       h2 → 0, mass 1 − p, so h2 = 2(1−p)/(x_max − x_p)
///
/// Substituting h2 into the middle-region mass equation gives a quadratic in
/// B = x_max − x_p:  h1·B² − (h1·W − 1)·B − 2(1−p)·W = 0, with
/// W = x_max − x_median. The positive root always lies in (0, W), so x_p is
/// found analytically; no numeric root search is needed.
#[derive(Debug, Clone, PartialEq)]
pub struct HockeyStick {
    x_min: f64,
    x_median: f64,
    x_max: f64,
    p: f64,
    x_p: f64,
    h1: f64,
    h2: f64,
}

impl HockeyStick {
    pub fn new(x_min: f64, x_median: f64, x_max: f64, p: f64) -> Result<Self, QmraError> {
        if !(x_min.is_finite() && x_median.is_finite() && x_max.is_finite()) {
            return Err(QmraError::InvalidParameter(format!(
                "hockey-stick break points must be finite, got ({x_min}, {x_median}, {x_max})"
            )));
        }
        if !(x_min < x_median && x_median < x_max) {
            return Err(QmraError::InvalidParameter(format!(
                "hockey-stick requires x_min < x_median < x_max, got ({x_min}, {x_median}, {x_max})"
            )));
        }
        if !(p > 0.5 && p < 1.0) {
            return Err(QmraError::InvalidParameter(format!(
                "hockey-stick breakpoint probability must lie in (0.5, 1), got {p}"
            )));
        }

        let h1 = 1.0 / (x_median - x_min);
        let w = x_max - x_median;
        // h1·B² − (h1·W − 1)·B − 2(1−p)·W = 0; positive root.
        let a = h1;
        let b = -(h1 * w - 1.0);
        let c = -2.0 * (1.0 - p) * w;
        let tail_width = (-b + (b * b - 4.0 * a * c).sqrt()) / (2.0 * a);
        let x_p = x_max - tail_width;
        let h2 = 2.0 * (1.0 - p) / tail_width;

        Ok(HockeyStick { x_min, x_median, x_max, p, x_p, h1, h2 })
    }

    pub fn with_default_p(x_min: f64, x_median: f64, x_max: f64) -> Result<Self, QmraError> {
        Self::new(x_min, x_median, x_max, DEFAULT_HOCKEY_STICK_P)
    }

    /// The analytic breakpoint x_p, i.e. the p-quantile.
    pub fn breakpoint(&self) -> f64 {
        self.x_p
    }

    pub fn pdf(&self, x: f64) -> f64 {
        if x < self.x_min || x > self.x_max {
            0.0
        } else if x <= self.x_median {
            self.h1 * (x - self.x_min) / (self.x_median - self.x_min)
        } else if x <= self.x_p {
            self.h1 + (self.h2 - self.h1) * (x - self.x_median) / (self.x_p - self.x_median)
        } else {
            self.h2 * (self.x_max - x) / (self.x_max - self.x_p)
        }
    }

    /// Inverse CDF. Each region is linear in density, so the CDF is quadratic
    /// and inverts in closed form; draws are clamped to [x_min, x_max] against
    /// round-off at the edges.
    pub fn quantile(&self, u: f64) -> f64 {
        let u = u.clamp(0.0, 1.0);
        let x = if u <= 0.5 {
            // CDF(x) = h1·(x − x_min)² / (2·(x_median − x_min))
            self.x_min + (self.x_median - self.x_min) * (2.0 * u).sqrt()
        } else if u <= self.p {
            let a = self.x_p - self.x_median;
            let slope = self.h2 - self.h1;
            if slope.abs() * a < 1e-12 {
                // Flat middle region: CDF is linear.
                self.x_median + (u - 0.5) / self.h1
            } else {
                // (slope/2a)·t² + h1·t − (u − 0.5) = 0 for t = x − x_median.
                let qa = slope / (2.0 * a);
                let disc = self.h1 * self.h1 + 4.0 * qa * (u - 0.5);
                self.x_median + (-self.h1 + disc.max(0.0).sqrt()) / (2.0 * qa)
            }
        } else {
            // Tail mass beyond x is h2·(x_max − x)² / (2·(x_max − x_p)).
            let b = self.x_max - self.x_p;
            self.x_max - b * ((1.0 - u) / (1.0 - self.p)).max(0.0).sqrt()
        };
        x.clamp(self.x_min, self.x_max)
    }
}

/// A sampleable one-dimensional distribution. Parameter invariants are
/// enforced by the fallible constructors; `sample` relies on them.
#[derive(Debug, Clone, PartialEq)]
pub enum Distribution {
    /// Degenerate point mass — the binding form of a fixed scalar input.
    Fixed(f64),
    Uniform { min: f64, max: f64 },
    Normal { mean: f64, std: f64 },
    /// Parameters on the log scale.
    Lognormal { meanlog: f64, sdlog: f64 },
    Triangular { min: f64, mode: f64, max: f64 },
    TruncatedNormal { mean: f64, std: f64, min: f64, max: f64 },
    TruncatedLognormal { meanlog: f64, sdlog: f64, min: f64, max: f64 },
    /// Three-parameter log-logistic (shape α, scale β, location γ) restricted
    /// to [min, max] by inverse-CDF rescaling.
    TruncatedLogLogistic { alpha: f64, beta: f64, gamma: f64, min: f64, max: f64 },
    HockeyStick(HockeyStick),
    /// Ordered-quantile lookup over the sorted observations. No smoothing, no
    /// extrapolation beyond the observed range.
    EmpiricalCdf { values: Vec<f64> },
}

fn check_bounds(what: &str, min: f64, max: f64) -> Result<(), QmraError> {
    if min.is_finite() && max.is_finite() && min < max {
        Ok(())
    } else {
        Err(QmraError::InvalidParameter(format!("{what} requires min < max, got [{min}, {max}]")))
    }
}

fn check_positive(what: &str, value: f64) -> Result<(), QmraError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(QmraError::InvalidParameter(format!("{what} must be finite and > 0, got {value}")))
    }
}

impl Distribution {
    pub fn fixed(value: f64) -> Result<Self, QmraError> {
        if !value.is_finite() {
            return Err(QmraError::InvalidParameter(format!("fixed value must be finite, got {value}")));
        }
        Ok(Distribution::Fixed(value))
    }

    pub fn uniform(min: f64, max: f64) -> Result<Self, QmraError> {
        check_bounds("uniform", min, max)?;
        Ok(Distribution::Uniform { min, max })
    }

    pub fn normal(mean: f64, std: f64) -> Result<Self, QmraError> {
        check_positive("normal std", std)?;
        Ok(Distribution::Normal { mean, std })
    }

    pub fn lognormal(meanlog: f64, sdlog: f64) -> Result<Self, QmraError> {
        check_positive("lognormal sdlog", sdlog)?;
        Ok(Distribution::Lognormal { meanlog, sdlog })
    }

    pub fn triangular(min: f64, mode: f64, max: f64) -> Result<Self, QmraError> {
        check_bounds("triangular", min, max)?;
        if !(min <= mode && mode <= max) {
            return Err(QmraError::InvalidParameter(format!(
                "triangular requires min <= mode <= max, got ({min}, {mode}, {max})"
            )));
        }
        Ok(Distribution::Triangular { min, mode, max })
    }

    pub fn truncated_normal(mean: f64, std: f64, min: f64, max: f64) -> Result<Self, QmraError> {
        check_positive("truncated normal std", std)?;
        check_bounds("truncated normal", min, max)?;
        Ok(Distribution::TruncatedNormal { mean, std, min, max })
    }

    pub fn truncated_lognormal(
        meanlog: f64,
        sdlog: f64,
        min: f64,
        max: f64,
    ) -> Result<Self, QmraError> {
        check_positive("truncated lognormal sdlog", sdlog)?;
        check_bounds("truncated lognormal", min, max)?;
        Ok(Distribution::TruncatedLognormal { meanlog, sdlog, min, max })
    }

    /// Truncated lognormal from arithmetic-scale moments, the form exposure
    /// literature quotes (e.g. swimming ingestion rate: mean 53 mL/h, sd 75).
    pub fn truncated_lognormal_from_moments(
        mean: f64,
        sd: f64,
        min: f64,
        max: f64,
    ) -> Result<Self, QmraError> {
        check_positive("lognormal mean", mean)?;
        check_positive("lognormal sd", sd)?;
        let cv2 = (sd / mean).powi(2);
        let sdlog = (1.0 + cv2).ln().sqrt();
        let meanlog = mean.ln() - sdlog * sdlog / 2.0;
        Self::truncated_lognormal(meanlog, sdlog, min, max)
    }

    pub fn truncated_log_logistic(
        alpha: f64,
        beta: f64,
        gamma: f64,
        min: f64,
        max: f64,
    ) -> Result<Self, QmraError> {
        check_positive("log-logistic alpha", alpha)?;
        check_positive("log-logistic beta", beta)?;
        check_bounds("truncated log-logistic", min, max)?;
        if min <= gamma {
            return Err(QmraError::InvalidParameter(format!(
                "log-logistic lower bound {min} must exceed location {gamma}"
            )));
        }
        Ok(Distribution::TruncatedLogLogistic { alpha, beta, gamma, min, max })
    }

    pub fn hockey_stick(x_min: f64, x_median: f64, x_max: f64, p: f64) -> Result<Self, QmraError> {
        Ok(Distribution::HockeyStick(HockeyStick::new(x_min, x_median, x_max, p)?))
    }

    pub fn empirical_cdf(mut values: Vec<f64>) -> Result<Self, QmraError> {
        if values.is_empty() {
            return Err(QmraError::InvalidParameter(
                "empirical CDF requires at least one observation".to_string(),
            ));
        }
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(QmraError::InvalidParameter(format!(
                "empirical CDF observations must be finite, got {bad}"
            )));
        }
        values.sort_unstable_by(f64::total_cmp);
        Ok(Distribution::EmpiricalCdf { values })
    }

    /// Draw one value. Deterministic given the RNG state.
    pub fn sample(&self, rng: &mut impl Rng) -> f64 {
        match self {
            Distribution::Fixed(value) => *value,
            Distribution::Uniform { min, max } => rng.random_range(*min..*max),
            Distribution::Normal { mean, std } => {
                Normal::new(*mean, *std).expect("params validated at construction").sample(rng)
            }
            Distribution::Lognormal { meanlog, sdlog } => LogNormal::new(*meanlog, *sdlog)
                .expect("params validated at construction")
                .sample(rng),
            Distribution::Triangular { min, mode, max } => {
                Triangular::new(*min, *max, *mode)
                    .expect("params validated at construction")
                    .sample(rng)
            }
            Distribution::TruncatedNormal { mean, std, min, max } => {
                let dist = Normal::new(*mean, *std).expect("params validated at construction");
                sample_truncated(&dist, *min, *max, rng)
            }
            Distribution::TruncatedLognormal { meanlog, sdlog, min, max } => {
                let dist =
                    LogNormal::new(*meanlog, *sdlog).expect("params validated at construction");
                sample_truncated(&dist, *min, *max, rng)
            }
            Distribution::TruncatedLogLogistic { alpha, beta, gamma, min, max } => {
                let cdf = |x: f64| 1.0 / (1.0 + ((x - gamma) / beta).powf(-alpha));
                let lo = cdf(*min);
                let hi = cdf(*max);
                let u = lo + rng.random::<f64>() * (hi - lo);
                let x = gamma + beta * (u / (1.0 - u)).powf(1.0 / alpha);
                x.clamp(*min, *max)
            }
            Distribution::HockeyStick(hs) => hs.quantile(rng.random::<f64>()),
            Distribution::EmpiricalCdf { values } => {
                let idx = (rng.random::<f64>() * values.len() as f64) as usize;
                values[idx.min(values.len() - 1)]
            }
        }
    }

    pub fn sample_n(&self, n: usize, rng: &mut impl Rng) -> Vec<f64> {
        (0..n).map(|_| self.sample(rng)).collect()
    }
}

/// Draw until the value lands in [min, max]; after `MAX_REJECTIONS` misses
/// (pathological truncation windows) the last draw is clamped so sampling
/// always terminates.
fn sample_truncated<D: rand_distr::Distribution<f64>>(
    dist: &D,
    min: f64,
    max: f64,
    rng: &mut impl Rng,
) -> f64 {
    let mut value = 0.0;
    for _ in 0..MAX_REJECTIONS {
        value = dist.sample(rng);
        if (min..=max).contains(&value) {
            return value;
        }
    }
    value.clamp(min, max)
}
