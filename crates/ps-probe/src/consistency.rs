//! Monte-Carlo check that `marginal` is the time integral of `instantaneous`.
//!
//! `NV` pair geometries are drawn (with replacement) from real samples, and for
//! each one `marginal(r, θ)` is compared to a midpoint Riemann sum of
//! `instantaneous(r, θ, t)` over `NT` points in `[0, T_max]`. All draws come from
//! a seeded `StdRng`; the seed is recorded in the report.
//!
//! For models that are piecewise constant in time ([`ProbeModel::time_slices`]),
//! `NT` is rounded up to a multiple of the slice count so every slice gets the
//! same number of points and the sum is exact.

use crate::dataset::ConcatSamples;
use ps_core::{ConsistencyReport, ConsistencyWorst, Error, ProbeModel, Result};
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Consistency check parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyConfig {
    /// Sampled pair geometries (`NV`)
    pub n_vertices: usize,
    /// Riemann points per geometry (`NT`)
    pub n_times: usize,
    /// Relative tolerance
    pub rtol: f64,
    /// Absolute tolerance
    pub atol: f64,
    /// RNG seed; `None` draws one from OS entropy
    pub seed: Option<u64>,
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        Self { n_vertices: 1000, n_times: 10_000, rtol: 1e-5, atol: 1e-8, seed: None }
    }
}

impl ConsistencyConfig {
    /// Same config with a fixed seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.n_vertices == 0 || self.n_times == 0 {
            return Err(Error::Validation(format!(
                "consistency check needs n_vertices >= 1 and n_times >= 1, got {} and {}",
                self.n_vertices, self.n_times
            )));
        }
        if !(self.rtol.is_finite() && self.rtol >= 0.0 && self.atol.is_finite() && self.atol >= 0.0)
        {
            return Err(Error::Validation(format!(
                "tolerances must be finite and >= 0, got rtol={} atol={}",
                self.rtol, self.atol
            )));
        }
        Ok(())
    }
}

/// Midpoint Riemann sum of `instantaneous(r, θ, ·)` over `n_times` points on `[0, T_max]`.
pub fn riemann_integral<P: ProbeModel + ?Sized>(
    probe: &P,
    r: f64,
    theta: f64,
    n_times: usize,
) -> f64 {
    let dt = probe.t_max() / n_times as f64;
    let mut sum = 0.0;
    for k in 0..n_times {
        sum += probe.instantaneous(r, theta, (k as f64 + 0.5) * dt);
    }
    sum * dt
}

/// `n_times` rounded up to a multiple of `slices` (unchanged when `slices` is `None`).
pub fn grid_points(n_times: usize, slices: Option<usize>) -> usize {
    match slices {
        Some(s) if s > 0 && n_times % s != 0 => {
            n_times.div_ceil(s).checked_mul(s).unwrap_or(n_times)
        }
        _ => n_times,
    }
}

/// Run the check and report, without failing on disagreement.
pub fn check_consistency<P: ProbeModel + ?Sized>(
    probe: &P,
    samples: &ConcatSamples,
    config: &ConsistencyConfig,
) -> Result<ConsistencyReport> {
    config.validate()?;
    let n_pairs = samples.n_pairs();
    if n_pairs == 0 {
        return Err(Error::NoUsableData("no vertex-channel pairs to sample from".into()));
    }

    let n_times = grid_points(config.n_times, probe.time_slices());
    if n_times != config.n_times {
        tracing::debug!(
            requested = config.n_times,
            n_times,
            "rounded Riemann points up to the model's time grid"
        );
    }

    let seed = config.seed.unwrap_or_else(|| rand::rng().random());
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let picks: Vec<usize> = (0..config.n_vertices).map(|_| rng.random_range(0..n_pairs)).collect();

    let (rs, thetas) = (samples.pair_r(), samples.pair_theta());
    let checked: Vec<ConsistencyWorst> = picks
        .par_iter()
        .map(|&idx| {
            let (r, theta) = (rs[idx], thetas[idx]);
            ConsistencyWorst {
                r,
                theta,
                marginal: probe.marginal(r, theta),
                integral: riemann_integral(probe, r, theta, n_times),
            }
        })
        .collect();

    let mut n_failed = 0usize;
    let mut max_abs_diff = 0.0f64;
    let mut worst = None;
    for c in &checked {
        let diff = (c.marginal - c.integral).abs();
        if !(diff <= config.atol + config.rtol * c.integral.abs()) {
            n_failed += 1;
        }
        if worst.is_none() || diff > max_abs_diff || diff.is_nan() {
            max_abs_diff = diff;
            worst = Some(*c);
        }
    }

    let report = ConsistencyReport {
        seed,
        n_checked: checked.len(),
        n_times,
        n_failed,
        max_abs_diff,
        worst,
        passed: n_failed == 0,
    };
    tracing::debug!(
        model = probe.name(),
        seed,
        n_checked = report.n_checked,
        n_failed,
        max_abs_diff,
        "consistency check"
    );
    Ok(report)
}

/// Run the check and turn a disagreement into [`Error::Inconsistent`].
pub fn ensure_consistent<P: ProbeModel + ?Sized>(
    probe: &P,
    samples: &ConcatSamples,
    config: &ConsistencyConfig,
) -> Result<ConsistencyReport> {
    let report = check_consistency(probe, samples, config)?;
    if !report.passed {
        tracing::warn!(
            model = probe.name(),
            seed = report.seed,
            n_failed = report.n_failed,
            max_abs_diff = report.max_abs_diff,
            "probe failed the marginal/instantaneous consistency check"
        );
        return Err(Error::Inconsistent {
            n_failed: report.n_failed,
            n_checked: report.n_checked,
            max_abs_diff: report.max_abs_diff,
        });
    }
    Ok(report)
}
