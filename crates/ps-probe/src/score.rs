//! Poisson-process score of observed hits against a probe.
//!
//! `score = Σ_hits w · ln R(r, θ, t) − Σ_pairs w · marginal(r, θ)`
//!
//! Scoring is gated on [`crate::consistency::ensure_consistent`]: a probe whose
//! marginal disagrees with its own time integral is rejected with
//! [`ps_core::Error::Inconsistent`] before any score is computed.

use crate::consistency::{ConsistencyConfig, ensure_consistent};
use crate::dataset::ConcatSamples;
use ps_core::{ProbeModel, Result, ScoreReport};

/// Score evaluator with its consistency-gate settings.
#[derive(Debug, Clone, Default)]
pub struct ScoreEvaluator {
    consistency: ConsistencyConfig,
}

impl ScoreEvaluator {
    /// Evaluator gated by `consistency`.
    pub fn new(consistency: ConsistencyConfig) -> Self {
        Self { consistency }
    }

    /// Consistency settings used by [`ScoreEvaluator::score`].
    pub fn consistency(&self) -> &ConsistencyConfig {
        &self.consistency
    }

    /// Check consistency, then score `samples`.
    pub fn score<P: ProbeModel + ?Sized>(
        &self,
        probe: &P,
        samples: &ConcatSamples,
    ) -> Result<ScoreReport> {
        let consistency = ensure_consistent(probe, samples, &self.consistency)?;

        let rates = probe.instantaneous_batch(samples.pe_r(), samples.pe_theta(), samples.pe_t());
        let mut hit_term = 0.0;
        let mut n_zero_rate_hits = 0usize;
        for (&rate, &w) in rates.iter().zip(samples.pe_weights()) {
            // A zero-weight row contributes nothing, even on a zero-rate cell.
            if w == 0.0 {
                continue;
            }
            if rate <= 0.0 {
                n_zero_rate_hits += 1;
            }
            hit_term += w * rate.ln();
        }
        if n_zero_rate_hits > 0 {
            tracing::warn!(
                model = probe.name(),
                n_zero_rate_hits,
                "hits landed on zero-rate cells; score is -inf"
            );
        }

        let mu = probe.marginal_batch(samples.pair_r(), samples.pair_theta());
        let nonhit_term: f64 = mu.iter().zip(samples.pair_weights()).map(|(m, w)| m * w).sum();

        let score = hit_term - nonhit_term;
        tracing::info!(model = probe.name(), score, hit_term, nonhit_term, "probe scored");
        Ok(ScoreReport {
            model: probe.name().to_string(),
            score,
            hit_term,
            nonhit_term,
            n_pe: samples.n_pe(),
            n_pairs: samples.n_pairs(),
            n_zero_rate_hits,
            consistency,
        })
    }
}
