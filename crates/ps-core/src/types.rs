//! Common report types for probestat

use serde::{Deserialize, Serialize};

/// The geometry of the worst disagreement found by a consistency check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyWorst {
    /// Normalized radius of the sampled pair
    pub r: f64,
    /// Polar angle of the sampled pair
    pub theta: f64,
    /// `marginal(r, θ)`
    pub marginal: f64,
    /// Riemann-sum estimate of `∫ instantaneous(r, θ, t) dt`
    pub integral: f64,
}

/// Outcome of a marginal-vs-integral consistency check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    /// Seed actually used for vertex sampling (reproduces this report)
    pub seed: u64,
    /// Number of sampled vertices
    pub n_checked: usize,
    /// Riemann points actually used per vertex
    pub n_times: usize,
    /// Number of sampled vertices outside tolerance
    pub n_failed: usize,
    /// Largest `|marginal - integral|` among sampled vertices
    pub max_abs_diff: f64,
    /// Sample with the largest disagreement
    pub worst: Option<ConsistencyWorst>,
    /// `true` iff every sampled vertex is within tolerance
    pub passed: bool,
}

/// Poisson-process score of observed hits against a probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    /// Probe model name
    pub model: String,
    /// `hit_term - nonhit_term`
    pub score: f64,
    /// `Σ_hits w · ln R(r, θ, t)`
    pub hit_term: f64,
    /// `Σ_pairs w · marginal(r, θ)`
    pub nonhit_term: f64,
    /// Number of PE rows scored
    pub n_pe: usize,
    /// Number of vertex–channel pair rows scored
    pub n_pairs: usize,
    /// PE rows that landed on a zero rate (each forces the score to `-inf`)
    pub n_zero_rate_hits: usize,
    /// The consistency check the score was gated on
    pub consistency: ConsistencyReport,
}

impl ScoreReport {
    /// `true` if the score is a finite number.
    pub fn is_finite(&self) -> bool {
        self.score.is_finite()
    }
}
