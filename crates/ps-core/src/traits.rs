//! Core traits for probestat
//!
//! Scoring and validation (in `ps-probe`) only talk to a probe through
//! [`ProbeModel`], so a new probe representation is added by implementing the
//! two query methods below.

/// A probe function `R(r, θ, t)`: the expected hit-rate density of one sensing
/// channel for a vertex at normalized radius `r` and polar angle `θ` relative to
/// that channel.
pub trait ProbeModel: Send + Sync {
    /// Time-integrated rate `∫₀^{T_max} R(r, θ, t) dt`, i.e. the expected number
    /// of hits for one vertex–channel pair.
    ///
    /// `r` is expected in `[0, 1]`, `theta` in `[0, π]` (mirror angles in
    /// `(π, 2π]` are folded). Out-of-range inputs are clamped, never rejected.
    fn marginal(&self, r: f64, theta: f64) -> f64;

    /// Instantaneous rate density `R(r, θ, t)`. `t` is clamped into `[0, T_max)`.
    fn instantaneous(&self, r: f64, theta: f64, t: f64) -> f64;

    /// Upper end of the time axis.
    fn t_max(&self) -> f64;

    /// Model name, used in logs and reports.
    fn name(&self) -> &str;

    /// Number of equal-width slices of `[0, T_max]` on which `instantaneous` is
    /// constant in `t`, if the model is piecewise constant in time.
    ///
    /// A midpoint sum whose point count is a multiple of this integrates the model exactly.
    fn time_slices(&self) -> Option<usize> {
        None
    }

    /// Vectorized [`ProbeModel::marginal`].
    fn marginal_batch(&self, rs: &[f64], thetas: &[f64]) -> Vec<f64> {
        debug_assert_eq!(rs.len(), thetas.len());
        rs.iter().zip(thetas).map(|(&r, &th)| self.marginal(r, th)).collect()
    }

    /// Vectorized [`ProbeModel::instantaneous`].
    fn instantaneous_batch(&self, rs: &[f64], thetas: &[f64], ts: &[f64]) -> Vec<f64> {
        debug_assert_eq!(rs.len(), thetas.len());
        debug_assert_eq!(rs.len(), ts.len());
        rs.iter()
            .zip(thetas)
            .zip(ts)
            .map(|((&r, &th), &t)| self.instantaneous(r, th, t))
            .collect()
    }

    /// Marginal evaluated on the outer product of `rs` × `thetas`.
    ///
    /// Returns rows indexed by `r` (shape `rs.len() × thetas.len()`).
    fn pie(&self, rs: &[f64], thetas: &[f64]) -> Vec<Vec<f64>> {
        rs.iter().map(|&r| thetas.iter().map(|&th| self.marginal(r, th)).collect()).collect()
    }
}
