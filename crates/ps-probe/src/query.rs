//! Probe queries: `marginal(r, θ)` and `instantaneous(r, θ, t)`.

use crate::coords::fold_theta;
use crate::table::ProbeTable;
use ps_core::{Error, ProbeModel, Result};
use std::sync::Arc;

/// Probe backed by a histogram [`ProbeTable`].
///
/// Both queries resolve bins through [`crate::binning::Axis::bin_index`], the
/// same `[e_i, e_{i+1})` convention the builder fills with.
#[derive(Debug, Clone)]
pub struct HistogramProbe {
    table: Arc<ProbeTable>,
    /// `time_integral` per geometric cell, row-major `(r, θ)`.
    marginals: Vec<f64>,
}

impl HistogramProbe {
    /// Wrap a loaded table.
    pub fn new(table: Arc<ProbeTable>) -> Self {
        let (n_r, n_th, _) = table.shape();
        let mut marginals = Vec::with_capacity(n_r * n_th);
        for i in 0..n_r {
            for j in 0..n_th {
                marginals.push(table.time_integral(i, j));
            }
        }
        Self { table, marginals }
    }

    /// The underlying table.
    pub fn table(&self) -> &Arc<ProbeTable> {
        &self.table
    }

    #[inline]
    fn cell(&self, r: f64, theta: f64) -> (usize, usize) {
        let b = self.table.binning();
        (b.r.bin_index(r), b.theta.bin_index(fold_theta(theta)))
    }
}

impl ProbeModel for HistogramProbe {
    fn marginal(&self, r: f64, theta: f64) -> f64 {
        let (i, j) = self.cell(r, theta);
        self.marginals[self.table.binning().cell(i, j)]
    }

    fn instantaneous(&self, r: f64, theta: f64, t: f64) -> f64 {
        let (i, j) = self.cell(r, theta);
        let t_axis = &self.table.binning().t;
        // Upper end is clipped by `bin_index`, which keeps `t = T_max` in the last slice.
        let k = t_axis.bin_index(t.max(0.0));
        self.table.rate(i, j, k)
    }

    fn t_max(&self) -> f64 {
        self.table.t_max()
    }

    fn name(&self) -> &str {
        "Histogram"
    }

    fn time_slices(&self) -> Option<usize> {
        Some(self.table.binning().t_bins())
    }
}

/// Flat probe: the same rate density everywhere. Baseline for scoring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantProbe {
    rate: f64,
    t_max: f64,
}

impl ConstantProbe {
    /// Constant `rate` on `[0, t_max]`.
    pub fn new(rate: f64, t_max: f64) -> Result<Self> {
        if !(rate.is_finite() && rate >= 0.0) {
            return Err(Error::Validation(format!(
                "constant probe rate must be finite and >= 0, got {rate}"
            )));
        }
        if !(t_max.is_finite() && t_max > 0.0) {
            return Err(Error::Validation(format!(
                "constant probe t_max must be finite and > 0, got {t_max}"
            )));
        }
        Ok(Self { rate, t_max })
    }

    /// Rate density.
    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl ProbeModel for ConstantProbe {
    fn marginal(&self, _r: f64, _theta: f64) -> f64 {
        self.rate * self.t_max
    }

    fn instantaneous(&self, _r: f64, _theta: f64, _t: f64) -> f64 {
        self.rate
    }

    fn t_max(&self) -> f64 {
        self.t_max
    }

    fn name(&self) -> &str {
        "Constant"
    }

    fn time_slices(&self) -> Option<usize> {
        Some(1)
    }
}

/// Which probe variant to construct.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProbeKind {
    /// Table lookup ([`HistogramProbe`])
    Histogram,
    /// Flat rate density ([`ConstantProbe`]); `None` uses the table's mean rate.
    Constant {
        /// Rate density, or `None` for the mean of the table
        rate: Option<f64>,
    },
}

/// The closed set of probe implementations.
#[derive(Debug, Clone)]
pub enum Probe {
    /// Table lookup
    Histogram(HistogramProbe),
    /// Flat rate density
    Constant(ConstantProbe),
}

impl Probe {
    /// Construct the variant named by `kind` for `table`.
    pub fn new(kind: ProbeKind, table: Arc<ProbeTable>) -> Result<Self> {
        match kind {
            ProbeKind::Histogram => Ok(Probe::Histogram(HistogramProbe::new(table))),
            ProbeKind::Constant { rate } => {
                let rate = rate.unwrap_or_else(|| {
                    let rates = table.rates();
                    rates.iter().sum::<f64>() / rates.len() as f64
                });
                Ok(Probe::Constant(ConstantProbe::new(rate, table.t_max())?))
            }
        }
    }

    fn inner(&self) -> &dyn ProbeModel {
        match self {
            Probe::Histogram(p) => p,
            Probe::Constant(p) => p,
        }
    }
}

impl ProbeModel for Probe {
    fn marginal(&self, r: f64, theta: f64) -> f64 {
        self.inner().marginal(r, theta)
    }

    fn instantaneous(&self, r: f64, theta: f64, t: f64) -> f64 {
        self.inner().instantaneous(r, theta, t)
    }

    fn t_max(&self) -> f64 {
        self.inner().t_max()
    }

    fn name(&self) -> &str {
        self.inner().name()
    }

    fn time_slices(&self) -> Option<usize> {
        self.inner().time_slices()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binning::ProbeBinning;
    use approx::assert_relative_eq;
    use std::f64::consts::{PI, TAU};

    fn ramp_table() -> Arc<ProbeTable> {
        let b = ProbeBinning::new(2, 2, 4, 1000.0).unwrap();
        let rates = (0..b.len()).map(|i| (i + 1) as f64 * 1e-4).collect();
        Arc::new(ProbeTable::new(b, rates).unwrap())
    }

    #[test]
    fn test_marginal_is_scaled_time_sum() {
        let p = HistogramProbe::new(ramp_table());
        let expected: f64 = p.table().cell_rates(1, 0).iter().sum::<f64>() * 250.0;
        assert_relative_eq!(p.marginal(0.95, 0.2), expected);
    }

    #[test]
    fn test_instantaneous_direct_lookup_and_clamping() {
        let table = ramp_table();
        let p = HistogramProbe::new(Arc::clone(&table));
        assert_relative_eq!(p.instantaneous(0.1, 0.1, 260.0), table.rate(0, 0, 1));
        assert_relative_eq!(p.instantaneous(0.1, 0.1, -3.0), table.rate(0, 0, 0));
        assert_relative_eq!(p.instantaneous(0.1, 0.1, 1000.0), table.rate(0, 0, 3));
        assert_relative_eq!(p.instantaneous(0.1, 0.1, 1e9), table.rate(0, 0, 3));
        assert_relative_eq!(p.instantaneous(7.0, PI, 10.0), table.rate(1, 1, 0));
        assert_relative_eq!(p.instantaneous(-1.0, -1.0, 10.0), table.rate(0, 0, 0));
    }

    #[test]
    fn test_mirror_angle_resolves_to_same_cell() {
        let p = HistogramProbe::new(ramp_table());
        for &th in &[0.1, 1.0, 2.0, 3.0] {
            assert_eq!(p.marginal(0.5, th), p.marginal(0.5, TAU - th));
            assert_eq!(p.instantaneous(0.5, th, 400.0), p.instantaneous(0.5, TAU - th, 400.0));
        }
    }

    #[test]
    fn test_constant_probe() {
        let p = ConstantProbe::new(0.01, 1000.0).unwrap();
        assert_relative_eq!(p.marginal(0.3, 0.3), 10.0);
        assert_relative_eq!(p.instantaneous(0.3, 0.3, 5.0), 0.01);
        assert!(ConstantProbe::new(-1.0, 1000.0).is_err());
        assert!(ConstantProbe::new(1.0, 0.0).is_err());
    }

    #[test]
    fn test_probe_enum_dispatch() {
        let table = ramp_table();
        let h = Probe::new(ProbeKind::Histogram, Arc::clone(&table)).unwrap();
        assert_eq!(h.name(), "Histogram");
        let c = Probe::new(ProbeKind::Constant { rate: None }, Arc::clone(&table)).unwrap();
        assert_eq!(c.name(), "Constant");
        let mean = table.rates().iter().sum::<f64>() / table.rates().len() as f64;
        assert_relative_eq!(c.instantaneous(0.0, 0.0, 0.0), mean);
        let c2 = Probe::new(ProbeKind::Constant { rate: Some(0.5) }, table).unwrap();
        assert_relative_eq!(c2.marginal(0.0, 0.0), 500.0);
    }
}
