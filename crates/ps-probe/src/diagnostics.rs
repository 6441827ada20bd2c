//! Plot-ready diagnostic artifacts for a probe.
//!
//! Nothing here renders; every function returns plain serializable data:
//! - [`pie_grid`]: `marginal(r, θ)` on a polar grid,
//! - [`closure_map`]: observed / expected hit ratio per polar cell,
//! - [`time_profile`]: model `R(t)` at a point next to the PE-time histogram of
//!   its neighbourhood.

use crate::binning::Axis;
use crate::dataset::ConcatSamples;
use ps_core::{Error, ProbeModel, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI, TAU};

/// `(r, θ)` points whose time profiles are reported by default.
pub const DEFAULT_PROFILE_POINTS: [(f64, f64); 7] = [
    (0.0, 0.0),
    (0.99, FRAC_PI_4),
    (0.99, 0.0),
    (0.99, PI),
    (0.5, PI),
    (0.7, 5.0 * PI / 6.0),
    (0.9, FRAC_PI_2),
];

/// Marginal on the outer product of `rs × thetas`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PieGrid {
    /// Radii (rows)
    pub rs: Vec<f64>,
    /// Angles (columns)
    pub thetas: Vec<f64>,
    /// `values[i][j] = marginal(rs[i], thetas[j])`
    pub values: Vec<Vec<f64>>,
}

/// Observed vs expected hits on a uniform polar grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosureMap {
    /// Radial edges over `[0, 1]`
    pub r_edges: Vec<f64>,
    /// Angular edges over `[0, 2π]`
    pub theta_edges: Vec<f64>,
    /// Weighted PE count per cell
    pub observed: Vec<Vec<f64>>,
    /// Σ w · marginal over the pairs in each cell
    pub expected: Vec<Vec<f64>>,
    /// `observed / expected`; `None` where nothing is expected
    pub ratio: Vec<Vec<Option<f64>>>,
}

/// Model curve and neighbourhood histogram at one `(r, θ)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeProfile {
    /// Centre radius
    pub r: f64,
    /// Centre angle
    pub theta: f64,
    /// Neighbourhood radius (polar distance)
    pub radius: f64,
    /// Curve sample times
    pub times: Vec<f64>,
    /// `instantaneous(r, θ, t)` at `times`
    pub model: Vec<f64>,
    /// Histogram edges over `[0, T_max]`
    pub hist_edges: Vec<f64>,
    /// Neighbourhood PE times per bin divided by the neighbourhood pair weight;
    /// `None` if no pair lies in the neighbourhood
    pub histogram: Option<Vec<f64>>,
    /// Σ weight of pairs in the neighbourhood
    pub nearby_pair_weight: f64,
}

/// Settings for [`diagnose`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// Pie grid radial bins
    pub pie_r_bins: usize,
    /// Pie grid angular bins over `[0, 2π]`
    pub pie_theta_bins: usize,
    /// Closure map radial bins
    pub closure_r_bins: usize,
    /// Closure map angular bins over `[0, 2π]`
    pub closure_theta_bins: usize,
    /// Profile centres
    pub profile_points: Vec<(f64, f64)>,
    /// Neighbourhood radius
    pub neighbourhood: f64,
    /// Model curve points
    pub curve_points: usize,
    /// Neighbourhood histogram bins
    pub hist_bins: usize,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            pie_r_bins: 50,
            pie_theta_bins: 200,
            closure_r_bins: 50,
            closure_theta_bins: 200,
            profile_points: DEFAULT_PROFILE_POINTS.to_vec(),
            neighbourhood: 0.05,
            curve_points: 10_001,
            hist_bins: 100,
        }
    }
}

/// All diagnostics for one probe and sample set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsArtifact {
    /// Probe model name
    pub model: String,
    /// Marginal pie
    pub pie: PieGrid,
    /// Closure map
    pub closure: ClosureMap,
    /// Time profiles at the configured points
    pub profiles: Vec<TimeProfile>,
}

fn midpoints(axis: &Axis) -> Vec<f64> {
    axis.edges().windows(2).map(|w| 0.5 * (w[0] + w[1])).collect()
}

/// Marginal on the bin midpoints of a uniform `[0,1] × [0,2π]` grid.
pub fn pie_grid<P: ProbeModel + ?Sized>(probe: &P, n_r: usize, n_theta: usize) -> Result<PieGrid> {
    let rs = midpoints(&Axis::uniform(n_r, 1.0)?);
    let thetas = midpoints(&Axis::uniform(n_theta, TAU)?);
    let values = probe.pie(&rs, &thetas);
    Ok(PieGrid { rs, thetas, values })
}

/// Observed / expected hits per cell of a uniform `[0,1] × [0,2π]` grid.
///
/// Rows outside the grid are dropped.
pub fn closure_map<P: ProbeModel + ?Sized>(
    probe: &P,
    samples: &ConcatSamples,
    n_r: usize,
    n_theta: usize,
) -> Result<ClosureMap> {
    let r_axis = Axis::uniform(n_r, 1.0)?;
    let th_axis = Axis::uniform(n_theta, TAU)?;
    let mut observed = vec![vec![0.0; n_theta]; n_r];
    let mut expected = vec![vec![0.0; n_theta]; n_r];

    let mu = probe.marginal_batch(samples.pair_r(), samples.pair_theta());
    for i in 0..samples.n_pairs() {
        if let (Some(a), Some(b)) =
            (r_axis.fill_index(samples.pair_r()[i]), th_axis.fill_index(samples.pair_theta()[i]))
        {
            expected[a][b] += mu[i] * samples.pair_weights()[i];
        }
    }
    for i in 0..samples.n_pe() {
        if let (Some(a), Some(b)) =
            (r_axis.fill_index(samples.pe_r()[i]), th_axis.fill_index(samples.pe_theta()[i]))
        {
            observed[a][b] += samples.pe_weights()[i];
        }
    }

    let ratio = observed
        .iter()
        .zip(&expected)
        .map(|(o_row, e_row)| {
            o_row.iter().zip(e_row).map(|(&o, &e)| (e > 0.0).then(|| o / e)).collect()
        })
        .collect();

    Ok(ClosureMap {
        r_edges: r_axis.edges().to_vec(),
        theta_edges: th_axis.edges().to_vec(),
        observed,
        expected,
        ratio,
    })
}

#[inline]
fn polar_dist2(r1: f64, th1: f64, r2: f64, th2: f64) -> f64 {
    r1 * r1 + r2 * r2 - 2.0 * r1 * r2 * (th1 - th2).cos()
}

/// Model `R(t)` at `(r, θ)` next to the neighbourhood's PE-time histogram.
pub fn time_profile<P: ProbeModel + ?Sized>(
    probe: &P,
    samples: &ConcatSamples,
    r: f64,
    theta: f64,
    radius: f64,
    curve_points: usize,
    hist_bins: usize,
) -> Result<TimeProfile> {
    if !(radius.is_finite() && radius > 0.0) {
        return Err(Error::Validation(format!("neighbourhood radius must be > 0, got {radius}")));
    }
    if curve_points < 2 {
        return Err(Error::Validation(format!("curve_points must be >= 2, got {curve_points}")));
    }
    let t_max = probe.t_max();
    let times: Vec<f64> =
        (0..curve_points).map(|i| i as f64 * t_max / (curve_points - 1) as f64).collect();
    let model = times.iter().map(|&t| probe.instantaneous(r, theta, t)).collect();

    let hist_axis = Axis::uniform(hist_bins, t_max)?;
    let r2 = radius * radius;
    let nearby_pair_weight: f64 = (0..samples.n_pairs())
        .filter(|&i| polar_dist2(samples.pair_r()[i], samples.pair_theta()[i], r, theta) <= r2)
        .map(|i| samples.pair_weights()[i])
        .sum();

    let histogram = (nearby_pair_weight > 0.0).then(|| {
        let mut counts = vec![0.0; hist_bins];
        for i in 0..samples.n_pe() {
            if polar_dist2(samples.pe_r()[i], samples.pe_theta()[i], r, theta) > r2 {
                continue;
            }
            if let Some(k) = hist_axis.fill_index(samples.pe_t()[i]) {
                counts[k] += samples.pe_weights()[i] / nearby_pair_weight;
            }
        }
        counts
    });

    Ok(TimeProfile {
        r,
        theta,
        radius,
        times,
        model,
        hist_edges: hist_axis.edges().to_vec(),
        histogram,
        nearby_pair_weight,
    })
}

/// Compute every diagnostic in `config`.
pub fn diagnose<P: ProbeModel + ?Sized>(
    probe: &P,
    samples: &ConcatSamples,
    config: &DiagnosticsConfig,
) -> Result<DiagnosticsArtifact> {
    let pie = pie_grid(probe, config.pie_r_bins, config.pie_theta_bins)?;
    let closure = closure_map(probe, samples, config.closure_r_bins, config.closure_theta_bins)?;
    let profiles = config
        .profile_points
        .iter()
        .map(|&(r, theta)| {
            time_profile(
                probe,
                samples,
                r,
                theta,
                config.neighbourhood,
                config.curve_points,
                config.hist_bins,
            )
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(DiagnosticsArtifact { model: probe.name().to_string(), pie, closure, profiles })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ConstantProbe;
    use approx::assert_relative_eq;

    fn samples() -> ConcatSamples {
        ConcatSamples::new(
            vec![0.51, 0.51, 0.9],
            vec![1.0, 1.0, 4.0],
            vec![5.0, 15.0, 500.0],
            vec![0.51, 0.9, 0.9],
            vec![1.0, 4.0, 4.0],
        )
        .unwrap()
    }

    #[test]
    fn test_pie_grid_shape() {
        let p = ConstantProbe::new(1e-3, 1000.0).unwrap();
        let pie = pie_grid(&p, 5, 8).unwrap();
        assert_eq!(pie.values.len(), 5);
        assert_eq!(pie.values[0].len(), 8);
        assert_relative_eq!(pie.rs[0], 0.1);
        assert_relative_eq!(pie.values[4][7], 1.0);
    }

    #[test]
    fn test_closure_map_ratio() {
        let p = ConstantProbe::new(1e-3, 1000.0).unwrap();
        let c = closure_map(&p, &samples(), 2, 2).unwrap();
        // Cell (1, 0): two PEs, one pair expecting 1 hit.
        assert_relative_eq!(c.observed[1][0], 2.0);
        assert_relative_eq!(c.expected[1][0], 1.0);
        assert_eq!(c.ratio[1][0], Some(2.0));
        // Cell (1, 1): one PE, two pairs.
        assert_eq!(c.ratio[1][1], Some(0.5));
        assert_eq!(c.ratio[0][0], None);
    }

    #[test]
    fn test_time_profile_neighbourhood_histogram() {
        let p = ConstantProbe::new(2e-3, 1000.0).unwrap();
        let prof = time_profile(&p, &samples(), 0.5, 1.0, 0.05, 11, 10).unwrap();
        assert_eq!(prof.times.len(), 11);
        assert_relative_eq!(prof.times[10], 1000.0);
        assert!(prof.model.iter().all(|&v| v == 2e-3));
        assert_relative_eq!(prof.nearby_pair_weight, 1.0);
        let h = prof.histogram.unwrap();
        assert_relative_eq!(h[0], 2.0);
        assert_relative_eq!(h.iter().sum::<f64>(), 2.0);
    }

    #[test]
    fn test_time_profile_without_neighbours() {
        let p = ConstantProbe::new(2e-3, 1000.0).unwrap();
        let prof = time_profile(&p, &samples(), 0.0, 0.0, 0.05, 3, 4).unwrap();
        assert!(prof.histogram.is_none());
    }

    #[test]
    fn test_diagnose_default_points() {
        let p = ConstantProbe::new(2e-3, 1000.0).unwrap();
        let cfg = DiagnosticsConfig { curve_points: 11, ..DiagnosticsConfig::default() };
        let art = diagnose(&p, &samples(), &cfg).unwrap();
        assert_eq!(art.profiles.len(), DEFAULT_PROFILE_POINTS.len());
        assert_eq!(art.model, "Constant");
    }
}
