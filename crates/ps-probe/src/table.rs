//! The persisted probe table `rate[r][θ][t]`.

use crate::binning::ProbeBinning;
use ps_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Schema version written into every table file.
pub const TABLE_SCHEMA_V1: &str = "probestat_table_v1";

/// Immutable rate-density table on a [`ProbeBinning`].
///
/// Values are stored row-major `[r_bin][theta_bin][t_bin]`, are finite and
/// non-negative.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeTable {
    binning: ProbeBinning,
    rates: Vec<f64>,
}

impl ProbeTable {
    /// Validate and wrap `rates` (flat, row-major) on `binning`.
    pub fn new(binning: ProbeBinning, rates: Vec<f64>) -> Result<Self> {
        if rates.len() != binning.len() {
            return Err(Error::Validation(format!(
                "probe table length mismatch: binning has {} cells, got {} values",
                binning.len(),
                rates.len()
            )));
        }
        for (i, &v) in rates.iter().enumerate() {
            if !v.is_finite() || v < 0.0 {
                return Err(Error::Validation(format!(
                    "probe table value {i} must be finite and >= 0, got {v}"
                )));
            }
        }
        Ok(Self { binning, rates })
    }

    /// The table's axes.
    pub fn binning(&self) -> &ProbeBinning {
        &self.binning
    }

    /// Flat row-major values.
    pub fn rates(&self) -> &[f64] {
        &self.rates
    }

    /// `(r_bins, theta_bins, t_bins)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.binning.r.n_bins(), self.binning.theta.n_bins(), self.binning.t_bins())
    }

    /// Upper end of the time axis.
    pub fn t_max(&self) -> f64 {
        self.binning.t_max()
    }

    /// `rate[i][j][k]`.
    #[inline]
    pub fn rate(&self, i: usize, j: usize, k: usize) -> f64 {
        self.rates[self.binning.flat(i, j, k)]
    }

    /// Time profile of geometric cell `(i, j)`.
    #[inline]
    pub fn cell_rates(&self, i: usize, j: usize) -> &[f64] {
        let n_t = self.binning.t_bins();
        let start = self.binning.cell(i, j) * n_t;
        &self.rates[start..start + n_t]
    }

    /// Values of time slice `k`, one per geometric cell in `(i, j)` row-major order.
    pub fn time_slice(&self, k: usize) -> Vec<f64> {
        let n_t = self.binning.t_bins();
        (0..self.binning.n_cells()).map(|c| self.rates[c * n_t + k]).collect()
    }

    /// `Σ_k rate[i][j][k] · T_max / t_bins`.
    pub fn time_integral(&self, i: usize, j: usize) -> f64 {
        self.cell_rates(i, j).iter().sum::<f64>() * self.binning.dt()
    }

    /// `Σ rate · (volume fraction of r-shell) · (solid-angle fraction of θ-band) · dt`.
    ///
    /// For equal-volume / equal-solid-angle axes this is the volume-averaged expected
    /// hit count per vertex–channel pair.
    pub fn total_mass(&self) -> f64 {
        let r = self.binning.r.edges();
        let th = self.binning.theta.edges();
        let mut mass = 0.0;
        for i in 0..self.binning.r.n_bins() {
            let vol = r[i + 1].powi(3) - r[i].powi(3);
            for j in 0..self.binning.theta.n_bins() {
                let solid = (th[j].cos() - th[j + 1].cos()) / 2.0;
                mass += self.time_integral(i, j) * vol * solid;
            }
        }
        mass
    }

    /// Serializable form with explicit size metadata.
    pub fn to_file(&self) -> ProbeTableFile {
        let (n_r, n_th, n_t) = self.shape();
        let probe = (0..n_r)
            .map(|i| (0..n_th).map(|j| self.cell_rates(i, j).to_vec()).collect())
            .collect();
        ProbeTableFile {
            schema_version: TABLE_SCHEMA_V1.to_string(),
            r_bins: n_r,
            theta_bins: n_th,
            t_bins: n_t,
            t_max: self.t_max(),
            r_edges: self.binning.r.edges().to_vec(),
            theta_edges: self.binning.theta.edges().to_vec(),
            probe,
        }
    }

    /// Rebuild from the serializable form, checking every size against its metadata.
    pub fn from_file(file: ProbeTableFile) -> Result<Self> {
        if file.schema_version != TABLE_SCHEMA_V1 {
            return Err(Error::Validation(format!(
                "unsupported table schema_version '{}', expected '{TABLE_SCHEMA_V1}'",
                file.schema_version
            )));
        }
        check_edge_count("r_edges", file.r_bins, file.r_edges.len())?;
        check_edge_count("theta_edges", file.theta_bins, file.theta_edges.len())?;
        if file.probe.len() != file.r_bins {
            return Err(Error::Validation(format!(
                "Probe has {} r rows, metadata says r_bins={}",
                file.probe.len(),
                file.r_bins
            )));
        }
        let mut rates = Vec::new();
        for (i, row) in file.probe.iter().enumerate() {
            if row.len() != file.theta_bins {
                return Err(Error::Validation(format!(
                    "Probe[{i}] has {} theta rows, metadata says theta_bins={}",
                    row.len(),
                    file.theta_bins
                )));
            }
            for (j, cell) in row.iter().enumerate() {
                if cell.len() != file.t_bins {
                    return Err(Error::Validation(format!(
                        "Probe[{i}][{j}] has {} time bins, metadata says t_bins={}",
                        cell.len(),
                        file.t_bins
                    )));
                }
                rates.extend_from_slice(cell);
            }
        }
        let binning =
            ProbeBinning::from_edges(file.r_edges, file.theta_edges, file.t_bins, file.t_max)?;
        Self::new(binning, rates)
    }
}

pub(crate) fn check_edge_count(name: &str, bins: usize, edges: usize) -> Result<()> {
    if bins == 0 || edges.checked_sub(1) != Some(bins) {
        return Err(Error::Validation(format!(
            "{name} has {edges} entries, expected {bins} bins plus one"
        )));
    }
    Ok(())
}

/// On-disk JSON layout of a [`ProbeTable`].
///
/// Sizes are stored explicitly and cross-checked on load, so a truncated array
/// is rejected instead of silently reshaped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeTableFile {
    /// Always [`TABLE_SCHEMA_V1`]
    pub schema_version: String,
    /// Number of radial bins
    pub r_bins: usize,
    /// Number of polar bins
    pub theta_bins: usize,
    /// Number of time bins
    pub t_bins: usize,
    /// Upper end of the time axis (ns)
    pub t_max: f64,
    /// Radial edges (`r_bins + 1`)
    pub r_edges: Vec<f64>,
    /// Polar edges (`theta_bins + 1`)
    pub theta_edges: Vec<f64>,
    /// Rate density `[r][θ][t]`
    #[serde(rename = "Probe")]
    pub probe: Vec<Vec<Vec<f64>>>,
}
