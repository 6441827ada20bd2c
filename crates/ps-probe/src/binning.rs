//! Axis partitions for the `(r, θ, t)` probe grid.
//!
//! Every axis resolves a value to a bin with the same convention: bins are the
//! half-open intervals `[e_i, e_{i+1})`, and values outside `[e_0, e_n)` are
//! clipped to the first/last bin. The histogram builder and both probe queries
//! go through [`Axis::bin_index`], so a value sitting exactly on an edge always
//! lands in the upper bin no matter who asks.

use ps_core::{Error, Result};
use std::f64::consts::PI;

/// One axis: strictly increasing, finite bin edges.
#[derive(Debug, Clone, PartialEq)]
pub struct Axis {
    edges: Vec<f64>,
}

impl Axis {
    /// Axis from explicit edges.
    pub fn new(edges: Vec<f64>) -> Result<Self> {
        if edges.len() < 2 {
            return Err(Error::Validation(format!(
                "axis requires at least 2 bin edges, got {}",
                edges.len()
            )));
        }
        for (i, &e) in edges.iter().enumerate() {
            if !e.is_finite() {
                return Err(Error::Validation(format!("bin_edges[{i}] must be finite, got {e}")));
            }
            if i > 0 && edges[i - 1] >= e {
                return Err(Error::Validation(format!(
                    "bin edges must be strictly increasing, got edges[{}]={} and edges[{}]={}",
                    i - 1,
                    edges[i - 1],
                    i,
                    e
                )));
            }
        }
        Ok(Self { edges })
    }

    /// `n` radial bins over `[0, 1]`, each enclosing the same volume: `e_i = (i/n)^(1/3)`.
    pub fn equal_volume(n: usize) -> Result<Self> {
        check_bins("r", n)?;
        Self::new((0..=n).map(|i| (i as f64 / n as f64).cbrt()).collect())
    }

    /// `n` polar bins over `[0, π]`, each subtending the same solid angle.
    ///
    /// Edges are `arccos` of a uniform grid in `cos θ` from `1` down to `-1`, which
    /// makes them run `0 → π`.
    pub fn equal_solid_angle(n: usize) -> Result<Self> {
        check_bins("theta", n)?;
        let mut edges: Vec<f64> =
            (0..=n).map(|i| (1.0 - 2.0 * i as f64 / n as f64).clamp(-1.0, 1.0).acos()).collect();
        edges[0] = 0.0;
        edges[n] = PI;
        Self::new(edges)
    }

    /// `n` uniform bins over `[0, max]`.
    pub fn uniform(n: usize, max: f64) -> Result<Self> {
        check_bins("t", n)?;
        if !(max.is_finite() && max > 0.0) {
            return Err(Error::Validation(format!(
                "axis upper end must be finite and > 0, got {max}"
            )));
        }
        let mut edges: Vec<f64> = (0..=n).map(|i| i as f64 * max / n as f64).collect();
        edges[n] = max;
        Self::new(edges)
    }

    /// Bin edges.
    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Number of bins (`edges.len() - 1`).
    pub fn n_bins(&self) -> usize {
        self.edges.len() - 1
    }

    /// Lower end of the axis.
    pub fn min(&self) -> f64 {
        self.edges[0]
    }

    /// Upper end of the axis.
    pub fn max(&self) -> f64 {
        self.edges[self.edges.len() - 1]
    }

    /// Bin containing `x`, clipped into `[0, n_bins)`. NaN maps to bin 0.
    #[inline]
    pub fn bin_index(&self, x: f64) -> usize {
        // `k` is the number of edges <= x, so the containing bin is k-1.
        let k = self.edges.partition_point(|&e| e <= x);
        k.saturating_sub(1).min(self.n_bins() - 1)
    }

    /// Bin containing `x` if `x ∈ [min, max]` (the last bin is closed), else `None`.
    ///
    /// This is histogram-filling semantics: out-of-range samples are dropped
    /// instead of clipped.
    #[inline]
    pub fn fill_index(&self, x: f64) -> Option<usize> {
        if x >= self.min() && x <= self.max() { Some(self.bin_index(x)) } else { None }
    }

    /// `true` if every edge is finite and strictly larger than its predecessor.
    pub fn is_strictly_increasing(&self) -> bool {
        self.edges.windows(2).all(|w| w[0].is_finite() && w[1].is_finite() && w[0] < w[1])
    }
}

fn check_bins(axis: &str, n: usize) -> Result<()> {
    if n == 0 {
        return Err(Error::Validation(format!("{axis} bin count must be >= 1")));
    }
    Ok(())
}

/// The three axes of a probe table.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeBinning {
    /// Normalized radius axis, `[0, 1]`
    pub r: Axis,
    /// Polar angle axis, `[0, π]`
    pub theta: Axis,
    /// Time axis, `[0, T_max]`
    pub t: Axis,
}

impl ProbeBinning {
    /// Default binning: equal-volume `r`, equal-solid-angle `θ`, uniform `t`.
    pub fn new(r_bins: usize, theta_bins: usize, t_bins: usize, t_max: f64) -> Result<Self> {
        Ok(Self {
            r: Axis::equal_volume(r_bins)?,
            theta: Axis::equal_solid_angle(theta_bins)?,
            t: Axis::uniform(t_bins, t_max)?,
        })
    }

    /// Binning from stored geometric edges and the time-axis parameters.
    pub fn from_edges(
        r_edges: Vec<f64>,
        theta_edges: Vec<f64>,
        t_bins: usize,
        t_max: f64,
    ) -> Result<Self> {
        Ok(Self {
            r: Axis::new(r_edges)?,
            theta: Axis::new(theta_edges)?,
            t: Axis::uniform(t_bins, t_max)?,
        })
    }

    /// Upper end of the time axis.
    pub fn t_max(&self) -> f64 {
        self.t.max()
    }

    /// Number of time slices.
    pub fn t_bins(&self) -> usize {
        self.t.n_bins()
    }

    /// Number of geometric `(r, θ)` cells.
    pub fn n_cells(&self) -> usize {
        self.r.n_bins() * self.theta.n_bins()
    }

    /// Total number of `(r, θ, t)` cells.
    pub fn len(&self) -> usize {
        self.n_cells() * self.t_bins()
    }

    /// Always `false`: every axis has at least one bin.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Flat geometric cell index for `(r_bin, theta_bin)`.
    #[inline]
    pub fn cell(&self, i: usize, j: usize) -> usize {
        i * self.theta.n_bins() + j
    }

    /// Flat row-major index for `(r_bin, theta_bin, t_bin)`.
    #[inline]
    pub fn flat(&self, i: usize, j: usize, k: usize) -> usize {
        self.cell(i, j) * self.t_bins() + k
    }

    /// Geometric cell containing `(r, θ)` (clipped).
    #[inline]
    pub fn cell_of(&self, r: f64, theta: f64) -> usize {
        self.cell(self.r.bin_index(r), self.theta.bin_index(theta))
    }

    /// Time width of one slice, `T_max / t_bins`.
    pub fn dt(&self) -> f64 {
        self.t_max() / self.t_bins() as f64
    }
}
