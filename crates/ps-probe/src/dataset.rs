//! In-memory event datasets and precomputed concat samples.
//!
//! A [`Dataset`] is one simulated batch as produced upstream: vertex positions
//! plus the hit records they caused. [`ConcatSamples`] is the derived,
//! geometry-resolved view used for validation: one `(r, θ, t)` row per hit and
//! one `(r, θ)` row per vertex–channel pair.

use crate::coords::{self, ChannelGeometry};
use ps_core::{Error, Result};
use std::f64::consts::TAU;

/// One recorded photoelectron.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    /// Index of the originating vertex in [`Dataset::vertices`]
    pub event_id: usize,
    /// Channel that recorded the hit
    pub channel_id: usize,
    /// Arrival time (ns)
    pub time: f64,
}

/// One simulated batch: vertices and their hits.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    vertices: Vec<[f64; 3]>,
    hits: Vec<Hit>,
}

impl Dataset {
    /// Validate and assemble a dataset.
    ///
    /// Every `event_id` must name a vertex; coordinates and times must be finite.
    pub fn new(vertices: Vec<[f64; 3]>, hits: Vec<Hit>) -> Result<Self> {
        for (i, v) in vertices.iter().enumerate() {
            if v.iter().any(|c| !c.is_finite()) {
                return Err(Error::Validation(format!(
                    "vertex {i} has non-finite coordinates {v:?}"
                )));
            }
        }
        let n_vertices = vertices.len();
        for (i, h) in hits.iter().enumerate() {
            if h.event_id >= n_vertices {
                return Err(Error::Validation(format!(
                    "hit {i} references event_id {} but the dataset has {n_vertices} vertices",
                    h.event_id
                )));
            }
            if !h.time.is_finite() {
                return Err(Error::Validation(format!("hit {i} has non-finite time {}", h.time)));
            }
        }
        Ok(Self { vertices, hits })
    }

    /// Assemble from raw columns; id columns must hold non-negative integral values.
    pub fn from_columns(
        x: &[f64],
        y: &[f64],
        z: &[f64],
        event_id: &[f64],
        channel_id: &[f64],
        time: &[f64],
    ) -> Result<Self> {
        if x.len() != y.len() || x.len() != z.len() {
            return Err(Error::Validation(format!(
                "vertex column length mismatch: x={}, y={}, z={}",
                x.len(),
                y.len(),
                z.len()
            )));
        }
        if event_id.len() != channel_id.len() || event_id.len() != time.len() {
            return Err(Error::Validation(format!(
                "hit column length mismatch: event_id={}, channel_id={}, time={}",
                event_id.len(),
                channel_id.len(),
                time.len()
            )));
        }
        let vertices = (0..x.len()).map(|i| [x[i], y[i], z[i]]).collect();
        let mut hits = Vec::with_capacity(time.len());
        for i in 0..time.len() {
            hits.push(Hit {
                event_id: id_from_f64("event_id", i, event_id[i])?,
                channel_id: id_from_f64("channel_id", i, channel_id[i])?,
                time: time[i],
            });
        }
        Self::new(vertices, hits)
    }

    /// Vertex positions (detector frame, mm).
    pub fn vertices(&self) -> &[[f64; 3]] {
        &self.vertices
    }

    /// Hit records.
    pub fn hits(&self) -> &[Hit] {
        &self.hits
    }

    /// Number of vertices.
    pub fn n_vertices(&self) -> usize {
        self.vertices.len()
    }
}

fn id_from_f64(column: &str, row: usize, v: f64) -> Result<usize> {
    if !(v.is_finite() && v >= 0.0 && v.fract() == 0.0 && v <= usize::MAX as f64) {
        return Err(Error::Validation(format!(
            "{column}[{row}] must be a non-negative integer, got {v}"
        )));
    }
    Ok(v as usize)
}

/// Geometry-resolved validation samples.
///
/// Rows carry weights (1 unless folded); all per-row scores and counts are
/// weighted, so [`ConcatSamples::folded`] does not inflate the evidence.
#[derive(Debug, Clone, PartialEq)]
pub struct ConcatSamples {
    pe_r: Vec<f64>,
    pe_theta: Vec<f64>,
    pe_t: Vec<f64>,
    pe_w: Vec<f64>,
    pair_r: Vec<f64>,
    pair_theta: Vec<f64>,
    pair_w: Vec<f64>,
}

impl ConcatSamples {
    /// Unit-weight samples from PE and pair columns.
    pub fn new(
        pe_r: Vec<f64>,
        pe_theta: Vec<f64>,
        pe_t: Vec<f64>,
        pair_r: Vec<f64>,
        pair_theta: Vec<f64>,
    ) -> Result<Self> {
        let pe_w = vec![1.0; pe_r.len()];
        let pair_w = vec![1.0; pair_r.len()];
        Self::with_weights(pe_r, pe_theta, pe_t, pe_w, pair_r, pair_theta, pair_w)
    }

    /// Weighted samples. Weights must be finite and `>= 0`.
    #[allow(clippy::too_many_arguments)]
    pub fn with_weights(
        pe_r: Vec<f64>,
        pe_theta: Vec<f64>,
        pe_t: Vec<f64>,
        pe_w: Vec<f64>,
        pair_r: Vec<f64>,
        pair_theta: Vec<f64>,
        pair_w: Vec<f64>,
    ) -> Result<Self> {
        let n_pe = pe_r.len();
        for (name, len) in
            [("pe.theta", pe_theta.len()), ("pe.t", pe_t.len()), ("pe.weight", pe_w.len())]
        {
            if len != n_pe {
                return Err(Error::Validation(format!(
                    "column length mismatch for '{name}': expected {n_pe}, got {len}"
                )));
            }
        }
        let n_pairs = pair_r.len();
        for (name, len) in [("pairs.theta", pair_theta.len()), ("pairs.weight", pair_w.len())] {
            if len != n_pairs {
                return Err(Error::Validation(format!(
                    "column length mismatch for '{name}': expected {n_pairs}, got {len}"
                )));
            }
        }
        for (name, col) in [
            ("pe.r", &pe_r),
            ("pe.theta", &pe_theta),
            ("pe.t", &pe_t),
            ("pairs.r", &pair_r),
            ("pairs.theta", &pair_theta),
        ] {
            if col.iter().any(|x| !x.is_finite()) {
                return Err(Error::Validation(format!(
                    "column '{name}' contains non-finite values"
                )));
            }
        }
        for (name, col) in [("pe.weight", &pe_w), ("pairs.weight", &pair_w)] {
            if col.iter().any(|w| !w.is_finite() || *w < 0.0) {
                return Err(Error::Validation(format!(
                    "weights in '{name}' must be finite and >= 0"
                )));
            }
        }
        Ok(Self { pe_r, pe_theta, pe_t, pe_w, pair_r, pair_theta, pair_w })
    }

    /// Resolve a raw dataset against the channel geometry.
    ///
    /// Every vertex contributes one pair row per channel; every hit on a channel
    /// inside the geometry contributes one PE row carrying its pair's geometry.
    /// Hits on channels outside the geometry are skipped.
    pub fn from_dataset(dataset: &Dataset, geometry: &ChannelGeometry, r0: f64) -> Result<Self> {
        coords::check_r0(r0)?;
        let n_ch = geometry.len();
        let n_pairs = dataset.n_vertices() * n_ch;
        let mut pair_r = Vec::with_capacity(n_pairs);
        let mut pair_theta = Vec::with_capacity(n_pairs);
        for &pos in dataset.vertices() {
            let (r, thetas) = coords::vertex_pairs(pos, geometry, r0);
            pair_r.extend(std::iter::repeat_n(r, n_ch));
            pair_theta.extend(thetas);
        }

        let mut pe_r = Vec::with_capacity(dataset.hits().len());
        let mut pe_theta = Vec::with_capacity(dataset.hits().len());
        let mut pe_t = Vec::with_capacity(dataset.hits().len());
        let mut skipped = 0usize;
        for h in dataset.hits() {
            if h.channel_id >= n_ch {
                skipped += 1;
                continue;
            }
            let idx = h.event_id * n_ch + h.channel_id;
            pe_r.push(pair_r[idx]);
            pe_theta.push(pair_theta[idx]);
            pe_t.push(h.time);
        }
        if skipped > 0 {
            tracing::warn!(
                skipped,
                channels = n_ch,
                "hits on channels outside the geometry were skipped"
            );
        }
        Self::new(pe_r, pe_theta, pe_t, pair_r, pair_theta)
    }

    /// Mirror-folded copy: every row is duplicated at `(r, 2π − θ)` and all
    /// weights are halved, so total weight is unchanged.
    pub fn folded(&self) -> Self {
        fn mirror(thetas: &[f64]) -> Vec<f64> {
            thetas.iter().copied().chain(thetas.iter().map(|&th| TAU - th)).collect()
        }
        fn twice(xs: &[f64]) -> Vec<f64> {
            xs.iter().chain(xs.iter()).copied().collect()
        }
        fn halved_twice(ws: &[f64]) -> Vec<f64> {
            ws.iter().chain(ws.iter()).map(|w| 0.5 * w).collect()
        }
        Self {
            pe_r: twice(&self.pe_r),
            pe_theta: mirror(&self.pe_theta),
            pe_t: twice(&self.pe_t),
            pe_w: halved_twice(&self.pe_w),
            pair_r: twice(&self.pair_r),
            pair_theta: mirror(&self.pair_theta),
            pair_w: halved_twice(&self.pair_w),
        }
    }

    /// Number of PE rows.
    pub fn n_pe(&self) -> usize {
        self.pe_r.len()
    }

    /// Number of pair rows.
    pub fn n_pairs(&self) -> usize {
        self.pair_r.len()
    }

    /// PE radii.
    pub fn pe_r(&self) -> &[f64] {
        &self.pe_r
    }

    /// PE angles.
    pub fn pe_theta(&self) -> &[f64] {
        &self.pe_theta
    }

    /// PE times.
    pub fn pe_t(&self) -> &[f64] {
        &self.pe_t
    }

    /// PE weights.
    pub fn pe_weights(&self) -> &[f64] {
        &self.pe_w
    }

    /// Pair radii.
    pub fn pair_r(&self) -> &[f64] {
        &self.pair_r
    }

    /// Pair angles.
    pub fn pair_theta(&self) -> &[f64] {
        &self.pair_theta
    }

    /// Pair weights.
    pub fn pair_weights(&self) -> &[f64] {
        &self.pair_w
    }

    /// Σ PE weights.
    pub fn total_pe_weight(&self) -> f64 {
        self.pe_w.iter().sum()
    }

    /// Σ pair weights.
    pub fn total_pair_weight(&self) -> f64 {
        self.pair_w.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn two_channel_geometry() -> ChannelGeometry {
        ChannelGeometry::from_degrees(&[0.0, 180.0], &[0.0, 0.0], None).unwrap()
    }

    #[test]
    fn test_dataset_rejects_dangling_event_id() {
        let err = Dataset::new(vec![[0.0; 3]], vec![Hit { event_id: 1, channel_id: 0, time: 1.0 }]);
        assert!(err.is_err());
    }

    #[test]
    fn test_from_columns_rejects_fractional_ids() {
        let r = Dataset::from_columns(&[0.0], &[0.0], &[0.0], &[0.5], &[0.0], &[1.0]);
        assert!(r.is_err());
        let ok = Dataset::from_columns(&[0.0], &[0.0], &[1.0], &[0.0], &[3.0], &[1.0]).unwrap();
        assert_eq!(ok.hits()[0].channel_id, 3);
    }

    #[test]
    fn test_concat_from_dataset_resolves_pair_geometry() {
        let ds = Dataset::new(
            vec![[0.0, 0.0, 100.0], [0.0, 0.0, -50.0]],
            vec![
                Hit { event_id: 0, channel_id: 0, time: 10.0 },
                Hit { event_id: 1, channel_id: 0, time: 20.0 },
                Hit { event_id: 1, channel_id: 7, time: 30.0 },
            ],
        )
        .unwrap();
        let c = ConcatSamples::from_dataset(&ds, &two_channel_geometry(), 200.0).unwrap();
        assert_eq!(c.n_pairs(), 4);
        assert_eq!(c.n_pe(), 2);
        assert_relative_eq!(c.pe_r()[0], 0.5);
        assert_relative_eq!(c.pe_theta()[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(c.pe_r()[1], 0.25);
        assert_relative_eq!(c.pe_theta()[1], std::f64::consts::PI, epsilon = 1e-12);
    }

    #[test]
    fn test_folded_preserves_total_weight() {
        let c = ConcatSamples::new(vec![0.1], vec![0.2], vec![5.0], vec![0.1, 0.3], vec![0.2, 1.0])
            .unwrap();
        let f = c.folded();
        assert_eq!(f.n_pe(), 2);
        assert_eq!(f.n_pairs(), 4);
        assert_relative_eq!(f.total_pe_weight(), c.total_pe_weight());
        assert_relative_eq!(f.total_pair_weight(), c.total_pair_weight());
        assert_relative_eq!(f.pair_theta()[3], TAU - 1.0);
    }

    #[test]
    fn test_concat_rejects_negative_weight() {
        let r = ConcatSamples::with_weights(
            vec![],
            vec![],
            vec![],
            vec![],
            vec![0.5],
            vec![0.5],
            vec![-1.0],
        );
        assert!(r.is_err());
    }
}
