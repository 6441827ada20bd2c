//! Probe histogram builder.
//!
//! For each dataset and each time slice `j` the estimator is
//!
//! `R_j(cell) = Σ_{hits in cell, slice j} w / Σ_{pairs in cell} w`
//!
//! i.e. the mean number of slice-`j` hits per vertex–channel pair whose
//! geometry falls in `cell`. Cells that receive no pairs are backfilled (see
//! [`BackfillPolicy`]). Datasets are processed independently on a bounded rayon
//! pool and summed in dataset order, then scaled by
//! `1 / n_datasets · t_bins / T_max` to turn per-slice counts into a rate density.

use crate::binning::ProbeBinning;
use crate::coords::{self, ChannelGeometry};
use crate::dataset::{ConcatSamples, Dataset};
use crate::table::ProbeTable;
use ps_core::{Error, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// How cells without an estimate are filled, per time slice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillPolicy {
    /// Cells that received no vertex–channel pair take the mean of the cells that did.
    /// Cells with pairs but no hits keep their observed rate of zero.
    #[default]
    EmptyCells,
    /// Every zero-valued cell takes the mean of the non-zero cells.
    ZeroCells,
}

/// Builder parameters that are not part of the binning.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildOptions {
    /// Scintillator radius used to normalize vertex positions.
    pub r0: f64,
    /// Worker threads (0 = rayon default).
    pub threads: usize,
    /// Empty-cell policy.
    pub backfill: BackfillPolicy,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self { r0: coords::DEFAULT_R0, threads: 0, backfill: BackfillPolicy::default() }
    }
}

/// Counters collected while filling one or more datasets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildSummary {
    /// Datasets combined into the table
    pub n_datasets: usize,
    /// Vertices seen
    pub n_vertices: usize,
    /// Vertex–channel pairs filled (weighted)
    pub pair_weight: f64,
    /// Hits inside `[0, T_max]` (weighted)
    pub hit_weight: f64,
    /// Hits outside `[0, T_max]`
    pub hits_out_of_time: usize,
    /// Hits on channels outside the geometry
    pub hits_unknown_channel: usize,
    /// Cell/slice values replaced by the backfill policy
    pub backfilled: usize,
}

impl BuildSummary {
    fn merge(&mut self, other: &BuildSummary) {
        self.n_datasets += other.n_datasets;
        self.n_vertices += other.n_vertices;
        self.pair_weight += other.pair_weight;
        self.hit_weight += other.hit_weight;
        self.hits_out_of_time += other.hits_out_of_time;
        self.hits_unknown_channel += other.hits_unknown_channel;
        self.backfilled += other.backfilled;
    }
}

/// A built table together with its fill counters.
#[derive(Debug, Clone)]
pub struct ProbeBuild {
    /// The combined, normalized table
    pub table: ProbeTable,
    /// Counters over all datasets
    pub summary: BuildSummary,
}

/// Per-dataset `sum_probe` / `num` accumulator on the probe grid.
#[derive(Debug, Clone)]
pub struct ProbeAccumulator<'a> {
    binning: &'a ProbeBinning,
    sum_probe: Vec<f64>,
    num: Vec<f64>,
    summary: BuildSummary,
}

impl<'a> ProbeAccumulator<'a> {
    /// Empty accumulator for `binning`.
    pub fn new(binning: &'a ProbeBinning) -> Self {
        Self {
            binning,
            sum_probe: vec![0.0; binning.len()],
            num: vec![0.0; binning.n_cells()],
            summary: BuildSummary { n_datasets: 1, ..BuildSummary::default() },
        }
    }

    /// Count one vertex–channel pair at `(r, θ)` with weight `w`.
    #[inline]
    pub fn add_pair(&mut self, r: f64, theta: f64, w: f64) {
        let cell = self.binning.cell_of(r, coords::fold_theta(theta));
        self.num[cell] += w;
        self.summary.pair_weight += w;
    }

    /// Count one hit of the pair at `(r, θ)`. Returns `false` if `t` is outside `[0, T_max]`.
    #[inline]
    pub fn add_hit(&mut self, r: f64, theta: f64, t: f64, w: f64) -> bool {
        let Some(k) = self.binning.t.fill_index(t) else {
            self.summary.hits_out_of_time += 1;
            return false;
        };
        let cell = self.binning.cell_of(r, coords::fold_theta(theta));
        self.sum_probe[cell * self.binning.t_bins() + k] += w;
        self.summary.hit_weight += w;
        true
    }

    /// Per-slice means `sum_probe / num` with backfill, in flat `[cell][t]` layout.
    ///
    /// Fails with [`Error::NoUsableData`] when there is nothing to average: no
    /// pairs at all, no hits at all, or (for [`BackfillPolicy::ZeroCells`]) a
    /// slice without any non-zero cell.
    pub fn finish(self, policy: BackfillPolicy) -> Result<(Vec<f64>, BuildSummary)> {
        let Self { binning, sum_probe, num, mut summary } = self;
        if !num.iter().any(|&n| n > 0.0) {
            return Err(Error::NoUsableData(
                "no vertex-channel pairs fell into the probe grid".into(),
            ));
        }
        if summary.hit_weight <= 0.0 {
            return Err(Error::NoUsableData(format!(
                "no hits inside the time window [0, {}]",
                binning.t_max()
            )));
        }

        let n_t = binning.t_bins();
        let n_cells = binning.n_cells();
        let mut values = vec![0.0; binning.len()];
        for c in 0..n_cells {
            if num[c] > 0.0 {
                for k in 0..n_t {
                    values[c * n_t + k] = sum_probe[c * n_t + k] / num[c];
                }
            }
        }

        for k in 0..n_t {
            let (mut sum, mut count) = (0.0, 0usize);
            for c in 0..n_cells {
                let v = values[c * n_t + k];
                let is_source = match policy {
                    BackfillPolicy::EmptyCells => num[c] > 0.0,
                    BackfillPolicy::ZeroCells => v != 0.0,
                };
                if is_source {
                    sum += v;
                    count += 1;
                }
            }
            let needs_fill = |c: usize| match policy {
                BackfillPolicy::EmptyCells => num[c] <= 0.0,
                BackfillPolicy::ZeroCells => values[c * n_t + k] == 0.0,
            };
            let targets: Vec<usize> = (0..n_cells).filter(|&c| needs_fill(c)).collect();
            if targets.is_empty() {
                continue;
            }
            if count == 0 {
                return Err(Error::NoUsableData(format!(
                    "time slice {k} has no cells to backfill from"
                )));
            }
            let mean = sum / count as f64;
            summary.backfilled += targets.len();
            for c in targets {
                values[c * n_t + k] = mean;
            }
        }

        Ok((values, summary))
    }
}

/// Builds a [`ProbeTable`] from independent datasets.
#[derive(Debug, Clone)]
pub struct HistogramBuilder {
    binning: ProbeBinning,
    options: BuildOptions,
}

impl HistogramBuilder {
    /// Builder for `binning`.
    pub fn new(binning: ProbeBinning, options: BuildOptions) -> Result<Self> {
        coords::check_r0(options.r0)?;
        Ok(Self { binning, options })
    }

    /// The grid tables are built on.
    pub fn binning(&self) -> &ProbeBinning {
        &self.binning
    }

    /// Builder options.
    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Un-normalized per-slice means for a single dataset.
    pub fn dataset_probe(
        &self,
        dataset: &Dataset,
        geometry: &ChannelGeometry,
    ) -> Result<(Vec<f64>, BuildSummary)> {
        let r0 = self.options.r0;
        let mut acc = ProbeAccumulator::new(&self.binning);
        for &pos in dataset.vertices() {
            let r = coords::normalized_radius(pos, r0);
            for ch in geometry.channels() {
                acc.add_pair(r, coords::pair_angle(pos, ch), 1.0);
            }
        }
        let mut unknown_channel = 0usize;
        for hit in dataset.hits() {
            let Some(ch) = geometry.get(hit.channel_id) else {
                unknown_channel += 1;
                continue;
            };
            let pos = dataset.vertices()[hit.event_id];
            let r = coords::normalized_radius(pos, r0);
            acc.add_hit(r, coords::pair_angle(pos, ch), hit.time, 1.0);
        }
        acc.summary.n_vertices = dataset.n_vertices();
        acc.summary.hits_unknown_channel = unknown_channel;
        acc.finish(self.options.backfill)
    }

    /// Un-normalized per-slice means for precomputed pair/PE samples.
    pub fn samples_probe(&self, samples: &ConcatSamples) -> Result<(Vec<f64>, BuildSummary)> {
        let mut acc = ProbeAccumulator::new(&self.binning);
        for ((&r, &th), &w) in
            samples.pair_r().iter().zip(samples.pair_theta()).zip(samples.pair_weights())
        {
            acc.add_pair(r, th, w);
        }
        for i in 0..samples.n_pe() {
            acc.add_hit(
                samples.pe_r()[i],
                samples.pe_theta()[i],
                samples.pe_t()[i],
                samples.pe_weights()[i],
            );
        }
        acc.finish(self.options.backfill)
    }

    /// Build from in-memory datasets.
    pub fn build(&self, datasets: &[Dataset], geometry: &ChannelGeometry) -> Result<ProbeBuild> {
        self.run(datasets.len(), |i| self.dataset_probe(&datasets[i], geometry))
    }

    /// Build from `n` datasets, each loaded inside its own worker task.
    pub fn build_with<F>(&self, n: usize, geometry: &ChannelGeometry, load: F) -> Result<ProbeBuild>
    where
        F: Fn(usize) -> Result<Dataset> + Sync,
    {
        self.run(n, |i| {
            let dataset = load(i)?;
            self.dataset_probe(&dataset, geometry)
        })
    }

    /// Build from precomputed samples (one entry per independent dataset).
    pub fn build_from_samples(&self, samples: &[ConcatSamples]) -> Result<ProbeBuild> {
        self.run(samples.len(), |i| self.samples_probe(&samples[i]))
    }

    fn run<F>(&self, n: usize, task: F) -> Result<ProbeBuild>
    where
        F: Fn(usize) -> Result<(Vec<f64>, BuildSummary)> + Sync,
    {
        if n == 0 {
            return Err(Error::NoUsableData("no datasets to build from".into()));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.threads)
            .build()
            .map_err(|e| Error::Computation(format!("failed to build worker pool: {e}")))?;

        // Indexed collect keeps dataset order regardless of completion order.
        let parts: Vec<(Vec<f64>, BuildSummary)> = pool.install(|| {
            (0..n)
                .into_par_iter()
                .map(|i| {
                    let part = task(i)?;
                    tracing::debug!(
                        dataset = i,
                        vertices = part.1.n_vertices,
                        hits = part.1.hit_weight,
                        backfilled = part.1.backfilled,
                        "dataset filled"
                    );
                    Ok(part)
                })
                .collect::<Result<Vec<_>>>()
        })?;

        self.reduce(parts)
    }

    fn reduce(&self, parts: Vec<(Vec<f64>, BuildSummary)>) -> Result<ProbeBuild> {
        let n = parts.len();
        let mut rates = vec![0.0; self.binning.len()];
        let mut summary = BuildSummary::default();
        for (values, part_summary) in &parts {
            for (acc, v) in rates.iter_mut().zip(values) {
                *acc += v;
            }
            summary.merge(part_summary);
        }
        let scale = self.binning.t_bins() as f64 / self.binning.t_max() / n as f64;
        for v in &mut rates {
            *v *= scale;
        }

        tracing::info!(
            backfill = ?self.options.backfill,
            datasets = summary.n_datasets,
            vertices = summary.n_vertices,
            hits = summary.hit_weight,
            out_of_time = summary.hits_out_of_time,
            unknown_channel = summary.hits_unknown_channel,
            backfilled = summary.backfilled,
            "probe table built"
        );

        let table = ProbeTable::new(self.binning.clone(), rates)?;
        Ok(ProbeBuild { table, summary })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn binning_2x2x1() -> ProbeBinning {
        ProbeBinning::new(2, 2, 1, 1000.0).unwrap()
    }

    #[test]
    fn test_accumulator_mean_per_pair() {
        let b = binning_2x2x1();
        let mut acc = ProbeAccumulator::new(&b);
        for _ in 0..4 {
            acc.add_pair(0.1, 0.1, 1.0);
        }
        for _ in 0..6 {
            acc.add_hit(0.1, 0.1, 10.0, 1.0);
        }
        // Other cells: pairs, no hits.
        acc.add_pair(0.9, 0.1, 1.0);
        acc.add_pair(0.1, 3.0, 1.0);
        acc.add_pair(0.9, 3.0, 1.0);
        let (values, summary) = acc.finish(BackfillPolicy::EmptyCells).unwrap();
        assert_relative_eq!(values[b.flat(0, 0, 0)], 1.5);
        assert_relative_eq!(values[b.flat(1, 0, 0)], 0.0);
        assert_eq!(summary.backfilled, 0);
    }

    #[test]
    fn test_empty_cells_backfilled_with_mean_of_filled_cells() {
        let b = binning_2x2x1();
        let mut acc = ProbeAccumulator::new(&b);
        acc.add_pair(0.1, 0.1, 1.0);
        acc.add_hit(0.1, 0.1, 1.0, 1.0);
        acc.add_hit(0.1, 0.1, 2.0, 1.0);
        acc.add_pair(0.9, 0.1, 1.0);
        // (0,1) and (1,1) never see a pair.
        let (values, summary) = acc.finish(BackfillPolicy::EmptyCells).unwrap();
        assert_relative_eq!(values[b.flat(0, 0, 0)], 2.0);
        assert_relative_eq!(values[b.flat(1, 0, 0)], 0.0);
        assert_relative_eq!(values[b.flat(0, 1, 0)], 1.0);
        assert_relative_eq!(values[b.flat(1, 1, 0)], 1.0);
        assert_eq!(summary.backfilled, 2);
    }

    #[test]
    fn test_zero_cells_policy_fills_every_zero() {
        let b = binning_2x2x1();
        let mut acc = ProbeAccumulator::new(&b);
        acc.add_pair(0.1, 0.1, 1.0);
        acc.add_hit(0.1, 0.1, 1.0, 1.0);
        acc.add_pair(0.9, 0.1, 1.0);
        let (values, _) = acc.finish(BackfillPolicy::ZeroCells).unwrap();
        assert!(values.iter().all(|&v| (v - 1.0).abs() < 1e-12));
    }

    #[test]
    fn test_no_hits_is_no_usable_data() {
        let b = binning_2x2x1();
        let mut acc = ProbeAccumulator::new(&b);
        acc.add_pair(0.1, 0.1, 1.0);
        assert!(!acc.add_hit(0.1, 0.1, 5000.0, 1.0));
        let err = acc.finish(BackfillPolicy::EmptyCells).unwrap_err();
        assert!(matches!(err, Error::NoUsableData(_)));
    }

    #[test]
    fn test_no_pairs_is_no_usable_data() {
        let b = binning_2x2x1();
        let acc = ProbeAccumulator::new(&b);
        assert!(matches!(
            acc.finish(BackfillPolicy::ZeroCells).unwrap_err(),
            Error::NoUsableData(_)
        ));
    }

    #[test]
    fn test_zero_cells_policy_rejects_all_zero_slice() {
        let b = ProbeBinning::new(1, 1, 2, 1000.0).unwrap();
        let mut acc = ProbeAccumulator::new(&b);
        acc.add_pair(0.5, 0.5, 1.0);
        acc.add_hit(0.5, 0.5, 100.0, 1.0);
        // Slice 1 ([500, 1000]) is empty everywhere.
        let err = acc.clone().finish(BackfillPolicy::ZeroCells).unwrap_err();
        assert!(matches!(err, Error::NoUsableData(_)));
        // The default policy keeps the observed zero.
        let (values, _) = acc.finish(BackfillPolicy::EmptyCells).unwrap();
        assert_eq!(values, vec![1.0, 0.0]);
    }

    #[test]
    fn test_build_rejects_zero_datasets() {
        let builder = HistogramBuilder::new(binning_2x2x1(), BuildOptions::default()).unwrap();
        let err = builder.build_from_samples(&[]).unwrap_err();
        assert!(matches!(err, Error::NoUsableData(_)));
    }

    #[test]
    fn test_builder_rejects_bad_r0() {
        let opts = BuildOptions { r0: 0.0, ..BuildOptions::default() };
        assert!(HistogramBuilder::new(binning_2x2x1(), opts).is_err());
    }
}
