//! `probestat build --config` file.

use anyhow::{Context, Result};
use ps_probe::BackfillPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Vertex and hit files of one simulated dataset.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DatasetPaths {
    /// Columnar file with `x, y, z`
    pub vertices: PathBuf,
    /// Columnar file with `event_id, channel_id, time`
    pub hits: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    /// Channel geometry (`theta`, `phi` in degrees).
    pub geometry: PathBuf,
    /// Independent datasets combined into one table.
    pub datasets: Vec<DatasetPaths>,
    /// Table file to write (`.json` or `.parquet`).
    pub output: PathBuf,

    /// Radial bin count, and polar bin count unless `theta_bins` is set.
    #[serde(default = "default_bins")]
    pub bins: usize,
    #[serde(default)]
    pub theta_bins: Option<usize>,
    #[serde(default = "default_t_bins")]
    pub t_bins: usize,
    #[serde(default = "default_t_max")]
    pub t_max: f64,

    /// Scintillator radius (mm).
    #[serde(default = "default_r0")]
    pub r0: f64,
    /// Keep only the first N geometry rows.
    #[serde(default)]
    pub max_channels: Option<usize>,

    /// Threads (0 = auto).
    #[serde(default)]
    pub threads: usize,
    #[serde(default)]
    pub backfill: BackfillPolicy,
}

fn default_bins() -> usize {
    20
}

fn default_t_bins() -> usize {
    100
}

fn default_t_max() -> f64 {
    1000.0
}

fn default_r0() -> f64 {
    ps_probe::DEFAULT_R0
}

impl BuildConfig {
    /// Polar bin count after applying the `theta_bins` override.
    pub fn theta_bins(&self) -> usize {
        self.theta_bins.unwrap_or(self.bins)
    }
}

pub fn read_build_config(path: &Path) -> Result<BuildConfig> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
    let cfg: BuildConfig = if ext == "json" {
        serde_json::from_slice(&bytes)?
    } else {
        // Default: YAML (serde_yaml_ng).
        serde_yaml_ng::from_slice(&bytes)?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_defaults_apply() {
        let yaml = r#"
geometry: geo.parquet
datasets:
  - { vertices: v0.parquet, hits: h0.parquet }
  - { vertices: v1.parquet, hits: h1.parquet }
output: probe.json
"#;
        let cfg: BuildConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(cfg.datasets.len(), 2);
        assert_eq!(cfg.bins, 20);
        assert_eq!(cfg.theta_bins(), 20);
        assert_eq!(cfg.t_bins, 100);
        assert_eq!(cfg.t_max, 1000.0);
        assert_eq!(cfg.r0, 17_710.0);
        assert_eq!(cfg.threads, 0);
        assert_eq!(cfg.backfill, BackfillPolicy::EmptyCells);
    }

    #[test]
    fn json_overrides_and_backfill() {
        let json = r#"{
            "geometry": "geo.json",
            "datasets": [{"vertices": "v.json", "hits": "h.json"}],
            "output": "probe.parquet",
            "bins": 10,
            "theta_bins": 30,
            "backfill": "zero_cells"
        }"#;
        let cfg: BuildConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.theta_bins(), 30);
        assert_eq!(cfg.backfill, BackfillPolicy::ZeroCells);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let yaml = "geometry: g.json\ndatasets: []\noutput: o.json\nbinz: 3\n";
        assert!(serde_yaml_ng::from_str::<BuildConfig>(yaml).is_err());
    }
}
