//! File I/O: columnar inputs, probe table files and the score log.
//!
//! Columnar files come in two flavours, picked by extension:
//!
//! | Extension           | Layout                                               |
//! |---------------------|------------------------------------------------------|
//! | `.json`             | object of equal-length numeric arrays `{"x": [...]}` |
//! | `.parquet` / `.pq`  | one Float64 (or integer) column per name             |
//!
//! Probe tables use the same extension rule (see [`read_table`]).

#[cfg(feature = "arrow-io")]
pub mod parquet_io;

use crate::coords::ChannelGeometry;
use crate::dataset::{ConcatSamples, Dataset};
use crate::table::{ProbeTable, ProbeTableFile};
use chrono::{DateTime, Utc};
use ps_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

/// On-disk format of a columnar or table file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// JSON document
    Json,
    /// Apache Parquet
    Parquet,
}

impl FileFormat {
    /// Infer the format from the file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("json") => Ok(Self::Json),
            Some("parquet") | Some("pq") => Ok(Self::Parquet),
            _ => Err(Error::Validation(format!(
                "cannot infer file format of {} (expected .json, .parquet or .pq)",
                path.display()
            ))),
        }
    }
}

/// Named numeric columns of equal length.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnTable {
    columns: BTreeMap<String, Vec<f64>>,
}

impl ColumnTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a column, rejecting length mismatches against existing columns.
    pub fn insert(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<()> {
        let name = name.into();
        match self.n_rows() {
            Some(n) if n != values.len() => {
                return Err(Error::Validation(format!(
                    "column '{name}' has {} rows, table has {n}",
                    values.len()
                )));
            }
            _ => {}
        }
        self.columns.insert(name, values);
        Ok(())
    }

    /// Row count, `None` for a table without columns.
    pub fn n_rows(&self) -> Option<usize> {
        self.columns.values().next().map(Vec::len)
    }

    /// Column names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Borrow a column.
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Remove and return a required column.
    pub fn take(&mut self, name: &str, source: &Path) -> Result<Vec<f64>> {
        self.columns.remove(name).ok_or_else(|| {
            Error::Validation(format!("{} has no column '{name}'", source.display()))
        })
    }

    /// Remove and return an optional column.
    pub fn take_opt(&mut self, name: &str) -> Option<Vec<f64>> {
        self.columns.remove(name)
    }

    fn check_lengths(&self, source: &Path) -> Result<()> {
        let mut lens = self.columns.iter().map(|(k, v)| (k, v.len()));
        if let Some((first_name, n)) = lens.next() {
            for (name, len) in lens {
                if len != n {
                    return Err(Error::Validation(format!(
                        "{}: column '{name}' has {len} rows, '{first_name}' has {n}",
                        source.display()
                    )));
                }
            }
        }
        Ok(())
    }
}

fn open_error(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::Validation(format!("failed to read {}: {e}", path.display()))
}

#[cfg(not(feature = "arrow-io"))]
fn parquet_disabled(path: &Path) -> Error {
    Error::NotImplemented(format!(
        "{}: Parquet support requires the 'arrow-io' feature",
        path.display()
    ))
}

/// Read a columnar file.
pub fn read_column_table(path: &Path) -> Result<ColumnTable> {
    let table = match FileFormat::from_path(path)? {
        FileFormat::Json => {
            let bytes = std::fs::read(path).map_err(|e| open_error(path, e))?;
            serde_json::from_slice::<ColumnTable>(&bytes).map_err(|e| open_error(path, e))?
        }
        #[cfg(feature = "arrow-io")]
        FileFormat::Parquet => parquet_io::read_columns(path)?,
        #[cfg(not(feature = "arrow-io"))]
        FileFormat::Parquet => return Err(parquet_disabled(path)),
    };
    table.check_lengths(path)?;
    Ok(table)
}

/// Write a columnar file.
pub fn write_column_table(table: &ColumnTable, path: &Path) -> Result<()> {
    table.check_lengths(path)?;
    match FileFormat::from_path(path)? {
        FileFormat::Json => {
            let text = serde_json::to_string(table)?;
            std::fs::write(path, text)?;
            Ok(())
        }
        #[cfg(feature = "arrow-io")]
        FileFormat::Parquet => parquet_io::write_columns(table, path),
        #[cfg(not(feature = "arrow-io"))]
        FileFormat::Parquet => Err(parquet_disabled(path)),
    }
}

/// Load a probe table (`.json` or `.parquet`/`.pq`).
pub fn read_table(path: &Path) -> Result<ProbeTable> {
    match FileFormat::from_path(path)? {
        FileFormat::Json => {
            let bytes = std::fs::read(path).map_err(|e| open_error(path, e))?;
            let file: ProbeTableFile =
                serde_json::from_slice(&bytes).map_err(|e| open_error(path, e))?;
            ProbeTable::from_file(file)
        }
        #[cfg(feature = "arrow-io")]
        FileFormat::Parquet => parquet_io::read_table_parquet(path),
        #[cfg(not(feature = "arrow-io"))]
        FileFormat::Parquet => Err(parquet_disabled(path)),
    }
}

/// Persist a probe table (`.json` or `.parquet`/`.pq`).
pub fn write_table(table: &ProbeTable, path: &Path) -> Result<()> {
    match FileFormat::from_path(path)? {
        FileFormat::Json => {
            let text = serde_json::to_string(&table.to_file())?;
            std::fs::write(path, text)?;
            Ok(())
        }
        #[cfg(feature = "arrow-io")]
        FileFormat::Parquet => parquet_io::write_table_parquet(table, path),
        #[cfg(not(feature = "arrow-io"))]
        FileFormat::Parquet => Err(parquet_disabled(path)),
    }
}

/// Read one dataset from its vertex (`x, y, z`) and hit (`event_id, channel_id, time`) files.
pub fn read_dataset(vertices: &Path, hits: &Path) -> Result<Dataset> {
    let mut v = read_column_table(vertices)?;
    let x = v.take("x", vertices)?;
    let y = v.take("y", vertices)?;
    let z = v.take("z", vertices)?;
    let mut h = read_column_table(hits)?;
    let event_id = h.take("event_id", hits)?;
    let channel_id = h.take("channel_id", hits)?;
    let time = h.take("time", hits)?;
    Dataset::from_columns(&x, &y, &z, &event_id, &channel_id, &time)
}

/// Read the channel geometry (`theta`, `phi` in degrees).
pub fn read_geometry(path: &Path, max_channels: Option<usize>) -> Result<ChannelGeometry> {
    let mut t = read_column_table(path)?;
    let theta = t.take("theta", path)?;
    let phi = t.take("phi", path)?;
    ChannelGeometry::from_degrees(&theta, &phi, max_channels)
}

/// Read concat samples from a `pe` file (`r, theta, t[, weight]`) and a `pairs` file
/// (`r, theta[, weight]`). Missing weights default to 1.
pub fn read_concat(pe: &Path, pairs: &Path) -> Result<ConcatSamples> {
    let mut p = read_column_table(pe)?;
    let pe_r = p.take("r", pe)?;
    let pe_theta = p.take("theta", pe)?;
    let pe_t = p.take("t", pe)?;
    let pe_w = p.take_opt("weight").unwrap_or_else(|| vec![1.0; pe_r.len()]);
    let mut q = read_column_table(pairs)?;
    let pair_r = q.take("r", pairs)?;
    let pair_theta = q.take("theta", pairs)?;
    let pair_w = q.take_opt("weight").unwrap_or_else(|| vec![1.0; pair_r.len()]);
    ConcatSamples::with_weights(pe_r, pe_theta, pe_t, pe_w, pair_r, pair_theta, pair_w)
}

/// Write concat samples as a `pe` and a `pairs` file, weights included.
pub fn write_concat(samples: &ConcatSamples, pe: &Path, pairs: &Path) -> Result<()> {
    let mut p = ColumnTable::new();
    p.insert("r", samples.pe_r().to_vec())?;
    p.insert("theta", samples.pe_theta().to_vec())?;
    p.insert("t", samples.pe_t().to_vec())?;
    p.insert("weight", samples.pe_weights().to_vec())?;
    write_column_table(&p, pe)?;

    let mut q = ColumnTable::new();
    q.insert("r", samples.pair_r().to_vec())?;
    q.insert("theta", samples.pair_theta().to_vec())?;
    q.insert("weight", samples.pair_weights().to_vec())?;
    write_column_table(&q, pairs)
}

/// One score-log line: `score,timestamp` (RFC 3339 UTC).
pub fn format_score_line(score: f64, at: DateTime<Utc>) -> String {
    format!("{score},{}", at.to_rfc3339())
}

/// Append `score,timestamp` to `path`, creating the file if needed.
pub fn append_score_log(path: &Path, score: f64) -> Result<()> {
    let mut f = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(f, "{}", format_score_line(score, Utc::now()))?;
    Ok(())
}
