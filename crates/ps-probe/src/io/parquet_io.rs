//! Parquet / Arrow bridge for column tables and probe tables.
//!
//! # Probe table layout: `probestat_table_v1`
//!
//! One `probe` Float64 column holding the rates row-major as `[r][θ][t]`, with
//! the binning stored in Parquet key-value metadata:
//!
//! | Key                         | Value                         |
//! |-----------------------------|-------------------------------|
//! | `probestat.schema_version`  | `"probestat_table_v1"`        |
//! | `probestat.r_bins`          | radial bin count              |
//! | `probestat.theta_bins`      | polar bin count               |
//! | `probestat.t_bins`          | time bin count                |
//! | `probestat.t_max`           | time axis upper end (ns)      |
//! | `probestat.r_edges`         | JSON array, `r_bins + 1`      |
//! | `probestat.theta_edges`     | JSON array, `theta_bins + 1`  |

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, Float64Array};
use arrow::datatypes::{DataType, Field, Float64Type, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use super::ColumnTable;
use crate::binning::ProbeBinning;
use crate::table::{ProbeTable, TABLE_SCHEMA_V1, check_edge_count};
use ps_core::{Error, Result};

/// Parquet metadata key for the schema version.
pub const META_KEY_SCHEMA_VERSION: &str = "probestat.schema_version";
/// Parquet metadata key for the radial bin count.
pub const META_KEY_R_BINS: &str = "probestat.r_bins";
/// Parquet metadata key for the polar bin count.
pub const META_KEY_THETA_BINS: &str = "probestat.theta_bins";
/// Parquet metadata key for the time bin count.
pub const META_KEY_T_BINS: &str = "probestat.t_bins";
/// Parquet metadata key for the time axis upper end.
pub const META_KEY_T_MAX: &str = "probestat.t_max";
/// Parquet metadata key for the radial edges (JSON).
pub const META_KEY_R_EDGES: &str = "probestat.r_edges";
/// Parquet metadata key for the polar edges (JSON).
pub const META_KEY_THETA_EDGES: &str = "probestat.theta_edges";

/// Column holding the flattened rates.
pub const PROBE_COLUMN: &str = "probe";

fn read_batches(path: &Path) -> Result<(SchemaRef, RecordBatch)> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::Validation(format!("failed to open {}: {e}", path.display())))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| Error::Validation(format!("failed to read Parquet: {e}")))?;

    // Key-value metadata lives on the schema; grab it before the builder is consumed.
    let schema = builder.schema().clone();

    let reader = builder
        .build()
        .map_err(|e| Error::Validation(format!("failed to build Parquet reader: {e}")))?;
    let batches: std::result::Result<Vec<_>, _> = reader.collect();
    let batches =
        batches.map_err(|e| Error::Validation(format!("failed to read Parquet batches: {e}")))?;
    let merged = arrow::compute::concat_batches(&schema, &batches)
        .map_err(|e| Error::Validation(format!("failed to concat batches: {e}")))?;
    Ok((schema, merged))
}

fn f64_column(batch: &RecordBatch, name: &str) -> Result<Vec<f64>> {
    let idx = batch
        .schema()
        .index_of(name)
        .map_err(|_| Error::Validation(format!("missing column '{name}'")))?;
    let arr = batch.column(idx);
    if arr.null_count() > 0 {
        return Err(Error::Validation(format!("column '{name}' contains nulls")));
    }
    // Id columns are typically written as integers.
    let arr = if arr.data_type() == &DataType::Float64 {
        arr.clone()
    } else {
        arrow::compute::cast(arr, &DataType::Float64).map_err(|e| {
            Error::Validation(format!(
                "column '{name}' of type {} is not numeric: {e}",
                arr.data_type()
            ))
        })?
    };
    Ok(arr.as_primitive::<Float64Type>().values().to_vec())
}

fn write_batch(batch: &RecordBatch, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)
        .map_err(|e| Error::Validation(format!("failed to create {}: {e}", path.display())))?;
    let props = WriterProperties::builder().set_compression(Compression::SNAPPY).build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))
        .map_err(|e| Error::Validation(format!("failed to create Parquet writer: {e}")))?;
    writer.write(batch).map_err(|e| Error::Validation(format!("failed to write Parquet: {e}")))?;
    writer
        .close()
        .map_err(|e| Error::Validation(format!("failed to close Parquet writer: {e}")))?;
    Ok(())
}

/// Read every column of a Parquet file as Float64.
pub fn read_columns(path: &Path) -> Result<ColumnTable> {
    let (schema, batch) = read_batches(path)?;
    let mut table = ColumnTable::new();
    for field in schema.fields() {
        let values = f64_column(&batch, field.name())
            .map_err(|e| Error::Validation(format!("{}: {e}", path.display())))?;
        table.insert(field.name().clone(), values)?;
    }
    Ok(table)
}

/// Write a column table as non-nullable Float64 columns.
pub fn write_columns(table: &ColumnTable, path: &Path) -> Result<()> {
    let names: Vec<&str> = table.names().collect();
    if names.is_empty() {
        return Err(Error::Validation("cannot write a Parquet file without columns".into()));
    }
    let fields: Vec<Field> =
        names.iter().map(|n| Field::new(*n, DataType::Float64, false)).collect();
    let arrays: Vec<ArrayRef> = names
        .iter()
        .filter_map(|n| table.column(n))
        .map(|col| Arc::new(Float64Array::from(col.to_vec())) as ArrayRef)
        .collect();
    let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
        .map_err(|e| Error::Validation(format!("failed to build RecordBatch: {e}")))?;
    write_batch(&batch, path)
}

/// Build the Arrow form of a probe table, binning carried in schema metadata.
pub fn table_to_record_batch(table: &ProbeTable) -> Result<RecordBatch> {
    let (n_r, n_th, n_t) = table.shape();
    let binning = table.binning();
    let r_edges = serde_json::to_string(binning.r.edges())?;
    let theta_edges = serde_json::to_string(binning.theta.edges())?;
    let metadata = HashMap::from([
        (META_KEY_SCHEMA_VERSION.to_string(), TABLE_SCHEMA_V1.to_string()),
        (META_KEY_R_BINS.to_string(), n_r.to_string()),
        (META_KEY_THETA_BINS.to_string(), n_th.to_string()),
        (META_KEY_T_BINS.to_string(), n_t.to_string()),
        (META_KEY_T_MAX.to_string(), serde_json::to_string(&table.t_max())?),
        (META_KEY_R_EDGES.to_string(), r_edges),
        (META_KEY_THETA_EDGES.to_string(), theta_edges),
    ]);
    let schema = Arc::new(
        Schema::new(vec![Field::new(PROBE_COLUMN, DataType::Float64, false)])
            .with_metadata(metadata),
    );
    let rates: ArrayRef = Arc::new(Float64Array::from(table.rates().to_vec()));
    RecordBatch::try_new(schema, vec![rates])
        .map_err(|e| Error::Validation(format!("failed to build RecordBatch: {e}")))
}

/// Write a probe table to Parquet (Snappy).
pub fn write_table_parquet(table: &ProbeTable, path: &Path) -> Result<()> {
    write_batch(&table_to_record_batch(table)?, path)
}

fn meta<'a>(schema: &'a Schema, key: &str) -> Result<&'a str> {
    schema
        .metadata()
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| Error::Validation(format!("probe table metadata is missing '{key}'")))
}

fn meta_json<T: serde::de::DeserializeOwned>(schema: &Schema, key: &str) -> Result<T> {
    serde_json::from_str(meta(schema, key)?)
        .map_err(|e| Error::Validation(format!("invalid {key} metadata: {e}")))
}

/// Rebuild a probe table from its Arrow form, checking every size in the metadata.
pub fn table_from_record_batch(schema: &Schema, batch: &RecordBatch) -> Result<ProbeTable> {
    let version = meta(schema, META_KEY_SCHEMA_VERSION)?;
    if version != TABLE_SCHEMA_V1 {
        return Err(Error::Validation(format!(
            "unsupported table schema_version '{version}', expected '{TABLE_SCHEMA_V1}'"
        )));
    }
    let r_bins: usize = meta_json(schema, META_KEY_R_BINS)?;
    let theta_bins: usize = meta_json(schema, META_KEY_THETA_BINS)?;
    let t_bins: usize = meta_json(schema, META_KEY_T_BINS)?;
    let t_max: f64 = meta_json(schema, META_KEY_T_MAX)?;
    let r_edges: Vec<f64> = meta_json(schema, META_KEY_R_EDGES)?;
    let theta_edges: Vec<f64> = meta_json(schema, META_KEY_THETA_EDGES)?;
    check_edge_count("r_edges", r_bins, r_edges.len())?;
    check_edge_count("theta_edges", theta_bins, theta_edges.len())?;

    let rates = f64_column(batch, PROBE_COLUMN)?;
    let expected = r_bins.checked_mul(theta_bins).and_then(|n| n.checked_mul(t_bins));
    if expected != Some(rates.len()) {
        return Err(Error::Validation(format!(
            "probe column has {} values, metadata implies {r_bins}x{theta_bins}x{t_bins}",
            rates.len()
        )));
    }
    let binning = ProbeBinning::from_edges(r_edges, theta_edges, t_bins, t_max)?;
    ProbeTable::new(binning, rates)
}

/// Read a probe table from Parquet.
pub fn read_table_parquet(path: &Path) -> Result<ProbeTable> {
    let (schema, batch) = read_batches(path)?;
    table_from_record_batch(&schema, &batch)
        .map_err(|e| Error::Validation(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int64Array;

    fn tmp_path(name: &str) -> std::path::PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("probestat_parquet_{nanos}"));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn small_table() -> ProbeTable {
        let binning = ProbeBinning::new(2, 3, 4, 1000.0).unwrap();
        let rates = (0..binning.len()).map(|i| i as f64 * 1e-4).collect();
        ProbeTable::new(binning, rates).unwrap()
    }

    #[test]
    fn test_table_parquet_roundtrip_bit_identical() {
        let table = small_table();
        let path = tmp_path("probe.parquet");
        write_table_parquet(&table, &path).unwrap();
        let back = read_table_parquet(&path).unwrap();
        assert_eq!(back, table);
        let again = read_table_parquet(&path).unwrap();
        assert_eq!(again, back);
    }

    #[test]
    fn test_table_metadata_mismatch_rejected() {
        let batch = table_to_record_batch(&small_table()).unwrap();
        let mut md = batch.schema().metadata().clone();
        md.insert(META_KEY_T_BINS.to_string(), "5".to_string());
        let schema = batch.schema().as_ref().clone().with_metadata(md);
        let err = table_from_record_batch(&schema, &batch).unwrap_err();
        assert!(err.to_string().contains("metadata implies"), "{err}");
    }

    #[test]
    fn test_overflowing_t_bins_metadata_is_an_error() {
        let batch = table_to_record_batch(&small_table()).unwrap();
        let mut md = batch.schema().metadata().clone();
        md.insert(META_KEY_T_BINS.to_string(), (usize::MAX / 2).to_string());
        let schema = batch.schema().as_ref().clone().with_metadata(md);
        let err = table_from_record_batch(&schema, &batch).unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "{err}");
    }

    #[test]
    fn test_integer_columns_are_cast() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("event_id", DataType::Int64, false),
            Field::new("time", DataType::Float64, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![0_i64, 3])) as ArrayRef,
                Arc::new(Float64Array::from(vec![1.5, 2.5])) as ArrayRef,
            ],
        )
        .unwrap();
        let path = tmp_path("hits.parquet");
        write_batch(&batch, &path).unwrap();
        let t = read_columns(&path).unwrap();
        assert_eq!(t.column("event_id").unwrap(), &[0.0, 3.0]);
        assert_eq!(t.column("time").unwrap(), &[1.5, 2.5]);
    }

    #[test]
    fn test_column_table_parquet_roundtrip() {
        let mut t = ColumnTable::new();
        t.insert("r", vec![0.1, 0.2]).unwrap();
        t.insert("theta", vec![1.0, 2.0]).unwrap();
        let path = tmp_path("pairs.parquet");
        write_columns(&t, &path).unwrap();
        assert_eq!(read_columns(&path).unwrap(), t);
    }
}
