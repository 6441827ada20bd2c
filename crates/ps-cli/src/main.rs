//! probestat CLI

mod config;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use ps_core::ProbeModel;
use ps_probe::io;
use ps_probe::{
    BackfillPolicy, BuildOptions, ConcatSamples, ConsistencyConfig, DiagnosticsConfig,
    HistogramBuilder, Probe, ProbeBinning, ProbeKind, ScoreEvaluator, TableLoader,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::config::{BuildConfig, DatasetPaths};

#[derive(Parser)]
#[command(name = "probestat")]
#[command(about = "probestat - probe-function histograms for spherical detectors")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a probe table from simulated datasets
    Build {
        /// Build config (YAML, or JSON by extension). Flags below override it.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Channel geometry file (theta, phi in degrees)
        #[arg(long)]
        geometry: Option<PathBuf>,

        /// Vertex file (x, y, z); repeat once per dataset
        #[arg(long)]
        vertices: Vec<PathBuf>,

        /// Hit file (event_id, channel_id, time); repeat once per dataset
        #[arg(long)]
        hits: Vec<PathBuf>,

        /// Table file to write (.json or .parquet)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Radial (and polar, unless --theta-bins) bin count [default: 20]
        #[arg(long)]
        bins: Option<usize>,

        /// Polar bin count
        #[arg(long)]
        theta_bins: Option<usize>,

        /// Time bin count [default: 100]
        #[arg(long)]
        t_bins: Option<usize>,

        /// Time window upper end in ns [default: 1000]
        #[arg(long)]
        t_max: Option<f64>,

        /// Scintillator radius in mm [default: 17710]
        #[arg(long)]
        r0: Option<f64>,

        /// Keep only the first N geometry rows
        #[arg(long)]
        max_channels: Option<usize>,

        /// Threads (0 = auto)
        #[arg(long)]
        threads: Option<usize>,

        /// Empty-cell policy [default: empty-cells]
        #[arg(long, value_enum)]
        backfill: Option<BackfillArg>,

        /// Build summary (pretty JSON). Defaults to stdout.
        #[arg(long)]
        summary: Option<PathBuf>,
    },

    /// Resolve a dataset against the geometry into pe/pairs concat files
    Concat {
        /// Vertex file (x, y, z)
        #[arg(long)]
        vertices: PathBuf,

        /// Hit file (event_id, channel_id, time)
        #[arg(long)]
        hits: PathBuf,

        /// Channel geometry file (theta, phi in degrees)
        #[arg(long)]
        geometry: PathBuf,

        /// Keep only the first N geometry rows
        #[arg(long)]
        max_channels: Option<usize>,

        /// Scintillator radius in mm
        #[arg(long, default_value_t = ps_probe::DEFAULT_R0)]
        r0: f64,

        /// Output pe file (r, theta, t, weight)
        #[arg(long)]
        pe: PathBuf,

        /// Output pairs file (r, theta, weight)
        #[arg(long)]
        pairs: PathBuf,

        /// Append the mirror copy at 2π − θ with halved weights
        #[arg(long)]
        fold: bool,
    },

    /// Check consistency and score a probe against concat samples
    Validate {
        #[command(flatten)]
        probe: ProbeArgs,

        /// Sampled pair geometries for the consistency check
        #[arg(long, default_value = "1000")]
        n_vertices: usize,

        /// Riemann points per geometry
        #[arg(long, default_value = "10000")]
        n_times: usize,

        /// Relative tolerance
        #[arg(long, default_value = "1e-5")]
        rtol: f64,

        /// Absolute tolerance
        #[arg(long, default_value = "1e-8")]
        atol: f64,

        /// RNG seed for the consistency check (default: OS entropy, reported in the output)
        #[arg(long)]
        seed: Option<u64>,

        /// Append `score,timestamp` to this file
        #[arg(long)]
        score_log: Option<PathBuf>,

        /// Output file for the score report (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Threads (0 = auto)
        #[arg(long, default_value = "0")]
        threads: usize,
    },

    /// Compute plot-ready diagnostics for a probe
    Diagnose {
        #[command(flatten)]
        probe: ProbeArgs,

        /// Neighbourhood radius of the time profiles
        #[arg(long, default_value = "0.05")]
        radius: f64,

        /// Model curve points per profile
        #[arg(long, default_value = "10001")]
        curve_points: usize,

        /// Time histogram bins per profile
        #[arg(long, default_value = "100")]
        hist_bins: usize,

        /// Radial bins of the pie and closure grids
        #[arg(long, default_value = "50")]
        grid_r_bins: usize,

        /// Angular bins of the pie and closure grids over [0, 2π]
        #[arg(long, default_value = "200")]
        grid_theta_bins: usize,

        /// Output file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print version
    Version,
}

#[derive(clap::Args)]
struct ProbeArgs {
    /// Probe table file (.json or .parquet)
    #[arg(long)]
    table: PathBuf,

    /// Concat pe file (r, theta, t[, weight])
    #[arg(long)]
    pe: PathBuf,

    /// Concat pairs file (r, theta[, weight])
    #[arg(long)]
    pairs: PathBuf,

    /// Probe implementation
    #[arg(long, value_enum, default_value = "histogram")]
    model: ModelArg,

    /// Rate density of the constant model (default: table mean)
    #[arg(long)]
    rate: Option<f64>,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackfillArg {
    EmptyCells,
    ZeroCells,
}

impl From<BackfillArg> for BackfillPolicy {
    fn from(b: BackfillArg) -> Self {
        match b {
            BackfillArg::EmptyCells => BackfillPolicy::EmptyCells,
            BackfillArg::ZeroCells => BackfillPolicy::ZeroCells,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ModelArg {
    Histogram,
    Constant,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so JSON on stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            exit_code(&e)
        }
    }
}

/// 2 for a failed consistency check, 1 for anything else.
fn exit_code(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<ps_core::Error>() {
        Some(e) if e.is_inconsistent() => ExitCode::from(2),
        _ => ExitCode::FAILURE,
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Build {
            config,
            geometry,
            vertices,
            hits,
            output,
            bins,
            theta_bins,
            t_bins,
            t_max,
            r0,
            max_channels,
            threads,
            backfill,
            summary,
        } => {
            let mut cfg = match config {
                Some(path) => config::read_build_config(&path)?,
                None => {
                    let (Some(geometry), Some(output)) = (geometry.clone(), output.clone()) else {
                        bail!("build needs --config, or --geometry, --output and datasets");
                    };
                    BuildConfig {
                        geometry,
                        datasets: Vec::new(),
                        output,
                        bins: 20,
                        theta_bins: None,
                        t_bins: 100,
                        t_max: 1000.0,
                        r0: ps_probe::DEFAULT_R0,
                        max_channels: None,
                        threads: 0,
                        backfill: BackfillPolicy::default(),
                    }
                }
            };
            if vertices.len() != hits.len() {
                bail!(
                    "--vertices and --hits must be given the same number of times ({} vs {})",
                    vertices.len(),
                    hits.len()
                );
            }
            if let Some(g) = geometry {
                cfg.geometry = g;
            }
            if let Some(o) = output {
                cfg.output = o;
            }
            if !vertices.is_empty() {
                cfg.datasets = vertices
                    .into_iter()
                    .zip(hits)
                    .map(|(vertices, hits)| DatasetPaths { vertices, hits })
                    .collect();
            }
            cfg.bins = bins.unwrap_or(cfg.bins);
            cfg.theta_bins = theta_bins.or(cfg.theta_bins);
            cfg.t_bins = t_bins.unwrap_or(cfg.t_bins);
            cfg.t_max = t_max.unwrap_or(cfg.t_max);
            cfg.r0 = r0.unwrap_or(cfg.r0);
            cfg.max_channels = max_channels.or(cfg.max_channels);
            cfg.threads = threads.unwrap_or(cfg.threads);
            if let Some(b) = backfill {
                cfg.backfill = b.into();
            }
            cmd_build(&cfg, summary.as_ref())
        }
        Commands::Concat { vertices, hits, geometry, max_channels, r0, pe, pairs, fold } => {
            cmd_concat(&vertices, &hits, &geometry, max_channels, r0, &pe, &pairs, fold)
        }
        Commands::Validate {
            probe,
            n_vertices,
            n_times,
            rtol,
            atol,
            seed,
            score_log,
            output,
            threads,
        } => {
            let consistency = ConsistencyConfig { n_vertices, n_times, rtol, atol, seed };
            cmd_validate(&probe, consistency, score_log.as_ref(), output.as_ref(), threads)
        }
        Commands::Diagnose {
            probe,
            radius,
            curve_points,
            hist_bins,
            grid_r_bins,
            grid_theta_bins,
            output,
        } => {
            let config = DiagnosticsConfig {
                pie_r_bins: grid_r_bins,
                pie_theta_bins: grid_theta_bins,
                closure_r_bins: grid_r_bins,
                closure_theta_bins: grid_theta_bins,
                neighbourhood: radius,
                curve_points,
                hist_bins,
                ..DiagnosticsConfig::default()
            };
            cmd_diagnose(&probe, &config, output.as_ref())
        }
        Commands::Version => {
            println!("probestat {}", ps_core::VERSION);
            Ok(())
        }
    }
}

fn cmd_build(cfg: &BuildConfig, summary_out: Option<&PathBuf>) -> Result<()> {
    if cfg.datasets.is_empty() {
        bail!("no datasets given");
    }
    let geometry = io::read_geometry(&cfg.geometry, cfg.max_channels)
        .with_context(|| format!("failed to load geometry {}", cfg.geometry.display()))?;
    tracing::info!(channels = geometry.len(), datasets = cfg.datasets.len(), "building probe");

    let binning = ProbeBinning::new(cfg.bins, cfg.theta_bins(), cfg.t_bins, cfg.t_max)?;
    let options = BuildOptions { r0: cfg.r0, threads: cfg.threads, backfill: cfg.backfill };
    let builder = HistogramBuilder::new(binning, options)?;

    // Each dataset is read inside its worker so only in-flight datasets are resident.
    let build = builder.build_with(cfg.datasets.len(), &geometry, |i| {
        let d = &cfg.datasets[i];
        io::read_dataset(&d.vertices, &d.hits)
    })?;

    io::write_table(&build.table, &cfg.output)
        .with_context(|| format!("failed to write {}", cfg.output.display()))?;
    tracing::info!(path = %cfg.output.display(), "probe table written");

    let (r_bins, theta_bins, t_bins) = build.table.shape();
    let slice_means: Vec<f64> = (0..t_bins)
        .map(|k| {
            let slice = build.table.time_slice(k);
            slice.iter().sum::<f64>() / slice.len() as f64
        })
        .collect();
    let output_json = serde_json::json!({
        "output": cfg.output,
        "r_bins": r_bins,
        "theta_bins": theta_bins,
        "t_bins": t_bins,
        "t_max": build.table.t_max(),
        "backfill": cfg.backfill,
        "total_mass": build.table.total_mass(),
        "slice_means": slice_means,
        "summary": build.summary,
    });
    write_json(summary_out, output_json)
}

#[allow(clippy::too_many_arguments)]
fn cmd_concat(
    vertices: &Path,
    hits: &Path,
    geometry: &Path,
    max_channels: Option<usize>,
    r0: f64,
    pe: &Path,
    pairs: &Path,
    fold: bool,
) -> Result<()> {
    let geometry = io::read_geometry(geometry, max_channels)
        .with_context(|| format!("failed to load geometry {}", geometry.display()))?;
    let dataset = io::read_dataset(vertices, hits)?;
    let mut samples = ConcatSamples::from_dataset(&dataset, &geometry, r0)?;
    if fold {
        samples = samples.folded();
    }
    io::write_concat(&samples, pe, pairs)?;
    tracing::info!(pe = samples.n_pe(), pairs = samples.n_pairs(), fold, "concat written");
    Ok(())
}

fn load_probe(args: &ProbeArgs) -> Result<(Probe, ConcatSamples)> {
    tracing::info!(path = %args.table.display(), "loading probe table");
    let table = TableLoader::from_path(&args.table)
        .get()
        .with_context(|| format!("failed to load probe table {}", args.table.display()))?;
    let kind = match args.model {
        ModelArg::Histogram => ProbeKind::Histogram,
        ModelArg::Constant => ProbeKind::Constant { rate: args.rate },
    };
    let probe = Probe::new(kind, table)?;
    let samples = io::read_concat(&args.pe, &args.pairs)?;
    tracing::info!(model = probe.name(), pe = samples.n_pe(), pairs = samples.n_pairs(), "loaded");
    Ok((probe, samples))
}

fn cmd_validate(
    args: &ProbeArgs,
    consistency: ConsistencyConfig,
    score_log: Option<&PathBuf>,
    output: Option<&PathBuf>,
    threads: usize,
) -> Result<()> {
    if threads > 0 {
        // Best-effort; if a global pool already exists, keep going.
        let _ = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global();
    }
    let (probe, samples) = load_probe(args)?;
    let report = ScoreEvaluator::new(consistency).score(&probe, &samples)?;
    tracing::info!(score = report.score, n_pe = report.n_pe, "scored");

    if let Some(path) = score_log {
        io::append_score_log(path, report.score)
            .with_context(|| format!("failed to append to {}", path.display()))?;
    }
    write_json(output, serde_json::to_value(&report)?)
}

fn cmd_diagnose(
    args: &ProbeArgs,
    config: &DiagnosticsConfig,
    output: Option<&PathBuf>,
) -> Result<()> {
    let (probe, samples) = load_probe(args)?;
    let artifact = ps_probe::diagnose(&probe, &samples, config)?;
    write_json(output, serde_json::to_value(&artifact)?)
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_separates_inconsistent_tables() {
        let inconsistent =
            ps_core::Error::Inconsistent { n_failed: 3, n_checked: 10, max_abs_diff: 0.5 };
        let err = anyhow::Error::from(inconsistent).context("scoring failed");
        assert_eq!(exit_code(&err), ExitCode::from(2));

        let other = anyhow::Error::from(ps_core::Error::Validation("bad".into()));
        assert_eq!(exit_code(&other), ExitCode::FAILURE);
        assert_eq!(exit_code(&anyhow::anyhow!("no datasets given")), ExitCode::FAILURE);
    }
}
