//! # ps-probe
//!
//! Binned estimate of the probe function `R(r, θ, t)`: the expected photoelectron
//! rate a detector channel records at time `t` from a vertex at normalized radius
//! `r` and vertex–channel angle `θ`.
//!
//! - [`histogram::HistogramBuilder`] accumulates simulated datasets into a
//!   [`table::ProbeTable`] (parallel over datasets, deterministic reduction).
//! - [`query`] answers `marginal(r, θ)` and `instantaneous(r, θ, t)` against a
//!   loaded table ([`loader::TableLoader`] loads it at most once).
//! - [`consistency`] checks the marginal against the integral of the
//!   instantaneous rate; [`score`] computes the Poisson log-likelihood of
//!   observed hits once that check passes.
//! - [`diagnostics`] produces plot-ready closure maps and time profiles.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod binning;
pub mod consistency;
pub mod coords;
pub mod dataset;
pub mod diagnostics;
pub mod histogram;
pub mod io;
pub mod loader;
pub mod query;
pub mod score;
pub mod table;


pub use binning::{Axis, ProbeBinning};
pub use consistency::{ConsistencyConfig, check_consistency, ensure_consistent};
pub use coords::{ChannelDirection, ChannelGeometry, DEFAULT_R0, fold_theta};
pub use dataset::{ConcatSamples, Dataset, Hit};
pub use diagnostics::{DiagnosticsArtifact, DiagnosticsConfig, diagnose};
pub use histogram::{BackfillPolicy, BuildOptions, BuildSummary, HistogramBuilder, ProbeBuild};
pub use loader::TableLoader;
pub use query::{ConstantProbe, HistogramProbe, Probe, ProbeKind};
pub use score::ScoreEvaluator;
pub use table::ProbeTable;
