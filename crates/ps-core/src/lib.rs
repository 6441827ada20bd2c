//! # ps-core
//!
//! Shared error type, the [`ProbeModel`] trait and serializable report types
//! used by the probestat crates.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::ProbeModel;
pub use types::{ConsistencyReport, ConsistencyWorst, ScoreReport};

/// Crate version, shared by every probestat binary.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
