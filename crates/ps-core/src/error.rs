//! Error types for probestat

use thiserror::Error;

/// probestat error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed input or invalid parameters
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),

    /// The input carries no samples the estimator can use (no hits, no pairs, ...)
    #[error("No usable data: {0}")]
    NoUsableData(String),

    /// The probe table failed the marginal/instantaneous consistency check.
    ///
    /// Scores computed against such a table are meaningless, so this is never
    /// downgraded to a warning.
    #[error(
        "Consistency check failed: {n_failed}/{n_checked} sampled vertices disagree \
         (max |marginal - integral| = {max_abs_diff:e})"
    )]
    Inconsistent {
        /// Number of sampled vertices outside tolerance
        n_failed: usize,
        /// Number of sampled vertices
        n_checked: usize,
        /// Largest absolute disagreement observed
        max_abs_diff: f64,
    },

    /// Not implemented
    #[error("Not implemented: {0}")]
    NotImplemented(String),
}

impl Error {
    /// `true` for [`Error::Inconsistent`].
    pub fn is_inconsistent(&self) -> bool {
        matches!(self, Error::Inconsistent { .. })
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
