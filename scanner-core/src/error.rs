//! Error types shared across the scanner

use thiserror::Error;

/// Failure modes of one ranking computation.
///
/// `Clone` so that a single in-flight computation can hand the same outcome
/// to every caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    /// The upstream market-data API could not be reached or answered with
    /// an error. Retried on the next tick, never fatal to a loop.
    #[error("upstream unavailable: {0}")]
    Upstream(String),

    /// The computation succeeded but no symbol survived filtering.
    #[error("scan produced no ranked symbols")]
    NoData,
}

impl SnapshotError {
    pub fn upstream(msg: impl Into<String>) -> Self {
        SnapshotError::Upstream(msg.into())
    }
}
