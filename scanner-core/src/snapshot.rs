//! Ranking snapshot data model and the computation seam

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SnapshotError;

/// One complete computed ranking result.
///
/// Immutable once produced; shared by reference (`Arc<Snapshot>`) across
/// every consumer reading the cache at the same instant. Session name and
/// weight travel as typed fields so downstream code never has to recover
/// them from the rendered text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Rendered monospace table, ready for publishing.
    pub table: String,
    /// Instant the scan finished.
    pub computed_at: DateTime<Utc>,
    /// Trading session active when the scan ran.
    pub session_name: String,
    /// Scoring weight of that session.
    pub session_weight: f64,
    /// Ranked symbols, best first. Rank is 1-based.
    pub ranking: Vec<(String, u32)>,
}

/// The expensive, rate-limited upstream computation.
///
/// Takes no arguments; the implementation embeds current session context in
/// its output. Exactly one invocation should ever be in flight, which the
/// snapshot cache enforces.
#[async_trait]
pub trait SnapshotComputer: Send + Sync + 'static {
    async fn compute(&self) -> Result<Snapshot, SnapshotError>;
}
