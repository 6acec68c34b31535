//! Publishing seam between the scheduler and the chat platform

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Reference to a previously-published output message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputHandle {
    pub channel_id: u64,
    pub message_id: u64,
}

/// Everything a destination update needs, as typed data.
#[derive(Debug, Clone)]
pub struct UpdateContent {
    pub table: String,
    pub session_name: String,
    pub session_weight: f64,
    pub interval_secs: u32,
    pub computed_at: DateTime<Utc>,
    /// Pre-formatted rank-movement line, when the interval has history.
    pub movers: Option<String>,
}

#[derive(Error, Debug, Clone)]
pub enum PublishError {
    /// The destination message no longer exists. Fatal to the one schedule
    /// entry publishing to it.
    #[error("destination no longer exists")]
    NotFound,

    /// Any other platform failure. Retried on the next tick.
    #[error("publish failed: {0}")]
    Api(String),
}

/// Message lifecycle against the chat platform.
#[async_trait]
pub trait Publisher: Send + Sync + 'static {
    /// Post the initial placeholder and return its handle.
    async fn publish_initial(&self, channel_id: u64) -> Result<OutputHandle, PublishError>;

    /// Edit the destination with fresh content.
    async fn publish_update(
        &self,
        handle: OutputHandle,
        content: &UpdateContent,
    ) -> Result<(), PublishError>;

    /// Edit the destination into its stopped state.
    async fn publish_stopped(&self, handle: OutputHandle) -> Result<(), PublishError>;

    /// Check that the destination still exists without modifying it.
    async fn resolve(&self, handle: OutputHandle) -> Result<(), PublishError>;
}
