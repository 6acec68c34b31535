//! Scheduling, caching and recovery services for the VWAP session scanner
//!
//! This crate owns the broadcast core: the single-flight snapshot cache
//! shared by every channel loop, the durable rank and schedule stores, the
//! per-channel scheduler, and the session monitor that forces out-of-band
//! refreshes on session boundaries.

pub mod publisher;
pub mod rank_store;
pub mod schedule_store;
pub mod scheduler;
pub mod session_monitor;
pub mod snapshot_cache;

pub use publisher::{OutputHandle, PublishError, Publisher, UpdateContent};
pub use rank_store::{RankStore, RankStoreError};
pub use schedule_store::{PersistedEntry, ScheduleStore, ScheduleStoreError};
pub use scheduler::{ChannelScheduler, EntryLabels, RestoreSummary, ScheduleKey, SchedulerError};
pub use session_monitor::{SessionMonitor, SessionSource};
pub use snapshot_cache::SnapshotCache;
