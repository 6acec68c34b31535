//! Core types for the VWAP session scanner
//!
//! Shared data model and seams used by the engine, the scheduling services
//! and the bot binary.

pub mod error;
pub mod interval;
pub mod session;
pub mod snapshot;

pub use error::SnapshotError;
pub use interval::{format_interval, parse_intervals, IntervalParseError};
pub use session::{SessionCalendar, SessionClock, SessionWindow};
pub use snapshot::{Snapshot, SnapshotComputer};
