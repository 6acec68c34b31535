//! Market scan engine for the VWAP session scanner
//!
//! Wraps the Bybit REST API, computes the per-symbol indicator set, scores
//! and ranks the universe, and renders the result as a monospace table.
//! The engine is the concrete [`scanner_core::SnapshotComputer`] used by the
//! scheduling services.

pub mod bybit;
pub mod indicators;
pub mod scanner;
pub mod scoring;
pub mod table;

pub use bybit::{BybitClient, BybitError, Candle};
pub use scanner::{MarketScanner, ScannerConfig};
pub use scoring::{Signal, SignalThresholds};
pub use table::MarketRow;
