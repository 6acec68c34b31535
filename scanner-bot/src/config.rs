//! Environment-driven configuration

use scanner_core::{parse_intervals, IntervalParseError};
use scanner_engine::{ScannerConfig, SignalThresholds};
use std::env;

/// Everything the bot reads from the environment, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Discord bot token for authentication.
    pub discord_token: String,
    /// Broadcast intervals in seconds; `/start` registers one loop each.
    pub intervals: Vec<u32>,
    pub max_symbols: usize,
    pub top_n: usize,
    /// Minimum session volume in millions of USDT.
    pub min_volume_m: f64,
    pub thresholds: SignalThresholds,
    /// Path to the SQLite database holding schedules and rank history.
    pub db_path: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Only `DISCORD_BOT_TOKEN` is required; everything else has a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let discord_token = env::var("DISCORD_BOT_TOKEN")
            .map_err(|_| ConfigError::Missing("DISCORD_BOT_TOKEN"))?;

        let intervals_raw =
            env::var("REFRESH_INTERVAL").unwrap_or_else(|_| "120".to_string());
        let intervals = parse_intervals(&intervals_raw).map_err(ConfigError::InvalidIntervals)?;

        let thresholds = SignalThresholds {
            strong_buy: parse_or("STRONG_SCORE", 80.0)?,
            buy: parse_or("BUY_SCORE", 25.0)?,
            sell: parse_or("SELL_SCORE", -25.0)?,
            strong_sell: parse_or("STRONG_SELL_SCORE", -80.0)?,
        };

        Ok(Self {
            discord_token,
            intervals,
            max_symbols: parse_or("MAX_SYMBOLS", 120usize)?,
            top_n: parse_or("TOP_N", 15usize)?,
            min_volume_m: parse_or("MIN_VOLUME_M", 0.3)?,
            thresholds,
            db_path: env::var("SCANNER_DB_PATH")
                .unwrap_or_else(|_| "data/scanner.db".to_string()),
        })
    }

    pub fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            max_symbols: self.max_symbols,
            top_n: self.top_n,
            min_volume_m: self.min_volume_m,
            thresholds: self.thresholds,
        }
    }
}

fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid { name, raw }),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("invalid value for {name}: {raw}")]
    Invalid { name: &'static str, raw: String },

    #[error("invalid REFRESH_INTERVAL: {0}")]
    InvalidIntervals(#[from] IntervalParseError),
}
