//! Parsing and formatting of refresh intervals

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntervalParseError {
    #[error("invalid interval '{0}': not a number")]
    NotANumber(String),

    #[error("invalid interval '{0}': must be positive")]
    NotPositive(String),

    #[error("empty interval list")]
    Empty,
}

/// Parse a comma-separated interval list like `"120"` or `"600,1800,3600"`
/// into seconds. Whitespace around entries is tolerated.
pub fn parse_intervals(input: &str) -> Result<Vec<u32>, IntervalParseError> {
    let mut intervals = Vec::new();
    for raw in input.split(',') {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value: i64 = trimmed
            .parse()
            .map_err(|_| IntervalParseError::NotANumber(trimmed.to_string()))?;
        if value <= 0 || value > u32::MAX as i64 {
            return Err(IntervalParseError::NotPositive(trimmed.to_string()));
        }
        intervals.push(value as u32);
    }
    if intervals.is_empty() {
        return Err(IntervalParseError::Empty);
    }
    Ok(intervals)
}

/// Format an interval in seconds as a short human label: `90s`, `2m`, `1h`,
/// `1.5h`.
pub fn format_interval(seconds: u32) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m", seconds / 60)
    } else {
        let hours = seconds as f64 / 3600.0;
        if hours.fract() == 0.0 {
            format!("{}h", hours as u32)
        } else {
            format!("{:.1}h", hours)
        }
    }
}
