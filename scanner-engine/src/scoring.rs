//! Composite scoring and signal classification

use serde::{Deserialize, Serialize};
use std::fmt;

/// Trade signal buckets, classified from the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    StrongBuy,
    Buy,
    Neutral,
    Sell,
    StrongSell,
}

impl Signal {
    pub fn icon(&self) -> &'static str {
        match self {
            Signal::StrongBuy => "🟢🔥",
            Signal::Buy => "🟢",
            Signal::Neutral => "⚪",
            Signal::Sell => "🔴",
            Signal::StrongSell => "🔴🔥",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Signal::StrongBuy => "STRONG BUY",
            Signal::Buy => "BUY",
            Signal::Neutral => "NEUTRAL",
            Signal::Sell => "SELL",
            Signal::StrongSell => "STRONG SELL",
        };
        write!(f, "{}", label)
    }
}

/// Score thresholds for signal classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SignalThresholds {
    pub strong_buy: f64,
    pub buy: f64,
    pub sell: f64,
    pub strong_sell: f64,
}

impl Default for SignalThresholds {
    fn default() -> Self {
        Self {
            strong_buy: 80.0,
            buy: 25.0,
            sell: -25.0,
            strong_sell: -80.0,
        }
    }
}

/// Composite score for one symbol.
///
/// VWAP deviation drives the sign, the square root of session volume (in
/// millions, capped at 5) keeps thick markets from dominating, and the
/// session weight scales everything.
pub fn compute_score(vwap_dev_pct: f64, volume_m: f64, session_weight: f64) -> f64 {
    let volume_factor = volume_m.sqrt().min(5.0);
    vwap_dev_pct * volume_factor * 10.0 * session_weight
}

pub fn classify_signal(score: f64, thresholds: &SignalThresholds) -> Signal {
    if score >= thresholds.strong_buy {
        Signal::StrongBuy
    } else if score >= thresholds.buy {
        Signal::Buy
    } else if score <= thresholds.strong_sell {
        Signal::StrongSell
    } else if score <= thresholds.sell {
        Signal::Sell
    } else {
        Signal::Neutral
    }
}
