//! Technical indicators
//!
//! Plain-f64 implementations over candle slices. All functions are pure and
//! tolerant of short inputs, returning a neutral value rather than panicking.

use crate::bybit::Candle;

/// Session VWAP over the given candles, `None` when there is no volume.
pub fn vwap(candles: &[Candle]) -> Option<f64> {
    let mut pv = 0.0;
    let mut vol = 0.0;
    for c in candles {
        let typical = (c.high + c.low + c.close) / 3.0;
        pv += typical * c.volume;
        vol += c.volume;
    }
    if vol > 0.0 {
        Some(pv / vol)
    } else {
        None
    }
}

/// Relative strength index over the trailing `period` deltas.
pub fn rsi(closes: &[f64], period: usize) -> f64 {
    if closes.len() < 2 {
        return 50.0;
    }
    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let tail = &deltas[deltas.len().saturating_sub(period)..];
    let n = tail.len() as f64;
    let avg_gain: f64 = tail.iter().filter(|d| **d > 0.0).sum::<f64>() / n;
    let avg_loss: f64 = -tail.iter().filter(|d| **d < 0.0).sum::<f64>() / n;
    if avg_loss == 0.0 {
        return 100.0;
    }
    100.0 - (100.0 / (1.0 + avg_gain / avg_loss))
}

/// Exponential moving average with the standard 2/(n+1) smoothing.
pub fn ema(data: &[f64], period: usize) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut value = data[0];
    for x in &data[1..] {
        value = x * k + value * (1.0 - k);
    }
    value
}

/// MACD histogram: (EMA12 - EMA26) over the trailing 26 closes, minus a
/// 9-period EMA of the trailing 9 closes as the signal line.
pub fn macd_hist(closes: &[f64]) -> f64 {
    if closes.is_empty() {
        return 0.0;
    }
    let tail26 = &closes[closes.len().saturating_sub(26)..];
    let tail9 = &closes[closes.len().saturating_sub(9)..];
    let macd = ema(tail26, 12) - ema(tail26, 26);
    let signal = ema(tail9, 9);
    macd - signal
}

/// Average true range over the trailing `period` candles.
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> f64 {
    if closes.len() < period + 1 {
        return 0.0;
    }
    let mut trs = Vec::with_capacity(closes.len() - 1);
    for i in 1..closes.len() {
        let tr = (highs[i] - lows[i])
            .max((highs[i] - closes[i - 1]).abs())
            .max((lows[i] - closes[i - 1]).abs());
        trs.push(tr);
    }
    trs[trs.len() - period..].iter().sum::<f64>() / period as f64
}

/// Stochastic %K over the trailing `period` candles. 50 when the range is
/// degenerate (flat market or short input).
pub fn stochastic(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> f64 {
    if closes.len() < period {
        return 50.0;
    }
    let hh = highs[highs.len() - period..]
        .iter()
        .cloned()
        .fold(f64::MIN, f64::max);
    let ll = lows[lows.len() - period..]
        .iter()
        .cloned()
        .fold(f64::MAX, f64::min);
    let range = hh - ll;
    if range == 0.0 {
        return 50.0;
    }
    (closes[closes.len() - 1] - ll) / range * 100.0
}
