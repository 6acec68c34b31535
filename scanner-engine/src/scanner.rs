//! The scan itself: discovery, fetch, score, rank, render

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, warn};

use scanner_core::{SessionCalendar, Snapshot, SnapshotComputer, SnapshotError};

use crate::bybit::BybitClient;
use crate::indicators;
use crate::scoring::{classify_signal, compute_score, SignalThresholds};
use crate::table::{render_table, MarketRow};

/// A symbol needs this many session candles before its indicators are
/// considered meaningful.
const MIN_CANDLES: usize = 30;

/// Kline interval used for session candles.
const CANDLE_INTERVAL: &str = "5";

/// Tunables for one scan.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Cap on the number of symbols fetched per scan.
    pub max_symbols: usize,
    /// Rows kept in the rendered table and the stored ranking.
    pub top_n: usize,
    /// Minimum session volume in millions of USDT.
    pub min_volume_m: f64,
    pub thresholds: SignalThresholds,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_symbols: 120,
            top_n: 15,
            min_volume_m: 0.3,
            thresholds: SignalThresholds::default(),
        }
    }
}

/// Scans the Bybit linear universe and produces a ranked snapshot.
pub struct MarketScanner {
    client: BybitClient,
    calendar: SessionCalendar,
    config: ScannerConfig,
}

impl MarketScanner {
    pub fn new(client: BybitClient, calendar: SessionCalendar, config: ScannerConfig) -> Self {
        Self {
            client,
            calendar,
            config,
        }
    }

    fn build_row(&self, symbol: &str, candles: &[crate::bybit::Candle], weight: f64) -> Option<MarketRow> {
        if candles.len() < MIN_CANDLES {
            return None;
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
        let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();

        let price = *closes.last()?;
        let vwap = indicators::vwap(candles)?;
        if price <= 0.0 || vwap <= 0.0 {
            return None;
        }

        // Volume in quote terms (USDT), in millions.
        let volume_m = candles
            .iter()
            .map(|c| c.volume * c.close)
            .sum::<f64>()
            / 1_000_000.0;
        if volume_m < self.config.min_volume_m {
            return None;
        }

        let vwap_dev = (price - vwap) / vwap * 100.0;
        let score = compute_score(vwap_dev, volume_m, weight);

        Some(MarketRow {
            symbol: symbol.to_string(),
            price,
            vwap,
            vwap_dev,
            volume_m,
            rsi: indicators::rsi(&closes, 14),
            macd: indicators::macd_hist(&closes),
            atr: indicators::atr(&highs, &lows, &closes, 14),
            stoch: indicators::stochastic(&highs, &lows, &closes, 14),
            score,
            signal: classify_signal(score, &self.config.thresholds),
        })
    }
}

#[async_trait]
impl SnapshotComputer for MarketScanner {
    async fn compute(&self) -> Result<Snapshot, SnapshotError> {
        let mut symbols = self
            .client
            .linear_symbols()
            .await
            .map_err(|e| SnapshotError::upstream(e.to_string()))?;
        symbols.truncate(self.config.max_symbols);

        let now = Utc::now();
        let window = self.calendar.session_at(now);
        let session_name = window.name.clone();
        let session_weight = window.weight;
        let start_ms = self.calendar.session_start(now).timestamp_millis();

        let fetches = symbols.iter().map(|symbol| {
            let client = self.client.clone();
            async move {
                let candles = client
                    .session_candles(symbol, CANDLE_INTERVAL, start_ms)
                    .await;
                (symbol.clone(), candles)
            }
        });

        let mut rows = Vec::new();
        let mut fetch_failures = 0usize;
        for (symbol, candles) in join_all(fetches).await {
            match candles {
                Ok(candles) => {
                    if let Some(row) = self.build_row(&symbol, &candles, session_weight) {
                        rows.push(row);
                    }
                }
                Err(e) => {
                    fetch_failures += 1;
                    debug!("Candle fetch failed for {}: {}", symbol, e);
                }
            }
        }

        if fetch_failures > 0 {
            warn!(
                "{}/{} candle fetches failed this scan",
                fetch_failures,
                symbols.len()
            );
        }

        if rows.is_empty() {
            return Err(SnapshotError::NoData);
        }

        // Strongest absolute score first.
        rows.sort_by(|a, b| {
            b.score
                .abs()
                .partial_cmp(&a.score.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        rows.truncate(self.config.top_n);

        let ranking = rows
            .iter()
            .enumerate()
            .map(|(i, row)| (row.symbol.clone(), (i + 1) as u32))
            .collect();
        let table = render_table(&rows, &session_name, session_weight);

        info!(
            "Scan complete: {} ranked symbols, session {}",
            rows.len(),
            session_name
        );

        Ok(Snapshot {
            table,
            computed_at: now,
            session_name,
            session_weight,
            ranking,
        })
    }
}
