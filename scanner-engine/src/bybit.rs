//! Bybit v5 REST client
//!
//! Public market-data endpoints only: instrument discovery and klines for
//! USDT linear perpetuals.

use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Base URL for the Bybit v5 API
const REST_API_BASE: &str = "https://api.bybit.com";

/// One OHLCV candle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg")]
    ret_msg: String,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InstrumentList {
    list: Vec<Instrument>,
}

#[derive(Debug, Deserialize)]
struct Instrument {
    symbol: String,
    #[serde(rename = "quoteCoin")]
    quote_coin: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct KlineList {
    // Each entry: [startTime, open, high, low, close, volume, turnover]
    list: Vec<Vec<String>>,
}

/// Bybit API client
#[derive(Clone)]
pub struct BybitClient {
    client: Client,
    base_url: String,
}

impl BybitClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: REST_API_BASE.to_string(),
        }
    }

    /// Client against an alternative endpoint (testing / proxies).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Symbols of all actively trading USDT linear perpetuals.
    pub async fn linear_symbols(&self) -> Result<Vec<String>, BybitError> {
        let url = format!("{}/v5/market/instruments-info", self.base_url);
        let response: ApiResponse<InstrumentList> = self
            .client
            .get(&url)
            .query(&[("category", "linear")])
            .send()
            .await
            .map_err(|e| BybitError::Http(e.to_string()))?
            .json()
            .await
            .map_err(|e| BybitError::Parse(e.to_string()))?;

        let result = Self::check(response)?;
        let symbols: Vec<String> = result
            .list
            .into_iter()
            .filter(|i| i.quote_coin == "USDT" && i.status == "Trading")
            .map(|i| i.symbol)
            .collect();

        debug!("Fetched {} tradable linear symbols", symbols.len());
        Ok(symbols)
    }

    /// Candles for `symbol` since `start_ms`, oldest first.
    ///
    /// `interval` is a Bybit kline interval string such as `"5"`.
    pub async fn session_candles(
        &self,
        symbol: &str,
        interval: &str,
        start_ms: i64,
    ) -> Result<Vec<Candle>, BybitError> {
        let url = format!("{}/v5/market/kline", self.base_url);
        let start = start_ms.to_string();
        let response: ApiResponse<KlineList> = self
            .client
            .get(&url)
            .query(&[
                ("category", "linear"),
                ("symbol", symbol),
                ("interval", interval),
                ("start", start.as_str()),
                ("limit", "200"),
            ])
            .send()
            .await
            .map_err(|e| BybitError::Http(e.to_string()))?
            .json()
            .await
            .map_err(|e| BybitError::Parse(e.to_string()))?;

        let result = Self::check(response)?;

        // Bybit returns klines newest first.
        let mut candles = Vec::with_capacity(result.list.len());
        for row in result.list.iter().rev() {
            candles.push(parse_kline_row(row)?);
        }
        Ok(candles)
    }

    fn check<T>(response: ApiResponse<T>) -> Result<T, BybitError> {
        if response.ret_code != 0 {
            return Err(BybitError::Api {
                code: response.ret_code,
                message: response.ret_msg,
            });
        }
        response
            .result
            .ok_or_else(|| BybitError::Parse("missing result payload".to_string()))
    }
}

impl Default for BybitClient {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_kline_row(row: &[String]) -> Result<Candle, BybitError> {
    if row.len() < 6 {
        return Err(BybitError::Parse(format!(
            "kline row has {} fields, expected at least 6",
            row.len()
        )));
    }
    let field = |idx: usize| -> Result<f64, BybitError> {
        row[idx]
            .parse()
            .map_err(|_| BybitError::Parse(format!("bad kline field '{}'", row[idx])))
    };
    Ok(Candle {
        open: field(1)?,
        high: field(2)?,
        low: field(3)?,
        close: field(4)?,
        volume: field(5)?,
    })
}

/// Errors from the Bybit API client
#[derive(Debug, thiserror::Error)]
pub enum BybitError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}
