//! Monospace table rendering

use crate::scoring::Signal;

/// One fully-computed row of the scan output.
#[derive(Debug, Clone)]
pub struct MarketRow {
    pub symbol: String,
    pub price: f64,
    pub vwap: f64,
    /// Price deviation from VWAP in percent.
    pub vwap_dev: f64,
    /// Session volume in millions of USDT.
    pub volume_m: f64,
    pub rsi: f64,
    pub macd: f64,
    pub atr: f64,
    pub stoch: f64,
    pub score: f64,
    pub signal: Signal,
}

/// Render ranked rows as a fixed-width text table.
pub fn render_table(rows: &[MarketRow], session: &str, weight: f64) -> String {
    let mut lines = Vec::with_capacity(rows.len() + 6);
    lines.push("BYBIT FUTURES VWAP SESSION SCANNER".to_string());
    lines.push(format!("Session : {} | Weight : {}", session, weight));
    lines.push("=".repeat(110));
    lines.push(format!(
        "{:<5} {:<14} {:<20} {:<8} {:<11} {:<11} {:<7} {:<6} {:<8} {:<6}",
        "RANK", "SYMBOL", "SIGNAL", "SCORE", "PRICE", "VWAP", "VOL(M)", "RSI", "MACD", "STOCH"
    ));
    lines.push("-".repeat(110));

    for (i, row) in rows.iter().enumerate() {
        let signal = format!("{} {}", row.signal.icon(), row.signal);
        lines.push(format!(
            "{:<5} {:<14} {:<20} {:<8.2} {:<11.6} {:<11.6} {:<7.2} {:<6.1} {:<8.4} {:<6.1}",
            i + 1,
            row.symbol,
            signal,
            row.score,
            row.price,
            row.vwap,
            row.volume_m,
            row.rsi,
            row.macd,
            row.stoch
        ));
    }

    lines.push("=".repeat(110));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row(symbol: &str, score: f64) -> MarketRow {
        MarketRow {
            symbol: symbol.to_string(),
            price: 101.5,
            vwap: 100.0,
            vwap_dev: 1.5,
            volume_m: 12.0,
            rsi: 61.0,
            macd: 0.42,
            atr: 1.1,
            stoch: 70.0,
            score,
            signal: Signal::Buy,
        }
    }

    #[test]
    fn test_render_includes_header_and_rows() {
        let table = render_table(
            &[sample_row("BTCUSDT", 55.0), sample_row("ETHUSDT", 30.0)],
            "LONDON",
            1.0,
        );
        assert!(table.contains("Session : LONDON | Weight : 1"));
        assert!(table.contains("BTCUSDT"));
        assert!(table.contains("ETHUSDT"));
        // Rank column is 1-based.
        let btc_line = table.lines().find(|l| l.contains("BTCUSDT")).unwrap();
        assert!(btc_line.trim_start().starts_with('1'));
    }

    #[test]
    fn test_render_empty_universe_still_renders_frame() {
        let table = render_table(&[], "ASIAN", 0.7);
        assert!(table.contains("RANK"));
    }
}
