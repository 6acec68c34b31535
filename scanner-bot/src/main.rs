//! VWAP Session Scanner Discord Bot
//!
//! Scans Bybit linear perpetuals, ranks them by a session-weighted VWAP
//! deviation score, and broadcasts live tables to Discord channels on
//! independently-scheduled loops.

mod config;
mod discord;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use twilight_http::Client as HttpClient;

use scanner_core::{SessionCalendar, SessionClock};
use scanner_engine::{BybitClient, MarketScanner};
use scanner_services::{
    ChannelScheduler, RankStore, ScheduleStore, SessionMonitor, SnapshotCache,
};

use config::Config;
use discord::{CommandGateway, DiscordPublisher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if the file doesn't exist
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env: {}", e);
        }
    }

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,scanner_bot=debug")),
        )
        .init();

    info!("Starting VWAP session scanner");

    let config = Config::from_env()?;
    info!(
        "Configured intervals: {:?}s, top {} of up to {} symbols",
        config.intervals, config.top_n, config.max_symbols
    );

    let calendar = SessionCalendar::default();
    let scanner = MarketScanner::new(
        BybitClient::new(),
        calendar.clone(),
        config.scanner_config(),
    );
    let cache = SnapshotCache::new(Arc::new(scanner));

    // Store-open failures are the one fatal startup condition.
    info!("Opening scanner database at: {}", config.db_path);
    let ranks = Arc::new(RankStore::new(&config.db_path)?);
    let schedules = Arc::new(ScheduleStore::new(&config.db_path)?);

    let http = Arc::new(HttpClient::new(config.discord_token.clone()));
    let publisher = Arc::new(DiscordPublisher::new(Arc::clone(&http), calendar.clone()));

    let scheduler = ChannelScheduler::new(cache, ranks, schedules, publisher);

    let summary = scheduler.restore().await?;
    info!(
        "Schedule restore complete: {} restored, {} discarded",
        summary.restored, summary.discarded
    );

    let monitor = SessionMonitor::new(
        Arc::new(SessionClock::new(calendar)),
        scheduler.clone(),
    );
    tokio::spawn(monitor.run());

    let gateway = Arc::new(CommandGateway::new(
        config.discord_token,
        http,
        scheduler,
        config.intervals,
    ));

    tokio::select! {
        _ = gateway.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    Ok(())
}
