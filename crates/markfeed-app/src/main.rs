//! markfeed - Entry Point
//!
//! Keeps order books for the configured symbols in sync (push first, pull
//! when the push channel is down) and revalues positions on price changes.

use anyhow::Result;
use clap::Parser;
use markfeed_app::{AppConfig, MarketSync};
use markfeed_core::Symbol;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const SUMMARY_INTERVAL: Duration = Duration::from_secs(60);

/// Live order book sync and position mark-to-market
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via MARKFEED_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Symbol to watch instead of those in the config (repeatable)
    #[arg(short, long = "symbol")]
    symbols: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Must run before any TLS connection is made
    markfeed_ws::init_crypto();

    let args = Args::parse();

    markfeed_telemetry::init_logging()?;

    info!("Starting markfeed v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > MARKFEED_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("MARKFEED_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");
    let config = AppConfig::load(&config_path)?;

    // --symbol replaces the configured list
    let symbols = if args.symbols.is_empty() {
        config.parsed_symbols()?
    } else {
        let mut symbols = args
            .symbols
            .iter()
            .map(Symbol::new)
            .collect::<Result<Vec<_>, _>>()?;
        symbols.sort();
        symbols.dedup();
        symbols
    };
    info!(ws_url = %config.ws_url, rest_base_url = %config.rest_base_url, count = symbols.len(), "Configuration loaded");

    let sync = Arc::new(MarketSync::new(config)?);
    for symbol in &symbols {
        sync.watch_symbol(symbol);
    }

    let runner = {
        let sync = sync.clone();
        tokio::spawn(async move { sync.run().await })
    };

    let mut summary = tokio::time::interval(SUMMARY_INTERVAL);
    summary.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, shutting down");
                break;
            }
            _ = summary.tick() => log_summary(&sync),
        }
    }

    sync.shutdown().await;
    match runner.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Consumer loop failed"),
        Err(e) => error!(error = %e, "Consumer loop panicked"),
    }

    info!("markfeed stopped");
    Ok(())
}

fn log_summary(sync: &MarketSync) {
    for (topic, state) in sync.topics() {
        let snapshot = sync.store().get_snapshot(&topic.symbol);
        info!(
            %topic,
            %state,
            source = snapshot.as_ref().map(|s| s.source().as_str()),
            mid = ?snapshot.as_ref().and_then(|s| s.mid_price()),
            spread_pct = ?snapshot.as_ref().and_then(|s| s.spread_percent()),
            polls = sync.poll_count(&topic),
            "Topic summary"
        );
    }

    let account = sync.positions().account();
    info!(
        open_positions = account.open_positions,
        unrealized_pnl = %account.unrealized_pnl,
        equity = %account.equity,
        margin_ratio = %account.margin_ratio,
        "Account summary"
    );
}
