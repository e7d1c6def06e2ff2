// =============================================================================
// perp-watch — Main Entry Point
// =============================================================================
//
// Collects Binance USDT-M perpetual metrics into per-symbol CSV files, checks
// them for open-interest surges and extreme funding, and pushes alerts to
// Telegram. `run` is the long-lived service; the other subcommands are
// one-shot tools over the same pieces.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod analysis;
mod app_state;
mod binance;
mod futures_intel;
mod notify;
mod runtime_config;
mod scheduler;
mod store;
mod types;

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::analysis::ChangeReport;
use crate::app_state::MonitorState;
use crate::binance::FuturesClient;
use crate::futures_intel::SymbolLister;
use crate::notify::{message, TelegramNotifier};
use crate::runtime_config::{ConfigError, MonitorConfig, SymbolSelection};
use crate::scheduler::Monitor;
use crate::store::SnapshotStore;

#[derive(Parser)]
#[command(
    name = "perp-watch",
    version,
    about = "Binance perpetual futures OI/funding monitor"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect one snapshot per symbol and exit
    Collect {
        /// Comma-separated symbols (overrides PERP_SYMBOLS)
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,

        /// Only the N most traded perpetuals
        #[arg(long)]
        top: Option<usize>,
    },
    /// Print the biggest movers over a trailing window
    Report {
        /// Trailing window in hours (1 to 87600)
        #[arg(long, default_value_t = 24, value_parser = clap::value_parser!(i64).range(1..=87_600))]
        hours: i64,

        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Evaluate the alert rule over stored data
    Evaluate {
        /// Print matches without posting them
        #[arg(long, default_value_t = false)]
        no_notify: bool,
    },
    /// Run the collection/alert service until Ctrl-C (default)
    Run,
    /// List tradable USDT perpetuals
    Symbols {
        #[arg(long)]
        top: Option<usize>,
    },
    /// Send a test message to the configured chat
    TestNotify,
}

fn selection_override(symbols: Vec<String>, top: Option<usize>) -> Option<SymbolSelection> {
    let symbols: Vec<String> = symbols
        .into_iter()
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    if !symbols.is_empty() {
        Some(SymbolSelection::Explicit(symbols))
    } else {
        top.map(SymbolSelection::TopByVolume)
    }
}

/// Telegram client, or `None` with setup instructions in the log.
fn build_notifier(config: &MonitorConfig) -> anyhow::Result<Option<TelegramNotifier>> {
    match config.telegram() {
        Ok(tg) => Ok(Some(TelegramNotifier::new(tg)?)),
        Err(e) => {
            error!(error = %e, "Telegram is not configured; alerts will only be logged");
            error!("Set TELEGRAM_BOT_TOKEN (from @BotFather) and TELEGRAM_CHAT_ID in the environment or .env to enable alerts");
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        perp-watch — Perpetual Futures Monitor            ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config = MonitorConfig::from_env().context("invalid configuration")?;
    config.log_summary();

    // ── 2. Shared pieces ─────────────────────────────────────────────────
    let client = FuturesClient::new(config.fapi_base_url.clone(), config.spot_base_url.clone())?;
    let store = Arc::new(SnapshotStore::open(&config.data_dir)?);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Collect { symbols, top } => {
            let notifier = build_notifier(&config)?;
            let monitor = Monitor::new(
                config.clone(),
                client,
                store,
                notifier,
                Arc::new(MonitorState::new()),
            );
            let selection = selection_override(symbols, top).unwrap_or(config.symbols.clone());
            let symbols = monitor.refresh_symbols_with(&selection).await;
            let (ok, failed) = monitor.collect(&symbols).await;
            if let Err(e) = monitor.maintain_storage().await {
                warn!(error = %e, "storage maintenance failed");
            }
            println!(
                "Collected {ok} symbols, {failed} failed, data in {}",
                monitor.store().dir().display()
            );
        }

        Commands::Report { hours, top } => {
            let report = ChangeReport::build(&store, Utc::now(), hours, top)?;
            println!("{report}");
        }

        Commands::Evaluate { no_notify } => {
            let notifier = if no_notify { None } else { build_notifier(&config)? };
            let monitor = Monitor::new(
                config.clone(),
                client,
                store,
                notifier,
                Arc::new(MonitorState::new()),
            );
            let summary = monitor.evaluate().await;
            for alert in &summary.alerts {
                println!(
                    "{:<16} funding {:+.4}%  oi_ratio {:.2}x  {}",
                    alert.symbol,
                    alert.metrics.funding_rate * 100.0,
                    alert.metrics.oi_ratio,
                    alert.tier
                );
            }
            println!(
                "{} symbols evaluated, {} alerts, {} with too little history",
                summary.evaluated,
                summary.alerts.len(),
                summary.insufficient_history
            );
            if !no_notify {
                let sent = monitor.notify_alerts(&summary.alerts).await;
                println!("{sent} alerts sent");
            }
        }

        Commands::Run => {
            let notifier = build_notifier(&config)?;
            let monitor = Monitor::new(
                config.clone(),
                client,
                store,
                notifier,
                Arc::new(MonitorState::new()),
            );
            info!("Monitor running. Press Ctrl+C to stop.");
            monitor.run_forever().await?;
            let totals = monitor.state().snapshot(0, 0);
            info!(
                collected = totals.collection_success,
                failed = totals.collection_errors,
                alerts_sent = totals.alerts_sent,
                uptime = %totals.uptime,
                "monitor stopped"
            );
        }

        Commands::Symbols { top } => {
            let lister = SymbolLister::new(&client);
            let symbols = match top {
                Some(n) => lister.top_by_volume(n).await?,
                None => lister.usdt_perpetuals().await?,
            };
            for s in &symbols {
                println!("{s}");
            }
            println!("{} symbols", symbols.len());
        }

        Commands::TestNotify => {
            let tg = config.telegram().map_err(|e: ConfigError| {
                error!("Set TELEGRAM_BOT_TOKEN and TELEGRAM_CHAT_ID to use test-notify");
                e
            })?;
            TelegramNotifier::new(tg)?
                .send_message(&message::test_message(Utc::now()))
                .await?;
            info!("Test message delivered");
        }
    }

    info!("perp-watch finished.");
    Ok(())
}
