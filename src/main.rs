use anyhow::{Context, Result};
use colored::Colorize;
use dispersion_monitor::broadcast::MonitorEvent;
use dispersion_monitor::config::{AppConfig, RunMode};
use dispersion_monitor::expiry::{ExpirySource, monitoring_window};
use dispersion_monitor::models::{MoneynessLevel, Settings};
use dispersion_monitor::monitor::{
    self, Clock, MarketMonitor, SharedMonitor, StartOutcome, SystemClock,
};
use dispersion_monitor::nse::NseQuoteProvider;
use dispersion_monitor::store::{MarketStore, SqliteMarketStore};
use dispersion_monitor::{api_server_axum, logging};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

fn banner(title: &str) {
    println!("{}", "=".repeat(60).blue());
    println!("{}", title.green().bold());
    println!("{}", "=".repeat(60).blue());
    println!();
}

async fn build_monitor(config: &AppConfig) -> Result<SharedMonitor> {
    let store = SqliteMarketStore::new(&config.database_url).await?;
    let provider = NseQuoteProvider::new(config.quote_timeout)?;

    let monitor = MarketMonitor::new(
        config.basket.clone(),
        Arc::new(provider),
        Arc::new(store),
        config.monitor_config(),
        Arc::new(SystemClock),
    )
    .await?;
    Ok(monitor)
}

/// HTTP API with the background monitor
async fn run_server(config: AppConfig) -> Result<()> {
    banner("BankNifty Dispersion Monitor");

    let monitor = build_monitor(&config).await?;
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

    if config.auto_start {
        let outcome = monitor.start_monitoring().await;
        print_start_outcome(&outcome);
    } else {
        println!(
            "{} Monitoring is inactive. POST /api/start-monitoring to begin",
            "ℹ".blue()
        );
    }

    let stale_task = tokio::spawn(monitor::stale_monitor_task(
        Arc::clone(&monitor),
        shutdown_rx,
    ));

    println!("{} API: http://127.0.0.1:{}", "→".cyan(), config.port);
    println!("{} Events: http://127.0.0.1:{}/api/events", "→".cyan(), config.port);
    println!();

    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
        info!("shutdown requested");
        let _ = shutdown_tx.send(());
    };

    api_server_axum::start_server(Arc::clone(&monitor), config.port, shutdown).await?;

    monitor.shutdown().await;
    if let Err(e) = stale_task.await {
        error!(error = %e, "stale monitor task ended abnormally");
    }

    println!("{}", "Stopped".green().bold());
    Ok(())
}

/// First cycle printed to the terminal
async fn run_once(config: AppConfig) -> Result<()> {
    banner("Dispersion Snapshot");

    let monitor = build_monitor(&config).await?;
    let (_, mut events) = monitor.subscribe();

    let outcome = monitor.start_monitoring().await;
    print_start_outcome(&outcome);
    if !outcome.is_active() {
        return Ok(());
    }

    let wait = config.quote_timeout * 2;
    let snapshot = tokio::time::timeout(wait, async {
        loop {
            match events.recv().await {
                Ok(MonitorEvent::DataUpdate(snapshot)) => return Some(*snapshot),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten();
    monitor.shutdown().await;

    let Some(snapshot) = snapshot else {
        anyhow::bail!("no cycle completed within {}s", wait.as_secs());
    };

    println!(
        "{} Instruments quoted: {} / {}",
        "✓".green(),
        snapshot.constituents.len() + usize::from(!snapshot.index.levels.is_empty()),
        config.basket.constituents.len() + 1
    );
    println!("{} BankNifty spot: {:.2}", "ℹ".blue(), snapshot.index.spot);
    for level in MoneynessLevel::ALL {
        let net = snapshot.net_premium.get(&level).copied().unwrap_or(0.0);
        let priced = if snapshot.premium_breakdown.contains_key(&level) {
            String::new()
        } else {
            " (not priced)".yellow().to_string()
        };
        println!("  {:<5} net premium: ₹{:>12.2}{}", level, net, priced);
    }
    println!();

    let alerts = monitor.recent_alerts().await;
    if alerts.is_empty() {
        println!("{} No alerts", "ℹ".blue());
    } else {
        for alert in &alerts {
            println!("{} {}", "⚠".red(), alert.message);
        }
    }
    println!(
        "{} Persisted: {}",
        "ℹ".blue(),
        snapshot.last_persisted_at.is_some()
    );

    Ok(())
}

/// Expiry and monitoring window for today
async fn show_expiry(config: AppConfig) -> Result<()> {
    banner("Expiry Calendar");

    let store = SqliteMarketStore::new(&config.database_url).await?;
    let settings = store.get_settings().await?.unwrap_or_else(Settings::default);

    let window = monitoring_window(SystemClock.today(), settings.monitoring_days);
    let source = match window.expiry.source {
        ExpirySource::Computed => "last Thursday of month".green(),
        ExpirySource::Fallback => "fallback, today + 30 days".yellow(),
    };

    println!("{} Next expiry: {} ({})", "✓".green(), window.expiry.date, source);
    println!("{} Days to expiry: {}", "ℹ".blue(), window.days_to_expiry);
    println!("{} Monitoring window: {} days", "ℹ".blue(), window.monitoring_days);
    if window.within_window {
        println!("{}", "Inside monitoring window".green().bold());
    } else {
        println!(
            "{} Monitoring opens in {} days",
            "⏱".yellow(),
            window.days_to_expiry - window.monitoring_days as i64
        );
    }
    Ok(())
}

fn print_start_outcome(outcome: &StartOutcome) {
    match outcome {
        StartOutcome::OutsideWindow { .. } => println!("{} {}", "⏱".yellow(), outcome.message()),
        _ => println!("{} {}", "✓".green(), outcome.message()),
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    logging::init_logging();

    let config = AppConfig::from_env().context("invalid configuration")?;
    info!(mode = ?config.mode, basket = config.basket.constituents.len(), "starting");

    match config.mode {
        RunMode::Server => run_server(config).await,
        RunMode::Once => run_once(config).await,
        RunMode::Expiry => show_expiry(config).await,
    }
}
