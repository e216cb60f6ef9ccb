//! TrailBot - paper-trading position tracker
//!
//! Receives entry/exit signals over a webhook, monitors open positions
//! against a kline feed and books fee-adjusted P&L to a simulated account.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use trailbot::config::AppConfig;
use trailbot::monitor::MarketMonitor;
use trailbot::oracle::BinanceKlineSource;
use trailbot::persistence::FileLedger;
use trailbot::{PaperTracker, TrackerError};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "trailbot=info".into());
    let json = std::env::var("TRAILBOT_LOG_JSON")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = AppConfig::load()?;
    info!("🚀 TrailBot starting");
    info!("{}", config.digest());

    let ledger = Arc::new(
        FileLedger::new(
            config.persistence.positions_path(),
            config.persistence.trades_path(),
        )
        .context("Failed to open ledger")?,
    );
    info!(
        positions = %ledger.positions_path().display(),
        trades = %ledger.trades_path().display(),
        "📁 Ledger opened"
    );

    let tracker = Arc::new(
        PaperTracker::new(config.trading.clone(), ledger.clone())
            .with_max_persistence_failures(config.monitor.max_persistence_failures),
    );
    tracker.restore();
    info!("{}", tracker.summary_string());

    let source = Arc::new(BinanceKlineSource::new(config.feed.clone())?);
    let monitor = MarketMonitor::new(tracker.clone(), source, &config.monitor);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut monitor_handle = tokio::spawn(async move { monitor.run(shutdown_rx).await });

    // Serve until a shutdown signal, or until the monitor gives up on its own.
    let monitor_result = tokio::select! {
        served = serve(tracker.clone(), &config.server.bind_addr) => {
            served?;
            None
        }
        finished = &mut monitor_handle => Some(finished),
    };

    let _ = shutdown_tx.send(true);
    let monitor_result = match monitor_result {
        Some(result) => result,
        None => monitor_handle.await,
    }
    .context("Monitor task panicked")?;

    info!("Saving final state...");
    if let Err(e) = tracker.persist() {
        error!(error = %e, "Final snapshot failed");
    }

    if config.persistence.backup_on_exit {
        match ledger.backup_to(&config.persistence.backup_dir) {
            Ok(dir) => info!(dir = %dir.display(), "Backed up ledger"),
            Err(e) => warn!(error = %e, "Backup failed"),
        }
    }

    info!("{}", tracker.summary_string());

    match monitor_result {
        Err(e @ TrackerError::PersistenceFatal { .. }) => {
            error!(error = %e, "Exiting after repeated persistence failures");
            std::process::exit(2);
        }
        Err(e) => Err(e.into()),
        Ok(()) => {
            info!("Shutdown complete");
            Ok(())
        }
    }
}

#[cfg(feature = "webhook")]
async fn serve(tracker: Arc<PaperTracker>, bind_addr: &str) -> Result<()> {
    let app = trailbot::intake::webhook::create_router(tracker);
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    info!("🌐 Webhook listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Webhook server failed")?;
    info!("Server shutting down gracefully...");
    Ok(())
}

#[cfg(not(feature = "webhook"))]
async fn serve(_tracker: Arc<PaperTracker>, _bind_addr: &str) -> Result<()> {
    warn!("Built without the webhook feature; monitoring restored positions only");
    shutdown_signal().await;
    Ok(())
}
