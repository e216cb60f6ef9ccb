//! Configuration management for TrailBot
//!
//! Loads from optional config files + environment variables via .env

mod types;

pub use types::*;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    pub trading: TradingConfig,
    pub monitor: MonitorConfig,
    pub feed: FeedConfig,
    pub persistence: PersistenceConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Trading defaults
            .set_default("trading.fee_rate_per_side", 0.0005)?
            .set_default("trading.hold_bars", 5)?
            .set_default("trading.force_exit_bars", 50)?
            .set_default("trading.max_open_positions", 5)?
            .set_default("trading.allow_multiple_positions", true)?
            .set_default("trading.bar_width_secs", 300)?
            .set_default("trading.initial_balance", 1000.0)?
            .set_default("trading.position_size_ratio", 0.19)?
            .set_default("trading.sizing", "fixed")?
            // Monitor defaults
            .set_default("monitor.poll_interval_secs", 300)?
            .set_default("monitor.retry_backoff_secs", 10)?
            .set_default("monitor.max_persistence_failures", 5)?
            // Feed defaults
            .set_default("feed.base_url", "https://fapi.binance.com/fapi/v1/klines")?
            .set_default("feed.symbol", "BTCUSDT")?
            .set_default("feed.interval", "5m")?
            .set_default("feed.ma_period", 20)?
            .set_default("feed.timeout_secs", 10)?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            .set_default("persistence.positions_file", "positions.json")?
            .set_default("persistence.trades_file", "trade_log.csv")?
            .set_default("persistence.backup_dir", "./data/backup_logs")?
            .set_default("persistence.backup_on_exit", true)?
            // Server defaults
            .set_default("server.bind_addr", "0.0.0.0:8080")?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (TRAILBOT__*)
            .add_source(Environment::with_prefix("TRAILBOT").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Reject values the tracker cannot operate with
    pub fn validate(&self) -> Result<()> {
        let t = &self.trading;
        if !(0.0..0.1).contains(&t.fee_rate_per_side) {
            bail!(
                "trading.fee_rate_per_side must be in [0, 0.1), got {}",
                t.fee_rate_per_side
            );
        }
        if t.hold_bars < 0 || t.force_exit_bars < t.hold_bars {
            bail!(
                "trading.hold_bars ({}) must be >= 0 and <= trading.force_exit_bars ({})",
                t.hold_bars,
                t.force_exit_bars
            );
        }
        if t.max_open_positions == 0 {
            bail!("trading.max_open_positions must be at least 1");
        }
        if t.bar_width_secs == 0 {
            bail!("trading.bar_width_secs must be positive");
        }
        if !(t.initial_balance > 0.0) {
            bail!("trading.initial_balance must be positive");
        }
        if !(t.position_size_ratio > 0.0 && t.position_size_ratio <= 1.0) {
            bail!(
                "trading.position_size_ratio must be in (0, 1], got {}",
                t.position_size_ratio
            );
        }
        if self.monitor.poll_interval_secs == 0 {
            bail!("monitor.poll_interval_secs must be positive");
        }
        if self.feed.ma_period == 0 {
            bail!("feed.ma_period must be at least 1");
        }
        Ok(())
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        let t = &self.trading;
        format!(
            "symbol={} fee={} hold={} force={} max_open={} multi={} bar={}s poll={}s balance={:.2} ratio={}",
            self.feed.symbol,
            t.fee_rate_per_side,
            t.hold_bars,
            t.force_exit_bars,
            t.max_open_positions,
            t.allow_multiple_positions,
            t.bar_width_secs,
            self.monitor.poll_interval_secs,
            t.initial_balance,
            t.position_size_ratio
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
