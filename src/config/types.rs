//! Configuration section types

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// How the notional of a new position is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizingMode {
    /// `initial_balance * position_size_ratio` for every entry
    Fixed,
    /// `balance * position_size_ratio`, follows realized P&L
    Compounding,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    /// Fee charged on each leg (e.g., 0.0005 = 0.05%)
    pub fee_rate_per_side: f64,
    /// Bars a position must be held before MA/trailing exits may fire
    pub hold_bars: i64,
    /// Bars after which a position is closed unconditionally
    pub force_exit_bars: i64,
    /// Maximum concurrently open positions
    pub max_open_positions: usize,
    /// When false, a new entry closes every open position first (flip)
    pub allow_multiple_positions: bool,
    /// Bar width in seconds
    pub bar_width_secs: u64,
    /// Starting simulated balance
    pub initial_balance: f64,
    /// Fraction of the sizing base committed per position
    pub position_size_ratio: f64,
    pub sizing: SizingMode,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            fee_rate_per_side: 0.0005,
            hold_bars: 5,
            force_exit_bars: 50,
            max_open_positions: 5,
            allow_multiple_positions: true,
            bar_width_secs: 300,
            initial_balance: 1000.0,
            position_size_ratio: 0.19,
            sizing: SizingMode::Fixed,
        }
    }
}

impl TradingConfig {
    /// Cap on open positions after applying the flip policy.
    pub fn effective_max_open(&self) -> usize {
        if self.allow_multiple_positions {
            self.max_open_positions
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between evaluation cycles
    pub poll_interval_secs: u64,
    /// Seconds to wait after a failed price fetch
    pub retry_backoff_secs: u64,
    /// Consecutive persistence failures tolerated before giving up
    pub max_persistence_failures: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 300,
            retry_backoff_secs: 10,
            max_persistence_failures: 5,
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Kline REST endpoint
    pub base_url: String,
    pub symbol: String,
    /// Kline interval label (e.g., "5m")
    pub interval: String,
    /// Number of closes averaged into the moving average
    pub ma_period: usize,
    pub timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: "https://fapi.binance.com/fapi/v1/klines".to_string(),
            symbol: "BTCUSDT".to_string(),
            interval: "5m".to_string(),
            ma_period: 20,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Data directory
    pub data_dir: String,
    /// Position snapshot file name (JSON, inside `data_dir`)
    pub positions_file: String,
    /// Trade log file name (CSV, inside `data_dir`)
    pub trades_file: String,
    /// Where shutdown backups are written
    pub backup_dir: String,
    pub backup_on_exit: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            positions_file: "positions.json".to_string(),
            trades_file: "trade_log.csv".to_string(),
            backup_dir: "./data/backup_logs".to_string(),
            backup_on_exit: true,
        }
    }
}

impl PersistenceConfig {
    pub fn positions_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(&self.positions_file)
    }

    pub fn trades_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(&self.trades_file)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the webhook listens on
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}
