//! Core types used throughout TrailBot
//!
//! Defines positions, trade records, market snapshots and exit reasons.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier assigned to a position when it is opened.
pub type PositionId = u64;

/// Trading direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "long" | "buy" => Some(Direction::Long),
            "short" | "sell" => Some(Direction::Short),
            _ => None,
        }
    }

    /// Favorable move of `price` relative to `reference`, as a ratio of `reference`.
    pub fn profit_ratio(&self, reference: f64, price: f64) -> f64 {
        match self {
            Direction::Long => (price - reference) / reference,
            Direction::Short => (reference - price) / reference,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    MovingAverageCrossover,
    ForceExit,
    TrailingStop,
    /// Explicit exit signal from the intake boundary
    Signal,
    /// Closed to make room for a new entry when only one position is allowed
    Flip,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::MovingAverageCrossover => write!(f, "MA_CROSSOVER"),
            ExitReason::ForceExit => write!(f, "FORCE_EXIT"),
            ExitReason::TrailingStop => write!(f, "TRAILING_STOP"),
            ExitReason::Signal => write!(f, "SIGNAL"),
            ExitReason::Flip => write!(f, "FLIP"),
        }
    }
}

/// One simulated trade.
///
/// `entry_price` and `exit_price` are fee-adjusted; `market_entry_price`
/// keeps the raw signal price for gross P&L reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub direction: Direction,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub market_entry_price: f64,
    pub size: f64,
    pub entry_bar_index: i64,
    pub max_profit_ratio: f64,
    pub status: PositionStatus,
    #[serde(default)]
    pub exit_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exit_price: Option<f64>,
    #[serde(default)]
    pub market_exit_price: Option<f64>,
    #[serde(default)]
    pub exit_reason: Option<ExitReason>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Profit ratio of `price` against the fee-adjusted entry.
    pub fn profit_ratio(&self, price: f64) -> f64 {
        self.direction.profit_ratio(self.entry_price, price)
    }
}

/// Bar bucket for a timestamp: `floor(ts / bar_width_secs)`.
pub fn bar_index(time: DateTime<Utc>, bar_width_secs: u64) -> i64 {
    time.timestamp().div_euclid(bar_width_secs.max(1) as i64)
}

/// Latest market data from a price source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceQuote {
    pub close_price: f64,
    pub moving_average: f64,
    pub as_of: DateTime<Utc>,
}

impl PriceQuote {
    pub fn snapshot(&self, bar_width_secs: u64) -> MarketSnapshot {
        MarketSnapshot {
            close_price: self.close_price,
            moving_average: self.moving_average,
            current_bar_index: bar_index(self.as_of, bar_width_secs),
        }
    }
}

/// Inputs to an exit-policy evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketSnapshot {
    pub close_price: f64,
    pub moving_average: f64,
    pub current_bar_index: i64,
}

/// Ledger row written once when a position closes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id: String,
    pub position_id: PositionId,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub direction: Direction,
    pub entry_price: f64,
    pub exit_price: f64,
    pub size: f64,
    pub gross_pnl: f64,
    pub fee: f64,
    pub net_pnl: f64,
    pub balance: f64,
    pub exit_reason: ExitReason,
    pub bars_held: i64,
}

impl TradeRecord {
    /// Fee under the flat-deduction convention (both legs charged on notional).
    pub fn flat_fee(&self, fee_rate_per_side: f64) -> f64 {
        self.size * fee_rate_per_side * 2.0
    }

    pub fn is_win(&self) -> bool {
        self.net_pnl >= 0.0
    }
}
