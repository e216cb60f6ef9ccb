//! Oracle module - market data for the exit policy
//!
//! A price source returns the latest close and a trailing moving average
//! for the tracked instrument. Failures are transient: the monitor skips the
//! cycle and retries later.

mod binance;

pub use binance::{quote_from_klines, BinanceKlineSource};

use async_trait::async_trait;

use crate::error::TrackerResult;
use crate::types::PriceQuote;

/// Trait for price source clients
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Get the source name
    fn name(&self) -> &'static str;

    /// Latest close and moving average
    async fn snapshot(&self) -> TrackerResult<PriceQuote>;
}
