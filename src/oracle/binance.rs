//! Binance kline REST source
//!
//! Polls the klines endpoint and derives the latest close plus a simple
//! moving average over the last `ma_period` closes.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::config::FeedConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::oracle::PriceSource;
use crate::types::PriceQuote;

#[derive(Debug, Clone)]
pub struct BinanceKlineSource {
    client: reqwest::Client,
    config: FeedConfig,
}

impl BinanceKlineSource {
    pub fn new(config: FeedConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client, config })
    }

    fn url(&self) -> String {
        format!(
            "{}?symbol={}&interval={}&limit={}",
            self.config.base_url, self.config.symbol, self.config.interval, self.config.ma_period
        )
    }
}

/// Build a quote from raw kline rows
/// (`[open_time, open, high, low, close, volume, close_time, ...]`).
pub fn quote_from_klines(
    klines: &[Vec<serde_json::Value>],
    ma_period: usize,
    as_of: DateTime<Utc>,
) -> TrackerResult<PriceQuote> {
    let closes: Vec<Option<f64>> = klines.iter().map(|kline| parse_close(kline)).collect();

    // The newest row must be usable; an older close would misprice the bar.
    let close_price = match closes.last() {
        Some(Some(close)) => *close,
        Some(None) => {
            return Err(TrackerError::TransientFeed(
                "latest kline has no usable close".to_string(),
            ))
        }
        None => {
            return Err(TrackerError::TransientFeed(
                "no klines in response".to_string(),
            ))
        }
    };

    let window: Vec<f64> = closes[closes.len().saturating_sub(ma_period.max(1))..]
        .iter()
        .flatten()
        .copied()
        .collect();
    let skipped = ma_period.max(1).min(closes.len()) - window.len();
    if skipped > 0 {
        tracing::warn!(skipped, "Ignoring unparseable kline closes in moving average");
    }
    let moving_average = window.iter().sum::<f64>() / window.len() as f64;

    Ok(PriceQuote {
        close_price,
        moving_average,
        as_of,
    })
}

fn parse_close(kline: &[serde_json::Value]) -> Option<f64> {
    let close = kline.get(4)?;
    // Binance sends prices as strings; accept plain numbers too.
    close
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .or_else(|| close.as_f64())
        .filter(|c| c.is_finite() && *c > 0.0)
}

#[async_trait]
impl PriceSource for BinanceKlineSource {
    fn name(&self) -> &'static str {
        "Binance"
    }

    async fn snapshot(&self) -> TrackerResult<PriceQuote> {
        let url = self.url();
        tracing::debug!(
            source = %"Binance",
            symbol = %self.config.symbol,
            interval = %self.config.interval,
            "Fetching klines"
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| TrackerError::TransientFeed(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(TrackerError::TransientFeed(format!(
                "Binance API returned error: {}",
                response.status()
            )));
        }

        let klines: Vec<Vec<serde_json::Value>> = response
            .json()
            .await
            .map_err(|e| TrackerError::TransientFeed(format!("bad klines payload: {e}")))?;

        quote_from_klines(&klines, self.config.ma_period, Utc::now())
    }
}
