//! Market Monitor
//!
//! Periodic loop: fetch one quote, run one evaluation pass over every open
//! position, log the running summary, sleep. Feed errors skip the cycle and
//! retry after a shorter backoff. The loop stops when the shutdown channel
//! flips to `true` or when persistence has failed too many times in a row.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::MonitorConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::oracle::PriceSource;
use crate::paper_trading::{CycleReport, PaperTracker};

pub struct MarketMonitor {
    tracker: Arc<PaperTracker>,
    source: Arc<dyn PriceSource>,
    poll_interval: Duration,
    retry_backoff: Duration,
}

impl MarketMonitor {
    pub fn new(
        tracker: Arc<PaperTracker>,
        source: Arc<dyn PriceSource>,
        config: &MonitorConfig,
    ) -> Self {
        Self::with_intervals(tracker, source, config.poll_interval(), config.retry_backoff())
    }

    pub fn with_intervals(
        tracker: Arc<PaperTracker>,
        source: Arc<dyn PriceSource>,
        poll_interval: Duration,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            tracker,
            source,
            poll_interval,
            retry_backoff,
        }
    }

    /// Fetch a quote and evaluate once.
    ///
    /// The quote is fetched before the tracker lock is taken, so a slow feed
    /// never blocks signal intake. Evaluation writes the ledger under the
    /// tracker lock and runs on the blocking pool.
    pub async fn run_cycle(&self) -> TrackerResult<CycleReport> {
        let quote = self.source.snapshot().await?;
        let tracker = self.tracker.clone();
        tokio::task::spawn_blocking(move || tracker.evaluate_cycle(&quote))
            .await
            .map_err(|e| TrackerError::TaskFailed(e.to_string()))?
    }

    /// Run until shutdown. Returns `Err` only on fatal persistence failure.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> TrackerResult<()> {
        info!(
            source = self.source.name(),
            poll_secs = self.poll_interval.as_secs_f64(),
            "Market monitor started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.run_cycle().await {
                Ok(report) => {
                    if !report.closed.is_empty() || report.failures > 0 {
                        info!(
                            evaluated = report.evaluated,
                            closed = report.closed.len(),
                            failures = report.failures,
                            "Monitor cycle complete"
                        );
                    }
                    info!("{}", self.tracker.summary_string());
                    self.poll_interval
                }
                Err(TrackerError::TransientFeed(msg)) => {
                    warn!(
                        source = self.source.name(),
                        error = %msg,
                        retry_secs = self.retry_backoff.as_secs_f64(),
                        "Price fetch failed, skipping cycle"
                    );
                    self.retry_backoff
                }
                Err(e @ TrackerError::PersistenceFatal { .. }) => {
                    error!(error = %e, "Stopping monitor");
                    return Err(e);
                }
                Err(e) => {
                    error!(error = %e, "Monitor cycle failed");
                    self.poll_interval
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    // Sender dropped counts as shutdown.
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Market monitor stopped");
        Ok(())
    }
}
