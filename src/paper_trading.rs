//! Paper Trading Tracker
//!
//! Owns the position store and the simulated account behind a single lock.
//! Both activity sources go through it:
//!
//! - **Signal intake** opens positions (or closes them on exit signals)
//! - **Market monitor** evaluates the exit policy once per polled quote
//!
//! Every mutation (open, close, high-water-mark update) happens under the
//! same `Mutex`, so capacity checks and close transitions are atomic. Ledger
//! writes happen inside the critical section and are flushed per write;
//! a failed write is logged and retried on the next write, while memory stays
//! authoritative.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

use crate::accounting::{Account, AccountingEngine};
use crate::config::{SizingMode, TradingConfig};
use crate::error::{TrackerError, TrackerResult};
use crate::exit_policy::{ExitDecision, ExitPolicy};
use crate::persistence::Ledger;
use crate::store::PositionStore;
use crate::types::{Direction, ExitReason, Position, PositionId, PriceQuote, TradeRecord};

const DEFAULT_MAX_PERSISTENCE_FAILURES: u32 = 5;

// ─────────────────────────────────────────────────────────────────
// Stats
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackerStats {
    pub total_trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub total_pnl: f64,
    pub total_fees: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub exits_ma_crossover: u32,
    pub exits_force_exit: u32,
    pub exits_trailing_stop: u32,
    pub exits_signal: u32,
    pub exits_flip: u32,
}

impl TrackerStats {
    fn record(&mut self, trade: &TradeRecord) {
        self.total_trades += 1;
        if trade.is_win() {
            self.wins += 1;
            self.largest_win = self.largest_win.max(trade.net_pnl);
        } else {
            self.losses += 1;
            self.largest_loss = self.largest_loss.min(trade.net_pnl);
        }
        self.total_pnl += trade.net_pnl;
        self.total_fees += trade.fee;
        match trade.exit_reason {
            ExitReason::MovingAverageCrossover => self.exits_ma_crossover += 1,
            ExitReason::ForceExit => self.exits_force_exit += 1,
            ExitReason::TrailingStop => self.exits_trailing_stop += 1,
            ExitReason::Signal => self.exits_signal += 1,
            ExitReason::Flip => self.exits_flip += 1,
        }
    }

    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            0.0
        } else {
            self.wins as f64 / self.total_trades as f64 * 100.0
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Results
// ─────────────────────────────────────────────────────────────────

/// Result of an accepted entry signal
#[derive(Debug, Clone)]
pub struct OpenOutcome {
    pub id: PositionId,
    pub size: f64,
    /// Positions closed first because only one position may be open
    pub flipped: Vec<TradeRecord>,
}

/// Result of one monitor evaluation pass
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub evaluated: usize,
    pub closed: Vec<TradeRecord>,
    pub failures: usize,
}

/// Stale closes (already closed, unknown id) are routine under races.
fn log_close_failure(id: PositionId, e: &TrackerError, msg: &str) {
    if e.is_stale() {
        debug!(id, error = %e, "{}", msg);
    } else {
        warn!(id, error = %e, "{}", msg);
    }
}

fn validate_price(price: f64) -> TrackerResult<()> {
    if price.is_finite() && price > 0.0 {
        Ok(())
    } else {
        Err(TrackerError::InvalidSignal(format!(
            "price must be positive, got {}",
            price
        )))
    }
}

// ─────────────────────────────────────────────────────────────────
// Tracker
// ─────────────────────────────────────────────────────────────────

struct TrackerState {
    store: PositionStore,
    account: Account,
    stats: TrackerStats,
    /// Trades booked in memory but not yet in the ledger
    pending_trades: VecDeque<TradeRecord>,
    persistence_failures: u32,
    last_persistence_error: String,
}

pub struct PaperTracker {
    config: TradingConfig,
    policy: ExitPolicy,
    accounting: AccountingEngine,
    max_persistence_failures: u32,
    state: Mutex<TrackerState>,
    ledger: Arc<dyn Ledger>,
}

impl PaperTracker {
    pub fn new(config: TradingConfig, ledger: Arc<dyn Ledger>) -> Self {
        let store = PositionStore::new(
            config.fee_rate_per_side,
            config.bar_width_secs,
            config.effective_max_open(),
        );
        let account = Account::new(config.initial_balance);
        Self {
            policy: ExitPolicy::from(&config),
            accounting: AccountingEngine::new(config.bar_width_secs),
            max_persistence_failures: DEFAULT_MAX_PERSISTENCE_FAILURES,
            state: Mutex::new(TrackerState {
                store,
                account,
                stats: TrackerStats::default(),
                pending_trades: VecDeque::new(),
                persistence_failures: 0,
                last_persistence_error: String::new(),
            }),
            ledger,
            config,
        }
    }

    /// Consecutive persistence failures tolerated before the monitor gives up
    pub fn with_max_persistence_failures(mut self, max: u32) -> Self {
        self.max_persistence_failures = max.max(1);
        self
    }

    fn lock_state(&self) -> MutexGuard<'_, TrackerState> {
        // A panic mid-update cannot leave a half-applied close: every field is
        // written after the fallible steps, so the inner state is still usable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Restore positions from the ledger snapshot and replay realized P&L
    /// from the trade log. Returns the number of open positions restored.
    ///
    /// The trade log wins over the snapshot: a position the snapshot still
    /// shows as open but whose trade row exists was closed before the
    /// snapshot could be rewritten, so it is settled from that row.
    pub fn restore(&self) -> usize {
        let positions = self.ledger.load_snapshot();
        let trades = self.ledger.load_trades();

        let mut state = self.lock_state();
        state.store.restore(positions);

        let mut account = Account::new(self.config.initial_balance);
        let mut stats = TrackerStats::default();
        let mut settled = 0usize;
        for trade in &trades {
            account.balance += trade.net_pnl;
            stats.record(trade);
            state.store.reserve_id(trade.position_id);
            if state.store.settle_from_trade(trade) {
                settled += 1;
            }
        }
        state.account = account;
        state.stats = stats;

        if settled > 0 {
            warn!(
                settled,
                "Snapshot was behind the trade log; closed positions settled from trade rows"
            );
            self.save_snapshot_locked(&mut state);
        }

        let open = state.store.open_count();
        info!(
            positions = state.store.all().len(),
            open,
            trades = trades.len(),
            balance = %format!("{:.2}", state.account.balance),
            "Tracker state restored"
        );
        if open > state.store.max_open_positions() {
            warn!(
                open,
                max = state.store.max_open_positions(),
                "Restored more open positions than the configured cap; new entries blocked until some close"
            );
        }
        open
    }

    // ── Signal intake ───────────────────────────────────────────

    /// Open a position from an entry signal.
    pub fn open_position(
        &self,
        direction: Direction,
        price: f64,
        time: DateTime<Utc>,
    ) -> TrackerResult<OpenOutcome> {
        validate_price(price)?;

        let mut state = self.lock_state();

        let mut flipped = Vec::new();
        if !self.config.allow_multiple_positions {
            for id in state.store.open_ids() {
                match self.close_locked(&mut state, id, price, time, ExitReason::Flip) {
                    Ok(trade) => flipped.push(trade),
                    Err(e) => log_close_failure(id, &e, "Failed to flip position"),
                }
            }
        }

        let size = match self.config.sizing {
            SizingMode::Fixed => self.config.initial_balance * self.config.position_size_ratio,
            SizingMode::Compounding => state.account.balance * self.config.position_size_ratio,
        };

        let id = match state.store.open(direction, price, time, size) {
            Ok(id) => id,
            Err(e) => {
                if !flipped.is_empty() {
                    self.save_snapshot_locked(&mut state);
                }
                return Err(e);
            }
        };
        self.save_snapshot_locked(&mut state);

        if let Some(pos) = state.store.get(id) {
            info!(
                id,
                direction = %direction,
                price,
                entry_price = pos.entry_price,
                size,
                bar = pos.entry_bar_index,
                open = state.store.open_count(),
                "Position opened"
            );
        }

        Ok(OpenOutcome { id, size, flipped })
    }

    /// Close one position at `price`.
    pub fn close_position(
        &self,
        id: PositionId,
        price: f64,
        time: DateTime<Utc>,
        reason: ExitReason,
    ) -> TrackerResult<TradeRecord> {
        validate_price(price)?;
        let mut state = self.lock_state();
        let trade = self
            .close_locked(&mut state, id, price, time, reason)
            .map_err(|e| {
                log_close_failure(id, &e, "Close request rejected");
                e
            })?;
        self.save_snapshot_locked(&mut state);
        Ok(trade)
    }

    /// Close every open position (exit signal without a target id).
    pub fn close_all(
        &self,
        price: f64,
        time: DateTime<Utc>,
        reason: ExitReason,
    ) -> TrackerResult<Vec<TradeRecord>> {
        validate_price(price)?;

        let mut state = self.lock_state();
        let mut closed = Vec::new();
        for id in state.store.open_ids() {
            match self.close_locked(&mut state, id, price, time, reason) {
                Ok(trade) => closed.push(trade),
                Err(e) => log_close_failure(id, &e, "Failed to close position on exit signal"),
            }
        }
        if !closed.is_empty() {
            self.save_snapshot_locked(&mut state);
        }
        Ok(closed)
    }

    // ── Market monitor ──────────────────────────────────────────

    /// Run the exit policy over every open position for one quote.
    ///
    /// Per-position failures are logged and counted; the only error returned
    /// is [`TrackerError::PersistenceFatal`].
    pub fn evaluate_cycle(&self, quote: &PriceQuote) -> TrackerResult<CycleReport> {
        let snapshot = quote.snapshot(self.config.bar_width_secs);
        let mut report = CycleReport::default();

        let mut state = self.lock_state();
        for id in state.store.open_ids() {
            report.evaluated += 1;

            let eval = match state.store.get_mut(id) {
                Some(pos) => self.policy.evaluate_detailed(pos, &snapshot),
                None => {
                    report.failures += 1;
                    warn!(id, "Open position vanished during evaluation");
                    continue;
                }
            };

            debug!(
                id,
                bars_held = eval.bars_held,
                profit_ratio = eval.profit_ratio,
                max_profit_ratio = eval.max_profit_ratio,
                trail_percent = eval.trail_percent,
                decision = ?eval.decision,
                "Position evaluated"
            );

            if let ExitDecision::Close(reason) = eval.decision {
                match self.close_locked(&mut state, id, quote.close_price, quote.as_of, reason) {
                    Ok(trade) => report.closed.push(trade),
                    Err(e) => {
                        report.failures += 1;
                        error!(id, reason = %reason, error = %e, "Failed to close position");
                    }
                }
            }
        }

        // One snapshot per cycle, also persisting high-water-mark updates.
        self.save_snapshot_locked(&mut state);

        if state.persistence_failures >= self.max_persistence_failures {
            return Err(TrackerError::PersistenceFatal {
                failures: state.persistence_failures,
                last: state.last_persistence_error.clone(),
            });
        }
        Ok(report)
    }

    // ── Internals (state lock held) ─────────────────────────────

    fn close_locked(
        &self,
        state: &mut TrackerState,
        id: PositionId,
        price: f64,
        time: DateTime<Utc>,
        reason: ExitReason,
    ) -> TrackerResult<TradeRecord> {
        let closed = state.store.close(id, price, time, reason)?;
        let trade = self.accounting.realize(&mut state.account, &closed)?;

        state.stats.record(&trade);
        state.pending_trades.push_back(trade.clone());
        self.flush_pending_locked(state);

        info!(
            id,
            direction = %trade.direction,
            reason = %reason,
            entry_price = trade.entry_price,
            exit_price = trade.exit_price,
            bars_held = trade.bars_held,
            net_pnl = %format!("{:+.4}", trade.net_pnl),
            balance = %format!("{:.2}", trade.balance),
            "Position closed"
        );
        Ok(trade)
    }

    /// Write queued trades in order; stop at the first failure.
    fn flush_pending_locked(&self, state: &mut TrackerState) {
        while let Some(trade) = state.pending_trades.front() {
            match self.ledger.append_trade(trade) {
                Ok(()) => {
                    state.pending_trades.pop_front();
                    state.persistence_failures = 0;
                }
                Err(e) => {
                    state.persistence_failures += 1;
                    state.last_persistence_error = e.to_string();
                    error!(
                        error = %e,
                        pending = state.pending_trades.len(),
                        failures = state.persistence_failures,
                        "Trade log append failed, will retry"
                    );
                    break;
                }
            }
        }
    }

    fn save_snapshot_locked(&self, state: &mut TrackerState) {
        self.flush_pending_locked(state);
        match self.ledger.save_snapshot(state.store.all()) {
            Ok(()) => {
                if state.pending_trades.is_empty() {
                    state.persistence_failures = 0;
                }
            }
            Err(e) => {
                state.persistence_failures += 1;
                state.last_persistence_error = e.to_string();
                error!(
                    error = %e,
                    failures = state.persistence_failures,
                    "Position snapshot write failed, memory remains authoritative"
                );
            }
        }
    }

    /// Persist the current position set (used on shutdown).
    pub fn persist(&self) -> TrackerResult<()> {
        let mut state = self.lock_state();
        self.flush_pending_locked(&mut state);
        if !state.pending_trades.is_empty() {
            return Err(TrackerError::persistence(format!(
                "{} trades could not be written",
                state.pending_trades.len()
            )));
        }
        self.ledger.save_snapshot(state.store.all())?;
        self.ledger.flush()
    }

    // ── Queries ─────────────────────────────────────────────────

    pub fn config(&self) -> &TradingConfig {
        &self.config
    }

    pub fn balance(&self) -> f64 {
        self.lock_state().account.balance
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.lock_state().store.open_positions()
    }

    pub fn open_position_count(&self) -> usize {
        self.lock_state().store.open_count()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.lock_state().store.all().to_vec()
    }

    pub fn get_stats(&self) -> TrackerStats {
        self.lock_state().stats.clone()
    }

    pub fn pending_trade_count(&self) -> usize {
        self.lock_state().pending_trades.len()
    }

    pub fn summary_string(&self) -> String {
        let state = self.lock_state();
        let stats = &state.stats;
        format!(
            "📋 Paper: ${:.2} bal | {}/{} ({:.0}% WR) | P&L: ${:+.2} | fees: ${:.2} | {} open",
            state.account.balance,
            stats.wins,
            stats.total_trades,
            stats.win_rate(),
            stats.total_pnl,
            stats.total_fees,
            state.store.open_count()
        )
    }
}
