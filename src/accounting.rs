//! Accounting Engine
//!
//! Fee convention: fees are embedded in the priced legs. A position's
//! `entry_price`/`exit_price` are already fee-adjusted (see
//! [`PositionStore`](crate::store::PositionStore)), so
//!
//! - `net   = size * ratio(entry_price, exit_price)` (applied to balance)
//! - `gross = size * ratio(market_entry_price, market_exit_price)`
//! - `fee   = gross - net`
//!
//! The flat-deduction figure `size * fee_rate * 2` differs only by
//! second-order terms and is available as [`TradeRecord::flat_fee`].

use serde::{Deserialize, Serialize};

use crate::error::{TrackerError, TrackerResult};
use crate::types::{Position, TradeRecord};

/// Realized-only simulated capital
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub balance: f64,
}

impl Account {
    pub fn new(initial_balance: f64) -> Self {
        Self {
            balance: initial_balance,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AccountingEngine {
    bar_width_secs: u64,
}

impl AccountingEngine {
    pub fn new(bar_width_secs: u64) -> Self {
        Self { bar_width_secs }
    }

    /// Book a closed position: apply net P&L to the balance and build the ledger row.
    pub fn realize(&self, account: &mut Account, closed: &Position) -> TrackerResult<TradeRecord> {
        let (exit_time, exit_price, market_exit_price, exit_reason) = match (
            closed.exit_time,
            closed.exit_price,
            closed.market_exit_price,
            closed.exit_reason,
        ) {
            (Some(t), Some(p), Some(m), Some(r)) if !closed.is_open() => (t, p, m, r),
            _ => return Err(TrackerError::NotClosed(closed.id)),
        };

        let net_pnl = closed.size * closed.direction.profit_ratio(closed.entry_price, exit_price);
        let gross_pnl = closed.size
            * closed
                .direction
                .profit_ratio(closed.market_entry_price, market_exit_price);
        let fee = gross_pnl - net_pnl;

        account.balance += net_pnl;

        let bars_held = crate::types::bar_index(exit_time, self.bar_width_secs)
            - closed.entry_bar_index;

        Ok(TradeRecord {
            trade_id: uuid::Uuid::new_v4().to_string(),
            position_id: closed.id,
            entry_time: closed.entry_time,
            exit_time,
            direction: closed.direction,
            entry_price: closed.entry_price,
            exit_price,
            size: closed.size,
            gross_pnl,
            fee,
            net_pnl,
            balance: account.balance,
            exit_reason,
            bars_held,
        })
    }
}
