//! Position Store
//!
//! In-memory position set (open and closed, insertion order). Not
//! synchronized on its own: `PaperTracker` keeps it behind the same lock as
//! the account so capacity checks and close transitions are atomic.

use chrono::{DateTime, Utc};

use crate::error::{TrackerError, TrackerResult};
use crate::types::{
    bar_index, Direction, ExitReason, Position, PositionId, PositionStatus, TradeRecord,
};

#[derive(Debug, Clone)]
pub struct PositionStore {
    positions: Vec<Position>,
    next_id: PositionId,
    fee_rate_per_side: f64,
    bar_width_secs: u64,
    max_open_positions: usize,
}

impl PositionStore {
    pub fn new(fee_rate_per_side: f64, bar_width_secs: u64, max_open_positions: usize) -> Self {
        Self {
            positions: Vec::new(),
            next_id: 1,
            fee_rate_per_side,
            bar_width_secs,
            max_open_positions,
        }
    }

    /// Replace the position set with a restored snapshot.
    /// Ids keep counting after the highest restored id.
    pub fn restore(&mut self, positions: Vec<Position>) {
        self.next_id = positions.iter().map(|p| p.id).max().unwrap_or(0) + 1;
        self.positions = positions;
    }

    /// Keep new ids clear of `id` (e.g. a position only the trade log knows).
    pub fn reserve_id(&mut self, id: PositionId) {
        self.next_id = self.next_id.max(id + 1);
    }

    /// Mark a restored position Closed from its booked trade row.
    ///
    /// Returns `true` when the position was still open. No P&L is applied:
    /// the trade row already carries it.
    pub fn settle_from_trade(&mut self, trade: &TradeRecord) -> bool {
        let fee = self.fee_rate_per_side;
        let Some(pos) = self
            .positions
            .iter_mut()
            .find(|p| p.id == trade.position_id && p.is_open())
        else {
            return false;
        };
        // Invert the exit fill to recover the market price.
        let market_exit_price = match pos.direction {
            Direction::Long => trade.exit_price / (1.0 - fee),
            Direction::Short => trade.exit_price / (1.0 + fee),
        };
        pos.status = PositionStatus::Closed;
        pos.exit_time = Some(trade.exit_time);
        pos.exit_price = Some(trade.exit_price);
        pos.market_exit_price = Some(market_exit_price);
        pos.exit_reason = Some(trade.exit_reason);
        true
    }

    pub fn max_open_positions(&self) -> usize {
        self.max_open_positions
    }

    pub fn open_count(&self) -> usize {
        self.positions.iter().filter(|p| p.is_open()).count()
    }

    /// Fee-adjusted entry: buying pays up, selling receives less.
    pub fn entry_fill(&self, direction: Direction, price: f64) -> f64 {
        match direction {
            Direction::Long => price * (1.0 + self.fee_rate_per_side),
            Direction::Short => price * (1.0 - self.fee_rate_per_side),
        }
    }

    /// Fee-adjusted exit, symmetric to [`entry_fill`](Self::entry_fill).
    pub fn exit_fill(&self, direction: Direction, price: f64) -> f64 {
        match direction {
            Direction::Long => price * (1.0 - self.fee_rate_per_side),
            Direction::Short => price * (1.0 + self.fee_rate_per_side),
        }
    }

    pub fn open(
        &mut self,
        direction: Direction,
        price: f64,
        time: DateTime<Utc>,
        size: f64,
    ) -> TrackerResult<PositionId> {
        if !(price.is_finite() && price > 0.0) {
            return Err(TrackerError::InvalidSignal(format!(
                "price must be positive, got {}",
                price
            )));
        }
        if !(size.is_finite() && size > 0.0) {
            return Err(TrackerError::InvalidSignal(format!(
                "size must be positive, got {}",
                size
            )));
        }
        if self.open_count() >= self.max_open_positions {
            return Err(TrackerError::CapacityExceeded {
                max: self.max_open_positions,
            });
        }

        let id = self.next_id;
        self.next_id += 1;
        self.positions.push(Position {
            id,
            direction,
            entry_time: time,
            entry_price: self.entry_fill(direction, price),
            market_entry_price: price,
            size,
            entry_bar_index: bar_index(time, self.bar_width_secs),
            max_profit_ratio: 0.0,
            status: PositionStatus::Open,
            exit_time: None,
            exit_price: None,
            market_exit_price: None,
            exit_reason: None,
        });
        Ok(id)
    }

    /// Transition an open position to Closed and return the closed snapshot.
    pub fn close(
        &mut self,
        id: PositionId,
        exit_price: f64,
        exit_time: DateTime<Utc>,
        reason: ExitReason,
    ) -> TrackerResult<Position> {
        let idx = self
            .positions
            .iter()
            .position(|p| p.id == id)
            .ok_or(TrackerError::NotFound(id))?;
        if !self.positions[idx].is_open() {
            return Err(TrackerError::AlreadyClosed(id));
        }

        let fill = self.exit_fill(self.positions[idx].direction, exit_price);
        let pos = &mut self.positions[idx];
        pos.status = PositionStatus::Closed;
        pos.exit_time = Some(exit_time);
        pos.exit_price = Some(fill);
        pos.market_exit_price = Some(exit_price);
        pos.exit_reason = Some(reason);
        Ok(pos.clone())
    }

    pub fn get(&self, id: PositionId) -> Option<&Position> {
        self.positions.iter().find(|p| p.id == id)
    }

    pub fn get_mut(&mut self, id: PositionId) -> Option<&mut Position> {
        self.positions.iter_mut().find(|p| p.id == id)
    }

    /// Ids of open positions in insertion order.
    pub fn open_ids(&self) -> Vec<PositionId> {
        self.positions
            .iter()
            .filter(|p| p.is_open())
            .map(|p| p.id)
            .collect()
    }

    /// Snapshot of open positions in insertion order.
    pub fn open_positions(&self) -> Vec<Position> {
        self.positions.iter().filter(|p| p.is_open()).cloned().collect()
    }

    /// Full position set, open and closed.
    pub fn all(&self) -> &[Position] {
        &self.positions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn open_applies_fee_and_bar_index() {
        let mut store = PositionStore::new(0.001, 300, 5);
        let long = store.open(Direction::Long, 100.0, t(900), 190.0).unwrap();
        let short = store.open(Direction::Short, 100.0, t(1199), 190.0).unwrap();

        let long = store.get(long).unwrap();
        assert!((long.entry_price - 100.1).abs() < 1e-9);
        assert_eq!(long.market_entry_price, 100.0);
        assert_eq!(long.entry_bar_index, 3);
        assert_eq!(long.max_profit_ratio, 0.0);
        assert!(long.is_open());

        let short = store.get(short).unwrap();
        assert!((short.entry_price - 99.9).abs() < 1e-9);
        assert_eq!(short.entry_bar_index, 3);
    }

    #[test]
    fn capacity_is_enforced_on_open_count() {
        let mut store = PositionStore::new(0.0, 300, 2);
        let a = store.open(Direction::Long, 100.0, t(0), 10.0).unwrap();
        store.open(Direction::Short, 100.0, t(0), 10.0).unwrap();
        assert!(matches!(
            store.open(Direction::Long, 100.0, t(0), 10.0),
            Err(TrackerError::CapacityExceeded { max: 2 })
        ));

        // Closing frees a slot; closed positions stay in the set.
        store.close(a, 101.0, t(300), ExitReason::Signal).unwrap();
        assert!(store.open(Direction::Long, 100.0, t(600), 10.0).is_ok());
        assert_eq!(store.all().len(), 3);
        assert_eq!(store.open_count(), 2);
    }

    #[test]
    fn close_is_guarded_against_double_close() {
        let mut store = PositionStore::new(0.0, 300, 5);
        let id = store.open(Direction::Long, 100.0, t(0), 10.0).unwrap();
        let closed = store.close(id, 105.0, t(300), ExitReason::Signal).unwrap();
        assert_eq!(closed.status, PositionStatus::Closed);
        assert_eq!(closed.exit_price, Some(105.0));

        assert!(matches!(
            store.close(id, 110.0, t(600), ExitReason::Signal),
            Err(TrackerError::AlreadyClosed(x)) if x == id
        ));
        assert_eq!(store.get(id).unwrap().exit_price, Some(105.0));
        assert!(matches!(
            store.close(99, 110.0, t(600), ExitReason::Signal),
            Err(TrackerError::NotFound(99))
        ));
    }

    #[test]
    fn exit_fill_is_symmetric_to_entry() {
        let mut store = PositionStore::new(0.001, 300, 5);
        let id = store.open(Direction::Short, 100.0, t(0), 10.0).unwrap();
        let closed = store.close(id, 100.0, t(300), ExitReason::Signal).unwrap();
        assert!((closed.exit_price.unwrap() - 100.1).abs() < 1e-9);
        assert_eq!(closed.market_exit_price, Some(100.0));
    }

    #[test]
    fn open_positions_keep_insertion_order() {
        let mut store = PositionStore::new(0.0, 300, 5);
        let a = store.open(Direction::Long, 100.0, t(0), 10.0).unwrap();
        let b = store.open(Direction::Short, 101.0, t(1), 10.0).unwrap();
        let c = store.open(Direction::Long, 102.0, t(2), 10.0).unwrap();
        store.close(b, 100.0, t(3), ExitReason::Signal).unwrap();

        assert_eq!(store.open_ids(), vec![a, c]);
        let open: Vec<_> = store.open_positions().iter().map(|p| p.id).collect();
        assert_eq!(open, vec![a, c]);
    }

    #[test]
    fn settle_from_trade_closes_stale_open_position() {
        let mut store = PositionStore::new(0.001, 300, 5);
        let id = store.open(Direction::Long, 100.0, t(0), 190.0).unwrap();
        let stale = store.all().to_vec();
        let closed = store.close(id, 110.0, t(900), ExitReason::Signal).unwrap();

        let trade = TradeRecord {
            trade_id: "t-1".to_string(),
            position_id: id,
            entry_time: closed.entry_time,
            exit_time: t(900),
            direction: Direction::Long,
            entry_price: closed.entry_price,
            exit_price: closed.exit_price.unwrap(),
            size: closed.size,
            gross_pnl: 0.0,
            fee: 0.0,
            net_pnl: 0.0,
            balance: 0.0,
            exit_reason: ExitReason::Signal,
            bars_held: 3,
        };

        let mut restored = PositionStore::new(0.001, 300, 5);
        restored.restore(stale);
        assert!(restored.settle_from_trade(&trade));
        assert!(!restored.settle_from_trade(&trade));

        let settled = restored.get(id).unwrap();
        assert_eq!(settled.status, PositionStatus::Closed);
        assert_eq!(settled.exit_price, closed.exit_price);
        assert!((settled.market_exit_price.unwrap() - 110.0).abs() < 1e-9);
        assert_eq!(settled.exit_reason, Some(ExitReason::Signal));
        assert_eq!(restored.open_count(), 0);
    }

    #[test]
    fn reserve_id_only_moves_forward() {
        let mut store = PositionStore::new(0.0, 300, 5);
        store.reserve_id(7);
        store.reserve_id(3);
        assert_eq!(store.open(Direction::Long, 100.0, t(0), 10.0).unwrap(), 8);
    }

    #[test]
    fn restore_continues_id_sequence() {
        let mut store = PositionStore::new(0.0, 300, 5);
        store.open(Direction::Long, 100.0, t(0), 10.0).unwrap();
        let saved = store.all().to_vec();

        let mut restored = PositionStore::new(0.0, 300, 5);
        restored.restore(saved);
        let id = restored.open(Direction::Long, 100.0, t(0), 10.0).unwrap();
        assert_eq!(id, 2);
    }

    #[test]
    fn rejects_non_positive_price_and_size() {
        let mut store = PositionStore::new(0.0, 300, 5);
        assert!(matches!(
            store.open(Direction::Long, 0.0, t(0), 10.0),
            Err(TrackerError::InvalidSignal(_))
        ));
        assert!(matches!(
            store.open(Direction::Long, 100.0, t(0), -1.0),
            Err(TrackerError::InvalidSignal(_))
        ));
    }
}
