//! Exit Policy
//!
//! Decides, for one open position and one market snapshot, whether to hold
//! or close. Checks run in a fixed order and the first match wins:
//!
//! 1. **Force exit**: held for `force_exit_bars` or more, regardless of P&L
//!    or hold time.
//! 2. **MA crossover**: after `hold_bars`, close on the wrong side of the
//!    moving average (below for longs, above for shorts).
//! 3. **Trailing stop**: after `hold_bars`, profit has retraced half of the
//!    trail step from its best level.
//!
//! The best favorable excursion (`max_profit_ratio`) is raised on every
//! evaluation, including Hold cycles and cycles before `hold_bars` elapse.

use crate::config::TradingConfig;
use crate::types::{Direction, ExitReason, MarketSnapshot, Position};

/// Trail step table, evaluated top-down: (max profit above, trail percent).
const TRAIL_STEPS: [(f64, f64); 5] = [
    (0.05, 0.05),
    (0.04, 0.04),
    (0.03, 0.03),
    (0.02, 0.02),
    (0.01, 0.01),
];
const TRAIL_FLOOR: f64 = 0.005;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExitDecision {
    Hold,
    Close(ExitReason),
}

/// Intermediate values of one evaluation, kept for logging.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub decision: ExitDecision,
    pub bars_held: i64,
    pub profit_ratio: f64,
    pub max_profit_ratio: f64,
    pub trail_percent: f64,
}

/// Trail width for a given best profit ratio.
pub fn trail_percent(max_profit_ratio: f64) -> f64 {
    TRAIL_STEPS
        .iter()
        .find(|(threshold, _)| max_profit_ratio > *threshold)
        .map(|(_, pct)| *pct)
        .unwrap_or(TRAIL_FLOOR)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitPolicy {
    pub hold_bars: i64,
    pub force_exit_bars: i64,
}

impl Default for ExitPolicy {
    fn default() -> Self {
        Self {
            hold_bars: 5,
            force_exit_bars: 50,
        }
    }
}

impl From<&TradingConfig> for ExitPolicy {
    fn from(cfg: &TradingConfig) -> Self {
        Self {
            hold_bars: cfg.hold_bars,
            force_exit_bars: cfg.force_exit_bars,
        }
    }
}

impl ExitPolicy {
    pub fn new(hold_bars: i64, force_exit_bars: i64) -> Self {
        Self {
            hold_bars,
            force_exit_bars,
        }
    }

    /// Evaluate and return only the decision.
    pub fn evaluate(&self, position: &mut Position, snapshot: &MarketSnapshot) -> ExitDecision {
        self.evaluate_detailed(position, snapshot).decision
    }

    /// Evaluate one position. Raises `position.max_profit_ratio` as a side effect.
    pub fn evaluate_detailed(&self, position: &mut Position, snapshot: &MarketSnapshot) -> Evaluation {
        let bars_held = snapshot.current_bar_index - position.entry_bar_index;
        let hold_elapsed = bars_held >= self.hold_bars;
        let force_exit = bars_held >= self.force_exit_bars;

        let profit_ratio = position.profit_ratio(snapshot.close_price);
        if profit_ratio > position.max_profit_ratio {
            position.max_profit_ratio = profit_ratio;
        }
        let max_profit_ratio = position.max_profit_ratio;

        let trail = trail_percent(max_profit_ratio);
        let trail_triggered = profit_ratio <= max_profit_ratio - trail / 2.0;

        let ma_exit = match position.direction {
            Direction::Long => snapshot.close_price < snapshot.moving_average,
            Direction::Short => snapshot.close_price > snapshot.moving_average,
        };

        let decision = if force_exit {
            ExitDecision::Close(ExitReason::ForceExit)
        } else if hold_elapsed && ma_exit {
            ExitDecision::Close(ExitReason::MovingAverageCrossover)
        } else if hold_elapsed && trail_triggered {
            ExitDecision::Close(ExitReason::TrailingStop)
        } else {
            ExitDecision::Hold
        };

        Evaluation {
            decision,
            bars_held,
            profit_ratio,
            max_profit_ratio,
            trail_percent: trail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PositionStatus;
    use chrono::Utc;

    fn position(direction: Direction, entry_price: f64) -> Position {
        Position {
            id: 1,
            direction,
            entry_time: Utc::now(),
            entry_price,
            market_entry_price: entry_price,
            size: 190.0,
            entry_bar_index: 0,
            max_profit_ratio: 0.0,
            status: PositionStatus::Open,
            exit_time: None,
            exit_price: None,
            market_exit_price: None,
            exit_reason: None,
        }
    }

    fn snap(close_price: f64, moving_average: f64, bar: i64) -> MarketSnapshot {
        MarketSnapshot {
            close_price,
            moving_average,
            current_bar_index: bar,
        }
    }

    #[test]
    fn trail_table_steps_top_down() {
        assert_eq!(trail_percent(0.07), 0.05);
        assert_eq!(trail_percent(0.045), 0.04);
        assert_eq!(trail_percent(0.035), 0.03);
        assert_eq!(trail_percent(0.025), 0.02);
        assert_eq!(trail_percent(0.015), 0.01);
        assert_eq!(trail_percent(0.01), 0.005);
        assert_eq!(trail_percent(0.0), 0.005);
        assert_eq!(trail_percent(-0.2), 0.005);
    }

    #[test]
    fn long_ma_crossover_after_hold() {
        let policy = ExitPolicy::default();
        let mut pos = position(Direction::Long, 100.0);
        assert_eq!(
            policy.evaluate(&mut pos, &snap(95.0, 100.0, 5)),
            ExitDecision::Close(ExitReason::MovingAverageCrossover)
        );
    }

    #[test]
    fn ma_crossover_waits_for_hold_bars() {
        let policy = ExitPolicy::default();
        let mut pos = position(Direction::Long, 100.0);
        assert_eq!(
            policy.evaluate(&mut pos, &snap(95.0, 100.0, 4)),
            ExitDecision::Hold
        );
    }

    #[test]
    fn short_trailing_stop_scenario() {
        let policy = ExitPolicy::default();
        let mut pos = position(Direction::Short, 100.0);

        // Earlier cycle pushes the high-water mark to 7%.
        assert_eq!(
            policy.evaluate(&mut pos, &snap(93.0, 95.0, 3)),
            ExitDecision::Hold
        );
        assert!((pos.max_profit_ratio - 0.07).abs() < 1e-12);

        // Still at the peak: 0.07 <= 0.045 is false.
        assert_eq!(
            policy.evaluate(&mut pos, &snap(93.0, 95.0, 6)),
            ExitDecision::Hold
        );

        // Retrace to 2.5% profit with price still under the MA.
        let eval = policy.evaluate_detailed(&mut pos, &snap(97.5, 99.0, 7));
        assert_eq!(eval.trail_percent, 0.05);
        assert!((eval.profit_ratio - 0.025).abs() < 1e-12);
        assert_eq!(eval.decision, ExitDecision::Close(ExitReason::TrailingStop));
    }

    #[test]
    fn trailing_stop_never_fires_before_hold() {
        let policy = ExitPolicy::default();
        let mut pos = position(Direction::Long, 100.0);
        policy.evaluate(&mut pos, &snap(106.0, 100.0, 1));
        let eval = policy.evaluate_detailed(&mut pos, &snap(101.0, 100.0, 4));
        assert!(eval.profit_ratio <= eval.max_profit_ratio - eval.trail_percent / 2.0);
        assert_eq!(eval.decision, ExitDecision::Hold);
    }

    #[test]
    fn force_exit_overrides_hold_and_loss() {
        let policy = ExitPolicy::new(60, 50);
        let mut pos = position(Direction::Long, 100.0);
        assert_eq!(
            policy.evaluate(&mut pos, &snap(80.0, 70.0, 50)),
            ExitDecision::Close(ExitReason::ForceExit)
        );

        // Also wins over an MA exit that fires on the same cycle.
        let policy = ExitPolicy::default();
        let mut pos = position(Direction::Long, 100.0);
        assert_eq!(
            policy.evaluate(&mut pos, &snap(90.0, 100.0, 51)),
            ExitDecision::Close(ExitReason::ForceExit)
        );
    }

    #[test]
    fn ma_crossover_wins_over_trailing_stop() {
        let policy = ExitPolicy::default();
        let mut pos = position(Direction::Long, 100.0);
        policy.evaluate(&mut pos, &snap(110.0, 100.0, 2));
        assert_eq!(
            policy.evaluate(&mut pos, &snap(101.0, 102.0, 6)),
            ExitDecision::Close(ExitReason::MovingAverageCrossover)
        );
    }

    #[test]
    fn high_water_mark_is_monotone() {
        let policy = ExitPolicy::new(1_000, 10_000);
        let mut pos = position(Direction::Short, 100.0);
        let path = [99.0, 97.0, 101.0, 96.5, 120.0, 98.0, 50.0, 75.0];
        let mut last = pos.max_profit_ratio;
        for (bar, price) in path.iter().enumerate() {
            policy.evaluate(&mut pos, &snap(*price, *price, bar as i64));
            assert!(pos.max_profit_ratio >= last);
            last = pos.max_profit_ratio;
        }
        assert!((last - 0.5).abs() < 1e-12);
    }

    #[test]
    fn underwater_position_keeps_zero_high_water_mark() {
        let policy = ExitPolicy::default();
        let mut pos = position(Direction::Long, 100.0);
        policy.evaluate(&mut pos, &snap(90.0, 80.0, 1));
        assert_eq!(pos.max_profit_ratio, 0.0);
    }
}
