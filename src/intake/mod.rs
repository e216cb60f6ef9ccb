//! Signal intake - turns external signals into tracker operations

mod signal;
#[cfg(feature = "webhook")]
pub mod webhook;

pub use signal::SignalCommand;

use tracing::{info, warn};

use crate::error::TrackerResult;
use crate::paper_trading::{OpenOutcome, PaperTracker};
use crate::types::TradeRecord;

#[derive(Debug, Clone)]
pub enum SignalOutcome {
    Opened(OpenOutcome),
    /// Empty when there was nothing open
    Closed(Vec<TradeRecord>),
}

/// Apply a parsed signal to the tracker.
pub fn dispatch(tracker: &PaperTracker, command: SignalCommand) -> TrackerResult<SignalOutcome> {
    match command {
        SignalCommand::Open {
            direction,
            price,
            time,
        } => match tracker.open_position(direction, price, time) {
            Ok(outcome) => Ok(SignalOutcome::Opened(outcome)),
            Err(e) => {
                warn!(direction = %direction, price, error = %e, "Entry signal rejected");
                Err(e)
            }
        },
        SignalCommand::Exit {
            price,
            time,
            reason,
        } => {
            let closed = tracker.close_all(price, time, reason)?;
            if closed.is_empty() {
                info!(price, "Exit signal with no open position");
            }
            Ok(SignalOutcome::Closed(closed))
        }
    }
}
