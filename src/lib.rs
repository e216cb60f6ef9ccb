//! TrailBot Library
//!
//! Paper-trading position tracker: signal-driven entries, MA-crossover /
//! trailing-stop / force exits, fee-adjusted accounting.

pub mod accounting;
pub mod config;
pub mod error;
pub mod exit_policy;
pub mod intake;
pub mod monitor;
pub mod oracle;
pub mod paper_trading;
pub mod persistence;
pub mod store;
pub mod types;

pub use error::{TrackerError, TrackerResult};
pub use paper_trading::PaperTracker;
