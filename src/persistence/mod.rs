//! Ledger Persistence Module
//!
//! Append-only CSV trade log plus a JSON snapshot of the full position set.
//! Every write is flushed before the writer lock is released.

use anyhow::{Context, Result};
use chrono::Utc;
use csv::{ReaderBuilder, WriterBuilder};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::error::{TrackerError, TrackerResult};
use crate::types::{Position, TradeRecord};

/// Durable record of closed trades and the current position set
pub trait Ledger: Send + Sync {
    /// Append one closed trade. Rows are never rewritten.
    fn append_trade(&self, record: &TradeRecord) -> TrackerResult<()>;

    /// Replace the stored position set.
    fn save_snapshot(&self, positions: &[Position]) -> TrackerResult<()>;

    /// Stored position set; missing, malformed or non-list data yields an empty set.
    fn load_snapshot(&self) -> Vec<Position>;

    /// All readable trade rows, oldest first.
    fn load_trades(&self) -> Vec<TradeRecord>;

    fn flush(&self) -> TrackerResult<()> {
        Ok(())
    }
}

/// File-backed ledger
pub struct FileLedger {
    positions_path: PathBuf,
    trades_path: PathBuf,
    trade_writer: Mutex<csv::Writer<std::fs::File>>,
    snapshot_lock: Mutex<()>,
}

impl FileLedger {
    /// Open (or create) the trade log and remember the snapshot location
    pub fn new(positions_path: impl Into<PathBuf>, trades_path: impl Into<PathBuf>) -> Result<Self> {
        let positions_path = positions_path.into();
        let trades_path = trades_path.into();

        for path in [&positions_path, &trades_path] {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create data directory {}", parent.display())
                    })?;
                }
            }
        }

        let trade_writer = Self::open_trade_log(&trades_path)?;

        Ok(Self {
            positions_path,
            trades_path,
            trade_writer: Mutex::new(trade_writer),
            snapshot_lock: Mutex::new(()),
        })
    }

    /// Open the trade log for appending. The header row is written only
    /// when the opened file is still empty.
    fn open_trade_log(path: &Path) -> Result<csv::Writer<std::fs::File>> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open trade log {}", path.display()))?;
        let is_empty = file
            .metadata()
            .with_context(|| format!("Failed to stat trade log {}", path.display()))?
            .len()
            == 0;

        Ok(WriterBuilder::new().has_headers(is_empty).from_writer(file))
    }

    pub fn positions_path(&self) -> &Path {
        &self.positions_path
    }

    pub fn trades_path(&self) -> &Path {
        &self.trades_path
    }

    /// Copy the trade log and snapshot into a timestamped folder under `backup_root`.
    pub fn backup_to(&self, backup_root: impl AsRef<Path>) -> Result<PathBuf> {
        self.flush().map_err(anyhow::Error::new)?;

        let backup_dir = backup_root
            .as_ref()
            .join(format!("backup_{}", Utc::now().format("%Y%m%d_%H%M%S_%3f")));
        fs::create_dir_all(&backup_dir)
            .with_context(|| format!("Failed creating backup dir {}", backup_dir.display()))?;

        let mut copied = 0usize;
        for src in [&self.trades_path, &self.positions_path] {
            if !src.exists() {
                continue;
            }
            let Some(name) = src.file_name() else {
                continue;
            };
            let dst = backup_dir.join(name);
            fs::copy(src, &dst).with_context(|| {
                format!("Failed copying {} to {}", src.display(), dst.display())
            })?;
            copied += 1;
        }

        info!(dir = %backup_dir.display(), files = copied, "Ledger backup written");
        Ok(backup_dir)
    }
}

impl Ledger for FileLedger {
    fn append_trade(&self, record: &TradeRecord) -> TrackerResult<()> {
        let mut writer = self
            .trade_writer
            .lock()
            .map_err(|_| TrackerError::persistence("trade writer lock poisoned"))?;
        writer
            .serialize(record)
            .map_err(|e| TrackerError::persistence(format!("Failed to write trade record: {e}")))?;
        writer
            .flush()
            .map_err(|e| TrackerError::persistence(format!("Failed to flush trade writer: {e}")))?;
        Ok(())
    }

    fn save_snapshot(&self, positions: &[Position]) -> TrackerResult<()> {
        let _guard = self
            .snapshot_lock
            .lock()
            .map_err(|_| TrackerError::persistence("snapshot lock poisoned"))?;

        let json = serde_json::to_string_pretty(positions).map_err(TrackerError::persistence)?;

        // Write-then-rename so a crash never leaves a half-written snapshot.
        let tmp = self.positions_path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| {
            TrackerError::persistence(format!("Failed to write {}: {e}", tmp.display()))
        })?;
        fs::rename(&tmp, &self.positions_path).map_err(|e| {
            TrackerError::persistence(format!(
                "Failed to replace {}: {e}",
                self.positions_path.display()
            ))
        })?;
        Ok(())
    }

    fn load_snapshot(&self) -> Vec<Position> {
        if !self.positions_path.exists() {
            info!(path = %self.positions_path.display(), "No position snapshot found, starting fresh");
            return Vec::new();
        }

        let raw = match fs::read_to_string(&self.positions_path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %self.positions_path.display(), error = %e, "Unreadable position snapshot, starting empty");
                return Vec::new();
            }
        };
        parse_snapshot(&raw)
    }

    fn load_trades(&self) -> Vec<TradeRecord> {
        let file = match std::fs::File::open(&self.trades_path) {
            Ok(f) => f,
            Err(_) => return Vec::new(),
        };

        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
        let mut trades = Vec::new();
        let mut skipped = 0usize;
        for row in reader.deserialize::<TradeRecord>() {
            match row {
                Ok(record) => trades.push(record),
                Err(e) => {
                    skipped += 1;
                    warn!(error = %e, "Skipping unreadable trade log row");
                }
            }
        }
        if skipped > 0 {
            warn!(skipped, loaded = trades.len(), "Trade log contained unreadable rows");
        }
        trades
    }

    fn flush(&self) -> TrackerResult<()> {
        let mut writer = self
            .trade_writer
            .lock()
            .map_err(|_| TrackerError::persistence("trade writer lock poisoned"))?;
        writer
            .flush()
            .map_err(|e| TrackerError::persistence(format!("Failed to flush trade writer: {e}")))
    }
}

/// Parse snapshot JSON. Non-list documents yield an empty set; list entries
/// that do not describe a valid position are dropped.
pub fn parse_snapshot(raw: &str) -> Vec<Position> {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Malformed position snapshot, starting empty");
            return Vec::new();
        }
    };

    let serde_json::Value::Array(items) = value else {
        warn!("Position snapshot is not a list, starting empty");
        return Vec::new();
    };

    let total = items.len();
    let positions: Vec<Position> = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<Position>(item) {
            Ok(p) if p.size > 0.0 && p.entry_price > 0.0 => Some(p),
            Ok(p) => {
                warn!(id = p.id, size = p.size, "Dropping persisted position with invalid size or price");
                None
            }
            Err(e) => {
                warn!(error = %e, "Dropping unreadable persisted position");
                None
            }
        })
        .collect();

    if positions.len() < total {
        warn!(kept = positions.len(), total, "Position snapshot partially restored");
    }
    positions
}

/// In-memory ledger for dry runs and tests
#[derive(Default)]
pub struct MemoryLedger {
    trades: Mutex<Vec<TradeRecord>>,
    snapshot: Mutex<Vec<Position>>,
    snapshot_writes: Mutex<usize>,
    fail_writes: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(positions: Vec<Position>) -> Self {
        let ledger = Self::default();
        if let Ok(mut snap) = ledger.snapshot.lock() {
            *snap = positions;
        }
        ledger
    }

    /// Make every subsequent write fail (simulates a broken medium).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn trades(&self) -> Vec<TradeRecord> {
        self.trades.lock().map(|t| t.clone()).unwrap_or_default()
    }

    pub fn snapshot(&self) -> Vec<Position> {
        self.snapshot.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn snapshot_writes(&self) -> usize {
        self.snapshot_writes.lock().map(|n| *n).unwrap_or(0)
    }

    fn check_writable(&self) -> TrackerResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TrackerError::persistence("simulated write failure"));
        }
        Ok(())
    }
}

impl Ledger for MemoryLedger {
    fn append_trade(&self, record: &TradeRecord) -> TrackerResult<()> {
        self.check_writable()?;
        self.trades
            .lock()
            .map_err(|_| TrackerError::persistence("trade lock poisoned"))?
            .push(record.clone());
        Ok(())
    }

    fn save_snapshot(&self, positions: &[Position]) -> TrackerResult<()> {
        self.check_writable()?;
        *self
            .snapshot
            .lock()
            .map_err(|_| TrackerError::persistence("snapshot lock poisoned"))? = positions.to_vec();
        if let Ok(mut n) = self.snapshot_writes.lock() {
            *n += 1;
        }
        Ok(())
    }

    fn load_snapshot(&self) -> Vec<Position> {
        self.snapshot()
    }

    fn load_trades(&self) -> Vec<TradeRecord> {
        self.trades()
    }
}
