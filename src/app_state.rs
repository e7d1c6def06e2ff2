// =============================================================================
// Monitor State — shared counters between the cycle driver and status task
// =============================================================================
//
// The collection loop is the only writer. The status task takes a
// `StatusSnapshot` every report interval.
//
// Thread safety:
//   - Atomic counters for the run statistics.
//   - parking_lot::RwLock for the symbol cache, stage and error log.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::types::CycleStage;

/// A recorded failure for the status report.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    /// Symbol the failure belongs to, if any.
    pub symbol: Option<String>,
    /// ISO 8601 timestamp.
    pub at: String,
}

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;

/// Point-in-time copy of the run statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub collection_success: u64,
    pub collection_errors: u64,
    pub alerts_found: u64,
    pub alerts_sent: u64,
    pub data_files: usize,
    pub data_size_bytes: u64,
    pub last_cleanup: Option<DateTime<Utc>>,
    pub tracked_symbols: usize,
    pub uptime: String,
    pub healthy: bool,
    /// Most recent failure as `SYMBOL: message`.
    pub last_error: Option<String>,
}

pub struct MonitorState {
    // ── Run statistics ──────────────────────────────────────────────────
    pub collection_success: AtomicU64,
    pub collection_errors: AtomicU64,
    pub alerts_found: AtomicU64,
    pub alerts_sent: AtomicU64,

    // ── Cycle ───────────────────────────────────────────────────────────
    pub stage: RwLock<CycleStage>,
    /// Successful rows written in the most recent finished cycle.
    pub last_cycle_success: RwLock<Option<u64>>,
    pub last_cleanup: RwLock<Option<DateTime<Utc>>>,

    // ── Symbols ─────────────────────────────────────────────────────────
    /// Tradable list, fetched once and refreshed on demand.
    pub symbols: RwLock<Vec<String>>,

    // ── Error log ───────────────────────────────────────────────────────
    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    pub start_time: Instant,
}

impl Default for MonitorState {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorState {
    pub fn new() -> Self {
        Self {
            collection_success: AtomicU64::new(0),
            collection_errors: AtomicU64::new(0),
            alerts_found: AtomicU64::new(0),
            alerts_sent: AtomicU64::new(0),
            stage: RwLock::new(CycleStage::Idle),
            last_cycle_success: RwLock::new(None),
            last_cleanup: RwLock::new(None),
            symbols: RwLock::new(Vec::new()),
            recent_errors: RwLock::new(Vec::new()),
            start_time: Instant::now(),
        }
    }

    pub fn set_stage(&self, stage: CycleStage) {
        *self.stage.write() = stage;
    }

    #[cfg(test)]
    pub fn stage(&self) -> CycleStage {
        *self.stage.read()
    }

    pub fn record_collection(&self, success: u64, errors: u64) {
        self.collection_success.fetch_add(success, Ordering::Relaxed);
        self.collection_errors.fetch_add(errors, Ordering::Relaxed);
        *self.last_cycle_success.write() = Some(success);
    }

    pub fn record_alerts(&self, found: u64, sent: u64) {
        self.alerts_found.fetch_add(found, Ordering::Relaxed);
        self.alerts_sent.fetch_add(sent, Ordering::Relaxed);
    }

    pub fn finish_cycle(&self) {
        self.set_stage(CycleStage::Idle);
    }

    pub fn mark_cleanup(&self, at: DateTime<Utc>) {
        *self.last_cleanup.write() = Some(at);
    }

    pub fn set_symbols(&self, symbols: Vec<String>) {
        *self.symbols.write() = symbols;
    }

    pub fn symbols(&self) -> Vec<String> {
        self.symbols.read().clone()
    }

    /// Record an error. The ring buffer is capped at [`MAX_RECENT_ERRORS`].
    pub fn push_error(&self, symbol: Option<&str>, message: String) {
        let record = ErrorRecord {
            message,
            symbol: symbol.map(str::to_string),
            at: Utc::now().to_rfc3339(),
        };
        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
    }

    /// Healthy until a finished cycle wrote no rows at all.
    pub fn is_healthy(&self) -> bool {
        !matches!(*self.last_cycle_success.read(), Some(0))
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Build a snapshot; the store figures are passed in by the caller.
    pub fn snapshot(&self, data_files: usize, data_size_bytes: u64) -> StatusSnapshot {
        StatusSnapshot {
            collection_success: self.collection_success.load(Ordering::Relaxed),
            collection_errors: self.collection_errors.load(Ordering::Relaxed),
            alerts_found: self.alerts_found.load(Ordering::Relaxed),
            alerts_sent: self.alerts_sent.load(Ordering::Relaxed),
            data_files,
            data_size_bytes,
            last_cleanup: *self.last_cleanup.read(),
            tracked_symbols: self.symbols.read().len(),
            uptime: format_uptime(self.uptime()),
            healthy: self.is_healthy(),
            last_error: self.recent_errors.read().last().map(|e| match &e.symbol {
                Some(symbol) => format!("{symbol}: {} ({})", e.message, e.at),
                None => format!("{} ({})", e.message, e.at),
            }),
        }
    }
}

/// `93784s` -> `1d 2h 3m`
pub fn format_uptime(d: Duration) -> String {
    let secs = d.as_secs();
    let (days, hours, mins) = (secs / 86_400, (secs % 86_400) / 3_600, (secs % 3_600) / 60);
    if days > 0 {
        format!("{days}d {hours}h {mins}m")
    } else if hours > 0 {
        format!("{hours}h {mins}m")
    } else {
        format!("{mins}m {}s", secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_formatting() {
        assert_eq!(format_uptime(Duration::from_secs(42)), "0m 42s");
        assert_eq!(format_uptime(Duration::from_secs(3_900)), "1h 5m");
        assert_eq!(format_uptime(Duration::from_secs(93_784)), "1d 2h 3m");
    }

    #[test]
    fn counters_accumulate_across_cycles() {
        let state = MonitorState::new();
        state.record_collection(8, 2);
        state.record_collection(10, 0);
        state.record_alerts(3, 2);
        state.set_symbols(vec!["A".into(), "B".into()]);

        let s = state.snapshot(2, 4096);
        assert_eq!(s.collection_success, 18);
        assert_eq!(s.collection_errors, 2);
        assert_eq!(s.alerts_found, 3);
        assert_eq!(s.alerts_sent, 2);
        assert_eq!(s.tracked_symbols, 2);
        assert!(s.healthy);
        assert!(s.last_cleanup.is_none());
        assert!(s.last_error.is_none());

        state.push_error(Some("BTCUSDT"), "timeout".into());
        let s = state.snapshot(2, 4096);
        assert!(s.last_error.unwrap().starts_with("BTCUSDT: timeout"));
    }

    #[test]
    fn empty_cycle_is_unhealthy() {
        let state = MonitorState::new();
        assert!(state.is_healthy());
        state.record_collection(0, 5);
        assert!(!state.is_healthy());
    }

    #[test]
    fn error_log_is_bounded() {
        let state = MonitorState::new();
        for i in 0..60 {
            state.push_error(Some("BTCUSDT"), format!("e{i}"));
        }
        let errors = state.recent_errors.read();
        assert_eq!(errors.len(), MAX_RECENT_ERRORS);
        assert_eq!(errors[0].message, "e10");
    }

    #[test]
    fn stage_round_trip() {
        let state = MonitorState::new();
        state.set_stage(CycleStage::Evaluating);
        assert_eq!(state.stage(), CycleStage::Evaluating);
        state.finish_cycle();
        assert_eq!(state.stage(), CycleStage::Idle);
    }
}
