// =============================================================================
// Shared types used across the perp-watch collector
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Column order of every per-symbol CSV file.
pub const CSV_HEADER: [&str; 12] = [
    "timestamp",
    "mark_price",
    "index_price",
    "basis",
    "basis_percent",
    "last_funding_rate",
    "next_funding_time",
    "oi",
    "long_short_account_ratio",
    "top_trader_account_ls_ratio",
    "top_trader_position_ls_ratio",
    "taker_buy_sell_ratio",
];

/// One collected snapshot of a perpetual contract.
///
/// Prices are mandatory. Every other metric comes from a separate endpoint
/// and is `None` when that endpoint failed during collection; `None` is
/// written as an empty CSV cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub timestamp: DateTime<Utc>,
    pub mark_price: f64,
    pub index_price: f64,
    pub basis: Option<f64>,
    pub basis_percent: Option<f64>,
    pub last_funding_rate: Option<f64>,
    pub next_funding_time: Option<i64>,
    pub oi: Option<f64>,
    pub long_short_account_ratio: Option<f64>,
    pub top_trader_account_ls_ratio: Option<f64>,
    pub top_trader_position_ls_ratio: Option<f64>,
    pub taker_buy_sell_ratio: Option<f64>,
}

impl SnapshotRow {
    /// Basis and basis percent for a mark/index pair. Both are `None` when
    /// the index price is unusable.
    pub fn basis_of(mark_price: f64, index_price: f64) -> (Option<f64>, Option<f64>) {
        if index_price <= 0.0 || !index_price.is_finite() {
            return (None, None);
        }
        let basis = mark_price - index_price;
        (Some(basis), Some(basis / index_price * 100.0))
    }
}

/// Capitalization bucket that selects the combinator of the alert rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapTier {
    /// Both rule legs must fire.
    Large,
    /// Either rule leg suffices. Unknown caps land here.
    Small,
}

impl CapTier {
    pub fn classify(market_cap: Option<f64>, threshold: f64) -> Self {
        match market_cap {
            Some(cap) if cap >= threshold => Self::Large,
            _ => Self::Small,
        }
    }
}

impl std::fmt::Display for CapTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Large => write!(f, "large-cap"),
            Self::Small => write!(f, "small-cap"),
        }
    }
}

/// Where the collection loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleStage {
    Idle,
    Collecting,
    Evaluating,
    Notifying,
}

impl Default for CycleStage {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for CycleStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Collecting => write!(f, "Collecting"),
            Self::Evaluating => write!(f, "Evaluating"),
            Self::Notifying => write!(f, "Notifying"),
        }
    }
}
