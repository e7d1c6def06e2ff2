// =============================================================================
// Change Report — first-to-last movement over a trailing window
// =============================================================================

use std::fmt;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::store::SnapshotStore;
use crate::types::SnapshotRow;

/// Movement of one symbol between the oldest and newest row in the window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolChange {
    pub symbol: String,
    pub data_points: usize,
    pub oldest: DateTime<Utc>,
    pub latest: DateTime<Utc>,
    pub mark_price_change_pct: f64,
    pub basis_percent_change: Option<f64>,
    pub funding_rate_change: Option<f64>,
    pub oi_change_pct: Option<f64>,
    pub account_ratio_change: Option<f64>,
    pub taker_ratio_change: Option<f64>,
}

fn delta(first: Option<f64>, last: Option<f64>) -> Option<f64> {
    Some(last? - first?)
}

impl SymbolChange {
    /// `None` unless the window holds at least two rows.
    pub fn from_window(symbol: &str, rows: &[SnapshotRow]) -> Option<Self> {
        let (first, last) = match rows {
            [first, .., last] => (first, last),
            _ => return None,
        };

        let oi_change_pct = match (first.oi, last.oi) {
            (Some(a), Some(b)) if a != 0.0 => Some((b - a) / a * 100.0),
            (Some(_), Some(_)) => Some(0.0),
            _ => None,
        };

        Some(Self {
            symbol: symbol.to_string(),
            data_points: rows.len(),
            oldest: first.timestamp,
            latest: last.timestamp,
            mark_price_change_pct: (last.mark_price - first.mark_price) / first.mark_price * 100.0,
            basis_percent_change: delta(first.basis_percent, last.basis_percent),
            funding_rate_change: delta(first.last_funding_rate, last.last_funding_rate),
            oi_change_pct,
            account_ratio_change: delta(
                first.long_short_account_ratio,
                last.long_short_account_ratio,
            ),
            taker_ratio_change: delta(first.taker_buy_sell_ratio, last.taker_buy_sell_ratio),
        })
    }
}

/// A ranked list of symbols for one metric, biggest move first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ranking {
    pub title: &'static str,
    /// Suffix and precision used when printing values.
    pub unit: &'static str,
    pub precision: usize,
    pub entries: Vec<(String, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeReport {
    pub hours: i64,
    pub generated_at: DateTime<Utc>,
    pub symbols_analyzed: usize,
    pub rankings: Vec<Ranking>,
}

impl ChangeReport {
    /// Analyze every stored symbol over the `hours` before `now`.
    pub fn build(store: &SnapshotStore, now: DateTime<Utc>, hours: i64, top: usize) -> Result<Self> {
        if hours <= 0 {
            anyhow::bail!("report window must be at least one hour, got {hours}");
        }
        let cutoff = Duration::try_hours(hours)
            .and_then(|window| now.checked_sub_signed(window))
            .with_context(|| format!("report window of {hours} hours is out of range"))?;
        let mut changes = Vec::new();

        for symbol in store.symbols()? {
            let rows = match store.read_all(&symbol) {
                Ok(rows) => rows,
                Err(e) => {
                    debug!(symbol = %symbol, error = %e, "skipping unreadable data file");
                    continue;
                }
            };
            let start = rows.partition_point(|r| r.timestamp < cutoff);
            if let Some(change) = SymbolChange::from_window(&symbol, &rows[start..]) {
                changes.push(change);
            }
        }

        info!(symbols = changes.len(), hours, "change report built");
        Ok(Self::from_changes(&changes, now, hours, top))
    }

    pub fn from_changes(
        changes: &[SymbolChange],
        generated_at: DateTime<Utc>,
        hours: i64,
        top: usize,
    ) -> Self {
        type Metric = fn(&SymbolChange) -> Option<f64>;
        let price: Metric = |c| Some(c.mark_price_change_pct);
        let basis: Metric = |c| c.basis_percent_change;
        let funding: Metric = |c| c.funding_rate_change;
        let oi: Metric = |c| c.oi_change_pct;
        let metrics = [
            ("Price gainers", "Price losers", "%", 2, price),
            ("Basis widening", "Basis narrowing", "%", 4, basis),
            ("Funding rising", "Funding falling", "", 6, funding),
            ("OI growth", "OI decline", "%", 2, oi),
        ];

        let mut rankings = Vec::with_capacity(8);
        for (up_title, down_title, unit, precision, get) in metrics {
            let mut values: Vec<(String, f64)> = changes
                .iter()
                .filter_map(|c| get(c).filter(|v| v.is_finite()).map(|v| (c.symbol.clone(), v)))
                .collect();

            values.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            let up = values.iter().take(top).cloned().collect();
            values.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
            let down = values.into_iter().take(top).collect();

            rankings.push(Ranking { title: up_title, unit, precision, entries: up });
            rankings.push(Ranking { title: down_title, unit, precision, entries: down });
        }

        Self {
            hours,
            generated_at,
            symbols_analyzed: changes.len(),
            rankings,
        }
    }

    #[cfg(test)]
    pub fn ranking(&self, title: &str) -> Option<&Ranking> {
        self.rankings.iter().find(|r| r.title == title)
    }
}

impl fmt::Display for ChangeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(60);
        writeln!(f, "{rule}")?;
        writeln!(f, "Perpetual futures change report")?;
        writeln!(f, "Window:    last {} hours", self.hours)?;
        writeln!(f, "Generated: {}", self.generated_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(f, "Symbols:   {}", self.symbols_analyzed)?;
        writeln!(f, "{rule}")?;

        for ranking in &self.rankings {
            writeln!(f)?;
            writeln!(f, "{}:", ranking.title)?;
            if ranking.entries.is_empty() {
                writeln!(f, "   (no data)")?;
            }
            for (i, (symbol, value)) in ranking.entries.iter().enumerate() {
                writeln!(
                    f,
                    "  {:2}. {}: {:+.*}{}",
                    i + 1,
                    symbol,
                    ranking.precision,
                    value,
                    ranking.unit
                )?;
            }
        }
        Ok(())
    }
}
