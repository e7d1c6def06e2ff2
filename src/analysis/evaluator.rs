// =============================================================================
// Anomaly Evaluator — short/long open-interest surge plus extreme funding
// =============================================================================
//
// For each symbol with at least 10 stored rows:
//
//   oi_ratio = mean(last 3 OI) / mean(last 10 OI)
//   funding  = |latest funding rate|
//
// Two legs, `funding > funding_threshold` and `oi_ratio > oi_ratio_threshold`,
// are combined by capitalization tier:
//
//   large-cap            =>  both legs must fire (AND)
//   small-cap / unknown  =>  either leg suffices (OR)
//
// The evaluation is a pure function of the stored window and the cap lookup.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::futures_intel::MarketCapSource;
use crate::runtime_config::MonitorConfig;
use crate::store::SnapshotStore;
use crate::types::{CapTier, SnapshotRow};

/// Rows in the long window; also the minimum history for evaluation.
pub const LONG_WINDOW: usize = 10;
/// Rows in the short window.
pub const SHORT_WINDOW: usize = 3;

/// Open-interest and funding figures of the most recent window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowMetrics {
    pub oi_mean_short: f64,
    pub oi_mean_long: f64,
    pub oi_ratio: f64,
    /// Signed latest funding rate.
    pub funding_rate: f64,
    pub current_oi: f64,
}

impl WindowMetrics {
    /// Compute metrics from the last `LONG_WINDOW` rows of `rows`.
    ///
    /// `None` for short histories, windows with a missing OI cell, or a
    /// zero long-window mean (ratio undefined).
    pub fn from_rows(rows: &[SnapshotRow]) -> Option<Self> {
        if rows.len() < LONG_WINDOW {
            return None;
        }
        let window = &rows[rows.len() - LONG_WINDOW..];
        let oi: Vec<f64> = window.iter().map(|r| r.oi).collect::<Option<_>>()?;

        let oi_mean_long = mean(&oi);
        let oi_mean_short = mean(&oi[LONG_WINDOW - SHORT_WINDOW..]);
        if oi_mean_long == 0.0 || !oi_mean_long.is_finite() {
            return None;
        }

        let latest = &window[LONG_WINDOW - 1];
        Some(Self {
            oi_mean_short,
            oi_mean_long,
            oi_ratio: oi_mean_short / oi_mean_long,
            funding_rate: latest.last_funding_rate.unwrap_or(0.0),
            current_oi: oi[LONG_WINDOW - 1],
        })
    }
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// A symbol that matched the rule this cycle. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub symbol: String,
    pub metrics: WindowMetrics,
    pub market_cap: Option<f64>,
    pub tier: CapTier,
    pub funding_triggered: bool,
    pub oi_triggered: bool,
}

/// Thresholds of the tiered rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertRule {
    pub funding_threshold: f64,
    pub oi_ratio_threshold: f64,
    pub market_cap_threshold: f64,
}

impl Default for AlertRule {
    fn default() -> Self {
        Self {
            funding_threshold: 0.001,
            oi_ratio_threshold: 2.0,
            market_cap_threshold: 100_000_000.0,
        }
    }
}

impl AlertRule {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            funding_threshold: config.funding_rate_threshold,
            oi_ratio_threshold: config.oi_ratio_threshold,
            market_cap_threshold: config.market_cap_threshold,
        }
    }

    /// (funding leg, OI leg)
    pub fn legs(&self, m: &WindowMetrics) -> (bool, bool) {
        (
            m.funding_rate.abs() > self.funding_threshold,
            m.oi_ratio > self.oi_ratio_threshold,
        )
    }

    /// Combine the legs for a tier.
    pub fn fires(&self, m: &WindowMetrics, tier: CapTier) -> bool {
        let (funding, oi) = self.legs(m);
        match tier {
            CapTier::Large => funding && oi,
            CapTier::Small => funding || oi,
        }
    }

    /// Build the alert for `symbol` if the rule fires under `market_cap`.
    pub fn classify(
        &self,
        symbol: &str,
        metrics: WindowMetrics,
        market_cap: Option<f64>,
    ) -> Option<AlertEvent> {
        let tier = CapTier::classify(market_cap, self.market_cap_threshold);
        if !self.fires(&metrics, tier) {
            return None;
        }
        let (funding_triggered, oi_triggered) = self.legs(&metrics);
        Some(AlertEvent {
            symbol: symbol.to_string(),
            metrics,
            market_cap,
            tier,
            funding_triggered,
            oi_triggered,
        })
    }
}

/// Counts from one evaluation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationSummary {
    pub alerts: Vec<AlertEvent>,
    pub evaluated: usize,
    pub insufficient_history: usize,
    pub errors: usize,
}

pub struct Evaluator<'a> {
    store: &'a SnapshotStore,
    rule: AlertRule,
}

impl<'a> Evaluator<'a> {
    pub fn new(store: &'a SnapshotStore, rule: AlertRule) -> Self {
        Self { store, rule }
    }

    /// Evaluate one symbol's stored window. `None` covers both "no alert"
    /// and "not enough history".
    pub async fn evaluate_window<C: MarketCapSource>(
        &self,
        symbol: &str,
        rows: &[SnapshotRow],
        caps: &C,
    ) -> Option<AlertEvent> {
        let metrics = WindowMetrics::from_rows(rows)?;

        let (funding, oi) = self.rule.legs(&metrics);
        if !funding && !oi {
            return None;
        }

        let market_cap = caps.market_cap(symbol).await;
        debug!(
            symbol,
            oi_ratio = format!("{:.3}", metrics.oi_ratio),
            funding = format!("{:.6}", metrics.funding_rate),
            market_cap = ?market_cap,
            "rule leg fired"
        );
        self.rule.classify(symbol, metrics, market_cap)
    }

    /// Evaluate every symbol in order; one symbol's failure is logged and
    /// counted without affecting the rest.
    pub async fn evaluate_all<C: MarketCapSource>(
        &self,
        symbols: &[String],
        caps: &C,
    ) -> EvaluationSummary {
        let mut summary = EvaluationSummary::default();

        for symbol in symbols {
            let rows = match self.store.read_tail(symbol, LONG_WINDOW) {
                Ok(rows) if rows.len() < LONG_WINDOW => {
                    summary.insufficient_history += 1;
                    continue;
                }
                Ok(rows) => rows,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "failed to read history");
                    summary.errors += 1;
                    continue;
                }
            };

            summary.evaluated += 1;
            if let Some(alert) = self.evaluate_window(symbol, &rows, caps).await {
                info!(
                    symbol = %symbol,
                    tier = %alert.tier,
                    funding = format!("{:.6}", alert.metrics.funding_rate),
                    oi_ratio = format!("{:.2}", alert.metrics.oi_ratio),
                    "alert condition met"
                );
                summary.alerts.push(alert);
            }
        }

        summary
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::row;
    use std::collections::HashMap;

    struct FixedCaps(HashMap<String, f64>);

    impl MarketCapSource for FixedCaps {
        async fn market_cap(&self, symbol: &str) -> Option<f64> {
            self.0.get(symbol).copied()
        }
    }

    fn caps(pairs: &[(&str, f64)]) -> FixedCaps {
        FixedCaps(pairs.iter().map(|(s, c)| (s.to_string(), *c)).collect())
    }

    /// Ten rows whose last three OI values are 300 and whose overall mean is
    /// 100, so the ratio is exactly 3.0.
    fn surge_rows(funding: f64) -> Vec<SnapshotRow> {
        let ois = [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 100.0, 300.0, 300.0, 300.0];
        ois.iter()
            .enumerate()
            .map(|(i, oi)| row(i as i64, *oi, funding))
            .collect()
    }

    fn flat_rows(n: usize, funding: f64) -> Vec<SnapshotRow> {
        (0..n).map(|i| row(i as i64, 1_000.0, funding)).collect()
    }

    #[test]
    fn ratio_matches_arithmetic() {
        let m = WindowMetrics::from_rows(&surge_rows(0.0)).unwrap();
        assert!((m.oi_mean_short - 300.0).abs() < 1e-9);
        assert!((m.oi_mean_long - 100.0).abs() < 1e-9);
        assert!((m.oi_ratio - 3.0).abs() < 1e-9);
        assert!((m.current_oi - 300.0).abs() < 1e-9);
    }

    #[test]
    fn only_last_ten_rows_count() {
        let mut rows = flat_rows(5, 0.0);
        for (i, r) in surge_rows(0.0).into_iter().enumerate() {
            let mut r = r;
            r.timestamp = row(5 + i as i64, 0.0, 0.0).timestamp;
            rows.push(r);
        }
        let m = WindowMetrics::from_rows(&rows).unwrap();
        assert!((m.oi_ratio - 3.0).abs() < 1e-9);
    }

    #[test]
    fn nine_rows_never_evaluate() {
        let mut rows = surge_rows(0.01);
        rows.remove(0);
        assert_eq!(rows.len(), 9);
        assert!(WindowMetrics::from_rows(&rows).is_none());
    }

    #[test]
    fn zero_long_mean_is_undefined() {
        let rows: Vec<_> = (0..10).map(|i| row(i, 0.0, 0.01)).collect();
        assert!(WindowMetrics::from_rows(&rows).is_none());
    }

    #[test]
    fn missing_oi_cell_is_undefined() {
        let mut rows = flat_rows(10, 0.0);
        rows[4].oi = None;
        assert!(WindowMetrics::from_rows(&rows).is_none());
    }

    #[test]
    fn funding_without_surge_depends_on_tier() {
        let rule = AlertRule::default();
        let m = WindowMetrics::from_rows(&flat_rows(10, 0.0015)).unwrap();
        assert!((m.oi_ratio - 1.0).abs() < 1e-12);

        // Large cap: AND rule not satisfied.
        assert!(rule.classify("BTCUSDT", m.clone(), Some(1e12)).is_none());
        // Small cap: OR rule satisfied.
        let alert = rule.classify("TINYUSDT", m.clone(), Some(1e6)).unwrap();
        assert_eq!(alert.tier, CapTier::Small);
        assert!(alert.funding_triggered);
        assert!(!alert.oi_triggered);
        // Unknown cap behaves as small cap.
        assert!(rule.classify("NEWUSDT", m, None).is_some());
    }

    #[test]
    fn negative_funding_counts_by_magnitude() {
        let rule = AlertRule::default();
        let m = WindowMetrics::from_rows(&flat_rows(10, -0.002)).unwrap();
        let alert = rule.classify("XUSDT", m, None).unwrap();
        assert!(alert.funding_triggered);
        assert!((alert.metrics.funding_rate + 0.002).abs() < 1e-12);
    }

    #[test]
    fn large_cap_needs_both_legs() {
        let rule = AlertRule::default();
        let both = WindowMetrics::from_rows(&surge_rows(0.002)).unwrap();
        let alert = rule.classify("BTCUSDT", both, Some(1e12)).unwrap();
        assert_eq!(alert.tier, CapTier::Large);
        assert!(alert.funding_triggered && alert.oi_triggered);

        let surge_only = WindowMetrics::from_rows(&surge_rows(0.0001)).unwrap();
        assert!(rule.classify("BTCUSDT", surge_only.clone(), Some(1e12)).is_none());
        assert!(rule.classify("SMALLUSDT", surge_only, Some(1e7)).is_some());
    }

    #[test]
    fn thresholds_are_strict() {
        let rule = AlertRule::default();
        let m = WindowMetrics::from_rows(&flat_rows(10, 0.001)).unwrap();
        assert_eq!(rule.legs(&m), (false, false));
    }

    #[tokio::test]
    async fn cap_lookup_only_when_a_leg_fires() {
        struct CountingCaps(parking_lot::Mutex<Vec<String>>);
        impl MarketCapSource for CountingCaps {
            async fn market_cap(&self, symbol: &str) -> Option<f64> {
                self.0.lock().push(symbol.to_string());
                None
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        let evaluator = Evaluator::new(&store, AlertRule::default());
        let caps = CountingCaps(parking_lot::Mutex::new(Vec::new()));

        assert!(evaluator
            .evaluate_window("QUIETUSDT", &flat_rows(10, 0.0), &caps)
            .await
            .is_none());
        assert!(evaluator
            .evaluate_window("PUMPUSDT", &surge_rows(0.0), &caps)
            .await
            .is_some());
        assert_eq!(*caps.0.lock(), vec!["PUMPUSDT"]);
    }

    #[tokio::test]
    async fn store_backed_evaluation_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        for r in flat_rows(10, 0.0015) {
            store.append("BTCUSDT", &r).unwrap();
            store.append("TINYUSDT", &r).unwrap();
        }
        for r in surge_rows(0.0) {
            store.append("PUMPUSDT", &r).unwrap();
        }
        for r in flat_rows(9, 0.05) {
            store.append("NEWUSDT", &r).unwrap();
        }

        let evaluator = Evaluator::new(&store, AlertRule::default());
        let caps = caps(&[("BTCUSDT", 1e12), ("TINYUSDT", 1e6)]);
        let symbols = store.symbols().unwrap();

        let first = evaluator.evaluate_all(&symbols, &caps).await;
        let second = evaluator.evaluate_all(&symbols, &caps).await;
        assert_eq!(first, second);

        let alerted: Vec<_> = first.alerts.iter().map(|a| a.symbol.as_str()).collect();
        assert_eq!(alerted, vec!["PUMPUSDT", "TINYUSDT"]);
        assert_eq!(first.insufficient_history, 1);
        assert_eq!(first.evaluated, 3);
        assert_eq!(first.errors, 0);
    }
}
