// =============================================================================
// Cycle Driver — collect, store, evaluate, notify on a fixed interval
// =============================================================================
//
//   Idle ──tick──▶ Collecting ──▶ Evaluating ──▶ Notifying ──▶ Idle
//
// One task runs the cycles sequentially over every symbol. A second task
// logs the status report on its own interval, posts it when Telegram is
// configured, and only reads shared counters. A failure inside one symbol is logged and counted; the cycle
// moves on to the next symbol.
// =============================================================================

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::analysis::evaluator::EvaluationSummary;
use crate::analysis::{AlertEvent, AlertRule, Evaluator};
use crate::app_state::MonitorState;
use crate::futures_intel::{MarketDataSource, SnapshotFetcher, SupplyTableCaps, SymbolLister};
use crate::notify::{message, ChartRenderer, TelegramNotifier};
use crate::runtime_config::{MonitorConfig, SymbolSelection};
use crate::store::{PruneSummary, SnapshotStore};
use crate::types::CycleStage;

/// Rows of history drawn on an alert chart (one day at 5-minute cycles).
const CHART_HISTORY_ROWS: usize = 288;

/// What one cycle did.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub collected: usize,
    pub failed: usize,
    pub evaluation: EvaluationSummary,
    pub alerts_sent: usize,
    pub pruned: Option<PruneSummary>,
}

impl CycleReport {
    fn log(&self) {
        info!(
            collected = self.collected,
            failed = self.failed,
            alerts = self.evaluation.alerts.len(),
            alerts_sent = self.alerts_sent,
            rows_pruned = self.pruned.as_ref().map_or(0, |p| p.rows_removed),
            "cycle complete"
        );
    }
}

pub struct Monitor<S> {
    config: MonitorConfig,
    fetcher: SnapshotFetcher<S>,
    store: Arc<SnapshotStore>,
    notifier: Option<Arc<TelegramNotifier>>,
    charts: Option<ChartRenderer>,
    state: Arc<MonitorState>,
    /// The cached symbol list is the built-in fallback; resolve again next
    /// cycle.
    symbols_provisional: AtomicBool,
}

impl<S: MarketDataSource> Monitor<S> {
    pub fn new(
        config: MonitorConfig,
        source: S,
        store: Arc<SnapshotStore>,
        notifier: Option<TelegramNotifier>,
        state: Arc<MonitorState>,
    ) -> Self {
        let fetcher = SnapshotFetcher::new(source, Duration::from_millis(config.request_delay_ms));
        let charts = config
            .enable_charts
            .then(|| ChartRenderer::new(config.charts_dir.clone()));
        Self {
            config,
            fetcher,
            store,
            notifier: notifier.map(Arc::new),
            charts,
            state,
            symbols_provisional: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> &Arc<MonitorState> {
        &self.state
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    // -------------------------------------------------------------------------
    // Symbols
    // -------------------------------------------------------------------------

    /// Resolve the configured selection and cache it in the monitor state.
    pub async fn refresh_symbols(&self) -> Vec<String> {
        self.refresh_symbols_with(&self.config.symbols).await
    }

    pub async fn refresh_symbols_with(&self, selection: &SymbolSelection) -> Vec<String> {
        let resolved = SymbolLister::new(self.fetcher.source())
            .resolve(selection)
            .await;
        info!(
            count = resolved.symbols.len(),
            fallback = resolved.fallback,
            "symbol list refreshed"
        );
        self.symbols_provisional
            .store(resolved.fallback, Ordering::Relaxed);
        self.state.set_symbols(resolved.symbols.clone());
        resolved.symbols
    }

    /// Cached list, fetched on first use and again while only the fallback
    /// list is known.
    async fn symbols(&self) -> Vec<String> {
        let cached = self.state.symbols();
        if cached.is_empty() || self.symbols_provisional.load(Ordering::Relaxed) {
            self.refresh_symbols().await
        } else {
            cached
        }
    }

    // -------------------------------------------------------------------------
    // Stages
    // -------------------------------------------------------------------------

    /// Fetch and append one row per symbol. Returns (written, failed).
    pub async fn collect(&self, symbols: &[String]) -> (usize, usize) {
        self.state.set_stage(CycleStage::Collecting);
        let started = Instant::now();
        let (mut ok, mut failed) = (0, 0);

        for (symbol, res) in self.fetcher.fetch_many(symbols).await {
            let written = res.and_then(|row| self.store.append(&symbol, &row));
            match written {
                Ok(()) => ok += 1,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "symbol skipped this cycle");
                    self.state.push_error(Some(&symbol), format!("{e:#}"));
                    failed += 1;
                }
            }
        }

        self.state.record_collection(ok as u64, failed as u64);
        info!(
            written = ok,
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "collection finished"
        );
        (ok, failed)
    }

    /// Prune the store when it has outgrown the configured limit, announcing
    /// the cleanup before and after.
    pub async fn maintain_storage(&self) -> Result<Option<PruneSummary>> {
        let before = self.store.total_size_bytes()?;
        if before < self.config.data_size_limit_bytes {
            return Ok(None);
        }

        warn!(
            size_bytes = before,
            limit_bytes = self.config.data_size_limit_bytes,
            "data directory over limit, pruning"
        );
        self.post(&message::cleanup_started_message(
            before,
            self.config.data_size_limit_bytes,
        ))
        .await;

        let summary = self.store.prune(self.config.keep_rows)?;
        let after = self.store.total_size_bytes()?;
        let now = Utc::now();
        self.state.mark_cleanup(now);
        info!(
            files_pruned = summary.files_pruned,
            rows_removed = summary.rows_removed,
            size_after = after,
            "data cleanup finished"
        );
        self.post(&message::cleanup_finished_message(&summary, before, after, now))
            .await;

        Ok(Some(summary))
    }

    /// Run the alert rule over every stored symbol.
    pub async fn evaluate(&self) -> EvaluationSummary {
        self.state.set_stage(CycleStage::Evaluating);
        let symbols = match self.store.symbols() {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "cannot list stored symbols");
                return EvaluationSummary::default();
            }
        };

        let caps = SupplyTableCaps::new(self.fetcher.source());
        let evaluator = Evaluator::new(&self.store, AlertRule::from_config(&self.config));
        let summary = evaluator.evaluate_all(&symbols, &caps).await;
        info!(
            evaluated = summary.evaluated,
            alerts = summary.alerts.len(),
            insufficient_history = summary.insufficient_history,
            errors = summary.errors,
            "evaluation finished"
        );
        summary
    }

    /// Push every alert; returns how many posts succeeded.
    pub async fn notify_alerts(&self, alerts: &[AlertEvent]) -> usize {
        self.state.set_stage(CycleStage::Notifying);
        let Some(notifier) = &self.notifier else {
            if !alerts.is_empty() {
                warn!(alerts = alerts.len(), "Telegram not configured, alerts not sent");
            }
            return 0;
        };

        let rule = AlertRule::from_config(&self.config);
        let mut sent = 0;
        for alert in alerts {
            let now = Utc::now();
            let text = message::alert_message(alert, &rule, now);
            let chart = self.chart_for(alert, now);
            match notifier.send_with_chart(&text, chart.as_deref()).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    warn!(symbol = %alert.symbol, error = %e, "alert delivery failed");
                    self.state
                        .push_error(Some(&alert.symbol), format!("alert delivery: {e:#}"));
                }
            }
        }
        sent
    }

    fn chart_for(&self, alert: &AlertEvent, at: chrono::DateTime<Utc>) -> Option<PathBuf> {
        let renderer = self.charts.as_ref()?;
        let rows = match self.store.read_tail(&alert.symbol, CHART_HISTORY_ROWS) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(symbol = %alert.symbol, error = %e, "cannot read history for chart");
                return None;
            }
        };
        match renderer.write(
            &alert.symbol,
            &rows,
            alert.metrics.funding_rate,
            alert.metrics.oi_ratio,
            at,
        ) {
            Ok(path) => path,
            Err(e) => {
                warn!(symbol = %alert.symbol, error = %e, "chart rendering failed");
                None
            }
        }
    }

    /// Post a text message if Telegram is configured. Failures are logged.
    async fn post(&self, text: &str) -> bool {
        let Some(notifier) = &self.notifier else {
            return false;
        };
        match notifier.send_message(text).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Telegram post failed");
                false
            }
        }
    }

    // -------------------------------------------------------------------------
    // Cycle
    // -------------------------------------------------------------------------

    /// One full pass: collect, store maintenance, evaluate, notify.
    pub async fn run_cycle(&self) -> CycleReport {
        let span = info_span!("cycle", id = %Uuid::new_v4());
        async {
            let symbols = self.symbols().await;
            let (collected, failed) = self.collect(&symbols).await;

            let pruned = match self.maintain_storage().await {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "storage maintenance failed");
                    None
                }
            };

            let evaluation = self.evaluate().await;
            let alerts_sent = self.notify_alerts(&evaluation.alerts).await;
            self.state
                .record_alerts(evaluation.alerts.len() as u64, alerts_sent as u64);
            self.state.finish_cycle();

            let report = CycleReport {
                collected,
                failed,
                evaluation,
                alerts_sent,
                pruned,
            };
            report.log();
            report
        }
        .instrument(span)
        .await
    }

    pub fn status_reporter(&self) -> StatusReporter {
        StatusReporter {
            state: self.state.clone(),
            store: self.store.clone(),
            notifier: self.notifier.clone(),
            interval: Duration::from_secs(self.config.status_interval_secs),
        }
    }

    /// Cycle every `collection_interval` (first one immediately) until
    /// Ctrl-C.
    pub async fn run_forever(&self) -> Result<()> {
        let symbols = self.refresh_symbols().await;
        self.post(&message::startup_message(
            symbols.len(),
            self.config.collection_interval_secs,
            self.config.status_interval_secs,
            Utc::now(),
        ))
        .await;

        let status_task = self.status_reporter().spawn();

        let mut ticker = tokio::time::interval(Duration::from_secs(
            self.config.collection_interval_secs,
        ));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                res = &mut shutdown => {
                    if let Err(e) = res {
                        error!(error = %e, "failed to listen for Ctrl-C");
                    }
                    info!("shutdown requested, stopping monitor");
                    break;
                }
                _ = async {
                    ticker.tick().await;
                    self.run_cycle().await;
                } => {}
            }
        }

        status_task.abort();
        Ok(())
    }
}

// =============================================================================
// Status reporting
// =============================================================================

pub struct StatusReporter {
    state: Arc<MonitorState>,
    store: Arc<SnapshotStore>,
    notifier: Option<Arc<TelegramNotifier>>,
    interval: Duration,
}

impl StatusReporter {
    /// Log the status snapshot and post it to Telegram when configured.
    pub async fn report_once(&self) -> Result<()> {
        let files = self.store.symbols()?.len();
        let size = self.store.total_size_bytes()?;
        let snapshot = self.state.snapshot(files, size);
        info!(
            success = snapshot.collection_success,
            errors = snapshot.collection_errors,
            alerts_found = snapshot.alerts_found,
            alerts_sent = snapshot.alerts_sent,
            data_files = snapshot.data_files,
            data_size_bytes = snapshot.data_size_bytes,
            tracked_symbols = snapshot.tracked_symbols,
            uptime = %snapshot.uptime,
            healthy = snapshot.healthy,
            last_error = snapshot.last_error.as_deref().unwrap_or("-"),
            "status report"
        );

        if let Some(notifier) = &self.notifier {
            let text = message::status_message(&snapshot, self.interval.as_secs(), Utc::now());
            notifier.send_message(&text).await?;
            info!("status report sent to Telegram");
        }
        Ok(())
    }

    /// First report one interval after start.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(Instant::now() + self.interval, self.interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.report_once().await {
                    warn!(error = %e, "status report failed");
                }
            }
        })
    }
}
