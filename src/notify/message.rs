// =============================================================================
// Telegram message bodies (HTML parse mode)
// =============================================================================
//
// Pure formatting: every function takes the clock as an argument so the
// output is deterministic under test.

use chrono::{DateTime, Utc};

use crate::analysis::{AlertEvent, AlertRule};
use crate::app_state::StatusSnapshot;
use crate::store::PruneSummary;
use crate::types::CapTier;

const TIME_FMT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// `1234567.8` -> `1,234,568`
pub fn group_thousands(value: f64) -> String {
    let rounded = value.round();
    let digits = format!("{:.0}", rounded.abs());
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if rounded < 0.0 {
        out.insert(0, '-');
    }
    out
}

/// Escape text interpolated into an HTML-mode message.
pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

pub fn format_market_cap(cap: f64) -> String {
    if cap >= 1e9 {
        format!("${:.2}B", cap / 1e9)
    } else if cap >= 1e6 {
        format!("${:.2}M", cap / 1e6)
    } else {
        format!("${}", group_thousands(cap))
    }
}

/// Human-readable byte count (`1536` -> `1.50 KB`).
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.2} {}", UNITS[unit])
    }
}

pub fn alert_message(alert: &AlertEvent, rule: &AlertRule, at: DateTime<Utc>) -> String {
    let m = &alert.metrics;
    let cap_line = match alert.market_cap {
        Some(cap) => format!("💰 Market cap: {}", format_market_cap(cap)),
        None => "💰 Market cap: unknown".to_string(),
    };
    let tier_note = match alert.tier {
        CapTier::Large => "large-cap, both conditions required",
        CapTier::Small => "small-cap, either condition suffices",
    };

    let mut triggers = Vec::new();
    if alert.funding_triggered {
        triggers.push(format!("|funding| > {:.2}%", rule.funding_threshold * 100.0));
    }
    if alert.oi_triggered {
        triggers.push(format!("OI 3/10 ratio > {:.1}x", rule.oi_ratio_threshold));
    }

    format!(
        "🚨 <b>Perpetual anomaly detected</b>\n\n\
         🪙 Symbol: <code>{symbol}</code>\n\
         📊 Funding rate: {funding:+.4}%\n\
         📈 OI ratio (3/10): {ratio:.2}x\n\
         📦 Current OI: {oi}\n\
         {cap_line} ({tier_note})\n\
         🎯 Triggered: {triggers}\n\n\
         ⏰ Detected: {at}",
        symbol = alert.symbol,
        funding = m.funding_rate * 100.0,
        ratio = m.oi_ratio,
        oi = group_thousands(m.current_oi),
        triggers = triggers.join(", "),
        at = at.format(TIME_FMT),
    )
}

pub fn startup_message(
    symbol_count: usize,
    collection_interval_secs: u64,
    status_interval_secs: u64,
    at: DateTime<Utc>,
) -> String {
    format!(
        "🚀 <b>Perpetual monitor started</b>\n\n\
         ✅ Status: running\n\
         📊 Collection: every {} min ({} symbols)\n\
         🔔 Alerts: pushed as detected\n\
         📈 Status report: every {} min\n\n\
         Started: {}",
        collection_interval_secs / 60,
        symbol_count,
        status_interval_secs / 60,
        at.format(TIME_FMT),
    )
}

pub fn status_message(s: &StatusSnapshot, next_in_secs: u64, at: DateTime<Utc>) -> String {
    let last_cleanup = s
        .last_cleanup
        .map(|t| t.format(TIME_FMT).to_string())
        .unwrap_or_else(|| "never".to_string());
    let health = if s.healthy { "✅ healthy" } else { "⚠️ degraded" };
    let last_error = match &s.last_error {
        Some(e) => format!("\n❗ Last error: {}", escape_html(e)),
        None => String::new(),
    };

    format!(
        "📊 <b>Monitor status report</b>\n\n\
         ⏰ Report time: {at}\n\
         📈 Collection: {ok} succeeded, {err} failed\n\
         🔔 Alerts: {found} found, {sent} sent\n\
         💾 Data files: {files}\n\
         📦 Data size: {size}\n\
         🧹 Last cleanup: {last_cleanup}\n\
         🪙 Tracked symbols: {symbols}\n\
         🔄 Uptime: {uptime}\n\
         📡 System: {health}{last_error}\n\n\
         Next report in {next} min",
        at = at.format(TIME_FMT),
        ok = s.collection_success,
        err = s.collection_errors,
        found = s.alerts_found,
        sent = s.alerts_sent,
        files = s.data_files,
        size = format_size(s.data_size_bytes),
        symbols = s.tracked_symbols,
        uptime = s.uptime,
        next = next_in_secs / 60,
    )
}

pub fn cleanup_started_message(current_bytes: u64, limit_bytes: u64) -> String {
    format!(
        "🧹 <b>Data cleanup</b>\n\n\
         Data directory reached {}, above the {} limit.\n\
         Pruning old rows...",
        format_size(current_bytes),
        format_size(limit_bytes),
    )
}

pub fn cleanup_finished_message(
    summary: &PruneSummary,
    before_bytes: u64,
    after_bytes: u64,
    at: DateTime<Utc>,
) -> String {
    format!(
        "✅ <b>Data cleanup finished</b>\n\n\
         Files processed: {}\n\
         Files pruned: {}\n\
         Rows removed: {}\n\
         Size before: {}\n\
         Size after: {}\n\
         Finished: {}",
        summary.files_processed,
        summary.files_pruned,
        summary.rows_removed,
        format_size(before_bytes),
        format_size(after_bytes),
        at.format(TIME_FMT),
    )
}

pub fn test_message(at: DateTime<Utc>) -> String {
    format!(
        "🔔 <b>Test message</b>\n\nperp-watch can reach this chat.\nSent: {}",
        at.format(TIME_FMT)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::evaluator::WindowMetrics;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()
    }

    fn alert(cap: Option<f64>, tier: CapTier) -> AlertEvent {
        AlertEvent {
            symbol: "PEPEUSDT".into(),
            metrics: WindowMetrics {
                oi_mean_short: 300.0,
                oi_mean_long: 100.0,
                oi_ratio: 3.0,
                funding_rate: -0.0015,
                current_oi: 1_234_567.0,
            },
            market_cap: cap,
            tier,
            funding_triggered: true,
            oi_triggered: true,
        }
    }

    #[test]
    fn thousands_grouping() {
        assert_eq!(group_thousands(0.0), "0");
        assert_eq!(group_thousands(999.4), "999");
        assert_eq!(group_thousands(1_000.0), "1,000");
        assert_eq!(group_thousands(1_234_567.0), "1,234,567");
        assert_eq!(group_thousands(-12_345.0), "-12,345");
    }

    #[test]
    fn market_cap_units() {
        assert_eq!(format_market_cap(2.5e9), "$2.50B");
        assert_eq!(format_market_cap(45_600_000.0), "$45.60M");
        assert_eq!(format_market_cap(950_000.0), "$950,000");
    }

    #[test]
    fn size_units() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(800 * 1024 * 1024), "800.00 MB");
    }

    #[test]
    fn alert_message_contents() {
        let text = alert_message(&alert(Some(45_600_000.0), CapTier::Small), &AlertRule::default(), at());
        assert!(text.contains("<code>PEPEUSDT</code>"));
        assert!(text.contains("-0.1500%"));
        assert!(text.contains("3.00x"));
        assert!(text.contains("1,234,567"));
        assert!(text.contains("$45.60M (small-cap"));
        assert!(text.contains("|funding| > 0.10%, OI 3/10 ratio > 2.0x"));
        assert!(text.contains("2024-03-01 12:30:00 UTC"));
    }

    #[test]
    fn unknown_cap_is_spelled_out() {
        let text = alert_message(&alert(None, CapTier::Small), &AlertRule::default(), at());
        assert!(text.contains("Market cap: unknown"));
    }

    #[test]
    fn status_message_contents() {
        let s = StatusSnapshot {
            collection_success: 10,
            collection_errors: 2,
            alerts_found: 3,
            alerts_sent: 1,
            data_files: 250,
            data_size_bytes: 1536,
            last_cleanup: None,
            tracked_symbols: 250,
            uptime: "1h 5m".into(),
            healthy: true,
            last_error: Some("XUSDT: status <500>".into()),
        };
        let text = status_message(&s, 1800, at());
        assert!(text.contains("10 succeeded, 2 failed"));
        assert!(text.contains("3 found, 1 sent"));
        assert!(text.contains("1.50 KB"));
        assert!(text.contains("Last cleanup: never"));
        assert!(text.contains("Next report in 30 min"));
        assert!(text.contains("Last error: XUSDT: status &lt;500&gt;"));
    }

    #[test]
    fn cleanup_messages() {
        let started = cleanup_started_message(900 * 1024 * 1024, 800 * 1024 * 1024);
        assert!(started.contains("900.00 MB"));
        let summary = PruneSummary {
            files_processed: 5,
            files_pruned: 2,
            rows_removed: 40,
        };
        let done = cleanup_finished_message(&summary, 2048, 1024, at());
        assert!(done.contains("Rows removed: 40"));
        assert!(done.contains("Size after: 1.00 KB"));
    }
}
