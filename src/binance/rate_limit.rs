// =============================================================================
// Rate-Limit Tracker — keeps the collector under the Binance futures weight cap
// =============================================================================
//
// USD-M futures allow 2400 request weight per minute per IP. A full cycle over
// every perpetual costs several thousand weight, so the collector throttles
// itself: after each response it reads `X-MBX-USED-WEIGHT-1M` and, once the
// soft threshold is crossed, the client waits for the minute to roll over
// before sending more.
// =============================================================================

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

/// Hard ceiling we never plan to exceed.
const WEIGHT_HARD_LIMIT: u32 = 2000;
/// Soft warning threshold.
const WEIGHT_WARN_THRESHOLD: u32 = 1600;

/// Thread-safe weight tracker backed by an atomic counter.
pub struct RateLimitTracker {
    used_weight_1m: AtomicU32,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self {
            used_weight_1m: AtomicU32::new(0),
        }
    }

    /// Update the counter from the response headers returned by Binance.
    pub fn update_from_headers(&self, headers: &reqwest::header::HeaderMap) {
        let Some(w) = headers
            .get("X-MBX-USED-WEIGHT-1M")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u32>().ok())
        else {
            return;
        };

        let prev = self.used_weight_1m.swap(w, Ordering::Relaxed);
        if w >= WEIGHT_WARN_THRESHOLD && prev < WEIGHT_WARN_THRESHOLD {
            warn!(
                used_weight = w,
                hard_limit = WEIGHT_HARD_LIMIT,
                "rate-limit weight crossed warning threshold"
            );
        }
        debug!(used_weight_1m = w, "rate-limit weight updated from header");
    }

    /// Return `true` if `weight` more can be spent without crossing the hard
    /// limit.
    pub fn can_send_request(&self, weight: u32) -> bool {
        self.used_weight_1m.load(Ordering::Relaxed) + weight <= WEIGHT_HARD_LIMIT
    }

    /// How long to hold off before a request of `weight`. Zero when there is
    /// headroom; otherwise until the next minute boundary, when Binance resets
    /// the counter.
    pub fn backoff_for(&self, weight: u32, now_ms: u64) -> Duration {
        if self.can_send_request(weight) {
            return Duration::ZERO;
        }
        let into_minute = now_ms % 60_000;
        Duration::from_millis(60_000 - into_minute + 250)
    }

    /// Forget the last reported weight (used after sleeping past a minute
    /// boundary).
    pub fn reset_1m_weight(&self) {
        self.used_weight_1m.store(0, Ordering::Relaxed);
    }

    pub fn used_weight(&self) -> u32 {
        self.used_weight_1m.load(Ordering::Relaxed)
    }
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RateLimitTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitTracker")
            .field("used_weight_1m", &self.used_weight())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    fn headers_with_weight(w: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert("X-MBX-USED-WEIGHT-1M", HeaderValue::from_str(w).unwrap());
        h
    }

    #[test]
    fn header_updates_weight() {
        let t = RateLimitTracker::new();
        t.update_from_headers(&headers_with_weight("120"));
        assert_eq!(t.used_weight(), 120);
    }

    #[test]
    fn garbage_header_is_ignored() {
        let t = RateLimitTracker::new();
        t.update_from_headers(&headers_with_weight("12"));
        t.update_from_headers(&headers_with_weight("lots"));
        assert_eq!(t.used_weight(), 12);
    }

    #[test]
    fn no_backoff_with_headroom() {
        let t = RateLimitTracker::new();
        t.update_from_headers(&headers_with_weight("100"));
        assert_eq!(t.backoff_for(5, 1_000), Duration::ZERO);
    }

    #[test]
    fn backoff_until_next_minute_when_exhausted() {
        let t = RateLimitTracker::new();
        t.update_from_headers(&headers_with_weight("1999"));
        assert!(!t.can_send_request(5));
        // 10s into the minute -> wait the remaining 50s plus a margin.
        assert_eq!(t.backoff_for(5, 10_000), Duration::from_millis(50_250));

        t.reset_1m_weight();
        assert!(t.can_send_request(5));
    }
}
