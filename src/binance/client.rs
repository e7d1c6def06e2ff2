// =============================================================================
// Binance Futures REST Client — public market-data endpoints
// =============================================================================
//
// Every endpoint used by the collector is public, so requests are unsigned.
// All calls go through `get_json`, which applies the weight throttle, checks
// the HTTP status, and deserialises the body into a typed payload.
// =============================================================================

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use super::models::{
    parse_f64, ExchangeInfo, FundingRateEntry, LongShortRatioEntry, OpenInterest, PremiumIndex,
    SpotPrice, TakerRatioEntry, Ticker24h,
};
use super::rate_limit::RateLimitTracker;

/// Period used for every `/futures/data` statistics call.
const STATS_PERIOD: &str = "5m";

/// The three long/short ratio flavours Binance publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatioKind {
    /// All accounts, by account count.
    GlobalAccount,
    /// Top 20% traders, by account count.
    TopTraderAccount,
    /// Top 20% traders, by position size.
    TopTraderPosition,
}

impl RatioKind {
    pub const ALL: [RatioKind; 3] = [
        RatioKind::GlobalAccount,
        RatioKind::TopTraderAccount,
        RatioKind::TopTraderPosition,
    ];

    fn path(self) -> &'static str {
        match self {
            Self::GlobalAccount => "/futures/data/globalLongShortAccountRatio",
            Self::TopTraderAccount => "/futures/data/topLongShortAccountRatio",
            Self::TopTraderPosition => "/futures/data/topLongShortPositionRatio",
        }
    }
}

impl std::fmt::Display for RatioKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GlobalAccount => write!(f, "globalLongShortAccountRatio"),
            Self::TopTraderAccount => write!(f, "topLongShortAccountRatio"),
            Self::TopTraderPosition => write!(f, "topLongShortPositionRatio"),
        }
    }
}

/// Public USD-M futures (and spot price) client.
#[derive(Clone)]
pub struct FuturesClient {
    fapi_base_url: String,
    spot_base_url: String,
    client: reqwest::Client,
    rate_limit: Arc<RateLimitTracker>,
}

impl FuturesClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    pub fn new(fapi_base_url: impl Into<String>, spot_base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build reqwest client")?;

        let fapi_base_url = fapi_base_url.into();
        debug!(base_url = %fapi_base_url, "FuturesClient initialised");

        Ok(Self {
            fapi_base_url,
            spot_base_url: spot_base_url.into(),
            client,
            rate_limit: Arc::new(RateLimitTracker::new()),
        })
    }

    /// Current UNIX timestamp in milliseconds.
    pub fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }

    // -------------------------------------------------------------------------
    // Transport
    // -------------------------------------------------------------------------

    async fn get_json<T: DeserializeOwned>(&self, url: &str, weight: u32, what: &str) -> Result<T> {
        let wait = self.rate_limit.backoff_for(weight, Self::timestamp_ms());
        if !wait.is_zero() {
            warn!(
                used_weight = self.rate_limit.used_weight(),
                wait_ms = wait.as_millis() as u64,
                "request weight exhausted, waiting for the next minute"
            );
            tokio::time::sleep(wait).await;
            self.rate_limit.reset_1m_weight();
        }

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {what} request failed"))?;

        self.rate_limit.update_from_headers(resp.headers());

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse {what} response body"))?;

        if !status.is_success() {
            anyhow::bail!("Binance GET {} returned {}: {}", what, status, body);
        }

        serde_json::from_value(body).with_context(|| format!("unexpected {what} payload"))
    }

    /// Many statistics endpoints answer with an array; we only ever ask for
    /// the latest entry.
    async fn latest<T: DeserializeOwned>(&self, url: &str, weight: u32, what: &str) -> Result<T> {
        let entries: Vec<T> = self.get_json(url, weight, what).await?;
        entries
            .into_iter()
            .last()
            .with_context(|| format!("{what} response array is empty"))
    }

    // -------------------------------------------------------------------------
    // Per-symbol metrics
    // -------------------------------------------------------------------------

    /// GET /fapi/v1/premiumIndex: mark price, index price, funding.
    #[instrument(skip(self), name = "binance::premium_index")]
    pub async fn premium_index(&self, symbol: &str) -> Result<PremiumIndex> {
        let url = format!("{}/fapi/v1/premiumIndex?symbol={}", self.fapi_base_url, symbol);
        self.get_json(&url, 1, "/fapi/v1/premiumIndex").await
    }

    /// GET /fapi/v1/indexPriceKlines: close of the latest 1m index candle.
    #[instrument(skip(self), name = "binance::index_price")]
    pub async fn index_price(&self, symbol: &str) -> Result<f64> {
        let url = format!(
            "{}/fapi/v1/indexPriceKlines?pair={}&interval=1m&limit=1",
            self.fapi_base_url, symbol
        );
        let kline: Vec<serde_json::Value> = self
            .latest(&url, 1, "/fapi/v1/indexPriceKlines")
            .await?;
        // [0] openTime, [1] open, [2] high, [3] low, [4] close, ...
        kline
            .get(4)
            .and_then(parse_f64)
            .context("index kline has no close price")
    }

    /// GET /fapi/v1/fundingRate: latest settled funding entry.
    #[instrument(skip(self), name = "binance::funding_rate")]
    pub async fn funding_rate(&self, symbol: &str) -> Result<FundingRateEntry> {
        let url = format!(
            "{}/fapi/v1/fundingRate?symbol={}&limit=1",
            self.fapi_base_url, symbol
        );
        self.latest(&url, 1, "/fapi/v1/fundingRate").await
    }

    /// GET /fapi/v1/openInterest
    #[instrument(skip(self), name = "binance::open_interest")]
    pub async fn open_interest(&self, symbol: &str) -> Result<OpenInterest> {
        let url = format!("{}/fapi/v1/openInterest?symbol={}", self.fapi_base_url, symbol);
        self.get_json(&url, 1, "/fapi/v1/openInterest").await
    }

    /// GET /futures/data/{global,top}LongShort*Ratio
    #[instrument(skip(self), name = "binance::long_short_ratio")]
    pub async fn long_short_ratio(
        &self,
        kind: RatioKind,
        symbol: &str,
    ) -> Result<LongShortRatioEntry> {
        let url = format!(
            "{}{}?symbol={}&period={}&limit=1",
            self.fapi_base_url,
            kind.path(),
            symbol,
            STATS_PERIOD
        );
        self.latest(&url, 1, kind.path()).await
    }

    /// GET /futures/data/takerlongshortRatio
    #[instrument(skip(self), name = "binance::taker_ratio")]
    pub async fn taker_ratio(&self, symbol: &str) -> Result<TakerRatioEntry> {
        let url = format!(
            "{}/futures/data/takerlongshortRatio?symbol={}&period={}&limit=1",
            self.fapi_base_url, symbol, STATS_PERIOD
        );
        self.latest(&url, 1, "/futures/data/takerlongshortRatio").await
    }

    // -------------------------------------------------------------------------
    // Universe
    // -------------------------------------------------------------------------

    /// GET /fapi/v1/exchangeInfo
    #[instrument(skip(self), name = "binance::exchange_info")]
    pub async fn exchange_info(&self) -> Result<ExchangeInfo> {
        let url = format!("{}/fapi/v1/exchangeInfo", self.fapi_base_url);
        self.get_json(&url, 1, "/fapi/v1/exchangeInfo").await
    }

    /// GET /fapi/v1/ticker/24hr (all symbols)
    #[instrument(skip(self), name = "binance::ticker_24hr")]
    pub async fn ticker_24hr(&self) -> Result<Vec<Ticker24h>> {
        let url = format!("{}/fapi/v1/ticker/24hr", self.fapi_base_url);
        self.get_json(&url, 40, "/fapi/v1/ticker/24hr").await
    }

    /// GET /api/v3/ticker/price on the spot API.
    #[instrument(skip(self), name = "binance::spot_price")]
    pub async fn spot_price(&self, symbol: &str) -> Result<f64> {
        let url = format!("{}/api/v3/ticker/price?symbol={}", self.spot_base_url, symbol);
        let price: SpotPrice = self.get_json(&url, 2, "/api/v3/ticker/price").await?;
        Ok(price.price)
    }
}

impl std::fmt::Debug for FuturesClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FuturesClient")
            .field("fapi_base_url", &self.fapi_base_url)
            .field("spot_base_url", &self.spot_base_url)
            .field("rate_limit", &self.rate_limit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_paths_are_distinct() {
        let paths: Vec<_> = RatioKind::ALL.iter().map(|k| k.path()).collect();
        assert_eq!(paths.len(), 3);
        assert!(paths.iter().all(|p| p.starts_with("/futures/data/")));
        assert_ne!(paths[0], paths[1]);
        assert_ne!(paths[1], paths[2]);
    }

    #[test]
    fn debug_shows_hosts() {
        let c = FuturesClient::new("https://fapi.example", "https://spot.example").unwrap();
        let s = format!("{c:?}");
        assert!(s.contains("fapi.example"));
    }
}
