// =============================================================================
// Futures Intelligence Module
// =============================================================================
//
// Everything the collector learns from the exchange flows through the
// `MarketDataSource` trait:
//
//   1. Snapshot: one flat `SnapshotRow` per symbol per cycle
//   2. Symbols: the tradable USDT-perpetual universe
//   3. Market cap: spot price x circulating supply, for the alert tier
//
// `FuturesClient` is the production source; tests substitute an in-memory one.

pub mod market_cap;
pub mod snapshot;
pub mod symbols;

pub use market_cap::{MarketCapSource, SupplyTableCaps};
pub use snapshot::SnapshotFetcher;
pub use symbols::SymbolLister;

use anyhow::Result;

use crate::binance::models::{
    ExchangeInfo, FundingRateEntry, LongShortRatioEntry, OpenInterest, PremiumIndex,
    TakerRatioEntry, Ticker24h,
};
use crate::binance::{FuturesClient, RatioKind};

/// Read-only market data consumed by the collector.
#[allow(async_fn_in_trait)]
pub trait MarketDataSource {
    async fn premium_index(&self, symbol: &str) -> Result<PremiumIndex>;
    async fn index_price(&self, symbol: &str) -> Result<f64>;
    async fn funding_rate(&self, symbol: &str) -> Result<FundingRateEntry>;
    async fn open_interest(&self, symbol: &str) -> Result<OpenInterest>;
    async fn long_short_ratio(&self, kind: RatioKind, symbol: &str)
        -> Result<LongShortRatioEntry>;
    async fn taker_ratio(&self, symbol: &str) -> Result<TakerRatioEntry>;
    async fn exchange_info(&self) -> Result<ExchangeInfo>;
    async fn ticker_24hr(&self) -> Result<Vec<Ticker24h>>;
    async fn spot_price(&self, symbol: &str) -> Result<f64>;
}

impl MarketDataSource for FuturesClient {
    async fn premium_index(&self, symbol: &str) -> Result<PremiumIndex> {
        FuturesClient::premium_index(self, symbol).await
    }

    async fn index_price(&self, symbol: &str) -> Result<f64> {
        FuturesClient::index_price(self, symbol).await
    }

    async fn funding_rate(&self, symbol: &str) -> Result<FundingRateEntry> {
        FuturesClient::funding_rate(self, symbol).await
    }

    async fn open_interest(&self, symbol: &str) -> Result<OpenInterest> {
        FuturesClient::open_interest(self, symbol).await
    }

    async fn long_short_ratio(
        &self,
        kind: RatioKind,
        symbol: &str,
    ) -> Result<LongShortRatioEntry> {
        FuturesClient::long_short_ratio(self, kind, symbol).await
    }

    async fn taker_ratio(&self, symbol: &str) -> Result<TakerRatioEntry> {
        FuturesClient::taker_ratio(self, symbol).await
    }

    async fn exchange_info(&self) -> Result<ExchangeInfo> {
        FuturesClient::exchange_info(self).await
    }

    async fn ticker_24hr(&self) -> Result<Vec<Ticker24h>> {
        FuturesClient::ticker_24hr(self).await
    }

    async fn spot_price(&self, symbol: &str) -> Result<f64> {
        FuturesClient::spot_price(self, symbol).await
    }
}
