// =============================================================================
// Market-cap lookup — selects the tier of the alert rule
// =============================================================================
//
// Estimate: spot price x a fixed circulating-supply table for the major
// assets. Anything outside the table is unknown and is treated as small-cap
// by the evaluator.

use tracing::debug;

use super::MarketDataSource;

/// Approximate circulating supply per base asset.
const CIRCULATING_SUPPLY: &[(&str, f64)] = &[
    ("BTC", 19_500_000.0),
    ("ETH", 120_000_000.0),
    ("BNB", 150_000_000.0),
    ("ADA", 35_000_000_000.0),
    ("SOL", 400_000_000.0),
    ("XRP", 54_000_000_000.0),
    ("DOT", 1_200_000_000.0),
    ("DOGE", 140_000_000_000.0),
    ("AVAX", 360_000_000.0),
    ("MATIC", 10_000_000_000.0),
];

/// Source of a symbol's market capitalization in USD.
#[allow(async_fn_in_trait)]
pub trait MarketCapSource {
    /// `None` when the cap is unknown.
    async fn market_cap(&self, symbol: &str) -> Option<f64>;
}

/// Base asset of a USDT-quoted symbol (`1000PEPEUSDT` -> `1000PEPE`).
pub fn base_asset(symbol: &str) -> &str {
    symbol.strip_suffix("USDT").unwrap_or(symbol)
}

pub fn circulating_supply(asset: &str) -> Option<f64> {
    CIRCULATING_SUPPLY
        .iter()
        .find(|(a, _)| *a == asset)
        .map(|(_, s)| *s)
}

/// Spot price x supply table.
pub struct SupplyTableCaps<'a, S> {
    source: &'a S,
}

impl<'a, S: MarketDataSource> SupplyTableCaps<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }
}

impl<S: MarketDataSource> MarketCapSource for SupplyTableCaps<'_, S> {
    async fn market_cap(&self, symbol: &str) -> Option<f64> {
        let supply = circulating_supply(base_asset(symbol))?;
        match self.source.spot_price(symbol).await {
            Ok(price) => Some(price * supply),
            Err(e) => {
                debug!(symbol, error = %e, "spot price unavailable, market cap unknown");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::futures_intel::fake::FakeSource;

    #[test]
    fn base_asset_strips_quote() {
        assert_eq!(base_asset("BTCUSDT"), "BTC");
        assert_eq!(base_asset("1000PEPEUSDT"), "1000PEPE");
        assert_eq!(base_asset("BTCUSD_PERP"), "BTCUSD_PERP");
    }

    #[tokio::test]
    async fn known_asset_uses_spot_price() {
        let mut src = FakeSource::default();
        src.spot.insert("BTCUSDT".into(), 60_000.0);
        let caps = SupplyTableCaps::new(&src);
        let cap = caps.market_cap("BTCUSDT").await.unwrap();
        assert!((cap - 60_000.0 * 19_500_000.0).abs() < 1.0);
    }

    #[tokio::test]
    async fn unknown_asset_skips_network() {
        let src = FakeSource::default();
        let caps = SupplyTableCaps::new(&src);
        assert_eq!(caps.market_cap("NEWCOINUSDT").await, None);
        assert_eq!(src.call_count("spotPrice"), 0);
    }

    #[tokio::test]
    async fn missing_spot_market_is_unknown() {
        let src = FakeSource::default();
        let caps = SupplyTableCaps::new(&src);
        assert_eq!(caps.market_cap("ETHUSDT").await, None);
    }
}
