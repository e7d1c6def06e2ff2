// =============================================================================
// Symbol Lister — the tradable USDT-perpetual universe
// =============================================================================

use std::collections::HashSet;

use anyhow::Result;
use tracing::{info, warn};

use super::MarketDataSource;
use crate::runtime_config::SymbolSelection;

/// Used when the exchange cannot be reached for the symbol list.
pub const FALLBACK_SYMBOLS: [&str; 10] = [
    "BTCUSDT", "ETHUSDT", "BNBUSDT", "ADAUSDT", "SOLUSDT", "XRPUSDT", "DOTUSDT", "DOGEUSDT",
    "AVAXUSDT", "LINKUSDT",
];

/// Outcome of resolving a selection.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSymbols {
    pub symbols: Vec<String>,
    /// Set when the exchange could not be asked and `FALLBACK_SYMBOLS` was
    /// used instead.
    pub fallback: bool,
}

impl ResolvedSymbols {
    fn fallback() -> Self {
        Self {
            symbols: fallback_symbols(),
            fallback: true,
        }
    }
}

pub struct SymbolLister<'a, S> {
    source: &'a S,
}

impl<'a, S: MarketDataSource> SymbolLister<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    /// Every trading USDT-margined perpetual, sorted by name.
    pub async fn usdt_perpetuals(&self) -> Result<Vec<String>> {
        let info = self.source.exchange_info().await?;
        let mut symbols: Vec<String> = info
            .symbols
            .into_iter()
            .filter(|s| s.is_trading_usdt_perpetual())
            .map(|s| s.symbol)
            .collect();
        symbols.sort();
        info!(count = symbols.len(), "USDT perpetual symbols fetched");
        Ok(symbols)
    }

    /// The `limit` most traded perpetuals by 24h quote volume, busiest first.
    pub async fn top_by_volume(&self, limit: usize) -> Result<Vec<String>> {
        let perpetuals: HashSet<String> = self.usdt_perpetuals().await?.into_iter().collect();
        let mut tickers: Vec<(String, f64)> = self
            .source
            .ticker_24hr()
            .await?
            .into_iter()
            .filter(|t| perpetuals.contains(&t.symbol))
            .map(|t| (t.symbol, t.quote_volume.unwrap_or(0.0)))
            .collect();
        tickers.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(tickers.into_iter().take(limit).map(|(s, _)| s).collect())
    }

    /// Resolve the configured selection. Exchange failures fall back to a
    /// short list of major pairs so collection can continue.
    pub async fn resolve(&self, selection: &SymbolSelection) -> ResolvedSymbols {
        let res = match selection {
            SymbolSelection::Explicit(list) => {
                return ResolvedSymbols {
                    symbols: list.clone(),
                    fallback: false,
                }
            }
            SymbolSelection::TopByVolume(n) => self.top_by_volume(*n).await,
            SymbolSelection::AllPerpetuals => self.usdt_perpetuals().await,
        };
        match res {
            Ok(symbols) if !symbols.is_empty() => ResolvedSymbols {
                symbols,
                fallback: false,
            },
            Ok(_) => {
                warn!("exchange returned no symbols, using fallback list");
                ResolvedSymbols::fallback()
            }
            Err(e) => {
                warn!(error = %e, "failed to fetch symbol list, using fallback list");
                ResolvedSymbols::fallback()
            }
        }
    }
}

pub fn fallback_symbols() -> Vec<String> {
    FALLBACK_SYMBOLS.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::futures_intel::fake::FakeSource;

    #[tokio::test]
    async fn perpetuals_are_sorted() {
        let src = FakeSource::with_symbols(&["XRPUSDT", "BTCUSDT", "ETHUSDT"]);
        let list = SymbolLister::new(&src).usdt_perpetuals().await.unwrap();
        assert_eq!(list, vec!["BTCUSDT", "ETHUSDT", "XRPUSDT"]);
    }

    #[tokio::test]
    async fn top_by_volume_orders_descending() {
        let mut src = FakeSource::with_symbols(&["AUSDT", "BUSDT", "CUSDT"]);
        src.volumes.insert("AUSDT".into(), 5.0);
        src.volumes.insert("BUSDT".into(), 50.0);
        src.volumes.insert("CUSDT".into(), 20.0);
        // Spot-only or delisted tickers never make the cut.
        src.volumes.insert("ZZZUSDT".into(), 1e12);

        let top = SymbolLister::new(&src).top_by_volume(2).await.unwrap();
        assert_eq!(top, vec!["BUSDT", "CUSDT"]);
    }

    #[tokio::test]
    async fn resolve_falls_back_on_error() {
        let src = FakeSource::with_symbols(&["AUSDT"]).fail("", "exchangeInfo");
        let list = SymbolLister::new(&src)
            .resolve(&SymbolSelection::AllPerpetuals)
            .await;
        assert!(list.fallback);
        assert_eq!(list.symbols, fallback_symbols());
    }

    #[tokio::test]
    async fn explicit_selection_needs_no_exchange() {
        let src = FakeSource::default();
        let list = SymbolLister::new(&src)
            .resolve(&SymbolSelection::Explicit(vec!["BTCUSDT".into()]))
            .await;
        assert!(!list.fallback);
        assert_eq!(list.symbols, vec!["BTCUSDT"]);
        assert_eq!(src.call_count("exchangeInfo"), 0);
    }
}
