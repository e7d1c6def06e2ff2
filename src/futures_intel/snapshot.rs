// =============================================================================
// Snapshot Fetcher — one flat metrics row per symbol
// =============================================================================
//
// The premium index is the core endpoint: without a mark price there is no
// row. Every other metric is best effort; a failed call is logged and the
// field stays `None` so the rest of the row is still written.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, warn};

use super::MarketDataSource;
use crate::binance::RatioKind;
use crate::types::SnapshotRow;

/// Log a failed optional metric and turn it into `None`.
fn optional<T>(symbol: &str, what: &str, res: Result<T>) -> Option<T> {
    match res {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(symbol, metric = what, error = %e, "metric unavailable, leaving it empty");
            None
        }
    }
}

pub struct SnapshotFetcher<S> {
    source: S,
    call_delay: Duration,
}

impl<S: MarketDataSource> SnapshotFetcher<S> {
    /// `call_delay` is slept between consecutive REST calls and between
    /// symbols.
    pub fn new(source: S, call_delay: Duration) -> Self {
        Self { source, call_delay }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    async fn pause(&self) {
        if !self.call_delay.is_zero() {
            tokio::time::sleep(self.call_delay).await;
        }
    }

    /// Collect a full snapshot for `symbol`.
    ///
    /// Errors only when the premium index call fails or reports no usable
    /// mark price.
    pub async fn fetch(&self, symbol: &str) -> Result<SnapshotRow> {
        let premium = self
            .source
            .premium_index(symbol)
            .await
            .with_context(|| format!("premium index unavailable for {symbol}"))?;

        if !(premium.mark_price.is_finite() && premium.mark_price > 0.0) {
            anyhow::bail!("{symbol} has no usable mark price ({})", premium.mark_price);
        }
        let timestamp = Utc::now();

        let index_price = match premium.index_price.filter(|p| *p > 0.0) {
            Some(p) => Some(p),
            None => {
                self.pause().await;
                optional(symbol, "index_price", self.source.index_price(symbol).await)
                    .filter(|p| *p > 0.0)
            }
        };
        let (basis, basis_percent) = match index_price {
            Some(index) => SnapshotRow::basis_of(premium.mark_price, index),
            None => (None, None),
        };

        self.pause().await;
        let last_funding_rate =
            optional(symbol, "funding_rate", self.source.funding_rate(symbol).await)
                .map(|f| f.funding_rate)
                .or(premium.last_funding_rate);

        self.pause().await;
        let oi = optional(symbol, "open_interest", self.source.open_interest(symbol).await)
            .map(|o| o.open_interest);

        let mut ratios = [None; 3];
        for (slot, kind) in ratios.iter_mut().zip(RatioKind::ALL) {
            self.pause().await;
            *slot = optional(
                symbol,
                &kind.to_string(),
                self.source.long_short_ratio(kind, symbol).await,
            )
            .map(|r| r.long_short_ratio);
        }

        self.pause().await;
        let taker_buy_sell_ratio =
            optional(symbol, "taker_ratio", self.source.taker_ratio(symbol).await)
                .map(|t| t.buy_sell_ratio);

        let row = SnapshotRow {
            timestamp,
            mark_price: premium.mark_price,
            index_price: index_price.unwrap_or(0.0),
            basis,
            basis_percent,
            last_funding_rate,
            next_funding_time: premium.next_funding_time,
            oi,
            long_short_account_ratio: ratios[0],
            top_trader_account_ls_ratio: ratios[1],
            top_trader_position_ls_ratio: ratios[2],
            taker_buy_sell_ratio,
        };

        debug!(
            symbol,
            mark_price = row.mark_price,
            funding = ?row.last_funding_rate,
            oi = ?row.oi,
            "snapshot fetched"
        );

        Ok(row)
    }

    /// Collect snapshots for every symbol in order. A failure for one symbol
    /// is returned in its slot and never stops the batch.
    pub async fn fetch_many(&self, symbols: &[String]) -> Vec<(String, Result<SnapshotRow>)> {
        let mut out = Vec::with_capacity(symbols.len());
        for (i, symbol) in symbols.iter().enumerate() {
            if i > 0 {
                self.pause().await;
            }
            let res = self.fetch(symbol).await;
            out.push((symbol.clone(), res));
        }
        out
    }
}
