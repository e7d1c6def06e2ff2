// =============================================================================
// Response payloads of the public USD-M futures endpoints
// =============================================================================
//
// Binance encodes decimals as JSON strings. The `de_str_f64` helpers accept
// either a string or a number so the structs survive both encodings.

use serde::{Deserialize, Deserializer};

fn de_str_f64<'de, D>(d: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let v = serde_json::Value::deserialize(d)?;
    parse_f64(&v).ok_or_else(|| serde::de::Error::custom(format!("expected decimal, got {v}")))
}

fn de_opt_str_f64<'de, D>(d: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<serde_json::Value>::deserialize(d)?;
    Ok(v.as_ref().and_then(parse_f64))
}

/// Parse a JSON value that may be either a string or a number into `f64`.
pub fn parse_f64(val: &serde_json::Value) -> Option<f64> {
    match val {
        serde_json::Value::String(s) if !s.is_empty() => s.parse::<f64>().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// GET /fapi/v1/premiumIndex
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PremiumIndex {
    #[serde(deserialize_with = "de_str_f64")]
    pub mark_price: f64,
    #[serde(default, deserialize_with = "de_opt_str_f64")]
    pub index_price: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_str_f64")]
    pub last_funding_rate: Option<f64>,
    #[serde(default)]
    pub next_funding_time: Option<i64>,
}

/// One entry of GET /fapi/v1/fundingRate
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingRateEntry {
    #[serde(deserialize_with = "de_str_f64")]
    pub funding_rate: f64,
}

/// GET /fapi/v1/openInterest
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInterest {
    #[serde(deserialize_with = "de_str_f64")]
    pub open_interest: f64,
}

/// One entry of the three `/futures/data/*LongShort*Ratio` endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LongShortRatioEntry {
    #[serde(deserialize_with = "de_str_f64")]
    pub long_short_ratio: f64,
}

/// One entry of GET /futures/data/takerlongshortRatio
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TakerRatioEntry {
    #[serde(deserialize_with = "de_str_f64")]
    pub buy_sell_ratio: f64,
}

/// GET /fapi/v1/exchangeInfo (only the fields we filter on).
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    #[serde(default)]
    pub quote_asset: String,
    #[serde(default)]
    pub contract_type: String,
    #[serde(default)]
    pub status: String,
}

impl SymbolInfo {
    pub fn is_trading_usdt_perpetual(&self) -> bool {
        self.quote_asset == "USDT" && self.contract_type == "PERPETUAL" && self.status == "TRADING"
    }
}

/// One entry of GET /fapi/v1/ticker/24hr
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24h {
    pub symbol: String,
    #[serde(default, deserialize_with = "de_opt_str_f64")]
    pub quote_volume: Option<f64>,
}

/// GET /api/v3/ticker/price (spot)
#[derive(Debug, Clone, Deserialize)]
pub struct SpotPrice {
    #[serde(deserialize_with = "de_str_f64")]
    pub price: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn premium_index_parses_string_decimals() {
        let raw = r#"{
            "symbol": "BTCUSDT",
            "markPrice": "64012.50000000",
            "indexPrice": "63990.12000000",
            "estimatedSettlePrice": "63995.0",
            "lastFundingRate": "0.00010000",
            "interestRate": "0.00010000",
            "nextFundingTime": 1719907200000,
            "time": 1719900000000
        }"#;
        let p: PremiumIndex = serde_json::from_str(raw).unwrap();
        assert!((p.mark_price - 64012.5).abs() < 1e-9);
        assert_eq!(p.index_price, Some(63990.12));
        assert_eq!(p.last_funding_rate, Some(0.0001));
        assert_eq!(p.next_funding_time, Some(1719907200000));
    }

    #[test]
    fn premium_index_tolerates_empty_index() {
        let raw = r#"{"symbol":"XUSDT","markPrice":"1.5","indexPrice":""}"#;
        let p: PremiumIndex = serde_json::from_str(raw).unwrap();
        assert_eq!(p.index_price, None);
        assert_eq!(p.last_funding_rate, None);
    }

    #[test]
    fn ratio_entry_parses() {
        let raw = r#"[{"symbol":"BTCUSDT","longShortRatio":"1.8105","longAccount":"0.6442","shortAccount":"0.3558","timestamp":1}]"#;
        let v: Vec<LongShortRatioEntry> = serde_json::from_str(raw).unwrap();
        assert!((v[0].long_short_ratio - 1.8105).abs() < 1e-12);
    }

    #[test]
    fn symbol_filter() {
        let raw = r#"{"symbols":[
            {"symbol":"BTCUSDT","quoteAsset":"USDT","contractType":"PERPETUAL","status":"TRADING"},
            {"symbol":"BTCUSDT_240927","quoteAsset":"USDT","contractType":"CURRENT_QUARTER","status":"TRADING"},
            {"symbol":"ETHBUSD","quoteAsset":"BUSD","contractType":"PERPETUAL","status":"TRADING"},
            {"symbol":"OLDUSDT","quoteAsset":"USDT","contractType":"PERPETUAL","status":"SETTLING"}
        ]}"#;
        let info: ExchangeInfo = serde_json::from_str(raw).unwrap();
        let kept: Vec<_> = info
            .symbols
            .iter()
            .filter(|s| s.is_trading_usdt_perpetual())
            .map(|s| s.symbol.as_str())
            .collect();
        assert_eq!(kept, vec!["BTCUSDT"]);
    }
}
