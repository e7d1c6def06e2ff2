// =============================================================================
// Runtime Configuration — typed settings validated at startup
// =============================================================================
//
// Every tunable lives here. Values come from the process environment (after
// `.env` has been loaded by `main`) and fall back to the defaults below.
// Parsing failures are reported as `ConfigError` rather than silently
// replaced, so a typo in `.env` is visible at startup.
//
// =============================================================================

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;
use tracing::info;

// =============================================================================
// Defaults
// =============================================================================

pub const FAPI_BASE_URL: &str = "https://fapi.binance.com";
pub const SPOT_BASE_URL: &str = "https://api.binance.com";
pub const TELEGRAM_API_URL: &str = "https://api.telegram.org";

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_charts_dir() -> PathBuf {
    PathBuf::from("charts")
}

fn default_collection_interval_secs() -> u64 {
    300
}

fn default_status_interval_secs() -> u64 {
    1800
}

fn default_funding_rate_threshold() -> f64 {
    0.001
}

fn default_oi_ratio_threshold() -> f64 {
    2.0
}

fn default_market_cap_threshold() -> f64 {
    100_000_000.0
}

fn default_request_delay_ms() -> u64 {
    100
}

fn default_data_size_limit_mb() -> u64 {
    800
}

fn default_keep_rows() -> usize {
    1000
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{key} must be a valid {expected}, got '{value}'")]
    InvalidValue {
        key: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),

    #[error("{key} is too large: {value}")]
    TooLarge { key: &'static str, value: u64 },

    #[error("TELEGRAM_BOT_TOKEN is not set")]
    MissingBotToken,

    #[error("TELEGRAM_CHAT_ID is not set")]
    MissingChatId,
}

// =============================================================================
// Symbol selection
// =============================================================================

/// Which symbols a collection cycle covers.
#[derive(Debug, Clone, PartialEq)]
pub enum SymbolSelection {
    /// A fixed list from `PERP_SYMBOLS`.
    Explicit(Vec<String>),
    /// The N most traded perpetuals by 24h quote volume.
    TopByVolume(usize),
    /// Every trading USDT perpetual.
    AllPerpetuals,
}

// =============================================================================
// Telegram
// =============================================================================

#[derive(Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    pub api_url: String,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .field("api_url", &self.api_url)
            .finish()
    }
}

// =============================================================================
// MonitorConfig
// =============================================================================

#[derive(Clone)]
pub struct MonitorConfig {
    // --- Notification --------------------------------------------------------
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub telegram_api_url: String,

    // --- Storage -------------------------------------------------------------
    pub data_dir: PathBuf,
    pub charts_dir: PathBuf,
    /// Prune per-symbol files once the data directory exceeds this size.
    pub data_size_limit_bytes: u64,
    /// Rows kept per file when pruning.
    pub keep_rows: usize,

    // --- Scheduling ----------------------------------------------------------
    pub collection_interval_secs: u64,
    pub status_interval_secs: u64,
    /// Pause between consecutive REST calls (ms).
    pub request_delay_ms: u64,

    // --- Alert rule ----------------------------------------------------------
    /// Absolute funding rate above which the funding leg fires (0.001 = 0.1%).
    pub funding_rate_threshold: f64,
    /// Short/long OI mean ratio above which the OI leg fires.
    pub oi_ratio_threshold: f64,
    /// Market cap (USD) at or above which a symbol is large-cap.
    pub market_cap_threshold: f64,

    // --- Universe ------------------------------------------------------------
    pub symbols: SymbolSelection,
    pub enable_charts: bool,

    // --- Endpoints -----------------------------------------------------------
    pub fapi_base_url: String,
    pub spot_base_url: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            telegram_bot_token: None,
            telegram_chat_id: None,
            telegram_api_url: TELEGRAM_API_URL.to_string(),
            data_dir: default_data_dir(),
            charts_dir: default_charts_dir(),
            data_size_limit_bytes: default_data_size_limit_mb() * 1024 * 1024,
            keep_rows: default_keep_rows(),
            collection_interval_secs: default_collection_interval_secs(),
            status_interval_secs: default_status_interval_secs(),
            request_delay_ms: default_request_delay_ms(),
            funding_rate_threshold: default_funding_rate_threshold(),
            oi_ratio_threshold: default_oi_ratio_threshold(),
            market_cap_threshold: default_market_cap_threshold(),
            symbols: SymbolSelection::AllPerpetuals,
            enable_charts: true,
            fapi_base_url: FAPI_BASE_URL.to_string(),
            spot_base_url: SPOT_BASE_URL.to_string(),
        }
    }
}

impl std::fmt::Debug for MonitorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorConfig")
            .field(
                "telegram_bot_token",
                &self.telegram_bot_token.as_ref().map(|_| "<redacted>"),
            )
            .field("telegram_chat_id", &self.telegram_chat_id)
            .field("data_dir", &self.data_dir)
            .field("charts_dir", &self.charts_dir)
            .field("collection_interval_secs", &self.collection_interval_secs)
            .field("status_interval_secs", &self.status_interval_secs)
            .field("funding_rate_threshold", &self.funding_rate_threshold)
            .field("oi_ratio_threshold", &self.oi_ratio_threshold)
            .field("market_cap_threshold", &self.market_cap_threshold)
            .field("symbols", &self.symbols)
            .finish_non_exhaustive()
    }
}

/// Parse `key` with `lookup`, falling back to `default` when unset or blank.
fn parse_or<T, F>(
    lookup: &F,
    key: &'static str,
    default: T,
    expected: &'static str,
) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => v.parse::<T>().map_err(|_| ConfigError::InvalidValue {
            key,
            value: v,
            expected,
        }),
        _ => Ok(default),
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl MonitorConfig {
    /// Build from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup and validate the result.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let explicit: Vec<String> = non_empty(&lookup, "PERP_SYMBOLS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        let top: Option<usize> = match non_empty(&lookup, "PERP_TOP_SYMBOLS") {
            Some(_) => Some(parse_or(&lookup, "PERP_TOP_SYMBOLS", 0, "integer")?),
            None => None,
        };
        let symbols = if !explicit.is_empty() {
            SymbolSelection::Explicit(explicit)
        } else if let Some(n) = top {
            SymbolSelection::TopByVolume(n)
        } else {
            SymbolSelection::AllPerpetuals
        };

        let size_limit_mb: u64 = parse_or(
            &lookup,
            "DATA_SIZE_LIMIT_MB",
            default_data_size_limit_mb(),
            "integer",
        )?;
        let data_size_limit_bytes =
            size_limit_mb
                .checked_mul(1024 * 1024)
                .ok_or(ConfigError::TooLarge {
                    key: "DATA_SIZE_LIMIT_MB",
                    value: size_limit_mb,
                })?;

        let config = Self {
            telegram_bot_token: non_empty(&lookup, "TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: non_empty(&lookup, "TELEGRAM_CHAT_ID"),
            telegram_api_url: non_empty(&lookup, "TELEGRAM_API_URL")
                .unwrap_or_else(|| TELEGRAM_API_URL.to_string()),
            data_dir: non_empty(&lookup, "DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_data_dir),
            charts_dir: non_empty(&lookup, "CHARTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_charts_dir),
            data_size_limit_bytes,
            keep_rows: parse_or(&lookup, "KEEP_ROWS", default_keep_rows(), "integer")?,
            collection_interval_secs: parse_or(
                &lookup,
                "COLLECTION_INTERVAL",
                default_collection_interval_secs(),
                "integer",
            )?,
            status_interval_secs: parse_or(
                &lookup,
                "STATUS_INTERVAL",
                default_status_interval_secs(),
                "integer",
            )?,
            request_delay_ms: parse_or(
                &lookup,
                "REQUEST_DELAY_MS",
                default_request_delay_ms(),
                "integer",
            )?,
            funding_rate_threshold: parse_or(
                &lookup,
                "FUNDING_RATE_THRESHOLD",
                default_funding_rate_threshold(),
                "number",
            )?,
            oi_ratio_threshold: parse_or(
                &lookup,
                "OI_RATIO_THRESHOLD",
                default_oi_ratio_threshold(),
                "number",
            )?,
            market_cap_threshold: parse_or(
                &lookup,
                "MARKET_CAP_THRESHOLD",
                default_market_cap_threshold(),
                "number",
            )?,
            symbols,
            enable_charts: parse_or(&lookup, "ENABLE_CHARTS", true, "boolean")?,
            fapi_base_url: non_empty(&lookup, "FAPI_BASE_URL")
                .unwrap_or_else(|| FAPI_BASE_URL.to_string()),
            spot_base_url: non_empty(&lookup, "SPOT_BASE_URL")
                .unwrap_or_else(|| SPOT_BASE_URL.to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the loop or the rule meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collection_interval_secs == 0 {
            return Err(ConfigError::NotPositive("COLLECTION_INTERVAL"));
        }
        if self.status_interval_secs == 0 {
            return Err(ConfigError::NotPositive("STATUS_INTERVAL"));
        }
        let thresholds = [
            ("FUNDING_RATE_THRESHOLD", self.funding_rate_threshold),
            ("OI_RATIO_THRESHOLD", self.oi_ratio_threshold),
            ("MARKET_CAP_THRESHOLD", self.market_cap_threshold),
        ];
        for (key, value) in thresholds {
            // NaN compares false against everything, so test finiteness first.
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::NotPositive(key));
            }
        }
        if self.data_size_limit_bytes == 0 {
            return Err(ConfigError::NotPositive("DATA_SIZE_LIMIT_MB"));
        }
        if self.keep_rows == 0 {
            return Err(ConfigError::NotPositive("KEEP_ROWS"));
        }
        if let SymbolSelection::TopByVolume(0) = self.symbols {
            return Err(ConfigError::NotPositive("PERP_TOP_SYMBOLS"));
        }
        Ok(())
    }

    /// Telegram credentials, or the first missing one.
    pub fn telegram(&self) -> Result<TelegramConfig, ConfigError> {
        let bot_token = self
            .telegram_bot_token
            .clone()
            .ok_or(ConfigError::MissingBotToken)?;
        let chat_id = self
            .telegram_chat_id
            .clone()
            .ok_or(ConfigError::MissingChatId)?;
        Ok(TelegramConfig {
            bot_token,
            chat_id,
            api_url: self.telegram_api_url.clone(),
        })
    }

    /// Log a one-screen summary of the active settings.
    pub fn log_summary(&self) {
        info!(
            telegram = if self.telegram().is_ok() { "configured" } else { "not configured" },
            data_dir = %self.data_dir.display(),
            collection_interval_secs = self.collection_interval_secs,
            status_interval_secs = self.status_interval_secs,
            funding_rate_threshold = format!("{:.4}", self.funding_rate_threshold),
            oi_ratio_threshold = format!("{:.1}x", self.oi_ratio_threshold),
            market_cap_threshold = self.market_cap_threshold,
            symbols = ?self.symbols,
            "configuration loaded"
        );
    }
}
