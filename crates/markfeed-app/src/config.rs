//! Application configuration.
//!
//! Loaded from a TOML file, then overridden by `MARKFEED__SECTION__KEY`
//! environment variables (e.g. `MARKFEED__POLLING__INTERVAL_MS=500`).

use crate::error::{AppError, AppResult};
use markfeed_core::Symbol;
use markfeed_feed::StalenessConfig;
use markfeed_poll::{PollConfig, SyntheticConfig};
use markfeed_ws::{BackoffConfig, FeedConfig};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Push channel and reconnect settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Retries before the topic is handed to the polling fallback.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_max_jitter_ms() -> u64 {
    250
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            max_jitter_ms: default_max_jitter_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
        }
    }
}

/// Pull refresh settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Levels per side in a synthetic book.
    #[serde(default = "default_synthetic_levels")]
    pub synthetic_levels: usize,
    #[serde(default = "default_synthetic_step_bps")]
    pub synthetic_step_bps: Decimal,
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_synthetic_levels() -> usize {
    10
}

fn default_synthetic_step_bps() -> Decimal {
    Decimal::from(5)
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            synthetic_levels: default_synthetic_levels(),
            synthetic_step_bps: default_synthetic_step_bps(),
        }
    }
}

/// Silence thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StalenessSection {
    #[serde(default = "default_order_book_threshold_ms")]
    pub order_book_threshold_ms: u64,
    #[serde(default = "default_ticker_threshold_ms")]
    pub ticker_threshold_ms: u64,
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
}

fn default_order_book_threshold_ms() -> u64 {
    10_000
}

fn default_ticker_threshold_ms() -> u64 {
    30_000
}

fn default_check_interval_ms() -> u64 {
    1_000
}

impl Default for StalenessSection {
    fn default() -> Self {
        Self {
            order_book_threshold_ms: default_order_book_threshold_ms(),
            ticker_threshold_ms: default_ticker_threshold_ms(),
            check_interval_ms: default_check_interval_ms(),
        }
    }
}

/// Valuation engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Wallet balance used for equity until the backend supplies one.
    #[serde(default)]
    pub initial_wallet_balance: Decimal,
}

fn default_channel_capacity() -> usize {
    1_024
}

impl Default for ValuationConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            initial_wallet_balance: Decimal::ZERO,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_rest_base_url")]
    pub rest_base_url: String,
    /// Symbols watched at startup.
    #[serde(default)]
    pub symbols: Vec<String>,
    /// `limit` for order book pulls.
    #[serde(default = "default_order_book_depth")]
    pub order_book_depth: usize,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub staleness: StalenessSection,
    #[serde(default)]
    pub valuation: ValuationConfig,
}

fn default_ws_url() -> String {
    "ws://localhost:8080/ws".to_string()
}

fn default_rest_base_url() -> String {
    "http://localhost:8080/api".to_string()
}

fn default_order_book_depth() -> usize {
    20
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            rest_base_url: default_rest_base_url(),
            symbols: Vec::new(),
            order_book_depth: default_order_book_depth(),
            websocket: WebSocketConfig::default(),
            polling: PollingConfig::default(),
            staleness: StalenessSection::default(),
            valuation: ValuationConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from `path` (if it exists) with environment overrides.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("MARKFEED")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("symbols"),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without environment overrides.
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.ws_url.trim().is_empty() {
            return Err(AppError::Config("ws_url must not be empty".to_string()));
        }
        if self.rest_base_url.trim().is_empty() {
            return Err(AppError::Config("rest_base_url must not be empty".to_string()));
        }
        if self.polling.interval_ms == 0 {
            return Err(AppError::Config("polling.interval_ms must be > 0".to_string()));
        }
        if self.staleness.check_interval_ms == 0 {
            return Err(AppError::Config("staleness.check_interval_ms must be > 0".to_string()));
        }
        if self.polling.synthetic_step_bps < Decimal::ZERO {
            return Err(AppError::Config("polling.synthetic_step_bps must be >= 0".to_string()));
        }
        if self.order_book_depth == 0 {
            return Err(AppError::Config("order_book_depth must be > 0".to_string()));
        }
        if self.valuation.channel_capacity == 0 {
            return Err(AppError::Config("valuation.channel_capacity must be > 0".to_string()));
        }
        if self.websocket.base_delay_ms > self.websocket.max_delay_ms {
            return Err(AppError::Config(
                "websocket.base_delay_ms must not exceed max_delay_ms".to_string(),
            ));
        }
        self.parsed_symbols()?;
        Ok(())
    }

    pub fn parsed_symbols(&self) -> AppResult<Vec<Symbol>> {
        let mut symbols = self
            .symbols
            .iter()
            .map(Symbol::new)
            .collect::<Result<Vec<_>, _>>()?;
        symbols.sort();
        symbols.dedup();
        Ok(symbols)
    }

    pub fn feed_config(&self) -> FeedConfig {
        FeedConfig {
            url: self.ws_url.clone(),
            backoff: BackoffConfig {
                base_delay_ms: self.websocket.base_delay_ms,
                max_delay_ms: self.websocket.max_delay_ms,
                max_attempts: self.websocket.max_attempts,
                max_jitter_ms: self.websocket.max_jitter_ms,
            },
            heartbeat_interval_ms: self.websocket.heartbeat_interval_ms,
            heartbeat_timeout_ms: self.websocket.heartbeat_timeout_ms,
        }
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            order_book_depth: self.order_book_depth,
            synthetic: SyntheticConfig {
                levels: self.polling.synthetic_levels,
                step_bps: self.polling.synthetic_step_bps,
                ..SyntheticConfig::default()
            },
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.polling.interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.polling.request_timeout_ms)
    }

    pub fn staleness_config(&self) -> StalenessConfig {
        StalenessConfig {
            order_book_threshold_ms: self.staleness.order_book_threshold_ms,
            ticker_threshold_ms: self.staleness.ticker_threshold_ms,
            check_interval_ms: self.staleness.check_interval_ms,
        }
    }
}
