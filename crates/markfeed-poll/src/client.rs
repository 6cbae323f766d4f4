//! REST client for order book pulls.

use crate::error::{PollError, PollResult};
use async_trait::async_trait;
use markfeed_core::Symbol;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Default timeout for pull requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Source of raw order book payloads.
///
/// Returns the undecoded `{asks, bids}` body; normalization happens in the
/// poller so every wire shape goes through the same path.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderBookFetcher: Send + Sync {
    async fn fetch_order_book(&self, symbol: &Symbol, limit: usize) -> PollResult<Value>;
}

/// `GET {base}/market/orderbook/{symbol}?limit=N`
#[derive(Debug, Clone)]
pub struct OrderBookClient {
    client: Client,
    base_url: String,
}

impl OrderBookClient {
    pub fn new(base_url: impl Into<String>) -> PollResult<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> PollResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PollError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn order_book_url(&self, symbol: &Symbol) -> String {
        format!("{}/market/orderbook/{}", self.base_url, symbol)
    }
}

#[async_trait]
impl OrderBookFetcher for OrderBookClient {
    async fn fetch_order_book(&self, symbol: &Symbol, limit: usize) -> PollResult<Value> {
        let url = self.order_book_url(symbol);
        debug!(%url, limit, "Pulling order book");

        let response = self
            .client
            .get(&url)
            .query(&[("limit", limit)])
            .send()
            .await
            .map_err(|e| PollError::HttpClient(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PollError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| PollError::Decode(format!("Failed to parse response: {e}")))
    }
}
