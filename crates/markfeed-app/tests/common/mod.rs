//! Shared helpers for integration tests.

#![allow(dead_code)]

pub mod mock_ws;

use async_trait::async_trait;
use markfeed_app::AppConfig;
use markfeed_core::Symbol;
use markfeed_poll::{OrderBookFetcher, PollError, PollResult};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Fetcher that serves a fixed two-level book and counts calls.
#[derive(Default)]
pub struct CountingFetcher {
    calls: AtomicU64,
    fail: bool,
}

impl CountingFetcher {
    pub fn failing() -> Self {
        Self {
            calls: AtomicU64::new(0),
            fail: true,
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OrderBookFetcher for CountingFetcher {
    async fn fetch_order_book(&self, _symbol: &Symbol, _limit: usize) -> PollResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(PollError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(json!({
            "asks": [["101", "2"], ["102", "3"]],
            "bids": [["99", "1"], ["98", "4"]],
        }))
    }
}

/// Config with short timings, pointing at `ws_url`.
pub fn fast_config(ws_url: &str) -> AppConfig {
    let mut config = AppConfig {
        ws_url: ws_url.to_string(),
        ..AppConfig::default()
    };
    config.websocket.base_delay_ms = 1;
    config.websocket.max_delay_ms = 5;
    config.websocket.max_jitter_ms = 0;
    config.polling.interval_ms = 20;
    config.staleness.check_interval_ms = 50;
    config
}

/// Poll `check` every 10ms until it returns true or `within` elapses.
pub async fn eventually<F, Fut>(within: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(within, async {
        loop {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}
