//! Silent-topic detection.
//!
//! `tick` runs on a fixed cadence. A topic whose connector reports CONNECTED
//! but which has produced no accepted update for longer than its threshold
//! is returned so the caller can force a reconnect. The silence clock
//! starts at the later of the last accepted update and the moment the topic
//! was last (re)armed: tracking start, any non-connected observation, or a
//! previous trip.

use crate::store::OrderBookStore;
use chrono::{DateTime, Duration, Utc};
use markfeed_core::{ConnectionState, ConnectionStateReader, Topic, TopicKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

const MAX_THRESHOLD_MS: u64 = 365 * 86_400_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StalenessConfig {
    pub order_book_threshold_ms: u64,
    /// Tickers on slow symbols legitimately go quiet for longer.
    pub ticker_threshold_ms: u64,
    pub check_interval_ms: u64,
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            order_book_threshold_ms: 10_000,
            ticker_threshold_ms: 30_000,
            check_interval_ms: 1_000,
        }
    }
}

impl StalenessConfig {
    pub fn threshold_for(&self, kind: TopicKind) -> Duration {
        let ms = match kind {
            TopicKind::OrderBook => self.order_book_threshold_ms,
            TopicKind::Ticker => self.ticker_threshold_ms,
        };
        Duration::milliseconds(i64::try_from(ms.min(MAX_THRESHOLD_MS)).unwrap_or(0))
    }
}

#[derive(Debug)]
struct Tracked {
    threshold: Duration,
    state: ConnectionStateReader,
    armed_at: DateTime<Utc>,
}

/// Per-topic silence tracker. Owned by the consumer loop.
#[derive(Debug, Default)]
pub struct StalenessMonitor {
    config: StalenessConfig,
    topics: HashMap<Topic, Tracked>,
}

impl StalenessMonitor {
    pub fn new(config: StalenessConfig) -> Self {
        Self {
            config,
            topics: HashMap::new(),
        }
    }

    pub fn config(&self) -> &StalenessConfig {
        &self.config
    }

    /// Start tracking `topic`. Re-tracking replaces the previous entry.
    pub fn track(&mut self, topic: Topic, state: ConnectionStateReader, now: DateTime<Utc>) {
        let threshold = self.config.threshold_for(topic.kind);
        self.topics.insert(
            topic,
            Tracked {
                threshold,
                state,
                armed_at: now,
            },
        );
    }

    /// Stop tracking. Returns false if the topic was not tracked.
    pub fn untrack(&mut self, topic: &Topic) -> bool {
        self.topics.remove(topic).is_some()
    }

    pub fn is_tracked(&self, topic: &Topic) -> bool {
        self.topics.contains_key(topic)
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Return the connected topics that have been silent past their threshold.
    pub fn tick(&mut self, now: DateTime<Utc>, store: &OrderBookStore) -> Vec<Topic> {
        let mut stale = Vec::new();

        for (topic, tracked) in self.topics.iter_mut() {
            if tracked.state.get() != ConnectionState::Connected {
                tracked.armed_at = now;
                continue;
            }

            let last_seen = store
                .last_update(topic)
                .map_or(tracked.armed_at, |t| t.max(tracked.armed_at));
            let silent_for = now - last_seen;
            if silent_for > tracked.threshold {
                warn!(
                    %topic,
                    silent_ms = silent_for.num_milliseconds(),
                    threshold_ms = tracked.threshold.num_milliseconds(),
                    "Topic stale while connected"
                );
                tracked.armed_at = now;
                stale.push(topic.clone());
            }
        }

        stale.sort();
        stale
    }
}
