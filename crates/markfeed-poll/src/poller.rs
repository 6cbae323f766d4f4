//! Per-topic polling tasks.
//!
//! A fetch is issued only while the topic's connector state allows it (any
//! state but CONNECTED); ticks that land while connected are counted as
//! skips. The request-issue instant is the payload's `observed_at`, so a
//! slow response never looks fresher than push data received meanwhile.
//! Stopping a topic cancels its timer and drops any fetch in flight.

use crate::client::OrderBookFetcher;
use crate::error::{PollError, PollResult};
use crate::synthetic::{synthetic_levels, SyntheticConfig};
use chrono::{DateTime, Utc};
use markfeed_core::{BookLevels, ConnectionStateReader, Price, Source, Symbol, Topic, TopicKind};
use markfeed_feed::{normalize_book, OrderBookStore};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// `limit` passed to order book pulls.
    pub order_book_depth: usize,
    pub synthetic: SyntheticConfig,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            order_book_depth: 20,
            synthetic: SyntheticConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollPayload {
    Book(BookLevels),
    /// Mid price of a one-level pull, for ticker topics.
    Tick(Price),
}

/// A pulled (or synthesized) payload for the consumer loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollEvent {
    pub topic: Topic,
    /// `Pull` for real data, `Fallback` for synthetic.
    pub source: Source,
    pub payload: PollPayload,
    pub observed_at: DateTime<Utc>,
}

impl PollEvent {
    pub fn is_synthetic(&self) -> bool {
        self.source == Source::Fallback
    }
}

#[derive(Debug, Default)]
struct PollStats {
    polls: AtomicU64,
    skipped: AtomicU64,
    failures: AtomicU64,
    synthetic: AtomicU64,
}

impl PollStats {
    fn snapshot(&self) -> PollStatsSnapshot {
        PollStatsSnapshot {
            polls: self.polls.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            synthetic: self.synthetic.load(Ordering::Relaxed),
        }
    }
}

/// Counters for one topic since its polling started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStatsSnapshot {
    /// Fetches actually issued.
    pub polls: u64,
    /// Ticks skipped because the push channel was connected.
    pub skipped: u64,
    pub failures: u64,
    /// Synthetic books emitted.
    pub synthetic: u64,
}

struct PollTask {
    token: CancellationToken,
    stats: Arc<PollStats>,
    join: JoinHandle<()>,
}

/// Owns one polling task per started topic.
pub struct PollingFallback {
    fetcher: Arc<dyn OrderBookFetcher>,
    store: Arc<OrderBookStore>,
    config: PollConfig,
    event_tx: mpsc::Sender<PollEvent>,
    tasks: Mutex<HashMap<Topic, PollTask>>,
}

impl PollingFallback {
    pub fn new(
        fetcher: Arc<dyn OrderBookFetcher>,
        store: Arc<OrderBookStore>,
        config: PollConfig,
        event_tx: mpsc::Sender<PollEvent>,
    ) -> Self {
        Self {
            fetcher,
            store,
            config,
            event_tx,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Start polling `topic` every `interval`, guarded by `state`.
    ///
    /// Returns false if the topic is already being polled.
    pub fn start(
        &self,
        topic: Topic,
        interval: Duration,
        state: ConnectionStateReader,
        parent: &CancellationToken,
    ) -> bool {
        let mut tasks = self.tasks.lock();
        if tasks.contains_key(&topic) {
            return false;
        }

        let token = parent.child_token();
        let stats = Arc::new(PollStats::default());
        let worker = PollWorker {
            topic: topic.clone(),
            interval,
            state,
            token: token.clone(),
            stats: stats.clone(),
            fetcher: self.fetcher.clone(),
            store: self.store.clone(),
            config: self.config,
            event_tx: self.event_tx.clone(),
        };

        info!(%topic, interval_ms = interval.as_millis() as u64, "Polling fallback armed");
        let join = tokio::spawn(worker.run());
        tasks.insert(topic, PollTask { token, stats, join });
        true
    }

    /// Stop polling `topic`: cancels the timer and aborts any in-flight
    /// fetch. Returns false if the topic was not being polled.
    pub fn stop(&self, topic: &Topic) -> bool {
        let Some(task) = self.tasks.lock().remove(topic) else {
            return false;
        };
        task.token.cancel();
        task.join.abort();
        info!(%topic, "Polling fallback stopped");
        true
    }

    pub fn stop_all(&self) {
        let tasks: Vec<(Topic, PollTask)> = self.tasks.lock().drain().collect();
        for (_, task) in tasks {
            task.token.cancel();
            task.join.abort();
        }
    }

    pub fn is_polling(&self, topic: &Topic) -> bool {
        self.tasks.lock().contains_key(topic)
    }

    pub fn stats(&self, topic: &Topic) -> Option<PollStatsSnapshot> {
        self.tasks.lock().get(topic).map(|t| t.stats.snapshot())
    }

    /// Fetches issued for `topic` since it was started.
    pub fn poll_count(&self, topic: &Topic) -> u64 {
        self.stats(topic).map_or(0, |s| s.polls)
    }
}

impl Drop for PollingFallback {
    fn drop(&mut self) {
        self.stop_all();
    }
}

struct PollWorker {
    topic: Topic,
    interval: Duration,
    state: ConnectionStateReader,
    token: CancellationToken,
    stats: Arc<PollStats>,
    fetcher: Arc<dyn OrderBookFetcher>,
    store: Arc<OrderBookStore>,
    config: PollConfig,
    event_tx: mpsc::Sender<PollEvent>,
}

impl PollWorker {
    async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = self.token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if !self.state.get().allows_polling() {
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let observed_at = Utc::now();
            self.stats.polls.fetch_add(1, Ordering::Relaxed);

            let result = tokio::select! {
                biased;
                () = self.token.cancelled() => break,
                result = self.pull() => result,
            };

            let event = match result {
                Ok(payload) => PollEvent {
                    topic: self.topic.clone(),
                    source: Source::Pull,
                    payload,
                    observed_at,
                },
                Err(e) => {
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(topic = %self.topic, error = %e, "Pull failed");
                    match self.synthesize() {
                        Some(event) => event,
                        None => continue,
                    }
                }
            };

            // The push channel may have come back while the request was in flight.
            if !self.state.get().allows_polling() {
                debug!(topic = %self.topic, "Dropping pull result, push channel connected");
                continue;
            }
            if self.event_tx.send(event).await.is_err() {
                debug!(topic = %self.topic, "Poll event receiver dropped");
                break;
            }
        }

        debug!(topic = %self.topic, "Poll worker exited");
    }

    async fn pull(&self) -> PollResult<PollPayload> {
        let symbol = &self.topic.symbol;
        match self.topic.kind {
            TopicKind::OrderBook => {
                let raw = self
                    .fetcher
                    .fetch_order_book(symbol, self.config.order_book_depth)
                    .await?;
                let levels = normalize_book(&raw)?;
                if levels.is_empty() {
                    return Err(PollError::EmptyBook(symbol.to_string()));
                }
                Ok(PollPayload::Book(levels))
            }
            TopicKind::Ticker => {
                let raw = self.fetcher.fetch_order_book(symbol, 1).await?;
                normalize_book(&raw)?
                    .mid_price()
                    .map(PollPayload::Tick)
                    .ok_or_else(|| PollError::EmptyBook(symbol.to_string()))
            }
        }
    }

    /// Synthetic book around the last known price. Order book topics only.
    fn synthesize(&self) -> Option<PollEvent> {
        if self.topic.kind != TopicKind::OrderBook {
            return None;
        }
        let symbol: &Symbol = &self.topic.symbol;
        let Some(mid) = self.store.last_price(symbol) else {
            debug!(topic = %self.topic, "No reference price, cannot synthesize");
            return None;
        };

        let levels = synthetic_levels(mid, &self.config.synthetic);
        if levels.is_empty() {
            return None;
        }

        self.stats.synthetic.fetch_add(1, Ordering::Relaxed);
        warn!(topic = %self.topic, %mid, "Serving synthetic order book");
        Some(PollEvent {
            topic: self.topic.clone(),
            source: Source::Fallback,
            payload: PollPayload::Book(levels),
            observed_at: Utc::now(),
        })
    }
}
