//! `MarketSync`: the consumer-facing service and its event loop.
//!
//! Connectors and pollers run as their own tasks but only ever produce
//! events. Every event is applied by the single loop in `run`, so
//! normalization, reconciliation and store replacement for one payload
//! happen without interleaving.

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::session::TopicSession;
use chrono::{DateTime, Utc};
use markfeed_core::{BookLevels, ConnectionState, Price, Source, Symbol, Topic, TopicKind};
use markfeed_feed::{
    normalize_book, normalize_price_update, OrderBookStore, Outcome, Reconciler, SnapshotReceiver,
    StalenessMonitor, TickOutcome,
};
use markfeed_poll::{OrderBookClient, OrderBookFetcher, PollEvent, PollPayload, PollingFallback};
use markfeed_position::{spawn_valuation_engine, PositionUpdate, ValuationHandle};
use markfeed_telemetry::Metrics;
use markfeed_ws::{ConnectorEvent, ConnectorEventKind, FeedConnector, PushMessage};
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 1_024;

type EventReceivers = (mpsc::Receiver<ConnectorEvent>, mpsc::Receiver<PollEvent>);

pub struct MarketSync {
    config: AppConfig,
    store: Arc<OrderBookStore>,
    reconciler: Reconciler,
    poller: PollingFallback,
    valuation: ValuationHandle,
    valuation_task: Mutex<Option<JoinHandle<()>>>,
    sessions: Mutex<HashMap<Topic, TopicSession>>,
    monitor: Mutex<StalenessMonitor>,
    connector_tx: mpsc::Sender<ConnectorEvent>,
    receivers: Mutex<Option<EventReceivers>>,
    shutdown: CancellationToken,
}

impl MarketSync {
    /// Build with the REST client from `config`. Must be called inside a
    /// tokio runtime.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let client = OrderBookClient::with_timeout(&config.rest_base_url, config.request_timeout())?;
        Ok(Self::with_fetcher(config, Arc::new(client)))
    }

    /// Build with a custom order book fetcher.
    pub fn with_fetcher(config: AppConfig, fetcher: Arc<dyn OrderBookFetcher>) -> Self {
        let store = Arc::new(OrderBookStore::new());
        let (connector_tx, connector_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (poll_tx, poll_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let poller = PollingFallback::new(fetcher, store.clone(), config.poll_config(), poll_tx);
        let (valuation, valuation_task) = spawn_valuation_engine(
            config.valuation.channel_capacity,
            config.valuation.initial_wallet_balance,
        );
        let monitor = StalenessMonitor::new(config.staleness_config());

        Self {
            reconciler: Reconciler::new(store.clone()),
            store,
            poller,
            valuation,
            valuation_task: Mutex::new(Some(valuation_task)),
            sessions: Mutex::new(HashMap::new()),
            monitor: Mutex::new(monitor),
            connector_tx,
            receivers: Mutex::new(Some((connector_rx, poll_rx))),
            shutdown: CancellationToken::new(),
            config,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<OrderBookStore> {
        &self.store
    }

    // ------------------------------------------------------------------
    // Consumer API
    // ------------------------------------------------------------------

    /// Open a topic: start its push connector, arm its polling fallback and
    /// begin staleness tracking. Returns false if it was already open.
    pub fn open(&self, topic: Topic) -> bool {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(&topic) || self.shutdown.is_cancelled() {
            return false;
        }

        let token = self.shutdown.child_token();
        let connector = FeedConnector::new(
            self.config.feed_config(),
            topic.clone(),
            self.connector_tx.clone(),
            token.child_token(),
        );
        let (handle, task) = connector.spawn();
        let reader = handle.state_reader();

        self.poller
            .start(topic.clone(), self.config.poll_interval(), reader.clone(), &token);
        self.monitor.lock().track(topic.clone(), reader, Utc::now());
        Metrics::connection_state(&topic.to_string(), handle.state());

        info!(%topic, "Topic opened");
        sessions.insert(topic.clone(), TopicSession::new(topic, handle, task, token));
        true
    }

    /// Close a topic. Idempotent: returns false if it was not open.
    ///
    /// Once neither topic of a symbol is open, its snapshot and last tick
    /// are dropped from the store.
    pub fn close(&self, topic: &Topic) -> bool {
        let mut sessions = self.sessions.lock();
        let Some(mut session) = sessions.remove(topic) else {
            return false;
        };
        let closed = session.close(&self.poller, &mut self.monitor.lock());

        let symbol = &topic.symbol;
        let watched = sessions.contains_key(&Topic::order_book(symbol.clone()))
            || sessions.contains_key(&Topic::ticker(symbol.clone()));
        if !watched {
            self.store.remove(symbol);
            debug!(%symbol, "Symbol state dropped");
        }
        closed
    }

    fn is_open(&self, topic: &Topic) -> bool {
        self.sessions.lock().contains_key(topic)
    }

    /// Open both the order book and ticker topics for `symbol` and return a
    /// receiver for its snapshots.
    pub fn watch_symbol(&self, symbol: &Symbol) -> SnapshotReceiver {
        self.open(Topic::order_book(symbol.clone()));
        self.open(Topic::ticker(symbol.clone()));
        self.store.subscribe(symbol)
    }

    pub fn unwatch_symbol(&self, symbol: &Symbol) {
        self.close(&Topic::order_book(symbol.clone()));
        self.close(&Topic::ticker(symbol.clone()));
    }

    pub fn subscribe_order_book(&self, symbol: &Symbol) -> SnapshotReceiver {
        self.store.subscribe(symbol)
    }

    pub fn subscribe_position_updates(&self) -> broadcast::Receiver<PositionUpdate> {
        self.valuation.subscribe()
    }

    /// Current connection state, or `None` if the topic is not open.
    pub fn connection_state(&self, topic: &Topic) -> Option<ConnectionState> {
        self.sessions.lock().get(topic).map(TopicSession::state)
    }

    /// Open topics and their states, sorted.
    pub fn topics(&self) -> Vec<(Topic, ConnectionState)> {
        let mut topics: Vec<_> = self
            .sessions
            .lock()
            .values()
            .map(|s| (s.topic().clone(), s.state()))
            .collect();
        topics.sort_by(|a, b| a.0.cmp(&b.0));
        topics
    }

    /// Leave FALLBACK for `topic` and retry the push channel.
    pub fn reset_fallback(&self, topic: &Topic) -> bool {
        self.sessions
            .lock()
            .get(topic)
            .map_or(false, |s| s.connector().reset())
    }

    /// Fetches issued by the polling fallback for `topic` since it was opened.
    pub fn poll_count(&self, topic: &Topic) -> u64 {
        self.poller.poll_count(topic)
    }

    /// Position intake and read access.
    pub fn positions(&self) -> &ValuationHandle {
        &self.valuation
    }

    /// Close every topic, stop the valuation engine and end `run`.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        info!("MarketSync shutdown requested");

        let mut sessions: Vec<TopicSession> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        {
            let mut monitor = self.monitor.lock();
            for session in sessions.iter_mut() {
                session.close(&self.poller, &mut monitor);
            }
        }
        self.poller.stop_all();
        self.shutdown.cancel();

        for session in sessions.iter_mut() {
            session.join().await;
        }

        self.valuation.shutdown().await;
        let task = self.valuation_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    // ------------------------------------------------------------------
    // Event loop
    // ------------------------------------------------------------------

    /// Run the consumer loop until `shutdown`. May only be called once.
    pub async fn run(&self) -> AppResult<()> {
        let (mut connector_rx, mut poll_rx) =
            self.receivers.lock().take().ok_or(AppError::AlreadyRunning)?;

        let mut staleness = tokio::time::interval(Duration::from_millis(
            self.config.staleness.check_interval_ms,
        ));
        staleness.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("MarketSync event loop started");
        loop {
            tokio::select! {
                biased;

                () = self.shutdown.cancelled() => break,

                Some(event) = connector_rx.recv() => self.on_connector_event(event).await,

                Some(event) = poll_rx.recv() => self.on_poll_event(event).await,

                _ = staleness.tick() => self.check_staleness(),
            }
        }
        info!("MarketSync event loop stopped");
        Ok(())
    }

    async fn on_connector_event(&self, event: ConnectorEvent) {
        let ConnectorEvent { topic, kind } = event;
        // Events still queued when the topic was closed are dropped.
        if !self.is_open(&topic) {
            debug!(%topic, "Event for closed topic dropped");
            return;
        }
        let label = topic.to_string();

        match kind {
            ConnectorEventKind::StateChanged(state) => {
                info!(%topic, %state, "Connection state");
                Metrics::connection_state(&label, state);
                if state == ConnectionState::Fallback {
                    Metrics::fallback_entered(&label);
                }
            }
            ConnectorEventKind::Dropped { reason } => Metrics::reconnect(&label, reason),
            ConnectorEventKind::Malformed => Metrics::malformed("push"),
            ConnectorEventKind::Message {
                message,
                received_at,
            } => self.on_push_message(&topic, message, received_at).await,
        }
    }

    async fn on_push_message(&self, topic: &Topic, message: PushMessage, received_at: DateTime<Utc>) {
        match (topic.kind, message) {
            (TopicKind::OrderBook, PushMessage::OrderBook(data)) => match normalize_book(&data) {
                Ok(levels) => self.apply_book(&topic.symbol, Source::Push, levels, received_at).await,
                Err(e) => {
                    debug!(%topic, error = %e, "Dropping malformed book payload");
                    Metrics::malformed("push");
                }
            },
            (TopicKind::Ticker, PushMessage::PriceUpdate(data)) => {
                let ticks = normalize_price_update(&data);
                if ticks.is_empty() {
                    Metrics::malformed("push");
                }
                for (symbol, price) in ticks {
                    // A multi-symbol update only feeds symbols with an open ticker.
                    if symbol != topic.symbol && !self.is_open(&Topic::ticker(symbol.clone())) {
                        continue;
                    }
                    self.apply_tick(&symbol, Source::Push, price, received_at).await;
                }
            }
            (_, message) => {
                debug!(%topic, kind = ?message.topic_kind(), "Push message for another topic kind ignored");
            }
        }
    }

    async fn on_poll_event(&self, event: PollEvent) {
        if !self.is_open(&event.topic) {
            return;
        }
        Metrics::poll_event(&event.topic.to_string(), event.source.as_str());

        let symbol = &event.topic.symbol;
        match event.payload {
            PollPayload::Book(levels) => self.apply_book(symbol, event.source, levels, event.observed_at).await,
            PollPayload::Tick(price) => self.apply_tick(symbol, event.source, price, event.observed_at).await,
        }
    }

    /// Reconcile a book. Without a tick the book mid is the best-known
    /// price, so a moved mid revalues positions too.
    async fn apply_book(&self, symbol: &Symbol, source: Source, levels: BookLevels, observed_at: DateTime<Utc>) {
        let before = self.store.last_price(symbol);
        match self.reconciler.accept(symbol, source, levels, observed_at) {
            Outcome::Applied(snapshot) => {
                Metrics::reconciled("book", source.as_str(), "applied");
                Metrics::synthetic_mode(symbol.as_str(), snapshot.is_synthetic());
                if let Some(pct) = snapshot.spread_percent().and_then(|p| p.to_f64()) {
                    Metrics::spread_percent(symbol.as_str(), pct);
                }

                let after = self.store.last_price(symbol);
                if let Some(price) = after.filter(|p| Some(*p) != before) {
                    self.revalue(symbol, price, snapshot.captured_at()).await;
                }
            }
            Outcome::Rejected(reason) => Metrics::reconciled("book", source.as_str(), reason.as_str()),
        }
    }

    async fn apply_tick(&self, symbol: &Symbol, source: Source, price: Price, observed_at: DateTime<Utc>) {
        match self.reconciler.accept_tick(symbol, source, price, observed_at) {
            TickOutcome::Applied {
                tick,
                price_changed,
            } => {
                Metrics::reconciled("tick", source.as_str(), "applied");
                if price_changed {
                    self.revalue(&tick.symbol, tick.price, tick.observed_at).await;
                }
            }
            TickOutcome::Rejected(reason) => Metrics::reconciled("tick", source.as_str(), reason.as_str()),
        }
    }

    async fn revalue(&self, symbol: &Symbol, price: Price, observed_at: DateTime<Utc>) {
        if let Err(e) = self.valuation.on_price_tick(symbol.clone(), price, observed_at).await {
            warn!(%symbol, error = %e, "Valuation engine unavailable");
        }
    }

    fn check_staleness(&self) {
        let stale = self.monitor.lock().tick(Utc::now(), &self.store);
        if stale.is_empty() {
            return;
        }

        let sessions = self.sessions.lock();
        for topic in stale {
            Metrics::stale(&topic.to_string());
            if let Some(session) = sessions.get(&topic) {
                if session.connector().force_reconnect() {
                    warn!(%topic, "Forcing reconnect of silent topic");
                }
            }
        }
    }
}

impl Drop for MarketSync {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
