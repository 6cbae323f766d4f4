//! Per-symbol snapshot store.
//!
//! Each symbol has one `watch` slot holding an `Arc<OrderBookSnapshot>`.
//! Replacement is a single `send_replace`, so subscribers only ever see a
//! whole snapshot. The last accepted price tick per symbol is kept beside it.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use markfeed_core::{OrderBookSnapshot, Price, PriceTick, Symbol, Topic, TopicKind};
use std::sync::Arc;
use tokio::sync::watch;

/// Receiver side of a symbol's snapshot slot. `None` until the first snapshot.
pub type SnapshotReceiver = watch::Receiver<Option<Arc<OrderBookSnapshot>>>;

type SnapshotSlot = watch::Sender<Option<Arc<OrderBookSnapshot>>>;

#[derive(Debug, Default)]
pub struct OrderBookStore {
    books: DashMap<Symbol, SnapshotSlot>,
    ticks: DashMap<Symbol, PriceTick>,
}

impl OrderBookStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot for `symbol`.
    pub fn get_snapshot(&self, symbol: &Symbol) -> Option<Arc<OrderBookSnapshot>> {
        self.books.get(symbol).and_then(|slot| slot.borrow().clone())
    }

    /// Subscribe to snapshot replacements. Creates the slot if needed, so a
    /// consumer may subscribe before the first payload arrives.
    pub fn subscribe(&self, symbol: &Symbol) -> SnapshotReceiver {
        self.books
            .entry(symbol.clone())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    /// Atomically replace the snapshot for its symbol and notify subscribers.
    pub fn publish(&self, snapshot: Arc<OrderBookSnapshot>) {
        let slot = self
            .books
            .entry(snapshot.symbol().clone())
            .or_insert_with(|| watch::channel(None).0);
        slot.send_replace(Some(snapshot));
    }

    pub fn last_tick(&self, symbol: &Symbol) -> Option<PriceTick> {
        self.ticks.get(symbol).map(|t| t.clone())
    }

    /// Best-known price: last tick, otherwise the book mid.
    pub fn last_price(&self, symbol: &Symbol) -> Option<Price> {
        self.last_tick(symbol)
            .map(|t| t.price)
            .or_else(|| self.get_snapshot(symbol).and_then(|s| s.mid_price()))
    }

    pub fn set_tick(&self, tick: PriceTick) {
        self.ticks.insert(tick.symbol.clone(), tick);
    }

    /// Timestamp of the last accepted update for a topic.
    pub fn last_update(&self, topic: &Topic) -> Option<DateTime<Utc>> {
        match topic.kind {
            TopicKind::OrderBook => self.get_snapshot(&topic.symbol).map(|s| s.captured_at()),
            TopicKind::Ticker => self.ticks.get(&topic.symbol).map(|t| t.observed_at),
        }
    }

    /// Drop all state for a symbol. Open receivers observe the channel closing.
    pub fn remove(&self, symbol: &Symbol) {
        self.books.remove(symbol);
        self.ticks.remove(symbol);
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        self.books.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use markfeed_core::{BookLevels, PriceLevel, Size, Source};
    use rust_decimal_macros::dec;

    fn snapshot(symbol: &Symbol, ask: rust_decimal::Decimal, bid: rust_decimal::Decimal) -> Arc<OrderBookSnapshot> {
        let levels = BookLevels::new(
            vec![PriceLevel::new(Price::new(ask), Size::new(dec!(1))).unwrap()],
            vec![PriceLevel::new(Price::new(bid), Size::new(dec!(1))).unwrap()],
        );
        Arc::new(OrderBookSnapshot::from_levels(
            symbol.clone(),
            levels,
            Source::Push,
            Utc::now(),
        )
        .unwrap())
    }

    #[tokio::test]
    async fn test_subscribe_before_publish() {
        let store = OrderBookStore::new();
        let sym = Symbol::new("BTCUSDT").unwrap();

        let mut rx = store.subscribe(&sym);
        assert!(rx.borrow().is_none());
        assert!(store.get_snapshot(&sym).is_none());

        store.publish(snapshot(&sym, dec!(101), dec!(99)));
        rx.changed().await.unwrap();

        let seen = rx.borrow_and_update().clone().unwrap();
        assert_eq!(seen.best_ask().unwrap().inner(), dec!(101));
        assert_eq!(seen.best_bid().unwrap().inner(), dec!(99));
        assert_eq!(store.get_snapshot(&sym).unwrap(), seen);
    }

    #[test]
    fn test_last_price_prefers_tick() {
        let store = OrderBookStore::new();
        let sym = Symbol::new("ETHUSDT").unwrap();
        assert!(store.last_price(&sym).is_none());

        store.publish(snapshot(&sym, dec!(102), dec!(98)));
        assert_eq!(store.last_price(&sym).unwrap().inner(), dec!(100));

        store.set_tick(PriceTick {
            symbol: sym.clone(),
            price: Price::new(dec!(101)),
            observed_at: Utc::now(),
            source: Source::Push,
        });
        assert_eq!(store.last_price(&sym).unwrap().inner(), dec!(101));
    }

    #[test]
    fn test_last_update_by_topic_kind() {
        let store = OrderBookStore::new();
        let sym = Symbol::new("SOLUSDT").unwrap();
        let book = Topic::order_book(sym.clone());
        let ticker = Topic::ticker(sym.clone());

        let snap = snapshot(&sym, dec!(11), dec!(9));
        let captured = snap.captured_at();
        store.publish(snap);
        assert_eq!(store.last_update(&book), Some(captured));
        assert_eq!(store.last_update(&ticker), None);

        store.remove(&sym);
        assert_eq!(store.last_update(&book), None);
        assert!(store.symbols().is_empty());
    }
}
