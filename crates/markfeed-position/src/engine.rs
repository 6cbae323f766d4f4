//! Position valuation engine.
//!
//! `ValuationBook` is the synchronous core. `ValuationTask` wraps it in an
//! actor fed by `ValuationMsg`; `ValuationHandle` is the cheap, cloneable
//! front end. Reads (`positions`, `account`) come from caches the actor
//! keeps current, so callers never wait on the actor to look at state.

use crate::error::{PositionError, PositionResult};
use crate::valuation::{revalue, AccountValuation};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use markfeed_core::{ClosedPosition, Position, PositionId, PositionStatus, Price, Symbol};
use markfeed_telemetry::Metrics;
use parking_lot::RwLock;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Why a position update was published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateReason {
    Opened,
    Revalued,
    Closed,
    Synced,
}

/// A changed position together with the account view after the change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PositionUpdate {
    pub reason: UpdateReason,
    pub position: Position,
    pub account: AccountValuation,
}

// ============================================================================
// ValuationBook
// ============================================================================

/// Positions keyed by id, plus the wallet balance.
#[derive(Debug, Default)]
pub struct ValuationBook {
    positions: HashMap<PositionId, Position>,
    wallet_balance: Decimal,
}

impl ValuationBook {
    pub fn new(wallet_balance: Decimal) -> Self {
        Self {
            positions: HashMap::new(),
            wallet_balance,
        }
    }

    pub fn set_wallet_balance(&mut self, balance: Decimal) {
        self.wallet_balance = balance;
    }

    /// Insert or replace a position from the backend's open result.
    ///
    /// The entry price of an existing open position is kept.
    pub fn upsert(&mut self, mut position: Position) -> Position {
        if let Some(existing) = self.positions.get(&position.id) {
            if existing.is_open() && existing.entry_price != position.entry_price {
                warn!(
                    id = %position.id,
                    kept = %existing.entry_price,
                    ignored = %position.entry_price,
                    "Entry price is immutable after open"
                );
                position.entry_price = existing.entry_price;
            }
        }
        self.positions.insert(position.id.clone(), position.clone());
        position
    }

    /// Freeze a position as CLOSED with the backend's final figures.
    pub fn close(&mut self, id: &PositionId, result: &ClosedPosition, at: DateTime<Utc>) -> Option<Position> {
        let position = self.positions.get_mut(id)?;
        if position.status == PositionStatus::Closed {
            return None;
        }
        position.status = PositionStatus::Closed;
        position.unrealized_pnl = result.pnl;
        position.roe_percent = result.roe_percent;
        position.updated_at = at;
        Some(position.clone())
    }

    /// Replace every position with `positions`.
    pub fn sync(&mut self, positions: Vec<Position>) {
        self.positions = positions.into_iter().map(|p| (p.id.clone(), p)).collect();
    }

    /// Revalue every open position on `symbol`. Returns the changed positions.
    pub fn on_price_tick(&mut self, symbol: &Symbol, price: Price, at: DateTime<Utc>) -> Vec<Position> {
        let mut changed: Vec<Position> = self
            .positions
            .values_mut()
            .filter(|p| &p.symbol == symbol)
            .filter_map(|p| revalue(p, price, at).then(|| p.clone()))
            .collect();
        changed.sort_by(|a, b| a.id.cmp(&b.id));
        changed
    }

    pub fn get(&self, id: &PositionId) -> Option<&Position> {
        self.positions.get(id)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn account(&self) -> AccountValuation {
        AccountValuation::compute(self.wallet_balance, self.positions.values())
    }
}

// ============================================================================
// Actor
// ============================================================================

/// Messages to the valuation actor.
#[derive(Debug)]
pub enum ValuationMsg {
    Upsert(Position),
    Close { id: PositionId, result: ClosedPosition },
    Sync(Vec<Position>),
    PriceTick {
        symbol: Symbol,
        price: Price,
        observed_at: DateTime<Utc>,
    },
    SetWalletBalance(Decimal),
    Shutdown,
}

/// Valuation actor. Processes messages sequentially.
pub struct ValuationTask {
    rx: mpsc::Receiver<ValuationMsg>,
    book: ValuationBook,
    cache: Arc<DashMap<PositionId, Position>>,
    account: Arc<RwLock<AccountValuation>>,
    updates: broadcast::Sender<PositionUpdate>,
}

impl ValuationTask {
    pub async fn run(mut self) {
        debug!("ValuationTask started");
        self.refresh_account();

        while let Some(msg) = self.rx.recv().await {
            if matches!(msg, ValuationMsg::Shutdown) {
                debug!("ValuationTask shutting down");
                break;
            }
            self.handle_message(msg);
        }

        debug!("ValuationTask terminated");
    }

    fn handle_message(&mut self, msg: ValuationMsg) {
        match msg {
            ValuationMsg::Upsert(position) => {
                let position = self.book.upsert(position);
                info!(id = %position.id, symbol = %position.symbol, side = %position.side, "Position tracked");
                self.cache.insert(position.id.clone(), position.clone());
                self.publish(UpdateReason::Opened, vec![position]);
            }
            ValuationMsg::Close { id, result } => match self.book.close(&id, &result, Utc::now()) {
                Some(position) => {
                    info!(%id, pnl = %result.pnl, roe = %result.roe_percent, "Position closed");
                    self.cache.insert(id, position.clone());
                    self.publish(UpdateReason::Closed, vec![position]);
                }
                None => debug!(%id, "Close for unknown or already closed position ignored"),
            },
            ValuationMsg::Sync(positions) => {
                self.book.sync(positions);
                self.cache.clear();
                let mut all: Vec<Position> = self.book.positions().cloned().collect();
                all.sort_by(|a, b| a.id.cmp(&b.id));
                for position in &all {
                    self.cache.insert(position.id.clone(), position.clone());
                }
                info!(count = all.len(), "Positions synced");
                self.publish(UpdateReason::Synced, all);
            }
            ValuationMsg::PriceTick {
                symbol,
                price,
                observed_at,
            } => {
                let changed = self.book.on_price_tick(&symbol, price, observed_at);
                trace!(%symbol, %price, revalued = changed.len(), "Price tick");
                for position in &changed {
                    self.cache.insert(position.id.clone(), position.clone());
                }
                self.publish(UpdateReason::Revalued, changed);
            }
            ValuationMsg::SetWalletBalance(balance) => {
                self.book.set_wallet_balance(balance);
                self.refresh_account();
            }
            ValuationMsg::Shutdown => {}
        }
    }

    fn refresh_account(&self) -> AccountValuation {
        let account = self.book.account();
        *self.account.write() = account;

        Metrics::open_positions(account.open_positions as i64);
        Metrics::unrealized_pnl(account.unrealized_pnl.to_f64().unwrap_or(0.0));
        Metrics::margin_ratio(account.margin_ratio.to_f64().unwrap_or(0.0));
        account
    }

    fn publish(&self, reason: UpdateReason, positions: Vec<Position>) {
        let account = self.refresh_account();
        for position in positions {
            // No subscribers is fine.
            let _ = self.updates.send(PositionUpdate {
                reason,
                position,
                account,
            });
        }
    }
}

/// Handle to the valuation actor.
#[derive(Clone)]
pub struct ValuationHandle {
    tx: mpsc::Sender<ValuationMsg>,
    cache: Arc<DashMap<PositionId, Position>>,
    account: Arc<RwLock<AccountValuation>>,
    updates: broadcast::Sender<PositionUpdate>,
}

impl ValuationHandle {
    async fn send(&self, msg: ValuationMsg) -> PositionResult<()> {
        self.tx.send(msg).await.map_err(|_| PositionError::EngineStopped)
    }

    /// Track a position returned by the backend's open call.
    ///
    /// The cache is primed immediately so a close that follows right away
    /// finds the position; the actor's copy replaces it once processed.
    pub async fn upsert_position(&self, position: Position) -> PositionResult<()> {
        self.cache
            .entry(position.id.clone())
            .or_insert_with(|| position.clone());
        self.send(ValuationMsg::Upsert(position)).await
    }

    /// Apply the backend's close result.
    pub async fn close_position(&self, id: PositionId, result: ClosedPosition) -> PositionResult<()> {
        if !self.cache.contains_key(&id) {
            return Err(PositionError::UnknownPosition(id));
        }
        self.send(ValuationMsg::Close { id, result }).await
    }

    /// Replace all positions with the backend's view.
    pub async fn sync_positions(&self, positions: Vec<Position>) -> PositionResult<()> {
        self.send(ValuationMsg::Sync(positions)).await
    }

    /// Revalue open positions on `symbol` at `price`.
    pub async fn on_price_tick(&self, symbol: Symbol, price: Price, observed_at: DateTime<Utc>) -> PositionResult<()> {
        self.send(ValuationMsg::PriceTick {
            symbol,
            price,
            observed_at,
        })
        .await
    }

    pub async fn set_wallet_balance(&self, balance: Decimal) -> PositionResult<()> {
        self.send(ValuationMsg::SetWalletBalance(balance)).await
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(ValuationMsg::Shutdown).await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PositionUpdate> {
        self.updates.subscribe()
    }

    pub fn position(&self, id: &PositionId) -> Option<Position> {
        self.cache.get(id).map(|p| p.clone())
    }

    /// All known positions, sorted by id.
    pub fn positions(&self) -> Vec<Position> {
        let mut all: Vec<Position> = self.cache.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn open_positions(&self, symbol: &Symbol) -> Vec<Position> {
        self.positions()
            .into_iter()
            .filter(|p| p.is_open() && &p.symbol == symbol)
            .collect()
    }

    pub fn account(&self) -> AccountValuation {
        *self.account.read()
    }
}

/// Spawn the valuation actor.
pub fn spawn_valuation_engine(capacity: usize, wallet_balance: Decimal) -> (ValuationHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity);
    let (updates, _) = broadcast::channel(capacity.max(16));
    let cache = Arc::new(DashMap::new());
    let account = Arc::new(RwLock::new(AccountValuation::default()));

    let task = ValuationTask {
        rx,
        book: ValuationBook::new(wallet_balance),
        cache: cache.clone(),
        account: account.clone(),
        updates: updates.clone(),
    };

    let handle = ValuationHandle {
        tx,
        cache,
        account,
        updates,
    };

    (handle, tokio::spawn(task.run()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use markfeed_core::{PositionSide, Size};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn btc() -> Symbol {
        Symbol::new("BTCUSDT").unwrap()
    }

    fn open(id: &str, symbol: Symbol, side: PositionSide) -> Position {
        Position::open(
            PositionId::new(id),
            symbol,
            side,
            Size::new(dec!(0.1)),
            Price::new(dec!(50000)),
            dec!(10),
            dec!(500),
        )
    }

    #[test]
    fn test_book_revalues_only_matching_open_positions() {
        let mut book = ValuationBook::new(dec!(1000));
        book.upsert(open("a", btc(), PositionSide::Long));
        book.upsert(open("b", btc(), PositionSide::Short));
        book.upsert(open("c", Symbol::new("ETHUSDT").unwrap(), PositionSide::Long));

        let changed = book.on_price_tick(&btc(), Price::new(dec!(55000)), Utc::now());
        assert_eq!(changed.len(), 2);
        assert_eq!(changed[0].unrealized_pnl, dec!(500));
        assert_eq!(changed[1].unrealized_pnl, dec!(-500));

        let eth = book.get(&PositionId::new("c")).unwrap();
        assert_eq!(eth.unrealized_pnl, Decimal::ZERO);
    }

    #[test]
    fn test_book_close_freezes_position() {
        let mut book = ValuationBook::new(dec!(1000));
        book.upsert(open("a", btc(), PositionSide::Long));

        let result = ClosedPosition {
            pnl: dec!(123),
            roe_percent: dec!(24.6),
            symbol: btc(),
        };
        let closed = book.close(&PositionId::new("a"), &result, Utc::now()).unwrap();
        assert_eq!(closed.status, PositionStatus::Closed);
        assert_eq!(closed.unrealized_pnl, dec!(123));

        // Second close is a no-op; closed positions are no longer revalued.
        assert!(book.close(&PositionId::new("a"), &result, Utc::now()).is_none());
        assert!(book.on_price_tick(&btc(), Price::new(dec!(60000)), Utc::now()).is_empty());
        assert_eq!(book.account().open_positions, 0);
    }

    #[test]
    fn test_book_upsert_keeps_entry_price() {
        let mut book = ValuationBook::new(Decimal::ZERO);
        book.upsert(open("a", btc(), PositionSide::Long));

        let mut changed = open("a", btc(), PositionSide::Long);
        changed.entry_price = Price::new(dec!(1));
        changed.liquidation_price_estimate = Some(Price::new(dec!(45500)));
        let stored = book.upsert(changed);

        assert_eq!(stored.entry_price.inner(), dec!(50000));
        assert_eq!(stored.liquidation_price_estimate, Some(Price::new(dec!(45500))));
    }

    #[tokio::test]
    async fn test_actor_publishes_revaluations() {
        let (handle, task) = spawn_valuation_engine(32, dec!(1500));
        let mut updates = handle.subscribe();

        handle.upsert_position(open("a", btc(), PositionSide::Long)).await.unwrap();
        let opened = tokio::time::timeout(Duration::from_secs(1), updates.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(opened.reason, UpdateReason::Opened);

        handle
            .on_price_tick(btc(), Price::new(dec!(55000)), Utc::now())
            .await
            .unwrap();
        let update = tokio::time::timeout(Duration::from_secs(1), updates.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(update.reason, UpdateReason::Revalued);
        assert_eq!(update.position.unrealized_pnl, dec!(500));
        assert_eq!(update.position.roe_percent, dec!(100));
        assert_eq!(update.account.equity, dec!(2000));
        assert_eq!(update.account.margin_ratio, dec!(0.25));

        let cached = handle.position(&PositionId::new("a")).unwrap();
        assert_eq!(cached.mark_price.inner(), dec!(55000));
        assert_eq!(handle.open_positions(&btc()).len(), 1);
        assert_eq!(handle.account().unrealized_pnl, dec!(500));

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_actor_close_unknown_position() {
        let (handle, task) = spawn_valuation_engine(8, Decimal::ZERO);
        let err = handle
            .close_position(
                PositionId::new("missing"),
                ClosedPosition {
                    pnl: Decimal::ZERO,
                    roe_percent: Decimal::ZERO,
                    symbol: btc(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PositionError::UnknownPosition(_)));

        handle.shutdown().await;
        task.await.unwrap();
        assert!(matches!(
            handle.set_wallet_balance(dec!(1)).await,
            Err(PositionError::EngineStopped)
        ));
    }

    #[tokio::test]
    async fn test_actor_sync_replaces_positions() {
        let (handle, task) = spawn_valuation_engine(8, Decimal::ZERO);
        handle.upsert_position(open("old", btc(), PositionSide::Long)).await.unwrap();
        handle
            .sync_positions(vec![open("new", btc(), PositionSide::Short)])
            .await
            .unwrap();
        handle.shutdown().await;
        task.await.unwrap();

        let ids: Vec<_> = handle.positions().into_iter().map(|p| p.id.0).collect();
        assert_eq!(ids, vec!["new".to_string()]);
    }
}
