//! Reconciliation of push and pull payloads into the store.
//!
//! A payload is applied when its `observed_at` is strictly newer than the
//! current value, or equal in time but from a strictly higher-priority
//! source (PUSH > PULL > FALLBACK). Anything older is rejected, whatever its
//! source. The same rule governs price ticks.

use crate::store::OrderBookStore;
use chrono::{DateTime, Utc};
use markfeed_core::{BookLevels, OrderBookSnapshot, Price, PriceTick, Source, Symbol};
use std::sync::Arc;
use tracing::{debug, warn};

/// Why a payload was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Older than the current value.
    Stale,
    /// Same instant, not a higher-priority source.
    NotHigherPriority,
    /// Nothing left after normalization.
    Empty,
    /// Derived totals do not fit in a `Decimal`.
    Overflow,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stale => "stale",
            Self::NotHigherPriority => "priority",
            Self::Empty => "empty",
            Self::Overflow => "overflow",
        }
    }
}

/// Result of offering a book payload.
#[derive(Debug, Clone)]
pub enum Outcome {
    Applied(Arc<OrderBookSnapshot>),
    Rejected(RejectReason),
}

impl Outcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Result of offering a price tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Stored. `price_changed` is false when the price equals the previous one.
    Applied { tick: PriceTick, price_changed: bool },
    Rejected(RejectReason),
}

fn admit(
    incoming_at: DateTime<Utc>,
    incoming: Source,
    current: Option<(DateTime<Utc>, Source)>,
) -> Result<(), RejectReason> {
    let Some((current_at, current_source)) = current else {
        return Ok(());
    };
    if incoming_at > current_at {
        Ok(())
    } else if incoming_at < current_at {
        Err(RejectReason::Stale)
    } else if incoming.priority() > current_source.priority() {
        Ok(())
    } else {
        Err(RejectReason::NotHigherPriority)
    }
}

/// Gatekeeper in front of the `OrderBookStore`.
#[derive(Debug, Clone)]
pub struct Reconciler {
    store: Arc<OrderBookStore>,
}

impl Reconciler {
    pub fn new(store: Arc<OrderBookStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<OrderBookStore> {
        &self.store
    }

    /// Offer normalized book levels for `symbol`.
    ///
    /// On acceptance the snapshot is built (sorted, deduplicated, totals and
    /// spread derived) and published in one step.
    pub fn accept(
        &self,
        symbol: &Symbol,
        source: Source,
        levels: BookLevels,
        observed_at: DateTime<Utc>,
    ) -> Outcome {
        if levels.is_empty() {
            return Outcome::Rejected(RejectReason::Empty);
        }

        let current = self
            .store
            .get_snapshot(symbol)
            .map(|s| (s.captured_at(), s.source()));
        if let Err(reason) = admit(observed_at, source, current) {
            debug!(%symbol, %source, reason = reason.as_str(), "Book payload rejected");
            return Outcome::Rejected(reason);
        }

        let snapshot = match OrderBookSnapshot::from_levels(symbol.clone(), levels, source, observed_at) {
            Ok(snapshot) => Arc::new(snapshot),
            Err(e) => {
                warn!(%symbol, %source, error = %e, "Book payload rejected");
                return Outcome::Rejected(RejectReason::Overflow);
            }
        };
        if snapshot.is_crossed() {
            warn!(
                %symbol,
                best_ask = ?snapshot.best_ask(),
                best_bid = ?snapshot.best_bid(),
                "Crossed book accepted"
            );
        }

        self.store.publish(snapshot.clone());
        Outcome::Applied(snapshot)
    }

    /// Offer a price tick for `symbol`.
    pub fn accept_tick(
        &self,
        symbol: &Symbol,
        source: Source,
        price: Price,
        observed_at: DateTime<Utc>,
    ) -> TickOutcome {
        if !price.is_positive() {
            return TickOutcome::Rejected(RejectReason::Empty);
        }

        let previous = self.store.last_tick(symbol);
        let current = previous.as_ref().map(|t| (t.observed_at, t.source));
        if let Err(reason) = admit(observed_at, source, current) {
            debug!(%symbol, %source, reason = reason.as_str(), "Price tick rejected");
            return TickOutcome::Rejected(reason);
        }

        let tick = PriceTick {
            symbol: symbol.clone(),
            price,
            observed_at,
            source,
        };
        let price_changed = previous.map_or(true, |p| p.price != price);
        self.store.set_tick(tick.clone());
        TickOutcome::Applied {
            tick,
            price_changed,
        }
    }
}
