//! Order book data model.
//!
//! `PriceLevel` is the canonical level shape every wire format is normalized
//! into. `OrderBookSnapshot` is the immutable, fully derived book state that
//! subscribers observe; it can only be built through `from_levels`, which
//! enforces ordering, uniqueness and the cumulative totals.

use crate::error::{CoreError, Result};
use crate::{Price, Size, Symbol};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single price level with strictly positive price and quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Price,
    pub quantity: Size,
}

impl PriceLevel {
    /// Create a level, returning `None` unless both price and quantity are positive.
    pub fn new(price: Price, quantity: Size) -> Option<Self> {
        if price.is_positive() && quantity.is_positive() {
            Some(Self { price, quantity })
        } else {
            None
        }
    }
}

/// Origin of a payload.
///
/// Ordered by priority: `Push` beats `Pull` beats `Fallback`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Source {
    /// Live push channel.
    Push,
    /// REST pull refresh.
    Pull,
    /// Locally synthesized degraded-mode data.
    Fallback,
}

impl Source {
    /// Tie-break priority (higher wins).
    pub fn priority(&self) -> u8 {
        match self {
            Self::Push => 2,
            Self::Pull => 1,
            Self::Fallback => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Pull => "pull",
            Self::Fallback => "fallback",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unsorted, normalized book candidate produced from a wire payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookLevels {
    pub asks: Vec<PriceLevel>,
    pub bids: Vec<PriceLevel>,
}

impl BookLevels {
    pub fn new(asks: Vec<PriceLevel>, bids: Vec<PriceLevel>) -> Self {
        Self { asks, bids }
    }

    pub fn is_empty(&self) -> bool {
        self.asks.is_empty() && self.bids.is_empty()
    }

    /// Mid price of the best levels, if both sides are present.
    pub fn mid_price(&self) -> Option<Price> {
        let best_ask = self.asks.iter().map(|l| l.price).min()?;
        let best_bid = self.bids.iter().map(|l| l.price).max()?;
        Some(Price::mid(best_ask, best_bid))
    }
}

/// Which side of the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookSide {
    Ask,
    Bid,
}

/// Immutable, internally consistent order book state at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderBookSnapshot {
    symbol: Symbol,
    /// Ascending by price.
    asks: Vec<PriceLevel>,
    /// Descending by price.
    bids: Vec<PriceLevel>,
    cumulative_ask_total: Vec<Size>,
    cumulative_bid_total: Vec<Size>,
    captured_at: DateTime<Utc>,
    source: Source,
    spread: Option<Price>,
    spread_percent: Option<Decimal>,
}

impl OrderBookSnapshot {
    /// Build a snapshot from normalized levels.
    ///
    /// Duplicate prices within a side collapse to the last occurrence.
    /// Fails when a cumulative total does not fit in a `Decimal`.
    pub fn from_levels(
        symbol: Symbol,
        levels: BookLevels,
        source: Source,
        captured_at: DateTime<Utc>,
    ) -> Result<Self> {
        let asks: Vec<PriceLevel> = dedupe(levels.asks).into_values().collect();
        let bids: Vec<PriceLevel> = dedupe(levels.bids).into_values().rev().collect();

        let cumulative_ask_total = running_totals(&asks)
            .ok_or_else(|| CoreError::Overflow(format!("{symbol} cumulative ask total")))?;
        let cumulative_bid_total = running_totals(&bids)
            .ok_or_else(|| CoreError::Overflow(format!("{symbol} cumulative bid total")))?;

        let (spread, spread_percent) = match (asks.first(), bids.first()) {
            (Some(ask), Some(bid)) => {
                let spread = ask.price - bid.price;
                (Some(spread), spread.pct_of(bid.price))
            }
            _ => (None, None),
        };

        Ok(Self {
            symbol,
            asks,
            bids,
            cumulative_ask_total,
            cumulative_bid_total,
            captured_at,
            source,
            spread,
            spread_percent,
        })
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn asks(&self) -> &[PriceLevel] {
        &self.asks
    }

    pub fn bids(&self) -> &[PriceLevel] {
        &self.bids
    }

    pub fn cumulative_ask_total(&self) -> &[Size] {
        &self.cumulative_ask_total
    }

    pub fn cumulative_bid_total(&self) -> &[Size] {
        &self.cumulative_bid_total
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn source(&self) -> Source {
        self.source
    }

    /// True when this snapshot was synthesized locally rather than received.
    pub fn is_synthetic(&self) -> bool {
        self.source == Source::Fallback
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.asks.first().map(|l| l.price)
    }

    pub fn best_bid(&self) -> Option<Price> {
        self.bids.first().map(|l| l.price)
    }

    /// Mid of best bid and best ask.
    pub fn mid_price(&self) -> Option<Price> {
        Some(Price::mid(self.best_ask()?, self.best_bid()?))
    }

    /// `best_ask - best_bid`, when both sides exist.
    pub fn spread(&self) -> Option<Price> {
        self.spread
    }

    /// `spread / best_bid * 100`, when both sides exist and best bid is positive.
    pub fn spread_percent(&self) -> Option<Decimal> {
        self.spread_percent
    }

    /// Best ask below best bid. Logged by the reconciler, never fatal.
    pub fn is_crossed(&self) -> bool {
        matches!((self.best_ask(), self.best_bid()), (Some(a), Some(b)) if a < b)
    }

    /// Total quantity available from the top of `side` down to `depth` levels.
    pub fn depth_total(&self, side: BookSide, depth: usize) -> Size {
        let totals = match side {
            BookSide::Ask => &self.cumulative_ask_total,
            BookSide::Bid => &self.cumulative_bid_total,
        };
        if depth == 0 {
            return Size::ZERO;
        }
        totals
            .get(depth.min(totals.len()).saturating_sub(1))
            .copied()
            .unwrap_or(Size::ZERO)
    }

    pub fn level_count(&self) -> (usize, usize) {
        (self.asks.len(), self.bids.len())
    }
}

fn dedupe(levels: Vec<PriceLevel>) -> BTreeMap<Price, PriceLevel> {
    let mut by_price = BTreeMap::new();
    for level in levels {
        by_price.insert(level.price, level);
    }
    by_price
}

fn running_totals(levels: &[PriceLevel]) -> Option<Vec<Size>> {
    let mut acc = Size::ZERO;
    levels
        .iter()
        .map(|level| {
            acc = acc.checked_add(level.quantity)?;
            Some(acc)
        })
        .collect()
}

/// Last observed price for a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTick {
    pub symbol: Symbol,
    pub price: Price,
    pub observed_at: DateTime<Utc>,
    pub source: Source,
}
