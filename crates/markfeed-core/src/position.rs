//! Leveraged position records.
//!
//! Positions are created and closed by the backend; this crate only carries
//! them so the valuation engine can revalue the estimate fields.

use crate::{Price, Size, Symbol};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Position lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Pending,
    Open,
    Closed,
}

/// Position identifier assigned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionId(pub String);

impl PositionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A leveraged position and its mark-to-market estimate fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub symbol: Symbol,
    pub side: PositionSide,
    pub quantity: Size,
    /// Immutable after open.
    pub entry_price: Price,
    pub leverage: Decimal,
    pub margin: Decimal,
    pub mark_price: Price,
    pub unrealized_pnl: Decimal,
    pub roe_percent: Decimal,
    /// Server-authoritative; displayed, never recomputed locally.
    pub liquidation_price_estimate: Option<Price>,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// Build an OPEN position as returned by the backend's open call.
    ///
    /// Estimate fields start at the entry price with zero P&L.
    pub fn open(
        id: PositionId,
        symbol: Symbol,
        side: PositionSide,
        quantity: Size,
        entry_price: Price,
        leverage: Decimal,
        margin: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            symbol,
            side,
            quantity,
            entry_price,
            leverage,
            margin,
            mark_price: entry_price,
            unrealized_pnl: Decimal::ZERO,
            roe_percent: Decimal::ZERO,
            liquidation_price_estimate: None,
            status: PositionStatus::Open,
            opened_at: now,
            updated_at: now,
        }
    }

    pub fn with_liquidation_price(mut self, price: Option<Price>) -> Self {
        self.liquidation_price_estimate = price;
        self
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Notional at the current mark. `None` on overflow.
    pub fn notional(&self) -> Option<Decimal> {
        self.quantity.notional(self.mark_price)
    }
}

/// Final figures reported by the backend when a position is closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub pnl: Decimal,
    pub roe_percent: Decimal,
    pub symbol: Symbol,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_open_position_defaults() {
        let pos = Position::open(
            PositionId::new("p-1"),
            Symbol::new("BTCUSDT").unwrap(),
            PositionSide::Long,
            Size::new(dec!(0.1)),
            Price::new(dec!(50000)),
            dec!(10),
            dec!(500),
        );
        assert!(pos.is_open());
        assert_eq!(pos.mark_price, pos.entry_price);
        assert_eq!(pos.unrealized_pnl, Decimal::ZERO);
        assert_eq!(pos.notional(), Some(dec!(5000)));
        assert!(pos.liquidation_price_estimate.is_none());
    }

    #[test]
    fn test_position_serde_uses_uppercase_enums() {
        let pos = Position::open(
            PositionId::new("p-2"),
            Symbol::new("ETHUSDT").unwrap(),
            PositionSide::Short,
            Size::new(dec!(1)),
            Price::new(dec!(3000)),
            dec!(5),
            dec!(600),
        );
        let json = serde_json::to_value(&pos).unwrap();
        assert_eq!(json["side"], "SHORT");
        assert_eq!(json["status"], "OPEN");
        assert_eq!(json["symbol"], "ETHUSDT");
    }
}
