//! Pure valuation formulas.
//!
//! All arithmetic is `Decimal`, so there is no NaN to propagate. Division
//! by a non-positive margin or equity yields zero, and so does any result
//! too large for a `Decimal`.

use chrono::{DateTime, Utc};
use markfeed_core::{Position, PositionSide, Price, Size};
use rust_decimal::Decimal;
use serde::Serialize;

/// `(price - entry) * qty` for longs, `(entry - price) * qty` for shorts.
pub fn unrealized_pnl(side: PositionSide, entry_price: Price, mark_price: Price, quantity: Size) -> Decimal {
    let diff = match side {
        PositionSide::Long => mark_price.inner().checked_sub(entry_price.inner()),
        PositionSide::Short => entry_price.inner().checked_sub(mark_price.inner()),
    };
    diff.and_then(|d| d.checked_mul(quantity.inner()))
        .unwrap_or(Decimal::ZERO)
}

/// `pnl / margin * 100`, or 0 when margin is not positive.
pub fn roe_percent(unrealized_pnl: Decimal, margin: Decimal) -> Decimal {
    if margin <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    unrealized_pnl
        .checked_div(margin)
        .and_then(|r| r.checked_mul(Decimal::ONE_HUNDRED))
        .unwrap_or(Decimal::ZERO)
}

/// Revalue an open position at `price`. Returns false (and leaves the
/// position untouched) if it is not open.
pub fn revalue(position: &mut Position, price: Price, at: DateTime<Utc>) -> bool {
    if !position.is_open() {
        return false;
    }
    let pnl = unrealized_pnl(position.side, position.entry_price, price, position.quantity);
    position.mark_price = price;
    position.unrealized_pnl = pnl;
    position.roe_percent = roe_percent(pnl, position.margin);
    position.updated_at = at;
    true
}

/// Account-level figures across open positions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccountValuation {
    pub wallet_balance: Decimal,
    /// Sum of posted margin on open positions.
    pub used_margin: Decimal,
    pub unrealized_pnl: Decimal,
    /// `wallet_balance + unrealized_pnl`
    pub equity: Decimal,
    /// `used_margin / equity`, 0 when equity is not positive.
    pub margin_ratio: Decimal,
    pub open_positions: usize,
}

impl AccountValuation {
    pub fn compute<'a>(wallet_balance: Decimal, positions: impl IntoIterator<Item = &'a Position>) -> Self {
        let mut used_margin = Decimal::ZERO;
        let mut pnl = Decimal::ZERO;
        let mut open_positions = 0;

        for position in positions.into_iter().filter(|p| p.is_open()) {
            used_margin = used_margin.saturating_add(position.margin);
            pnl = pnl.saturating_add(position.unrealized_pnl);
            open_positions += 1;
        }

        let equity = wallet_balance.saturating_add(pnl);
        let margin_ratio = if equity > Decimal::ZERO {
            used_margin.checked_div(equity).unwrap_or(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };

        Self {
            wallet_balance,
            used_margin,
            unrealized_pnl: pnl,
            equity,
            margin_ratio,
            open_positions,
        }
    }
}
