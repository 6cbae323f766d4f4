//! Precision-safe decimal types for prices and quantities.
//!
//! Everything monetary flows through `rust_decimal`, so valuation results
//! can never be NaN or infinite. Division sites guard their divisor instead.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Sub;
use std::str::FromStr;

/// Price with exact decimal precision.
///
/// Wraps `Decimal` so prices cannot be mixed up with quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub Decimal);

impl Price {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Midpoint of two prices. Halves first when the sum would overflow.
    #[inline]
    pub fn mid(a: Price, b: Price) -> Price {
        match a.0.checked_add(b.0) {
            Some(sum) => Self(sum / Decimal::TWO),
            None => Self(a.0 / Decimal::TWO + b.0 / Decimal::TWO),
        }
    }

    /// Percentage of `self` relative to `base` (`self / base * 100`).
    ///
    /// Returns `None` when `base` is not positive or the result does not fit
    /// in a `Decimal`.
    #[inline]
    pub fn pct_of(&self, base: Price) -> Option<Decimal> {
        if !base.is_positive() {
            return None;
        }
        self.0.checked_div(base.0)?.checked_mul(Decimal::ONE_HUNDRED)
    }

    /// Shift the price by a signed number of basis points. `None` on overflow.
    #[inline]
    pub fn offset_bps(&self, bps: Decimal) -> Option<Price> {
        let shift = self.0.checked_div(Decimal::from(10_000))?.checked_mul(bps)?;
        self.0.checked_add(shift).map(Self)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Price {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Price {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Sub for Price {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

/// Quantity with exact decimal precision.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Size(pub Decimal);

impl Size {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// `None` on overflow.
    #[inline]
    pub fn checked_add(self, rhs: Size) -> Option<Size> {
        self.0.checked_add(rhs.0).map(Self)
    }

    /// Notional value: size * price. `None` on overflow.
    #[inline]
    pub fn notional(&self, price: Price) -> Option<Decimal> {
        self.0.checked_mul(price.0)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Size {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Size {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}
