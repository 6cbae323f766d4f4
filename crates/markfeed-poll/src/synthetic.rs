//! Deterministic synthetic book used when pulls fail.
//!
//! Levels are spaced `step_bps` apart on each side of the reference mid,
//! with quantity tapering linearly from `base_quantity` at the touch. No
//! randomness: the same mid always yields the same book.

use markfeed_core::{BookLevels, Price, PriceLevel, Size};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntheticConfig {
    /// Levels per side.
    pub levels: usize,
    pub step_bps: Decimal,
    pub base_quantity: Decimal,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            levels: 10,
            step_bps: Decimal::from(5),
            base_quantity: Decimal::ONE,
        }
    }
}

/// Build synthetic levels around `mid`. Empty if `mid` is not positive.
pub fn synthetic_levels(mid: Price, config: &SyntheticConfig) -> BookLevels {
    if !mid.is_positive() || config.levels == 0 {
        return BookLevels::default();
    }

    let total = Decimal::from(config.levels as u64);
    let mut asks = Vec::with_capacity(config.levels);
    let mut bids = Vec::with_capacity(config.levels);

    for i in 0..config.levels {
        let Some(offset) = config.step_bps.checked_mul(Decimal::from(i as u64 + 1)) else {
            break;
        };
        let quantity = Size::new(config.base_quantity * (total - Decimal::from(i as u64)) / total);

        if let Some(level) = mid.offset_bps(offset).and_then(|px| PriceLevel::new(px, quantity)) {
            asks.push(level);
        }
        if let Some(level) = mid.offset_bps(-offset).and_then(|px| PriceLevel::new(px, quantity)) {
            bids.push(level);
        }
    }

    BookLevels::new(asks, bids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_levels_straddle_mid() {
        let mid = Price::new(dec!(10000));
        let levels = synthetic_levels(mid, &SyntheticConfig::default());

        assert_eq!(levels.asks.len(), 10);
        assert_eq!(levels.bids.len(), 10);
        assert_eq!(levels.asks[0].price.inner(), dec!(10005));
        assert_eq!(levels.bids[0].price.inner(), dec!(9995));
        assert!(levels.asks.iter().all(|l| l.price > mid));
        assert!(levels.bids.iter().all(|l| l.price < mid));
        assert_eq!(levels.mid_price(), Some(mid));
    }

    #[test]
    fn test_quantities_taper() {
        let cfg = SyntheticConfig {
            levels: 4,
            step_bps: dec!(10),
            base_quantity: dec!(2),
        };
        let levels = synthetic_levels(Price::new(dec!(100)), &cfg);
        let qty: Vec<_> = levels.asks.iter().map(|l| l.quantity.inner()).collect();
        assert_eq!(qty, vec![dec!(2), dec!(1.5), dec!(1), dec!(0.5)]);
    }

    #[test]
    fn test_deterministic() {
        let cfg = SyntheticConfig::default();
        let mid = Price::new(dec!(3210.5));
        assert_eq!(synthetic_levels(mid, &cfg), synthetic_levels(mid, &cfg));
    }

    #[test]
    fn test_extreme_mid_skips_unrepresentable_levels() {
        let levels = synthetic_levels(Price::new(Decimal::MAX), &SyntheticConfig::default());
        assert!(levels.asks.is_empty());
        assert_eq!(levels.bids.len(), 10);
    }

    #[test]
    fn test_no_reference_price() {
        assert!(synthetic_levels(Price::ZERO, &SyntheticConfig::default()).is_empty());
    }
}
