//! Wire-shape normalization.
//!
//! Price levels arrive either as ordered pairs (`["101.5", "2"]`, extra
//! trailing elements ignored) or as keyed objects with varying field names
//! (`{"price": .., "quantity": ..}`, `{"p": .., "q": ..}`, `{"px": .., "sz": ..}`).
//! Numbers may be JSON strings or JSON numbers. Everything resolves to a
//! `PriceLevel`; entries with a non-positive or unparseable price or quantity
//! are dropped.
//!
//! All functions here are pure.

use crate::error::{FeedError, FeedResult};
use markfeed_core::{BookLevels, Price, PriceLevel, Size, Symbol};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

const PRICE_KEYS: &[&str] = &["price", "p", "px", "rate"];
const QUANTITY_KEYS: &[&str] = &["quantity", "qty", "amount", "size", "sz", "q", "volume"];

/// Parse a decimal from a JSON string or number.
pub fn parse_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => parse_decimal_str(s.trim()),
        Value::Number(n) => parse_decimal_str(&n.to_string()),
        _ => None,
    }
}

fn parse_decimal_str(s: &str) -> Option<Decimal> {
    if s.is_empty() {
        return None;
    }
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

fn first_field<'a>(obj: &'a serde_json::Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k))
}

/// Normalize one level in either supported shape.
pub fn normalize_level(raw: &Value) -> Option<PriceLevel> {
    let (price, quantity) = match raw {
        Value::Array(items) if items.len() >= 2 => (parse_decimal(&items[0])?, parse_decimal(&items[1])?),
        Value::Object(obj) => (
            parse_decimal(first_field(obj, PRICE_KEYS)?)?,
            parse_decimal(first_field(obj, QUANTITY_KEYS)?)?,
        ),
        _ => return None,
    };
    PriceLevel::new(Price::new(price), Size::new(quantity))
}

fn normalize_side(raw: Option<&Value>) -> Vec<PriceLevel> {
    match raw {
        Some(Value::Array(levels)) => levels.iter().filter_map(normalize_level).collect(),
        _ => Vec::new(),
    }
}

/// Normalize a `{asks: [...], bids: [...]}` payload.
///
/// Fails only when neither side is present as an array. Individual invalid
/// levels are filtered. Ordering is left to the snapshot builder.
pub fn normalize_book(payload: &Value) -> FeedResult<BookLevels> {
    let obj = payload
        .as_object()
        .ok_or_else(|| FeedError::MalformedPayload("book payload is not an object".to_string()))?;

    let asks = obj.get("asks");
    let bids = obj.get("bids");
    if !asks.map_or(false, Value::is_array) && !bids.map_or(false, Value::is_array) {
        return Err(FeedError::MalformedPayload(
            "book payload has no asks/bids arrays".to_string(),
        ));
    }

    Ok(BookLevels::new(normalize_side(asks), normalize_side(bids)))
}

/// Normalize a `{SYMBOL: price, ...}` price update.
///
/// A single `{symbol, price}` object is accepted as well. Entries with an
/// invalid symbol or a non-positive price are dropped. Output is sorted by
/// symbol.
pub fn normalize_price_update(payload: &Value) -> Vec<(Symbol, Price)> {
    let Some(obj) = payload.as_object() else {
        return Vec::new();
    };

    if let (Some(symbol), Some(price)) = (obj.get("symbol"), first_field(obj, PRICE_KEYS)) {
        return symbol
            .as_str()
            .and_then(|s| price_entry(s, price))
            .into_iter()
            .collect();
    }

    let mut out: Vec<(Symbol, Price)> = obj
        .iter()
        .filter_map(|(symbol, price)| price_entry(symbol, price))
        .collect();
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}

fn price_entry(symbol: &str, price: &Value) -> Option<(Symbol, Price)> {
    let symbol = Symbol::new(symbol).ok()?;
    let price = Price::new(parse_decimal(price)?);
    price.is_positive().then_some((symbol, price))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_parse_decimal_forms() {
        assert_eq!(parse_decimal(&json!("101.25")), Some(dec!(101.25)));
        assert_eq!(parse_decimal(&json!(" 7 ")), Some(dec!(7)));
        assert_eq!(parse_decimal(&json!(42)), Some(dec!(42)));
        assert_eq!(parse_decimal(&json!(0.5)), Some(dec!(0.5)));
        assert_eq!(parse_decimal(&json!("1e-3")), Some(dec!(0.001)));
        assert_eq!(parse_decimal(&json!("abc")), None);
        assert_eq!(parse_decimal(&json!("")), None);
        assert_eq!(parse_decimal(&json!(null)), None);
    }

    #[test]
    fn test_array_pair_level() {
        let level = normalize_level(&json!(["100.5", "2"])).unwrap();
        assert_eq!(level.price.inner(), dec!(100.5));
        assert_eq!(level.quantity.inner(), dec!(2));

        // Extra elements (order counts etc.) are ignored.
        assert!(normalize_level(&json!([100, 1, 7])).is_some());
        assert!(normalize_level(&json!([100])).is_none());
    }

    #[test]
    fn test_keyed_object_alternate_names() {
        for raw in [
            json!({"price": "10", "quantity": "1"}),
            json!({"p": 10, "q": 1}),
            json!({"px": "10", "sz": "1"}),
            json!({"rate": "10", "amount": "1"}),
            json!({"price": 10, "size": 1}),
            json!({"price": "10", "volume": "1"}),
        ] {
            let level = normalize_level(&raw).unwrap_or_else(|| panic!("rejected {raw}"));
            assert_eq!(level.price.inner(), dec!(10));
            assert_eq!(level.quantity.inner(), dec!(1));
        }
    }

    #[test]
    fn test_non_positive_levels_discarded() {
        assert!(normalize_level(&json!(["0", "1"])).is_none());
        assert!(normalize_level(&json!(["-1", "1"])).is_none());
        assert!(normalize_level(&json!(["1", "0"])).is_none());
        assert!(normalize_level(&json!({"price": "1"})).is_none());
        assert!(normalize_level(&json!("1@2")).is_none());
    }

    #[test]
    fn test_normalize_book_mixed_shapes() {
        let payload = json!({
            "asks": [["101", "1"], {"price": "102", "qty": "2"}, ["0", "5"]],
            "bids": [{"p": "99", "q": "3"}, ["bad", "1"]]
        });
        let levels = normalize_book(&payload).unwrap();
        assert_eq!(levels.asks.len(), 2);
        assert_eq!(levels.bids.len(), 1);
    }

    #[test]
    fn test_normalize_book_is_deterministic() {
        let payload = json!({"asks": [["101", "1"], ["100", "2"]], "bids": [["99", "1"]]});
        assert_eq!(normalize_book(&payload).unwrap(), normalize_book(&payload).unwrap());
    }

    #[test]
    fn test_normalize_book_rejects_non_book() {
        assert!(normalize_book(&json!([1, 2])).is_err());
        assert!(normalize_book(&json!({"foo": 1})).is_err());
        // One side alone is fine.
        assert!(normalize_book(&json!({"bids": []})).is_ok());
    }

    #[test]
    fn test_normalize_price_update_map() {
        let ticks = normalize_price_update(&json!({
            "ethusdt": "3000.5",
            "BTCUSDT": 50000,
            "BAD": "0",
            "": "1"
        }));
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0].0.as_str(), "BTCUSDT");
        assert_eq!(ticks[0].1.inner(), dec!(50000));
        assert_eq!(ticks[1].0.as_str(), "ETHUSDT");
    }

    #[test]
    fn test_normalize_price_update_single() {
        let ticks = normalize_price_update(&json!({"symbol": "SOLUSDT", "price": "150"}));
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].1.inner(), dec!(150));

        assert!(normalize_price_update(&json!("nope")).is_empty());
    }
}
