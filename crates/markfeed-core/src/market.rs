//! Symbol and topic identifiers.
//!
//! A topic is one push-channel subscription: a symbol paired with the kind
//! of data streamed for it (full order book or price ticks).

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tradable symbol (e.g., "BTCUSDT").
///
/// Always stored upper-cased so wire payloads keyed by `btcusdt` and
/// `BTCUSDT` resolve to the same market.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Create a symbol, normalizing case and trimming whitespace.
    pub fn new(raw: impl AsRef<str>) -> Result<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(CoreError::InvalidSymbol("empty symbol".to_string()));
        }
        if trimmed.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(CoreError::InvalidSymbol(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Symbol {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

impl FromStr for Symbol {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Kind of data streamed on a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicKind {
    /// Full order book snapshots.
    OrderBook,
    /// Last-price ticks.
    Ticker,
}

impl TopicKind {
    /// Value of the `type` field in push messages for this kind.
    pub fn wire_type(&self) -> &'static str {
        match self {
            Self::OrderBook => "orderbook",
            Self::Ticker => "price_update",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::OrderBook => "orderbook",
            Self::Ticker => "ticker",
        }
    }
}

impl fmt::Display for TopicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One push-channel subscription.
///
/// Format: `{kind}:{symbol}` (e.g., "orderbook:BTCUSDT").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Topic {
    pub kind: TopicKind,
    pub symbol: Symbol,
}

impl Topic {
    pub fn new(kind: TopicKind, symbol: Symbol) -> Self {
        Self { kind, symbol }
    }

    pub fn order_book(symbol: Symbol) -> Self {
        Self::new(TopicKind::OrderBook, symbol)
    }

    pub fn ticker(symbol: Symbol) -> Self {
        Self::new(TopicKind::Ticker, symbol)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.symbol)
    }
}

impl FromStr for Topic {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, symbol) = s
            .split_once(':')
            .ok_or_else(|| CoreError::InvalidTopic(s.to_string()))?;
        let kind = match kind.to_ascii_lowercase().as_str() {
            "orderbook" => TopicKind::OrderBook,
            "ticker" => TopicKind::Ticker,
            _ => return Err(CoreError::InvalidTopic(s.to_string())),
        };
        Ok(Self::new(kind, Symbol::new(symbol)?))
    }
}
