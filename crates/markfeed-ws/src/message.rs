//! Push-channel message types.

use crate::error::WsResult;
use markfeed_core::{Topic, TopicKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Subscribe Request (Outgoing)
// ============================================================================

/// Subscription request sent right after the handshake.
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeRequest {
    pub method: &'static str,
    pub params: SubscribeParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscribeParams {
    #[serde(rename = "type")]
    pub channel: &'static str,
    pub symbol: String,
}

impl SubscribeRequest {
    pub fn for_topic(topic: &Topic) -> Self {
        Self {
            method: "subscribe",
            params: SubscribeParams {
                channel: topic.kind.wire_type(),
                symbol: topic.symbol.to_string(),
            },
        }
    }

    pub fn to_text(&self) -> WsResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// Push Messages (Incoming)
// ============================================================================

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    data: Value,
}

/// A recognised push message. The `data` payload is left raw for the
/// normalizer.
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    /// `{type: "orderbook", data: {asks, bids}}`
    OrderBook(Value),
    /// `{type: "price_update", data: {SYMBOL: price, ...}}`
    PriceUpdate(Value),
    /// Any other `type` (acks, notices). Not an error.
    Ignored(Option<String>),
}

impl PushMessage {
    /// Parse a text frame. Only invalid JSON is an error.
    pub fn parse(text: &str) -> WsResult<Self> {
        let envelope: Envelope = serde_json::from_str(text)?;
        Ok(match envelope.kind.as_deref() {
            Some("orderbook") => Self::OrderBook(envelope.data),
            Some("price_update") => Self::PriceUpdate(envelope.data),
            _ => Self::Ignored(envelope.kind),
        })
    }

    /// Topic kind this message feeds, if any.
    pub fn topic_kind(&self) -> Option<TopicKind> {
        match self {
            Self::OrderBook(_) => Some(TopicKind::OrderBook),
            Self::PriceUpdate(_) => Some(TopicKind::Ticker),
            Self::Ignored(_) => None,
        }
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignored(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use markfeed_core::Symbol;

    #[test]
    fn test_subscribe_request_shape() {
        let topic = Topic::order_book(Symbol::new("btcusdt").unwrap());
        let text = SubscribeRequest::for_topic(&topic).to_text().unwrap();
        let json: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["method"], "subscribe");
        assert_eq!(json["params"]["type"], "orderbook");
        assert_eq!(json["params"]["symbol"], "BTCUSDT");

        let ticker = Topic::ticker(Symbol::new("ETHUSDT").unwrap());
        let text = SubscribeRequest::for_topic(&ticker).to_text().unwrap();
        assert!(text.contains("\"price_update\""));
    }

    #[test]
    fn test_parse_orderbook() {
        let msg =
            PushMessage::parse(r#"{"type":"orderbook","data":{"asks":[["101","1"]],"bids":[]}}"#)
                .unwrap();
        match msg {
            PushMessage::OrderBook(data) => assert_eq!(data["asks"][0][0], "101"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_price_update() {
        let msg = PushMessage::parse(r#"{"type":"price_update","data":{"BTCUSDT":50000}}"#).unwrap();
        assert_eq!(msg.topic_kind(), Some(TopicKind::Ticker));
    }

    #[test]
    fn test_unknown_type_is_ignored_not_error() {
        let msg = PushMessage::parse(r#"{"type":"subscribed","data":{}}"#).unwrap();
        assert_eq!(msg, PushMessage::Ignored(Some("subscribed".to_string())));

        let msg = PushMessage::parse(r#"{"hello":"world"}"#).unwrap();
        assert!(msg.is_ignored());
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(PushMessage::parse("not json").is_err());
    }
}
