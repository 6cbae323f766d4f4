//! Push-channel client for markfeed topics.
//!
//! One `FeedConnector` per topic, each with:
//! - Exponential backoff (1s base, 30s cap, jitter) and a retry ceiling
//! - FALLBACK parking once the ceiling is hit, until explicitly reset
//! - Ping/pong heartbeat and forced reconnect for silent sockets
//! - Channel-based delivery of messages and state changes

pub mod backoff;
pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod message;

pub use backoff::{BackoffConfig, ReconnectDecision, ReconnectPolicy};
pub use connection::{
    ConnectorEvent, ConnectorEventKind, FeedConfig, FeedConnector, FeedConnectorHandle,
};
pub use error::{WsError, WsResult};
pub use heartbeat::Heartbeat;
pub use message::{PushMessage, SubscribeRequest};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Install the TLS crypto provider.
/// Must be called before any `wss://` connection is made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
