//! Per-topic push-channel connection state.
//!
//! The feed connector owns a `ConnectionStateCell`; everyone else gets a
//! read-only `ConnectionStateReader`.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Connection state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Retries exhausted; the pull refresh owns the topic until reset.
    Fallback,
}

impl ConnectionState {
    pub const ALL: [ConnectionState; 5] = [
        Self::Disconnected,
        Self::Connecting,
        Self::Connected,
        Self::Reconnecting,
        Self::Fallback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Fallback => "fallback",
        }
    }

    /// Whether a pull refresh may run in this state.
    pub fn allows_polling(&self) -> bool {
        !matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Writable connection state, held only by the connector.
#[derive(Debug)]
pub struct ConnectionStateCell {
    inner: Arc<RwLock<ConnectionState>>,
}

impl ConnectionStateCell {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(ConnectionState::Disconnected)),
        }
    }

    pub fn get(&self) -> ConnectionState {
        *self.inner.read()
    }

    /// Set a new state, returning the previous one.
    pub fn set(&self, state: ConnectionState) -> ConnectionState {
        std::mem::replace(&mut *self.inner.write(), state)
    }

    pub fn reader(&self) -> ConnectionStateReader {
        ConnectionStateReader {
            inner: self.inner.clone(),
        }
    }
}

impl Default for ConnectionStateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of a connector's state.
#[derive(Debug, Clone)]
pub struct ConnectionStateReader {
    inner: Arc<RwLock<ConnectionState>>,
}

impl ConnectionStateReader {
    pub fn get(&self) -> ConnectionState {
        *self.inner.read()
    }

    pub fn is_connected(&self) -> bool {
        self.get() == ConnectionState::Connected
    }

    /// A reader fixed to one state, for components running without a connector.
    pub fn fixed(state: ConnectionState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_follows_cell() {
        let cell = ConnectionStateCell::new();
        let reader = cell.reader();
        assert_eq!(reader.get(), ConnectionState::Disconnected);

        let prev = cell.set(ConnectionState::Connected);
        assert_eq!(prev, ConnectionState::Disconnected);
        assert!(reader.is_connected());
    }

    #[test]
    fn test_polling_allowed_unless_connected() {
        for state in ConnectionState::ALL {
            assert_eq!(state.allows_polling(), state != ConnectionState::Connected);
        }
    }
}
