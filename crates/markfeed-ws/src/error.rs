//! Feed connector error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Heartbeat timeout")]
    HeartbeatTimeout,

    #[error("Forced reconnect: {0}")]
    ForcedReconnect(String),

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WsError {
    /// Short label used for reconnect metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::ConnectionFailed(_) => "connect_failed",
            Self::ConnectionClosed { .. } => "closed",
            Self::SendFailed(_) => "send_failed",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::ForcedReconnect(_) => "forced",
            Self::Tungstenite(_) => "transport",
            Self::Json(_) => "json",
        }
    }
}

pub type WsResult<T> = Result<T, WsError>;
