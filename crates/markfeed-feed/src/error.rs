//! Feed error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(#[from] markfeed_core::CoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type FeedResult<T> = Result<T, FeedError>;
