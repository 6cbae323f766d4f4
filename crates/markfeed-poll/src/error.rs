//! Polling error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PollError {
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Empty order book for {0}")]
    EmptyBook(String),

    #[error(transparent)]
    Feed(#[from] markfeed_feed::FeedError),
}

impl PollError {
    /// Short label used for poll outcome metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::HttpClient(_) => "http",
            Self::Status { .. } => "status",
            Self::Decode(_) => "decode",
            Self::EmptyBook(_) => "empty",
            Self::Feed(_) => "malformed",
        }
    }
}

pub type PollResult<T> = Result<T, PollError>;
