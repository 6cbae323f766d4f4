//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration load error: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("Invalid input: {0}")]
    Core(#[from] markfeed_core::CoreError),

    #[error("Polling error: {0}")]
    Poll(#[from] markfeed_poll::PollError),

    #[error("Valuation error: {0}")]
    Position(#[from] markfeed_position::PositionError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] markfeed_telemetry::TelemetryError),

    #[error("Consumer loop already running")]
    AlreadyRunning,
}

pub type AppResult<T> = Result<T, AppError>;
