//! Position valuation error types.

use markfeed_core::PositionId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PositionError {
    #[error("Unknown position: {0}")]
    UnknownPosition(PositionId),

    #[error("Valuation engine stopped")]
    EngineStopped,
}

pub type PositionResult<T> = Result<T, PositionError>;
