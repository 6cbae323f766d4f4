//! Position valuation for markfeed.
//!
//! Open positions are supplied by the backend (open/close/sync) and revalued
//! on every accepted price tick for their symbol. The engine never opens,
//! closes or liquidates anything itself; it only keeps the estimate fields
//! (mark price, unrealized P&L, ROE) and the account-level margin ratio
//! current for display.

pub mod engine;
pub mod error;
pub mod valuation;

pub use engine::{
    spawn_valuation_engine, PositionUpdate, UpdateReason, ValuationBook, ValuationHandle,
    ValuationMsg, ValuationTask,
};
pub use error::{PositionError, PositionResult};
pub use valuation::{revalue, roe_percent, unrealized_pnl, AccountValuation};
