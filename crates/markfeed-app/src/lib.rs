//! markfeed: live order book sync and position mark-to-market.
//!
//! Wires the components together:
//! - One push connector and one polling fallback per topic
//! - Normalization and reconciliation into the order book store
//! - Staleness checks that force silent sockets to reconnect
//! - Position revaluation on every accepted price change

pub mod app;
pub mod config;
pub mod error;
pub mod session;

pub use app::MarketSync;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
