//! Prometheus metrics and structured logging for markfeed.
//!
//! - Structured logging with tracing (JSON in production, pretty otherwise)
//! - Prometheus metrics for connection state, reconciliation outcomes,
//!   fallback usage, staleness and position valuation

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
