//! Order book pipeline for markfeed.
//!
//! Normalizes push/pull payloads into canonical levels, reconciles them
//! into immutable snapshots by freshness and source priority, publishes
//! snapshots per symbol, and flags topics that have gone silent.

pub mod error;
pub mod normalize;
pub mod reconciler;
pub mod staleness;
pub mod store;

pub use error::{FeedError, FeedResult};
pub use normalize::{normalize_book, normalize_level, normalize_price_update, parse_decimal};
pub use reconciler::{Outcome, Reconciler, RejectReason, TickOutcome};
pub use staleness::{StalenessConfig, StalenessMonitor};
pub use store::{OrderBookStore, SnapshotReceiver};
