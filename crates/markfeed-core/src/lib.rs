//! Core domain types for markfeed.
//!
//! This crate provides the types shared across the feed pipeline:
//! - `Price`, `Size`: Precision-safe numeric types
//! - `Symbol`, `Topic`: Market and subscription identifiers
//! - `PriceLevel`, `OrderBookSnapshot`, `PriceTick`: Book data model
//! - `Position`: Leveraged position records revalued on every tick
//! - `ConnectionState`: Per-topic push-channel state machine states

pub mod book;
pub mod connection;
pub mod decimal;
pub mod error;
pub mod market;
pub mod position;

pub use book::{BookLevels, BookSide, OrderBookSnapshot, PriceLevel, PriceTick, Source};
pub use connection::{ConnectionState, ConnectionStateCell, ConnectionStateReader};
pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use market::{Symbol, Topic, TopicKind};
pub use position::{ClosedPosition, Position, PositionId, PositionSide, PositionStatus};
