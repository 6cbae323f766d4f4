//! Pull-based refresh for markfeed topics.
//!
//! While a topic's push channel is anything but CONNECTED, `PollingFallback`
//! fetches its order book over REST on a fixed interval. When the fetch
//! fails it degrades to a deterministic synthetic book around the last known
//! mid price, tagged `Source::Fallback`.

pub mod client;
pub mod error;
pub mod poller;
pub mod synthetic;

pub use client::{OrderBookClient, OrderBookFetcher};
pub use error::{PollError, PollResult};
pub use poller::{PollConfig, PollEvent, PollPayload, PollStatsSnapshot, PollingFallback};
pub use synthetic::{synthetic_levels, SyntheticConfig};
