//! Prometheus metrics for markfeed.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A registration failure means a
//! duplicate metric name, which is a programming error and should crash at
//! first use rather than silently drop data.

use crate::error::{TelemetryError, TelemetryResult};
use markfeed_core::ConnectionState;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_int_gauge, CounterVec,
    Encoder, Gauge, GaugeVec, IntGauge, TextEncoder,
};

/// Connection state per topic (1 = active state, 0 otherwise).
/// Labels: topic, state
pub static CONNECTION_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "markfeed_connection_state",
        "Push channel state per topic (1=active, 0=inactive)",
        &["topic", "state"]
    )
    .unwrap()
});

/// Push connection drops by reason.
pub static RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "markfeed_reconnect_total",
        "Push connection drops leading to a reconnect cycle",
        &["topic", "reason"]
    )
    .unwrap()
});

/// Transitions into FALLBACK.
pub static FALLBACK_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "markfeed_fallback_total",
        "Topics that exhausted their reconnect budget",
        &["topic"]
    )
    .unwrap()
});

/// Pull results delivered to the consumer loop.
/// Labels: topic, source (pull/fallback)
pub static POLL_EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "markfeed_poll_events_total",
        "Pulled or synthesized payloads delivered",
        &["topic", "source"]
    )
    .unwrap()
});

/// Reconciliation outcomes.
/// Labels: kind (book/tick), source, result (applied/stale/priority/empty)
pub static RECONCILE_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "markfeed_reconcile_total",
        "Payloads offered to the reconciler by outcome",
        &["kind", "source", "result"]
    )
    .unwrap()
});

/// Payloads dropped as malformed.
pub static MALFORMED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "markfeed_malformed_total",
        "Payloads dropped during normalization",
        &["origin"]
    )
    .unwrap()
});

/// 1 while the symbol's current snapshot is synthetic.
pub static SYNTHETIC_MODE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "markfeed_synthetic_mode",
        "Current snapshot is synthetic (1) or real (0)",
        &["symbol"]
    )
    .unwrap()
});

pub static SPREAD_PERCENT: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "markfeed_spread_percent",
        "Best ask minus best bid as a percentage of best bid",
        &["symbol"]
    )
    .unwrap()
});

/// Staleness trips (forced reconnects).
pub static STALE_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "markfeed_stale_total",
        "Connected topics found silent past their threshold",
        &["topic"]
    )
    .unwrap()
});

pub static OPEN_POSITIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("markfeed_open_positions", "Open positions being revalued").unwrap()
});

pub static UNREALIZED_PNL: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "markfeed_unrealized_pnl",
        "Aggregate unrealized P&L across open positions"
    )
    .unwrap()
});

pub static MARGIN_RATIO: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("markfeed_margin_ratio", "Used margin divided by equity").unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    /// Set the active connection state for a topic; all other states go to 0.
    pub fn connection_state(topic: &str, state: ConnectionState) {
        for s in ConnectionState::ALL {
            CONNECTION_STATE
                .with_label_values(&[topic, s.as_str()])
                .set(if s == state { 1.0 } else { 0.0 });
        }
    }

    /// Forget a closed topic's state series.
    pub fn connection_closed(topic: &str) {
        for s in ConnectionState::ALL {
            let _ = CONNECTION_STATE.remove_label_values(&[topic, s.as_str()]);
        }
    }

    pub fn reconnect(topic: &str, reason: &str) {
        RECONNECT_TOTAL.with_label_values(&[topic, reason]).inc();
    }

    pub fn fallback_entered(topic: &str) {
        FALLBACK_TOTAL.with_label_values(&[topic]).inc();
    }

    pub fn poll_event(topic: &str, source: &str) {
        POLL_EVENTS_TOTAL.with_label_values(&[topic, source]).inc();
    }

    pub fn reconciled(kind: &str, source: &str, result: &str) {
        RECONCILE_TOTAL.with_label_values(&[kind, source, result]).inc();
    }

    pub fn malformed(origin: &str) {
        MALFORMED_TOTAL.with_label_values(&[origin]).inc();
    }

    pub fn synthetic_mode(symbol: &str, active: bool) {
        SYNTHETIC_MODE
            .with_label_values(&[symbol])
            .set(if active { 1.0 } else { 0.0 });
    }

    pub fn spread_percent(symbol: &str, pct: f64) {
        SPREAD_PERCENT.with_label_values(&[symbol]).set(pct);
    }

    pub fn stale(topic: &str) {
        STALE_TOTAL.with_label_values(&[topic]).inc();
    }

    pub fn open_positions(count: i64) {
        OPEN_POSITIONS.set(count);
    }

    pub fn unrealized_pnl(value: f64) {
        UNREALIZED_PNL.set(value);
    }

    pub fn margin_ratio(value: f64) {
        MARGIN_RATIO.set(value);
    }

    /// Render every registered metric in the text exposition format.
    pub fn gather_text() -> TelemetryResult<String> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buf)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}
