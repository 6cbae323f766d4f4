//! Heartbeat tracking for a push connection.
//!
//! A ping goes out after `interval` of inbound silence; a ping left
//! unanswered for `timeout` marks the socket dead.

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug)]
struct HeartbeatState {
    last_ping: Option<Instant>,
    last_inbound: Instant,
    waiting_for_pong: bool,
}

/// Ping/pong bookkeeping for one connection.
#[derive(Debug)]
pub struct Heartbeat {
    interval: Duration,
    timeout: Duration,
    state: Mutex<HeartbeatState>,
}

impl Heartbeat {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            state: Mutex::new(HeartbeatState {
                last_ping: None,
                last_inbound: Instant::now(),
                waiting_for_pong: false,
            }),
        }
    }

    /// Reset on a fresh connection.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.last_ping = None;
        state.last_inbound = Instant::now();
        state.waiting_for_pong = false;
    }

    pub fn record_ping(&self) {
        let mut state = self.state.lock();
        state.last_ping = Some(Instant::now());
        state.waiting_for_pong = true;
    }

    pub fn record_pong(&self) {
        let mut state = self.state.lock();
        state.waiting_for_pong = false;
        state.last_inbound = Instant::now();
        if let Some(ping) = state.last_ping {
            debug!(rtt_ms = ping.elapsed().as_millis() as u64, "Received pong");
        }
    }

    /// Any inbound frame counts as liveness.
    pub fn record_inbound(&self) {
        self.state.lock().last_inbound = Instant::now();
    }

    pub fn is_timed_out(&self) -> bool {
        let state = self.state.lock();
        match (state.waiting_for_pong, state.last_ping) {
            (true, Some(ping)) => ping.elapsed() > self.timeout,
            _ => false,
        }
    }

    pub fn should_ping(&self) -> bool {
        let state = self.state.lock();
        !state.waiting_for_pong && state.last_inbound.elapsed() >= self.interval
    }

    /// Cadence at which the connection loop checks the heartbeat.
    pub fn check_period(&self) -> Duration {
        (self.interval / 2).max(Duration::from_millis(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_initial_state() {
        let hb = Heartbeat::new(Duration::from_secs(30), Duration::from_secs(10));
        assert!(!hb.is_timed_out());
        assert!(!hb.should_ping());
    }

    #[test]
    fn test_ping_pong_clears_wait() {
        let hb = Heartbeat::new(Duration::ZERO, Duration::from_secs(10));
        assert!(hb.should_ping());

        hb.record_ping();
        assert!(!hb.should_ping());

        hb.record_pong();
        assert!(!hb.is_timed_out());
    }

    #[test]
    fn test_unanswered_ping_times_out() {
        let hb = Heartbeat::new(Duration::ZERO, Duration::ZERO);
        hb.record_ping();
        std::thread::sleep(Duration::from_millis(5));
        assert!(hb.is_timed_out());

        hb.reset();
        assert!(!hb.is_timed_out());
    }
}
