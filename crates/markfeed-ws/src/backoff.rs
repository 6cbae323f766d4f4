//! Reconnect policy: exponential backoff with a fixed retry ceiling.
//!
//! Delay for attempt `n` (0-based) is `min(base * 2^n, max)` plus jitter.
//! Once `max_attempts` retries have been spent, the next failure yields
//! `ReconnectDecision::Fallback` instead of another delay.

use std::time::Duration;

/// Policy parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    /// Upper bound (exclusive) for the random jitter added to each delay.
    pub max_jitter_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 5,
            max_jitter_ms: 250,
        }
    }
}

/// What to do after a connection failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Wait, then try again.
    Retry { attempt: u32, delay: Duration },
    /// Retry budget exhausted.
    Fallback,
}

/// Stateful reconnect counter.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: BackoffConfig,
    attempt: u32,
}

impl ReconnectPolicy {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Number of retries spent since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Reset after a successful handshake or an explicit reset.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Delay for `attempt` without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(20);
        let delay = self
            .config
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.config.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Record a failure and decide the next step.
    pub fn on_failure(&mut self) -> ReconnectDecision {
        if self.attempt >= self.config.max_attempts {
            return ReconnectDecision::Fallback;
        }
        let attempt = self.attempt;
        let delay = self.base_delay(attempt) + jitter(self.config.max_jitter_ms);
        self.attempt += 1;
        ReconnectDecision::Retry { attempt, delay }
    }
}

/// Pseudo-random jitter in `[0, max_ms)` taken from the clock's sub-second nanos.
fn jitter(max_ms: u64) -> Duration {
    use std::time::{SystemTime, UNIX_EPOCH};
    if max_ms == 0 {
        return Duration::ZERO;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    Duration::from_millis(u64::from(nanos) % max_ms)
}
