use std::time::Duration;

use rand::Rng;

use crate::core::config::LiveSettings;

/// Tunable parameters for reconnect backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BackoffConfig {
    /// Interval after a successful connect.
    pub(crate) floor: Duration,
    /// Upper bound on the interval between attempts.
    pub(crate) cap: Duration,
    /// Random extra delay added to every sleep, drawn from `0..=max_jitter`.
    pub(crate) max_jitter: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            floor: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_jitter: Duration::from_millis(500),
        }
    }
}

impl BackoffConfig {
    pub(crate) fn from_settings(live: &LiveSettings) -> Self {
        Self {
            floor: Duration::from_millis(live.backoff_floor_ms),
            cap: Duration::from_millis(live.backoff_cap_ms),
            max_jitter: Duration::from_millis(live.backoff_jitter_ms),
        }
    }
}

/// Exponential backoff: every failure doubles the interval up to the cap,
/// a successful connect drops it back to the floor.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(config: BackoffConfig) -> Self {
        Self { config, current: config.floor }
    }

    #[cfg(test)]
    pub(crate) fn current(&self) -> Duration {
        self.current
    }

    /// Record a failed or closed connection and return how long to sleep
    /// before the next attempt.
    pub(crate) fn on_failure(&mut self) -> Duration {
        self.current = self.current.saturating_mul(2).min(self.config.cap);
        self.current + jitter(self.config.max_jitter)
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.config.floor;
    }
}

fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}
