//! Exponential reconnection backoff (component 4.1).

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Reconnection backoff parameters and the running delay they describe.
///
/// `next()` computes `min(prev_ms * multiplier, cap_ms)`, starting from
/// `initial_backoff_ms`; `reset()` returns the running delay to
/// `initial_backoff_ms`, which the [`TransportLoop`](crate::transport_loop)
/// calls whenever a connect attempt succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub struct BackoffPolicy {
    #[serde(with = "humantime_serde")]
    initial_backoff: Duration,
    #[serde(with = "humantime_serde")]
    max_backoff: Duration,
    multiplier: u32,
    /// Add up to 10% random jitter to each computed delay, to avoid a
    /// thundering herd of clients retrying a broker in lockstep. Permitted,
    /// not required, by spec.
    jitter: bool,

    #[serde(skip)]
    current: Duration,
}

impl BackoffPolicy {
    pub fn new(initial_backoff: Duration, max_backoff: Duration, multiplier: u32) -> Self {
        BackoffPolicy {
            initial_backoff,
            max_backoff,
            multiplier,
            jitter: false,
            current: initial_backoff,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Compute the next delay and advance the internal counter.
    pub fn next(&mut self) -> Duration {
        let delay = self.current;
        let advanced = self.current.saturating_mul(self.multiplier);
        self.current = advanced.min(self.max_backoff);
        self.apply_jitter(delay)
    }

    /// Reset the running delay to the initial value. Called on every
    /// successful connect.
    pub fn reset(&mut self) {
        self.current = self.initial_backoff;
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let jitter_fraction = rand::thread_rng().gen_range(0.0..0.10);
        delay + delay.mul_f64(jitter_fraction)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::new(
            Duration::from_millis(100),
            Duration::from_secs(5 * 60),
            2,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_capped() {
        let mut backoff = BackoffPolicy::new(
            Duration::from_millis(100),
            Duration::from_millis(1000),
            2,
        );
        let delays: Vec<_> = (0..6).map(|_| backoff.next()).collect();
        assert_eq!(
            delays,
            vec![100, 200, 400, 800, 1000, 1000]
                .into_iter()
                .map(Duration::from_millis)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn resets_after_success() {
        let mut backoff = BackoffPolicy::new(
            Duration::from_millis(100),
            Duration::from_millis(1000),
            2,
        );
        assert_eq!(backoff.next(), Duration::from_millis(100));
        assert_eq!(backoff.next(), Duration::from_millis(200));
        backoff.reset();
        assert_eq!(backoff.next(), Duration::from_millis(100));
    }

    #[test]
    fn jitter_never_shrinks_delay() {
        let mut backoff = BackoffPolicy::new(
            Duration::from_millis(100),
            Duration::from_millis(1000),
            2,
        )
        .with_jitter(true);
        for _ in 0..20 {
            let delay = backoff.next();
            assert!(delay >= Duration::from_millis(100));
        }
    }
}
