//! Exponential backoff with jitter.
//!
//! One policy type serves task re-enqueue delays, classifier call retries and
//! the client status monitor's poll interval.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Maps an attempt number to a wait duration:
/// `min(base * multiplier^attempt + jitter, cap)` with jitter drawn from
/// `[0, jitter]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_cap_ms")]
    pub cap_ms: u64,

    /// Upper bound of the random jitter added to each delay
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    /// Total attempts allowed, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: default_base_ms(),
            multiplier: default_multiplier(),
            cap_ms: default_cap_ms(),
            jitter_ms: default_jitter_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration, jitter: Duration, max_attempts: u32) -> Self {
        Self {
            base_ms: base.as_millis() as u64,
            multiplier: 2.0,
            cap_ms: cap.as_millis() as u64,
            jitter_ms: jitter.as_millis() as u64,
            max_attempts,
        }
    }

    pub fn base(&self) -> Duration {
        Duration::from_millis(self.base_ms)
    }

    pub fn cap(&self) -> Duration {
        Duration::from_millis(self.cap_ms)
    }

    /// Delay before retrying after `attempt` failures, with random jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        };
        self.delay_with_jitter(attempt, jitter)
    }

    /// Delay with an explicit jitter amount (clamped to the configured maximum).
    pub fn delay_with_jitter(&self, attempt: u32, jitter_ms: u64) -> Duration {
        let exponential = self.base_ms as f64 * self.multiplier.powi(attempt.min(63) as i32);
        let exponential = if exponential.is_finite() {
            exponential.min(u64::MAX as f64) as u64
        } else {
            u64::MAX
        };
        let total = exponential.saturating_add(jitter_ms.min(self.jitter_ms));
        Duration::from_millis(total.min(self.cap_ms))
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

fn default_base_ms() -> u64 {
    1_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_cap_ms() -> u64 {
    30_000
}

fn default_jitter_ms() -> u64 {
    250
}

fn default_max_attempts() -> u32 {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(100),
            Duration::from_secs(10),
            Duration::from_millis(50),
            4,
        )
    }

    #[test]
    fn test_delay_doubles_per_attempt() {
        let p = policy();
        assert_eq!(p.delay_with_jitter(0, 0), Duration::from_millis(100));
        assert_eq!(p.delay_with_jitter(1, 0), Duration::from_millis(200));
        assert_eq!(p.delay_with_jitter(3, 0), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_is_capped() {
        let p = policy();
        assert_eq!(p.delay_with_jitter(20, 50), Duration::from_secs(10));
        assert_eq!(p.delay_with_jitter(u32::MAX, 0), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let p = policy();
        for attempt in 0..6 {
            let lower = p.delay_with_jitter(attempt, 0);
            let upper = p.delay_with_jitter(attempt, p.jitter_ms);
            for _ in 0..50 {
                let d = p.delay(attempt);
                assert!(d >= lower && d <= upper, "{d:?} outside [{lower:?}, {upper:?}]");
            }
        }
    }

    #[test]
    fn test_explicit_jitter_is_clamped() {
        let p = policy();
        assert_eq!(p.delay_with_jitter(0, 10_000), Duration::from_millis(150));
    }

    #[test]
    fn test_should_retry() {
        let p = policy();
        assert!(p.should_retry(3));
        assert!(!p.should_retry(4));
    }
}
