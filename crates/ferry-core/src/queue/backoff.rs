//! Backoff policy: decides whether a failed operation may be retried yet.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::Operation;

/// Exponential backoff with a ceiling.
///
/// delay(n) = base_delay * multiplier^n, n = failed attempts so far, capped at max_delay.
///
/// With the defaults (1s, x2, 5min cap):
/// - after 1 failure: 2s
/// - after 2 failures: 4s
/// - after 3 failures: 8s
/// - ...
/// - after 9 failures and beyond: 5min
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

/// Where an operation stands for the current pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Ready,
    Backoff { remaining: Duration },
    Exhausted,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5 * 60),
        }
    }
}

impl BackoffPolicy {
    /// Doubling policy with the given base and cap.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            ..Self::default()
        }
    }

    /// Delay required after `attempts` failures.
    pub fn delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        // powi overflows to inf long before u32::MAX attempts
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Where `op` stands at `now`.
    pub fn eligibility(&self, op: &Operation, now: DateTime<Utc>) -> Eligibility {
        if op.is_exhausted() {
            return Eligibility::Exhausted;
        }
        let Some(last) = op.last_attempt_at else {
            return Eligibility::Ready;
        };

        let required = self.delay(op.attempts);
        // clock went backwards: count it as no time elapsed
        let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
        if elapsed >= required {
            Eligibility::Ready
        } else {
            Eligibility::Backoff {
                remaining: required - elapsed,
            }
        }
    }

    pub fn is_eligible(&self, op: &Operation, now: DateTime<Utc>) -> bool {
        self.eligibility(op, now) == Eligibility::Ready
    }
}
