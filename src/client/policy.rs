use crate::{Error, Result};
use std::time::Duration;

/// Decision after an attempt whose body could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry { delay: Duration },
    Exhausted,
}

/// Backoff parameters for undecodable responses.
///
/// Only bodies that fail to decode as an envelope are retried. `FAILED`
/// envelopes and network errors are never retried.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Wait before the first retry.
    pub start_wait: Duration,
    /// Factor applied to the wait after every retry.
    pub multiplier: f64,
    /// Upper bound for the sum of all waits of one call.
    pub max_cumulative_wait: Duration,
    /// Upper bound for retries of one call (attempts = retries + 1).
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            start_wait: Duration::from_millis(100),
            multiplier: 2.0,
            max_cumulative_wait: Duration::from_secs(60),
            max_retries: 5,
        }
    }
}

impl BackoffPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.start_wait.is_zero() {
            return Err(Error::configuration("backoff start wait must be positive"));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(Error::configuration(format!(
                "backoff multiplier must be a finite number >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.max_cumulative_wait.is_zero() {
            return Err(Error::configuration(
                "maximum cumulative backoff wait must be positive",
            ));
        }
        Ok(())
    }

    /// Fresh state for one logical call.
    pub fn start(&self) -> RetryState {
        RetryState {
            elapsed: Duration::ZERO,
            next_wait: self.start_wait,
            retries: 0,
        }
    }
}

/// Call-local retry bookkeeping. Never shared between calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    elapsed: Duration,
    next_wait: Duration,
    retries: u32,
}

impl RetryState {
    /// Record an undecodable response and decide whether to try again.
    ///
    /// The wait is `min(next_wait, max_cumulative_wait - elapsed)`; the call
    /// is exhausted when that is zero or the retry budget is spent.
    pub fn on_decode_failure(&mut self, policy: &BackoffPolicy) -> Decision {
        let remaining = policy.max_cumulative_wait.saturating_sub(self.elapsed);
        let wait_for = self.next_wait.min(remaining);
        if wait_for.is_zero() || self.retries >= policy.max_retries {
            return Decision::Exhausted;
        }

        self.next_wait = Duration::try_from_secs_f64(self.next_wait.as_secs_f64() * policy.multiplier)
            .unwrap_or(policy.max_cumulative_wait)
            .min(policy.max_cumulative_wait);
        self.retries += 1;
        self.elapsed += wait_for;
        Decision::Retry { delay: wait_for }
    }

    /// Total wait scheduled so far.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Requests sent so far, assuming every scheduled retry was carried out.
    pub fn attempts(&self) -> u32 {
        self.retries + 1
    }
}
