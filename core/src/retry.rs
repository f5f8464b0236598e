//! Retry policy for a single firing.
//!
//! A firing may take several attempts. The policy only sees dispatch
//! failures; trigger exhaustion never reaches it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Why a dispatch attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "status", rename_all = "snake_case")]
pub enum FailureKind {
    /// The recipient answered with a non-2xx status.
    Status(u16),
    /// Connection, DNS or protocol error.
    Transport,
    /// The attempt exceeded the dispatch timeout.
    Timeout,
    /// No transport is registered for the recipient. Not retried.
    Unsupported,
    /// The request could not be built from the recipient. Not retried.
    InvalidRequest,
}

impl FailureKind {
    pub fn is_fatal(&self) -> bool {
        matches!(self, FailureKind::Unsupported | FailureKind::InvalidRequest)
    }
}

/// Delay between attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    Fixed { delay_ms: u64 },
    /// `base_ms * factor^(attempt - 1)`, capped at `max_ms`.
    Exponential { base_ms: u64, factor: f64, max_ms: u64 },
}

impl Backoff {
    /// Delay before the retry that follows failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Exponential { base_ms, factor, max_ms } => {
                let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                // factor < 1 would shrink delays; clamp so they never decrease.
                let ms = base_ms as f64 * factor.max(1.0).powi(exp);
                let capped = if ms.is_finite() { ms.min(max_ms as f64) } else { max_ms as f64 };
                Duration::from_millis(capped.max(0.0) as u64)
            }
        }
    }
}

/// How many attempts one firing gets and how long to wait between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts per firing, the first one included. `1` disables retries.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff")]
    pub backoff: Backoff,
}

fn default_max_attempts() -> u32 { 3 }

fn default_backoff() -> Backoff {
    Backoff::Exponential { base_ms: 1_000, factor: 2.0, max_ms: 60_000 }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: default_max_attempts(), backoff: default_backoff() }
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed { delay_ms: delay.as_millis() as u64 },
        }
    }

    /// `attempt` counts the failed attempts of the current firing, including
    /// the one just recorded. Returns the delay before the next attempt, or
    /// `None` when the firing should give up.
    pub fn should_retry(&self, attempt: u32, failure: &FailureKind) -> Option<Duration> {
        if failure.is_fatal() || attempt >= self.max_attempts {
            return None;
        }
        Some(self.backoff.delay_for(attempt))
    }
}
