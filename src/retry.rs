//! Caller-side retry with exponential backoff.
//!
//! The engine itself never retries: a failed task reaches `on_error` once.
//! Callers that want retries classify the error with [`classify_error`] and
//! ask a [`RetryPolicy`] whether and when to submit a fresh task.
//!
//! # Example
//!
//! ```
//! use fetchq_core::{RequestError, RetryDecision, RetryPolicy, classify_error};
//!
//! let policy = RetryPolicy::default();
//! let error = RequestError::server("https://example.com/feed", 503, "");
//! match policy.should_retry(classify_error(&error), 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("retrying in {delay:?} (attempt {attempt})");
//!     }
//!     RetryDecision::DoNotRetry { reason } => println!("giving up: {reason}"),
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::error::RequestError;

/// Default maximum attempts, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Maximum jitter added to each delay.
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// May succeed later: timeouts, dropped connections, 5xx.
    Transient,
    /// Will fail again: bad URL, 4xx, local storage problems, cancellation.
    Permanent,
    /// The server asked us to slow down (HTTP 429).
    RateLimited,
}

/// Outcome of [`RetryPolicy::should_retry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Submit again after `delay`.
    Retry {
        /// How long to wait first.
        delay: Duration,
        /// The attempt number the retry will be (first retry is 2).
        attempt: u32,
    },
    /// Give up.
    DoNotRetry {
        /// Human-readable reason.
        reason: String,
    },
}

/// Exponential backoff: `min(base * multiplier^(attempt-1), max) + jitter`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy. `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Default delays with a custom attempt budget.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Maximum attempts, including the first.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides whether attempt number `attempt` (1-based) should be followed
    /// by another.
    #[must_use]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            };
        }
        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );
        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * f64::from(self.backoff_multiplier).powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64) + jitter()
    }
}

#[allow(clippy::cast_possible_truncation)]
fn jitter() -> Duration {
    let max = MAX_JITTER.as_millis() as u64;
    Duration::from_millis(rand::thread_rng().gen_range(0..=max))
}

/// Classifies a failure for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | Timeout, Io, NetworkUnavailable | Transient |
/// | Server 408, 5xx | Transient |
/// | Server 429 | RateLimited |
/// | Other Server 4xx | Permanent |
/// | MalformedUrl, UnknownHost, Parse, CacheMiss | Permanent |
/// | Storage errors, Cancelled | Permanent |
#[must_use]
pub fn classify_error(error: &RequestError) -> FailureType {
    match error {
        RequestError::Timeout { .. }
        | RequestError::Io { .. }
        | RequestError::NetworkUnavailable { .. } => FailureType::Transient,
        RequestError::Server { status, .. } => classify_http_status(*status),
        RequestError::UnknownHost { .. }
        | RequestError::MalformedUrl { .. }
        | RequestError::StorageReadWrite { .. }
        | RequestError::StorageSpaceExceeded { .. }
        | RequestError::CacheMiss { .. }
        | RequestError::Parse { .. }
        | RequestError::Cancelled { .. } => FailureType::Permanent,
    }
}

fn classify_http_status(status: u16) -> FailureType {
    match status {
        408 => FailureType::Transient,
        429 => FailureType::RateLimited,
        500..=599 => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}
