//! Backoff decisions for upstream failures.
//!
//! [`classify`] turns a [`TwitterError`] into an [`ErrorCategory`] and
//! [`BackoffPolicy::wait_policy`] maps the category and attempt number to a
//! wait or a give-up. Call sites own their retry loops and consult the table
//! after every failed attempt.

use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::twitter::TwitterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Upstream window exhausted; `retry_after` is the server's reset hint
    RateLimited { retry_after: Option<Duration> },
    ServerError,
    /// Network, timeout or unclassified failure
    Transient,
    /// Credentials or permissions (or a resource that is gone); never retried
    Fatal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::RateLimited { .. } => write!(f, "rate limited"),
            ErrorCategory::ServerError => write!(f, "server error"),
            ErrorCategory::Transient => write!(f, "transient error"),
            ErrorCategory::Fatal => write!(f, "fatal error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitDecision {
    Wait(Duration),
    GiveUp,
}

pub fn classify(error: &TwitterError) -> ErrorCategory {
    match error {
        TwitterError::RateLimit { retry_after, .. } => ErrorCategory::RateLimited {
            retry_after: *retry_after,
        },
        TwitterError::Server { .. } => ErrorCategory::ServerError,
        TwitterError::Unauthorized { .. } | TwitterError::NotFound { .. } => ErrorCategory::Fatal,
        TwitterError::Api { .. } | TwitterError::Network { .. } | TwitterError::Decode { .. } => {
            ErrorCategory::Transient
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Minimum wait after a rate limit, also used when no hint is given
    pub rate_limit_floor: Duration,
    pub server_error_wait: Duration,
    pub transient_wait: Duration,
    /// Transient failures give up once this many attempts have failed
    pub transient_attempt_limit: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            rate_limit_floor: Duration::from_secs(60),
            server_error_wait: Duration::from_secs(60),
            transient_wait: Duration::from_secs(30),
            transient_attempt_limit: 5,
        }
    }
}

impl BackoffPolicy {
    /// `attempt` is the 1-based number of the attempt that just failed
    pub fn wait_policy(&self, category: ErrorCategory, attempt: u32) -> WaitDecision {
        match category {
            ErrorCategory::RateLimited { retry_after } => WaitDecision::Wait(
                retry_after
                    .map(|hint| hint.max(self.rate_limit_floor))
                    .unwrap_or(self.rate_limit_floor),
            ),
            ErrorCategory::ServerError => WaitDecision::Wait(self.server_error_wait),
            ErrorCategory::Transient if attempt >= self.transient_attempt_limit => {
                WaitDecision::GiveUp
            }
            ErrorCategory::Transient => WaitDecision::Wait(self.transient_wait),
            ErrorCategory::Fatal => WaitDecision::GiveUp,
        }
    }
}

/// Adds 0-999ms of jitter to avoid thundering herd effects
pub fn with_jitter(base_duration: Duration) -> Duration {
    let jitter = rand::random::<u64>() % 1000;
    base_duration + Duration::from_millis(jitter)
}

/// Sleeps unless cancelled first; returns false on cancellation
pub async fn wait_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}

/// Logs and performs one backoff wait; returns false if shutdown interrupted it
pub async fn backoff_wait(
    operation: &str,
    category: ErrorCategory,
    wait: Duration,
    attempt: u32,
    cancel: &CancellationToken,
) -> bool {
    let sleep_duration = with_jitter(wait);
    warn!(
        cause = %category,
        wait_secs = sleep_duration.as_secs_f64(),
        attempt,
        "Backing off before retrying {operation}"
    );
    wait_or_cancel(sleep_duration, cancel).await
}
