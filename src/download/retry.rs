//! Failure classification and retry orchestration for page fetches.
//!
//! # Overview
//!
//! When a fetch fails, the error is classified into a [`FailureKind`]:
//! - [`FailureKind::Transient`] - Temporary failures worth retrying
//! - [`FailureKind::RateLimited`] - HTTP 429, retried after the server's or
//!   the computed delay
//! - [`FailureKind::Fatal`] - Failures that won't succeed regardless of
//!   retries
//!
//! [`RetryPolicy::execute`] drives the whole attempt loop for one operation,
//! feeding outcomes into the shared [`RateLimiter`] so that every task
//! against the same host benefits from what this one learned. Exhausting the
//! attempt budget is reported the same way as a fatal fault: a
//! [`FetchFailure`] carrying the last observed cause and the attempt count.
//!
//! # Example
//!
//! ```
//! use mangadl_core::download::{
//!     FetchError, RetryPolicy, RetryDecision, classify_error,
//! };
//!
//! let policy = RetryPolicy::default();
//! let error = FetchError::http_status("https://scans.example.com/x/001.png", 503);
//!
//! match policy.should_retry(&error, 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (attempt {})", delay, attempt);
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {}", reason);
//!     }
//! }
//! ```

use std::future::Future;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use super::error::{FetchError, FetchFailure};
use super::rate_limiter::{RateLimiter, parse_retry_after, random_jitter};
use crate::cancel::CancelToken;

/// Default maximum number of attempts (1 initial + 4 retries).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default delay before the first retry.
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default ceiling for any inter-attempt delay.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// How a failed fetch should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: network timeout, connection faults, HTTP 408/5xx.
    Transient,

    /// Server rate limiting (HTTP 429).
    ///
    /// Retried after the server-mandated `Retry-After` delay when one is
    /// present, otherwise after the computed backoff.
    RateLimited,

    /// Failure that won't succeed regardless of retries.
    ///
    /// Examples: 404 Not Found, auth failures, malformed payloads, local IO
    /// faults.
    Fatal,
}

/// Decision on whether to retry a failed fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the fetch after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so the first retry
        /// is attempt 2).
        attempt: u32,
    },

    /// Do not retry the fetch.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Classifies a fetch error by retryability.
#[must_use]
pub fn classify_error(error: &FetchError) -> FailureKind {
    match error {
        FetchError::Timeout { .. } | FetchError::Network { .. } => FailureKind::Transient,
        FetchError::HttpStatus { status, .. } => classify_http_status(*status),
        FetchError::MalformedPayload { .. }
        | FetchError::Io { .. }
        | FetchError::InvalidUrl { .. }
        | FetchError::Cancelled => FailureKind::Fatal,
    }
}

/// Classifies an HTTP status code by retryability.
///
/// 408 and 5xx are transient, 429 is rate limiting, everything else
/// (including 404 and auth failures) is fatal.
#[must_use]
pub fn classify_http_status(status: u16) -> FailureKind {
    match status {
        408 => FailureKind::Transient,
        429 => FailureKind::RateLimited,
        500..=599 => FailureKind::Transient,
        _ => FailureKind::Fatal,
    }
}

/// Attempt budget and delay curve for one logical operation.
///
/// # Default Values
///
/// - `max_attempts`: 5
/// - `base_delay`: 1 second
/// - `max_delay`: 60 seconds
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base_delay * 2^(attempt - 1), max_delay) + jitter
/// ```
///
/// With defaults, delays are approximately: 1s, 2s, 4s, 8s.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryPolicy {
    /// Creates a policy with the default budget.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }

    /// Overrides the attempt budget. A value of zero is raised to one so the
    /// operation always runs at least once.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Overrides the delay curve. The ceiling is raised to the base delay if
    /// it would otherwise fall below it.
    #[must_use]
    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay.max(base_delay);
        self
    }

    /// Returns the configured attempt budget.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides whether the given attempt's failure warrants another try.
    ///
    /// `attempt` is the 1-based number of the attempt that just failed. A
    /// rate-limited response carrying a parseable `Retry-After` replaces the
    /// computed delay with the server's.
    #[must_use]
    pub fn should_retry(&self, error: &FetchError, attempt: u32) -> RetryDecision {
        match classify_error(error) {
            FailureKind::Fatal => RetryDecision::DoNotRetry {
                reason: error.to_string(),
            },
            kind @ (FailureKind::Transient | FailureKind::RateLimited) => {
                if attempt >= self.max_attempts {
                    return RetryDecision::DoNotRetry {
                        reason: format!("exhausted {} attempts", self.max_attempts),
                    };
                }

                let delay = match (kind, server_retry_after(error)) {
                    (FailureKind::RateLimited, Some(server_delay)) => server_delay,
                    _ => self.delay_for_attempt(attempt),
                };

                RetryDecision::Retry {
                    delay,
                    attempt: attempt + 1,
                }
            }
        }
    }

    /// Delay before the retry that follows the given failed attempt.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay_ms = u64::try_from(self.base_delay.as_millis())
            .unwrap_or(u64::MAX)
            .saturating_mul(1u64 << shift);
        Duration::from_millis(delay_ms).min(self.max_delay) + random_jitter()
    }

    /// Runs `operation` until it succeeds, fails fatally, exhausts the
    /// attempt budget, or is cancelled.
    ///
    /// The closure receives the 1-based attempt number. Every attempt first
    /// waits out the host's backoff window via [`RateLimiter::acquire`];
    /// failures are reported back to the limiter so concurrent tasks against
    /// the same host slow down together. The inter-attempt sleep overlaps
    /// the host window, so the effective wait is the longer of the two, not
    /// their sum.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchFailure`] wrapping the last cause and the number of
    /// attempts actually made. Cancellation surfaces as a failure whose
    /// cause is [`FetchError::Cancelled`].
    #[instrument(skip(self, limiter, cancel, operation), fields(max_attempts = self.max_attempts))]
    pub async fn execute<T, F, Fut>(
        &self,
        host: &str,
        limiter: &RateLimiter,
        cancel: &CancelToken,
        mut operation: F,
    ) -> Result<T, FetchFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt: u32 = 1;

        loop {
            if cancel.is_cancelled() {
                return Err(FetchFailure::new(FetchError::Cancelled, attempt - 1));
            }

            limiter
                .acquire(host, cancel)
                .await
                .map_err(|cause| FetchFailure::new(cause, attempt - 1))?;

            match operation(attempt).await {
                Ok(value) => {
                    limiter.report_success(host).await;
                    if attempt > 1 {
                        debug!(host, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(FetchError::Cancelled) => {
                    return Err(FetchFailure::new(FetchError::Cancelled, attempt));
                }
                Err(error) => {
                    match classify_error(&error) {
                        FailureKind::RateLimited => match server_retry_after(&error) {
                            Some(delay) => limiter.report_retry_after(host, delay).await,
                            None => limiter.report_failure(host, FailureKind::RateLimited).await,
                        },
                        FailureKind::Transient => {
                            limiter.report_failure(host, FailureKind::Transient).await;
                        }
                        FailureKind::Fatal => {}
                    }

                    match self.should_retry(&error, attempt) {
                        RetryDecision::Retry {
                            delay,
                            attempt: next,
                        } => {
                            warn!(
                                host,
                                attempt,
                                delay_ms = delay.as_millis(),
                                error = %error,
                                "attempt failed, will retry"
                            );

                            tokio::select! {
                                () = tokio::time::sleep(delay) => {}
                                () = cancel.cancelled() => {
                                    return Err(FetchFailure::new(FetchError::Cancelled, attempt));
                                }
                            }

                            attempt = next;
                        }
                        RetryDecision::DoNotRetry { reason } => {
                            debug!(host, attempt, %reason, "not retrying");
                            return Err(FetchFailure::new(error, attempt));
                        }
                    }
                }
            }
        }
    }
}

/// Server-mandated delay from a 429's `Retry-After` header, if parseable.
fn server_retry_after(error: &FetchError) -> Option<Duration> {
    match error {
        FetchError::HttpStatus {
            retry_after: Some(value),
            ..
        } => parse_retry_after(value),
        _ => None,
    }
}
