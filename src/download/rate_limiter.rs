//! Per-host backoff for fetch requests.
//!
//! This module provides the [`RateLimiter`], which tracks a backoff window per
//! host and suspends callers until the window has elapsed. Hosts that keep
//! failing (or keep returning 429) accumulate exponentially longer windows;
//! one success resets the host to unthrottled.
//!
//! # Overview
//!
//! State is keyed by host, so different mirrors never delay each other. The
//! limiter is an explicit object injected where it is needed and lives for the
//! process lifetime: backoff learned while fetching one work still protects
//! the host when a later work hits it again.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use mangadl_core::cancel::CancelToken;
//! use mangadl_core::download::{FailureKind, RateLimiter};
//!
//! # async fn example() {
//! let limiter = RateLimiter::new(Duration::from_secs(1), Duration::from_secs(60));
//! let cancel = CancelToken::new();
//!
//! // No failures recorded: proceeds immediately.
//! limiter.acquire("scans.example.com", &cancel).await.ok();
//!
//! // After a failure the next acquire waits out the backoff window.
//! limiter.report_failure("scans.example.com", FailureKind::Transient).await;
//! limiter.acquire("scans.example.com", &cancel).await.ok();
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::error::FetchError;
use super::retry::FailureKind;
use crate::cancel::CancelToken;

/// Exponent ceiling; keeps the shift well-defined long after the delay cap
/// has flattened the curve.
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Maximum jitter added to a backoff window (500ms).
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Maximum Retry-After value (1 hour) to prevent excessive delays.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Per-host backoff limiter.
///
/// Designed to be wrapped in `Arc` and shared across tasks. `DashMap` gives
/// lock-free access to per-host entries; each host's window is updated inside
/// a short `tokio::sync::Mutex` critical section that is never held across an
/// await.
#[derive(Debug)]
pub struct RateLimiter {
    /// Window for the first failure against a host.
    base_delay: Duration,
    /// Ceiling for any computed backoff window.
    max_delay: Duration,
    /// Per-host state. Arc lets the entry be cloned out so the DashMap shard
    /// lock is released before awaiting on the inner Mutex.
    hosts: DashMap<String, Arc<HostState>>,
}

/// State tracked for each host.
#[derive(Debug, Default)]
struct HostState {
    backoff: Mutex<HostBackoff>,
}

/// The mutable window, only ever touched under the state's Mutex.
#[derive(Debug, Default, Clone, Copy)]
struct HostBackoff {
    /// Consecutive failures recorded since the last success.
    exponent: u32,
    /// Earliest instant the next request may go out; `None` when unthrottled.
    next_allowed: Option<Instant>,
}

impl RateLimiter {
    /// Creates a limiter with the given base delay and window ceiling.
    #[must_use]
    #[instrument(skip_all, fields(base_ms = base_delay.as_millis(), max_ms = max_delay.as_millis()))]
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        debug!("creating rate limiter");
        Self {
            base_delay,
            max_delay,
            hosts: DashMap::new(),
        }
    }

    /// Returns the configured base delay.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Returns the configured window ceiling.
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Suspends the caller until the host's backoff window has elapsed.
    ///
    /// A host with no recorded failures proceeds immediately. The wait is
    /// re-checked after waking because another task may have pushed the
    /// window further while this one slept.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Cancelled`] if the token flips while waiting.
    #[instrument(skip(self, cancel))]
    pub async fn acquire(&self, host: &str, cancel: &CancelToken) -> Result<(), FetchError> {
        let state = self.host_state(host);

        loop {
            let wait = {
                let backoff = state.backoff.lock().await;
                match backoff.next_allowed {
                    Some(next) => {
                        let now = Instant::now();
                        if next <= now {
                            return Ok(());
                        }
                        next - now
                    }
                    None => return Ok(()),
                }
            };

            debug!(host, wait_ms = wait.as_millis(), "waiting out backoff window");

            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                () = cancel.cancelled() => return Err(FetchError::Cancelled),
            }
        }
    }

    /// Resets the host's backoff after a successful request.
    #[instrument(skip(self))]
    pub async fn report_success(&self, host: &str) {
        let state = self.host_state(host);
        let mut backoff = state.backoff.lock().await;
        if backoff.exponent > 0 {
            debug!(host, exponent = backoff.exponent, "resetting backoff");
        }
        *backoff = HostBackoff::default();
    }

    /// Records a failed request, lengthening the host's backoff window.
    ///
    /// The n-th consecutive failure sets a window of `base * 2^(n-1) + jitter`
    /// (the delay term capped at the configured maximum). The window never
    /// moves backwards: a longer window already in place is kept.
    #[instrument(skip(self))]
    pub async fn report_failure(&self, host: &str, kind: FailureKind) {
        let state = self.host_state(host);
        let mut backoff = state.backoff.lock().await;

        let delay = self.window_for_exponent(backoff.exponent) + random_jitter();
        backoff.exponent = (backoff.exponent + 1).min(MAX_BACKOFF_EXPONENT);

        let proposed = Instant::now() + delay;
        backoff.next_allowed = Some(match backoff.next_allowed {
            Some(existing) => existing.max(proposed),
            None => proposed,
        });

        debug!(
            host,
            ?kind,
            exponent = backoff.exponent,
            window_ms = delay.as_millis(),
            "lengthened backoff window"
        );

        if delay >= self.max_delay {
            warn!(host, window_secs = delay.as_secs(), "host backoff at ceiling");
        }
    }

    /// Applies a server-mandated delay from a Retry-After header.
    ///
    /// The delay overrides the computed window when longer, and is capped at
    /// one hour regardless of the configured ceiling: an explicit server
    /// instruction outranks our own curve, within reason.
    #[instrument(skip(self))]
    pub async fn report_retry_after(&self, host: &str, delay: Duration) {
        let state = self.host_state(host);
        let mut backoff = state.backoff.lock().await;

        let delay = delay.min(MAX_RETRY_AFTER);
        let proposed = Instant::now() + delay;
        backoff.next_allowed = Some(match backoff.next_allowed {
            Some(existing) => existing.max(proposed),
            None => proposed,
        });

        debug!(host, delay_ms = delay.as_millis(), "recorded server rate limit");
    }

    /// Delay term for the given consecutive-failure count, capped.
    fn window_for_exponent(&self, exponent: u32) -> Duration {
        let factor = 1u64 << exponent.min(MAX_BACKOFF_EXPONENT);
        let delay_ms = u64::try_from(self.base_delay.as_millis())
            .unwrap_or(u64::MAX)
            .saturating_mul(factor);
        Duration::from_millis(delay_ms).min(self.max_delay)
    }

    /// Gets or creates the host's state, releasing the DashMap lock before
    /// the caller awaits.
    fn host_state(&self, host: &str) -> Arc<HostState> {
        self.hosts
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(HostState::default()))
            .clone()
    }

    /// Current consecutive-failure count for a host.
    #[cfg(test)]
    async fn exponent(&self, host: &str) -> u32 {
        self.host_state(host).backoff.lock().await.exponent
    }

    /// How much of the host's window is left, zero when unthrottled.
    #[cfg(test)]
    async fn window_remaining(&self, host: &str) -> Duration {
        let state = self.host_state(host);
        let backoff = state.backoff.lock().await;
        backoff
            .next_allowed
            .map(|next| next.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }
}

/// Uniform jitter in `0..=500ms`, spreading out synchronized retries.
pub(crate) fn random_jitter() -> Duration {
    let mut rng = rand::thread_rng();
    #[allow(clippy::cast_possible_truncation)]
    let jitter_ms = rng.gen_range(0..=MAX_JITTER.as_millis() as u64);
    Duration::from_millis(jitter_ms)
}

/// Extracts the host from a URL.
///
/// Returns "unknown" for malformed URLs, ensuring such requests still share
/// one backoff bucket instead of bypassing the limiter.
///
/// # Examples
///
/// ```
/// use mangadl_core::download::rate_limiter::extract_host;
///
/// assert_eq!(extract_host("https://scans.example.com/x/1.png"), "scans.example.com");
/// assert_eq!(extract_host("http://Example.COM/Path"), "example.com");
/// assert_eq!(extract_host("not a url"), "unknown");
/// ```
#[must_use]
pub fn extract_host(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports both RFC 7231 formats:
/// - Integer seconds: `Retry-After: 120`
/// - HTTP-date: `Retry-After: Wed, 21 Oct 2026 07:28:00 GMT`
///
/// Returns `None` if the value cannot be parsed. Caps excessive values at one
/// hour.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use mangadl_core::download::rate_limiter::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
#[instrument]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    // Integer seconds first (most common).
    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }

        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);

        if duration > MAX_RETRY_AFTER {
            warn!(
                seconds,
                max_seconds = MAX_RETRY_AFTER.as_secs(),
                "Retry-After exceeds maximum, capping at 1 hour"
            );
            return Some(MAX_RETRY_AFTER);
        }

        return Some(duration);
    }

    // HTTP-date second.
    if let Ok(datetime) = httpdate::parse_http_date(header_value) {
        let now = std::time::SystemTime::now();

        if let Ok(duration) = datetime.duration_since(now) {
            if duration > MAX_RETRY_AFTER {
                warn!(
                    delay_secs = duration.as_secs(),
                    max_secs = MAX_RETRY_AFTER.as_secs(),
                    "Retry-After date exceeds maximum, capping at 1 hour"
                );
                return Some(MAX_RETRY_AFTER);
            }
            Some(duration)
        } else {
            debug!(header_value, "Retry-After date is in the past, returning zero");
            Some(Duration::ZERO)
        }
    } else {
        debug!(header_value, "unparseable Retry-After value");
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(Duration::from_secs(1), Duration::from_secs(60))
    }

    // ==================== acquire Tests ====================

    #[tokio::test]
    async fn test_acquire_fresh_host_is_immediate() {
        tokio::time::pause();

        let limiter = limiter();
        let cancel = CancelToken::new();
        let start = Instant::now();

        limiter.acquire("scans.a.example", &cancel).await.unwrap();

        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_acquire_waits_out_failure_window() {
        tokio::time::pause();

        let limiter = limiter();
        let cancel = CancelToken::new();

        limiter.report_failure("scans.a.example", FailureKind::Transient).await;

        let start = Instant::now();
        limiter.acquire("scans.a.example", &cancel).await.unwrap();

        // First failure: base 1s plus up to 500ms jitter.
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(1), "waited {waited:?}");
        assert!(waited <= Duration::from_millis(1600), "waited {waited:?}");
    }

    #[tokio::test]
    async fn test_acquire_after_window_elapsed_is_immediate() {
        tokio::time::pause();

        let limiter = limiter();
        let cancel = CancelToken::new();

        limiter.report_failure("scans.a.example", FailureKind::Transient).await;
        tokio::time::advance(Duration::from_secs(2)).await;

        let start = Instant::now();
        limiter.acquire("scans.a.example", &cancel).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_acquire_cancelled_mid_wait() {
        tokio::time::pause();

        let limiter = std::sync::Arc::new(RateLimiter::new(
            Duration::from_secs(30),
            Duration::from_secs(60),
        ));
        let cancel = CancelToken::new();

        limiter.report_failure("scans.a.example", FailureKind::Transient).await;

        let acquire_limiter = std::sync::Arc::clone(&limiter);
        let acquire_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            acquire_limiter.acquire("scans.a.example", &acquire_cancel).await
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(FetchError::Cancelled)));
    }

    // ==================== Backoff Progression Tests ====================

    #[tokio::test]
    async fn test_consecutive_failures_lengthen_window_monotonically() {
        tokio::time::pause();

        let limiter = limiter();
        let mut previous = Duration::ZERO;

        // 1s, 2s, 4s, 8s (+jitter); strictly increasing while under the cap
        // because each step grows by at least double minus max jitter.
        for _ in 0..4 {
            limiter.report_failure("scans.a.example", FailureKind::Transient).await;
            let remaining = limiter.window_remaining("scans.a.example").await;
            assert!(
                remaining > previous,
                "window {remaining:?} did not grow past {previous:?}"
            );
            previous = remaining;
        }
    }

    #[tokio::test]
    async fn test_window_capped_at_max_delay() {
        tokio::time::pause();

        let limiter = RateLimiter::new(Duration::from_secs(1), Duration::from_secs(5));

        for _ in 0..10 {
            limiter.report_failure("scans.a.example", FailureKind::Transient).await;
        }

        let remaining = limiter.window_remaining("scans.a.example").await;
        // Cap 5s plus at most 500ms jitter.
        assert!(remaining <= Duration::from_millis(5500), "window {remaining:?}");
    }

    #[tokio::test]
    async fn test_exponent_capped() {
        tokio::time::pause();

        let limiter = limiter();
        for _ in 0..40 {
            limiter.report_failure("scans.a.example", FailureKind::Transient).await;
        }
        assert_eq!(limiter.exponent("scans.a.example").await, MAX_BACKOFF_EXPONENT);
    }

    #[tokio::test]
    async fn test_success_resets_backoff() {
        tokio::time::pause();

        let limiter = limiter();
        limiter.report_failure("scans.a.example", FailureKind::Transient).await;
        limiter.report_failure("scans.a.example", FailureKind::Transient).await;
        limiter.report_failure("scans.a.example", FailureKind::Transient).await;

        limiter.report_success("scans.a.example").await;

        assert_eq!(limiter.exponent("scans.a.example").await, 0);
        assert_eq!(
            limiter.window_remaining("scans.a.example").await,
            Duration::ZERO
        );
    }

    #[tokio::test]
    async fn test_hosts_are_independent() {
        tokio::time::pause();

        let limiter = limiter();
        let cancel = CancelToken::new();

        limiter.report_failure("scans.a.example", FailureKind::Transient).await;
        limiter.report_failure("scans.a.example", FailureKind::Transient).await;

        // The untouched host is not delayed.
        let start = Instant::now();
        limiter.acquire("scans.b.example", &cancel).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(10));

        assert_eq!(limiter.exponent("scans.b.example").await, 0);
    }

    #[tokio::test]
    async fn test_failure_never_shrinks_existing_window() {
        tokio::time::pause();

        let limiter = limiter();

        // Build a long window, then record a failure whose own delay would
        // be shorter after a success-free reset scenario is ruled out.
        limiter.report_retry_after("scans.a.example", Duration::from_secs(50)).await;
        let before = limiter.window_remaining("scans.a.example").await;

        limiter.report_failure("scans.a.example", FailureKind::Transient).await;
        let after = limiter.window_remaining("scans.a.example").await;

        assert!(after >= before, "window shrank from {before:?} to {after:?}");
    }

    // ==================== Retry-After Tests ====================

    #[tokio::test]
    async fn test_report_retry_after_sets_window() {
        tokio::time::pause();

        let limiter = limiter();
        limiter.report_retry_after("scans.a.example", Duration::from_secs(120)).await;

        let remaining = limiter.window_remaining("scans.a.example").await;
        assert!(remaining > Duration::from_secs(119));
        assert!(remaining <= Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_report_retry_after_caps_at_one_hour() {
        tokio::time::pause();

        let limiter = limiter();
        limiter
            .report_retry_after("scans.a.example", Duration::from_secs(86_400))
            .await;

        let remaining = limiter.window_remaining("scans.a.example").await;
        assert!(remaining <= MAX_RETRY_AFTER);
    }

    // ==================== extract_host Tests ====================

    #[test]
    fn test_extract_host_valid_https() {
        assert_eq!(
            extract_host("https://scans.lastation.example/manga/x/0001-001.png"),
            "scans.lastation.example"
        );
    }

    #[test]
    fn test_extract_host_lowercases() {
        assert_eq!(extract_host("https://Example.COM/Path"), "example.com");
    }

    #[test]
    fn test_extract_host_with_port() {
        assert_eq!(extract_host("http://localhost:8080/x"), "localhost");
    }

    #[test]
    fn test_extract_host_malformed_url() {
        assert_eq!(extract_host("not a valid url"), "unknown");
        assert_eq!(extract_host(""), "unknown");
    }

    // ==================== parse_retry_after Tests ====================

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_parse_retry_after_zero() {
        assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
    }

    #[test]
    fn test_parse_retry_after_negative() {
        assert_eq!(parse_retry_after("-5"), None);
    }

    #[test]
    fn test_parse_retry_after_invalid() {
        assert_eq!(parse_retry_after("invalid"), None);
    }

    #[test]
    fn test_parse_retry_after_whitespace() {
        assert_eq!(parse_retry_after("  120  "), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_parse_retry_after_caps_at_one_hour() {
        assert_eq!(parse_retry_after("7200"), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_parse_retry_after_http_date_past() {
        let past_date = "Wed, 01 Jan 2020 00:00:00 GMT";
        assert_eq!(parse_retry_after(past_date), Some(Duration::ZERO));
    }

    #[test]
    fn test_parse_retry_after_http_date_future() {
        let future_time = std::time::SystemTime::now() + Duration::from_secs(60);
        let future_date = httpdate::fmt_http_date(future_time);

        let duration = parse_retry_after(&future_date).unwrap();
        assert!(
            duration >= Duration::from_secs(55) && duration <= Duration::from_secs(65),
            "Duration should be ~60s, got {duration:?}"
        );
    }
}
