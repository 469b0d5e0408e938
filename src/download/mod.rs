//! Fetch pipeline: streaming HTTP client, per-host rate limiting, retry
//! orchestration, and bounded-concurrency scheduling.
//!
//! # Overview
//!
//! The pieces compose bottom-up:
//!
//! - [`HttpClient`] issues requests and streams response bodies to disk
//! - [`RateLimiter`] holds per-host backoff windows shared by every task
//! - [`RetryPolicy`] classifies failures and drives the attempt loop
//! - [`FetchScheduler`] caps concurrency and applies submitter backpressure
//!
//! # Example
//!
//! ```no_run
//! use mangadl_core::download::HttpClient;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new();
//! let mut observe = |_bytes: u64| {};
//! let written = client
//!     .download_to_path(
//!         "https://scans.example.com/solo-melancholy/0001-001.png",
//!         Path::new("./downloads/001.png"),
//!         &mut observe,
//!     )
//!     .await?;
//! println!("wrote {written} bytes");
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod rate_limiter;
pub mod retry;
pub mod scheduler;

pub use client::{ChunkObserver, HttpClient};
pub use error::{FetchError, FetchFailure};
pub use rate_limiter::{RateLimiter, extract_host, parse_retry_after};
pub use retry::{
    DEFAULT_MAX_ATTEMPTS, FailureKind, RetryDecision, RetryPolicy, classify_error,
    classify_http_status,
};
pub use scheduler::{
    DEFAULT_WORKERS, FetchScheduler, MAX_WORKERS, MIN_WORKERS, SchedulerError, SessionOutcomes,
    TaskSubmitter,
};
