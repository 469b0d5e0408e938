//! Error types for page fetching.
//!
//! [`FetchError`] describes one failed attempt; [`FetchFailure`] is what a
//! task surfaces after retry is done with it, carrying the last cause and how
//! many attempts were spent.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while fetching and persisting a page.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS resolution, connection refused, TLS, etc.)
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present (for 429 responses).
        retry_after: Option<String>,
    },

    /// Response body did not have the expected shape.
    #[error("malformed payload from {url}: {detail}")]
    MalformedPayload {
        /// The URL that produced the payload.
        url: String,
        /// What was wrong with it.
        detail: String,
    },

    /// File system error while persisting (create dir, write, flush).
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The URL is malformed or not fetchable.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The run was cancelled before or during this attempt.
    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with a Retry-After header value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a malformed-payload error.
    pub fn malformed(url: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::MalformedPayload {
            url: url.into(),
            detail: detail.into(),
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Returns true for cancellation, which is wind-down rather than failure.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

// No From<reqwest::Error> / From<std::io::Error> impls: the variants need
// context (url, path) the source errors do not carry. The constructors above
// are the conversion points.

/// Terminal failure of one fetch task: the last cause plus attempt count.
#[derive(Debug, Error)]
#[error("{cause} (after {attempts} attempt(s))")]
pub struct FetchFailure {
    /// The last error observed before giving up.
    #[source]
    pub cause: FetchError,
    /// Total attempts spent, including the first.
    pub attempts: u32,
}

impl FetchFailure {
    /// Wraps a cause with its attempt count.
    #[must_use]
    pub fn new(cause: FetchError, attempts: u32) -> Self {
        Self { cause, attempts }
    }
}
