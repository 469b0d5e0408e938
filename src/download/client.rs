//! HTTP client for page fetching and provider API calls.
//!
//! Thin wrapper around [`reqwest::Client`] that maps transport failures into
//! [`FetchError`] and streams page bodies straight to disk so large images are
//! never held in memory whole.

use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::RETRY_AFTER;
use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};

use super::error::FetchError;

/// Connection timeout for all requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Total request timeout. Page images are small, but mirrors can be slow.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// User agent sent with every request.
const USER_AGENT: &str = concat!("mangadl/", env!("CARGO_PKG_VERSION"));

/// Callback invoked with the cumulative byte count as a body streams in.
pub type ChunkObserver<'a> = &'a mut (dyn FnMut(u64) + Send);

/// HTTP client shared by providers and fetch tasks.
///
/// Designed to be created once and cloned freely; clones share the underlying
/// connection pool.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use mangadl_core::download::HttpClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::new();
/// let bytes = client
///     .download_to_path("https://example.com/0001-001.png", Path::new("001.png"), &mut |_| {})
///     .await?;
/// println!("wrote {bytes} bytes");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a client with the standard timeouts and user agent.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the static configuration.
    /// This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self { client }
    }

    /// Fetches a URL and deserializes the JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::HttpStatus`] for error responses,
    /// [`FetchError::MalformedPayload`] when the body does not decode, and
    /// [`FetchError::Timeout`] / [`FetchError::Network`] for transport
    /// failures.
    #[instrument(skip(self))]
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let response = self.send_get(url).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| FetchError::malformed(url, e.to_string()))
    }

    /// Probes a URL with a HEAD request.
    ///
    /// Returns `Ok(true)` for a success status and `Ok(false)` for 404 (the
    /// probe's negative answer). Any other outcome is an error so callers can
    /// distinguish "not there" from "mirror is broken".
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Timeout`] / [`FetchError::Network`] for transport
    /// failures and [`FetchError::HttpStatus`] for non-404 error responses.
    #[instrument(skip(self))]
    pub async fn head_ok(&self, url: &str) -> Result<bool, FetchError> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| map_transport_error(url, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }
        if status.as_u16() == 404 {
            return Ok(false);
        }
        Err(status_error(url, &response))
    }

    /// Streams a URL's body to `dest`, creating parent directories as needed.
    ///
    /// `observe` is called after each chunk with the cumulative byte count.
    /// On any error the partially written file is removed, so a destination
    /// path either holds a complete body or nothing.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Io`] for filesystem failures, plus the transport
    /// and status errors of [`Self::get_json`].
    #[instrument(skip(self, observe), fields(dest = %dest.display()))]
    pub async fn download_to_path(
        &self,
        url: &str,
        dest: &Path,
        observe: ChunkObserver<'_>,
    ) -> Result<u64, FetchError> {
        let response = self.send_get(url).await?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| FetchError::io(parent, e))?;
        }

        let file = fs::File::create(dest)
            .await
            .map_err(|e| FetchError::io(dest, e))?;
        let mut writer = BufWriter::new(file);
        let mut stream = response.bytes_stream();
        let mut bytes_written: u64 = 0;

        let result: Result<(), FetchError> = async {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| map_transport_error(url, e))?;
                writer
                    .write_all(&chunk)
                    .await
                    .map_err(|e| FetchError::io(dest, e))?;
                bytes_written += chunk.len() as u64;
                observe(bytes_written);
            }
            writer.flush().await.map_err(|e| FetchError::io(dest, e))
        }
        .await;

        if let Err(e) = result {
            // Removal failure is not worth masking the original error.
            if let Err(cleanup) = fs::remove_file(dest).await {
                debug!(dest = %dest.display(), error = %cleanup, "failed to remove partial file");
            }
            return Err(e);
        }

        debug!(bytes = bytes_written, "page persisted");
        Ok(bytes_written)
    }

    /// Sends a GET and maps error statuses and transport failures.
    async fn send_get(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| map_transport_error(url, e))?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(status_error(url, &response))
        }
    }
}

/// Maps a reqwest transport error, distinguishing timeouts.
fn map_transport_error(url: &str, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::timeout(url)
    } else {
        FetchError::network(url, error)
    }
}

/// Builds a [`FetchError::HttpStatus`], capturing Retry-After when present.
fn status_error(url: &str, response: &reqwest::Response) -> FetchError {
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    FetchError::http_status_with_retry_after(url, response.status().as_u16(), retry_after)
}
