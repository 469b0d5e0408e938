//! Cooperative cancellation for in-flight download runs.
//!
//! A [`CancelToken`] is a cheap, cloneable flag shared between the signal
//! handler and every task that must stop taking on new work. Setting it never
//! interrupts an operation in progress: tasks observe the token at admission
//! points and suspension points and wind down on their own.
//!
//! # Example
//!
//! ```
//! use mangadl_core::cancel::CancelToken;
//!
//! let token = CancelToken::new();
//! let for_handler = token.clone();
//!
//! for_handler.cancel();
//! assert!(token.is_cancelled());
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::debug;

/// How often [`CancelToken::cancelled`] re-checks the flag while waiting.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shared cancellation flag.
///
/// Clones observe the same underlying flag. The signal handler (or any other
/// external trigger) calls [`cancel`](Self::cancel); core code only ever reads.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token in the not-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flips the token. Idempotent; never blocks.
    pub fn cancel(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            debug!("cancellation requested");
        }
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once the token is cancelled.
    ///
    /// Intended for `tokio::select!` races against sleeps and waits so that
    /// long backoff windows end promptly on shutdown.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}
