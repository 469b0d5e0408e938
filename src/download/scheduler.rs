//! Bounded-concurrency execution of fetch tasks.
//!
//! # Overview
//!
//! The [`FetchScheduler`] runs submitted tasks with at most `W` in flight,
//! enforced by a semaphore whose permits are held for exactly the lifetime
//! of each spawned task. A session's pending queue is bounded to `2W`:
//! submitting into a full queue suspends the submitter instead of growing
//! memory, so a slow network applies backpressure all the way back to
//! enumeration.
//!
//! Tasks are admitted in submission order and their outcomes are collected
//! in completion order, which keeps all workers busy even when one task is
//! much slower than its neighbors.
//!
//! Cancellation is observed at every admission point. Once the shared token
//! flips, no further task is admitted; tasks already running are left to
//! finish on their own (they observe the token at their own suspension
//! points).
//!
//! # Example
//!
//! ```no_run
//! use mangadl_core::cancel::CancelToken;
//! use mangadl_core::download::FetchScheduler;
//!
//! # async fn example() -> Result<(), mangadl_core::download::SchedulerError> {
//! let scheduler = FetchScheduler::new(4)?;
//! let cancel = CancelToken::new();
//!
//! let (submitter, outcomes) = scheduler.session::<u32>(&cancel);
//! for index in 0..10 {
//!     submitter.submit(async move { index * 2 }).await?;
//! }
//! drop(submitter);
//!
//! let results = outcomes.collect().await;
//! assert_eq!(results.len(), 10);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::cancel::CancelToken;

/// Default number of concurrent workers.
pub const DEFAULT_WORKERS: usize = 10;

/// Minimum supported worker count.
pub const MIN_WORKERS: usize = 1;

/// Maximum supported worker count.
pub const MAX_WORKERS: usize = 100;

/// Errors surfaced by the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The requested worker count falls outside the supported range.
    #[error("worker count {value} outside supported range {MIN_WORKERS}..={MAX_WORKERS}")]
    InvalidWorkers {
        /// The rejected value.
        value: usize,
    },

    /// The session stopped admitting tasks (cancelled or already drained).
    #[error("scheduler session closed, task not admitted")]
    Closed,
}

/// Executor with a fixed worker cap, shared across sessions.
#[derive(Debug)]
pub struct FetchScheduler {
    workers: usize,
    semaphore: Arc<Semaphore>,
}

impl Default for FetchScheduler {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            semaphore: Arc::new(Semaphore::new(DEFAULT_WORKERS)),
        }
    }
}

impl FetchScheduler {
    /// Creates a scheduler with the given worker cap.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidWorkers`] when `workers` is outside
    /// `1..=100`.
    #[instrument]
    pub fn new(workers: usize) -> Result<Self, SchedulerError> {
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&workers) {
            return Err(SchedulerError::InvalidWorkers { value: workers });
        }
        debug!(workers, "creating fetch scheduler");
        Ok(Self {
            workers,
            semaphore: Arc::new(Semaphore::new(workers)),
        })
    }

    /// Returns the configured worker cap.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Opens a scheduling session: a submitter for feeding tasks in and a
    /// handle that resolves to the outcomes once the submitter is dropped
    /// (or the session is cancelled) and every admitted task has finished.
    #[must_use]
    pub fn session<T: Send + 'static>(
        &self,
        cancel: &CancelToken,
    ) -> (TaskSubmitter<T>, SessionOutcomes<T>) {
        let (task_tx, task_rx) = mpsc::channel::<BoxFuture<'static, T>>(2 * self.workers);

        let handle = tokio::spawn(drive(
            task_rx,
            Arc::clone(&self.semaphore),
            cancel.clone(),
        ));

        (
            TaskSubmitter { tx: task_tx },
            SessionOutcomes { handle },
        )
    }
}

/// Feeds tasks into a session, suspending when the pending queue is full.
#[derive(Debug)]
pub struct TaskSubmitter<T> {
    tx: mpsc::Sender<BoxFuture<'static, T>>,
}

impl<T> Clone for TaskSubmitter<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Send + 'static> TaskSubmitter<T> {
    /// Queues a task for admission, waiting for queue capacity if needed.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Closed`] when the session no longer admits
    /// tasks.
    pub async fn submit(
        &self,
        task: impl Future<Output = T> + Send + 'static,
    ) -> Result<(), SchedulerError> {
        self.tx
            .send(Box::pin(task))
            .await
            .map_err(|_| SchedulerError::Closed)
    }
}

/// Resolves to a session's outcomes, in completion order.
#[derive(Debug)]
pub struct SessionOutcomes<T> {
    handle: JoinHandle<Vec<T>>,
}

impl<T> SessionOutcomes<T> {
    /// Waits for the session to drain and returns every collected outcome.
    pub async fn collect(self) -> Vec<T> {
        match self.handle.await {
            Ok(outcomes) => outcomes,
            Err(error) => {
                warn!(%error, "scheduler session aborted abnormally");
                Vec::new()
            }
        }
    }
}

/// Session driver: admits queued tasks under the worker cap and gathers
/// their outcomes.
async fn drive<T: Send + 'static>(
    mut task_rx: mpsc::Receiver<BoxFuture<'static, T>>,
    semaphore: Arc<Semaphore>,
    cancel: CancelToken,
) -> Vec<T> {
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<T>();
    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    loop {
        let task = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(admitted = handles.len(), "cancelled, no further admissions");
                break;
            }
            received = task_rx.recv() => match received {
                Some(task) => task,
                None => break,
            },
        };

        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(admitted = handles.len(), "cancelled while waiting for a worker");
                break;
            }
            acquired = Arc::clone(&semaphore).acquire_owned() => match acquired {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        // The permit may have won a race against cancellation.
        if cancel.is_cancelled() {
            debug!(admitted = handles.len(), "cancelled, dropping queued task");
            break;
        }

        let done = done_tx.clone();
        handles.push(tokio::spawn(async move {
            let _permit = permit;
            let outcome = task.await;
            let _ = done.send(outcome);
        }));
    }

    // Closing the queue drops tasks that were never admitted and makes
    // later submits fail fast.
    drop(task_rx);
    drop(done_tx);

    let mut outcomes = Vec::with_capacity(handles.len());
    while let Some(outcome) = done_rx.recv().await {
        outcomes.push(outcome);
    }

    for handle in handles {
        if let Err(error) = handle.await {
            warn!(%error, "fetch task aborted abnormally");
        }
    }

    debug!(outcomes = outcomes.len(), "session drained");
    outcomes
}
