//! Progress event sink.
//!
//! The pipeline reports what it is doing through a [`ProgressSink`]; rendering
//! (progress bars, logs, a GUI) lives entirely in the consumer. Sink methods
//! are synchronous and must return promptly: they are called from inside fetch
//! tasks, and a sink that blocks would stall the pipeline it is observing.

use crate::download::FetchError;
use crate::model::{Chapter, Page};

/// Receiver for pipeline progress events.
///
/// Implementations must be cheap and non-blocking. All methods default to
/// no-ops so a sink can subscribe to just the events it renders.
pub trait ProgressSink: Send + Sync {
    /// A page fetch was handed to a worker.
    fn task_started(&self, page: &Page) {
        let _ = page;
    }

    /// Bytes arrived for a page; `bytes` is cumulative for that page.
    fn task_progress(&self, page: &Page, bytes: u64) {
        let _ = (page, bytes);
    }

    /// A page was fetched and persisted.
    fn task_completed(&self, page: &Page) {
        let _ = page;
    }

    /// A page failed after retry was exhausted or a fatal error.
    fn task_failed(&self, page: &Page, cause: &FetchError) {
        let _ = (page, cause);
    }

    /// A chapter finished processing with the given page counts.
    fn chapter_completed(&self, chapter: &Chapter, succeeded: u32, failed: u32) {
        let _ = (chapter, succeeded, failed);
    }
}

/// Sink that discards every event. The library default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChapterNumber, Page};

    /// Counts events, for asserting emission without rendering.
    #[derive(Default)]
    struct CountingSink {
        started: std::sync::atomic::AtomicU32,
        completed: std::sync::atomic::AtomicU32,
    }

    impl ProgressSink for CountingSink {
        fn task_started(&self, _page: &Page) {
            self.started
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }

        fn task_completed(&self, _page: &Page) {
            self.completed
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[test]
    fn test_null_progress_accepts_all_events() {
        let sink = NullProgress;
        let page = Page::new(1, "https://example.com/0001-001.png");
        let chapter = Chapter {
            number: ChapterNumber::new(1),
            source_id: String::new(),
            page_count: 1,
        };

        sink.task_started(&page);
        sink.task_progress(&page, 1024);
        sink.task_completed(&page);
        sink.chapter_completed(&chapter, 1, 0);
    }

    #[test]
    fn test_partial_sink_only_overrides_some_events() {
        let sink = CountingSink::default();
        let page = Page::new(1, "https://example.com/0001-001.png");

        sink.task_started(&page);
        sink.task_progress(&page, 10);
        sink.task_completed(&page);

        assert_eq!(sink.started.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(sink.completed.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
