//! Console progress rendering.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use mangadl_core::download::FetchError;
use mangadl_core::model::{Chapter, Page};
use mangadl_core::progress::ProgressSink;

/// Spinner-backed sink for interactive runs.
///
/// Keeps running fetched/lost counters in the spinner message and prints a
/// line above it as each chapter finishes. In quiet mode the bar is hidden
/// and every event is swallowed.
pub(crate) struct ConsoleProgress {
    spinner: ProgressBar,
    fetched: AtomicU64,
    lost: AtomicU64,
}

impl ConsoleProgress {
    pub(crate) fn new(quiet: bool) -> Self {
        let spinner = if quiet {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::with_template("{spinner} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        };
        Self {
            spinner,
            fetched: AtomicU64::new(0),
            lost: AtomicU64::new(0),
        }
    }

    /// Clears the spinner once the run is over.
    pub(crate) fn finish(&self) {
        self.spinner.finish_and_clear();
    }

    #[cfg(test)]
    pub(crate) fn counts(&self) -> (u64, u64) {
        (
            self.fetched.load(Ordering::SeqCst),
            self.lost.load(Ordering::SeqCst),
        )
    }

    fn refresh(&self) {
        let fetched = self.fetched.load(Ordering::SeqCst);
        let lost = self.lost.load(Ordering::SeqCst);
        if lost == 0 {
            self.spinner.set_message(format!("{fetched} pages fetched"));
        } else {
            self.spinner
                .set_message(format!("{fetched} pages fetched, {lost} lost"));
        }
    }
}

impl ProgressSink for ConsoleProgress {
    fn task_completed(&self, _page: &Page) {
        self.fetched.fetch_add(1, Ordering::SeqCst);
        self.refresh();
    }

    fn task_failed(&self, page: &Page, cause: &FetchError) {
        self.lost.fetch_add(1, Ordering::SeqCst);
        self.spinner
            .println(format!("page {} lost: {cause}", page.index));
        self.refresh();
    }

    fn chapter_completed(&self, chapter: &Chapter, succeeded: u32, failed: u32) {
        if failed == 0 {
            self.spinner
                .println(format!("chapter {}: {succeeded} pages", chapter.number));
        } else {
            self.spinner.println(format!(
                "chapter {}: {succeeded} pages, {failed} lost",
                chapter.number
            ));
        }
    }
}
