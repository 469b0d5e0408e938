//! Pipeline orchestration.
//!
//! # Overview
//!
//! [`DownloadManager`] drives one query end to end: resolve the work,
//! enumerate its chapters, fetch every selected page through the scheduler
//! (each fetch wrapped in retry and gated by the per-host rate limiter),
//! and package fully fetched chapters into archives. Failures past
//! resolution degrade the affected chapter instead of aborting the run; the
//! caller gets a [`RunSummary`] describing exactly what happened.
//!
//! # Example
//!
//! ```no_run
//! use mangadl_core::cancel::CancelToken;
//! use mangadl_core::config::Config;
//! use mangadl_core::download::HttpClient;
//! use mangadl_core::manager::DownloadManager;
//! use mangadl_core::resolver::build_default_provider_registry;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let registry = build_default_provider_registry(HttpClient::new(), &config.language);
//! let manager = DownloadManager::new(registry, config, CancelToken::new())?;
//!
//! let summary = manager.download("one-punch-man").await?;
//! println!(
//!     "{}: {} pages fetched, {} failed",
//!     summary.title,
//!     summary.pages_succeeded(),
//!     summary.pages_failed()
//! );
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::archive::{self, ArchiveFormat, ArchiveManifest};
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::download::{
    FetchFailure, FetchScheduler, RateLimiter, RetryPolicy, SchedulerError, extract_host,
};
use crate::layout;
use crate::model::{Chapter, ChapterNumber, Page, PageStatus, Work};
use crate::progress::{NullProgress, ProgressSink};
use crate::resolver::{Provider, ProviderRegistry, Resolution, ResolveError};

/// Index plus result of one page fetch task.
type PageTaskOutcome = (u32, Result<u64, FetchFailure>);

/// Terminal record for one chapter of a run.
#[derive(Debug, Clone, Serialize)]
pub struct ChapterOutcome {
    /// Chapter this outcome describes.
    pub number: ChapterNumber,
    /// Pages on disk, fetched or accepted as already present.
    pub succeeded: u32,
    /// Pages that exhausted retry or hit a fatal error.
    pub failed: u32,
    /// Archive written for this chapter, when one was.
    pub archive: Option<PathBuf>,
}

impl ChapterOutcome {
    /// Whether any page of this chapter was lost.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.failed > 0
    }
}

/// What one [`DownloadManager::download`] call accomplished.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Query the run was started with.
    pub query: String,
    /// Display title of the resolved work.
    pub title: String,
    /// Provider that delivered the chapters.
    pub source: &'static str,
    /// Provider failures that occurred before one succeeded, in order.
    pub failovers: Vec<String>,
    /// Per-chapter outcomes in processing order.
    pub chapters: Vec<ChapterOutcome>,
    /// Whether the run was cut short by cancellation.
    pub cancelled: bool,
}

impl RunSummary {
    /// Total pages on disk across all chapters.
    #[must_use]
    pub fn pages_succeeded(&self) -> u32 {
        self.chapters.iter().map(|c| c.succeeded).sum()
    }

    /// Total pages lost across all chapters.
    #[must_use]
    pub fn pages_failed(&self) -> u32 {
        self.chapters.iter().map(|c| c.failed).sum()
    }

    /// Number of chapters that lost at least one page.
    #[must_use]
    pub fn degraded_chapters(&self) -> usize {
        self.chapters.iter().filter(|c| c.is_degraded()).count()
    }

    /// Whether the run finished with nothing lost and nothing skipped.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        !self.cancelled && self.degraded_chapters() == 0
    }
}

/// Orchestrates resolution, fetching, and archiving for whole works.
///
/// One manager holds the shared machinery (scheduler, rate limiter, retry
/// policy, progress sink) and can run any number of queries against it,
/// sequentially or as a batch via [`download_many`](Self::download_many).
pub struct DownloadManager {
    registry: ProviderRegistry,
    scheduler: FetchScheduler,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    sink: Arc<dyn ProgressSink>,
    cancel: CancelToken,
    config: Config,
}

impl std::fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadManager")
            .field("registry", &self.registry)
            .field("workers", &self.scheduler.workers())
            .field("retry", &self.retry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DownloadManager {
    /// Builds a manager from a validated config.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidWorkers`] when the configured worker
    /// count is outside the supported range.
    pub fn new(
        registry: ProviderRegistry,
        config: Config,
        cancel: CancelToken,
    ) -> Result<Self, SchedulerError> {
        let scheduler = FetchScheduler::new(config.workers)?;
        let limiter = Arc::new(RateLimiter::new(config.base_delay(), config.max_delay()));
        let retry = RetryPolicy::new()
            .with_max_attempts(config.retry_attempts)
            .with_delays(config.base_delay(), config.max_delay());

        debug!(
            workers = config.workers,
            retry_attempts = config.retry_attempts,
            base_delay_ms = config.base_delay_ms,
            "creating download manager"
        );

        Ok(Self {
            registry,
            scheduler,
            limiter,
            retry,
            sink: Arc::new(NullProgress),
            cancel,
            config,
        })
    }

    /// Replaces the progress sink. The default discards all events.
    #[must_use]
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Token this manager observes for cancellation.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Downloads one work.
    ///
    /// Fails only when the query cannot be resolved at all; everything past
    /// resolution (unreachable chapters, lost pages, failed archive builds)
    /// degrades the summary instead. Cancellation yields a partial summary
    /// with `cancelled` set, never an error.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Validation`] for a query no provider
    /// recognizes and [`ResolveError::SourceUnavailable`] when every
    /// provider failed to deliver the work.
    #[instrument(skip(self))]
    pub async fn download(&self, query: &str) -> Result<RunSummary, ResolveError> {
        self.registry.validate(query)?;
        let mut resolution = self.registry.resolve(query).await?;
        info!(
            title = %resolution.work.display_name,
            source = resolution.provider.name(),
            "resolved work"
        );

        let chapters = self.registry.enumerate(query, &mut resolution).await?;
        let selected = self.select_chapters(chapters);
        info!(chapters = selected.len(), "chapters selected");

        let mut outcomes = Vec::with_capacity(selected.len());
        for chapter in &selected {
            if self.cancel.is_cancelled() {
                break;
            }
            let outcome = self.process_chapter(&resolution, chapter).await;
            self.sink
                .chapter_completed(chapter, outcome.succeeded, outcome.failed);
            outcomes.push(outcome);
        }

        let cancelled = self.cancel.is_cancelled();
        if cancelled {
            info!(
                completed_chapters = outcomes.len(),
                of = selected.len(),
                "run cancelled"
            );
        }
        Ok(Self::summarize(query, &resolution, outcomes, cancelled))
    }

    /// Downloads a batch of works sequentially.
    ///
    /// Each query gets its own resolution and summary; a failing work never
    /// stops its siblings. Cancellation stops the batch before the next
    /// query; already-returned summaries are unaffected.
    pub async fn download_many(&self, queries: &[String]) -> Vec<Result<RunSummary, ResolveError>> {
        let mut results = Vec::with_capacity(queries.len());
        for query in queries {
            if self.cancel.is_cancelled() {
                break;
            }
            results.push(self.download(query).await);
        }
        results
    }

    /// Applies the start-chapter and chapter-count bounds.
    ///
    /// `start_chapter` compares against the chapter number, so sub-chapters
    /// sort with their parent (`9.5` comes before `10`). A start past the
    /// final chapter selects nothing.
    fn select_chapters(&self, chapters: Vec<Chapter>) -> Vec<Chapter> {
        let start = ChapterNumber::new(self.config.start_chapter);
        let mut selected: Vec<Chapter> = chapters
            .into_iter()
            .filter(|chapter| chapter.number >= start)
            .collect();
        if let Some(cap) = self.config.max_chapters {
            selected.truncate(cap as usize);
        }
        selected
    }

    /// Runs one chapter to its terminal state: pages materialized, fetched
    /// through the scheduler, and archived when everything made it.
    #[instrument(skip(self, resolution, chapter), fields(chapter = %chapter.number))]
    async fn process_chapter(&self, resolution: &Resolution, chapter: &Chapter) -> ChapterOutcome {
        let work = &resolution.work;
        let degraded = |failed: u32| ChapterOutcome {
            number: chapter.number,
            succeeded: 0,
            failed,
            archive: None,
        };

        let mut pages = match resolution.provider.list_pages(work, chapter).await {
            Ok(pages) => pages,
            Err(failure) => {
                warn!(%failure, "page enumeration failed, chapter degraded");
                return degraded(chapter.page_count.max(1));
            }
        };
        if let Some(cap) = self.config.max_pages {
            pages.truncate(cap as usize);
        }

        if let Err(error) = self.prepare_pages(work, chapter, &mut pages).await {
            warn!(%error, "cannot prepare chapter directory, chapter degraded");
            #[allow(clippy::cast_possible_truncation)]
            return degraded(pages.len() as u32);
        }

        self.fetch_pages(resolution, &mut pages).await;

        #[allow(clippy::cast_possible_truncation)]
        let succeeded = pages
            .iter()
            .filter(|p| p.status == PageStatus::Succeeded)
            .count() as u32;
        #[allow(clippy::cast_possible_truncation)]
        let failed = pages
            .iter()
            .filter(|p| p.status == PageStatus::Failed)
            .count() as u32;

        let complete =
            !pages.is_empty() && pages.iter().all(|p| p.status == PageStatus::Succeeded);
        let archive = if complete {
            self.archive_chapter(&work.display_name, chapter, &pages)
                .await
        } else {
            None
        };

        debug!(succeeded, failed, archived = archive.is_some(), "chapter done");
        ChapterOutcome {
            number: chapter.number,
            succeeded,
            failed,
            archive,
        }
    }

    /// Assigns each page its destination path and accepts pages that are
    /// already on disk from an earlier run.
    ///
    /// # Errors
    ///
    /// Returns the IO error when the chapter directory cannot be created.
    async fn prepare_pages(
        &self,
        work: &Work,
        chapter: &Chapter,
        pages: &mut [Page],
    ) -> Result<(), std::io::Error> {
        let title = &work.display_name;
        let dir = layout::chapter_dir(&self.config.output_root, title, chapter.number);
        tokio::fs::create_dir_all(&dir).await?;

        for page in pages.iter_mut() {
            let ext = layout::extension_from_url(&page.source_url);
            page.local_path = layout::page_path(
                &self.config.output_root,
                title,
                chapter.number,
                page.index,
                &ext,
            );
            if tokio::fs::try_exists(&page.local_path).await.unwrap_or(false) {
                debug!(page = page.index, "page already on disk, skipping fetch");
                page.status = PageStatus::Succeeded;
            }
        }
        Ok(())
    }

    /// Pushes the chapter's pending pages through a scheduler session and
    /// folds the task outcomes back into their `status` fields.
    ///
    /// Submission marks a page `InFlight`; pages a cancelled session never
    /// ran revert to `Pending` and count as neither succeeded nor failed.
    async fn fetch_pages(&self, resolution: &Resolution, pages: &mut [Page]) {
        let (submitter, outcomes) = self.scheduler.session::<PageTaskOutcome>(&self.cancel);

        for page in pages.iter_mut().filter(|p| p.status == PageStatus::Pending) {
            let task = self.fetch_task(Arc::clone(&resolution.provider), page.clone());
            if let Err(error) = submitter.submit(task).await {
                debug!(%error, "session closed, no further pages admitted");
                break;
            }
            page.status = PageStatus::InFlight;
        }
        drop(submitter);

        for (index, result) in outcomes.collect().await {
            let Some(page) = pages.iter_mut().find(|p| p.index == index) else {
                continue;
            };
            page.status = match result {
                Ok(_) => PageStatus::Succeeded,
                Err(failure) if failure.cause.is_cancelled() => PageStatus::Pending,
                Err(_) => PageStatus::Failed,
            };
        }

        // Submitted but never run (the session was cancelled while they
        // queued); a later run picks them up again.
        for page in pages.iter_mut().filter(|p| p.status == PageStatus::InFlight) {
            page.status = PageStatus::Pending;
        }
    }

    /// Builds the self-contained future for one page fetch.
    fn fetch_task(
        &self,
        provider: Arc<dyn Provider>,
        page: Page,
    ) -> impl Future<Output = PageTaskOutcome> + Send + 'static {
        let limiter = Arc::clone(&self.limiter);
        let retry = self.retry.clone();
        let cancel = self.cancel.clone();
        let sink = Arc::clone(&self.sink);

        async move {
            let page = Arc::new(page);
            let host = extract_host(&page.source_url);
            sink.task_started(&page);

            let result = {
                let provider = Arc::clone(&provider);
                let page = Arc::clone(&page);
                let sink = Arc::clone(&sink);
                retry
                    .execute(&host, &limiter, &cancel, move |_attempt| {
                        let provider = Arc::clone(&provider);
                        let page = Arc::clone(&page);
                        let sink = Arc::clone(&sink);
                        async move {
                            let dest = page.local_path.clone();
                            let mut on_chunk = |bytes: u64| sink.task_progress(&page, bytes);
                            provider.fetch_page(&page, &dest, &mut on_chunk).await
                        }
                    })
                    .await
            };

            match &result {
                Ok(bytes) => {
                    debug!(page = page.index, bytes, "page fetched");
                    sink.task_completed(&page);
                }
                Err(failure) if failure.cause.is_cancelled() => {
                    debug!(page = page.index, "page fetch cancelled");
                }
                Err(failure) => {
                    warn!(page = page.index, attempts = failure.attempts, cause = %failure.cause, "page lost");
                    sink.task_failed(&page, &failure.cause);
                }
            }
            (page.index, result)
        }
    }

    /// Packages a complete chapter when the configuration asks for one.
    ///
    /// Archive assembly is blocking file IO, so it runs off the async
    /// runtime. A failed build keeps the loose pages and degrades nothing;
    /// the summary simply carries no archive path for the chapter.
    async fn archive_chapter(
        &self,
        title: &str,
        chapter: &Chapter,
        pages: &[Page],
    ) -> Option<PathBuf> {
        if self.config.archive_format != ArchiveFormat::Cbz {
            return None;
        }

        let manifest = ArchiveManifest::from_pages(chapter.number, pages);
        let dest = layout::archive_path(&self.config.output_root, title, chapter.number);
        let build = tokio::task::spawn_blocking(move || archive::build(&manifest, &dest));

        match build.await {
            Ok(Ok(path)) => {
                info!(archive = %path.display(), "chapter archived");
                Some(path)
            }
            Ok(Err(error)) => {
                warn!(%error, "archive build failed, loose pages kept");
                None
            }
            Err(error) => {
                warn!(%error, "archive task panicked");
                None
            }
        }
    }

    fn summarize(
        query: &str,
        resolution: &Resolution,
        chapters: Vec<ChapterOutcome>,
        cancelled: bool,
    ) -> RunSummary {
        RunSummary {
            query: query.to_string(),
            title: resolution.work.display_name.clone(),
            source: resolution.provider.name(),
            failovers: resolution.failovers.iter().map(ToString::to_string).collect(),
            chapters,
            cancelled,
        }
    }
}
