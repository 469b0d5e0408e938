//! Binary wiring: config assembly, signal handling, summary rendering.

mod console;

use std::sync::Arc;

use anyhow::{Result, bail};
use mangadl_core::cancel::CancelToken;
use mangadl_core::config::Config;
use mangadl_core::download::HttpClient;
use mangadl_core::manager::{DownloadManager, RunSummary};
use mangadl_core::progress::ProgressSink;
use mangadl_core::resolver::{ResolveError, build_default_provider_registry};
use tracing::{info, warn};

use crate::cli::Args;
use console::ConsoleProgress;

/// Runs the full pipeline for the parsed arguments.
pub(crate) async fn run(args: Args) -> Result<()> {
    let base = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let config = args.apply_to(base);
    config.validate()?;

    let cancel = CancelToken::new();
    spawn_interrupt_watcher(cancel.clone());

    let client = HttpClient::new();
    let registry = build_default_provider_registry(client, &config.language);
    let progress = Arc::new(ConsoleProgress::new(args.quiet));
    let manager = DownloadManager::new(registry, config, cancel.clone())?
        .with_progress(Arc::clone(&progress) as Arc<dyn ProgressSink>);

    info!(queries = args.queries.len(), "starting download run");
    let results = manager.download_many(&args.queries).await;
    progress.finish();

    let skipped = args.queries.len().saturating_sub(results.len());
    if skipped > 0 {
        warn!(skipped, "queries not attempted after cancellation");
    }
    report_results(&args.queries, &results);

    if !results.is_empty() && results.iter().all(Result::is_err) {
        bail!("no query could be resolved");
    }
    Ok(())
}

/// Flips the cancel token on the first interrupt; in-flight pages finish
/// naturally and the run summarizes what it got.
fn spawn_interrupt_watcher(cancel: CancelToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, finishing in-flight pages");
            cancel.cancel();
        }
    });
}

fn report_results(queries: &[String], results: &[Result<RunSummary, ResolveError>]) {
    for (query, result) in queries.iter().zip(results) {
        match result {
            Ok(summary) => report_summary(summary),
            Err(error) => warn!(query = %query, error = %error, "work failed"),
        }
    }
}

fn report_summary(summary: &RunSummary) {
    for failover in &summary.failovers {
        warn!(title = %summary.title, provider_failure = %failover, "provider failed over");
    }
    info!(
        title = %summary.title,
        source = summary.source,
        chapters = summary.chapters.len(),
        degraded = summary.degraded_chapters(),
        pages = summary.pages_succeeded(),
        lost = summary.pages_failed(),
        cancelled = summary.cancelled,
        "work complete"
    );
    for chapter in summary.chapters.iter().filter(|c| c.is_degraded()) {
        warn!(
            chapter = %chapter.number,
            lost = chapter.failed,
            "chapter degraded, not archived"
        );
    }
}
