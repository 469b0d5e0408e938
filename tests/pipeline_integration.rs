//! End-to-end pipeline tests against mock servers.
//!
//! These tests run the full manager pipeline (resolve, enumerate, fetch,
//! archive) with the real providers pointed at wiremock servers, verifying
//! on-disk results and run summaries.

use std::fs::File;
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use mangadl_core::resolver::{ApiProvider, MirrorProvider};
use mangadl_core::{
    CancelToken, Config, DownloadManager, HttpClient, ProviderRegistry, ResolveError,
};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const UUID: &str = "32d76d19-8a05-4db0-9fc2-e0b0648fe9d0";

// ==================== Helper Functions ====================

/// Config pointed at a temp output root with fast, test-friendly timing.
fn test_config(output: &TempDir) -> Config {
    Config {
        output_root: output.path().to_path_buf(),
        workers: 2,
        retry_attempts: 3,
        base_delay_ms: 10,
        max_delay_ms: 200,
        ..Config::default()
    }
}

/// Registry with the API provider pointed at `api` and the mirror provider
/// pointed at `mirror`.
fn test_registry(api: &MockServer, mirror: &MockServer) -> ProviderRegistry {
    let client = HttpClient::new();
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(ApiProvider::with_base(
        client.clone(),
        api.uri(),
        "en",
    )));
    registry.register(Arc::new(MirrorProvider::with_bases(
        client,
        vec![mirror.uri()],
        50,
    )));
    registry
}

async fn mount_manga(server: &MockServer, title: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/manga/{UUID}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"id": UUID, "attributes": {"title": {"en": title}}}
        })))
        .mount(server)
        .await;
}

async fn mount_feed_chapter(server: &MockServer, chapter_id: &str, number: &str, pages: u32) {
    Mock::given(method("GET"))
        .and(path(format!("/manga/{UUID}/feed")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"id": chapter_id, "attributes": {"chapter": number, "pages": pages}}
            ]
        })))
        .mount(server)
        .await;
}

async fn mount_at_home(server: &MockServer, chapter_id: &str, files: &[&str]) {
    Mock::given(method("GET"))
        .and(path(format!("/at-home/server/{chapter_id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "baseUrl": server.uri(),
            "chapter": {"hash": "h", "data": files}
        })))
        .mount(server)
        .await;
}

async fn mount_page(server: &MockServer, file: &str, body: &[u8]) {
    Mock::given(method("GET"))
        .and(path(format!("/data/h/{file}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .mount(server)
        .await;
}

fn archive_entries(path: &std::path::Path) -> Vec<String> {
    let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

/// Responder that fails the first `failures` requests with 500, then
/// serves the body.
struct FlakyResponder {
    failures_left: AtomicUsize,
    body: &'static [u8],
}

impl FlakyResponder {
    fn new(failures: usize, body: &'static [u8]) -> Self {
        Self {
            failures_left: AtomicUsize::new(failures),
            body,
        }
    }
}

impl Respond for FlakyResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let remaining =
            self.failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match remaining {
            Ok(_) => ResponseTemplate::new(500),
            Err(_) => ResponseTemplate::new(200).set_body_bytes(self.body.to_vec()),
        }
    }
}

// ==================== Happy Path Tests ====================

#[tokio::test]
async fn test_api_work_downloads_and_archives() {
    let api = MockServer::start().await;
    let mirror = MockServer::start().await;
    mount_manga(&api, "Solo Melancholy").await;
    mount_feed_chapter(&api, "ch-1", "1", 2).await;
    mount_at_home(&api, "ch-1", &["a.png", "b.png"]).await;
    mount_page(&api, "a.png", b"page-a").await;
    mount_page(&api, "b.png", b"page-b").await;

    let output = TempDir::new().unwrap();
    let manager = DownloadManager::new(
        test_registry(&api, &mirror),
        test_config(&output),
        CancelToken::new(),
    )
    .unwrap();

    let summary = manager.download(UUID).await.unwrap();

    assert!(summary.is_clean());
    assert_eq!(summary.source, "api");
    assert_eq!(summary.title, "Solo Melancholy");
    assert!(summary.failovers.is_empty());
    assert_eq!(summary.pages_succeeded(), 2);

    let work_dir = output.path().join("Solo Melancholy");
    let mut first = Vec::new();
    File::open(work_dir.join("0001/001.png"))
        .unwrap()
        .read_to_end(&mut first)
        .unwrap();
    assert_eq!(first, b"page-a");

    let archive = work_dir.join("0001.cbz");
    assert_eq!(summary.chapters[0].archive.as_deref(), Some(archive.as_path()));
    assert_eq!(archive_entries(&archive), vec!["001.png", "002.png"]);
}

// ==================== Failover Tests ====================

#[tokio::test]
async fn test_enumeration_fails_over_to_mirror() {
    let api = MockServer::start().await;
    let mirror = MockServer::start().await;
    mount_manga(&api, "Solo Melancholy").await;
    // The feed is broken, so enumeration must fall back to the mirror.
    Mock::given(method("GET"))
        .and(path(format!("/manga/{UUID}/feed")))
        .respond_with(ResponseTemplate::new(500))
        .mount(&api)
        .await;

    let page_path = format!("/{UUID}/0001-001.png");
    Mock::given(method("HEAD"))
        .and(path(page_path.clone()))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mirror)
        .await;
    Mock::given(method("GET"))
        .and(path(page_path))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mirror-page".to_vec()))
        .mount(&mirror)
        .await;

    let output = TempDir::new().unwrap();
    let manager = DownloadManager::new(
        test_registry(&api, &mirror),
        test_config(&output),
        CancelToken::new(),
    )
    .unwrap();

    let summary = manager.download(UUID).await.unwrap();

    assert_eq!(summary.source, "mirror");
    assert_eq!(summary.failovers.len(), 1);
    assert!(
        summary.failovers[0].starts_with("api:"),
        "failover: {}",
        summary.failovers[0]
    );
    assert_eq!(summary.pages_succeeded(), 1);
    // The mirror derives its display title from the slug, so the work
    // directory is the humanized UUID.
    let title = UUID.replace('-', " ");
    assert!(output.path().join(title).join("0001/001.png").is_file());
}

#[tokio::test]
async fn test_all_providers_failing_is_source_unavailable() {
    let api = MockServer::start().await;
    let mirror = MockServer::start().await;

    let output = TempDir::new().unwrap();
    let manager = DownloadManager::new(
        test_registry(&api, &mirror),
        test_config(&output),
        CancelToken::new(),
    )
    .unwrap();

    let error = manager.download(UUID).await.unwrap_err();

    assert!(matches!(error, ResolveError::SourceUnavailable { .. }));
    let message = error.to_string();
    assert!(message.contains("api:"), "message: {message}");
    assert!(message.contains("mirror:"), "message: {message}");
}

// ==================== Degradation Tests ====================

#[tokio::test]
async fn test_unfetchable_page_degrades_chapter_without_archive() {
    let api = MockServer::start().await;
    let mirror = MockServer::start().await;
    mount_manga(&api, "Solo Melancholy").await;
    mount_feed_chapter(&api, "ch-1", "1", 2).await;
    mount_at_home(&api, "ch-1", &["a.png", "b.png"]).await;
    mount_page(&api, "a.png", b"page-a").await;
    // b.png is never mounted; the 404 is fatal and must not be retried.

    let output = TempDir::new().unwrap();
    let manager = DownloadManager::new(
        test_registry(&api, &mirror),
        test_config(&output),
        CancelToken::new(),
    )
    .unwrap();

    let summary = manager.download(UUID).await.unwrap();

    assert!(!summary.is_clean());
    assert_eq!(summary.degraded_chapters(), 1);
    let chapter = &summary.chapters[0];
    assert_eq!((chapter.succeeded, chapter.failed), (1, 1));
    assert!(chapter.archive.is_none());
    assert!(output.path().join("Solo Melancholy/0001/001.png").is_file());
    assert!(!output.path().join("Solo Melancholy/0001.cbz").exists());
}

#[tokio::test]
async fn test_transient_failures_are_retried_to_success() {
    let api = MockServer::start().await;
    let mirror = MockServer::start().await;
    mount_manga(&api, "Solo Melancholy").await;
    mount_feed_chapter(&api, "ch-1", "1", 1).await;
    mount_at_home(&api, "ch-1", &["a.png"]).await;
    Mock::given(method("GET"))
        .and(path("/data/h/a.png"))
        .respond_with(FlakyResponder::new(2, b"page-a"))
        .mount(&api)
        .await;

    let output = TempDir::new().unwrap();
    let manager = DownloadManager::new(
        test_registry(&api, &mirror),
        test_config(&output),
        CancelToken::new(),
    )
    .unwrap();

    let summary = manager.download(UUID).await.unwrap();

    assert!(summary.is_clean(), "two 500s then a 200 must succeed");
    assert_eq!(summary.pages_succeeded(), 1);
    let page = std::fs::read(output.path().join("Solo Melancholy/0001/001.png")).unwrap();
    assert_eq!(page, b"page-a");
}

// ==================== Cancellation Tests ====================

#[tokio::test]
async fn test_cancellation_mid_chapter_yields_partial_summary() {
    let api = MockServer::start().await;
    let mirror = MockServer::start().await;
    mount_manga(&api, "Solo Melancholy").await;
    mount_feed_chapter(&api, "ch-1", "1", 4).await;
    mount_at_home(&api, "ch-1", &["a.png", "b.png", "c.png", "d.png"]).await;
    for file in ["a.png", "b.png", "c.png", "d.png"] {
        Mock::given(method("GET"))
            .and(path(format!("/data/h/{file}")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"page".to_vec())
                    .set_delay(Duration::from_millis(400)),
            )
            .mount(&api)
            .await;
    }

    let output = TempDir::new().unwrap();
    let mut config = test_config(&output);
    config.workers = 1;
    let cancel = CancelToken::new();
    let manager =
        DownloadManager::new(test_registry(&api, &mirror), config, cancel.clone()).unwrap();

    let canceller = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            cancel.cancel();
        }
    });

    let summary = manager.download(UUID).await.unwrap();
    canceller.await.unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.chapters.len(), 1);
    let chapter = &summary.chapters[0];
    assert_eq!(chapter.succeeded, 1, "the admitted page runs to completion");
    assert_eq!(chapter.failed, 0, "unadmitted pages are not failures");
    assert!(chapter.archive.is_none());
}

// ==================== Bounds Tests ====================

#[tokio::test]
async fn test_max_pages_caps_fetches_per_chapter() {
    let api = MockServer::start().await;
    let mirror = MockServer::start().await;
    mount_manga(&api, "Solo Melancholy").await;
    mount_feed_chapter(&api, "ch-1", "1", 3).await;
    mount_at_home(&api, "ch-1", &["a.png", "b.png", "c.png"]).await;
    mount_page(&api, "a.png", b"a").await;
    mount_page(&api, "b.png", b"b").await;
    mount_page(&api, "c.png", b"c").await;

    let output = TempDir::new().unwrap();
    let mut config = test_config(&output);
    config.max_pages = Some(2);
    let manager = DownloadManager::new(
        test_registry(&api, &mirror),
        config,
        CancelToken::new(),
    )
    .unwrap();

    let summary = manager.download(UUID).await.unwrap();

    assert_eq!(summary.pages_succeeded(), 2);
    assert!(output.path().join("Solo Melancholy/0001/002.png").is_file());
    assert!(!output.path().join("Solo Melancholy/0001/003.png").exists());
}
