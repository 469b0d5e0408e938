//! Structured catalog API provider.
//!
//! Resolves title UUIDs (bare or embedded in a `/title/{uuid}` URL) against
//! a JSON catalog API: work metadata from `/manga/{uuid}`, the chapter list
//! from the title's feed, and per-chapter page URLs from the image-server
//! endpoint.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::{Provider, ProviderFailure, ProviderPriority};
use crate::download::{ChunkObserver, FetchError, HttpClient};
use crate::model::{Chapter, ChapterNumber, Page, Work};

/// Default API root.
const DEFAULT_BASE: &str = "https://api.mangadex.org";

/// Feed page size; the API caps a single request at 500 entries.
const FEED_LIMIT: u32 = 500;

/// Bare title UUID.
#[allow(clippy::expect_used)]
static UUID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("UUID regex is valid") // Static pattern, safe to panic
});

/// Title URL carrying a UUID: `.../title/{uuid}`.
#[allow(clippy::expect_used)]
static TITLE_URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"/title/([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})",
    )
    .expect("title URL regex is valid") // Static pattern, safe to panic
});

/// Provider backed by the structured catalog API.
#[derive(Debug, Clone)]
pub struct ApiProvider {
    client: HttpClient,
    base: String,
    language: String,
}

impl ApiProvider {
    /// Creates a provider against the default API root.
    #[must_use]
    pub fn new(client: HttpClient, language: &str) -> Self {
        Self::with_base(client, DEFAULT_BASE, language)
    }

    /// Creates a provider against a specific API root. Used by tests to
    /// point at a local server.
    #[must_use]
    pub fn with_base(client: HttpClient, base: impl Into<String>, language: &str) -> Self {
        let mut base = base.into();
        while base.ends_with('/') {
            base.pop();
        }
        Self {
            client,
            base,
            language: language.to_string(),
        }
    }

    /// Extracts the title UUID from a bare UUID or a title URL.
    fn extract_uuid(query: &str) -> Option<String> {
        let query = query.trim();
        if UUID_PATTERN.is_match(query) {
            return Some(query.to_lowercase());
        }
        TITLE_URL_PATTERN
            .captures(query)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_lowercase())
    }

    fn failure(&self, cause: impl Into<String>) -> ProviderFailure {
        ProviderFailure::new(self.name(), cause)
    }
}

#[async_trait]
impl Provider for ApiProvider {
    fn name(&self) -> &'static str {
        "api"
    }

    fn priority(&self) -> ProviderPriority {
        ProviderPriority::Primary
    }

    fn can_handle(&self, query: &str) -> bool {
        Self::extract_uuid(query).is_some()
    }

    #[instrument(skip(self))]
    async fn resolve(&self, query: &str) -> Result<Work, ProviderFailure> {
        let uuid = Self::extract_uuid(query)
            .ok_or_else(|| self.failure(format!("'{query}' carries no title UUID")))?;

        let url = format!("{}/manga/{uuid}", self.base);
        let envelope: MangaEnvelope = self
            .client
            .get_json(&url)
            .await
            .map_err(|error| self.failure(error.to_string()))?;

        let display_name = envelope
            .data
            .attributes
            .title
            .get(&self.language)
            .or_else(|| envelope.data.attributes.title.get("en"))
            .cloned()
            .or_else(|| envelope.data.attributes.title.values().next().cloned())
            .unwrap_or_else(|| uuid.clone());

        debug!(uuid = %uuid, title = %display_name, "resolved work");

        Ok(Work {
            id: envelope.data.id,
            source: self.name(),
            display_name,
            origin: self.base.clone(),
        })
    }

    #[instrument(skip(self, work), fields(work_id = %work.id))]
    async fn list_chapters(&self, work: &Work) -> Result<Vec<Chapter>, ProviderFailure> {
        let url = format!(
            "{}/manga/{}/feed?translatedLanguage[]={}&order[chapter]=asc&limit={FEED_LIMIT}",
            self.base, work.id, self.language
        );
        let envelope: FeedEnvelope = self
            .client
            .get_json(&url)
            .await
            .map_err(|error| self.failure(error.to_string()))?;

        let mut chapters: Vec<Chapter> = Vec::with_capacity(envelope.data.len());
        for entry in envelope.data {
            let Some(raw_number) = entry.attributes.chapter else {
                debug!(chapter_id = %entry.id, "skipping entry without a chapter number");
                continue;
            };
            let Some(number) = ChapterNumber::parse(&raw_number) else {
                warn!(
                    chapter_id = %entry.id,
                    raw = %raw_number,
                    "skipping chapter with unparseable number"
                );
                continue;
            };

            // Multiple scan groups can publish the same chapter; the feed is
            // ordered ascending, so the first occurrence wins.
            if chapters.iter().any(|c| c.number == number) {
                continue;
            }

            chapters.push(Chapter {
                number,
                source_id: entry.id,
                page_count: entry.attributes.pages,
            });
        }

        chapters.sort_by_key(|c| c.number);
        debug!(chapters = chapters.len(), "enumerated feed");
        Ok(chapters)
    }

    #[instrument(skip(self, _work, chapter), fields(chapter = %chapter.number))]
    async fn list_pages(
        &self,
        _work: &Work,
        chapter: &Chapter,
    ) -> Result<Vec<Page>, ProviderFailure> {
        let url = format!("{}/at-home/server/{}", self.base, chapter.source_id);
        let envelope: AtHomeEnvelope = self
            .client
            .get_json(&url)
            .await
            .map_err(|error| self.failure(error.to_string()))?;

        if envelope.chapter.data.is_empty() {
            return Err(self.failure(format!(
                "image server returned no pages for chapter {}",
                chapter.number
            )));
        }

        let pages = envelope
            .chapter
            .data
            .iter()
            .enumerate()
            .map(|(offset, file)| {
                #[allow(clippy::cast_possible_truncation)]
                let index = offset as u32 + 1;
                Page::new(
                    index,
                    format!(
                        "{}/data/{}/{file}",
                        envelope.base_url, envelope.chapter.hash
                    ),
                )
            })
            .collect();

        Ok(pages)
    }

    async fn fetch_page(
        &self,
        page: &Page,
        dest: &Path,
        observe: ChunkObserver<'_>,
    ) -> Result<u64, FetchError> {
        self.client
            .download_to_path(&page.source_url, dest, observe)
            .await
    }
}

// ==================== API Response Shapes ====================

#[derive(Debug, Deserialize)]
struct MangaEnvelope {
    data: MangaData,
}

#[derive(Debug, Deserialize)]
struct MangaData {
    id: String,
    attributes: MangaAttributes,
}

#[derive(Debug, Deserialize)]
struct MangaAttributes {
    /// Localized titles keyed by language code. BTreeMap keeps the
    /// no-preferred-language fallback deterministic.
    #[serde(default)]
    title: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct FeedEnvelope {
    data: Vec<FeedChapter>,
}

#[derive(Debug, Deserialize)]
struct FeedChapter {
    id: String,
    attributes: FeedChapterAttributes,
}

#[derive(Debug, Deserialize)]
struct FeedChapterAttributes {
    chapter: Option<String>,
    #[serde(default)]
    pages: u32,
}

#[derive(Debug, Deserialize)]
struct AtHomeEnvelope {
    #[serde(rename = "baseUrl")]
    base_url: String,
    chapter: AtHomeChapter,
}

#[derive(Debug, Deserialize)]
struct AtHomeChapter {
    hash: String,
    data: Vec<String>,
}
