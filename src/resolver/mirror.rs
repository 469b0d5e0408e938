//! Image-mirror provider.
//!
//! The mirrors host pre-rendered page images under a fixed URL shape,
//! `{mirror}{slug}/{chapter}-{page:03}.png`, with no metadata endpoint at
//! all. Everything is discovered by HEAD probes: which mirror hosts the
//! slug, which chapters exist (including `.5` sub-chapters), and how many
//! pages each chapter has.

use std::path::Path;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, instrument, warn};

use super::{Provider, ProviderFailure, ProviderPriority};
use crate::download::{ChunkObserver, FetchError, HttpClient};
use crate::model::{Chapter, ChapterNumber, Page, Work};

/// Mirror roots tried in order at resolve time.
const DEFAULT_MIRRORS: [&str; 3] = [
    "https://scans.lastation.us/manga/",
    "https://official.lowee.us/manga/",
    "https://hot.planeptune.us/manga/",
];

/// Page probes per chapter stop after this many hits.
const DEFAULT_PROBE_LIMIT: u32 = 50;

/// Chapter numbering renders four digits; probing never goes past that.
const MAX_CHAPTER_PROBE: u32 = 9999;

/// Normalized slug: lowercase alphanumeric with inner `-`/`_`.
#[allow(clippy::expect_used)]
static SLUG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9_-]*$").expect("slug regex is valid") // Static pattern, safe to panic
});

/// Provider backed by static image mirrors.
#[derive(Debug, Clone)]
pub struct MirrorProvider {
    client: HttpClient,
    bases: Vec<String>,
    probe_limit: u32,
}

impl MirrorProvider {
    /// Creates a provider over the default mirror roots.
    #[must_use]
    pub fn new(client: HttpClient) -> Self {
        Self::with_bases(
            client,
            DEFAULT_MIRRORS.iter().map(ToString::to_string).collect(),
            DEFAULT_PROBE_LIMIT,
        )
    }

    /// Creates a provider over specific mirror roots with a page probe cap.
    /// Used by tests to point at local servers.
    #[must_use]
    pub fn with_bases(client: HttpClient, bases: Vec<String>, probe_limit: u32) -> Self {
        let bases = bases
            .into_iter()
            .map(|mut base| {
                if !base.ends_with('/') {
                    base.push('/');
                }
                base
            })
            .collect();
        Self {
            client,
            bases,
            probe_limit: probe_limit.max(1),
        }
    }

    /// Normalizes a query into a mirror slug: trimmed, lowercased, spaces
    /// collapsed to hyphens. Returns `None` when the result is not a valid
    /// slug.
    fn normalize_slug(query: &str) -> Option<String> {
        let slug = query.trim().to_lowercase().replace(' ', "-");
        SLUG_PATTERN.is_match(&slug).then_some(slug)
    }

    /// Slug read back as a human title: separators become spaces.
    fn humanize_slug(slug: &str) -> String {
        slug.replace(['-', '_'], " ")
    }

    fn page_url(base: &str, slug: &str, number: ChapterNumber, page: u32) -> String {
        format!("{base}{slug}/{number}-{page:03}.png")
    }

    fn failure(&self, cause: impl Into<String>) -> ProviderFailure {
        ProviderFailure::new(self.name(), cause)
    }

    /// Probes one chapter: `None` when its first page is absent, otherwise
    /// the page count (bounded by the probe limit).
    async fn probe_chapter(
        &self,
        base: &str,
        slug: &str,
        number: ChapterNumber,
    ) -> Result<Option<u32>, ProviderFailure> {
        let first = Self::page_url(base, slug, number, 1);
        let exists = self
            .client
            .head_ok(&first)
            .await
            .map_err(|error| self.failure(error.to_string()))?;
        if !exists {
            return Ok(None);
        }

        let mut count = 1;
        for page in 2..=self.probe_limit {
            let url = Self::page_url(base, slug, number, page);
            let hit = self
                .client
                .head_ok(&url)
                .await
                .map_err(|error| self.failure(error.to_string()))?;
            if !hit {
                break;
            }
            count = page;
        }

        Ok(Some(count))
    }
}

#[async_trait]
impl Provider for MirrorProvider {
    fn name(&self) -> &'static str {
        "mirror"
    }

    fn priority(&self) -> ProviderPriority {
        ProviderPriority::Fallback
    }

    fn can_handle(&self, query: &str) -> bool {
        Self::normalize_slug(query).is_some()
    }

    #[instrument(skip(self))]
    async fn resolve(&self, query: &str) -> Result<Work, ProviderFailure> {
        let slug = Self::normalize_slug(query)
            .ok_or_else(|| self.failure(format!("'{query}' is not a usable slug")))?;

        for base in &self.bases {
            let probe = Self::page_url(base, &slug, ChapterNumber::new(1), 1);
            match self.client.head_ok(&probe).await {
                Ok(true) => {
                    debug!(%slug, mirror = %base, "mirror hosts the slug");
                    return Ok(Work {
                        id: slug.clone(),
                        source: self.name(),
                        display_name: Self::humanize_slug(&slug),
                        origin: base.clone(),
                    });
                }
                Ok(false) => debug!(%slug, mirror = %base, "mirror does not host the slug"),
                Err(error) => {
                    warn!(%slug, mirror = %base, %error, "mirror probe failed");
                }
            }
        }

        Err(self.failure(format!(
            "no mirror hosts '{slug}' (tried {} mirrors)",
            self.bases.len()
        )))
    }

    /// Walks chapter numbers upward from 1, checking the `.5` sub-chapter
    /// after each integer hit, until the first missing integer chapter.
    #[instrument(skip(self, work), fields(slug = %work.id))]
    async fn list_chapters(&self, work: &Work) -> Result<Vec<Chapter>, ProviderFailure> {
        let slug = &work.id;
        let base = &work.origin;
        let mut chapters = Vec::new();

        for major in 1..=MAX_CHAPTER_PROBE {
            let number = ChapterNumber::new(major);
            let Some(page_count) = self.probe_chapter(base, slug, number).await? else {
                break;
            };
            chapters.push(Chapter {
                number,
                source_id: number.to_string(),
                page_count,
            });

            let half = ChapterNumber::with_minor(major, 5);
            if let Some(page_count) = self.probe_chapter(base, slug, half).await? {
                chapters.push(Chapter {
                    number: half,
                    source_id: half.to_string(),
                    page_count,
                });
            }
        }

        if chapters.is_empty() {
            return Err(self.failure(format!("'{slug}' has no chapters on {base}")));
        }

        debug!(chapters = chapters.len(), "probed chapter list");
        Ok(chapters)
    }

    async fn list_pages(
        &self,
        work: &Work,
        chapter: &Chapter,
    ) -> Result<Vec<Page>, ProviderFailure> {
        if chapter.page_count == 0 {
            return Err(self.failure(format!("chapter {} has no pages", chapter.number)));
        }

        Ok((1..=chapter.page_count)
            .map(|page| {
                Page::new(
                    page,
                    Self::page_url(&work.origin, &work.id, chapter.number, page),
                )
            })
            .collect())
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
