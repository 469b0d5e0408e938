//! Core data model: works, chapters, and pages.
//!
//! A [`Work`] is one downloadable title. It owns ordered [`Chapter`]s, each of
//! which owns contiguously numbered [`Page`]s. All three are run-scoped: they
//! are created during resolution/enumeration and discarded when the run ends;
//! only the files written to disk outlive them.

use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// One downloadable title, as resolved by a provider.
///
/// Immutable once resolved. `origin` is the base URL the winning provider
/// answered from (an API root or a mirror root) so that enumeration and page
/// URL construction stay pinned to the same host.
#[derive(Debug, Clone, Serialize)]
pub struct Work {
    /// Provider-scoped identifier (an API UUID, or a mirror slug).
    pub id: String,
    /// Name of the provider that resolved this work.
    pub source: &'static str,
    /// Human-readable title, used for the on-disk directory name.
    pub display_name: String,
    /// Base URL the provider resolved against.
    pub origin: String,
}

/// Chapter number with optional decimal sub-chapter (`4`, `4.5`).
///
/// Renders canonically as `{major:04}` or `{major:04}.{minor}`, matching the
/// directory and archive naming scheme. Ordered by `(major, minor)` with the
/// integer chapter sorting before its sub-chapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ChapterNumber {
    major: u32,
    minor: Option<u8>,
}

impl ChapterNumber {
    /// Creates an integer chapter number.
    #[must_use]
    pub fn new(major: u32) -> Self {
        Self { major, minor: None }
    }

    /// Creates a decimal sub-chapter number (e.g. `4.5`).
    #[must_use]
    pub fn with_minor(major: u32, minor: u8) -> Self {
        Self {
            major,
            minor: Some(minor),
        }
    }

    /// Parses a chapter number as providers report it: `"4"`, `"04"`, `"4.5"`.
    ///
    /// Returns `None` for empty input, non-numeric input, or a fractional part
    /// that is not a single digit (feeds occasionally carry `4.05`-style
    /// numbering; those are rejected rather than silently misfiled).
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match raw.split_once('.') {
            None => raw.parse().ok().map(Self::new),
            Some((major, minor)) => {
                let major = major.parse().ok()?;
                if minor.len() != 1 {
                    return None;
                }
                let minor = minor.parse().ok()?;
                Some(Self::with_minor(major, minor))
            }
        }
    }

    /// The integer part of the chapter number.
    #[must_use]
    pub fn major(&self) -> u32 {
        self.major
    }

    /// The decimal sub-chapter digit, if any.
    #[must_use]
    pub fn minor(&self) -> Option<u8> {
        self.minor
    }
}

impl fmt::Display for ChapterNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.minor {
            None => write!(f, "{:04}", self.major),
            Some(minor) => write!(f, "{:04}.{minor}", self.major),
        }
    }
}

impl Ord for ChapterNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then_with(|| self.minor.cmp(&other.minor))
    }
}

impl PartialOrd for ChapterNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One ordered subdivision of a [`Work`].
#[derive(Debug, Clone, Serialize)]
pub struct Chapter {
    /// Position of this chapter within the work.
    pub number: ChapterNumber,
    /// Provider-private handle for page enumeration (an API chapter UUID;
    /// empty for providers that derive page URLs from the number alone).
    pub source_id: String,
    /// Number of pages the provider reported for this chapter.
    pub page_count: u32,
}

/// Fetch lifecycle of a single page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PageStatus {
    /// Not yet handed to the scheduler.
    Pending,
    /// Currently being fetched.
    InFlight,
    /// Fetched and persisted (or already present on disk).
    Succeeded,
    /// All attempts exhausted or a fatal error observed.
    Failed,
}

/// One fetchable image within a chapter.
///
/// Page indices are 1-based and contiguous within their chapter.
#[derive(Debug, Clone, Serialize)]
pub struct Page {
    /// 1-based position within the chapter.
    pub index: u32,
    /// Absolute URL this page is fetched from.
    pub source_url: String,
    /// Destination file; assigned by the orchestrator before scheduling.
    pub local_path: PathBuf,
    /// Current fetch state.
    pub status: PageStatus,
}

impl Page {
    /// Creates a pending page with no local path assigned yet.
    #[must_use]
    pub fn new(index: u32, source_url: impl Into<String>) -> Self {
        Self {
            index,
            source_url: source_url.into(),
            local_path: PathBuf::new(),
            status: PageStatus::Pending,
        }
    }
}
