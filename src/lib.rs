//! Manga Downloader Core Library
//!
//! This library implements the full pipeline for downloading serialized
//! manga: resolving a query to a work, enumerating its chapters, fetching
//! pages concurrently with per-host rate limiting and retry, and packaging
//! finished chapters into CBZ archives.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`model`] - Works, chapters, pages, and chapter numbering
//! - [`resolver`] - Providers and multi-source failover resolution
//! - [`download`] - HTTP client, rate limiting, retry, and the fetch scheduler
//! - [`manager`] - Orchestration from query to run summary
//! - [`archive`] - Ordered CBZ assembly for completed chapters
//! - [`layout`] - On-disk paths for pages and archives
//! - [`progress`] - Progress event sink for consumers to render
//! - [`config`] - Run configuration loaded from JSON
//! - [`cancel`] - Cooperative cancellation token

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod archive;
pub mod cancel;
pub mod config;
pub mod download;
pub mod layout;
pub mod manager;
pub mod model;
pub mod progress;
pub mod resolver;

// Re-export commonly used types
pub use cancel::CancelToken;
pub use config::{Config, ConfigError};
pub use download::{
    DEFAULT_WORKERS, FetchError, FetchFailure, FetchScheduler, HttpClient, RateLimiter,
    RetryPolicy, classify_error,
};
pub use manager::{ChapterOutcome, DownloadManager, RunSummary};
pub use model::{Chapter, ChapterNumber, Page, PageStatus, Work};
pub use resolver::{
    Provider, ProviderRegistry, ResolveError, Resolution, build_default_provider_registry,
};
