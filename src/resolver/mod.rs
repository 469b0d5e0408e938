//! Source resolution: mapping a user query to a concrete work and provider.
//!
//! This module provides an extensible provider system that turns a query
//! (a catalog UUID, a title URL, or a slug) into a structured [`Work`]
//! through a priority-ordered registry with recorded failover.
//!
//! # Architecture
//!
//! - [`Provider`] - Async trait each source implements: syntactic query
//!   matching, work resolution, chapter and page enumeration, page fetch
//! - [`ProviderRegistry`] - Priority-ordered collection with the resolution
//!   and enumeration-failover loops
//! - [`Resolution`] - A resolved work, the provider that won it, and the
//!   ordered failover events recorded on the way
//! - [`ApiProvider`] - Structured catalog API (primary source)
//! - [`MirrorProvider`] - Static image mirrors probed by URL shape (fallback)
//!
//! # Example
//!
//! ```no_run
//! use mangadl_core::download::HttpClient;
//! use mangadl_core::resolver::build_default_provider_registry;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = build_default_provider_registry(HttpClient::new(), "en");
//!
//! let resolution = registry.resolve("one-punch-man").await?;
//! println!(
//!     "resolved '{}' via {}",
//!     resolution.work.display_name,
//!     resolution.provider.name()
//! );
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod error;
pub mod mirror;
pub mod registry;

pub use api::ApiProvider;
pub use error::{ProviderFailure, ResolveError};
pub use mirror::MirrorProvider;
pub use registry::ProviderRegistry;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::download::{ChunkObserver, FetchError, HttpClient};
use crate::model::{Chapter, Page, Work};

/// Builds the default provider registry used by CLI execution flows.
///
/// Order is deterministic: the structured API first, image mirrors as the
/// fallback.
#[must_use]
pub fn build_default_provider_registry(client: HttpClient, language: &str) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(ApiProvider::new(client.clone(), language)));
    registry.register(Arc::new(MirrorProvider::new(client)));
    registry
}

/// Priority level for provider ordering.
///
/// Providers are tried in priority order: Primary first, then Fallback.
/// Within the same priority level, providers are tried in registration
/// order.
///
/// Derives `Ord` so that `Primary < Fallback` for sorting (try the primary
/// source first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProviderPriority {
    /// Preferred source with structured metadata.
    Primary = 0,
    /// Tried only after every primary source has failed.
    Fallback = 1,
}

/// A resolved work along with how it was obtained.
#[derive(Clone)]
pub struct Resolution {
    /// The resolved work.
    pub work: Work,
    /// The provider that produced the work; enumeration and page fetch
    /// follow it.
    pub provider: Arc<dyn Provider>,
    /// Ordered failover events recorded before (and, for enumeration, after)
    /// this provider won.
    pub failovers: Vec<ProviderFailure>,
}

impl std::fmt::Debug for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolution")
            .field("work", &self.work)
            .field("provider", &self.provider.name())
            .field("failovers", &self.failovers)
            .finish()
    }
}

/// Trait that all source providers implement.
///
/// A provider maps queries to works, enumerates their chapters and pages,
/// and streams page content to disk. Enumeration errors surface as
/// [`ProviderFailure`] so the registry can fail over; per-page fetch errors
/// surface as [`FetchError`] so the retry machinery can classify them.
///
/// # Object Safety
///
/// This trait uses `async_trait` to support dynamic dispatch via
/// `Arc<dyn Provider>`. Rust 2024 native async traits are not object-safe,
/// so `async_trait` is required for the registry pattern.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Returns the provider's name (e.g., "api", "mirror").
    fn name(&self) -> &'static str;

    /// Returns the provider's priority level.
    fn priority(&self) -> ProviderPriority;

    /// Returns true if this provider recognizes the query's shape. Purely
    /// syntactic; never touches the network.
    fn can_handle(&self, query: &str) -> bool;

    /// Resolves the query into a concrete work.
    async fn resolve(&self, query: &str) -> Result<Work, ProviderFailure>;

    /// Enumerates the work's chapters in ascending order.
    async fn list_chapters(&self, work: &Work) -> Result<Vec<Chapter>, ProviderFailure>;

    /// Materializes a chapter's pages with their source URLs, in page-index
    /// order. Local paths are left for the caller to assign.
    async fn list_pages(&self, work: &Work, chapter: &Chapter)
    -> Result<Vec<Page>, ProviderFailure>;

    /// Streams one page to `dest`, reporting cumulative bytes through the
    /// observer. Returns the number of bytes written.
    async fn fetch_page(
        &self,
        page: &Page,
        dest: &Path,
        observe: ChunkObserver<'_>,
    ) -> Result<u64, FetchError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_priority_ordering() {
        assert!(ProviderPriority::Primary < ProviderPriority::Fallback);
    }

    #[test]
    fn test_default_registry_order() {
        let registry = build_default_provider_registry(HttpClient::new(), "en");
        assert_eq!(registry.provider_count(), 2);
    }
}
