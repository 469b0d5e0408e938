//! Provider registry with priority-ordered resolution and failover.
//!
//! The [`ProviderRegistry`] manages the provider collection and orchestrates
//! the resolution loop: syntactic validation, priority-ordered attempts with
//! recorded causes, and enumeration-time failover to lower-priority sources.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{Provider, ProviderFailure, Resolution, ResolveError};
use crate::model::Chapter;

/// A priority-ordered collection of providers with the resolution loop.
///
/// Providers are tried in priority order (Primary first, then Fallback).
/// Within the same priority level, providers are tried in registration
/// order.
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// Creates an empty provider registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    /// Registers a provider with the registry.
    #[tracing::instrument(skip(self, provider), fields(provider_name))]
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        tracing::Span::current().record("provider_name", provider.name());
        debug!(
            name = provider.name(),
            priority = ?provider.priority(),
            "registering provider"
        );
        self.providers.push(provider);
    }

    /// Returns the number of registered providers.
    #[must_use]
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Returns true if no providers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Returns all providers that recognize the query, sorted by priority.
    ///
    /// Within the same priority level, registration order is preserved.
    #[must_use]
    pub fn find_handlers(&self, query: &str) -> Vec<Arc<dyn Provider>> {
        let mut handlers: Vec<Arc<dyn Provider>> = self
            .providers
            .iter()
            .filter(|p| p.can_handle(query))
            .map(Arc::clone)
            .collect();
        handlers.sort_by_key(|p| p.priority());
        handlers
    }

    /// Checks that at least one provider recognizes the query.
    ///
    /// Purely syntactic; no network traffic.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Validation`] when no provider recognizes the
    /// query's shape.
    pub fn validate(&self, query: &str) -> Result<(), ResolveError> {
        if self.find_handlers(query).is_empty() {
            return Err(ResolveError::unrecognized(query));
        }
        Ok(())
    }

    /// Resolves a query into a work through the priority-ordered attempt
    /// loop.
    ///
    /// Every provider failure on the way is recorded in order and carried in
    /// the returned [`Resolution`], so callers can report exactly which
    /// sources were tried before one won.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Validation`] when no provider recognizes the
    /// query, or [`ResolveError::SourceUnavailable`] with the ordered causes
    /// when every applicable provider fails.
    #[tracing::instrument(skip(self))]
    pub async fn resolve(&self, query: &str) -> Result<Resolution, ResolveError> {
        let handlers = self.find_handlers(query);

        if handlers.is_empty() {
            return Err(ResolveError::unrecognized(query));
        }

        debug!(handler_count = handlers.len(), "found providers for query");

        let mut failures: Vec<ProviderFailure> = Vec::new();

        for provider in handlers {
            debug!(provider = provider.name(), "trying provider");

            match provider.resolve(query).await {
                Ok(work) => {
                    info!(
                        provider = provider.name(),
                        work = %work.display_name,
                        failovers = failures.len(),
                        "resolution successful"
                    );
                    return Ok(Resolution {
                        work,
                        provider,
                        failovers: failures,
                    });
                }
                Err(failure) => {
                    warn!(
                        provider = failure.provider,
                        cause = %failure.cause,
                        "provider failed, trying next"
                    );
                    failures.push(failure);
                }
            }
        }

        Err(ResolveError::source_unavailable(query, failures))
    }

    /// Enumerates chapters for a resolution, failing over to lower-priority
    /// providers when the winning provider cannot enumerate.
    ///
    /// A fallback provider re-resolves the query first, because work
    /// identifiers are provider-specific. On failover the resolution is
    /// updated in place so subsequent page enumeration and fetch follow the
    /// provider that actually delivered the chapter list; a chapter never
    /// mixes content from two providers.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::SourceUnavailable`] with all recorded causes
    /// when no provider can enumerate.
    #[tracing::instrument(skip(self, resolution), fields(provider = resolution.provider.name()))]
    pub async fn enumerate(
        &self,
        query: &str,
        resolution: &mut Resolution,
    ) -> Result<Vec<Chapter>, ResolveError> {
        match resolution.provider.list_chapters(&resolution.work).await {
            Ok(chapters) => {
                debug!(chapters = chapters.len(), "enumeration successful");
                return Ok(chapters);
            }
            Err(failure) => {
                warn!(
                    provider = failure.provider,
                    cause = %failure.cause,
                    "enumeration failed, failing over"
                );
                resolution.failovers.push(failure);
            }
        }

        let failed_name = resolution.provider.name();
        let mut past_current = false;

        for provider in self.find_handlers(query) {
            if !past_current {
                past_current = provider.name() == failed_name;
                continue;
            }

            debug!(provider = provider.name(), "re-resolving on fallback");

            let work = match provider.resolve(query).await {
                Ok(work) => work,
                Err(failure) => {
                    warn!(
                        provider = failure.provider,
                        cause = %failure.cause,
                        "fallback resolution failed"
                    );
                    resolution.failovers.push(failure);
                    continue;
                }
            };

            match provider.list_chapters(&work).await {
                Ok(chapters) => {
                    info!(
                        provider = provider.name(),
                        chapters = chapters.len(),
                        "enumeration failover successful"
                    );
                    resolution.work = work;
                    resolution.provider = provider;
                    return Ok(chapters);
                }
                Err(failure) => {
                    warn!(
                        provider = failure.provider,
                        cause = %failure.cause,
                        "fallback enumeration failed"
                    );
                    resolution.failovers.push(failure);
                }
            }
        }

        Err(ResolveError::source_unavailable(
            query,
            resolution.failovers.clone(),
        ))
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.providers.iter().map(|p| p.name()).collect();
        f.debug_struct("ProviderRegistry")
            .field("provider_count", &self.providers.len())
            .field("providers", &names)
            .finish()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
