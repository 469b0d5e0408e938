//! Error types for source resolution.
//!
//! Resolution distinguishes two terminal outcomes: a query no provider even
//! recognizes (caught before any network traffic) and a recognized query
//! that every applicable provider failed to serve. The latter carries the
//! ordered per-provider causes so the run summary can say exactly what was
//! tried.

use thiserror::Error;

/// One provider's recorded reason for failing a query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{provider}: {cause}")]
pub struct ProviderFailure {
    /// Name of the provider that failed.
    pub provider: &'static str,
    /// Human-readable cause (network fault, not found, malformed response).
    pub cause: String,
}

impl ProviderFailure {
    /// Creates a provider failure record.
    #[must_use]
    pub fn new(provider: &'static str, cause: impl Into<String>) -> Self {
        Self {
            provider,
            cause: cause.into(),
        }
    }
}

/// Errors that can occur while resolving a query to a concrete work.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    /// The query is syntactically unusable; no network traffic happened.
    #[error("unusable query '{query}': {reason}\n  Suggestion: {suggestion}")]
    Validation {
        /// The rejected query.
        query: String,
        /// Why no provider recognizes it.
        reason: String,
        /// How to fix the query.
        suggestion: String,
    },

    /// Every applicable provider failed; causes are in attempt order.
    #[error(
        "no source could provide '{query}': {}\n  Suggestion: Check the title spelling or retry once the sources recover",
        format_failures(.failures)
    )]
    SourceUnavailable {
        /// The query that could not be served.
        query: String,
        /// Ordered causes, one per attempted provider.
        failures: Vec<ProviderFailure>,
    },
}

impl ResolveError {
    /// Creates a `Validation` error with a specific reason.
    #[must_use]
    pub fn validation(
        query: impl Into<String>,
        reason: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Validation {
            query: query.into(),
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a `Validation` error for a query no provider recognizes.
    #[must_use]
    pub fn unrecognized(query: impl Into<String>) -> Self {
        Self::Validation {
            query: query.into(),
            reason: "no provider recognizes this query format".to_string(),
            suggestion: "Use a catalog UUID, a title URL, or a slug like 'one-punch-man'"
                .to_string(),
        }
    }

    /// Creates a `SourceUnavailable` error from the ordered failure list.
    #[must_use]
    pub fn source_unavailable(query: impl Into<String>, failures: Vec<ProviderFailure>) -> Self {
        Self::SourceUnavailable {
            query: query.into(),
            failures,
        }
    }

    /// Returns true for the pre-network validation case.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

fn format_failures(failures: &[ProviderFailure]) -> String {
    if failures.is_empty() {
        return "no providers attempted".to_string();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
