//! Run configuration.
//!
//! A [`Config`] is plain data: it is loaded from a JSON file (every field
//! optional, falling back to its default), optionally overridden per-field
//! by the CLI, validated once, and then handed to the orchestrator. The
//! library never reads files or argv on its own behalf beyond
//! [`Config::load`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::archive::ArchiveFormat;
use crate::download::{DEFAULT_MAX_ATTEMPTS, DEFAULT_WORKERS, MAX_WORKERS, MIN_WORKERS};

/// Why a configuration could not be loaded or used.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error(
        "cannot read config file '{}': {source}\n  Suggestion: Check that the path exists and is readable",
        .path.display()
    )]
    Read {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The config file is not valid JSON for this schema.
    #[error(
        "cannot parse config file '{}': {source}\n  Suggestion: The file must be a JSON object; every field is optional",
        .path.display()
    )]
    Parse {
        /// Path that was parsed.
        path: PathBuf,
        /// Underlying serde error.
        source: serde_json::Error,
    },

    /// A field value is outside its supported range.
    #[error("invalid config: {field} {reason}\n  Suggestion: {suggestion}")]
    Invalid {
        /// Field that failed validation.
        field: &'static str,
        /// What is wrong with the value.
        reason: String,
        /// How to fix it.
        suggestion: String,
    },
}

impl ConfigError {
    fn invalid(
        field: &'static str,
        reason: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }
}

/// Settings for one run of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Concurrent fetch workers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Pages fetched per chapter at most; `None` means every page.
    #[serde(default = "default_max_pages")]
    pub max_pages: Option<u32>,

    /// Chapters processed per work at most; `None` means every chapter.
    #[serde(default)]
    pub max_chapters: Option<u32>,

    /// First chapter number to download; earlier chapters are skipped.
    #[serde(default = "default_start_chapter")]
    pub start_chapter: u32,

    /// Fetch attempts per page before it is recorded as failed.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Container built for fully fetched chapters.
    #[serde(default)]
    pub archive_format: ArchiveFormat,

    /// Translated language requested from the structured API.
    #[serde(default = "default_language")]
    pub language: String,

    /// Directory that receives all downloaded works.
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,

    /// First backoff delay after a host failure, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Ceiling for backoff and Retry-After waits, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_max_pages() -> Option<u32> {
    Some(50)
}

fn default_start_chapter() -> u32 {
    1
}

fn default_retry_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_language() -> String {
    "en".to_string()
}

fn default_output_root() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_pages: default_max_pages(),
            max_chapters: None,
            start_chapter: default_start_chapter(),
            retry_attempts: default_retry_attempts(),
            archive_format: ArchiveFormat::default(),
            language: default_language(),
            output_root: default_output_root(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Config {
    /// Loads and validates a config from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read, is not valid
    /// JSON, or holds an out-of-range value.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every field against its supported range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&self.workers) {
            return Err(ConfigError::invalid(
                "workers",
                format!("is {}", self.workers),
                format!("Use a value between {MIN_WORKERS} and {MAX_WORKERS}"),
            ));
        }
        if self.retry_attempts == 0 {
            return Err(ConfigError::invalid(
                "retry_attempts",
                "is 0",
                "Every page needs at least one attempt",
            ));
        }
        if self.start_chapter == 0 {
            return Err(ConfigError::invalid(
                "start_chapter",
                "is 0",
                "Chapters are numbered from 1",
            ));
        }
        if self.max_pages == Some(0) {
            return Err(ConfigError::invalid(
                "max_pages",
                "is 0",
                "Use null to download every page, or a positive cap",
            ));
        }
        if self.max_chapters == Some(0) {
            return Err(ConfigError::invalid(
                "max_chapters",
                "is 0",
                "Use null to download every chapter, or a positive cap",
            ));
        }
        if self.base_delay_ms == 0 {
            return Err(ConfigError::invalid(
                "base_delay_ms",
                "is 0",
                "Backoff needs a positive base delay",
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigError::invalid(
                "max_delay_ms",
                format!(
                    "is {} but base_delay_ms is {}",
                    self.max_delay_ms, self.base_delay_ms
                ),
                "The delay ceiling must be at least the base delay",
            ));
        }
        if self.language.trim().is_empty() {
            return Err(ConfigError::invalid(
                "language",
                "is empty",
                "Use a language code like 'en'",
            ));
        }
        Ok(())
    }

    /// First backoff delay as a [`Duration`].
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Backoff ceiling as a [`Duration`].
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}
