//! Ordered CBZ assembly for completed chapters.
//!
//! # Overview
//!
//! A chapter that finished fetching is packaged into a single `.cbz`
//! container (a zip holding the page images in reading order). Entries are
//! written to a temporary file in the destination directory and the result
//! is persisted with an atomic rename, so a crash or cancellation mid-build
//! never leaves a partial archive at the destination.
//!
//! Assembly is synchronous file IO; the orchestrator runs it on a blocking
//! thread.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use mangadl_core::archive::{ArchiveManifest, build};
//! use mangadl_core::model::{ChapterNumber, Page, PageStatus};
//!
//! # fn main() -> Result<(), mangadl_core::archive::ArchiveError> {
//! let mut page = Page::new(1, "https://cdn.example/data/abc/x1.png");
//! page.local_path = "downloads/solo melancholy/0001/001.png".into();
//! page.status = PageStatus::Succeeded;
//!
//! let manifest = ArchiveManifest::from_pages(ChapterNumber::new(1), &[page]);
//! let archive = build(&manifest, Path::new("downloads/solo melancholy/0001.cbz"))?;
//! println!("wrote {}", archive.display());
//! # Ok(())
//! # }
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, instrument};
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::FileOptions;

use crate::model::{ChapterNumber, Page, PageStatus};

/// What to do with a chapter's pages once they are all on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    /// Leave the loose page files as they are.
    None,
    /// Package the pages into a `.cbz` container.
    #[default]
    Cbz,
}

/// Failure during archive assembly.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The manifest holds no archivable pages.
    #[error("chapter {chapter} has no archivable pages")]
    EmptyManifest {
        /// Chapter the empty manifest was built for.
        chapter: ChapterNumber,
    },

    /// The staging file could not be created next to the destination.
    #[error("cannot stage archive in '{}': {source}", .dir.display())]
    Stage {
        /// Directory the temporary file was created in.
        dir: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// A page file listed in the manifest could not be read back.
    #[error("cannot read page file '{}': {source}", .path.display())]
    ReadPage {
        /// Path of the unreadable page file.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The zip container rejected an entry.
    #[error("archive write failed: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Copying page bytes into the container failed.
    #[error("cannot write page '{name}' into archive: {source}")]
    EntryWrite {
        /// Entry name being written when the error occurred.
        name: String,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The finished archive could not be moved to the destination.
    #[error("cannot publish archive at '{}': {source}", .path.display())]
    Persist {
        /// Intended destination path.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
}

/// One entry of an [`ArchiveManifest`]: a page file and its name inside the
/// container.
#[derive(Debug, Clone)]
struct ArchiveEntry {
    name: String,
    source: PathBuf,
}

/// Ordered list of page files to package for one chapter.
///
/// Only pages that actually made it to disk are listed; the orchestrator
/// decides separately whether a chapter with failed pages is archived at
/// all.
#[derive(Debug, Clone)]
pub struct ArchiveManifest {
    chapter: ChapterNumber,
    entries: Vec<ArchiveEntry>,
}

impl ArchiveManifest {
    /// Builds a manifest from a chapter's pages.
    ///
    /// Pages that are not [`PageStatus::Succeeded`] or that never got a
    /// local path are dropped; the rest are ordered by page index. Entry
    /// names are the on-disk file names, which the layout already renders
    /// as `{index:03}.{ext}`.
    #[must_use]
    pub fn from_pages(chapter: ChapterNumber, pages: &[Page]) -> Self {
        let mut archivable: Vec<&Page> = pages
            .iter()
            .filter(|page| page.status == PageStatus::Succeeded)
            .collect();
        archivable.sort_by_key(|page| page.index);

        let entries = archivable
            .into_iter()
            .filter_map(|page| {
                let name = page.local_path.file_name()?.to_string_lossy().into_owned();
                Some(ArchiveEntry {
                    name,
                    source: page.local_path.clone(),
                })
            })
            .collect();

        Self { chapter, entries }
    }

    /// Chapter this manifest belongs to.
    #[must_use]
    pub fn chapter(&self) -> ChapterNumber {
        self.chapter
    }

    /// Number of pages that will be packaged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there is anything to package.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Packages the manifest's pages into a CBZ at `destination`.
///
/// Entries are stored uncompressed (page images already are) in manifest
/// order. The archive is staged in the destination directory and published
/// with an atomic rename; an existing file at `destination` is replaced.
#[instrument(skip(manifest), fields(chapter = %manifest.chapter(), entries = manifest.len()))]
pub fn build(manifest: &ArchiveManifest, destination: &Path) -> Result<PathBuf, ArchiveError> {
    if manifest.is_empty() {
        return Err(ArchiveError::EmptyManifest {
            chapter: manifest.chapter,
        });
    }

    let dir = destination.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|source| ArchiveError::Stage {
        dir: dir.to_path_buf(),
        source,
    })?;
    let staged = NamedTempFile::new_in(dir).map_err(|source| ArchiveError::Stage {
        dir: dir.to_path_buf(),
        source,
    })?;

    let mut zip = ZipWriter::new(staged);
    let options = FileOptions::default().compression_method(CompressionMethod::Stored);
    for entry in &manifest.entries {
        let bytes = fs::read(&entry.source).map_err(|source| ArchiveError::ReadPage {
            path: entry.source.clone(),
            source,
        })?;
        zip.start_file(&entry.name, options)?;
        zip.write_all(&bytes)
            .map_err(|source| ArchiveError::EntryWrite {
                name: entry.name.clone(),
                source,
            })?;
    }

    let staged = zip.finish()?;
    staged
        .persist(destination)
        .map_err(|error| ArchiveError::Persist {
            path: destination.to_path_buf(),
            source: error.error,
        })?;

    debug!(path = %destination.display(), "archive published");
    Ok(destination.to_path_buf())
}
