//! On-disk layout for downloaded works.
//!
//! Pages land at `<output_root>/<title>/<chapter>/<page>.<ext>` and chapter
//! archives at `<output_root>/<title>/<chapter>.cbz`, where `<chapter>` is the
//! canonical [`ChapterNumber`] rendering (`0004`, `0004.5`) and `<page>` is the
//! zero-padded page index. Titles are sanitized for the filesystem before use.

use std::path::{Path, PathBuf};

use crate::model::ChapterNumber;

/// File extension used when none can be recovered from a page URL.
const DEFAULT_PAGE_EXTENSION: &str = "png";

/// Longest extension considered plausible; anything longer is noise.
const MAX_EXTENSION_LEN: usize = 5;

/// Replaces filesystem-unsafe characters in a title with underscores.
///
/// Maps path separators, Windows-reserved punctuation (`: * ? " < > |`) and
/// control characters to `_`, one replacement per character. Spaces and all
/// other characters pass through untouched, so a display title keeps its
/// readable shape.
///
/// # Examples
///
/// ```
/// use mangadl_core::layout::sanitize_title;
///
/// assert_eq!(sanitize_title("Chapter: 1/2*?"), "Chapter_ 1_2__");
/// assert_eq!(sanitize_title("one piece"), "one piece");
/// ```
#[must_use]
pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Directory that holds everything belonging to one work.
#[must_use]
pub fn work_dir(output_root: &Path, title: &str) -> PathBuf {
    output_root.join(sanitize_title(title))
}

/// Directory that holds one chapter's loose pages.
#[must_use]
pub fn chapter_dir(output_root: &Path, title: &str, number: ChapterNumber) -> PathBuf {
    work_dir(output_root, title).join(number.to_string())
}

/// Destination file for one page.
#[must_use]
pub fn page_path(
    output_root: &Path,
    title: &str,
    number: ChapterNumber,
    page_index: u32,
    extension: &str,
) -> PathBuf {
    chapter_dir(output_root, title, number).join(format!("{page_index:03}.{extension}"))
}

/// Destination file for one chapter's archive.
#[must_use]
pub fn archive_path(output_root: &Path, title: &str, number: ChapterNumber) -> PathBuf {
    work_dir(output_root, title).join(format!("{number}.cbz"))
}

/// Recovers a file extension from a page URL, defaulting to `png`.
///
/// Only the URL path is considered (query strings are ignored), and the
/// candidate must be short and alphanumeric to count. Mirror pages are always
/// `.png`; API-served pages carry their real extension in the filename.
#[must_use]
pub fn extension_from_url(url: &str) -> String {
    let path = url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string());

    let candidate = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());

    match candidate {
        Some(ext)
            if !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            ext
        }
        _ => DEFAULT_PAGE_EXTENSION.to_string(),
    }
}
