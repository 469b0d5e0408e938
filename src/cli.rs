//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use mangadl_core::archive::ArchiveFormat;
use mangadl_core::config::Config;

/// Download and archive serialized manga chapters.
///
/// Queries can be catalog UUIDs, title URLs, or slugs like `one-punch-man`;
/// each resolves against the structured API first and falls back to the
/// image mirrors.
#[derive(Parser, Debug)]
#[command(name = "mangadl")]
#[command(author, version, about)]
pub struct Args {
    /// Works to download (catalog UUID, title URL, or slug)
    #[arg(required = true, value_name = "QUERY")]
    pub queries: Vec<String>,

    /// Read defaults from a JSON config file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Concurrent page fetches (1-100)
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub workers: Option<u8>,

    /// Pages fetched per chapter at most
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub max_pages: Option<u32>,

    /// Chapters downloaded per work at most
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub max_chapters: Option<u32>,

    /// First chapter number to download
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub start_chapter: Option<u32>,

    /// Translated language requested from the structured API
    #[arg(short, long)]
    pub language: Option<String>,

    /// Directory that receives downloaded works
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Fetch attempts per page (1-10)
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub retry_attempts: Option<u8>,

    /// Keep loose pages instead of building .cbz archives
    #[arg(long)]
    pub no_archive: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Folds the CLI overrides onto a loaded config.
    ///
    /// Only flags the user actually passed change anything; everything else
    /// keeps the config-file value (or its default).
    #[must_use]
    pub fn apply_to(&self, mut config: Config) -> Config {
        if let Some(workers) = self.workers {
            config.workers = usize::from(workers);
        }
        if let Some(max_pages) = self.max_pages {
            config.max_pages = Some(max_pages);
        }
        if let Some(max_chapters) = self.max_chapters {
            config.max_chapters = Some(max_chapters);
        }
        if let Some(start_chapter) = self.start_chapter {
            config.start_chapter = start_chapter;
        }
        if let Some(language) = &self.language {
            config.language = language.clone();
        }
        if let Some(output) = &self.output {
            config.output_root = output.clone();
        }
        if let Some(attempts) = self.retry_attempts {
            config.retry_attempts = u32::from(attempts);
        }
        if self.no_archive {
            config.archive_format = ArchiveFormat::None;
        }
        config
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== Parsing Tests ====================

    #[test]
    fn test_cli_single_query_parses_successfully() {
        let args = Args::try_parse_from(["mangadl", "one-punch-man"]).unwrap();
        assert_eq!(args.queries, vec!["one-punch-man"]);
        assert_eq!(args.workers, None);
        assert!(!args.no_archive);
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
    }

    #[test]
    fn test_cli_multiple_queries_collect_in_order() {
        let args = Args::try_parse_from(["mangadl", "first-title", "second-title"]).unwrap();
        assert_eq!(args.queries, vec!["first-title", "second-title"]);
    }

    #[test]
    fn test_cli_missing_query_rejected() {
        let result = Args::try_parse_from(["mangadl"]);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        // --help causes early exit, so we check it returns an error with Help kind
        let result = Args::try_parse_from(["mangadl", "--help"]);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let result = Args::try_parse_from(["mangadl", "--version"]);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let result = Args::try_parse_from(["mangadl", "title", "--invalid-flag"]);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    // ==================== Workers Tests ====================

    #[test]
    fn test_cli_workers_short_and_long_flags() {
        let args = Args::try_parse_from(["mangadl", "title", "-w", "5"]).unwrap();
        assert_eq!(args.workers, Some(5));

        let args = Args::try_parse_from(["mangadl", "title", "--workers", "20"]).unwrap();
        assert_eq!(args.workers, Some(20));
    }

    #[test]
    fn test_cli_workers_range_bounds() {
        let args = Args::try_parse_from(["mangadl", "title", "-w", "1"]).unwrap();
        assert_eq!(args.workers, Some(1));

        let args = Args::try_parse_from(["mangadl", "title", "-w", "100"]).unwrap();
        assert_eq!(args.workers, Some(100));
    }

    #[test]
    fn test_cli_workers_zero_rejected() {
        let result = Args::try_parse_from(["mangadl", "title", "-w", "0"]);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_workers_over_max_rejected() {
        let result = Args::try_parse_from(["mangadl", "title", "-w", "101"]);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    // ==================== Bounds Flags Tests ====================

    #[test]
    fn test_cli_chapter_and_page_bounds() {
        let args = Args::try_parse_from([
            "mangadl",
            "title",
            "--max-pages",
            "10",
            "--max-chapters",
            "3",
            "--start-chapter",
            "5",
        ])
        .unwrap();
        assert_eq!(args.max_pages, Some(10));
        assert_eq!(args.max_chapters, Some(3));
        assert_eq!(args.start_chapter, Some(5));
    }

    #[test]
    fn test_cli_zero_bounds_rejected() {
        for flag in ["--max-pages", "--max-chapters", "--start-chapter"] {
            let result = Args::try_parse_from(["mangadl", "title", flag, "0"]);
            assert!(result.is_err(), "{flag} must reject 0");
        }
    }

    #[test]
    fn test_cli_retry_attempts_range() {
        let args = Args::try_parse_from(["mangadl", "title", "-r", "10"]).unwrap();
        assert_eq!(args.retry_attempts, Some(10));

        let result = Args::try_parse_from(["mangadl", "title", "-r", "11"]);
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::ValueValidation
        );
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["mangadl", "title", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    // ==================== apply_to Tests ====================

    #[test]
    fn test_apply_to_overrides_only_passed_flags() {
        let args = Args::try_parse_from(["mangadl", "title", "-w", "4", "-l", "ja"]).unwrap();

        let config = args.apply_to(Config::default());

        assert_eq!(config.workers, 4);
        assert_eq!(config.language, "ja");
        assert_eq!(config.max_pages, Some(50), "untouched fields keep defaults");
        assert_eq!(config.archive_format, ArchiveFormat::Cbz);
    }

    #[test]
    fn test_apply_to_no_archive_switches_format() {
        let args = Args::try_parse_from(["mangadl", "title", "--no-archive"]).unwrap();

        let config = args.apply_to(Config::default());

        assert_eq!(config.archive_format, ArchiveFormat::None);
    }

    #[test]
    fn test_apply_to_output_and_chapter_flags() {
        let args = Args::try_parse_from([
            "mangadl",
            "title",
            "-o",
            "/tmp/books",
            "--start-chapter",
            "7",
            "--max-chapters",
            "2",
        ])
        .unwrap();

        let config = args.apply_to(Config::default());

        assert_eq!(config.output_root, PathBuf::from("/tmp/books"));
        assert_eq!(config.start_chapter, 7);
        assert_eq!(config.max_chapters, Some(2));
    }

    #[test]
    fn test_apply_to_result_survives_validation() {
        let args =
            Args::try_parse_from(["mangadl", "title", "-w", "100", "-r", "1", "--max-pages", "1"])
                .unwrap();

        let config = args.apply_to(Config::default());

        config.validate().unwrap();
    }
}
