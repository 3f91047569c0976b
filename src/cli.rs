//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use docsync_core::inventory::DEFAULT_HISTORY_LIMIT;

/// Keep a local document library in sync with remote sites.
///
/// Docsync scans sites for documents, compares them against the files you
/// already have, and downloads what is new, changed or corrupted.
#[derive(Parser, Debug)]
#[command(name = "docsync")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Settings file (TOML); defaults apply when it does not exist
    #[arg(long, global = true, default_value = "docsync.toml")]
    pub config: PathBuf,

    /// Database file; overrides `storage.database_path`
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage sites
    #[command(subcommand)]
    Site(SiteCommand),

    /// Scan a site and refresh its remote inventory
    Scan {
        /// Site id
        site_id: i64,
    },

    /// Index a local directory into the local inventory
    ScanLocal {
        /// Directory to walk
        dir: PathBuf,
    },

    /// Compare remote and local inventories
    Compare(CompareArgs),

    /// Download new, changed and corrupted files
    Download(DownloadArgs),

    /// Show recent downloads
    History {
        /// Rows to show
        #[arg(short = 'n', long, default_value_t = DEFAULT_HISTORY_LIMIT, value_parser = clap::value_parser!(i64).range(1..=10_000))]
        limit: i64,
    },

    /// Link a local file to a remote file
    Link {
        /// Local file id
        local_id: i64,
        /// Remote file id
        remote_id: i64,
    },

    /// Remove a local file's remote link
    Unlink {
        /// Local file id
        local_id: i64,
    },
}

#[derive(Subcommand, Debug)]
pub enum SiteCommand {
    /// Add a site
    Add {
        /// Display name
        #[arg(long)]
        name: String,
        /// Base URL
        #[arg(long)]
        url: String,
        /// Scraper key (generic, directory_listing)
        #[arg(long, default_value = "generic")]
        scraper: String,
    },

    /// List sites
    List,

    /// Remove a site and its inventory
    Remove {
        /// Site id
        id: i64,
    },
}

#[derive(ClapArgs, Debug)]
pub struct CompareArgs {
    /// Only this site
    #[arg(long)]
    pub site: Option<i64>,

    /// Print the full result as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(ClapArgs, Debug)]
#[allow(clippy::struct_excessive_bools)]
pub struct DownloadArgs {
    /// Only this site
    #[arg(long)]
    pub site: Option<i64>,

    /// Skip files never downloaded
    #[arg(long)]
    pub no_new: bool,

    /// Skip files whose remote size changed
    #[arg(long)]
    pub no_updated: bool,

    /// Skip files whose local copy failed validation
    #[arg(long)]
    pub no_corrupted: bool,

    /// Maximum concurrent downloads (1-100)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Bandwidth cap in KiB/s (0 = unlimited)
    #[arg(short = 'l', long)]
    pub rate_limit: Option<u32>,

    /// Retries for transient failures (0-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub retries: Option<u8>,

    /// Download directory
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Args::try_parse_from(["docsync"]).is_err());
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let args = Args::try_parse_from(["docsync", "site", "list", "-vv", "--db", "x.db"]).unwrap();
        assert_eq!(args.verbose, 2);
        assert_eq!(args.db, Some(PathBuf::from("x.db")));
        assert_eq!(args.config, PathBuf::from("docsync.toml"));
        assert!(matches!(args.command, Command::Site(SiteCommand::List)));
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["docsync", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let err = Args::try_parse_from(["docsync", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    // ==================== Site Tests ====================

    #[test]
    fn test_cli_site_add_defaults_to_generic() {
        let args = Args::try_parse_from([
            "docsync",
            "site",
            "add",
            "--name",
            "Docs",
            "--url",
            "https://example.com/",
        ])
        .unwrap();
        match args.command {
            Command::Site(SiteCommand::Add { name, url, scraper }) => {
                assert_eq!(name, "Docs");
                assert_eq!(url, "https://example.com/");
                assert_eq!(scraper, "generic");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_site_add_requires_url() {
        let err = Args::try_parse_from(["docsync", "site", "add", "--name", "Docs"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_cli_site_remove_parses_id() {
        let args = Args::try_parse_from(["docsync", "site", "remove", "4"]).unwrap();
        assert!(matches!(args.command, Command::Site(SiteCommand::Remove { id: 4 })));
    }

    // ==================== Scan / Compare Tests ====================

    #[test]
    fn test_cli_scan_and_scan_local() {
        let args = Args::try_parse_from(["docsync", "scan", "2"]).unwrap();
        assert!(matches!(args.command, Command::Scan { site_id: 2 }));

        let args = Args::try_parse_from(["docsync", "scan-local", "/library"]).unwrap();
        assert!(matches!(args.command, Command::ScanLocal { dir } if dir == PathBuf::from("/library")));
    }

    #[test]
    fn test_cli_compare_flags() {
        let args = Args::try_parse_from(["docsync", "compare", "--site", "3", "--json"]).unwrap();
        match args.command {
            Command::Compare(compare) => {
                assert_eq!(compare.site, Some(3));
                assert!(compare.json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    // ==================== Download Tests ====================

    #[test]
    fn test_cli_download_defaults_leave_settings_alone() {
        let args = Args::try_parse_from(["docsync", "download"]).unwrap();
        let Command::Download(download) = args.command else {
            panic!("expected download");
        };
        assert!(download.concurrency.is_none());
        assert!(download.rate_limit.is_none());
        assert!(download.retries.is_none());
        assert!(!download.no_new && !download.no_updated && !download.no_corrupted);
    }

    #[test]
    fn test_cli_download_overrides() {
        let args = Args::try_parse_from([
            "docsync",
            "download",
            "--no-corrupted",
            "-c",
            "5",
            "--rate-limit",
            "0",
            "-r",
            "2",
            "-o",
            "out",
        ])
        .unwrap();
        let Command::Download(download) = args.command else {
            panic!("expected download");
        };
        assert!(download.no_corrupted);
        assert_eq!(download.concurrency, Some(5));
        assert_eq!(download.rate_limit, Some(0));
        assert_eq!(download.retries, Some(2));
        assert_eq!(download.output_dir, Some(PathBuf::from("out")));
    }

    #[test]
    fn test_cli_download_concurrency_zero_rejected() {
        let err = Args::try_parse_from(["docsync", "download", "-c", "0"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_download_retries_over_max_rejected() {
        let err = Args::try_parse_from(["docsync", "download", "-r", "11"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    // ==================== History / Link Tests ====================

    #[test]
    fn test_cli_history_limit() {
        let args = Args::try_parse_from(["docsync", "history"]).unwrap();
        assert!(matches!(args.command, Command::History { limit: 100 }));
        let args = Args::try_parse_from(["docsync", "history", "-n", "5"]).unwrap();
        assert!(matches!(args.command, Command::History { limit: 5 }));
        assert!(Args::try_parse_from(["docsync", "history", "-n", "0"]).is_err());
    }

    #[test]
    fn test_cli_link_and_unlink() {
        let args = Args::try_parse_from(["docsync", "link", "1", "2"]).unwrap();
        assert!(matches!(
            args.command,
            Command::Link {
                local_id: 1,
                remote_id: 2
            }
        ));
        let args = Args::try_parse_from(["docsync", "unlink", "1"]).unwrap();
        assert!(matches!(args.command, Command::Unlink { local_id: 1 }));
    }
}
