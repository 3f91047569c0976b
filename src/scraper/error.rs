//! Error types for scrapers and site scans.

use thiserror::Error;

use crate::download::DownloadError;
use crate::inventory::StoreError;
use crate::registry::RegistryError;

/// Errors raised by a [`super::Scraper`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScrapeError {
    /// Connection, DNS or read failure.
    #[error("network error fetching {url}: {message}")]
    Network {
        /// Page being fetched.
        url: String,
        /// Transport error text.
        message: String,
    },

    /// The site answered with a non-2xx status.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// Page being fetched.
        url: String,
        /// Status code.
        status: u16,
    },

    /// A URL or page could not be interpreted.
    #[error("cannot parse {url}: {reason}")]
    Parse {
        /// Offending URL.
        url: String,
        /// What went wrong.
        reason: String,
    },
}

impl ScrapeError {
    /// Creates a parse error.
    pub fn parse(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

impl From<DownloadError> for ScrapeError {
    fn from(err: DownloadError) -> Self {
        match err {
            DownloadError::HttpStatus { url, status, .. } => Self::HttpStatus { url, status },
            DownloadError::InvalidUrl { url } => Self::parse(url, "invalid URL"),
            DownloadError::Network { url, source } => Self::Network {
                url,
                message: source.to_string(),
            },
            DownloadError::Timeout { url } => Self::Network {
                message: "request timed out".to_string(),
                url,
            },
            other => Self::Network {
                url: String::new(),
                message: other.to_string(),
            },
        }
    }
}

/// Errors from [`super::SiteScanner::scan_site`].
#[derive(Debug, Error)]
pub enum ScanError {
    /// No site row with this id.
    #[error("site {0} not found")]
    SiteNotFound(i64),

    /// The site's scraper type is not registered.
    #[error("unknown scraper type '{scraper_type}' for site {site_id}")]
    UnknownScraperType {
        /// Site being scanned.
        site_id: i64,
        /// Registry key from the site row.
        scraper_type: String,
    },

    /// The site's base URL does not parse.
    #[error("invalid site URL {url}")]
    InvalidSiteUrl {
        /// Stored URL.
        url: String,
    },

    /// The scraper factory failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Listing categories or files failed.
    #[error(transparent)]
    Scrape(#[from] ScrapeError),

    /// Inventory write failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
