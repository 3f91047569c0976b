//! Error types for the download module.
//!
//! This module defines structured errors for single transfer attempts and
//! for a transfer that has given up after its retry budget.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during a single download attempt.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, reset mid-body, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request exceeded the configured HTTP timeout.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Non-2xx HTTP response.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// Parsed Retry-After header, if the server sent one.
        retry_after: Option<Duration>,
    },

    /// File system error during download (create dir, write, rename, etc.)
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The downloaded file was written but failed its content check.
    ///
    /// The file is left on disk for inspection.
    #[error("validation failed for {path}: {reason}")]
    Validation {
        /// Path of the retained file.
        path: PathBuf,
        /// Reason reported by the validator.
        reason: String,
    },

    /// The transfer observed its cancellation flag.
    #[error("download cancelled: {url}")]
    Cancelled {
        /// The URL being downloaded when cancellation was observed.
        url: String,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Maps a reqwest error to `Timeout` or `Network`.
    pub fn from_reqwest(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::timeout(url)
        } else {
            Self::network(url, source)
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with a parsed Retry-After value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<Duration>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a validation error.
    pub fn validation(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Validation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::Cancelled { url: url.into() }
    }

    /// Returns true when this attempt ended because cancellation was observed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// A transfer that ended without producing a valid file.
///
/// Carries the last attempt's error and how many attempts were made.
#[derive(Debug, Error)]
#[error("download failed after {attempts} attempt(s): {error}")]
pub struct TransferFailure {
    /// Number of attempts made, including the first.
    pub attempts: u32,
    /// Error from the final attempt.
    #[source]
    pub error: DownloadError,
}

impl TransferFailure {
    /// Wraps the final attempt's error.
    #[must_use]
    pub fn new(attempts: u32, error: DownloadError) -> Self {
        Self { attempts, error }
    }

    /// Returns true when the transfer stopped because it was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.error.is_cancelled()
    }
}

// No `From<reqwest::Error>` / `From<std::io::Error>`: every variant needs a url or path.
