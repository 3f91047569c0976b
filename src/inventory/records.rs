//! Row types for sites, remote/local files and download history.

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A site the scanners crawl.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Site {
    /// Row id.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Base URL handed to the scraper.
    pub url: String,
    /// Scraper registry key.
    pub scraper_type: String,
    /// Last successful scan, if any.
    pub last_scan_at: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
}

/// Input for [`crate::inventory::SiteStore::add_site`].
#[derive(Debug, Clone)]
pub struct NewSite {
    /// Display name.
    pub name: String,
    /// Base URL.
    pub url: String,
    /// Scraper registry key.
    pub scraper_type: String,
}

/// A category row discovered by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct CategoryRecord {
    /// Row id.
    pub id: i64,
    /// Owning site.
    pub site_id: i64,
    /// Scraper-defined identifier, stable across scans.
    pub external_id: String,
    /// Display name.
    pub name: String,
    /// Listing URL, when the scraper has one.
    pub url: Option<String>,
    /// Parent category's external id.
    pub parent_external_id: Option<String>,
}

/// Input for [`crate::inventory::RemoteInventory::replace_categories`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCategory {
    /// Scraper-defined identifier.
    pub external_id: String,
    /// Display name.
    pub name: String,
    /// Listing URL.
    pub url: Option<String>,
    /// Parent category's external id.
    pub parent_external_id: Option<String>,
}

/// A file known to exist on a remote site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct RemoteFileRecord {
    /// Row id; stable across rescans while the URL stays listed.
    pub id: i64,
    /// Owning site.
    pub site_id: i64,
    /// Category row, when known.
    pub category_id: Option<i64>,
    /// Download URL; `(site_id, url)` is the identity.
    pub url: String,
    /// Display name.
    pub name: String,
    /// Size in bytes, when the scraper could tell.
    pub size: Option<i64>,
    /// Validator key (`pdf`, `epub`, ...).
    pub file_type: Option<String>,
    /// Last time a scan saw this file.
    pub last_checked_at: String,
}

impl RemoteFileRecord {
    /// Size as an unsigned byte count.
    #[must_use]
    pub fn size_bytes(&self) -> Option<u64> {
        self.size.and_then(|s| u64::try_from(s).ok())
    }
}

/// Input for [`crate::inventory::RemoteInventory::upsert_many`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRemoteFile {
    /// Category row id.
    pub category_id: Option<i64>,
    /// Download URL.
    pub url: String,
    /// Display name.
    pub name: String,
    /// Size in bytes.
    pub size: Option<i64>,
    /// Validator key.
    pub file_type: Option<String>,
}

/// Counts from a full-replace upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertSummary {
    /// New rows.
    pub added: usize,
    /// Existing rows whose name, size, type or category changed.
    pub updated: usize,
    /// Rows dropped because the new set no longer lists them.
    pub removed: usize,
}

/// A file in the local library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct LocalFileRecord {
    /// Row id.
    pub id: i64,
    /// Absolute path; unique.
    pub path: String,
    /// Size in bytes.
    pub size: i64,
    /// Validator key.
    pub file_type: Option<String>,
    /// Remote file this copy corresponds to.
    pub linked_remote_id: Option<i64>,
    /// Last time the scanner saw this file.
    pub last_checked_at: String,
}

impl LocalFileRecord {
    /// File name component of `path`.
    #[must_use]
    pub fn file_name(&self) -> &str {
        std::path::Path::new(&self.path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.path)
    }
}

/// Input for local upserts (keyed by path).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLocalFile {
    /// Absolute path.
    pub path: String,
    /// Size in bytes.
    pub size: i64,
    /// Validator key.
    pub file_type: Option<String>,
}

/// Status of a download history row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Created, not started.
    Pending,
    /// Transfer running.
    Downloading,
    /// File written and validated.
    Completed,
    /// Gave up; `error` says why.
    Failed,
    /// Cancelled by the operator.
    Cancelled,
}

impl DownloadStatus {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DownloadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "downloading" => Ok(Self::Downloading),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("invalid download status: {s}")),
        }
    }
}

/// One row of download history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct DownloadRecord {
    /// Row id.
    pub id: i64,
    /// Remote file downloaded; NULL once a rescan drops it.
    pub remote_file_id: Option<i64>,
    /// Resulting local file.
    pub local_file_id: Option<i64>,
    /// Status as stored (parsed via `status()`).
    #[sqlx(rename = "status")]
    #[serde(rename = "status")]
    pub status_str: String,
    /// Failure reason.
    pub error: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
    /// When the transfer started.
    pub started_at: Option<String>,
    /// When it reached a terminal state.
    pub completed_at: Option<String>,
}

impl DownloadRecord {
    /// Returns the parsed status enum.
    ///
    /// Falls back to `Pending` if the status string is invalid.
    #[must_use]
    pub fn status(&self) -> DownloadStatus {
        self.status_str.parse().unwrap_or(DownloadStatus::Pending)
    }
}
