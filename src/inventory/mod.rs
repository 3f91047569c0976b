//! Persistent inventory of sites, remote files, local files and download history.
//!
//! The scanner, comparison engine and orchestrator depend only on the store
//! traits defined here:
//! - [`SiteStore`] - sites and their last-scan timestamps
//! - [`RemoteInventory`] - categories and files discovered by scrapers
//! - [`LocalInventory`] - files in the local library and their remote links
//! - [`DownloadHistory`] - one row per transfer, written by the orchestrator
//!
//! [`SqliteInventory`] implements all four on top of [`crate::Database`].
//! [`LocalScanner`] keeps the local inventory in sync with a directory tree.

mod error;
mod local_scan;
mod records;
mod sqlite;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use async_trait::async_trait;

pub use error::{StoreDbErrorKind, StoreError};
pub use local_scan::{LocalScanError, LocalScanStats, LocalScanner};
pub use records::{
    CategoryRecord, DownloadRecord, DownloadStatus, LocalFileRecord, NewCategory, NewLocalFile,
    NewRemoteFile, NewSite, RemoteFileRecord, Site, UpsertSummary,
};
pub use sqlite::SqliteInventory;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Default row count for [`DownloadHistory::recent`].
pub const DEFAULT_HISTORY_LIMIT: i64 = 100;

/// Sites and their scan bookkeeping.
#[async_trait]
pub trait SiteStore: Send + Sync {
    /// Inserts a site and returns its id.
    async fn add_site(&self, site: &NewSite) -> Result<i64>;

    /// Looks up one site.
    async fn get_site(&self, id: i64) -> Result<Option<Site>>;

    /// All sites, oldest first.
    async fn list_sites(&self) -> Result<Vec<Site>>;

    /// Deletes a site with its categories and remote files. Returns false if absent.
    async fn delete_site(&self, id: i64) -> Result<bool>;

    /// Stamps the site's last successful scan with the current time.
    async fn update_last_scan(&self, id: i64) -> Result<()>;
}

/// Categories and files discovered on remote sites.
#[async_trait]
pub trait RemoteInventory: Send + Sync {
    /// Replaces the site's categories with `categories`, keyed by external id.
    ///
    /// Returns the external-id to row-id map for the new set.
    async fn replace_categories(
        &self,
        site_id: i64,
        categories: &[NewCategory],
    ) -> Result<HashMap<String, i64>>;

    /// Replaces the site's files with `files`, keyed by URL.
    ///
    /// Matching rows keep their id; rows missing from `files` are deleted.
    async fn upsert_many(&self, site_id: i64, files: &[NewRemoteFile]) -> Result<UpsertSummary>;

    /// Looks up one remote file.
    async fn get_by_id(&self, id: i64) -> Result<Option<RemoteFileRecord>>;

    /// Files of one site, ordered by id.
    async fn list_by_site(&self, site_id: i64) -> Result<Vec<RemoteFileRecord>>;

    /// Files of one category, ordered by id.
    async fn list_by_category(&self, category_id: i64) -> Result<Vec<RemoteFileRecord>>;

    /// Every remote file, ordered by id.
    async fn list_all(&self) -> Result<Vec<RemoteFileRecord>>;

    /// Categories of one site.
    async fn list_categories(&self, site_id: i64) -> Result<Vec<CategoryRecord>>;
}

/// Files in the local library.
#[async_trait]
pub trait LocalInventory: Send + Sync {
    /// Looks up one local file.
    async fn get_local(&self, id: i64) -> Result<Option<LocalFileRecord>>;

    /// The local file linked to `remote_id` (lowest id when several are).
    async fn get_by_remote_id(&self, remote_id: i64) -> Result<Option<LocalFileRecord>>;

    /// Inserts or refreshes the row for `file.path`; an existing link is kept.
    async fn upsert_local(&self, file: &NewLocalFile) -> Result<i64>;

    /// Every local file, ordered by id.
    async fn list_local(&self) -> Result<Vec<LocalFileRecord>>;

    /// Links a local file to a remote file.
    async fn link(&self, local_id: i64, remote_id: i64) -> Result<()>;

    /// Clears a local file's link.
    async fn unlink(&self, local_id: i64) -> Result<()>;

    /// Deletes rows under `root` whose path is not in `existing_paths`.
    ///
    /// Returns the number of rows removed.
    async fn delete_missing(&self, root: &Path, existing_paths: &[String]) -> Result<usize>;
}

/// Per-transfer history written by the orchestrator.
#[async_trait]
pub trait DownloadHistory: Send + Sync {
    /// Creates a pending row for `remote_file_id` and returns its id.
    ///
    /// A remote id that no longer exists is recorded as NULL.
    async fn create(&self, remote_file_id: i64) -> Result<i64>;

    /// Marks the row downloading.
    async fn mark_started(&self, history_id: i64) -> Result<()>;

    /// Records the written file in the local inventory and marks the row completed.
    ///
    /// The local file is linked to the row's remote file when that still exists;
    /// otherwise it is stored unlinked. Returns the local file id.
    async fn mark_completed(&self, history_id: i64, local_file: &NewLocalFile) -> Result<i64>;

    /// Marks the row failed with a reason.
    async fn mark_failed(&self, history_id: i64, error: &str) -> Result<()>;

    /// Marks the row cancelled.
    async fn mark_cancelled(&self, history_id: i64) -> Result<()>;

    /// The most recent `limit` rows, newest first.
    async fn recent(&self, limit: i64) -> Result<Vec<DownloadRecord>>;

    /// Row counts per status.
    async fn count_by_status(&self) -> Result<BTreeMap<DownloadStatus, i64>>;
}
