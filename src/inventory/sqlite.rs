//! SQLite implementation of the inventory and history stores.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use sqlx::Row;
use tracing::{debug, instrument, warn};

use super::{
    CategoryRecord, DownloadHistory, DownloadRecord, DownloadStatus, LocalFileRecord,
    LocalInventory, NewCategory, NewLocalFile, NewRemoteFile, NewSite, RemoteFileRecord,
    RemoteInventory, Result, Site, SiteStore, StoreError, UpsertSummary,
};
use crate::db::Database;

/// Returns `Ok(())` if at least one row was affected; otherwise [`StoreError::NotFound`].
fn check_affected(entity: &'static str, id: i64, rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        Err(StoreError::not_found(entity, id))
    } else {
        Ok(())
    }
}

/// All four stores backed by one SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteInventory {
    db: Database,
}

impl SqliteInventory {
    /// Wraps an open, migrated database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// The underlying database.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    async fn set_history_status(
        &self,
        history_id: i64,
        status: DownloadStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE downloads
              SET status = ?,
                  error = ?,
                  completed_at = CASE WHEN ? THEN datetime('now') ELSE completed_at END
              WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(matches!(
            status,
            DownloadStatus::Failed | DownloadStatus::Cancelled
        ))
        .bind(history_id)
        .execute(self.db.pool())
        .await?;
        check_affected("download", history_id, result.rows_affected())
    }
}

#[async_trait]
impl SiteStore for SqliteInventory {
    #[instrument(skip(self, site), fields(name = %site.name, url = %site.url))]
    async fn add_site(&self, site: &NewSite) -> Result<i64> {
        let row = sqlx::query(
            r"INSERT INTO sites (name, url, scraper_type)
              VALUES (?, ?, ?)
              RETURNING id",
        )
        .bind(&site.name)
        .bind(&site.url)
        .bind(&site.scraper_type)
        .fetch_one(self.db.pool())
        .await?;
        Ok(row.get("id"))
    }

    async fn get_site(&self, id: i64) -> Result<Option<Site>> {
        let site = sqlx::query_as::<_, Site>("SELECT * FROM sites WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(site)
    }

    async fn list_sites(&self) -> Result<Vec<Site>> {
        let sites = sqlx::query_as::<_, Site>("SELECT * FROM sites ORDER BY id")
            .fetch_all(self.db.pool())
            .await?;
        Ok(sites)
    }

    #[instrument(skip(self))]
    async fn delete_site(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sites WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_last_scan(&self, id: i64) -> Result<()> {
        let result = sqlx::query("UPDATE sites SET last_scan_at = datetime('now') WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;
        check_affected("site", id, result.rows_affected())
    }
}

#[async_trait]
impl RemoteInventory for SqliteInventory {
    #[instrument(skip(self, categories), fields(count = categories.len()))]
    async fn replace_categories(
        &self,
        site_id: i64,
        categories: &[NewCategory],
    ) -> Result<HashMap<String, i64>> {
        let mut tx = self.db.pool().begin().await?;

        let existing: HashMap<String, i64> =
            sqlx::query("SELECT id, external_id FROM categories WHERE site_id = ?")
                .bind(site_id)
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .map(|row| (row.get::<String, _>("external_id"), row.get::<i64, _>("id")))
                .collect();

        let mut ids = HashMap::with_capacity(categories.len());
        for category in categories {
            if ids.contains_key(&category.external_id) {
                continue;
            }
            let id = if let Some(&id) = existing.get(&category.external_id) {
                sqlx::query(
                    r"UPDATE categories
                      SET name = ?, url = ?, parent_external_id = ?
                      WHERE id = ?",
                )
                .bind(&category.name)
                .bind(&category.url)
                .bind(&category.parent_external_id)
                .bind(id)
                .execute(&mut *tx)
                .await?;
                id
            } else {
                sqlx::query(
                    r"INSERT INTO categories (site_id, external_id, name, url, parent_external_id)
                      VALUES (?, ?, ?, ?, ?)
                      RETURNING id",
                )
                .bind(site_id)
                .bind(&category.external_id)
                .bind(&category.name)
                .bind(&category.url)
                .bind(&category.parent_external_id)
                .fetch_one(&mut *tx)
                .await?
                .get("id")
            };
            ids.insert(category.external_id.clone(), id);
        }

        for (external_id, id) in &existing {
            if !ids.contains_key(external_id) {
                sqlx::query("DELETE FROM categories WHERE id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(ids)
    }

    #[instrument(skip(self, files), fields(count = files.len()))]
    async fn upsert_many(&self, site_id: i64, files: &[NewRemoteFile]) -> Result<UpsertSummary> {
        let mut tx = self.db.pool().begin().await?;

        let existing: HashMap<String, RemoteFileRecord> =
            sqlx::query_as::<_, RemoteFileRecord>("SELECT * FROM remote_files WHERE site_id = ?")
                .bind(site_id)
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .map(|record| (record.url.clone(), record))
                .collect();

        let mut summary = UpsertSummary::default();
        let mut seen: HashSet<&str> = HashSet::with_capacity(files.len());
        for file in files {
            if !seen.insert(file.url.as_str()) {
                continue;
            }
            if let Some(current) = existing.get(&file.url) {
                let changed = current.name != file.name
                    || current.size != file.size
                    || current.file_type != file.file_type
                    || current.category_id != file.category_id;
                sqlx::query(
                    r"UPDATE remote_files
                      SET category_id = ?, name = ?, size = ?, file_type = ?,
                          last_checked_at = datetime('now')
                      WHERE id = ?",
                )
                .bind(file.category_id)
                .bind(&file.name)
                .bind(file.size)
                .bind(&file.file_type)
                .bind(current.id)
                .execute(&mut *tx)
                .await?;
                if changed {
                    summary.updated += 1;
                }
            } else {
                sqlx::query(
                    r"INSERT INTO remote_files (site_id, category_id, url, name, size, file_type)
                      VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(site_id)
                .bind(file.category_id)
                .bind(&file.url)
                .bind(&file.name)
                .bind(file.size)
                .bind(&file.file_type)
                .execute(&mut *tx)
                .await?;
                summary.added += 1;
            }
        }

        for (url, record) in &existing {
            if !seen.contains(url.as_str()) {
                sqlx::query("DELETE FROM remote_files WHERE id = ?")
                    .bind(record.id)
                    .execute(&mut *tx)
                    .await?;
                summary.removed += 1;
            }
        }

        tx.commit().await?;
        debug!(
            added = summary.added,
            updated = summary.updated,
            removed = summary.removed,
            "remote inventory replaced"
        );
        Ok(summary)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<RemoteFileRecord>> {
        let record = sqlx::query_as::<_, RemoteFileRecord>("SELECT * FROM remote_files WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(record)
    }

    async fn list_by_site(&self, site_id: i64) -> Result<Vec<RemoteFileRecord>> {
        let records = sqlx::query_as::<_, RemoteFileRecord>(
            "SELECT * FROM remote_files WHERE site_id = ? ORDER BY id",
        )
        .bind(site_id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(records)
    }

    async fn list_by_category(&self, category_id: i64) -> Result<Vec<RemoteFileRecord>> {
        let records = sqlx::query_as::<_, RemoteFileRecord>(
            "SELECT * FROM remote_files WHERE category_id = ? ORDER BY id",
        )
        .bind(category_id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(records)
    }

    async fn list_all(&self) -> Result<Vec<RemoteFileRecord>> {
        let records = sqlx::query_as::<_, RemoteFileRecord>("SELECT * FROM remote_files ORDER BY id")
            .fetch_all(self.db.pool())
            .await?;
        Ok(records)
    }

    async fn list_categories(&self, site_id: i64) -> Result<Vec<CategoryRecord>> {
        let records = sqlx::query_as::<_, CategoryRecord>(
            "SELECT * FROM categories WHERE site_id = ? ORDER BY id",
        )
        .bind(site_id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(records)
    }
}

#[async_trait]
impl LocalInventory for SqliteInventory {
    async fn get_local(&self, id: i64) -> Result<Option<LocalFileRecord>> {
        let record = sqlx::query_as::<_, LocalFileRecord>("SELECT * FROM local_files WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(record)
    }

    async fn get_by_remote_id(&self, remote_id: i64) -> Result<Option<LocalFileRecord>> {
        let record = sqlx::query_as::<_, LocalFileRecord>(
            "SELECT * FROM local_files WHERE linked_remote_id = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(remote_id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(record)
    }

    async fn upsert_local(&self, file: &NewLocalFile) -> Result<i64> {
        let row = sqlx::query(
            r"INSERT INTO local_files (path, size, file_type, last_checked_at)
              VALUES (?, ?, ?, datetime('now'))
              ON CONFLICT(path) DO UPDATE SET
                  size = excluded.size,
                  file_type = excluded.file_type,
                  last_checked_at = excluded.last_checked_at
              RETURNING id",
        )
        .bind(&file.path)
        .bind(file.size)
        .bind(&file.file_type)
        .fetch_one(self.db.pool())
        .await?;
        Ok(row.get("id"))
    }

    async fn list_local(&self) -> Result<Vec<LocalFileRecord>> {
        let records = sqlx::query_as::<_, LocalFileRecord>("SELECT * FROM local_files ORDER BY id")
            .fetch_all(self.db.pool())
            .await?;
        Ok(records)
    }

    #[instrument(skip(self))]
    async fn link(&self, local_id: i64, remote_id: i64) -> Result<()> {
        if RemoteInventory::get_by_id(self, remote_id).await?.is_none() {
            return Err(StoreError::not_found("remote file", remote_id));
        }
        let result = sqlx::query("UPDATE local_files SET linked_remote_id = ? WHERE id = ?")
            .bind(remote_id)
            .bind(local_id)
            .execute(self.db.pool())
            .await?;
        check_affected("local file", local_id, result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn unlink(&self, local_id: i64) -> Result<()> {
        let result = sqlx::query("UPDATE local_files SET linked_remote_id = NULL WHERE id = ?")
            .bind(local_id)
            .execute(self.db.pool())
            .await?;
        check_affected("local file", local_id, result.rows_affected())
    }

    #[instrument(skip(self, existing_paths), fields(root = %root.display(), existing = existing_paths.len()))]
    async fn delete_missing(&self, root: &Path, existing_paths: &[String]) -> Result<usize> {
        let keep: HashSet<&str> = existing_paths.iter().map(String::as_str).collect();
        let stale: Vec<i64> = self
            .list_local()
            .await?
            .into_iter()
            .filter(|record| Path::new(&record.path).starts_with(root))
            .filter(|record| !keep.contains(record.path.as_str()))
            .map(|record| record.id)
            .collect();

        for id in &stale {
            sqlx::query("DELETE FROM local_files WHERE id = ?")
                .bind(id)
                .execute(self.db.pool())
                .await?;
        }
        Ok(stale.len())
    }
}

#[async_trait]
impl DownloadHistory for SqliteInventory {
    async fn create(&self, remote_file_id: i64) -> Result<i64> {
        let row = sqlx::query(
            r"INSERT INTO downloads (remote_file_id, status)
              VALUES ((SELECT id FROM remote_files WHERE id = ?), ?)
              RETURNING id",
        )
        .bind(remote_file_id)
        .bind(DownloadStatus::Pending.as_str())
        .fetch_one(self.db.pool())
        .await?;
        Ok(row.get("id"))
    }

    async fn mark_started(&self, history_id: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE downloads SET status = ?, started_at = datetime('now') WHERE id = ?",
        )
        .bind(DownloadStatus::Downloading.as_str())
        .bind(history_id)
        .execute(self.db.pool())
        .await?;
        check_affected("download", history_id, result.rows_affected())
    }

    #[instrument(skip(self, local_file), fields(path = %local_file.path))]
    async fn mark_completed(&self, history_id: i64, local_file: &NewLocalFile) -> Result<i64> {
        let mut tx = self.db.pool().begin().await?;

        let remote_file_id: Option<i64> = sqlx::query_scalar(
            r"SELECT d.remote_file_id
              FROM downloads d
              WHERE d.id = ?",
        )
        .bind(history_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::not_found("download", history_id))?;

        let local_id: i64 = sqlx::query(
            r"INSERT INTO local_files (path, size, file_type, last_checked_at)
              VALUES (?, ?, ?, datetime('now'))
              ON CONFLICT(path) DO UPDATE SET
                  size = excluded.size,
                  file_type = excluded.file_type,
                  last_checked_at = excluded.last_checked_at
              RETURNING id",
        )
        .bind(&local_file.path)
        .bind(local_file.size)
        .bind(&local_file.file_type)
        .fetch_one(&mut *tx)
        .await?
        .get("id");

        // remote_file_id is NULLed by the foreign key when a rescan dropped the row.
        if let Some(remote_id) = remote_file_id {
            // The fresh download replaces any older copy as the remote file's local file.
            let released = sqlx::query(
                "UPDATE local_files SET linked_remote_id = NULL WHERE linked_remote_id = ? AND id != ?",
            )
            .bind(remote_id)
            .bind(local_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if released > 0 {
                debug!(remote_id, released, "older local copies unlinked");
            }
            sqlx::query("UPDATE local_files SET linked_remote_id = ? WHERE id = ?")
                .bind(remote_id)
                .bind(local_id)
                .execute(&mut *tx)
                .await?;
        } else {
            warn!(history_id, "remote file gone; local file stored unlinked");
        }

        sqlx::query(
            r"UPDATE downloads
              SET status = ?, local_file_id = ?, error = NULL, completed_at = datetime('now')
              WHERE id = ?",
        )
        .bind(DownloadStatus::Completed.as_str())
        .bind(local_id)
        .bind(history_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(local_id)
    }

    async fn mark_failed(&self, history_id: i64, error: &str) -> Result<()> {
        self.set_history_status(history_id, DownloadStatus::Failed, Some(error))
            .await
    }

    async fn mark_cancelled(&self, history_id: i64) -> Result<()> {
        self.set_history_status(history_id, DownloadStatus::Cancelled, None)
            .await
    }

    async fn recent(&self, limit: i64) -> Result<Vec<DownloadRecord>> {
        let records =
            sqlx::query_as::<_, DownloadRecord>("SELECT * FROM downloads ORDER BY id DESC LIMIT ?")
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?;
        Ok(records)
    }

    async fn count_by_status(&self) -> Result<BTreeMap<DownloadStatus, i64>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM downloads GROUP BY status")
            .fetch_all(self.db.pool())
            .await?;
        let mut counts = BTreeMap::new();
        for row in rows {
            let status: String = row.get("status");
            if let Ok(status) = status.parse::<DownloadStatus>() {
                counts.insert(status, row.get::<i64, _>("n"));
            }
        }
        Ok(counts)
    }
}
