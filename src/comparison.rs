//! Remote vs local inventory diff and download-queue construction.
//!
//! [`compare_files`] partitions remote files into four buckets by looking
//! each one up in the local inventory through its link:
//!
//! | Local record             | Size vs remote | Validator | Bucket      |
//! |--------------------------|----------------|-----------|-------------|
//! | none                     | -              | -         | `new`       |
//! | linked                   | differs        | -         | `updated`   |
//! | linked                   | same / unknown | invalid   | `corrupted` |
//! | linked                   | same / unknown | valid     | `ok`        |
//!
//! A remote file whose size is unknown never counts as updated. Every remote
//! file lands in exactly one bucket. Unlinked local files whose name and size
//! match a `new` remote file are reported as proposed links; nothing is linked
//! until [`FileComparisonEngine::apply_links`] is called.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::download::filename::{extension_from_url, extension_of};
use crate::inventory::{
    LocalFileRecord, LocalInventory, RemoteFileRecord, RemoteInventory, SiteStore, StoreError,
};
use crate::orchestrator::JobSpec;
use crate::validator::FileValidator;

/// Errors from comparison runs.
#[derive(Debug, Error)]
pub enum ComparisonError {
    /// Inventory read or write failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The blocking validation task died.
    #[error("validation task failed: {0}")]
    Join(String),
}

/// A remote file and the local file linked to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilePair {
    /// Remote side.
    pub remote: RemoteFileRecord,
    /// Local side.
    pub local: LocalFileRecord,
}

/// A linked local file that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorruptedFile {
    /// Remote side.
    pub remote: RemoteFileRecord,
    /// Local side.
    pub local: LocalFileRecord,
    /// Validator's reason.
    pub reason: String,
}

/// Unlinked local file that looks like a copy of a remote file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProposedLink {
    /// Local file id.
    pub local_id: i64,
    /// Remote file id.
    pub remote_id: i64,
}

/// Partition of remote files by local state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ComparisonResult {
    /// No linked local file.
    pub new_files: Vec<RemoteFileRecord>,
    /// Linked local file with a different size.
    pub updated_files: Vec<FilePair>,
    /// Linked local file that failed validation.
    pub corrupted_files: Vec<CorruptedFile>,
    /// Linked local file that is current and valid.
    pub ok_files: Vec<FilePair>,
    /// Suggested links for `new_files` entries.
    pub proposed_links: Vec<ProposedLink>,
}

/// Which buckets to turn into download jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSelection {
    /// Files never downloaded.
    pub include_new: bool,
    /// Files whose remote size changed.
    pub include_updated: bool,
    /// Files whose local copy failed validation.
    pub include_corrupted: bool,
}

impl Default for QueueSelection {
    fn default() -> Self {
        Self {
            include_new: true,
            include_updated: true,
            include_corrupted: true,
        }
    }
}

/// Per-bucket counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ComparisonSummary {
    /// `new_files.len()`.
    pub new: usize,
    /// `updated_files.len()`.
    pub updated: usize,
    /// `corrupted_files.len()`.
    pub corrupted: usize,
    /// `ok_files.len()`.
    pub ok: usize,
    /// `proposed_links.len()`.
    pub proposed_links: usize,
}

impl ComparisonResult {
    /// Bucket sizes.
    #[must_use]
    pub fn summary(&self) -> ComparisonSummary {
        ComparisonSummary {
            new: self.new_files.len(),
            updated: self.updated_files.len(),
            corrupted: self.corrupted_files.len(),
            ok: self.ok_files.len(),
            proposed_links: self.proposed_links.len(),
        }
    }

    /// Total remote files partitioned.
    #[must_use]
    pub fn total(&self) -> usize {
        self.new_files.len()
            + self.updated_files.len()
            + self.corrupted_files.len()
            + self.ok_files.len()
    }

    /// Flattens the selected buckets into job specs: new, then updated, then
    /// corrupted.
    ///
    /// `categories` maps category row ids to the names used as download
    /// subdirectories.
    #[must_use]
    pub fn build_download_queue(
        &self,
        selection: QueueSelection,
        categories: &HashMap<i64, String>,
    ) -> Vec<JobSpec> {
        let mut selected: Vec<&RemoteFileRecord> = Vec::new();
        if selection.include_new {
            selected.extend(&self.new_files);
        }
        if selection.include_updated {
            selected.extend(self.updated_files.iter().map(|pair| &pair.remote));
        }
        if selection.include_corrupted {
            selected.extend(self.corrupted_files.iter().map(|file| &file.remote));
        }
        selected
            .into_iter()
            .map(|remote| job_spec_for(remote, categories))
            .collect()
    }
}

/// Job spec downloading `remote` under its category's directory.
#[must_use]
pub fn job_spec_for(remote: &RemoteFileRecord, categories: &HashMap<i64, String>) -> JobSpec {
    JobSpec {
        remote_file_id: remote.id,
        url: remote.url.clone(),
        display_name: download_name(remote),
        size_hint: remote.size_bytes(),
        file_type: remote.file_type.clone(),
        category: remote
            .category_id
            .and_then(|id| categories.get(&id).cloned()),
    }
}

/// File name a download of `remote` is saved under. Link texts often lack an
/// extension, so the URL's is appended when missing.
#[must_use]
pub fn download_name(remote: &RemoteFileRecord) -> String {
    let name = remote.name.trim();
    match extension_from_url(&remote.url) {
        Some(ext) if extension_of(name).as_deref() != Some(ext.as_str()) => format!("{name}{ext}"),
        _ => name.to_string(),
    }
}

/// Partitions `remote` against `local`.
///
/// Validation reads files, so call this off the async runtime for large
/// inventories.
#[must_use]
pub fn compare_files(
    remote: &[RemoteFileRecord],
    local: &[LocalFileRecord],
    validator: &FileValidator,
) -> ComparisonResult {
    let mut linked: HashMap<i64, &LocalFileRecord> = HashMap::new();
    let mut unlinked: Vec<&LocalFileRecord> = Vec::new();
    for file in local {
        match file.linked_remote_id {
            Some(remote_id) => {
                linked
                    .entry(remote_id)
                    .and_modify(|existing| {
                        if file.id > existing.id {
                            *existing = file;
                        }
                    })
                    .or_insert(file);
            }
            None => unlinked.push(file),
        }
    }

    let mut result = ComparisonResult::default();
    for remote_file in remote {
        let Some(local_file) = linked.get(&remote_file.id) else {
            result.new_files.push(remote_file.clone());
            continue;
        };
        let pair = FilePair {
            remote: remote_file.clone(),
            local: (*local_file).clone(),
        };
        if remote_file.size.is_some_and(|size| size != local_file.size) {
            result.updated_files.push(pair);
            continue;
        }
        let outcome = validator.validate(
            std::path::Path::new(&local_file.path),
            local_file.file_type.as_deref(),
        );
        if outcome.valid {
            result.ok_files.push(pair);
        } else {
            debug!(path = %local_file.path, reason = outcome.reason(), "local file failed validation");
            result.corrupted_files.push(CorruptedFile {
                reason: outcome.reason().to_string(),
                remote: pair.remote,
                local: pair.local,
            });
        }
    }

    result.proposed_links = propose_links(&result.new_files, &unlinked);
    result
}

fn propose_links(new_files: &[RemoteFileRecord], unlinked: &[&LocalFileRecord]) -> Vec<ProposedLink> {
    let mut claimed: HashSet<i64> = HashSet::new();
    let mut proposals = Vec::new();
    for remote in new_files {
        let name = download_name(remote);
        let candidate = unlinked.iter().find(|local| {
            !claimed.contains(&local.id)
                && (local.file_name() == name || local.file_name() == remote.name.trim())
                && remote.size.is_none_or(|size| size == local.size)
        });
        if let Some(local) = candidate {
            claimed.insert(local.id);
            proposals.push(ProposedLink {
                local_id: local.id,
                remote_id: remote.id,
            });
        }
    }
    proposals
}

/// Runs comparisons against the inventory stores.
pub struct FileComparisonEngine {
    sites: Arc<dyn SiteStore>,
    remote: Arc<dyn RemoteInventory>,
    local: Arc<dyn LocalInventory>,
    validator: Arc<FileValidator>,
}

impl FileComparisonEngine {
    /// Creates an engine over the given stores.
    #[must_use]
    pub fn new(
        sites: Arc<dyn SiteStore>,
        remote: Arc<dyn RemoteInventory>,
        local: Arc<dyn LocalInventory>,
        validator: Arc<FileValidator>,
    ) -> Self {
        Self {
            sites,
            remote,
            local,
            validator,
        }
    }

    /// Compares one site's remote files, or every site's when `site_id` is `None`.
    ///
    /// # Errors
    ///
    /// [`ComparisonError`] if a store read fails.
    #[instrument(skip(self))]
    pub async fn compare(&self, site_id: Option<i64>) -> Result<ComparisonResult, ComparisonError> {
        let remote = match site_id {
            Some(site_id) => self.remote.list_by_site(site_id).await?,
            None => self.remote.list_all().await?,
        };
        let local = self.local.list_local().await?;
        let validator = Arc::clone(&self.validator);

        let result = tokio::task::spawn_blocking(move || compare_files(&remote, &local, &validator))
            .await
            .map_err(|e| ComparisonError::Join(e.to_string()))?;

        let summary = result.summary();
        info!(
            new = summary.new,
            updated = summary.updated,
            corrupted = summary.corrupted,
            ok = summary.ok,
            proposed_links = summary.proposed_links,
            "comparison complete"
        );
        Ok(result)
    }

    /// Compares every site separately, keyed by site id.
    ///
    /// # Errors
    ///
    /// [`ComparisonError`] if a store read fails.
    pub async fn compare_by_site(&self) -> Result<Vec<(i64, ComparisonResult)>, ComparisonError> {
        let mut results = Vec::new();
        for site in self.sites.list_sites().await? {
            results.push((site.id, self.compare(Some(site.id)).await?));
        }
        Ok(results)
    }

    /// Compares and flattens the selected buckets into job specs.
    ///
    /// # Errors
    ///
    /// [`ComparisonError`] if a store read fails.
    pub async fn build_download_queue(
        &self,
        site_id: Option<i64>,
        selection: QueueSelection,
    ) -> Result<Vec<JobSpec>, ComparisonError> {
        let result = self.compare(site_id).await?;
        let categories = self.category_names(&result).await?;
        let specs = result.build_download_queue(selection, &categories);
        info!(jobs = specs.len(), "download queue built");
        Ok(specs)
    }

    async fn category_names(
        &self,
        result: &ComparisonResult,
    ) -> Result<HashMap<i64, String>, ComparisonError> {
        let site_ids: HashSet<i64> = result
            .new_files
            .iter()
            .chain(result.updated_files.iter().map(|pair| &pair.remote))
            .chain(result.corrupted_files.iter().map(|file| &file.remote))
            .map(|remote| remote.site_id)
            .collect();
        let mut names = HashMap::new();
        for site_id in site_ids {
            for category in self.remote.list_categories(site_id).await? {
                names.insert(category.id, category.name);
            }
        }
        Ok(names)
    }

    /// Links a local file to a remote file.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if either row is missing.
    pub async fn link(&self, local_id: i64, remote_id: i64) -> Result<(), ComparisonError> {
        if self.local.get_local(local_id).await?.is_none() {
            return Err(StoreError::not_found("local file", local_id).into());
        }
        self.local.link(local_id, remote_id).await?;
        info!(local_id, remote_id, "linked local file");
        Ok(())
    }

    /// Removes a local file's remote link.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the local file is missing.
    pub async fn unlink(&self, local_id: i64) -> Result<(), ComparisonError> {
        self.local.unlink(local_id).await?;
        info!(local_id, "unlinked local file");
        Ok(())
    }

    /// Applies every proposed link in `result`. Returns how many were linked.
    ///
    /// # Errors
    ///
    /// [`ComparisonError`] on the first failing link.
    pub async fn apply_links(&self, result: &ComparisonResult) -> Result<usize, ComparisonError> {
        for proposal in &result.proposed_links {
            self.local.link(proposal.local_id, proposal.remote_id).await?;
        }
        Ok(result.proposed_links.len())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::Database;
    use crate::inventory::{NewLocalFile, NewRemoteFile, NewSite, SqliteInventory};
    use std::path::Path;
    use tempfile::TempDir;

    fn remote(id: i64, name: &str, size: Option<i64>) -> RemoteFileRecord {
        RemoteFileRecord {
            id,
            site_id: 1,
            category_id: None,
            url: format!("https://example.com/files/{name}"),
            name: name.to_string(),
            size,
            file_type: Some("text".to_string()),
            last_checked_at: "2026-01-01 00:00:00".to_string(),
        }
    }

    fn local(id: i64, path: &Path, linked: Option<i64>) -> LocalFileRecord {
        let size = std::fs::metadata(path).map_or(0, |m| i64::try_from(m.len()).unwrap());
        LocalFileRecord {
            id,
            path: path.to_string_lossy().into_owned(),
            size,
            file_type: Some("text".to_string()),
            linked_remote_id: linked,
            last_checked_at: "2026-01-01 00:00:00".to_string(),
        }
    }

    fn write(dir: &TempDir, name: &str, contents: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    // ==================== Partition Tests ====================

    #[test]
    fn test_new_then_ok_after_download() {
        let dir = TempDir::new().unwrap();
        let validator = FileValidator::default();
        let remote_files = vec![remote(7, "report.txt", Some(1024))];

        let before = compare_files(&remote_files, &[], &validator);
        assert_eq!(before.new_files.len(), 1);
        assert_eq!(before.new_files[0].id, 7);
        assert_eq!(before.total(), 1);

        let path = write(&dir, "report.txt", &[b'a'; 1024]);
        let after = compare_files(&remote_files, &[local(1, &path, Some(7))], &validator);
        assert!(after.new_files.is_empty());
        assert_eq!(after.ok_files.len(), 1);
        assert_eq!(after.ok_files[0].local.size, 1024);
    }

    #[test]
    fn test_partition_covers_every_bucket_once() {
        let dir = TempDir::new().unwrap();
        let validator = FileValidator::default();
        let good = write(&dir, "good.txt", b"hello\n");
        let changed = write(&dir, "changed.txt", b"old body\n");
        let empty = write(&dir, "empty.txt", b"");

        let remote_files = vec![
            remote(1, "missing.txt", Some(10)),
            remote(2, "good.txt", Some(6)),
            remote(3, "changed.txt", Some(999)),
            remote(4, "empty.txt", Some(0)),
            remote(5, "unknown-size.txt", None),
        ];
        let unknown = write(&dir, "unknown-size.txt", b"any size\n");
        let local_files = vec![
            local(10, &good, Some(2)),
            local(11, &changed, Some(3)),
            local(12, &empty, Some(4)),
            local(13, &unknown, Some(5)),
        ];

        let result = compare_files(&remote_files, &local_files, &validator);
        let new: Vec<i64> = result.new_files.iter().map(|r| r.id).collect();
        let updated: Vec<i64> = result.updated_files.iter().map(|p| p.remote.id).collect();
        let corrupted: Vec<i64> = result.corrupted_files.iter().map(|c| c.remote.id).collect();
        let ok: Vec<i64> = result.ok_files.iter().map(|p| p.remote.id).collect();
        assert_eq!(new, vec![1]);
        assert_eq!(updated, vec![3]);
        assert_eq!(corrupted, vec![4]);
        assert_eq!(ok, vec![2, 5]);
        assert_eq!(result.total(), remote_files.len());
        assert!(!result.corrupted_files[0].reason.is_empty());
    }

    #[test]
    fn test_deleted_local_file_is_corrupted() {
        let validator = FileValidator::default();
        let gone = LocalFileRecord {
            id: 1,
            path: "/nonexistent/docsync/a.txt".to_string(),
            size: 5,
            file_type: Some("text".to_string()),
            linked_remote_id: Some(1),
            last_checked_at: String::new(),
        };
        let result = compare_files(&[remote(1, "a.txt", Some(5))], &[gone], &validator);
        assert_eq!(result.corrupted_files.len(), 1);
    }

    #[test]
    fn test_newest_link_wins_when_several_locals_share_a_remote() {
        let dir = TempDir::new().unwrap();
        let validator = FileValidator::default();
        let stale = write(&dir, "stale.txt", b"");
        let fresh = write(&dir, "fresh.txt", b"fresh body\n");
        let local_files = vec![local(4, &stale, Some(1)), local(9, &fresh, Some(1))];

        let result = compare_files(&[remote(1, "fresh.txt", None)], &local_files, &validator);
        assert!(result.corrupted_files.is_empty());
        assert_eq!(result.ok_files.len(), 1);
        assert_eq!(result.ok_files[0].local.id, 9);
    }

    #[test]
    fn test_proposed_links_match_name_and_size() {
        let dir = TempDir::new().unwrap();
        let validator = FileValidator::default();
        let copy = write(&dir, "guide.txt", b"0123456789");
        let other = write(&dir, "notes.txt", b"abc");

        let remote_files = vec![remote(1, "guide.txt", Some(10)), remote(2, "notes.txt", Some(99))];
        let local_files = vec![local(5, &copy, None), local(6, &other, None)];
        let result = compare_files(&remote_files, &local_files, &validator);

        assert_eq!(result.new_files.len(), 2);
        assert_eq!(
            result.proposed_links,
            vec![ProposedLink {
                local_id: 5,
                remote_id: 1
            }]
        );
    }

    // ==================== Queue Tests ====================

    #[test]
    fn test_build_download_queue_respects_selection() {
        let dir = TempDir::new().unwrap();
        let validator = FileValidator::default();
        let changed = write(&dir, "changed.txt", b"x");
        let empty = write(&dir, "empty.txt", b"");
        let mut with_category = remote(1, "Annual Report", Some(10));
        with_category.url = "https://example.com/files/annual.pdf".to_string();
        with_category.file_type = Some("pdf".to_string());
        with_category.category_id = Some(40);

        let remote_files = vec![
            with_category,
            remote(2, "changed.txt", Some(50)),
            remote(3, "empty.txt", Some(0)),
        ];
        let local_files = vec![local(8, &changed, Some(2)), local(9, &empty, Some(3))];
        let result = compare_files(&remote_files, &local_files, &validator);
        let categories = HashMap::from([(40, "reports".to_string())]);

        let all = result.build_download_queue(QueueSelection::default(), &categories);
        let ids: Vec<i64> = all.iter().map(|spec| spec.remote_file_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(all[0].display_name, "Annual Report.pdf");
        assert_eq!(all[0].category.as_deref(), Some("reports"));
        assert_eq!(all[0].size_hint, Some(10));

        let only_corrupted = result.build_download_queue(
            QueueSelection {
                include_new: false,
                include_updated: false,
                include_corrupted: true,
            },
            &categories,
        );
        assert_eq!(only_corrupted.len(), 1);
        assert_eq!(only_corrupted[0].remote_file_id, 3);
    }

    #[test]
    fn test_download_name_keeps_existing_extension() {
        assert_eq!(download_name(&remote(1, "a.txt", None)), "a.txt");
        let mut upper = remote(2, "B.TXT", None);
        upper.url = "https://example.com/B.TXT".to_string();
        assert_eq!(download_name(&upper), "B.TXT");
    }

    // ==================== Engine Tests ====================

    async fn engine_with_store() -> (FileComparisonEngine, Arc<SqliteInventory>, i64) {
        let db = Database::new_in_memory().await.unwrap();
        let store = Arc::new(SqliteInventory::new(db));
        let site_id = store
            .add_site(&NewSite {
                name: "Docs".to_string(),
                url: "https://example.com/".to_string(),
                scraper_type: "generic".to_string(),
            })
            .await
            .unwrap();
        let engine = FileComparisonEngine::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(FileValidator::default()),
        );
        (engine, store, site_id)
    }

    #[tokio::test]
    async fn test_engine_compare_and_link() {
        let dir = TempDir::new().unwrap();
        let (engine, store, site_id) = engine_with_store().await;
        store
            .upsert_many(
                site_id,
                &[NewRemoteFile {
                    category_id: None,
                    url: "https://example.com/a.txt".to_string(),
                    name: "a.txt".to_string(),
                    size: Some(6),
                    file_type: Some("text".to_string()),
                }],
            )
            .await
            .unwrap();
        let remote_id = store.list_by_site(site_id).await.unwrap()[0].id;
        let path = write(&dir, "a.txt", b"hello\n");
        let local_id = store
            .upsert_local(&NewLocalFile {
                path: path.to_string_lossy().into_owned(),
                size: 6,
                file_type: Some("text".to_string()),
            })
            .await
            .unwrap();

        let first = engine.compare(Some(site_id)).await.unwrap();
        assert_eq!(first.summary().new, 1);
        assert_eq!(first.proposed_links.len(), 1);

        assert_eq!(engine.apply_links(&first).await.unwrap(), 1);
        let second = engine.compare(None).await.unwrap();
        assert_eq!(second.summary().ok, 1);

        engine.unlink(local_id).await.unwrap();
        assert_eq!(engine.compare(None).await.unwrap().summary().new, 1);

        engine.link(local_id, remote_id).await.unwrap();
        assert!(engine.link(999, remote_id).await.is_err());
        assert!(engine.link(local_id, 999).await.is_err());

        let by_site = engine.compare_by_site().await.unwrap();
        assert_eq!(by_site.len(), 1);
        assert_eq!(by_site[0].0, site_id);
    }

    #[tokio::test]
    async fn test_engine_build_queue_uses_category_names() {
        let (engine, store, site_id) = engine_with_store().await;
        let categories = store
            .replace_categories(
                site_id,
                &[crate::inventory::NewCategory {
                    external_id: "default".to_string(),
                    name: "Manuals".to_string(),
                    url: None,
                    parent_external_id: None,
                }],
            )
            .await
            .unwrap();
        store
            .upsert_many(
                site_id,
                &[NewRemoteFile {
                    category_id: categories.get("default").copied(),
                    url: "https://example.com/m.pdf".to_string(),
                    name: "m.pdf".to_string(),
                    size: None,
                    file_type: Some("pdf".to_string()),
                }],
            )
            .await
            .unwrap();

        let specs = engine
            .build_download_queue(Some(site_id), QueueSelection::default())
            .await
            .unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].category.as_deref(), Some("Manuals"));
    }
}
