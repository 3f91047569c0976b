//! Keeps the local inventory in sync with a directory tree.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use walkdir::{DirEntry, WalkDir};

use super::{LocalInventory, NewLocalFile, StoreError};
use crate::download::constants::PARTIAL_SUFFIX;
use crate::validator::FileValidator;

/// Errors from [`LocalScanner::scan`].
#[derive(Debug, Error)]
pub enum LocalScanError {
    /// The root is missing or not a directory.
    #[error("cannot scan {path}: {source}")]
    Root {
        /// Requested root.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Store write failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The blocking walk task died.
    #[error("directory walk aborted: {0}")]
    Join(String),
}

/// Counts from one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LocalScanStats {
    /// Regular files seen.
    pub scanned: usize,
    /// Rows inserted or refreshed.
    pub upserted: usize,
    /// Rows dropped because their file is gone.
    pub removed: usize,
}

/// Walks a library directory and mirrors it into a [`LocalInventory`].
pub struct LocalScanner {
    inventory: Arc<dyn LocalInventory>,
    validator: Arc<FileValidator>,
}

struct FoundFile {
    path: String,
    size: i64,
    file_type: Option<String>,
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'))
}

fn is_partial(entry: &DirEntry) -> bool {
    entry
        .path()
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == PARTIAL_SUFFIX)
}

fn walk(root: &Path, validator: &FileValidator) -> Vec<FoundFile> {
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| !is_hidden(entry))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(error = %err, "skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && !is_partial(entry))
        .filter_map(|entry| {
            let metadata = entry.metadata().ok()?;
            Some(FoundFile {
                path: entry.path().to_string_lossy().into_owned(),
                size: i64::try_from(metadata.len()).unwrap_or(i64::MAX),
                file_type: validator.file_type_for_path(entry.path()).map(str::to_string),
            })
        })
        .collect()
}

impl LocalScanner {
    /// Creates a scanner writing to `inventory`.
    #[must_use]
    pub fn new(inventory: Arc<dyn LocalInventory>, validator: Arc<FileValidator>) -> Self {
        Self {
            inventory,
            validator,
        }
    }

    /// Upserts every regular file under `root` and drops rows for files that
    /// disappeared. Hidden entries and partial downloads are ignored.
    ///
    /// # Errors
    ///
    /// [`LocalScanError::Root`] if `root` is not a readable directory;
    /// [`LocalScanError::Store`] if a store write fails.
    #[instrument(skip(self), fields(root = %root.display()))]
    pub async fn scan(&self, root: &Path) -> Result<LocalScanStats, LocalScanError> {
        let root = std::path::absolute(root).map_err(|source| LocalScanError::Root {
            path: root.to_path_buf(),
            source,
        })?;
        let metadata = tokio::fs::metadata(&root)
            .await
            .map_err(|source| LocalScanError::Root {
                path: root.clone(),
                source,
            })?;
        if !metadata.is_dir() {
            return Err(LocalScanError::Root {
                path: root,
                source: std::io::Error::new(std::io::ErrorKind::NotADirectory, "not a directory"),
            });
        }

        let files = {
            let root = root.clone();
            let validator = Arc::clone(&self.validator);
            tokio::task::spawn_blocking(move || walk(&root, &validator))
                .await
                .map_err(|e| LocalScanError::Join(e.to_string()))?
        };

        let mut stats = LocalScanStats {
            scanned: files.len(),
            ..LocalScanStats::default()
        };
        let mut seen = Vec::with_capacity(files.len());
        for file in files {
            self.inventory
                .upsert_local(&NewLocalFile {
                    path: file.path.clone(),
                    size: file.size,
                    file_type: file.file_type,
                })
                .await?;
            debug!(path = %file.path, size = file.size, "local file recorded");
            stats.upserted += 1;
            seen.push(file.path);
        }

        stats.removed = self.inventory.delete_missing(&root, &seen).await?;
        info!(
            scanned = stats.scanned,
            upserted = stats.upserted,
            removed = stats.removed,
            "local scan complete"
        );
        Ok(stats)
    }
}
