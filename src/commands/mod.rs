//! CLI command handlers.

mod compare;
mod download;
mod history;
mod link;
mod scan;
mod site;

use std::sync::Arc;

use anyhow::{Context as _, Result};
use docsync_core::{Database, FileValidator, Settings, SqliteInventory, validator};
use tracing::debug;

use crate::cli::Args;

pub use compare::run_compare_command;
pub use download::run_download_command;
pub use history::run_history_command;
pub use link::{run_link_command, run_unlink_command};
pub use scan::{run_scan_command, run_scan_local_command};
pub use site::run_site_command;

/// Settings and stores shared by every command.
pub struct AppContext {
    pub settings: Settings,
    pub store: Arc<SqliteInventory>,
    pub validator: Arc<FileValidator>,
}

impl AppContext {
    /// Loads settings, applies `--db`, and opens the database.
    pub async fn open(args: &Args) -> Result<Self> {
        let mut settings = Settings::load_or_default(&args.config)
            .with_context(|| format!("failed to load settings from {}", args.config.display()))?;
        if let Some(db) = &args.db {
            settings.storage.database_path.clone_from(db);
        }
        debug!(db = %settings.storage.database_path.display(), "opening database");

        let db = Database::new(&settings.storage.database_path)
            .await
            .with_context(|| {
                format!(
                    "failed to open database {}",
                    settings.storage.database_path.display()
                )
            })?;
        let registry = validator::builtin_registry(&settings.plugins.disabled);
        Ok(Self {
            store: Arc::new(SqliteInventory::new(db)),
            validator: Arc::new(FileValidator::new(Arc::new(registry))),
            settings,
        })
    }
}
