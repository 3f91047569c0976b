//! Scan command handlers: refresh a site's remote inventory or index a local
//! directory.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use docsync_core::HttpClient;
use docsync_core::inventory::LocalScanner;
use docsync_core::scraper::{self, SiteScanner};

use super::AppContext;

pub async fn run_scan_command(ctx: &AppContext, site_id: i64) -> Result<()> {
    let client = HttpClient::new(&ctx.settings.client_options())
        .context("failed to build HTTP client")?;
    let registry = Arc::new(scraper::builtin_registry(&ctx.settings.plugins.disabled));
    let scanner = SiteScanner::new(
        ctx.store.clone(),
        ctx.store.clone(),
        registry,
        client,
        ctx.settings.file_types.enabled_extensions(),
    );

    let report = scanner
        .scan_site(site_id)
        .await
        .with_context(|| format!("scan of site {site_id} failed"))?;

    println!("Scanned site {}:", report.site_id);
    println!("  categories found: {}", report.categories_found);
    println!("  files found:      {}", report.files_found);
    println!("  added:            {}", report.files_added);
    println!("  updated:          {}", report.files_updated);
    println!("  removed:          {}", report.files_removed);
    Ok(())
}

pub async fn run_scan_local_command(ctx: &AppContext, dir: &Path) -> Result<()> {
    let scanner = LocalScanner::new(ctx.store.clone(), Arc::clone(&ctx.validator));
    let stats = scanner
        .scan(dir)
        .await
        .with_context(|| format!("failed to scan {}", dir.display()))?;

    println!(
        "Scanned {}: {} files, {} recorded, {} stale records removed",
        dir.display(),
        stats.scanned,
        stats.upserted,
        stats.removed
    );
    Ok(())
}
