//! Drives a scraper across one site and replaces its remote inventory.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};
use url::Url;

use super::{RemoteFile, ScanError, ScraperContext, ScraperRegistry, file_type_for_extension};
use crate::download::HttpClient;
use crate::download::filename::extension_from_url;
use crate::inventory::{NewCategory, NewRemoteFile, RemoteInventory, SiteStore};
use crate::registry::RegistryError;

/// Counts from one site scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Site that was scanned.
    pub site_id: i64,
    /// Categories the scraper reported.
    pub categories_found: usize,
    /// Files kept after normalization.
    pub files_found: usize,
    /// New remote rows.
    pub files_added: usize,
    /// Existing rows that changed.
    pub files_updated: usize,
    /// Rows dropped because the site no longer lists them.
    pub files_removed: usize,
}

/// Scans sites with the scraper each site names.
pub struct SiteScanner {
    sites: Arc<dyn SiteStore>,
    remote: Arc<dyn RemoteInventory>,
    scrapers: Arc<ScraperRegistry>,
    client: HttpClient,
    extensions: Vec<String>,
}

/// Trims names, fills missing file types, and drops repeated URLs.
fn normalize(files: Vec<RemoteFile>) -> Vec<RemoteFile> {
    let mut seen = HashSet::new();
    files
        .into_iter()
        .filter(|file| seen.insert(file.url.clone()))
        .map(|mut file| {
            file.name = file.name.trim().to_string();
            if file.file_type.is_none() {
                file.file_type = extension_from_url(&file.url).map(|e| file_type_for_extension(&e));
            }
            file
        })
        .collect()
}

impl SiteScanner {
    /// Creates a scanner; `extensions` are the document types worth collecting.
    #[must_use]
    pub fn new(
        sites: Arc<dyn SiteStore>,
        remote: Arc<dyn RemoteInventory>,
        scrapers: Arc<ScraperRegistry>,
        client: HttpClient,
        extensions: Vec<String>,
    ) -> Self {
        Self {
            sites,
            remote,
            scrapers,
            client,
            extensions,
        }
    }

    /// Scans one site and replaces its categories and remote files.
    ///
    /// Nothing is written unless every listing succeeds. The site's last-scan
    /// time is stamped only on success.
    ///
    /// # Errors
    ///
    /// - [`ScanError::SiteNotFound`] for an unknown id
    /// - [`ScanError::UnknownScraperType`] when the site's scraper is not registered
    /// - [`ScanError::Scrape`] when a listing fails
    /// - [`ScanError::Store`] when an inventory write fails
    #[instrument(skip(self))]
    pub async fn scan_site(&self, site_id: i64) -> Result<ScanReport, ScanError> {
        let site = self
            .sites
            .get_site(site_id)
            .await?
            .ok_or(ScanError::SiteNotFound(site_id))?;

        let base_url = Url::parse(&site.url).map_err(|_| ScanError::InvalidSiteUrl {
            url: site.url.clone(),
        })?;
        let ctx = ScraperContext {
            base_url,
            client: self.client.clone(),
            extensions: self.extensions.clone(),
        };
        let scraper = self
            .scrapers
            .resolve(&site.scraper_type, &ctx)
            .map_err(|err| match err {
                RegistryError::NotFound { .. } => ScanError::UnknownScraperType {
                    site_id,
                    scraper_type: site.scraper_type.clone(),
                },
                other => ScanError::Registry(other),
            })?;

        let categories = scraper.list_categories().await?;
        let mut files = Vec::new();
        for category in &categories {
            files.extend(scraper.list_files_in_category(&category.id).await?);
        }
        let files = normalize(files);

        let new_categories: Vec<NewCategory> = categories
            .iter()
            .map(|c| NewCategory {
                external_id: c.id.clone(),
                name: c.name.clone(),
                url: c.url.clone(),
                parent_external_id: c.parent_id.clone(),
            })
            .collect();
        let category_ids = self
            .remote
            .replace_categories(site_id, &new_categories)
            .await?;

        let mut records = Vec::with_capacity(files.len());
        for file in files {
            let Some(&category_id) = category_ids.get(&file.category_id) else {
                warn!(
                    url = %file.url,
                    category = %file.category_id,
                    "file listed under unknown category; dropped"
                );
                continue;
            };
            records.push(NewRemoteFile {
                category_id: Some(category_id),
                url: file.url,
                name: file.name,
                size: file.size.and_then(|s| i64::try_from(s).ok()),
                file_type: file.file_type,
            });
        }

        let summary = self.remote.upsert_many(site_id, &records).await?;
        self.sites.update_last_scan(site_id).await?;

        let report = ScanReport {
            site_id,
            categories_found: categories.len(),
            files_found: records.len(),
            files_added: summary.added,
            files_updated: summary.updated,
            files_removed: summary.removed,
        };
        info!(
            site_id,
            categories = report.categories_found,
            files = report.files_found,
            added = report.files_added,
            updated = report.files_updated,
            removed = report.files_removed,
            "site scan complete"
        );
        Ok(report)
    }
}
