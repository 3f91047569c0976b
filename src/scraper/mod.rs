//! Site scrapers and the scanner that feeds the remote inventory.
//!
//! A [`Scraper`] knows how to list a site's categories and the documents in
//! each category. Scrapers are looked up by the site's `scraper_type` in a
//! [`ScraperRegistry`] built from [`builtin_catalog`] at startup.
//!
//! - [`GenericLinkScraper`] (`"generic"`) - every document link on the base page
//! - [`DirectoryListingScraper`] (`"directory_listing"`) - auto-index pages, one
//!   category per subdirectory
//! - [`SiteScanner`] - runs a scraper over a site and replaces its inventory
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use docsync_core::Database;
//! use docsync_core::download::{ClientOptions, HttpClient};
//! use docsync_core::inventory::SqliteInventory;
//! use docsync_core::scraper::{builtin_registry, SiteScanner};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(SqliteInventory::new(Database::new_in_memory().await?));
//! let scanner = SiteScanner::new(
//!     store.clone(),
//!     store,
//!     Arc::new(builtin_registry(&[])),
//!     HttpClient::new(&ClientOptions::default())?,
//!     vec![".pdf".to_string()],
//! );
//! let report = scanner.scan_site(1).await?;
//! println!("{} files", report.files_found);
//! # Ok(())
//! # }
//! ```

mod directory_listing;
mod error;
mod generic;
mod scanner;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use ::scraper::{Html, Selector};
use serde::Serialize;
use url::Url;

use crate::download::HttpClient;
use crate::download::filename::{extension_from_url, file_name_from_url};
use crate::registry::{CapabilityRegistry, Factory, PluginDescriptor};

pub use directory_listing::DirectoryListingScraper;
pub use error::{ScanError, ScrapeError};
pub use generic::GenericLinkScraper;
pub use scanner::{ScanReport, SiteScanner};

/// Registry of scraper factories keyed by scraper type.
pub type ScraperRegistry = CapabilityRegistry<dyn Scraper, ScraperContext>;

/// A category on a remote site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Category {
    /// Scraper-defined id, stable across scans.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Listing URL.
    pub url: Option<String>,
    /// Parent category id.
    pub parent_id: Option<String>,
}

/// A document found on a remote site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteFile {
    /// Absolute download URL.
    pub url: String,
    /// Display name.
    pub name: String,
    /// Size in bytes, when the listing says.
    pub size: Option<u64>,
    /// Validator key, when the scraper can tell.
    pub file_type: Option<String>,
    /// Id of the category it was listed under.
    pub category_id: String,
}

/// Everything a scraper factory needs to build a scraper for one site.
#[derive(Debug, Clone)]
pub struct ScraperContext {
    /// The site's base URL.
    pub base_url: Url,
    /// Shared HTTP client.
    pub client: HttpClient,
    /// Normalized extensions (`.pdf`) worth collecting.
    pub extensions: Vec<String>,
}

/// Lists categories and files on one site.
#[async_trait]
pub trait Scraper: Send + Sync {
    /// Categories on the site.
    async fn list_categories(&self) -> Result<Vec<Category>, ScrapeError>;

    /// Documents listed under `category_id`.
    async fn list_files_in_category(&self, category_id: &str)
    -> Result<Vec<RemoteFile>, ScrapeError>;
}

fn factory_of<S>(make: fn(&ScraperContext) -> S) -> Factory<dyn Scraper, ScraperContext>
where
    S: Scraper + 'static,
{
    Arc::new(move |ctx: &ScraperContext| Ok(Box::new(make(ctx)) as Box<dyn Scraper>))
}

/// Compile-time table of built-in scrapers.
#[must_use]
pub fn builtin_catalog() -> Vec<PluginDescriptor<dyn Scraper, ScraperContext>> {
    vec![
        PluginDescriptor {
            key: generic::SCRAPER_TYPE,
            extensions: &[],
            load: || Ok(factory_of(|ctx| GenericLinkScraper::new(ctx.clone()))),
        },
        PluginDescriptor {
            key: directory_listing::SCRAPER_TYPE,
            extensions: &[],
            load: || Ok(factory_of(|ctx| DirectoryListingScraper::new(ctx.clone()))),
        },
    ]
}

/// Scraper registry populated with the built-ins, minus `disabled` keys.
#[must_use]
pub fn builtin_registry(disabled: &[String]) -> ScraperRegistry {
    let mut registry = ScraperRegistry::new("scraper");
    registry.discover(&builtin_catalog(), disabled);
    registry
}

/// Validator key for a normalized extension (`.txt` -> `text`).
#[must_use]
pub fn file_type_for_extension(extension: &str) -> String {
    match extension.trim_start_matches('.') {
        "txt" | "text" => "text".to_string(),
        "md" | "markdown" => "markdown".to_string(),
        other => other.to_string(),
    }
}

/// An anchor on a page, resolved against the page URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PageLink {
    pub url: Url,
    pub text: String,
}

#[allow(clippy::expect_used)]
static ANCHOR: std::sync::LazyLock<Selector> =
    std::sync::LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));

/// Fetches `url` and returns its body text.
pub(crate) async fn fetch_page(client: &HttpClient, url: &str) -> Result<String, ScrapeError> {
    let response = client.get(url).await?;
    response.text().await.map_err(|e| ScrapeError::Network {
        url: url.to_string(),
        message: e.to_string(),
    })
}

/// Every `<a href>` in `html`, resolved against `page_url`. Fragments are dropped.
pub(crate) fn extract_links(html: &str, page_url: &Url) -> Vec<PageLink> {
    let document = Html::parse_document(html);
    document
        .select(&ANCHOR)
        .filter_map(|anchor| {
            let href = anchor.value().attr("href")?.trim();
            if href.is_empty() || href.starts_with('#') {
                return None;
            }
            let mut url = page_url.join(href).ok()?;
            if !matches!(url.scheme(), "http" | "https") {
                return None;
            }
            url.set_fragment(None);
            let text = anchor.text().collect::<String>().trim().to_string();
            Some(PageLink { url, text })
        })
        .collect()
}

/// Turns the document links among `links` into [`RemoteFile`]s under `category_id`.
///
/// Only links whose path ends in one of `extensions` are kept; repeated URLs
/// keep their first occurrence.
pub(crate) fn collect_files(
    links: Vec<PageLink>,
    extensions: &[String],
    category_id: &str,
) -> Vec<RemoteFile> {
    let mut seen = HashSet::new();
    let mut files = Vec::new();
    for link in links {
        let url = link.url.to_string();
        let Some(extension) = extension_from_url(&url) else {
            continue;
        };
        if !extensions.iter().any(|e| *e == extension) || !seen.insert(url.clone()) {
            continue;
        }
        let name = if link.text.is_empty() {
            file_name_from_url(&url).unwrap_or_else(|| url.clone())
        } else {
            link.text
        };
        files.push(RemoteFile {
            url,
            name,
            size: None,
            file_type: Some(file_type_for_extension(&extension)),
            category_id: category_id.to_string(),
        });
    }
    files
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn page() -> Url {
        Url::parse("https://docs.example.com/library/index.html").unwrap()
    }

    // ==================== Link Extraction Tests ====================

    #[test]
    fn test_extract_links_resolves_relative() {
        let html = r##"
            <a href="guide.pdf"> Guide </a>
            <a href="/specs/spec.pdf">Spec</a>
            <a href="#top">Top</a>
            <a href="mailto:x@example.com">Mail</a>
            <a>No href</a>
        "##;
        let links = extract_links(html, &page());
        let urls: Vec<&str> = links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://docs.example.com/library/guide.pdf",
                "https://docs.example.com/specs/spec.pdf"
            ]
        );
        assert_eq!(links[0].text, "Guide");
    }

    #[test]
    fn test_collect_files_filters_and_dedups() {
        let html = r#"
            <a href="a.pdf">First</a>
            <a href="a.pdf">Again</a>
            <a href="b.PDF"></a>
            <a href="notes.txt">Notes</a>
            <a href="page.html">Page</a>
            <a href="My%20Book.epub"></a>
        "#;
        let links = extract_links(html, &page());
        let files = collect_files(
            links,
            &[".pdf".to_string(), ".epub".to_string()],
            "default",
        );
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["First", "b.PDF", "My Book.epub"]);
        assert_eq!(files[0].file_type.as_deref(), Some("pdf"));
        assert_eq!(files[2].file_type.as_deref(), Some("epub"));
        assert!(files.iter().all(|f| f.category_id == "default" && f.size.is_none()));
    }

    #[test]
    fn test_file_type_for_extension() {
        assert_eq!(file_type_for_extension(".pdf"), "pdf");
        assert_eq!(file_type_for_extension(".txt"), "text");
        assert_eq!(file_type_for_extension(".md"), "markdown");
    }

    // ==================== Registry Tests ====================

    #[test]
    fn test_builtin_registry_keys() {
        let registry = builtin_registry(&[]);
        assert!(registry.contains("generic"));
        assert!(registry.contains("directory_listing"));

        let registry = builtin_registry(&["directory_listing".to_string()]);
        assert_eq!(registry.keys(), vec!["generic"]);
    }
}
