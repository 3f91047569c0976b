//! Scraper for web-server auto-index pages.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::{debug, info, instrument};
use url::Url;

use super::{
    Category, PageLink, RemoteFile, ScrapeError, Scraper, ScraperContext, collect_files,
    extract_links, fetch_page,
};

/// Registry key.
pub(crate) const SCRAPER_TYPE: &str = "directory_listing";

/// Id of the category for the base page itself.
const ROOT_CATEGORY: &str = "root";

/// Reads an auto-index page: each subdirectory link is a category and the
/// base page is the `root` category.
#[derive(Debug, Clone)]
pub struct DirectoryListingScraper {
    ctx: ScraperContext,
}

impl DirectoryListingScraper {
    /// Creates a scraper for `ctx.base_url`.
    #[must_use]
    pub fn new(ctx: ScraperContext) -> Self {
        Self { ctx }
    }

    fn subdirectories(&self, links: Vec<PageLink>) -> Vec<Category> {
        let base = self.ctx.base_url.as_str();
        let mut seen = HashSet::new();
        let mut categories = Vec::new();
        for link in links {
            let mut url = link.url;
            url.set_query(None);
            let absolute = url.to_string();
            // Parent and sibling links fall outside the base prefix.
            if !absolute.ends_with('/') || !absolute.starts_with(base) || absolute == base {
                continue;
            }
            if !seen.insert(absolute.clone()) {
                continue;
            }
            let name = directory_name(&url).unwrap_or_else(|| absolute.clone());
            categories.push(Category {
                id: absolute.clone(),
                name,
                url: Some(absolute),
                parent_id: Some(ROOT_CATEGORY.to_string()),
            });
        }
        categories
    }
}

/// Percent-decoded last non-empty path segment.
fn directory_name(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.rev().find(|s| !s.is_empty())?;
    let decoded = urlencoding::decode(segment)
        .map_or_else(|_| segment.to_string(), std::borrow::Cow::into_owned);
    Some(decoded)
}

#[async_trait]
impl Scraper for DirectoryListingScraper {
    #[instrument(skip(self), fields(scraper = SCRAPER_TYPE, base = %self.ctx.base_url))]
    async fn list_categories(&self) -> Result<Vec<Category>, ScrapeError> {
        let html = fetch_page(&self.ctx.client, self.ctx.base_url.as_str()).await?;
        let mut categories = vec![Category {
            id: ROOT_CATEGORY.to_string(),
            name: "Root".to_string(),
            url: Some(self.ctx.base_url.to_string()),
            parent_id: None,
        }];
        categories.extend(self.subdirectories(extract_links(&html, &self.ctx.base_url)));
        debug!(count = categories.len(), "categories found");
        Ok(categories)
    }

    #[instrument(skip(self), fields(scraper = SCRAPER_TYPE))]
    async fn list_files_in_category(
        &self,
        category_id: &str,
    ) -> Result<Vec<RemoteFile>, ScrapeError> {
        let page_url = if category_id == ROOT_CATEGORY {
            self.ctx.base_url.clone()
        } else {
            Url::parse(category_id).map_err(|e| ScrapeError::parse(category_id, e.to_string()))?
        };

        let html = fetch_page(&self.ctx.client, page_url.as_str()).await?;
        let files = collect_files(
            extract_links(&html, &page_url),
            &self.ctx.extensions,
            category_id,
        );
        info!(url = %page_url, count = files.len(), "files found");
        Ok(files)
    }
}
