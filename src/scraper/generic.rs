//! Scraper that collects every document link on a site's base page.

use async_trait::async_trait;
use tracing::{info, instrument};
use url::Url;

use super::{
    Category, RemoteFile, ScrapeError, Scraper, ScraperContext, collect_files, extract_links,
    fetch_page,
};

/// Registry key.
pub(crate) const SCRAPER_TYPE: &str = "generic";

/// Id of the single category this scraper reports.
pub(crate) const DEFAULT_CATEGORY: &str = "default";

/// Treats the base page as one flat category of document links.
#[derive(Debug, Clone)]
pub struct GenericLinkScraper {
    ctx: ScraperContext,
}

impl GenericLinkScraper {
    /// Creates a scraper for `ctx.base_url`.
    #[must_use]
    pub fn new(ctx: ScraperContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Scraper for GenericLinkScraper {
    async fn list_categories(&self) -> Result<Vec<Category>, ScrapeError> {
        Ok(vec![Category {
            id: DEFAULT_CATEGORY.to_string(),
            name: "Default".to_string(),
            url: Some(self.ctx.base_url.to_string()),
            parent_id: None,
        }])
    }

    #[instrument(skip(self), fields(scraper = SCRAPER_TYPE))]
    async fn list_files_in_category(
        &self,
        category_id: &str,
    ) -> Result<Vec<RemoteFile>, ScrapeError> {
        let page_url = if category_id == DEFAULT_CATEGORY {
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
