//! HTTP client wrapper shared by scrapers and transfers.
//!
//! [`HttpClient`] owns a pooled `reqwest::Client` configured from the network
//! settings (timeouts, proxy, user agent) and maps transport failures and
//! non-2xx responses into [`DownloadError`].

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, ClientBuilder, Proxy};
use tracing::{debug, instrument};

use super::constants::{CONNECT_TIMEOUT_SECS, REQUEST_TIMEOUT_SECS};
use super::error::DownloadError;
use super::retry::parse_retry_after;
use crate::user_agent;

/// Connection options for [`HttpClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Overall timeout for one request, body included.
    pub timeout: Duration,
    /// Timeout for establishing the TCP/TLS connection.
    pub connect_timeout: Duration,
    /// Proxy URL applied to all schemes.
    pub proxy_url: Option<String>,
    /// User-Agent header; the tool's own UA when `None`.
    pub user_agent: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            proxy_url: None,
            user_agent: None,
        }
    }
}

/// HTTP client for scraping pages and streaming downloads.
///
/// Create once and clone freely; clones share the connection pool.
///
/// # Example
///
/// ```no_run
/// use docsync_core::download::{ClientOptions, HttpClient};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::new(&ClientOptions::default())?;
/// let response = client.get("https://example.com/file.pdf").await?;
/// println!("status: {}", response.status());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Builds a client from connection options.
    ///
    /// # Errors
    ///
    /// Returns the reqwest error when the proxy URL is malformed or the TLS
    /// backend cannot be initialized.
    #[instrument(level = "debug", skip(options), fields(proxy = options.proxy_url.is_some()))]
    pub fn new(options: &ClientOptions) -> Result<Self, reqwest::Error> {
        let client = base_client_builder(options)?.build()?;
        Ok(Self { client })
    }

    /// Sends a GET request and returns the response if the status is 2xx.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::InvalidUrl`] when `url` does not parse
    /// - [`DownloadError::Timeout`] / [`DownloadError::Network`] on transport failure
    /// - [`DownloadError::HttpStatus`] on a non-2xx response (with Retry-After when sent)
    #[instrument(level = "debug", skip(self))]
    pub async fn get(&self, url: &str) -> Result<reqwest::Response, DownloadError> {
        if url::Url::parse(url).is_err() {
            return Err(DownloadError::invalid_url(url));
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            debug!(status = status.as_u16(), "non-success response");
            return Err(DownloadError::http_status_with_retry_after(
                url,
                status.as_u16(),
                retry_after,
            ));
        }

        Ok(response)
    }

    /// Returns the underlying reqwest client (for scrapers).
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

fn base_client_builder(options: &ClientOptions) -> Result<ClientBuilder, reqwest::Error> {
    let user_agent = options
        .user_agent
        .clone()
        .unwrap_or_else(user_agent::default_user_agent);
    let mut builder = Client::builder()
        .connect_timeout(options.connect_timeout)
        .timeout(options.timeout)
        .gzip(true)
        .user_agent(user_agent);
    if let Some(proxy_url) = options.proxy_url.as_deref() {
        builder = builder.proxy(Proxy::all(proxy_url)?);
    }
    Ok(builder)
}
