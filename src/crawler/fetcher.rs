//! Fetch capability and HTTP plumbing
//!
//! This module defines the `Fetch` trait every source kind implements, the
//! registry that maps a `SiteKind` to its fetcher, and the shared HTTP
//! helpers:
//! - Building the HTTP client with the configured user agent and timeouts
//! - GET requests with status and network error classification

use crate::config::{HttpConfig, UserAgentConfig};
use crate::model::{CrawlItem, ErrorKind, SiteDescriptor, SiteKind};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A fetch that could not produce any items
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Network failure, timeout or non-2xx status
    #[error("source unreachable at {url}: {detail}")]
    SourceUnreachable { url: String, detail: String },

    /// The document (or the site's rules) could not be interpreted at all
    #[error("failed to parse {url}: {detail}")]
    ParseFailure { url: String, detail: String },
}

impl FetchError {
    pub fn unreachable(url: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::SourceUnreachable {
            url: url.into(),
            detail: detail.into(),
        }
    }

    pub fn parse(url: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ParseFailure {
            url: url.into(),
            detail: detail.into(),
        }
    }

    /// Maps the error onto the outcome taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SourceUnreachable { .. } => ErrorKind::SourceUnreachable,
            Self::ParseFailure { .. } => ErrorKind::ParseFailure,
        }
    }

    /// Returns true if an immediate retry could succeed
    ///
    /// Only network-level failures are retried; a document that failed to
    /// parse will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SourceUnreachable { .. })
    }
}

/// A single entry that could not be turned into a `CrawlItem`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntryError {
    #[error("entry has neither a title nor a link")]
    MissingContent,

    #[error("entry has no derivable identity key")]
    MissingIdentity,
}

/// The capability of turning a site descriptor into crawl items
///
/// Implementations must not filter or deduplicate; they return everything
/// the source currently lists, in source order.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Fetches and normalizes the site's current items
    async fn fetch(&self, site: &SiteDescriptor) -> Result<Vec<CrawlItem>, FetchError>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// Maps each site kind to the fetcher that handles it
#[derive(Clone, Default)]
pub struct FetcherRegistry {
    fetchers: HashMap<SiteKind, Arc<dyn Fetch>>,
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the registry with the feed and custom fetchers sharing one client
    pub fn standard(client: Client) -> Self {
        Self::new()
            .with(
                SiteKind::Feed,
                Arc::new(super::FeedFetcher::new(client.clone())),
            )
            .with(SiteKind::Custom, Arc::new(super::CustomFetcher::new(client)))
    }

    pub fn with(mut self, kind: SiteKind, fetcher: Arc<dyn Fetch>) -> Self {
        self.register(kind, fetcher);
        self
    }

    pub fn register(&mut self, kind: SiteKind, fetcher: Arc<dyn Fetch>) {
        self.fetchers.insert(kind, fetcher);
    }

    pub fn get(&self, kind: SiteKind) -> Option<Arc<dyn Fetch>> {
        self.fetchers.get(&kind).cloned()
    }
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `user_agent` - The user agent configuration
/// * `http` - Timeouts
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
///
/// # Example
///
/// ```no_run
/// use org_crawler::config::{HttpConfig, UserAgentConfig};
/// use org_crawler::crawler::build_http_client;
///
/// let config = UserAgentConfig {
///     crawler_name: "OrgCrawler".to_string(),
///     crawler_version: "0.1".to_string(),
///     contact_url: Some("https://example.com/about".to_string()),
///     contact_email: None,
/// };
///
/// let client = build_http_client(&config, &HttpConfig::default()).unwrap();
/// ```
pub fn build_http_client(
    user_agent: &UserAgentConfig,
    http: &HttpConfig,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(format_user_agent(user_agent))
        .timeout(Duration::from_secs(http.timeout_secs))
        .connect_timeout(Duration::from_secs(http.connect_timeout_secs))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Format: CrawlerName/Version (+ContactURL; ContactEmail)
fn format_user_agent(config: &UserAgentConfig) -> String {
    let contact: Vec<String> = config
        .contact_url
        .iter()
        .map(|url| format!("+{}", url))
        .chain(config.contact_email.iter().cloned())
        .collect();

    if contact.is_empty() {
        format!("{}/{}", config.crawler_name, config.crawler_version)
    } else {
        format!(
            "{}/{} ({})",
            config.crawler_name,
            config.crawler_version,
            contact.join("; ")
        )
    }
}

/// Fetches a document body with status and network error classification
///
/// | Condition | Result |
/// |-----------|--------|
/// | 2xx | body text |
/// | any other status | `SourceUnreachable` with the status |
/// | timeout | `SourceUnreachable` ("request timeout") |
/// | connection failure | `SourceUnreachable` ("connection failed") |
/// | body read failure | `SourceUnreachable` |
///
/// # Arguments
///
/// * `client` - The HTTP client to use
/// * `url` - The URL to fetch
pub async fn fetch_document(client: &Client, url: &str) -> Result<String, FetchError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| FetchError::unreachable(url, classify_request_error(&e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::unreachable(url, format!("HTTP {}", status)));
    }

    response
        .text()
        .await
        .map_err(|e| FetchError::unreachable(url, format!("failed to read body: {}", e)))
}

fn classify_request_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "request timeout".to_string()
    } else if e.is_connect() {
        format!("connection failed: {}", e)
    } else {
        e.to_string()
    }
}
