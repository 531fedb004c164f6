//! Site registry
//!
//! Each crawled site is a [`SiteDefinition`]: its start URL, host allow-list,
//! content selector, page extractor and any auxiliary response handlers.
//! Definitions are built from the configuration, and extractors or handlers
//! can be swapped in before the crawlers start.

use crate::config::{Config, FeedConfig, SiteConfig};
use crate::extract::{PageExtractor, SelectorExtractor};
use crate::url::{url_host, AllowedDomains};
use crate::ConfigError;
use scraper::Selector;
use std::sync::Arc;

/// Discovers more URLs from a raw response
///
/// Handlers see every successful response of their site, HTML or not.
pub trait ResponseHandler: Send + Sync {
    /// Returns URLs to add to the frontier
    fn discover(&self, request_url: &str, body: &str) -> Vec<String>;
}

/// Walks a paged JSON product feed
///
/// A listing URL without the feed query is requested again with it. A feed
/// response lists product links and a total page count; every further page
/// and every product is visited. URLs carrying the skip marker are product
/// pages and are left alone.
#[derive(Debug, Clone)]
pub struct PagedFeedHandler {
    config: FeedConfig,
}

impl PagedFeedHandler {
    pub fn new(config: FeedConfig) -> Self {
        Self { config }
    }
}

impl ResponseHandler for PagedFeedHandler {
    fn discover(&self, request_url: &str, body: &str) -> Vec<String> {
        if request_url.contains(&self.config.skip_marker) {
            return Vec::new();
        }

        let marker = format!("?{}", self.config.feed_query);
        if !request_url.contains(&marker) {
            return vec![format!("{}{}", request_url, marker)];
        }

        let Ok(feed) = serde_json::from_str::<serde_json::Value>(body) else {
            return Vec::new();
        };

        let mut urls = Vec::new();

        let total_pages = feed
            .get(&self.config.total_pages_field)
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        for page in 2..=total_pages {
            urls.push(format!(
                "{}&{}={}",
                request_url, self.config.page_param, page
            ));
        }

        if let Some(items) = feed.get(&self.config.items_field).and_then(|v| v.as_array()) {
            for item in items {
                if let Some(link) = item.get(&self.config.link_field).and_then(|v| v.as_str()) {
                    urls.push(request_url.replace(&marker, link));
                }
            }
        }

        urls
    }
}

/// Everything a crawl job needs to know about one site
pub struct SiteDefinition {
    /// Start URL, also the key of the site's bot run record
    pub url: String,
    /// Host without `www.`; scopes the job's crawl-state backends
    pub host: String,
    pub allowed: AllowedDomains,
    pub content: Selector,
    pub extractor: Arc<dyn PageExtractor>,
    pub handlers: Vec<Arc<dyn ResponseHandler>>,
}

impl SiteDefinition {
    /// Builds a site from its configuration
    ///
    /// The site gets a [`SelectorExtractor`] and, when a feed is configured,
    /// a [`PagedFeedHandler`].
    pub fn from_config(site: &SiteConfig) -> Result<Self, ConfigError> {
        let host = url_host(&site.url)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", site.url, e)))?;
        let allowed = AllowedDomains::for_site(&site.url)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", site.url, e)))?;
        let content = Selector::parse(&site.content_selector).map_err(|e| {
            ConfigError::InvalidSelector(format!("'{}': {}", site.content_selector, e))
        })?;

        let mut handlers: Vec<Arc<dyn ResponseHandler>> = Vec::new();
        if let Some(feed) = &site.feed {
            handlers.push(Arc::new(PagedFeedHandler::new(feed.clone())));
        }

        Ok(Self {
            url: site.url.clone(),
            host,
            allowed,
            content,
            extractor: Arc::new(SelectorExtractor::from_config(site)?),
            handlers,
        })
    }

    /// Replaces the page extractor
    pub fn with_extractor(mut self, extractor: Arc<dyn PageExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Adds an auxiliary response handler
    pub fn with_handler(mut self, handler: Arc<dyn ResponseHandler>) -> Self {
        self.handlers.push(handler);
        self
    }
}

/// The sites crawled by this process, in configuration order
#[derive(Default)]
pub struct SiteRegistry {
    sites: Vec<Arc<SiteDefinition>>,
}

impl SiteRegistry {
    /// Builds definitions for every active site
    ///
    /// In production, sites marked `dev-only` are left out.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let sites = config
            .active_sites()
            .map(|site| SiteDefinition::from_config(site).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { sites })
    }

    pub fn register(&mut self, site: SiteDefinition) {
        self.sites.push(Arc::new(site));
    }

    pub fn sites(&self) -> &[Arc<SiteDefinition>] {
        &self.sites
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}
