//! Pricewatch: a price-tracking crawl engine
//!
//! This crate periodically crawls a fixed set of e-commerce sites, extracts
//! product records, keeps their price history, detects price changes and
//! notifies watchers when a product's price moves.

pub mod backend;
pub mod config;
pub mod crawler;
pub mod extract;
pub mod ingest;
pub mod jobs;
pub mod metrics;
pub mod notify;
pub mod output;
pub mod search;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Pricewatch operations
#[derive(Debug, Error)]
pub enum PriceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Crawl backend error: {0}")]
    Backend(#[from] backend::BackendError),

    #[error("Search index error: {0}")]
    Search(#[from] search::SearchError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] ingest::IngestError),

    #[error("Notification error: {0}")]
    Notify(#[from] notify::NotifyError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid selector in config: {0}")]
    InvalidSelector(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Pricewatch operations
pub type Result<T> = std::result::Result<T, PriceError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use metrics::Metrics;
pub use url::{clean_url, url_host, with_www, without_www};
