//! Configuration module for Pricewatch
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use pricewatch::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("pricewatch.toml")).unwrap();
//! println!("Crawl mode: {:?}", config.crawler.mode);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    AppConfig, BackendKind, Config, CrawlMode, CrawlerConfig, Environment, FeedConfig,
    NotifyConfig, ScheduleConfig, SelectorConfig, SenderKind, SiteConfig,
};

// Re-export parser functions
pub use parser::{
    apply_environment_override, compute_config_hash, load_config, load_config_with_hash,
    parse_config, ENVIRONMENT_VAR,
};
