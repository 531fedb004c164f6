//! Crawler module for site crawl jobs
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching with per-request user agents and stored cookies
//! - HTML link discovery and the crawl frontier
//! - The site registry with extractors and response handlers
//! - Per-site crawl orchestration and supervision

mod coordinator;
mod fetcher;
mod frontier;
mod parser;
mod registry;
mod supervisor;
mod useragent;

pub use coordinator::{should_clear_storage, CrawlServices, CrawlSummary, SiteCrawler};
pub use fetcher::{build_http_client, fetch_page, merge_cookies, FetchResult};
pub use frontier::Frontier;
pub use parser::{extract_links, matches_content};
pub use registry::{PagedFeedHandler, ResponseHandler, SiteDefinition, SiteRegistry};
pub use supervisor::{supervise_site, RestartPolicy};
pub use useragent::{random_user_agent, UserAgentPolicy};
