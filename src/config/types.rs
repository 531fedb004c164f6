use serde::Deserialize;

/// Main configuration structure for Pricewatch
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub app: AppConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default, rename = "site")]
    pub sites: Vec<SiteConfig>,
}

impl Config {
    /// Sites that should be crawled in the configured environment
    ///
    /// Sites marked `dev-only` are skipped in production.
    pub fn active_sites(&self) -> impl Iterator<Item = &SiteConfig> {
        let production = self.app.environment.is_production();
        self.sites.iter().filter(move |s| !(production && s.dev_only))
    }
}

/// Deployment mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Development,
}

impl Environment {
    pub fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }

    /// Parses the value of the environment override variable
    pub fn from_env_value(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "prod" | "production" => Some(Environment::Production),
            "dev" | "development" => Some(Environment::Development),
            _ => None,
        }
    }
}

/// Application wide settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AppConfig {
    #[serde(default = "default_environment")]
    pub environment: Environment,

    /// Path to the SQLite database holding products and price history
    pub database_path: String,

    /// Path to the search index database (defaults to `database-path`)
    #[serde(default)]
    pub search_path: Option<String>,

    /// Directory where downloaded product images are written
    pub image_dir: String,

    /// Public URL prefix under which `image-dir` is served
    pub image_base_url: String,
}

impl AppConfig {
    pub fn search_path(&self) -> &str {
        self.search_path.as_deref().unwrap_or(&self.database_path)
    }
}

fn default_environment() -> Environment {
    Environment::Development
}

/// How a crawl job drives its frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlMode {
    /// Bounded in-process fetch tasks over an in-memory frontier
    Parallel,
    /// Fixed pool of workers pulling from the queue backend
    Queue,
}

/// Which crawl-state backend serves a storage role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Volatile,
    Durable,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CrawlerConfig {
    pub mode: CrawlMode,

    /// Number of queue consumers in queue mode
    pub queue_workers: usize,

    /// Maximum concurrent fetches in parallel mode
    pub parallelism: usize,

    /// Backend for the visited set and cookies
    pub item_storage: BackendKind,

    /// Backend for the request queue
    pub queue_storage: BackendKind,

    /// SQLite file used by durable backends (defaults to the app database)
    pub backend_path: Option<String>,

    /// Rotate a random browser user agent per request
    pub random_user_agent: bool,

    /// Identifying user agent used when rotation is off
    pub user_agent: String,

    /// Fixed delay before every request (milliseconds)
    pub delay_ms: u64,

    /// Upper bound of the random jitter added to `delay-ms` (milliseconds)
    pub random_delay_ms: u64,

    /// Per-request timeout (seconds)
    pub timeout_secs: u64,

    /// Expiry of visited entries in the volatile backend (seconds)
    pub visited_ttl_secs: Option<u64>,

    /// Query parameters kept when canonicalizing product URLs
    pub keep_query_params: Vec<String>,

    /// A production run started less than this many hours ago is resumed
    pub resume_window_hours: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            mode: CrawlMode::Parallel,
            queue_workers: 2,
            parallelism: 2,
            item_storage: BackendKind::Volatile,
            queue_storage: BackendKind::Volatile,
            backend_path: None,
            random_user_agent: false,
            user_agent: "Pricewatch".to_string(),
            delay_ms: 0,
            random_delay_ms: 4000,
            timeout_secs: 30,
            visited_ttl_secs: None,
            keep_query_params: vec!["ProductID".to_string()],
            resume_window_hours: 12,
        }
    }
}

/// Intervals and windows of the periodic jobs
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ScheduleConfig {
    pub price_change_hours: u64,
    pub watcher_hours: u64,
    pub view_retention_hours: u64,
    pub cleaner_hours: u64,

    /// Look-back window of the price change detector
    pub price_window_hours: u64,

    /// Look-back window of the watch notifier
    pub watch_window_hours: u64,

    /// View counters older than this are purged
    pub view_retention_window_hours: u64,

    /// Batch size for paginated job scans
    pub page_size: usize,

    /// Pause between cleaner requests (milliseconds)
    pub cleaner_delay_ms: u64,

    /// Cleaner request timeout (seconds)
    pub cleaner_timeout_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            price_change_hours: 11,
            watcher_hours: 2,
            view_retention_hours: 3,
            cleaner_hours: 24 * 7,
            price_window_hours: 24 * 14,
            watch_window_hours: 72,
            view_retention_window_hours: 24 * 14,
            page_size: 100,
            cleaner_delay_ms: 500,
            cleaner_timeout_secs: 30,
        }
    }
}

/// Notification delivery kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderKind {
    /// Write notifications to the log only
    Log,
    /// POST notifications as JSON to a webhook
    Webhook,
}

/// Notification configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct NotifyConfig {
    pub sender: SenderKind,
    pub webhook_url: Option<String>,

    /// Public site used to build product links in notifications
    pub site_url: String,

    /// Template name passed to the sender
    pub template: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            sender: SenderKind::Log,
            webhook_url: None,
            site_url: "https://verdfra.is".to_string(),
            template: "watch-product".to_string(),
        }
    }
}

/// One crawled site
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SiteConfig {
    /// Start URL of the crawl
    pub url: String,

    /// Source name stored on products (defaults to the host without `www.`)
    #[serde(default)]
    pub source: Option<String>,

    /// Prefix of generated product slugs
    pub slug_prefix: String,

    /// Pages matching this selector are product pages
    pub content_selector: String,

    /// Skip this site in production
    #[serde(default)]
    pub dev_only: bool,

    pub selectors: SelectorConfig,

    #[serde(default)]
    pub feed: Option<FeedConfig>,
}

/// Selectors used by the configurable page extractor
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SelectorConfig {
    pub title: String,
    pub code: String,
    pub price: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub images: Option<String>,
    #[serde(default = "default_image_attr")]
    pub image_attr: String,
    /// Rows whose first cell is a spec key and last cell its value
    #[serde(default)]
    pub specs: Option<String>,
    /// Rows whose first cell is a location and last cell a stock label
    #[serde(default)]
    pub stocks: Option<String>,
    #[serde(default)]
    pub in_stock_text: Vec<String>,
    #[serde(default)]
    pub breadcrumbs: Option<String>,
    #[serde(default)]
    pub breadcrumbs_keep_first: bool,
    #[serde(default)]
    pub breadcrumbs_keep_last: bool,
    /// Present on the page when the product is on sale
    #[serde(default)]
    pub on_sale: Option<String>,
}

fn default_image_attr() -> String {
    "src".to_string()
}

/// Paged JSON product feed exposed by some sites
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FeedConfig {
    /// Query appended to a listing URL to request its feed
    pub feed_query: String,
    /// URLs containing this marker are product pages and never feeds
    pub skip_marker: String,
    pub total_pages_field: String,
    pub items_field: String,
    pub link_field: String,
    pub page_param: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            feed_query: "feed=true".to_string(),
            skip_marker: "?ProductID=".to_string(),
            total_pages_field: "totalPageCount".to_string(),
            items_field: "productList".to_string(),
            link_field: "prodLink".to_string(),
            page_param: "PageNum".to_string(),
        }
    }
}
