//! Crawler coordinator - per-site crawl orchestration
//!
//! One [`SiteCrawler`] runs the crawl job of one site:
//! - Deciding whether to resume the previous run or start clean
//! - Opening the job's crawl-state backends
//! - Driving the frontier in parallel or queue mode
//! - Handing matching pages to the site's extractor and the ingestor
//! - Recording the bot run and clearing crawl state when done

use crate::backend::{Backend, BackendSettings, JobBackends};
use crate::config::{CrawlMode, CrawlerConfig, Environment};
use crate::crawler::fetcher::{build_http_client, fetch_page, FetchResult};
use crate::crawler::frontier::Frontier;
use crate::crawler::parser::{extract_links, matches_content};
use crate::crawler::registry::SiteDefinition;
use crate::crawler::useragent::UserAgentPolicy;
use crate::extract::ExtractError;
use crate::ingest::Ingestor;
use crate::metrics::Metrics;
use crate::storage::{lock, BotRun, ProductData, SharedStorage, Storage};
use crate::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use reqwest::Client;
use scraper::Html;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

/// How long an idle queue worker waits before polling again
const QUEUE_IDLE_POLL: Duration = Duration::from_millis(100);

/// Services shared by every crawl job
#[derive(Clone)]
pub struct CrawlServices {
    pub storage: SharedStorage,
    pub ingestor: Arc<Ingestor>,
    pub metrics: Arc<Metrics>,
}

/// Outcome of one crawl job
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    /// Pages fetched successfully
    pub pages: u64,
    /// Products stored
    pub products: u64,
    /// Failed fetches
    pub errors: u64,
    /// The job stopped because of a shutdown request
    pub cancelled: bool,
}

#[derive(Default)]
struct JobCounters {
    pages: AtomicU64,
    products: AtomicU64,
    errors: AtomicU64,
}

/// Links and product found on one fetched page
struct PageAnalysis {
    links: Vec<String>,
    product: std::result::Result<Option<ProductData>, ExtractError>,
}

/// Decides whether a job starts from clean crawl state
///
/// Outside production the state is always cleared. In production it is kept
/// only when the previous run started less than `window` ago.
///
/// # Examples
///
/// ```
/// use chrono::{Duration, Utc};
/// use pricewatch::config::Environment;
/// use pricewatch::crawler::should_clear_storage;
///
/// let now = Utc::now();
/// let window = Duration::hours(12);
/// assert!(!should_clear_storage(Environment::Production, Some(now - Duration::hours(1)), now, window));
/// assert!(should_clear_storage(Environment::Production, Some(now - Duration::hours(13)), now, window));
/// assert!(should_clear_storage(Environment::Development, Some(now), now, window));
/// ```
pub fn should_clear_storage(
    environment: Environment,
    previous_start: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    window: ChronoDuration,
) -> bool {
    if !environment.is_production() {
        return true;
    }
    match previous_start {
        Some(started_at) => now - started_at >= window,
        None => true,
    }
}

/// Crawl job of one site
#[derive(Clone)]
pub struct SiteCrawler {
    site: Arc<SiteDefinition>,
    config: Arc<CrawlerConfig>,
    environment: Environment,
    backend_settings: BackendSettings,
    services: CrawlServices,
    client: Client,
    user_agents: UserAgentPolicy,
}

impl SiteCrawler {
    /// Creates the crawler of a site
    ///
    /// # Arguments
    ///
    /// * `site` - The site definition
    /// * `config` - Crawler settings shared by all sites
    /// * `environment` - Deployment mode, used for the resume decision
    /// * `backend_settings` - Settings for the job's crawl-state backends
    /// * `services` - Relational store, ingestor and metrics
    pub fn new(
        site: Arc<SiteDefinition>,
        config: CrawlerConfig,
        environment: Environment,
        backend_settings: BackendSettings,
        services: CrawlServices,
    ) -> Result<Self> {
        let client = build_http_client(&config)?;
        let user_agents = UserAgentPolicy::new(config.random_user_agent, &config.user_agent);

        Ok(Self {
            site,
            config: Arc::new(config),
            environment,
            backend_settings,
            services,
            client,
            user_agents,
        })
    }

    pub fn site(&self) -> &SiteDefinition {
        &self.site
    }

    /// Runs one crawl job to completion
    ///
    /// # Job Flow
    ///
    /// 1. Look up the previous bot run and decide whether to resume
    /// 2. Record the new run's start
    /// 3. Open both crawl-state roles, clearing them unless resuming
    /// 4. Crawl until the frontier drains or shutdown is requested
    /// 5. Clear crawl state and record the run's finish
    ///
    /// A job interrupted by shutdown keeps its crawl state and is not marked
    /// finished, so the next start can resume it. A job that fails clears
    /// its crawl state before returning the error.
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlSummary)` - The job ended normally or was interrupted
    /// * `Err(PriceError)` - Backend or relational failure
    pub async fn run(&self, cancel: &CancellationToken) -> Result<CrawlSummary> {
        let started_at = Utc::now();
        let site_url = self.site.url.clone();

        let previous = lock(&self.services.storage)?.get_bot_run(&site_url)?;
        let window = ChronoDuration::hours(self.config.resume_window_hours as i64);
        let clear = should_clear_storage(
            self.environment,
            previous.map(|run| run.started_at),
            started_at,
            window,
        );

        lock(&self.services.storage)?.upsert_bot_run(&BotRun {
            url: site_url.clone(),
            started_at,
            finished_at: None,
        })?;

        let backends = JobBackends::open(&self.config, &self.site.host, &self.backend_settings)?;
        if clear {
            backends.clear()?;
        } else {
            info!("Not clearing crawl state of {}, resuming previous run", site_url);
        }

        let _running = self.services.metrics.crawl_running();
        let counters = Arc::new(JobCounters::default());
        info!("Starting crawl of {} in {:?} mode", site_url, self.config.mode);

        let result = match self.config.mode {
            CrawlMode::Parallel => self.run_parallel(&backends, &counters, cancel).await,
            CrawlMode::Queue => self.run_queue(&backends, &counters, !clear, cancel).await,
        };

        let cancelled = cancel.is_cancelled();
        if result.is_err() || !cancelled {
            if let Err(e) = backends.clear() {
                warn!("Failed to clear crawl state of {}: {}", site_url, e);
            }
        }
        result?;

        let summary = CrawlSummary {
            pages: counters.pages.load(Ordering::Relaxed),
            products: counters.products.load(Ordering::Relaxed),
            errors: counters.errors.load(Ordering::Relaxed),
            cancelled,
        };

        if cancelled {
            info!("Crawl of {} interrupted after {} pages", site_url, summary.pages);
            return Ok(summary);
        }

        lock(&self.services.storage)?.upsert_bot_run(&BotRun {
            url: site_url.clone(),
            started_at,
            finished_at: Some(Utc::now()),
        })?;

        info!(
            "Crawl of {} finished: {} pages, {} products, {} errors in {}s",
            site_url,
            summary.pages,
            summary.products,
            summary.errors,
            (Utc::now() - started_at).num_seconds()
        );
        info!("Metrics: {}", self.services.metrics.snapshot());

        Ok(summary)
    }

    /// Drains an in-memory stack with a bounded number of fetch tasks
    async fn run_parallel(
        &self,
        backends: &JobBackends,
        counters: &Arc<JobCounters>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let frontier = Frontier::stack(backends.items.clone());
        frontier.seed(&self.site.url)?;

        let parallelism = self.config.parallelism.max(1);
        let mut tasks: JoinSet<Vec<String>> = JoinSet::new();

        loop {
            if !cancel.is_cancelled() {
                while tasks.len() < parallelism {
                    let Some(url) = frontier.pop()? else {
                        break;
                    };
                    let crawler = self.clone();
                    let items = backends.items.clone();
                    let counters = counters.clone();
                    let cancel = cancel.clone();
                    tasks.spawn(async move { crawler.visit(&url, &items, &counters, &cancel).await });
                }
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            match joined {
                Ok(links) => self.enqueue_links(&frontier, links),
                Err(e) => warn!("Fetch task of {} failed: {}", self.site.url, e),
            }
        }

        Ok(())
    }

    /// Runs a fixed pool of workers over the queue backend
    ///
    /// The job ends when the queue is empty and no worker holds a request.
    async fn run_queue(
        &self,
        backends: &JobBackends,
        counters: &Arc<JobCounters>,
        resume: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let frontier = Arc::new(Frontier::queue(
            backends.items.clone(),
            backends.queue.clone(),
        ));

        let queued = frontier.len()?;
        if resume && queued > 0 {
            info!("Resuming {} with {} queued requests", self.site.url, queued);
        } else {
            frontier.seed(&self.site.url)?;
        }

        let active = Arc::new(AtomicUsize::new(0));
        let mut workers: JoinSet<Result<()>> = JoinSet::new();
        for worker in 0..self.config.queue_workers.max(1) {
            let crawler = self.clone();
            let frontier = frontier.clone();
            let active = active.clone();
            let items = backends.items.clone();
            let counters = counters.clone();
            let cancel = cancel.clone();
            workers.spawn(async move {
                crawler
                    .queue_worker(worker, &frontier, &active, &items, &counters, &cancel)
                    .await
            });
        }

        let mut first_error = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("Queue worker of {} failed: {}", self.site.url, e);
                    first_error.get_or_insert(e);
                }
                Err(e) => warn!("Queue worker of {} panicked: {}", self.site.url, e),
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn queue_worker(
        &self,
        worker: usize,
        frontier: &Frontier,
        active: &AtomicUsize,
        items: &Backend,
        counters: &JobCounters,
        cancel: &CancellationToken,
    ) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            // Count as active before taking a request so an empty queue with
            // no active workers really means the job is drained
            active.fetch_add(1, Ordering::SeqCst);
            let url = match frontier.pop() {
                Ok(Some(url)) => url,
                Ok(None) => {
                    let remaining = active.fetch_sub(1, Ordering::SeqCst) - 1;
                    if remaining == 0 && frontier.is_empty()? {
                        debug!("Queue worker {} of {} done", worker, self.site.url);
                        return Ok(());
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(QUEUE_IDLE_POLL) => {}
                        _ = cancel.cancelled() => return Ok(()),
                    }
                    continue;
                }
                Err(e) => {
                    active.fetch_sub(1, Ordering::SeqCst);
                    return Err(e.into());
                }
            };

            let links = self.visit(&url, items, counters, cancel).await;
            self.enqueue_links(frontier, links);
            active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Fetches one URL and processes the response
    ///
    /// Returns the URLs discovered on the page. Fetch failures are counted
    /// and skipped; extraction and storage failures are logged.
    async fn visit(
        &self,
        url: &str,
        items: &Backend,
        counters: &JobCounters,
        cancel: &CancellationToken,
    ) -> Vec<String> {
        let delay = self.politeness_delay();
        if !delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Vec::new(),
            }
        }

        let user_agent = self.user_agents.pick();
        debug!("Visiting {}", url);

        let (final_url, content_type, body) =
            match fetch_page(&self.client, url, &user_agent, items).await {
                FetchResult::Success {
                    final_url,
                    content_type,
                    body,
                    ..
                } => (final_url, content_type, body),
                FetchResult::HttpError { status_code } => {
                    self.record_fetch_error(counters);
                    warn!("Error scraping {}: HTTP {}", url, status_code);
                    return Vec::new();
                }
                FetchResult::NetworkError { error } => {
                    self.record_fetch_error(counters);
                    warn!("Error scraping {}: {}", url, error);
                    return Vec::new();
                }
            };

        self.services.metrics.response();
        counters.pages.fetch_add(1, Ordering::Relaxed);

        let mut discovered: Vec<String> = self
            .site
            .handlers
            .iter()
            .flat_map(|handler| handler.discover(url, &body))
            .collect();

        if !self.site.allowed.allows(&final_url) {
            debug!("{} redirected off-site to {}", url, final_url);
            return discovered;
        }
        if !is_html(&content_type) {
            return discovered;
        }

        let page = analyze_page(&self.site, &body, &final_url);
        discovered.extend(page.links);

        match page.product {
            Ok(Some(product)) => match self.services.ingestor.store_product(product).await {
                Ok(_) => {
                    counters.products.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => warn!("Error storing product from {}: {}", final_url, e),
            },
            Ok(None) => {}
            Err(e) => warn!("Extraction failed for {}: {}", final_url, e),
        }

        discovered
    }

    fn enqueue_links(&self, frontier: &Frontier, links: Vec<String>) {
        for link in links {
            if !self.site.allowed.allows(&link) {
                continue;
            }
            if let Err(e) = frontier.push(&link) {
                warn!("Failed to queue {}: {}", link, e);
            }
        }
    }

    fn record_fetch_error(&self, counters: &JobCounters) {
        self.services.metrics.fetch_error();
        counters.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Fixed delay plus a random jitter below `random-delay-ms`
    fn politeness_delay(&self) -> Duration {
        let jitter = if self.config.random_delay_ms > 0 {
            rand::thread_rng().gen_range(0..self.config.random_delay_ms)
        } else {
            0
        };
        Duration::from_millis(self.config.delay_ms + jitter)
    }
}

fn is_html(content_type: &str) -> bool {
    content_type.is_empty() || content_type.to_ascii_lowercase().contains("html")
}

/// Parses a page and runs the site's extractor on matching content
fn analyze_page(site: &SiteDefinition, body: &str, page_url: &str) -> PageAnalysis {
    let Ok(base) = Url::parse(page_url) else {
        return PageAnalysis {
            links: Vec::new(),
            product: Ok(None),
        };
    };

    let document = Html::parse_document(body);
    let links = extract_links(&document, &base);
    let product = if matches_content(&document, &site.content) {
        site.extractor.extract(&document, &base)
    } else {
        Ok(None)
    };

    PageAnalysis { links, product }
}
