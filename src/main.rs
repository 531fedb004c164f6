//! Pricewatch main entry point
//!
//! This is the command-line interface for the Pricewatch crawl engine.

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use pricewatch::backend::BackendSettings;
use pricewatch::config::{load_config_with_hash, Config};
use pricewatch::crawler::{supervise_site, CrawlServices, RestartPolicy, SiteCrawler, SiteRegistry};
use pricewatch::ingest::{ImageStore, Ingestor};
use pricewatch::jobs::{Cleaner, IntervalScheduler, PriceChangeDetector, ViewRetention, WatchNotifier};
use pricewatch::notify::build_sender;
use pricewatch::output::{load_statistics, print_statistics};
use pricewatch::search::{SearchIndex, SqliteSearchIndex};
use pricewatch::storage::{open_storage, SharedStorage, SqliteStorage};
use pricewatch::Metrics;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Pricewatch: a price-tracking crawl engine
///
/// Pricewatch crawls the configured shops, keeps the price history of
/// every product it finds and notifies watchers about price drops.
#[derive(Parser, Debug)]
#[command(name = "pricewatch")]
#[command(version = "1.0.0")]
#[command(about = "A price-tracking crawl engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    info!("Loading configuration from: {}", cli.config.display());
    let (config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    info!(
        "Configuration loaded successfully (hash: {}, environment: {:?})",
        hash, config.app.environment
    );

    if cli.dry_run {
        handle_dry_run(&config);
        Ok(())
    } else if cli.stats {
        handle_stats(&config)
    } else {
        handle_run(config).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("pricewatch=info,warn"),
            1 => EnvFilter::new("pricewatch=debug,info"),
            2 => EnvFilter::new("pricewatch=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the resolved configuration
fn handle_dry_run(config: &Config) {
    println!("=== Pricewatch Dry Run ===\n");

    println!("Application:");
    println!("  Environment: {:?}", config.app.environment);
    println!("  Database: {}", config.app.database_path);
    println!("  Search index: {}", config.app.search_path());
    println!("  Images: {} -> {}", config.app.image_dir, config.app.image_base_url);

    let crawler = &config.crawler;
    println!("\nCrawler:");
    println!("  Mode: {:?}", crawler.mode);
    println!("  Parallelism: {}", crawler.parallelism);
    println!("  Queue workers: {}", crawler.queue_workers);
    println!(
        "  Storage: items {:?}, queue {:?}",
        crawler.item_storage, crawler.queue_storage
    );
    println!(
        "  Delay: {}ms + up to {}ms",
        crawler.delay_ms, crawler.random_delay_ms
    );
    if crawler.random_user_agent {
        println!("  User agent: random");
    } else {
        println!("  User agent: {}", crawler.user_agent);
    }

    let schedule = &config.schedule;
    println!("\nJobs:");
    println!("  Price changes every {}h", schedule.price_change_hours);
    println!("  Watchers every {}h", schedule.watcher_hours);
    println!("  View retention every {}h", schedule.view_retention_hours);
    println!("  Cleaner every {}h", schedule.cleaner_hours);
    println!("  Notifications: {:?}", config.notify.sender);

    let active: Vec<_> = config.active_sites().collect();
    println!("\nActive Sites ({} of {}):", active.len(), config.sites.len());
    for site in active {
        println!("  - {} ({})", site.url, site.slug_prefix);
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.app.database_path);

    let storage = SqliteStorage::new(Path::new(&config.app.database_path))?;
    let sites: Vec<&str> = config.sites.iter().map(|s| s.url.as_str()).collect();
    let stats = load_statistics(&storage, &sites)?;
    print_statistics(&stats);

    Ok(())
}

/// Runs the crawlers and periodic jobs until Ctrl-C
async fn handle_run(config: Config) -> anyhow::Result<()> {
    let metrics = Arc::new(Metrics::new());

    let storage = open_storage(Path::new(&config.app.database_path))
        .with_context(|| format!("failed to open {}", config.app.database_path))?;
    let search: Arc<dyn SearchIndex> = Arc::new(
        SqliteSearchIndex::open(Path::new(config.app.search_path()))
            .context("failed to open the search index")?,
    );
    let images = ImageStore::new(&config.app.image_dir, &config.app.image_base_url)?;
    let ingestor = Arc::new(Ingestor::new(
        storage.clone(),
        search.clone(),
        images,
        config.crawler.keep_query_params.clone(),
        metrics.clone(),
    ));

    let registry = SiteRegistry::from_config(&config)?;
    info!("Crawling {} sites", registry.len());

    let cancel = CancellationToken::new();
    let services = CrawlServices {
        storage: storage.clone(),
        ingestor,
        metrics: metrics.clone(),
    };
    let settings = BackendSettings::from_config(&config.crawler, &config.app.database_path);

    let mut crawls = JoinSet::new();
    for site in registry.sites() {
        let crawler = SiteCrawler::new(
            site.clone(),
            config.crawler.clone(),
            config.app.environment,
            settings.clone(),
            services.clone(),
        )?;
        crawls.spawn(supervise_site(crawler, RestartPolicy::default(), cancel.clone()));
    }

    let mut schedulers = build_schedulers(&config, storage, search, metrics.clone())?;
    for scheduler in &mut schedulers {
        scheduler.start();
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    cancel.cancel();

    for scheduler in &mut schedulers {
        scheduler.stop().await;
    }
    while let Some(result) = crawls.join_next().await {
        if let Err(e) = result {
            error!("Site supervisor failed: {}", e);
        }
    }

    info!("Final metrics: {}", metrics.snapshot());
    Ok(())
}

fn hours(count: u64) -> Duration {
    Duration::from_secs(count * 60 * 60)
}

/// Creates one scheduler per periodic job
fn build_schedulers(
    config: &Config,
    storage: SharedStorage,
    search: Arc<dyn SearchIndex>,
    metrics: Arc<Metrics>,
) -> anyhow::Result<Vec<IntervalScheduler>> {
    let schedule = &config.schedule;

    let detector = PriceChangeDetector::new(storage.clone(), metrics.clone(), schedule);
    let price_changes = IntervalScheduler::new(
        "price-change",
        hours(schedule.price_change_hours),
        move |stop| {
            let detector = detector.clone();
            async move {
                match tokio::task::spawn_blocking(move || detector.run(Utc::now(), &stop)).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => error!("Price change job failed: {}", e),
                    Err(e) => error!("Price change job panicked: {}", e),
                }
            }
        },
    );

    let notifier = WatchNotifier::new(
        storage.clone(),
        build_sender(&config.notify)?,
        metrics.clone(),
        schedule,
        &config.notify,
    );
    let watcher = IntervalScheduler::new("watcher", hours(schedule.watcher_hours), move |stop| {
        let notifier = notifier.clone();
        async move {
            if let Err(e) = notifier.run(Utc::now(), &stop).await {
                error!("Watcher job failed: {}", e);
            }
        }
    });

    let retention = ViewRetention::new(storage.clone(), metrics.clone(), schedule);
    let views = IntervalScheduler::new(
        "view-retention",
        hours(schedule.view_retention_hours),
        move |stop| {
            let retention = retention.clone();
            async move {
                match tokio::task::spawn_blocking(move || retention.run(Utc::now(), &stop)).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => error!("View retention job failed: {}", e),
                    Err(e) => error!("View retention job panicked: {}", e),
                }
            }
        },
    );

    let cleaner = Cleaner::new(storage, search, metrics, schedule)?;
    let cleaning = IntervalScheduler::new("cleaner", hours(schedule.cleaner_hours), move |stop| {
        let cleaner = cleaner.clone();
        async move {
            if let Err(e) = cleaner.run(&stop).await {
                error!("Cleaner job failed: {}", e);
            }
        }
    });

    Ok(vec![price_changes, watcher, views, cleaning])
}
