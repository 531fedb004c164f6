//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock shops and test the full crawl
//! job end-to-end: frontier, extraction, ingestion and bot runs.

use crate::common::{mount_html, mount_image, product_page, Harness, IMAGE_BASE_URL};
use chrono::{Duration as ChronoDuration, Utc};
use pricewatch::backend::{BackendSettings, CrawlBackend, JobBackends, QueuedRequest};
use pricewatch::config::{BackendKind, CrawlMode, CrawlerConfig, Environment, SiteConfig};
use pricewatch::crawler::{CrawlServices, SiteCrawler, SiteDefinition};
use pricewatch::search::SearchIndex;
use pricewatch::storage::{BotRun, Storage};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Site definition for the mock shop at `base_url`
fn site(base_url: &str) -> Arc<SiteDefinition> {
    let config: SiteConfig = toml::from_str(&format!(
        r#"
        url = "{}/"
        slug-prefix = "ts"
        content-selector = "div.product"

        [selectors]
        title = "h1"
        code = ".sku"
        price = ".price"
        images = "img.product-image"
        "#,
        base_url
    ))
    .expect("Failed to parse site config");
    Arc::new(SiteDefinition::from_config(&config).expect("Failed to build site"))
}

fn crawler_config(mode: CrawlMode) -> CrawlerConfig {
    CrawlerConfig {
        mode,
        random_delay_ms: 0,
        timeout_secs: 5,
        ..CrawlerConfig::default()
    }
}

fn site_crawler(
    harness: &Harness,
    base_url: &str,
    config: CrawlerConfig,
    environment: Environment,
) -> SiteCrawler {
    let settings = BackendSettings {
        durable_path: harness.dir.path().join("state.db"),
        visited_ttl: None,
    };
    let services = CrawlServices {
        storage: harness.storage.clone(),
        ingestor: harness.ingestor.clone(),
        metrics: harness.metrics.clone(),
    };
    SiteCrawler::new(site(base_url), config, environment, settings, services)
        .expect("Failed to create crawler")
}

/// A home page, two product pages, a dead category page and two images
async fn mount_shop(server: &MockServer) {
    let home = r#"<html><body>
        <a href="/vara/1">Hamar</a>
        <a href="/vara/2">Sög</a>
        <a href="/flokkur/verkfaeri">Verkfæri</a>
        <a href="https://facebook.com/shop">Facebook</a>
        </body></html>"#;
    mount_html(server, "/", home.to_string(), 1).await;
    mount_html(server, "/vara/1", product_page("1", 12990, &["/", "/vara/2#reviews"]), 1).await;
    mount_html(server, "/vara/2", product_page("2", 4990, &["/vara/1"]), 1).await;
    Mock::given(method("GET"))
        .and(path("/flokkur/verkfaeri"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(server)
        .await;
    mount_image(server, "/img/1.jpg", 1).await;
    mount_image(server, "/img/2.jpg", 1).await;
}

fn assert_shop_crawled(harness: &Harness, base_url: &str) {
    let storage = harness.storage.lock().unwrap();

    let hammer = storage
        .get_product_by_url(&format!("{}/vara/1", base_url))
        .unwrap()
        .expect("Product 1 not stored");
    assert_eq!(hammer.title, "Hamar 1");
    assert_eq!(hammer.price, 12990);
    assert_eq!(hammer.source, "127.0.0.1");
    assert!(hammer
        .main_image_url
        .starts_with(&format!("{}/127.0.0.1/", IMAGE_BASE_URL)));

    let saw = storage
        .get_product_by_url(&format!("{}/vara/2", base_url))
        .unwrap()
        .expect("Product 2 not stored");
    assert_eq!(saw.price, 4990);

    assert_eq!(storage.counts().unwrap().products, 2);
    assert_eq!(harness.image_files("127.0.0.1").len(), 2);

    let run = storage
        .get_bot_run(&format!("{}/", base_url))
        .unwrap()
        .expect("Bot run not recorded");
    assert!(run.finished_at.is_some());
    drop(storage);

    let docs = harness
        .search
        .find_by_url(&format!("{}/vara/1", base_url))
        .unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].id, hammer.id);
}

#[tokio::test]
async fn test_parallel_crawl_stores_products() {
    let server = MockServer::start().await;
    mount_shop(&server).await;
    let base_url = server.uri();

    let harness = Harness::new();
    let crawler = site_crawler(
        &harness,
        &base_url,
        crawler_config(CrawlMode::Parallel),
        Environment::Development,
    );
    let summary = crawler.run(&CancellationToken::new()).await.expect("Crawl failed");

    assert_eq!(summary.pages, 3);
    assert_eq!(summary.products, 2);
    assert_eq!(summary.errors, 1);
    assert!(!summary.cancelled);
    assert_shop_crawled(&harness, &base_url);

    let metrics = harness.metrics.snapshot();
    assert_eq!(metrics.products_stored, 2);
    assert_eq!(metrics.fetch_errors, 1);
    assert_eq!(metrics.crawls_running, 0);
}

#[tokio::test]
async fn test_queue_crawl_stores_products() {
    let server = MockServer::start().await;
    mount_shop(&server).await;
    let base_url = server.uri();

    let harness = Harness::new();
    let config = CrawlerConfig {
        item_storage: BackendKind::Durable,
        queue_storage: BackendKind::Durable,
        ..crawler_config(CrawlMode::Queue)
    };
    let crawler = site_crawler(&harness, &base_url, config.clone(), Environment::Development);
    let summary = crawler.run(&CancellationToken::new()).await.expect("Crawl failed");

    assert_eq!(summary.pages, 3);
    assert_eq!(summary.products, 2);
    assert_shop_crawled(&harness, &base_url);

    // Crawl state is wiped once the job finishes
    let settings = BackendSettings {
        durable_path: harness.dir.path().join("state.db"),
        visited_ttl: None,
    };
    let backends = JobBackends::open(&config, "127.0.0.1", &settings).unwrap();
    assert_eq!(backends.queue.queue_size().unwrap(), 0);
}

/// Leaves behind the state of a job interrupted an hour ago
fn interrupted_run(harness: &Harness, base_url: &str, config: &CrawlerConfig) {
    harness
        .storage
        .lock()
        .unwrap()
        .upsert_bot_run(&BotRun {
            url: format!("{}/", base_url),
            started_at: Utc::now() - ChronoDuration::hours(1),
            finished_at: None,
        })
        .unwrap();

    let settings = BackendSettings {
        durable_path: harness.dir.path().join("state.db"),
        visited_ttl: None,
    };
    let backends = JobBackends::open(config, "127.0.0.1", &settings).unwrap();
    backends.clear().unwrap();
    let pending = QueuedRequest::new(format!("{}/vara/2", base_url));
    backends.queue.enqueue(&pending.to_bytes().unwrap()).unwrap();
}

fn durable_queue() -> CrawlerConfig {
    CrawlerConfig {
        item_storage: BackendKind::Durable,
        queue_storage: BackendKind::Durable,
        ..crawler_config(CrawlMode::Queue)
    }
}

#[tokio::test]
async fn test_production_resumes_recent_run() {
    let server = MockServer::start().await;
    mount_html(&server, "/", "<html></html>".to_string(), 0).await;
    mount_html(&server, "/vara/2", product_page("2", 4990, &[]), 1).await;
    mount_image(&server, "/img/2.jpg", 1).await;
    let base_url = server.uri();

    let harness = Harness::new();
    let config = durable_queue();
    interrupted_run(&harness, &base_url, &config);

    let crawler = site_crawler(&harness, &base_url, config, Environment::Production);
    let summary = crawler.run(&CancellationToken::new()).await.expect("Crawl failed");

    assert_eq!(summary.pages, 1);
    assert_eq!(summary.products, 1);
}

#[tokio::test]
async fn test_development_always_starts_over() {
    let server = MockServer::start().await;
    mount_html(&server, "/", r#"<a href="/vara/2">Sög</a>"#.to_string(), 1).await;
    mount_html(&server, "/vara/2", product_page("2", 4990, &[]), 1).await;
    mount_image(&server, "/img/2.jpg", 1).await;
    let base_url = server.uri();

    let harness = Harness::new();
    let config = durable_queue();
    interrupted_run(&harness, &base_url, &config);

    let crawler = site_crawler(&harness, &base_url, config, Environment::Development);
    let summary = crawler.run(&CancellationToken::new()).await.expect("Crawl failed");

    assert_eq!(summary.pages, 2);
    assert_eq!(summary.products, 1);
}

#[tokio::test]
async fn test_interrupted_job_is_not_finished() {
    let server = MockServer::start().await;
    mount_html(&server, "/", "<html></html>".to_string(), 0).await;
    let base_url = server.uri();

    let harness = Harness::new();
    let crawler = site_crawler(
        &harness,
        &base_url,
        crawler_config(CrawlMode::Parallel),
        Environment::Production,
    );

    let cancel = CancellationToken::new();
    cancel.cancel();
    let summary = crawler.run(&cancel).await.expect("Crawl failed");
    assert!(summary.cancelled);
    assert_eq!(summary.pages, 0);

    let run = harness
        .storage
        .lock()
        .unwrap()
        .get_bot_run(&format!("{}/", base_url))
        .unwrap()
        .expect("Bot run not recorded");
    assert!(run.finished_at.is_none());
}
