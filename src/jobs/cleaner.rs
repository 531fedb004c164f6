//! Removal of products whose pages are gone
//!
//! The cleaner requests every stored product URL without following
//! redirects. Anything but a 200 removes the product, everything that
//! depends on it and its search document.

use crate::config::ScheduleConfig;
use crate::metrics::Metrics;
use crate::search::SearchIndex;
use crate::storage::{lock, ProductOrder, ProductQuery, ProductRecord, SharedStorage, Storage};
use crate::Result;
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of one cleaner run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanerReport {
    pub checked: usize,
    pub deleted: usize,
    pub errors: usize,
}

/// Periodic job pruning products that no longer resolve
#[derive(Clone)]
pub struct Cleaner {
    storage: SharedStorage,
    search: Arc<dyn SearchIndex>,
    metrics: Arc<Metrics>,
    client: Client,
    delay: Duration,
    page_size: usize,
}

impl Cleaner {
    pub fn new(
        storage: SharedStorage,
        search: Arc<dyn SearchIndex>,
        metrics: Arc<Metrics>,
        schedule: &ScheduleConfig,
    ) -> Result<Self> {
        let client = Client::builder()
            .redirect(Policy::none())
            .timeout(Duration::from_secs(schedule.cleaner_timeout_secs))
            .build()?;

        Ok(Self {
            storage,
            search,
            metrics,
            client,
            delay: Duration::from_millis(schedule.cleaner_delay_ms),
            page_size: schedule.page_size.max(1),
        })
    }

    /// Checks every product once, oldest first
    ///
    /// Products are requested one at a time with a pause before each
    /// request. Request failures are logged and the product is kept.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<CleanerReport> {
        let _running = self.metrics.job_running();
        let mut report = CleanerReport::default();
        let mut offset = 0;

        info!("Cleaning products");

        'pages: loop {
            let query = ProductQuery {
                order: ProductOrder::IdAsc,
                ..ProductQuery::page(self.page_size, offset)
            };
            let products = lock(&self.storage)?.list_products(&query)?;
            if products.is_empty() {
                break;
            }

            let mut deleted_in_page = 0;
            for product in &products {
                tokio::select! {
                    _ = cancel.cancelled() => break 'pages,
                    _ = tokio::time::sleep(self.delay) => {}
                }

                report.checked += 1;
                match self.check(product).await {
                    Ok(true) => {
                        report.deleted += 1;
                        deleted_in_page += 1;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Cleaner could not check {}: {}", product.url, e);
                        report.errors += 1;
                    }
                }
            }

            // Deleted rows shift the remaining products forward
            offset += products.len() - deleted_in_page;
        }

        info!(
            "Cleaning done: {} checked, {} deleted, {} errors",
            report.checked, report.deleted, report.errors
        );
        Ok(report)
    }

    /// Requests one product page; returns true when the product was deleted
    async fn check(&self, product: &ProductRecord) -> Result<bool> {
        let response = self.client.get(&product.url).send().await?;
        let status = response.status();
        if status == StatusCode::OK {
            return Ok(false);
        }

        info!("Deleting {} ({}): status {}", product.id, product.url, status);
        lock(&self.storage)?.delete_product_cascade(product.id)?;
        if let Err(e) = self.search.delete(product.id) {
            warn!("Failed to remove product {} from the index: {}", product.id, e);
        } else {
            debug!("Removed product {} from the index", product.id);
        }
        self.metrics.cleaner_delete();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::search_document;
    use crate::search::SqliteSearchIndex;
    use crate::storage::{ProductData, SqliteStorage};
    use chrono::Utc;
    use std::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn product(url: String, code: &str) -> ProductData {
        ProductData {
            source: "elko.is".to_string(),
            product_code: code.to_string(),
            slug: format!("el-{}", code),
            url,
            title: format!("Vara {}", code),
            price: 1000,
            ..ProductData::default()
        }
    }

    #[tokio::test]
    async fn test_removes_products_that_do_not_resolve() {
        let server = MockServer::start().await;
        for (route, status) in [("/ok", 200), ("/gone", 404), ("/moved", 301), ("/ok2", 200)] {
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(ResponseTemplate::new(status).insert_header("location", "/"))
                .mount(&server)
                .await;
        }

        let storage: SharedStorage = Arc::new(Mutex::new(SqliteStorage::new_in_memory().unwrap()));
        let search = Arc::new(SqliteSearchIndex::open_in_memory().unwrap());
        let mut ids = Vec::new();
        for route in ["ok", "gone", "moved", "ok2"] {
            let data = product(format!("{}/{}", server.uri(), route), route);
            let id = storage
                .lock()
                .unwrap()
                .upsert_product(&data, Utc::now())
                .unwrap()
                .product_id;
            search.index(&search_document(id, &data, Utc::now())).unwrap();
            ids.push(id);
        }

        let metrics = Arc::new(Metrics::new());
        let schedule = ScheduleConfig {
            page_size: 2,
            cleaner_delay_ms: 1,
            ..ScheduleConfig::default()
        };
        let cleaner = Cleaner::new(storage.clone(), search.clone(), metrics.clone(), &schedule).unwrap();
        let report = cleaner.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.checked, 4);
        assert_eq!(report.deleted, 2);
        assert_eq!(metrics.snapshot().cleaner_deletes, 2);

        let db = storage.lock().unwrap();
        assert!(db.get_product(ids[0]).is_ok());
        assert!(db.get_product(ids[1]).is_err());
        assert!(db.get_product(ids[2]).is_err());
        assert!(db.get_product(ids[3]).is_ok());

        let gone = format!("{}/gone", server.uri());
        assert!(search.find_by_url(&gone).unwrap().is_empty());
        let ok = format!("{}/ok", server.uri());
        assert_eq!(search.find_by_url(&ok).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_products_are_kept() {
        let storage: SharedStorage = Arc::new(Mutex::new(SqliteStorage::new_in_memory().unwrap()));
        let id = storage
            .lock()
            .unwrap()
            .upsert_product(&product("http://127.0.0.1:1/vara".to_string(), "x"), Utc::now())
            .unwrap()
            .product_id;

        let schedule = ScheduleConfig {
            cleaner_delay_ms: 1,
            cleaner_timeout_secs: 2,
            ..ScheduleConfig::default()
        };
        let cleaner = Cleaner::new(
            storage.clone(),
            Arc::new(SqliteSearchIndex::open_in_memory().unwrap()),
            Arc::new(Metrics::new()),
            &schedule,
        )
        .unwrap();
        let report = cleaner.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.errors, 1);
        assert!(storage.lock().unwrap().get_product(id).is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_run_stops_early() {
        let storage: SharedStorage = Arc::new(Mutex::new(SqliteStorage::new_in_memory().unwrap()));
        storage
            .lock()
            .unwrap()
            .upsert_product(&product("http://127.0.0.1:1/vara".to_string(), "x"), Utc::now())
            .unwrap();

        let cleaner = Cleaner::new(
            storage,
            Arc::new(SqliteSearchIndex::open_in_memory().unwrap()),
            Arc::new(Metrics::new()),
            &ScheduleConfig::default(),
        )
        .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = cleaner.run(&cancel).await.unwrap();
        assert_eq!(report.checked, 0);
    }
}
