//! Price change detection
//!
//! Compares each product's newest price with its recent history and keeps
//! one live price change record per product.

use crate::config::ScheduleConfig;
use crate::extract::price_diff;
use crate::metrics::Metrics;
use crate::storage::{
    lock, PriceChangeRecord, PriceSnapshot, ProductOrder, ProductQuery, SharedStorage, Storage,
};
use crate::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Derives the price change of a product from its snapshots
///
/// `snapshots` must be ordered newest first. The first older snapshot whose
/// price differs from the newest one is the reference; when every older
/// snapshot has the same price the oldest one is, with a zero diff. A
/// product with fewer than two snapshots has no price change.
///
/// # Example
///
/// ```
/// use chrono::{Duration, Utc};
/// use pricewatch::jobs::detect_price_change;
/// use pricewatch::storage::PriceSnapshot;
///
/// let now = Utc::now();
/// let snapshots: Vec<PriceSnapshot> = [(3, 900), (2, 1000), (1, 1000)]
///     .into_iter()
///     .map(|(id, price)| PriceSnapshot {
///         id,
///         product_id: 7,
///         price,
///         observed_at: now - Duration::hours(10 - id),
///     })
///     .collect();
///
/// let change = detect_price_change(7, &snapshots).unwrap();
/// assert_eq!(change.diff, 100);
/// assert!(change.lower);
/// assert_eq!(change.reference_date, snapshots[1].observed_at);
/// ```
pub fn detect_price_change(product_id: i64, snapshots: &[PriceSnapshot]) -> Option<PriceChangeRecord> {
    let (newest, older) = snapshots.split_first()?;

    if let Some(reference) = older.iter().find(|s| s.price != newest.price) {
        return Some(PriceChangeRecord {
            product_id,
            diff: price_diff(newest.price, reference.price),
            lower: newest.price < reference.price,
            reference_date: reference.observed_at,
        });
    }

    older.last().map(|oldest| PriceChangeRecord {
        product_id,
        diff: 0,
        lower: false,
        reference_date: oldest.observed_at,
    })
}

/// Outcome of one detector run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PriceChangeReport {
    pub products: usize,
    pub changes: usize,
    pub errors: usize,
}

/// Periodic job recomputing the price change of every product
#[derive(Clone)]
pub struct PriceChangeDetector {
    storage: SharedStorage,
    metrics: Arc<Metrics>,
    window: chrono::Duration,
    page_size: usize,
}

impl PriceChangeDetector {
    pub fn new(storage: SharedStorage, metrics: Arc<Metrics>, schedule: &ScheduleConfig) -> Self {
        Self {
            storage,
            metrics,
            window: chrono::Duration::hours(schedule.price_window_hours as i64),
            page_size: schedule.page_size.max(1),
        }
    }

    /// Scans all products newest first, page by page
    ///
    /// Blocking; run it on a blocking thread. A failure on one product is
    /// logged and the scan continues; failing to load a page ends the run.
    pub fn run(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> Result<PriceChangeReport> {
        let _running = self.metrics.job_running();
        let since = now - self.window;
        let mut report = PriceChangeReport::default();
        let mut offset = 0;

        info!("Detecting price changes since {}", since);

        while !cancel.is_cancelled() {
            let query = ProductQuery {
                order: ProductOrder::IdDesc,
                ..ProductQuery::page(self.page_size, offset)
            };
            let products = lock(&self.storage)?.list_products(&query)?;
            if products.is_empty() {
                break;
            }

            for product in &products {
                report.products += 1;
                match self.update_product(product.id, since) {
                    Ok(true) => report.changes += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Price change of product {} failed: {}", product.id, e);
                        report.errors += 1;
                    }
                }
            }

            offset += products.len();
        }

        info!(
            "Price changes done: {} products, {} records, {} errors",
            report.products, report.changes, report.errors
        );
        Ok(report)
    }

    fn update_product(&self, product_id: i64, since: DateTime<Utc>) -> Result<bool> {
        let mut storage = lock(&self.storage)?;
        let snapshots = storage.get_prices(product_id, since)?;

        let Some(change) = detect_price_change(product_id, &snapshots) else {
            return Ok(false);
        };

        debug!(
            "Product {}: diff {} ({})",
            product_id,
            change.diff,
            if change.lower { "lower" } else { "higher" }
        );
        storage.upsert_price_change(&change)?;
        self.metrics.price_change();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ProductData, SqliteStorage};
    use chrono::Duration;
    use std::sync::Mutex;

    fn snapshots(prices: &[u64]) -> Vec<PriceSnapshot> {
        let now = Utc::now();
        let count = prices.len() as i64;
        prices
            .iter()
            .enumerate()
            .map(|(i, &price)| PriceSnapshot {
                id: count - i as i64,
                product_id: 1,
                price,
                observed_at: now - Duration::hours(i as i64),
            })
            .collect()
    }

    #[test]
    fn test_first_differing_snapshot_is_reference() {
        // Observed 100, 100, 90, 90, 80 in that order
        let history = snapshots(&[80, 90, 90, 100, 100]);
        let change = detect_price_change(1, &history).unwrap();

        assert_eq!(change.diff, 10);
        assert!(change.lower);
        assert_eq!(change.reference_date, history[1].observed_at);
    }

    #[test]
    fn test_price_rise_is_not_lower() {
        let history = snapshots(&[120, 120, 100]);
        let change = detect_price_change(1, &history).unwrap();

        assert_eq!(change.diff, 20);
        assert!(!change.lower);
        assert_eq!(change.reference_date, history[2].observed_at);
    }

    #[test]
    fn test_unchanged_price_references_oldest() {
        let history = snapshots(&[500, 500, 500]);
        let change = detect_price_change(1, &history).unwrap();

        assert_eq!(change.diff, 0);
        assert!(!change.lower);
        assert_eq!(change.reference_date, history[2].observed_at);
    }

    #[test]
    fn test_too_few_snapshots() {
        assert_eq!(detect_price_change(1, &[]), None);
        assert_eq!(detect_price_change(1, &snapshots(&[100])), None);
    }

    fn product(url: &str, price: u64) -> ProductData {
        ProductData {
            source: "elko.is".to_string(),
            product_code: url.to_string(),
            slug: format!("el-{}", url.rsplit('/').next().unwrap_or(url)),
            url: url.to_string(),
            title: "Ryksuga".to_string(),
            price,
            ..ProductData::default()
        }
    }

    #[test]
    fn test_run_stores_one_record_per_product() {
        let storage = Arc::new(Mutex::new(SqliteStorage::new_in_memory().unwrap()));
        let now = Utc::now();
        let (first, second, single) = {
            let mut db = storage.lock().unwrap();
            let first = db
                .upsert_product(&product("https://elko.is/a", 1000), now - Duration::hours(5))
                .unwrap()
                .product_id;
            db.upsert_product(&product("https://elko.is/a", 800), now - Duration::hours(1))
                .unwrap();
            let second = db
                .upsert_product(&product("https://elko.is/b", 300), now - Duration::hours(4))
                .unwrap()
                .product_id;
            db.upsert_product(&product("https://elko.is/b", 300), now - Duration::hours(2))
                .unwrap();
            let single = db
                .upsert_product(&product("https://elko.is/c", 50), now - Duration::hours(2))
                .unwrap()
                .product_id;
            (first, second, single)
        };

        let metrics = Arc::new(Metrics::new());
        let schedule = ScheduleConfig {
            page_size: 2,
            ..ScheduleConfig::default()
        };
        let detector = PriceChangeDetector::new(storage.clone(), metrics.clone(), &schedule);
        let report = detector.run(now, &CancellationToken::new()).unwrap();

        assert_eq!(report.products, 3);
        assert_eq!(report.changes, 2);
        assert_eq!(metrics.snapshot().price_changes, 2);

        let db = storage.lock().unwrap();
        let change = db.get_price_change(first).unwrap().unwrap();
        assert_eq!(change.diff, 200);
        assert!(change.lower);
        let change = db.get_price_change(second).unwrap().unwrap();
        assert_eq!(change.diff, 0);
        assert!(db.get_price_change(single).unwrap().is_none());
    }

    #[test]
    fn test_snapshots_outside_window_are_ignored() {
        let storage = Arc::new(Mutex::new(SqliteStorage::new_in_memory().unwrap()));
        let now = Utc::now();
        let id = {
            let mut db = storage.lock().unwrap();
            let id = db
                .upsert_product(&product("https://elko.is/a", 1000), now - Duration::days(30))
                .unwrap()
                .product_id;
            db.upsert_product(&product("https://elko.is/a", 800), now - Duration::hours(1))
                .unwrap();
            id
        };

        let detector = PriceChangeDetector::new(
            storage.clone(),
            Arc::new(Metrics::new()),
            &ScheduleConfig::default(),
        );
        let report = detector.run(now, &CancellationToken::new()).unwrap();

        assert_eq!(report.changes, 0);
        assert!(storage.lock().unwrap().get_price_change(id).unwrap().is_none());
    }
}
