//! Storage module for products and price history
//!
//! This module handles all relational persistence, including:
//! - SQLite database initialization and schema management
//! - Product upsert with child records and price snapshots
//! - Category taxonomy, price changes and watch subscriptions
//! - Crawl run (bot) records used for the resume decision
//! - View counters and their retention

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Storage shared between tasks
pub type SharedStorage = Arc<Mutex<SqliteStorage>>;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SharedStorage)` - Successfully initialized storage
/// * `Err(StorageError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> StorageResult<SharedStorage> {
    Ok(Arc::new(Mutex::new(SqliteStorage::new(path)?)))
}

/// Locks shared storage, mapping a poisoned lock to an error
pub fn lock(storage: &SharedStorage) -> StorageResult<MutexGuard<'_, SqliteStorage>> {
    storage
        .lock()
        .map_err(|_| StorageError::Database("storage lock poisoned".to_string()))
}

/// A product as produced by a page extractor
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProductData {
    pub source: String,
    pub product_code: String,
    pub slug: String,
    pub url: String,
    pub title: String,
    pub description: String,
    pub main_image_url: String,
    pub price: u64,
    pub on_sale: bool,
    pub specs: Vec<Spec>,
    pub stocks: Vec<Stock>,
    pub images: Vec<ProductImage>,
    pub categories: Vec<Category>,
}

/// A key/value specification row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spec {
    pub key: String,
    pub value: String,
}

/// Availability at one store location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stock {
    pub location: String,
    pub in_stock: bool,
}

/// A product image
///
/// `original_url` is where the image was found; `url` is where it is served
/// from once stored locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductImage {
    pub url: String,
    pub original_url: String,
}

/// A category row attached to a product, also used for taxonomy nodes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub slug: String,
    pub parent: String,
}

/// Represents a stored product
#[derive(Debug, Clone, PartialEq)]
pub struct ProductRecord {
    pub id: i64,
    pub source: String,
    pub product_code: String,
    pub slug: String,
    pub url: String,
    pub title: String,
    pub description: String,
    pub main_image_url: String,
    pub price: u64,
    pub on_sale: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of a product upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub product_id: i64,
    pub created: bool,
    pub snapshot_id: i64,
}

/// One timestamped price observation
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSnapshot {
    pub id: i64,
    pub product_id: i64,
    pub price: u64,
    pub observed_at: DateTime<Utc>,
}

/// The live price change of a product
#[derive(Debug, Clone, PartialEq)]
pub struct PriceChangeRecord {
    pub product_id: i64,
    pub diff: u64,
    pub lower: bool,
    pub reference_date: DateTime<Utc>,
}

/// An email registered for price notifications on one product
#[derive(Debug, Clone, PartialEq)]
pub struct WatchSubscription {
    pub id: i64,
    pub email: String,
    pub product_id: i64,
    pub verified: bool,
    pub verify_hash: String,
    pub unsubscribe_hash: String,
    pub created_at: DateTime<Utc>,
    pub last_notified_at: Option<DateTime<Utc>>,
    pub last_notified_snapshot_id: Option<i64>,
}

/// A view counter row
#[derive(Debug, Clone, PartialEq)]
pub struct ViewCounter {
    pub id: i64,
    pub product_id: i64,
    pub views: u64,
    pub created_at: DateTime<Utc>,
}

/// Start and finish of a site's crawl job
#[derive(Debug, Clone, PartialEq)]
pub struct BotRun {
    pub url: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Ordering of product listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProductOrder {
    #[default]
    IdAsc,
    IdDesc,
    PriceAsc,
    PriceDesc,
    UpdatedDesc,
}

impl ProductOrder {
    pub(crate) fn to_sql(self) -> &'static str {
        match self {
            ProductOrder::IdAsc => "p.id ASC",
            ProductOrder::IdDesc => "p.id DESC",
            ProductOrder::PriceAsc => "p.price ASC, p.id ASC",
            ProductOrder::PriceDesc => "p.price DESC, p.id ASC",
            ProductOrder::UpdatedDesc => "p.updated_at DESC, p.id DESC",
        }
    }
}

/// Filters and paging for product listings
#[derive(Debug, Clone, Default)]
pub struct ProductQuery {
    pub min_price: Option<u64>,
    pub max_price: Option<u64>,
    pub source: Option<String>,
    /// Matches products with a category row of this slug
    pub category_slug: Option<String>,
    pub on_sale: Option<bool>,
    pub order: ProductOrder,
    pub limit: usize,
    pub offset: usize,
}

impl ProductQuery {
    /// A plain page of products ordered by id
    pub fn page(limit: usize, offset: usize) -> Self {
        Self {
            limit,
            offset,
            ..Self::default()
        }
    }
}

/// Row counts shown by `--stats`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageCounts {
    pub products: u64,
    pub snapshots: u64,
    pub price_changes: u64,
    pub taxonomy_nodes: u64,
    pub subscriptions: u64,
    pub verified_subscriptions: u64,
    pub bot_runs: u64,
    pub view_counters: u64,
}
