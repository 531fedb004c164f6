//! Storage traits and error types
//!
//! This module defines the trait interface for the relational store and
//! associated error types.

use crate::storage::{
    BotRun, Category, PriceChangeRecord, PriceSnapshot, ProductData, ProductImage, ProductQuery,
    ProductRecord, Spec, Stock, StorageCounts, UpsertOutcome, WatchSubscription,
};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Product not found: {0}")]
    ProductNotFound(i64),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("Invalid timestamp: {0}")]
    Timestamp(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for relational store implementations
///
/// This trait defines every database operation needed by the crawler and
/// the periodic jobs.
pub trait Storage {
    // ===== Products =====

    /// Inserts a product or updates the one stored under the same URL
    ///
    /// A new product gets all of its child rows and a first price snapshot.
    /// An existing product has its scalars updated, its specs, stocks, images
    /// and category rows replaced, and exactly one snapshot appended. The
    /// product's categories are also added to the global taxonomy when the
    /// exact (name, slug, parent) triple is absent.
    ///
    /// # Arguments
    ///
    /// * `product` - The product, already carrying its canonical URL
    /// * `observed_at` - Time of the price observation
    fn upsert_product(
        &mut self,
        product: &ProductData,
        observed_at: DateTime<Utc>,
    ) -> StorageResult<UpsertOutcome>;

    /// Gets a product by ID
    fn get_product(&self, product_id: i64) -> StorageResult<ProductRecord>;

    /// Gets a product by canonical URL
    fn get_product_by_url(&self, url: &str) -> StorageResult<Option<ProductRecord>>;

    /// Gets a product by its public slug
    fn get_product_by_slug(&self, slug: &str) -> StorageResult<Option<ProductRecord>>;

    /// Gets all products sharing a (source, product code) identity
    fn find_products_by_code(
        &self,
        source: &str,
        product_code: &str,
    ) -> StorageResult<Vec<ProductRecord>>;

    /// Lists products matching a filtered, ordered, paginated query
    fn list_products(&self, query: &ProductQuery) -> StorageResult<Vec<ProductRecord>>;

    /// Gets the images of a product in their stored order
    fn get_product_images(&self, product_id: i64) -> StorageResult<Vec<ProductImage>>;

    /// Gets the category rows of a product
    fn get_product_categories(&self, product_id: i64) -> StorageResult<Vec<Category>>;

    /// Gets the specs of a product
    fn get_product_specs(&self, product_id: i64) -> StorageResult<Vec<Spec>>;

    /// Gets the stocks of a product
    fn get_product_stocks(&self, product_id: i64) -> StorageResult<Vec<Stock>>;

    /// Deletes a product and every row that depends on it
    fn delete_product_cascade(&mut self, product_id: i64) -> StorageResult<()>;

    // ===== Price History =====

    /// Gets price snapshots of a product observed at or after `since`
    ///
    /// Snapshots are returned newest first.
    fn get_prices(&self, product_id: i64, since: DateTime<Utc>)
        -> StorageResult<Vec<PriceSnapshot>>;

    /// Creates or overwrites the live price change of a product
    fn upsert_price_change(&mut self, change: &PriceChangeRecord) -> StorageResult<()>;

    /// Gets the live price change of a product
    fn get_price_change(&self, product_id: i64) -> StorageResult<Option<PriceChangeRecord>>;

    // ===== Category Taxonomy =====

    /// Inserts a taxonomy node unless the exact triple already exists
    ///
    /// Returns true when a node was inserted.
    fn insert_taxonomy_node(&mut self, node: &Category) -> StorageResult<bool>;

    /// Gets the taxonomy nodes with a slug
    fn get_taxonomy_nodes(&self, slug: &str) -> StorageResult<Vec<Category>>;

    /// Lists the whole taxonomy
    fn list_taxonomy(&self) -> StorageResult<Vec<Category>>;

    // ===== Watch Subscriptions =====

    /// Creates an unverified subscription with fresh random hashes
    fn create_subscription(
        &mut self,
        email: &str,
        product_id: i64,
    ) -> StorageResult<WatchSubscription>;

    /// Gets a subscription by its verify hash
    fn get_subscription_by_verify_hash(&self, hash: &str)
        -> StorageResult<Option<WatchSubscription>>;

    /// Gets a subscription by its unsubscribe hash
    fn get_subscription_by_unsubscribe_hash(
        &self,
        hash: &str,
    ) -> StorageResult<Option<WatchSubscription>>;

    /// Marks the subscription with this verify hash as verified
    fn verify_subscription(&mut self, verify_hash: &str) -> StorageResult<bool>;

    /// Deletes the subscription with this unsubscribe hash
    fn unsubscribe(&mut self, unsubscribe_hash: &str) -> StorageResult<bool>;

    /// Lists verified subscriptions ordered by id
    fn list_verified_subscriptions(
        &self,
        limit: usize,
        offset: usize,
    ) -> StorageResult<Vec<WatchSubscription>>;

    /// Records that a subscription was notified about a snapshot
    ///
    /// The update only applies while the stored snapshot pointer still equals
    /// `expected_snapshot_id`. Returns true when the row was updated.
    fn mark_notified(
        &mut self,
        subscription_id: i64,
        expected_snapshot_id: Option<i64>,
        snapshot_id: i64,
        notified_at: DateTime<Utc>,
    ) -> StorageResult<bool>;

    // ===== Bot Runs =====

    /// Gets the crawl run record of a site
    fn get_bot_run(&self, url: &str) -> StorageResult<Option<BotRun>>;

    /// Creates or replaces the crawl run record of a site
    fn upsert_bot_run(&mut self, run: &BotRun) -> StorageResult<()>;

    // ===== View Counters =====

    /// Adds one view to a product
    fn increment_views(&mut self, product_id: i64) -> StorageResult<()>;

    /// Total views of a product across live counter rows
    fn get_views(&self, product_id: i64) -> StorageResult<u64>;

    /// Deletes up to `batch` counter rows created before `cutoff`
    ///
    /// Returns the number of rows deleted.
    fn purge_views_before(&mut self, cutoff: DateTime<Utc>, batch: usize) -> StorageResult<usize>;

    // ===== Statistics =====

    /// Counts rows in the main tables
    fn counts(&self) -> StorageResult<StorageCounts>;
}
