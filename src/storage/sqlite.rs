//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    BotRun, Category, PriceChangeRecord, PriceSnapshot, ProductData, ProductImage, ProductQuery,
    ProductRecord, Spec, Stock, StorageCounts, UpsertOutcome, WatchSubscription,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rusqlite::types::{ToSql, Type};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;

const PRODUCT_COLUMNS: &str = "p.id, p.source, p.product_code, p.slug, p.url, p.title, \
     p.description, p.main_image_url, p.price, p.on_sale, p.created_at, p.updated_at";

const SUBSCRIPTION_COLUMNS: &str = "id, email, product_id, verified, verify_hash, \
     unsubscribe_hash, created_at, last_notified_at, last_notified_snapshot_id";

const HASH_LENGTH: usize = 40;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn delete_children(&mut self, product_id: i64) -> StorageResult<()> {
        for table in ["specs", "stocks", "images", "categories"] {
            self.conn.execute(
                &format!("DELETE FROM {} WHERE product_id = ?1", table),
                params![product_id],
            )?;
        }
        Ok(())
    }

    fn insert_children(&mut self, product_id: i64, product: &ProductData) -> StorageResult<()> {
        for spec in &product.specs {
            self.conn.execute(
                "INSERT INTO specs (product_id, key, value) VALUES (?1, ?2, ?3)",
                params![product_id, spec.key, spec.value],
            )?;
        }

        for stock in &product.stocks {
            self.conn.execute(
                "INSERT INTO stocks (product_id, location, in_stock) VALUES (?1, ?2, ?3)",
                params![product_id, stock.location, stock.in_stock],
            )?;
        }

        for (position, image) in product.images.iter().enumerate() {
            self.conn.execute(
                "INSERT INTO images (product_id, position, url, original_url) VALUES (?1, ?2, ?3, ?4)",
                params![product_id, position as i64, image.url, image.original_url],
            )?;
        }

        for category in &product.categories {
            self.conn.execute(
                "INSERT INTO categories (product_id, name, slug, parent) VALUES (?1, ?2, ?3, ?4)",
                params![product_id, category.name, category.slug, category.parent],
            )?;
        }

        Ok(())
    }

    fn get_subscription_where(
        &self,
        column: &str,
        value: &str,
    ) -> StorageResult<Option<WatchSubscription>> {
        let sql = format!(
            "SELECT {} FROM watch_subscriptions WHERE {} = ?1",
            SUBSCRIPTION_COLUMNS, column
        );
        Ok(self
            .conn
            .query_row(&sql, params![value], subscription_from_row)
            .optional()?)
    }

    fn count(&self, sql: &str) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl Storage for SqliteStorage {
    // ===== Products =====

    fn upsert_product(
        &mut self,
        product: &ProductData,
        observed_at: DateTime<Utc>,
    ) -> StorageResult<UpsertOutcome> {
        for node in &product.categories {
            self.insert_taxonomy_node(node)?;
        }

        let now = to_db_time(observed_at);
        let inserted = self
            .conn
            .execute(
                "INSERT INTO products (source, product_code, slug, url, title, description,
                     main_image_url, price, on_sale, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
                 ON CONFLICT(url) DO NOTHING",
                params![
                    product.source,
                    product.product_code,
                    product.slug,
                    product.url,
                    product.title,
                    product.description,
                    product.main_image_url,
                    product.price as i64,
                    product.on_sale,
                    now,
                ],
            )
            .map_err(constraint_error)?;

        let (product_id, created) = if inserted == 1 {
            (self.conn.last_insert_rowid(), true)
        } else {
            let product_id: i64 = self
                .conn
                .query_row(
                    "UPDATE products SET source = ?1, product_code = ?2, slug = ?3, title = ?4,
                         description = ?5, main_image_url = ?6, price = ?7, on_sale = ?8,
                         updated_at = ?9
                     WHERE url = ?10
                     RETURNING id",
                    params![
                        product.source,
                        product.product_code,
                        product.slug,
                        product.title,
                        product.description,
                        product.main_image_url,
                        product.price as i64,
                        product.on_sale,
                        now,
                        product.url,
                    ],
                    |row| row.get(0),
                )
                .map_err(constraint_error)?;
            self.delete_children(product_id)?;
            (product_id, false)
        };

        self.insert_children(product_id, product)?;

        self.conn.execute(
            "INSERT INTO prices (product_id, price, observed_at) VALUES (?1, ?2, ?3)",
            params![product_id, product.price as i64, now],
        )?;
        let snapshot_id = self.conn.last_insert_rowid();

        Ok(UpsertOutcome {
            product_id,
            created,
            snapshot_id,
        })
    }

    fn get_product(&self, product_id: i64) -> StorageResult<ProductRecord> {
        let sql = format!("SELECT {} FROM products p WHERE p.id = ?1", PRODUCT_COLUMNS);
        self.conn
            .query_row(&sql, params![product_id], product_from_row)
            .optional()?
            .ok_or(StorageError::ProductNotFound(product_id))
    }

    fn get_product_by_url(&self, url: &str) -> StorageResult<Option<ProductRecord>> {
        let sql = format!("SELECT {} FROM products p WHERE p.url = ?1", PRODUCT_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![url], product_from_row)
            .optional()?)
    }

    fn get_product_by_slug(&self, slug: &str) -> StorageResult<Option<ProductRecord>> {
        let sql = format!("SELECT {} FROM products p WHERE p.slug = ?1", PRODUCT_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![slug], product_from_row)
            .optional()?)
    }

    fn find_products_by_code(
        &self,
        source: &str,
        product_code: &str,
    ) -> StorageResult<Vec<ProductRecord>> {
        let sql = format!(
            "SELECT {} FROM products p WHERE p.source = ?1 AND p.product_code = ?2 ORDER BY p.id",
            PRODUCT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let products = stmt
            .query_map(params![source, product_code], product_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(products)
    }

    fn list_products(&self, query: &ProductQuery) -> StorageResult<Vec<ProductRecord>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(min) = query.min_price {
            clauses.push("p.price >= ?");
            values.push(Box::new(min as i64));
        }
        if let Some(max) = query.max_price {
            clauses.push("p.price <= ?");
            values.push(Box::new(max as i64));
        }
        if let Some(source) = &query.source {
            clauses.push("p.source = ?");
            values.push(Box::new(source.clone()));
        }
        if let Some(slug) = &query.category_slug {
            clauses.push(
                "EXISTS (SELECT 1 FROM categories c WHERE c.product_id = p.id AND c.slug = ?)",
            );
            values.push(Box::new(slug.clone()));
        }
        if let Some(on_sale) = query.on_sale {
            clauses.push("p.on_sale = ?");
            values.push(Box::new(on_sale));
        }

        let filter = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let sql = format!(
            "SELECT {} FROM products p {} ORDER BY {} LIMIT ? OFFSET ?",
            PRODUCT_COLUMNS,
            filter,
            query.order.to_sql()
        );
        values.push(Box::new(query.limit as i64));
        values.push(Box::new(query.offset as i64));

        let mut stmt = self.conn.prepare(&sql)?;
        let products = stmt
            .query_map(params_from_iter(values.iter()), product_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(products)
    }

    fn get_product_images(&self, product_id: i64) -> StorageResult<Vec<ProductImage>> {
        let mut stmt = self.conn.prepare(
            "SELECT url, original_url FROM images WHERE product_id = ?1 ORDER BY position",
        )?;
        let images = stmt
            .query_map(params![product_id], |row| {
                Ok(ProductImage {
                    url: row.get(0)?,
                    original_url: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(images)
    }

    fn get_product_categories(&self, product_id: i64) -> StorageResult<Vec<Category>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, slug, parent FROM categories WHERE product_id = ?1 ORDER BY id",
        )?;
        let categories = stmt
            .query_map(params![product_id], category_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(categories)
    }

    fn get_product_specs(&self, product_id: i64) -> StorageResult<Vec<Spec>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM specs WHERE product_id = ?1 ORDER BY id")?;
        let specs = stmt
            .query_map(params![product_id], |row| {
                Ok(Spec {
                    key: row.get(0)?,
                    value: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(specs)
    }

    fn get_product_stocks(&self, product_id: i64) -> StorageResult<Vec<Stock>> {
        let mut stmt = self
            .conn
            .prepare("SELECT location, in_stock FROM stocks WHERE product_id = ?1 ORDER BY id")?;
        let stocks = stmt
            .query_map(params![product_id], |row| {
                Ok(Stock {
                    location: row.get(0)?,
                    in_stock: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(stocks)
    }

    fn delete_product_cascade(&mut self, product_id: i64) -> StorageResult<()> {
        for table in [
            "prices",
            "images",
            "stocks",
            "specs",
            "categories",
            "watch_subscriptions",
            "view_counters",
            "price_changes",
        ] {
            self.conn.execute(
                &format!("DELETE FROM {} WHERE product_id = ?1", table),
                params![product_id],
            )?;
        }

        let deleted = self
            .conn
            .execute("DELETE FROM products WHERE id = ?1", params![product_id])?;
        if deleted == 0 {
            return Err(StorageError::ProductNotFound(product_id));
        }
        Ok(())
    }

    // ===== Price History =====

    fn get_prices(
        &self,
        product_id: i64,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<PriceSnapshot>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, product_id, price, observed_at FROM prices
             WHERE product_id = ?1 AND observed_at >= ?2
             ORDER BY id DESC",
        )?;
        let prices = stmt
            .query_map(params![product_id, to_db_time(since)], |row| {
                Ok(PriceSnapshot {
                    id: row.get(0)?,
                    product_id: row.get(1)?,
                    price: row.get::<_, i64>(2)? as u64,
                    observed_at: time_column(row, 3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(prices)
    }

    fn upsert_price_change(&mut self, change: &PriceChangeRecord) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO price_changes (product_id, diff, lower, reference_date, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(product_id) DO UPDATE SET
                 diff = excluded.diff,
                 lower = excluded.lower,
                 reference_date = excluded.reference_date,
                 updated_at = excluded.updated_at",
            params![
                change.product_id,
                change.diff as i64,
                change.lower,
                to_db_time(change.reference_date),
                to_db_time(Utc::now()),
            ],
        )?;
        Ok(())
    }

    fn get_price_change(&self, product_id: i64) -> StorageResult<Option<PriceChangeRecord>> {
        Ok(self
            .conn
            .query_row(
                "SELECT product_id, diff, lower, reference_date FROM price_changes
                 WHERE product_id = ?1",
                params![product_id],
                |row| {
                    Ok(PriceChangeRecord {
                        product_id: row.get(0)?,
                        diff: row.get::<_, i64>(1)? as u64,
                        lower: row.get(2)?,
                        reference_date: time_column(row, 3)?,
                    })
                },
            )
            .optional()?)
    }

    // ===== Category Taxonomy =====

    fn insert_taxonomy_node(&mut self, node: &Category) -> StorageResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO taxonomy (name, slug, parent) VALUES (?1, ?2, ?3)",
            params![node.name, node.slug, node.parent],
        )?;
        Ok(inserted == 1)
    }

    fn get_taxonomy_nodes(&self, slug: &str) -> StorageResult<Vec<Category>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, slug, parent FROM taxonomy WHERE slug = ?1 ORDER BY id")?;
        let nodes = stmt
            .query_map(params![slug], category_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(nodes)
    }

    fn list_taxonomy(&self) -> StorageResult<Vec<Category>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, slug, parent FROM taxonomy ORDER BY id")?;
        let nodes = stmt
            .query_map([], category_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(nodes)
    }

    // ===== Watch Subscriptions =====

    fn create_subscription(
        &mut self,
        email: &str,
        product_id: i64,
    ) -> StorageResult<WatchSubscription> {
        let verify_hash = random_hash();
        let unsubscribe_hash = random_hash();

        self.conn
            .execute(
                "INSERT INTO watch_subscriptions
                     (email, product_id, verified, verify_hash, unsubscribe_hash, created_at)
                 VALUES (?1, ?2, 0, ?3, ?4, ?5)",
                params![
                    email,
                    product_id,
                    verify_hash,
                    unsubscribe_hash,
                    to_db_time(Utc::now())
                ],
            )
            .map_err(constraint_error)?;

        self.get_subscription_where("verify_hash", &verify_hash)?
            .ok_or(StorageError::SubscriptionNotFound(verify_hash))
    }

    fn get_subscription_by_verify_hash(
        &self,
        hash: &str,
    ) -> StorageResult<Option<WatchSubscription>> {
        self.get_subscription_where("verify_hash", hash)
    }

    fn get_subscription_by_unsubscribe_hash(
        &self,
        hash: &str,
    ) -> StorageResult<Option<WatchSubscription>> {
        self.get_subscription_where("unsubscribe_hash", hash)
    }

    fn verify_subscription(&mut self, verify_hash: &str) -> StorageResult<bool> {
        let updated = self.conn.execute(
            "UPDATE watch_subscriptions SET verified = 1 WHERE verify_hash = ?1",
            params![verify_hash],
        )?;
        Ok(updated == 1)
    }

    fn unsubscribe(&mut self, unsubscribe_hash: &str) -> StorageResult<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM watch_subscriptions WHERE unsubscribe_hash = ?1",
            params![unsubscribe_hash],
        )?;
        Ok(deleted == 1)
    }

    fn list_verified_subscriptions(
        &self,
        limit: usize,
        offset: usize,
    ) -> StorageResult<Vec<WatchSubscription>> {
        let sql = format!(
            "SELECT {} FROM watch_subscriptions WHERE verified = 1 ORDER BY id LIMIT ?1 OFFSET ?2",
            SUBSCRIPTION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let subscriptions = stmt
            .query_map(params![limit as i64, offset as i64], subscription_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(subscriptions)
    }

    fn mark_notified(
        &mut self,
        subscription_id: i64,
        expected_snapshot_id: Option<i64>,
        snapshot_id: i64,
        notified_at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let updated = self.conn.execute(
            "UPDATE watch_subscriptions
             SET last_notified_at = ?1, last_notified_snapshot_id = ?2
             WHERE id = ?3 AND last_notified_snapshot_id IS ?4",
            params![
                to_db_time(notified_at),
                snapshot_id,
                subscription_id,
                expected_snapshot_id
            ],
        )?;
        Ok(updated == 1)
    }

    // ===== Bot Runs =====

    fn get_bot_run(&self, url: &str) -> StorageResult<Option<BotRun>> {
        Ok(self
            .conn
            .query_row(
                "SELECT url, started_at, finished_at FROM bot_runs WHERE url = ?1",
                params![url],
                |row| {
                    Ok(BotRun {
                        url: row.get(0)?,
                        started_at: time_column(row, 1)?,
                        finished_at: optional_time_column(row, 2)?,
                    })
                },
            )
            .optional()?)
    }

    fn upsert_bot_run(&mut self, run: &BotRun) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO bot_runs (url, started_at, finished_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(url) DO UPDATE SET
                 started_at = excluded.started_at,
                 finished_at = excluded.finished_at",
            params![
                run.url,
                to_db_time(run.started_at),
                run.finished_at.map(to_db_time)
            ],
        )?;
        Ok(())
    }

    // ===== View Counters =====

    fn increment_views(&mut self, product_id: i64) -> StorageResult<()> {
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO view_counters (product_id, day, views, created_at)
             VALUES (?1, ?2, 1, ?3)
             ON CONFLICT(product_id, day) DO UPDATE SET views = views + 1",
            params![
                product_id,
                now.format("%Y-%m-%d").to_string(),
                to_db_time(now)
            ],
        )?;
        Ok(())
    }

    fn get_views(&self, product_id: i64) -> StorageResult<u64> {
        let views: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(views), 0) FROM view_counters WHERE product_id = ?1",
            params![product_id],
            |row| row.get(0),
        )?;
        Ok(views as u64)
    }

    fn purge_views_before(&mut self, cutoff: DateTime<Utc>, batch: usize) -> StorageResult<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM view_counters WHERE id IN (
                 SELECT id FROM view_counters WHERE created_at < ?1 ORDER BY id LIMIT ?2
             )",
            params![to_db_time(cutoff), batch as i64],
        )?;
        Ok(deleted)
    }

    // ===== Statistics =====

    fn counts(&self) -> StorageResult<StorageCounts> {
        Ok(StorageCounts {
            products: self.count("SELECT COUNT(*) FROM products")?,
            snapshots: self.count("SELECT COUNT(*) FROM prices")?,
            price_changes: self.count("SELECT COUNT(*) FROM price_changes")?,
            taxonomy_nodes: self.count("SELECT COUNT(*) FROM taxonomy")?,
            subscriptions: self.count("SELECT COUNT(*) FROM watch_subscriptions")?,
            verified_subscriptions: self
                .count("SELECT COUNT(*) FROM watch_subscriptions WHERE verified = 1")?,
            bot_runs: self.count("SELECT COUNT(*) FROM bot_runs")?,
            view_counters: self.count("SELECT COUNT(*) FROM view_counters")?,
        })
    }
}

impl SqliteStorage {
    /// Stores a view count for the day of `at`, replacing any earlier count
    pub fn set_views(&mut self, product_id: i64, views: u64, at: DateTime<Utc>) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO view_counters (product_id, day, views, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(product_id, day) DO UPDATE SET views = excluded.views",
            params![
                product_id,
                at.format("%Y-%m-%d").to_string(),
                views as i64,
                to_db_time(at)
            ],
        )?;
        Ok(())
    }
}

/// Formats a timestamp so that string order matches time order
pub(crate) fn to_db_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_db_time(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let value: String = row.get(idx)?;
    parse_db_time(idx, &value)
}

fn optional_time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let value: Option<String> = row.get(idx)?;
    value.map(|v| parse_db_time(idx, &v)).transpose()
}

fn product_from_row(row: &Row<'_>) -> rusqlite::Result<ProductRecord> {
    Ok(ProductRecord {
        id: row.get(0)?,
        source: row.get(1)?,
        product_code: row.get(2)?,
        slug: row.get(3)?,
        url: row.get(4)?,
        title: row.get(5)?,
        description: row.get(6)?,
        main_image_url: row.get(7)?,
        price: row.get::<_, i64>(8)? as u64,
        on_sale: row.get(9)?,
        created_at: time_column(row, 10)?,
        updated_at: time_column(row, 11)?,
    })
}

fn category_from_row(row: &Row<'_>) -> rusqlite::Result<Category> {
    Ok(Category {
        name: row.get(0)?,
        slug: row.get(1)?,
        parent: row.get(2)?,
    })
}

fn subscription_from_row(row: &Row<'_>) -> rusqlite::Result<WatchSubscription> {
    Ok(WatchSubscription {
        id: row.get(0)?,
        email: row.get(1)?,
        product_id: row.get(2)?,
        verified: row.get(3)?,
        verify_hash: row.get(4)?,
        unsubscribe_hash: row.get(5)?,
        created_at: time_column(row, 6)?,
        last_notified_at: optional_time_column(row, 7)?,
        last_notified_snapshot_id: row.get(8)?,
    })
}

fn constraint_error(e: rusqlite::Error) -> StorageError {
    match e {
        rusqlite::Error::SqliteFailure(err, message)
            if err.code == ErrorCode::ConstraintViolation =>
        {
            StorageError::ConstraintViolation(message.unwrap_or_else(|| err.to_string()))
        }
        other => StorageError::Sqlite(other),
    }
}

fn random_hash() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(HASH_LENGTH)
        .map(char::from)
        .collect()
}
