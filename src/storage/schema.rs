//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Pricewatch database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Crawled products, one row per canonical URL
CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    product_code TEXT NOT NULL,
    slug TEXT NOT NULL UNIQUE,
    url TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    main_image_url TEXT NOT NULL DEFAULT '',
    price INTEGER NOT NULL,
    on_sale INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_products_code ON products(source, product_code);
CREATE INDEX IF NOT EXISTS idx_products_price ON products(price);

-- Append-only price history
CREATE TABLE IF NOT EXISTS prices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    product_id INTEGER NOT NULL REFERENCES products(id),
    price INTEGER NOT NULL,
    observed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_prices_product ON prices(product_id, observed_at);

-- Child rows replaced on every crawl
CREATE TABLE IF NOT EXISTS images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    product_id INTEGER NOT NULL REFERENCES products(id),
    position INTEGER NOT NULL,
    url TEXT NOT NULL,
    original_url TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_images_product ON images(product_id);

CREATE TABLE IF NOT EXISTS stocks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    product_id INTEGER NOT NULL REFERENCES products(id),
    location TEXT NOT NULL,
    in_stock INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_stocks_product ON stocks(product_id);

CREATE TABLE IF NOT EXISTS specs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    product_id INTEGER NOT NULL REFERENCES products(id),
    key TEXT NOT NULL,
    value TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_specs_product ON specs(product_id);

CREATE TABLE IF NOT EXISTS categories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    product_id INTEGER NOT NULL REFERENCES products(id),
    name TEXT NOT NULL,
    slug TEXT NOT NULL,
    parent TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_categories_product ON categories(product_id);
CREATE INDEX IF NOT EXISTS idx_categories_slug ON categories(slug);

-- Global category taxonomy
CREATE TABLE IF NOT EXISTS taxonomy (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    slug TEXT NOT NULL,
    parent TEXT NOT NULL,
    UNIQUE(name, slug, parent)
);

-- Live price change per product
CREATE TABLE IF NOT EXISTS price_changes (
    product_id INTEGER PRIMARY KEY REFERENCES products(id),
    diff INTEGER NOT NULL,
    lower INTEGER NOT NULL,
    reference_date TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Price drop subscriptions
CREATE TABLE IF NOT EXISTS watch_subscriptions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL,
    product_id INTEGER NOT NULL REFERENCES products(id),
    verified INTEGER NOT NULL DEFAULT 0,
    verify_hash TEXT NOT NULL UNIQUE,
    unsubscribe_hash TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL,
    last_notified_at TEXT,
    last_notified_snapshot_id INTEGER
);

CREATE INDEX IF NOT EXISTS idx_watch_verified ON watch_subscriptions(verified);

-- Daily view counters
CREATE TABLE IF NOT EXISTS view_counters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    product_id INTEGER NOT NULL REFERENCES products(id),
    day TEXT NOT NULL,
    views INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    UNIQUE(product_id, day)
);

CREATE INDEX IF NOT EXISTS idx_view_counters_created ON view_counters(created_at);

-- Crawl run of each site
CREATE TABLE IF NOT EXISTS bot_runs (
    url TEXT PRIMARY KEY,
    started_at TEXT NOT NULL,
    finished_at TEXT
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
