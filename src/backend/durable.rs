//! Durable SQLite backend
//!
//! Rows are keyed by the job scope so several sites can share one file.

use crate::backend::{BackendError, BackendResult, CrawlBackend};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock};

const BACKEND_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS crawl_visited (
    scope TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    visited_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (scope, fingerprint)
);

CREATE TABLE IF NOT EXISTS crawl_cookies (
    scope TEXT NOT NULL,
    host TEXT NOT NULL,
    cookies TEXT NOT NULL,
    PRIMARY KEY (scope, host)
);

CREATE TABLE IF NOT EXISTS crawl_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scope TEXT NOT NULL,
    payload BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_crawl_queue_scope ON crawl_queue(scope, id);
"#;

/// Crawl state persisted in SQLite
pub struct DurableBackend {
    conn: Mutex<Connection>,
    scope: String,
    cookie_lock: RwLock<()>,
}

impl DurableBackend {
    /// Opens (or creates) the backend tables in the given database file
    pub fn open(path: &Path, scope: &str) -> BackendResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
        ",
        )?;
        conn.execute_batch(BACKEND_SCHEMA_SQL)?;

        Ok(Self {
            conn: Mutex::new(conn),
            scope: scope.to_string(),
            cookie_lock: RwLock::new(()),
        })
    }

    fn conn(&self) -> BackendResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| BackendError::Poisoned)
    }
}

impl CrawlBackend for DurableBackend {
    fn mark_visited(&self, fingerprint: &str) -> BackendResult<()> {
        self.conn()?.execute(
            "INSERT OR IGNORE INTO crawl_visited (scope, fingerprint) VALUES (?1, ?2)",
            params![self.scope, fingerprint],
        )?;
        Ok(())
    }

    fn is_visited(&self, fingerprint: &str) -> BackendResult<bool> {
        let found: Option<i64> = self
            .conn()?
            .query_row(
                "SELECT 1 FROM crawl_visited WHERE scope = ?1 AND fingerprint = ?2",
                params![self.scope, fingerprint],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn visit_if_new(&self, fingerprint: &str) -> BackendResult<bool> {
        let inserted = self.conn()?.execute(
            "INSERT OR IGNORE INTO crawl_visited (scope, fingerprint) VALUES (?1, ?2)",
            params![self.scope, fingerprint],
        )?;
        Ok(inserted == 1)
    }

    fn cookies(&self, host: &str) -> BackendResult<String> {
        let _guard = self.cookie_lock.read().map_err(|_| BackendError::Poisoned)?;
        let cookies: Option<String> = self
            .conn()?
            .query_row(
                "SELECT cookies FROM crawl_cookies WHERE scope = ?1 AND host = ?2",
                params![self.scope, host],
                |row| row.get(0),
            )
            .optional()?;
        Ok(cookies.unwrap_or_default())
    }

    fn set_cookies(&self, host: &str, cookies: &str) -> BackendResult<()> {
        let _guard = self.cookie_lock.write().map_err(|_| BackendError::Poisoned)?;
        self.conn()?.execute(
            "INSERT INTO crawl_cookies (scope, host, cookies) VALUES (?1, ?2, ?3)
             ON CONFLICT(scope, host) DO UPDATE SET cookies = excluded.cookies",
            params![self.scope, host, cookies],
        )?;
        Ok(())
    }

    fn enqueue(&self, request: &[u8]) -> BackendResult<()> {
        self.conn()?.execute(
            "INSERT INTO crawl_queue (scope, payload) VALUES (?1, ?2)",
            params![self.scope, request],
        )?;
        Ok(())
    }

    fn dequeue(&self) -> BackendResult<Vec<u8>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let head: Option<(i64, Vec<u8>)> = tx
            .query_row(
                "SELECT id, payload FROM crawl_queue WHERE scope = ?1 ORDER BY id LIMIT 1",
                params![self.scope],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (id, payload) = head.ok_or(BackendError::Empty)?;
        tx.execute("DELETE FROM crawl_queue WHERE id = ?1", params![id])?;
        tx.commit()?;

        Ok(payload)
    }

    fn queue_size(&self) -> BackendResult<usize> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM crawl_queue WHERE scope = ?1",
            params![self.scope],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn clear(&self) -> BackendResult<()> {
        let _guard = self.cookie_lock.write().map_err(|_| BackendError::Poisoned)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for table in ["crawl_visited", "crawl_cookies", "crawl_queue"] {
            tx.execute(
                &format!("DELETE FROM {} WHERE scope = ?1", table),
                params![self.scope],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}
