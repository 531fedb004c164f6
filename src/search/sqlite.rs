use crate::search::{SearchDocument, SearchError, SearchIndex, SearchResult};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SEARCH_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS search_documents (
    id INTEGER PRIMARY KEY,
    body TEXT NOT NULL,
    search_text TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS search_urls (
    doc_id INTEGER NOT NULL,
    url TEXT NOT NULL,
    PRIMARY KEY (doc_id, url)
);

CREATE INDEX IF NOT EXISTS idx_search_urls_url ON search_urls(url);
"#;

/// Tokens longer than this also match with their last character removed
const STEM_MIN_LEN: usize = 5;

/// Search index stored in SQLite
pub struct SqliteSearchIndex {
    conn: Mutex<Connection>,
}

impl SqliteSearchIndex {
    pub fn open(path: &Path) -> SearchResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")?;
        conn.execute_batch(SEARCH_SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> SearchResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SEARCH_SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> SearchResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| SearchError::Poisoned)
    }
}

impl SearchIndex for SqliteSearchIndex {
    fn index(&self, doc: &SearchDocument) -> SearchResult<()> {
        let body = serde_json::to_string(doc)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO search_documents (id, body, search_text) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET body = excluded.body, search_text = excluded.search_text",
            params![doc.id, body, doc.search_text()],
        )?;
        tx.execute("DELETE FROM search_urls WHERE doc_id = ?1", params![doc.id])?;
        for url in &doc.urls {
            tx.execute(
                "INSERT OR IGNORE INTO search_urls (doc_id, url) VALUES (?1, ?2)",
                params![doc.id, url],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn delete(&self, id: i64) -> SearchResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM search_urls WHERE doc_id = ?1", params![id])?;
        conn.execute("DELETE FROM search_documents WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn find_by_url(&self, url: &str) -> SearchResult<Vec<SearchDocument>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT d.body FROM search_documents d
             JOIN search_urls u ON u.doc_id = d.id
             WHERE u.url = ?1 ORDER BY d.id",
        )?;
        let bodies = stmt
            .query_map(params![url], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        decode_all(bodies)
    }

    fn search(&self, query: &str, limit: usize) -> SearchResult<Vec<SearchDocument>> {
        let tokens: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(fuzzy_token)
            .collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let clauses = vec!["search_text LIKE ? ESCAPE '\\'"; tokens.len()].join(" AND ");
        let sql = format!(
            "SELECT body FROM search_documents WHERE {} ORDER BY id LIMIT {}",
            clauses, limit
        );

        let values: Vec<String> = tokens
            .iter()
            .map(|t| format!("%{}%", escape_like(t)))
            .collect();

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let bodies = stmt
            .query_map(rusqlite::params_from_iter(values.iter()), |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        decode_all(bodies)
    }
}

/// Trims inflected endings off long tokens so near forms still match
fn fuzzy_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() >= STEM_MIN_LEN {
        chars[..chars.len() - 1].iter().collect()
    } else {
        token.to_string()
    }
}

fn escape_like(token: &str) -> String {
    token
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn decode_all(bodies: Vec<String>) -> SearchResult<Vec<SearchDocument>> {
    bodies
        .iter()
        .map(|body| serde_json::from_str(body).map_err(SearchError::from))
        .collect()
}
