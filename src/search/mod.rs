//! Product search index
//!
//! Every stored product is projected into a denormalized search document.
//! The index supports exact lookups by URL and a fuzzy multi-field query.

mod sqlite;

pub use sqlite::SqliteSearchIndex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the search index
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Search index lock poisoned")]
    Poisoned,
}

/// Result type for search operations
pub type SearchResult<T> = Result<T, SearchError>;

/// A product as stored in the search index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchDocument {
    /// Product id in the relational store
    pub id: i64,
    pub scraped_at: DateTime<Utc>,
    pub source: String,
    pub product_code: String,
    pub slug: String,
    /// Canonical URL and its `www.` variant
    pub urls: Vec<String>,
    pub title: String,
    /// Category names
    pub categories: Vec<String>,
    pub description: String,
    pub main_image_url: String,
    pub price: u64,
    pub on_sale: bool,
}

impl SearchDocument {
    /// Lowercased text matched by fuzzy queries
    pub(crate) fn search_text(&self) -> String {
        let mut text = vec![
            self.title.as_str(),
            self.product_code.as_str(),
            self.source.as_str(),
            self.description.as_str(),
        ];
        text.extend(self.categories.iter().map(String::as_str));
        text.join(" ").to_lowercase()
    }
}

/// Operations the ingestion pipeline and jobs need from a search index
pub trait SearchIndex: Send + Sync {
    /// Indexes a document, replacing any document with the same id
    fn index(&self, doc: &SearchDocument) -> SearchResult<()>;

    /// Removes a document; removing a missing id is not an error
    fn delete(&self, id: i64) -> SearchResult<()>;

    /// Finds documents listing exactly this URL
    fn find_by_url(&self, url: &str) -> SearchResult<Vec<SearchDocument>>;

    /// Fuzzy search over title, code, source, description and categories
    fn search(&self, query: &str, limit: usize) -> SearchResult<Vec<SearchDocument>>;
}
