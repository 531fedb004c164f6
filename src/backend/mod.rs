//! Crawl-state backends
//!
//! A crawl job keeps three pieces of state outside its own task:
//! - the visited set, keyed by request fingerprint
//! - per-host cookies
//! - the FIFO request queue used in queue mode
//!
//! Two interchangeable backends implement the same contract. The volatile
//! backend lives in process memory and may expire visited entries. The
//! durable backend is stored in SQLite and survives restarts, which is what
//! makes resuming an interrupted crawl possible.

mod durable;
mod memory;

pub use durable::DurableBackend;
pub use memory::MemoryBackend;

use crate::config::{BackendKind, CrawlerConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by crawl-state backends
#[derive(Debug, Error)]
pub enum BackendError {
    /// The request queue holds nothing
    #[error("Empty queue")]
    Empty,

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backend lock poisoned")]
    Poisoned,
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Contract shared by every crawl-state backend
pub trait CrawlBackend: Send + Sync {
    // ===== Visited Set =====

    /// Records a fingerprint as visited
    fn mark_visited(&self, fingerprint: &str) -> BackendResult<()>;

    /// Returns true if the fingerprint was visited and has not expired
    fn is_visited(&self, fingerprint: &str) -> BackendResult<bool>;

    /// Marks a fingerprint as visited unless it already is
    ///
    /// Returns true when this call inserted the fingerprint. Two concurrent
    /// callers with the same fingerprint never both receive true.
    fn visit_if_new(&self, fingerprint: &str) -> BackendResult<bool>;

    // ===== Cookies =====

    /// Returns the stored cookie header for a host, or an empty string
    fn cookies(&self, host: &str) -> BackendResult<String>;

    /// Replaces the stored cookie header for a host
    fn set_cookies(&self, host: &str, cookies: &str) -> BackendResult<()>;

    // ===== Queue =====

    /// Appends a serialized request to the tail of the queue
    fn enqueue(&self, request: &[u8]) -> BackendResult<()>;

    /// Removes and returns the head of the queue
    ///
    /// Fails with [`BackendError::Empty`] when the queue holds nothing.
    fn dequeue(&self) -> BackendResult<Vec<u8>>;

    /// Number of queued requests
    fn queue_size(&self) -> BackendResult<usize>;

    // ===== Lifecycle =====

    /// Wipes the visited set, cookies and queue of this job
    fn clear(&self) -> BackendResult<()>;
}

/// A backend selected at construction time
pub enum Backend {
    Volatile(MemoryBackend),
    Durable(DurableBackend),
}

/// Settings needed to construct a backend
#[derive(Debug, Clone)]
pub struct BackendSettings {
    /// SQLite file for durable backends
    pub durable_path: PathBuf,

    /// Expiry of volatile visited entries
    pub visited_ttl: Option<Duration>,
}

impl BackendSettings {
    pub fn from_config(config: &CrawlerConfig, database_path: &str) -> Self {
        Self {
            durable_path: PathBuf::from(config.backend_path.as_deref().unwrap_or(database_path)),
            visited_ttl: config.visited_ttl_secs.map(Duration::from_secs),
        }
    }
}

impl Backend {
    /// Opens a backend of the given kind, scoped to one crawl job
    ///
    /// # Arguments
    ///
    /// * `kind` - Volatile or durable
    /// * `scope` - Job scope (the site host); durable rows are keyed by it
    /// * `settings` - Construction settings
    pub fn open(kind: BackendKind, scope: &str, settings: &BackendSettings) -> BackendResult<Self> {
        match kind {
            BackendKind::Volatile => Ok(Backend::Volatile(MemoryBackend::new(settings.visited_ttl))),
            BackendKind::Durable => Ok(Backend::Durable(DurableBackend::open(
                &settings.durable_path,
                scope,
            )?)),
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Volatile(_) => BackendKind::Volatile,
            Backend::Durable(_) => BackendKind::Durable,
        }
    }

    fn inner(&self) -> &dyn CrawlBackend {
        match self {
            Backend::Volatile(b) => b as &dyn CrawlBackend,
            Backend::Durable(b) => b as &dyn CrawlBackend,
        }
    }
}

impl CrawlBackend for Backend {
    fn mark_visited(&self, fingerprint: &str) -> BackendResult<()> {
        self.inner().mark_visited(fingerprint)
    }

    fn is_visited(&self, fingerprint: &str) -> BackendResult<bool> {
        self.inner().is_visited(fingerprint)
    }

    fn visit_if_new(&self, fingerprint: &str) -> BackendResult<bool> {
        self.inner().visit_if_new(fingerprint)
    }

    fn cookies(&self, host: &str) -> BackendResult<String> {
        self.inner().cookies(host)
    }

    fn set_cookies(&self, host: &str, cookies: &str) -> BackendResult<()> {
        self.inner().set_cookies(host, cookies)
    }

    fn enqueue(&self, request: &[u8]) -> BackendResult<()> {
        self.inner().enqueue(request)
    }

    fn dequeue(&self) -> BackendResult<Vec<u8>> {
        self.inner().dequeue()
    }

    fn queue_size(&self) -> BackendResult<usize> {
        self.inner().queue_size()
    }

    fn clear(&self) -> BackendResult<()> {
        self.inner().clear()
    }
}

/// The two storage roles of one crawl job
///
/// `items` holds the visited set and cookies, `queue` holds pending
/// requests. Each role is configured independently.
#[derive(Clone)]
pub struct JobBackends {
    pub items: Arc<Backend>,
    pub queue: Arc<Backend>,
}

impl JobBackends {
    /// Opens both roles for a job
    pub fn open(config: &CrawlerConfig, scope: &str, settings: &BackendSettings) -> BackendResult<Self> {
        Ok(Self {
            items: Arc::new(Backend::open(config.item_storage, scope, settings)?),
            queue: Arc::new(Backend::open(config.queue_storage, scope, settings)?),
        })
    }

    /// Clears both roles
    pub fn clear(&self) -> BackendResult<()> {
        self.items.clear()?;
        self.queue.clear()
    }
}

/// A fetch request as stored in the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedRequest {
    pub url: String,
}

impl QueuedRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn to_bytes(&self) -> BackendResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> BackendResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
