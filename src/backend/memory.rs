//! Volatile in-process backend

use crate::backend::{BackendError, BackendResult, CrawlBackend};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

/// Inserts between two sweeps of expired visited entries
const SWEEP_INTERVAL: usize = 1024;

/// Fingerprint to expiry (None never expires)
#[derive(Default)]
struct VisitedSet {
    entries: HashMap<String, Option<Instant>>,
    inserts: usize,
}

impl VisitedSet {
    fn contains(&self, fingerprint: &str) -> bool {
        self.entries.get(fingerprint).map_or(false, is_live)
    }

    fn insert(&mut self, fingerprint: &str, expires: Option<Instant>) {
        self.entries.insert(fingerprint.to_string(), expires);
        if expires.is_none() {
            return;
        }
        self.inserts += 1;
        if self.inserts >= SWEEP_INTERVAL {
            self.sweep();
        }
    }

    fn sweep(&mut self) {
        self.entries.retain(|_, expires| is_live(expires));
        self.inserts = 0;
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.inserts = 0;
    }
}

/// In-memory crawl state, lost when the process exits
pub struct MemoryBackend {
    visited: Mutex<VisitedSet>,
    cookies: RwLock<HashMap<String, String>>,
    queue: Mutex<VecDeque<Vec<u8>>>,
    visited_ttl: Option<Duration>,
}

impl MemoryBackend {
    pub fn new(visited_ttl: Option<Duration>) -> Self {
        Self {
            visited: Mutex::new(VisitedSet::default()),
            cookies: RwLock::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            visited_ttl,
        }
    }

    fn expiry(&self) -> Option<Instant> {
        self.visited_ttl.map(|ttl| Instant::now() + ttl)
    }

    fn visited(&self) -> BackendResult<MutexGuard<'_, VisitedSet>> {
        self.visited.lock().map_err(|_| BackendError::Poisoned)
    }

    fn queue(&self) -> BackendResult<MutexGuard<'_, VecDeque<Vec<u8>>>> {
        self.queue.lock().map_err(|_| BackendError::Poisoned)
    }
}

fn is_live(expires: &Option<Instant>) -> bool {
    expires.map_or(true, |at| Instant::now() < at)
}

impl CrawlBackend for MemoryBackend {
    fn mark_visited(&self, fingerprint: &str) -> BackendResult<()> {
        let expires = self.expiry();
        self.visited()?.insert(fingerprint, expires);
        Ok(())
    }

    fn is_visited(&self, fingerprint: &str) -> BackendResult<bool> {
        Ok(self.visited()?.contains(fingerprint))
    }

    fn visit_if_new(&self, fingerprint: &str) -> BackendResult<bool> {
        let expires = self.expiry();
        let mut visited = self.visited()?;
        if visited.contains(fingerprint) {
            return Ok(false);
        }
        visited.insert(fingerprint, expires);
        Ok(true)
    }

    fn cookies(&self, host: &str) -> BackendResult<String> {
        let cookies = self.cookies.read().map_err(|_| BackendError::Poisoned)?;
        Ok(cookies.get(host).cloned().unwrap_or_default())
    }

    fn set_cookies(&self, host: &str, value: &str) -> BackendResult<()> {
        let mut cookies = self.cookies.write().map_err(|_| BackendError::Poisoned)?;
        cookies.insert(host.to_string(), value.to_string());
        Ok(())
    }

    fn enqueue(&self, request: &[u8]) -> BackendResult<()> {
        self.queue()?.push_back(request.to_vec());
        Ok(())
    }

    fn dequeue(&self) -> BackendResult<Vec<u8>> {
        self.queue()?.pop_front().ok_or(BackendError::Empty)
    }

    fn queue_size(&self) -> BackendResult<usize> {
        Ok(self.queue()?.len())
    }

    fn clear(&self) -> BackendResult<()> {
        self.visited()?.clear();
        self.cookies
            .write()
            .map_err(|_| BackendError::Poisoned)?
            .clear();
        self.queue()?.clear();
        Ok(())
    }
}
