//! Crawl frontier
//!
//! The frontier holds URLs waiting to be fetched. In parallel mode it is an
//! in-memory stack; in queue mode it is the job's queue backend. Either way
//! a URL enters the frontier only if the visited set did not already hold
//! its fingerprint, and it is marked visited in the same atomic step.

use crate::backend::{Backend, BackendError, BackendResult, CrawlBackend, QueuedRequest};
use crate::url::fingerprint;
use std::sync::{Arc, Mutex};
use tracing::warn;

enum Pending {
    Stack(Mutex<Vec<String>>),
    Queue(Arc<Backend>),
}

/// URLs waiting to be fetched by one crawl job
pub struct Frontier {
    visited: Arc<Backend>,
    pending: Pending,
}

impl Frontier {
    /// A stack frontier for parallel mode
    pub fn stack(visited: Arc<Backend>) -> Self {
        Self {
            visited,
            pending: Pending::Stack(Mutex::new(Vec::new())),
        }
    }

    /// A frontier over the queue backend for queue mode
    pub fn queue(visited: Arc<Backend>, queue: Arc<Backend>) -> Self {
        Self {
            visited,
            pending: Pending::Queue(queue),
        }
    }

    /// Adds a URL unless it was visited before
    ///
    /// Returns true when the URL was added.
    pub fn push(&self, url: &str) -> BackendResult<bool> {
        if !self.visited.visit_if_new(&fingerprint(url))? {
            return Ok(false);
        }
        self.add(url)?;
        Ok(true)
    }

    /// Adds a URL regardless of the visited set, marking it visited
    ///
    /// Used for the start URL so a resumed job always revisits it.
    pub fn seed(&self, url: &str) -> BackendResult<()> {
        self.visited.mark_visited(&fingerprint(url))?;
        self.add(url)
    }

    /// Takes the next URL, or None when nothing is pending
    ///
    /// The stack yields the most recently added URL first; the queue is FIFO.
    /// Undecodable queue entries are logged and skipped.
    pub fn pop(&self) -> BackendResult<Option<String>> {
        match &self.pending {
            Pending::Stack(stack) => Ok(stack.lock().map_err(|_| BackendError::Poisoned)?.pop()),
            Pending::Queue(queue) => loop {
                let bytes = match queue.dequeue() {
                    Ok(bytes) => bytes,
                    Err(BackendError::Empty) => return Ok(None),
                    Err(e) => return Err(e),
                };
                match QueuedRequest::from_bytes(&bytes) {
                    Ok(request) => return Ok(Some(request.url)),
                    Err(e) => warn!("Dropping undecodable queued request: {}", e),
                }
            },
        }
    }

    /// Number of pending URLs
    pub fn len(&self) -> BackendResult<usize> {
        match &self.pending {
            Pending::Stack(stack) => Ok(stack.lock().map_err(|_| BackendError::Poisoned)?.len()),
            Pending::Queue(queue) => queue.queue_size(),
        }
    }

    pub fn is_empty(&self) -> BackendResult<bool> {
        Ok(self.len()? == 0)
    }

    fn add(&self, url: &str) -> BackendResult<()> {
        match &self.pending {
            Pending::Stack(stack) => {
                stack
                    .lock()
                    .map_err(|_| BackendError::Poisoned)?
                    .push(url.to_string());
                Ok(())
            }
            Pending::Queue(queue) => queue.enqueue(&QueuedRequest::new(url).to_bytes()?),
        }
    }
}
