//! Process-wide counters and gauges
//!
//! A single [`Metrics`] registry is created at startup and shared as
//! `Arc<Metrics>` with the crawlers, the ingestion pipeline and every
//! periodic job.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Registry of counters and gauges
#[derive(Debug, Default)]
pub struct Metrics {
    responses: AtomicU64,
    fetch_errors: AtomicU64,
    products_stored: AtomicU64,
    products_failed: AtomicU64,
    index_writes: AtomicU64,
    index_failures: AtomicU64,
    price_changes: AtomicU64,
    emails_sent: AtomicU64,
    email_failures: AtomicU64,
    cleaner_deletes: AtomicU64,
    views_purged: AtomicU64,
    crawls_running: AtomicI64,
    jobs_running: AtomicI64,
}

/// Point-in-time copy of every metric
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub responses: u64,
    pub fetch_errors: u64,
    pub products_stored: u64,
    pub products_failed: u64,
    pub index_writes: u64,
    pub index_failures: u64,
    pub price_changes: u64,
    pub emails_sent: u64,
    pub email_failures: u64,
    pub cleaner_deletes: u64,
    pub views_purged: u64,
    pub crawls_running: i64,
    pub jobs_running: i64,
}

/// Decrements a gauge when dropped
#[must_use = "the gauge is decremented as soon as the guard is dropped"]
pub struct GaugeGuard<'a> {
    gauge: &'a AtomicI64,
}

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.gauge.fetch_sub(1, Ordering::Relaxed);
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn response(&self) {
        self.responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fetch_error(&self) {
        self.fetch_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn product_stored(&self) {
        self.products_stored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn product_failed(&self) {
        self.products_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn index_write(&self) {
        self.index_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn index_failure(&self) {
        self.index_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn price_change(&self) {
        self.price_changes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn email_sent(&self) {
        self.emails_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn email_failure(&self) {
        self.email_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cleaner_delete(&self) {
        self.cleaner_deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn views_purged(&self, count: usize) {
        self.views_purged.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Counts a running crawl until the guard is dropped
    pub fn crawl_running(&self) -> GaugeGuard<'_> {
        self.crawls_running.fetch_add(1, Ordering::Relaxed);
        GaugeGuard {
            gauge: &self.crawls_running,
        }
    }

    /// Counts a running periodic job until the guard is dropped
    pub fn job_running(&self) -> GaugeGuard<'_> {
        self.jobs_running.fetch_add(1, Ordering::Relaxed);
        GaugeGuard {
            gauge: &self.jobs_running,
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            responses: self.responses.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            products_stored: self.products_stored.load(Ordering::Relaxed),
            products_failed: self.products_failed.load(Ordering::Relaxed),
            index_writes: self.index_writes.load(Ordering::Relaxed),
            index_failures: self.index_failures.load(Ordering::Relaxed),
            price_changes: self.price_changes.load(Ordering::Relaxed),
            emails_sent: self.emails_sent.load(Ordering::Relaxed),
            email_failures: self.email_failures.load(Ordering::Relaxed),
            cleaner_deletes: self.cleaner_deletes.load(Ordering::Relaxed),
            views_purged: self.views_purged.load(Ordering::Relaxed),
            crawls_running: self.crawls_running.load(Ordering::Relaxed),
            jobs_running: self.jobs_running.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "responses={} fetch_errors={} products_stored={} products_failed={} \
             index_writes={} index_failures={} price_changes={} emails_sent={} \
             email_failures={} cleaner_deletes={} views_purged={} crawls_running={} \
             jobs_running={}",
            self.responses,
            self.fetch_errors,
            self.products_stored,
            self.products_failed,
            self.index_writes,
            self.index_failures,
            self.price_changes,
            self.emails_sent,
            self.email_failures,
            self.cleaner_deletes,
            self.views_purged,
            self.crawls_running,
            self.jobs_running
        )
    }
}
