//! View counter retention

use crate::config::ScheduleConfig;
use crate::metrics::Metrics;
use crate::storage::{lock, SharedStorage, Storage};
use crate::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Periodic job deleting view counters past the retention window
#[derive(Clone)]
pub struct ViewRetention {
    storage: SharedStorage,
    metrics: Arc<Metrics>,
    window: chrono::Duration,
    batch: usize,
}

impl ViewRetention {
    pub fn new(storage: SharedStorage, metrics: Arc<Metrics>, schedule: &ScheduleConfig) -> Self {
        Self {
            storage,
            metrics,
            window: chrono::Duration::hours(schedule.view_retention_window_hours as i64),
            batch: schedule.page_size.max(1),
        }
    }

    /// Purges old counters in batches; returns how many were deleted
    ///
    /// Blocking. The storage lock is released between batches.
    pub fn run(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> Result<usize> {
        let _running = self.metrics.job_running();
        let cutoff = now - self.window;
        let mut total = 0;

        while !cancel.is_cancelled() {
            let purged = lock(&self.storage)?.purge_views_before(cutoff, self.batch)?;
            total += purged;
            self.metrics.views_purged(purged);
            if purged < self.batch {
                break;
            }
        }

        info!("Purged {} view counters created before {}", total, cutoff);
        Ok(total)
    }
}
