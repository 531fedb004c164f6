//! Watch notifier
//!
//! Tells verified subscribers when a watched product got cheaper than it
//! was at some point since they subscribed. Each price drop is reported at
//! most once per subscription: after a successful send the subscription
//! points at the snapshot it was notified about.

use crate::config::{NotifyConfig, ScheduleConfig};
use crate::extract::price_diff;
use crate::metrics::Metrics;
use crate::notify::{Notification, NotificationSender};
use crate::storage::{
    lock, PriceSnapshot, SharedStorage, SqliteStorage, Storage, StorageResult, WatchSubscription,
};
use crate::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A price drop worth notifying about
#[derive(Debug, Clone, PartialEq)]
pub struct PriceDrop {
    /// The more expensive snapshot the drop is measured against
    pub reference: PriceSnapshot,
    /// The newest snapshot
    pub current: PriceSnapshot,
}

/// Finds the price drop to report for a subscription, if any
///
/// `snapshots` must be ordered newest first. Snapshots older than the
/// subscription end the scan, as does the snapshot the subscription was
/// last notified about.
pub fn find_price_drop(
    subscription: &WatchSubscription,
    snapshots: &[PriceSnapshot],
) -> Option<PriceDrop> {
    let current = snapshots.first()?;

    for snapshot in snapshots {
        if snapshot.observed_at < subscription.created_at {
            break;
        }
        if snapshot.price <= current.price {
            continue;
        }
        if subscription.last_notified_snapshot_id == Some(snapshot.id) {
            return None;
        }
        return Some(PriceDrop {
            reference: snapshot.clone(),
            current: current.clone(),
        });
    }

    None
}

/// Outcome of one notifier run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchReport {
    pub subscriptions: usize,
    pub sent: usize,
    pub failed: usize,
}

struct Dispatch {
    subscription_id: i64,
    expected_snapshot_id: Option<i64>,
    reference_id: i64,
    notification: Notification,
}

/// Periodic job notifying subscribers of price drops
#[derive(Clone)]
pub struct WatchNotifier {
    storage: SharedStorage,
    sender: Arc<dyn NotificationSender>,
    metrics: Arc<Metrics>,
    window: chrono::Duration,
    page_size: usize,
    site_url: String,
    template: String,
}

impl WatchNotifier {
    pub fn new(
        storage: SharedStorage,
        sender: Arc<dyn NotificationSender>,
        metrics: Arc<Metrics>,
        schedule: &ScheduleConfig,
        notify: &NotifyConfig,
    ) -> Self {
        Self {
            storage,
            sender,
            metrics,
            window: chrono::Duration::hours(schedule.watch_window_hours as i64),
            page_size: schedule.page_size.max(1),
            site_url: notify.site_url.trim_end_matches('/').to_string(),
            template: notify.template.clone(),
        }
    }

    /// Checks every verified subscription, page by page
    ///
    /// Notifications of one page are sent concurrently and all of them
    /// complete before the next page is loaded. A failed send leaves the
    /// subscription untouched so the next run tries again.
    pub async fn run(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> Result<WatchReport> {
        let _running = self.metrics.job_running();
        let since = now - self.window;
        let mut report = WatchReport::default();
        let mut offset = 0;

        info!("Checking watched products since {}", since);

        while !cancel.is_cancelled() {
            let dispatches = {
                let storage = lock(&self.storage)?;
                let subscriptions = storage.list_verified_subscriptions(self.page_size, offset)?;
                if subscriptions.is_empty() {
                    break;
                }
                offset += subscriptions.len();
                report.subscriptions += subscriptions.len();

                subscriptions
                    .iter()
                    .filter_map(|subscription| match self.prepare(&storage, subscription, since) {
                        Ok(dispatch) => dispatch,
                        Err(e) => {
                            warn!("Skipping subscription {}: {}", subscription.id, e);
                            None
                        }
                    })
                    .collect::<Vec<_>>()
            };

            let mut sends = JoinSet::new();
            for dispatch in dispatches {
                sends.spawn(deliver(
                    self.sender.clone(),
                    self.storage.clone(),
                    self.metrics.clone(),
                    dispatch,
                ));
            }

            while let Some(result) = sends.join_next().await {
                match result {
                    Ok(true) => report.sent += 1,
                    Ok(false) => report.failed += 1,
                    Err(e) => {
                        report.failed += 1;
                        error!("Notification task failed: {}", e);
                    }
                }
            }
        }

        info!(
            "Watch check done: {} subscriptions, {} sent, {} failed",
            report.subscriptions, report.sent, report.failed
        );
        Ok(report)
    }

    fn prepare(
        &self,
        storage: &SqliteStorage,
        subscription: &WatchSubscription,
        since: DateTime<Utc>,
    ) -> StorageResult<Option<Dispatch>> {
        let snapshots = storage.get_prices(subscription.product_id, since)?;
        let Some(price_drop) = find_price_drop(subscription, &snapshots) else {
            return Ok(None);
        };
        let product = storage.get_product(subscription.product_id)?;

        debug!(
            "Product {} dropped from {} to {} for subscription {}",
            product.id, price_drop.reference.price, price_drop.current.price, subscription.id
        );

        let notification = Notification::new(&self.template, &subscription.email)
            .field("UnsubscribeHash", &subscription.unsubscribe_hash)
            .field("PriceOld", price_drop.reference.price)
            .field("PriceNew", price_drop.current.price)
            .field("PriceDiff", price_diff(price_drop.reference.price, price_drop.current.price))
            .field("ProductURL", format!("{}/product/{}", self.site_url, product.slug))
            .field("ProductTitle", &product.title)
            .field("Date", price_drop.current.observed_at.format("%d/%m/%Y %H:%M"));

        Ok(Some(Dispatch {
            subscription_id: subscription.id,
            expected_snapshot_id: subscription.last_notified_snapshot_id,
            reference_id: price_drop.reference.id,
            notification,
        }))
    }
}

/// Sends one notification and records it; returns whether it was sent
async fn deliver(
    sender: Arc<dyn NotificationSender>,
    storage: SharedStorage,
    metrics: Arc<Metrics>,
    dispatch: Dispatch,
) -> bool {
    if let Err(e) = sender.send(&dispatch.notification).await {
        warn!("Failed to notify {}: {}", dispatch.notification.to, e);
        metrics.email_failure();
        return false;
    }
    metrics.email_sent();

    let marked = lock(&storage).and_then(|mut storage| {
        storage.mark_notified(
            dispatch.subscription_id,
            dispatch.expected_snapshot_id,
            dispatch.reference_id,
            Utc::now(),
        )
    });
    match marked {
        Ok(true) => {}
        Ok(false) => debug!(
            "Subscription {} changed while notifying, pointer left as is",
            dispatch.subscription_id
        ),
        Err(e) => error!(
            "Notified subscription {} but could not record it: {}",
            dispatch.subscription_id, e
        ),
    }
    true
}
