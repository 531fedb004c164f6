//! Restartable per-site crawl tasks
//!
//! Each site's crawl job runs in its own task and is started again as soon
//! as it ends, until shutdown is requested. A failed or panicked job is
//! restarted after a longer pause.

use crate::crawler::coordinator::SiteCrawler;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Pauses between consecutive crawl jobs of one site
#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    pub after_success: Duration,
    pub after_failure: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            after_success: Duration::from_secs(1),
            after_failure: Duration::from_secs(30),
        }
    }
}

/// Runs a site's crawl job over and over until cancelled
///
/// Every job runs in a spawned task so a panic inside it is contained and
/// the site is simply restarted.
pub async fn supervise_site(crawler: SiteCrawler, policy: RestartPolicy, cancel: CancellationToken) {
    let url = crawler.site().url.clone();

    while !cancel.is_cancelled() {
        let job = {
            let crawler = crawler.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { crawler.run(&cancel).await })
        };

        let pause = match job.await {
            Ok(Ok(summary)) => {
                if summary.cancelled {
                    break;
                }
                info!(
                    "Crawl job of {} done ({} pages, {} products)",
                    url, summary.pages, summary.products
                );
                policy.after_success
            }
            Ok(Err(e)) => {
                error!("Crawl job of {} failed: {}", url, e);
                policy.after_failure
            }
            Err(e) => {
                error!("Crawl job of {} panicked: {}", url, e);
                policy.after_failure
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = cancel.cancelled() => break,
        }
    }

    info!("Stopped crawling {}", url);
}
