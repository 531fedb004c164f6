//! Statistics from the product database
//!
//! This module provides functionality for extracting and displaying
//! database row counts and per-site crawl runs.

use crate::storage::{BotRun, Storage, StorageCounts, StorageResult};
use std::fmt::Write;

/// Database statistics summary
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    /// Row counts of the main tables
    pub counts: StorageCounts,

    /// Last crawl run of each site, in site order; None for never crawled
    pub runs: Vec<(String, Option<BotRun>)>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
/// * `sites` - Start URLs of the sites whose crawl runs to include
///
/// # Returns
///
/// * `Ok(Statistics)` - Successfully loaded statistics
/// * `Err(StorageError)` - Failed to query statistics
pub fn load_statistics<S: Storage + ?Sized>(
    storage: &S,
    sites: &[&str],
) -> StorageResult<Statistics> {
    let counts = storage.counts()?;

    let runs = sites
        .iter()
        .map(|url| Ok((url.to_string(), storage.get_bot_run(url)?)))
        .collect::<StorageResult<Vec<_>>>()?;

    Ok(Statistics { counts, runs })
}

/// Renders statistics as a plain text report
pub fn format_statistics(stats: &Statistics) -> String {
    let c = &stats.counts;
    let mut out = String::new();

    let _ = writeln!(out, "=== Pricewatch Statistics ===\n");
    let _ = writeln!(out, "Products:");
    let _ = writeln!(out, "  Products: {}", c.products);
    let _ = writeln!(out, "  Price snapshots: {}", c.snapshots);
    let _ = writeln!(out, "  Price changes: {}", c.price_changes);
    let _ = writeln!(out, "  Taxonomy nodes: {}", c.taxonomy_nodes);
    let _ = writeln!(out);

    let _ = writeln!(out, "Watchers:");
    let _ = writeln!(
        out,
        "  Subscriptions: {} ({} verified)",
        c.subscriptions, c.verified_subscriptions
    );
    let _ = writeln!(out, "  View counters: {}", c.view_counters);
    let _ = writeln!(out);

    let _ = writeln!(out, "Crawl Runs ({}):", c.bot_runs);
    for (url, run) in &stats.runs {
        match run {
            Some(run) => {
                let finished = run
                    .finished_at
                    .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "running or interrupted".to_string());
                let _ = writeln!(
                    out,
                    "  - {}: started {}, finished {}",
                    url,
                    run.started_at.format("%Y-%m-%d %H:%M"),
                    finished
                );
            }
            None => {
                let _ = writeln!(out, "  - {}: never crawled", url);
            }
        }
    }

    out
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &Statistics) {
    print!("{}", format_statistics(stats));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ProductData, SqliteStorage};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_load_statistics() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let product = ProductData {
            source: "elko.is".to_string(),
            product_code: "A1".to_string(),
            slug: "el-a1".to_string(),
            url: "https://elko.is/a1".to_string(),
            title: "Vara".to_string(),
            price: 10,
            ..ProductData::default()
        };
        storage.upsert_product(&product, Utc::now()).unwrap();
        storage.upsert_product(&product, Utc::now()).unwrap();
        storage
            .upsert_bot_run(&BotRun {
                url: "https://elko.is/".to_string(),
                started_at: Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
                finished_at: None,
            })
            .unwrap();

        let stats = load_statistics(&storage, &["https://elko.is/", "https://byko.is/"]).unwrap();
        assert_eq!(stats.counts.products, 1);
        assert_eq!(stats.counts.snapshots, 2);
        assert!(stats.runs[0].1.is_some());
        assert!(stats.runs[1].1.is_none());

        let report = format_statistics(&stats);
        assert!(report.contains("Products: 1"));
        assert!(report.contains("https://elko.is/: started 2024-03-01 08:00, finished running or interrupted"));
        assert!(report.contains("https://byko.is/: never crawled"));
    }
}
