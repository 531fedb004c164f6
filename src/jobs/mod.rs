//! Periodic background jobs
//!
//! This module contains the jobs that run next to the crawlers:
//! - The interval scheduler driving every job
//! - Price change detection over recent price history
//! - Price drop notifications for watch subscriptions
//! - Removal of products whose pages are gone
//! - Retention of view counters

mod cleaner;
mod interval;
mod price_change;
mod views;
mod watcher;

pub use cleaner::{Cleaner, CleanerReport};
pub use interval::{next_wait, IntervalScheduler, SchedulerState, INITIAL_DELAY, MIN_WAIT};
pub use price_change::{detect_price_change, PriceChangeDetector, PriceChangeReport};
pub use views::ViewRetention;
pub use watcher::{find_price_drop, PriceDrop, WatchNotifier, WatchReport};
