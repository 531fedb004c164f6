//! Output module for command-line reports
//!
//! This module handles:
//! - Loading row counts and crawl runs from the database
//! - Rendering them for `--stats`

pub mod stats;

pub use stats::{format_statistics, load_statistics, print_statistics, Statistics};
