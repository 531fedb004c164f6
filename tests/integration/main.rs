//! Integration tests for Pricewatch
//!
//! These tests run the crawl and ingestion pipeline end-to-end against
//! wiremock servers, with databases and image files in temp directories.

mod common;
mod crawl_tests;
mod ingest_tests;
