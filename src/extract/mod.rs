//! Product extraction from fetched pages
//!
//! This module turns product pages into [`ProductData`] records:
//! - The [`PageExtractor`] seam each site plugs into
//! - A configurable CSS selector extractor
//! - Breadcrumb to category conversion
//! - Slug and price text helpers

mod categories;
mod selector;
mod text;

pub use categories::{categories_from_breadcrumbs, SLUG_SEPARATOR};
pub use selector::SelectorExtractor;
pub use text::{parse_price, price_diff, slug_of, slugify};

use crate::storage::ProductData;
use scraper::Html;
use thiserror::Error;
use url::Url;

/// Errors raised while extracting a product from a page
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Missing required field '{field}' on {url}")]
    MissingField { field: &'static str, url: String },

    #[error("Invalid page URL: {0}")]
    Url(String),
}

/// Turns a parsed product page into a product record
///
/// Implementations must be usable from every crawl worker of a site at once.
pub trait PageExtractor: Send + Sync {
    /// Extracts the product shown on a page
    ///
    /// # Returns
    ///
    /// * `Ok(Some(ProductData))` - The page shows a product
    /// * `Ok(None)` - The page matched the content selector but holds no product
    /// * `Err(ExtractError)` - The page is a product page missing required data
    fn extract(&self, document: &Html, url: &Url) -> Result<Option<ProductData>, ExtractError>;
}
