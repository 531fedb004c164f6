//! Product ingestion pipeline
//!
//! Every product produced by a page extractor passes through [`Ingestor`]:
//! - its URL is canonicalized
//! - its images are deduplicated and served locally
//! - its slug is made unique among products at other URLs
//! - it is upserted into the relational store with a new price snapshot
//! - it is projected into the search index
//!
//! A search index failure is reported but never undoes the relational write.

mod images;

pub use images::{ImageAssignment, ImageStore};

use crate::metrics::Metrics;
use crate::search::{SearchDocument, SearchError, SearchIndex};
use crate::storage::{
    lock, ProductData, SharedStorage, SqliteStorage, Storage, StorageError, UpsertOutcome,
};
use crate::url::{clean_url, fingerprint, with_www};
use crate::UrlError;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised while ingesting a product
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Invalid product URL: {0}")]
    Url(#[from] UrlError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Search index error: {0}")]
    Search(#[from] SearchError),

    #[error("Image download failed: {0}")]
    ImageHttp(#[from] reqwest::Error),

    #[error("Image {url} returned status {status}")]
    ImageStatus { url: String, status: u16 },

    #[error("Image file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stores extracted products
pub struct Ingestor {
    storage: SharedStorage,
    search: Arc<dyn SearchIndex>,
    images: ImageStore,
    keep_query_params: Vec<String>,
    metrics: Arc<Metrics>,
}

impl Ingestor {
    pub fn new(
        storage: SharedStorage,
        search: Arc<dyn SearchIndex>,
        images: ImageStore,
        keep_query_params: Vec<String>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            storage,
            search,
            images,
            keep_query_params,
            metrics,
        }
    }

    /// Runs one product through the pipeline
    ///
    /// # Returns
    ///
    /// * `Ok(UpsertOutcome)` - The product row and its new snapshot
    /// * `Err(IngestError)` - Canonicalization, image or relational failure;
    ///   nothing was indexed
    pub async fn store_product(&self, mut product: ProductData) -> Result<UpsertOutcome, IngestError> {
        product.url = clean_url(&product.url, &self.keep_query_params)?;

        let assignment = self.images.assign(&self.storage, &mut product).await?;

        let observed_at = Utc::now();
        let outcome = lock(&self.storage).and_then(|mut store| {
            product.slug = unique_slug(&store, &product)?;
            store.upsert_product(&product, observed_at)
        });
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                self.metrics.product_failed();
                self.images.rollback(assignment).await;
                return Err(e.into());
            }
        };
        self.images.commit(assignment).await;
        self.metrics.product_stored();
        debug!(
            "Stored product {} ({}) at {}",
            outcome.product_id,
            if outcome.created { "new" } else { "updated" },
            product.url
        );

        let document = search_document(outcome.product_id, &product, observed_at);
        match self.search.index(&document) {
            Ok(()) => self.metrics.index_write(),
            Err(e) => {
                self.metrics.index_failure();
                warn!("Failed to index product {}: {}", outcome.product_id, e);
            }
        }

        Ok(outcome)
    }
}

/// Length of the URL-derived slug suffix
const SLUG_SUFFIX_LEN: usize = 8;

/// Returns a slug no product at another URL holds
///
/// Sites build slugs from the product code and title, so the same product
/// listed under two catalog paths asks for the same slug. The product that
/// claimed it first keeps it; the other gets a suffix derived from its own
/// URL, which stays the same across crawls.
fn unique_slug(store: &SqliteStorage, product: &ProductData) -> Result<String, StorageError> {
    match store.get_product_by_slug(&product.slug)? {
        Some(owner) if owner.url != product.url => {
            let digest = fingerprint(&product.url);
            Ok(format!("{}-{}", product.slug, &digest[..SLUG_SUFFIX_LEN]))
        }
        _ => Ok(product.slug.clone()),
    }
}

/// Projects a stored product into its search document
///
/// The document lists the canonical URL and its `www.` variant so lookups
/// by either form find it. Hosts without a `www.` form (IP addresses) get
/// the canonical URL only.
pub fn search_document(id: i64, product: &ProductData, scraped_at: DateTime<Utc>) -> SearchDocument {
    let mut urls = vec![product.url.clone()];
    if let Ok(www) = with_www(&product.url) {
        if www != product.url {
            urls.push(www);
        }
    }

    SearchDocument {
        id,
        scraped_at,
        source: product.source.clone(),
        product_code: product.product_code.clone(),
        slug: product.slug.clone(),
        urls,
        title: product.title.clone(),
        categories: product.categories.iter().map(|c| c.name.clone()).collect(),
        description: product.description.clone(),
        main_image_url: product.main_image_url.clone(),
        price: product.price,
        on_sale: product.on_sale,
    }
}
