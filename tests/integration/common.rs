//! Shared fixtures for integration tests

use pricewatch::ingest::{ImageStore, Ingestor};
use pricewatch::search::SqliteSearchIndex;
use pricewatch::storage::{open_storage, SharedStorage};
use pricewatch::Metrics;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const IMAGE_BASE_URL: &str = "https://img.verdfra.is";

/// Databases, image directory and pipeline of one test
pub struct Harness {
    pub dir: TempDir,
    pub storage: SharedStorage,
    pub search: Arc<SqliteSearchIndex>,
    pub metrics: Arc<Metrics>,
    pub ingestor: Arc<Ingestor>,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let storage = open_storage(&dir.path().join("prices.db")).expect("Failed to open storage");
        let search = Arc::new(
            SqliteSearchIndex::open(&dir.path().join("search.db")).expect("Failed to open index"),
        );
        let metrics = Arc::new(Metrics::new());
        let images =
            ImageStore::new(dir.path().join("img"), IMAGE_BASE_URL).expect("Failed to create images");
        let ingestor = Arc::new(Ingestor::new(
            storage.clone(),
            search.clone(),
            images,
            vec!["id".to_string()],
            metrics.clone(),
        ));

        Self {
            dir,
            storage,
            search,
            metrics,
            ingestor,
        }
    }

    pub fn image_dir(&self, source: &str) -> PathBuf {
        self.dir.path().join("img").join(source)
    }

    /// Names of the image files stored for a source
    pub fn image_files(&self, source: &str) -> Vec<String> {
        let mut names: Vec<String> = match std::fs::read_dir(self.image_dir(source)) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }
}

/// A product page understood by the test site's selectors
pub fn product_page(code: &str, price: u64, links: &[&str]) -> String {
    let anchors: String = links
        .iter()
        .map(|href| format!(r#"<a href="{}">link</a>"#, href))
        .collect();
    format!(
        r#"<html><head><title>{code}</title></head><body>
        <div class="product">
            <h1>Hamar {code}</h1>
            <span class="sku">{code}</span>
            <span class="price">{price} kr.</span>
            <img class="product-image" src="/img/{code}.jpg">
        </div>
        {anchors}
        </body></html>"#
    )
}

/// Mounts an HTML page
pub async fn mount_html(server: &MockServer, route: &str, body: String, hits: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/html"))
        .expect(hits)
        .mount(server)
        .await;
}

/// Mounts a small JPEG-typed image
pub async fn mount_image(server: &MockServer, route: &str, hits: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(vec![0xFF, 0xD8, 0xFF, 0xD9], "image/jpeg"),
        )
        .expect(hits)
        .mount(server)
        .await;
}
