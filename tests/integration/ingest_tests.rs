//! Integration tests for the product ingestion pipeline

use crate::common::{mount_image, product_page, Harness, IMAGE_BASE_URL};
use pricewatch::config::SiteConfig;
use pricewatch::extract::{slug_of, PageExtractor, SelectorExtractor};
use pricewatch::search::SearchIndex;
use pricewatch::storage::{Category, ProductData, ProductImage, Storage};
use scraper::Html;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn product(url: &str, code: &str, images: &[String]) -> ProductData {
    let title = format!("Sjónvarp {}", code);
    ProductData {
        source: "elko.is".to_string(),
        product_code: code.to_string(),
        slug: slug_of(&["el", code, &title]),
        url: url.to_string(),
        title,
        price: 99995,
        images: images
            .iter()
            .map(|original| ProductImage {
                url: original.clone(),
                original_url: original.clone(),
            })
            .collect(),
        ..ProductData::default()
    }
}

fn stored_image_urls(harness: &Harness, url: &str) -> Vec<String> {
    let storage = harness.storage.lock().unwrap();
    let record = storage.get_product_by_url(url).unwrap().expect("Product not stored");
    storage
        .get_product_images(record.id)
        .unwrap()
        .into_iter()
        .map(|i| i.url)
        .collect()
}

#[tokio::test]
async fn test_identical_images_are_downloaded_once() {
    let server = MockServer::start().await;
    mount_image(&server, "/img/front.jpg", 1).await;
    mount_image(&server, "/img/back.jpg", 1).await;
    let originals = vec![
        format!("{}/img/front.jpg", server.uri()),
        format!("{}/img/back.jpg", server.uri()),
    ];

    let harness = Harness::new();
    harness
        .ingestor
        .store_product(product("https://elko.is/tv-55", "TV-55", &originals))
        .await
        .expect("First store failed");
    harness
        .ingestor
        .store_product(product("https://elko.is/tilbod/tv-55", "TV-55", &originals))
        .await
        .expect("Second store failed");

    let first = stored_image_urls(&harness, "https://elko.is/tv-55");
    let second = stored_image_urls(&harness, "https://elko.is/tilbod/tv-55");
    assert_eq!(first.len(), 2);
    assert_eq!(first, second);
    assert!(first[0].starts_with(&format!("{}/elko.is/", IMAGE_BASE_URL)));
    assert_eq!(harness.image_files("elko.is").len(), 2);

    let main = harness
        .storage
        .lock()
        .unwrap()
        .get_product_by_url("https://elko.is/tilbod/tv-55")
        .unwrap()
        .unwrap()
        .main_image_url;
    assert_eq!(main, first[0]);
}

/// Runs a page through the selector extractor used by configured sites
fn extract_page(base_url: &str, route: &str, html: &str) -> ProductData {
    let site: SiteConfig = toml::from_str(&format!(
        r#"
        url = "{}/"
        slug-prefix = "el"
        content-selector = "div.product"

        [selectors]
        title = "h1"
        code = ".sku"
        price = ".price"
        images = "img.product-image"
        "#,
        base_url
    ))
    .expect("Failed to parse site config");
    let extractor = SelectorExtractor::from_config(&site).expect("Failed to build extractor");
    let url = Url::parse(&format!("{}{}", base_url, route)).unwrap();
    extractor
        .extract(&Html::parse_document(html), &url)
        .expect("Extraction failed")
        .expect("No product on page")
}

#[tokio::test]
async fn test_extracted_siblings_share_images() {
    let server = MockServer::start().await;
    mount_image(&server, "/img/TV-55.jpg", 1).await;
    let base_url = server.uri();
    let page = product_page("TV-55", 99995, &[]);

    let listed = extract_page(&base_url, "/tv-55", &page);
    let on_sale = extract_page(&base_url, "/tilbod/tv-55", &page);
    assert_eq!(listed.slug, on_sale.slug);

    let harness = Harness::new();
    let first = harness.ingestor.store_product(listed.clone()).await.expect("First store failed");
    let second = harness
        .ingestor
        .store_product(on_sale.clone())
        .await
        .expect("Sibling store failed");
    assert!(second.created);
    assert_ne!(first.product_id, second.product_id);

    // Crawling the sibling again keeps its slug
    harness.ingestor.store_product(on_sale.clone()).await.unwrap();

    let storage = harness.storage.lock().unwrap();
    let kept = storage.get_product(first.product_id).unwrap();
    let sibling = storage.get_product(second.product_id).unwrap();
    assert_eq!(kept.slug, listed.slug);
    assert!(sibling.slug.starts_with(&format!("{}-", listed.slug)));
    assert_ne!(sibling.slug, kept.slug);
    assert_eq!(sibling.main_image_url, kept.main_image_url);
    assert_eq!(storage.counts().unwrap().products, 2);
    drop(storage);

    assert_eq!(harness.image_files("127.0.0.1").len(), 1);
}

#[tokio::test]
async fn test_failed_download_keeps_sibling_files() {
    let server = MockServer::start().await;
    mount_image(&server, "/img/old.jpg", 1).await;
    mount_image(&server, "/img/new.jpg", 1).await;
    Mock::given(method("GET"))
        .and(path("/img/broken.jpg"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new();
    harness
        .ingestor
        .store_product(product(
            "https://elko.is/tv-75",
            "TV-75",
            &[format!("{}/img/old.jpg", server.uri())],
        ))
        .await
        .expect("First store failed");
    let old_files = harness.image_files("elko.is");
    assert_eq!(old_files.len(), 1);

    let result = harness
        .ingestor
        .store_product(product(
            "https://elko.is/tilbod/tv-75",
            "TV-75",
            &[
                format!("{}/img/new.jpg", server.uri()),
                format!("{}/img/broken.jpg", server.uri()),
            ],
        ))
        .await;
    assert!(result.is_err());

    // The sibling still serves its files and nothing half-downloaded remains
    assert_eq!(harness.image_files("elko.is"), old_files);
    let stored = stored_image_urls(&harness, "https://elko.is/tv-75");
    assert_eq!(stored, vec![format!("{}/elko.is/{}", IMAGE_BASE_URL, old_files[0])]);
    assert!(harness
        .storage
        .lock()
        .unwrap()
        .get_product_by_url("https://elko.is/tilbod/tv-75")
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_changed_images_replace_old_files() {
    let server = MockServer::start().await;
    mount_image(&server, "/img/old.jpg", 1).await;
    mount_image(&server, "/img/new.jpg", 1).await;

    let harness = Harness::new();
    harness
        .ingestor
        .store_product(product(
            "https://elko.is/tv-65",
            "TV-65",
            &[format!("{}/img/old.jpg", server.uri())],
        ))
        .await
        .expect("First store failed");
    let old_files = harness.image_files("elko.is");
    assert_eq!(old_files.len(), 1);

    let mut updated = product(
        "https://elko.is/tv-65",
        "TV-65",
        &[format!("{}/img/new.jpg", server.uri())],
    );
    updated.price = 89995;
    let outcome = harness
        .ingestor
        .store_product(updated)
        .await
        .expect("Second store failed");
    assert!(!outcome.created);

    let new_files = harness.image_files("elko.is");
    assert_eq!(new_files.len(), 1);
    assert_ne!(new_files, old_files);

    let stored = stored_image_urls(&harness, "https://elko.is/tv-65");
    assert_eq!(stored, vec![format!("{}/elko.is/{}", IMAGE_BASE_URL, new_files[0])]);
}

#[tokio::test]
async fn test_url_variants_upsert_one_product() {
    let harness = Harness::new();

    let first = harness
        .ingestor
        .store_product(product("https://www.elko.is/vara?id=5&utm_source=fb", "V5", &[]))
        .await
        .unwrap();
    let second = harness
        .ingestor
        .store_product(product("https://elko.is/vara?utm_source=x&id=5#specs", "V5", &[]))
        .await
        .unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.product_id, second.product_id);

    let storage = harness.storage.lock().unwrap();
    let record = storage.get_product(first.product_id).unwrap();
    assert_eq!(record.url, "https://elko.is/vara?id=5");
    assert_eq!(storage.counts().unwrap().snapshots, 2);
    drop(storage);

    for url in ["https://elko.is/vara?id=5", "https://www.elko.is/vara?id=5"] {
        let docs = harness.search.find_by_url(url).unwrap();
        assert_eq!(docs.len(), 1, "no document for {}", url);
    }
    assert_eq!(harness.metrics.snapshot().index_writes, 2);
}

#[tokio::test]
async fn test_shared_categories_create_one_taxonomy_node() {
    let harness = Harness::new();
    let tv = Category {
        name: "Sjónvörp".to_string(),
        slug: "sjonvorp]heimilistaeki".to_string(),
        parent: "heimilistaeki".to_string(),
    };

    let mut first = product("https://elko.is/tv-1", "TV-1", &[]);
    first.categories = vec![tv.clone()];
    let mut second = product("https://elko.is/tv-2", "TV-2", &[]);
    second.categories = vec![tv.clone()];

    harness.ingestor.store_product(first).await.unwrap();
    harness.ingestor.store_product(second).await.unwrap();

    let storage = harness.storage.lock().unwrap();
    let nodes = storage.get_taxonomy_nodes(&tv.slug).unwrap();
    assert_eq!(nodes, vec![tv.clone()]);

    let record = storage.get_product_by_url("https://elko.is/tv-2").unwrap().unwrap();
    assert_eq!(storage.get_product_categories(record.id).unwrap(), vec![tv]);
}
