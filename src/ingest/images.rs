//! Locally served product images
//!
//! Images are downloaded once per (source, product code) identity and served
//! from the image directory. When the same product shows up again with the
//! same ordered list of original image URLs the stored copies are reused.

use crate::ingest::IngestError;
use crate::storage::{lock, ProductData, ProductImage, SharedStorage, Storage};
use chrono::Utc;
use rand::Rng;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

const NAME_LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const NAME_RANDOM_LEN: usize = 15;

/// Files touched while assigning a product's images
#[derive(Debug, Default)]
pub struct ImageAssignment {
    source: String,
    downloaded: Vec<String>,
    stale: Vec<String>,
}

/// Downloads, names and deletes product image files
#[derive(Debug, Clone)]
pub struct ImageStore {
    client: reqwest::Client,
    image_dir: PathBuf,
    base_url: String,
}

impl ImageStore {
    /// Creates an image store
    ///
    /// # Arguments
    ///
    /// * `image_dir` - Root directory; files go to `{image_dir}/{source}/`
    /// * `base_url` - Public URL the image directory is served under
    pub fn new(image_dir: impl Into<PathBuf>, base_url: &str) -> Result<Self, IngestError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            image_dir: image_dir.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Assigns served URLs to a product's images
    ///
    /// Sibling products are the stored products with the same source and
    /// product code. A sibling whose images are already served locally is
    /// reused when its ordered original URLs equal the product's; otherwise
    /// the new set is downloaded and the sibling's files become stale.
    /// Without such a sibling every image is downloaded.
    ///
    /// Nothing is deleted here. The caller settles the returned
    /// [`ImageAssignment`] once it knows whether the product was stored.
    /// A failed download removes the files it already wrote.
    ///
    /// The product's main image is set to its first image afterwards.
    pub async fn assign(
        &self,
        storage: &SharedStorage,
        product: &mut ProductData,
    ) -> Result<ImageAssignment, IngestError> {
        let mut assignment = ImageAssignment {
            source: product.source.clone(),
            ..ImageAssignment::default()
        };
        if product.images.is_empty() {
            product.main_image_url.clear();
            return Ok(assignment);
        }

        let sibling_images = {
            let store = lock(storage)?;
            let siblings = store.find_products_by_code(&product.source, &product.product_code)?;
            let mut found = None;
            for sibling in siblings {
                let images = store.get_product_images(sibling.id)?;
                if images.iter().any(|i| self.is_local(&i.url)) {
                    found = Some(images);
                }
            }
            found
        };

        match sibling_images {
            Some(existing) if same_originals(&existing, &product.images) => {
                debug!(
                    "Reusing {} stored images for {}",
                    existing.len(),
                    product.product_code
                );
                for (image, stored) in product.images.iter_mut().zip(existing) {
                    image.url = stored.url;
                }
            }
            Some(existing) => {
                assignment.downloaded = self.download_all(&product.source, &mut product.images).await?;
                assignment.stale = existing.into_iter().map(|i| i.url).collect();
            }
            None => {
                assignment.downloaded = self.download_all(&product.source, &mut product.images).await?;
            }
        }

        product.main_image_url = product.images[0].url.clone();
        Ok(assignment)
    }

    /// Deletes the sibling files replaced by a stored product
    pub async fn commit(&self, assignment: ImageAssignment) {
        self.remove_quietly(&assignment.source, &assignment.stale).await;
    }

    /// Deletes the files downloaded for a product that was not stored
    pub async fn rollback(&self, assignment: ImageAssignment) {
        self.remove_quietly(&assignment.source, &assignment.downloaded).await;
    }

    /// Directory holding the files of one source
    pub fn source_dir(&self, source: &str) -> PathBuf {
        self.image_dir.join(source)
    }

    fn is_local(&self, url: &str) -> bool {
        url.starts_with(&format!("{}/", self.base_url))
    }

    fn served_url(&self, source: &str, file_name: &str) -> String {
        format!("{}/{}/{}", self.base_url, source, file_name)
    }

    /// Downloads every image and returns the served URLs written
    async fn download_all(
        &self,
        source: &str,
        images: &mut [ProductImage],
    ) -> Result<Vec<String>, IngestError> {
        tokio::fs::create_dir_all(self.source_dir(source)).await?;

        let mut written = Vec::with_capacity(images.len());
        for image in images.iter_mut() {
            match self.download(source, &image.original_url).await {
                Ok(file_name) => {
                    image.url = self.served_url(source, &file_name);
                    written.push(image.url.clone());
                }
                Err(e) => {
                    self.remove_quietly(source, &written).await;
                    return Err(e);
                }
            }
        }
        Ok(written)
    }

    async fn remove_quietly(&self, source: &str, served_urls: &[String]) {
        for url in served_urls {
            if let Err(e) = self.delete(source, url).await {
                warn!("Failed to delete image {}: {}", url, e);
            }
        }
    }

    async fn download(&self, source: &str, original_url: &str) -> Result<String, IngestError> {
        let response = self.client.get(original_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::ImageStatus {
                url: original_url.to_string(),
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().await?;

        let file_name = random_file_name();
        tokio::fs::write(self.source_dir(source).join(&file_name), &bytes).await?;
        debug!("Saved image {} as {}", original_url, file_name);
        Ok(file_name)
    }

    async fn delete(&self, source: &str, served_url: &str) -> Result<(), IngestError> {
        let prefix = format!("{}/{}/", self.base_url, source);
        let Some(file_name) = served_url.strip_prefix(&prefix) else {
            return Ok(());
        };
        if file_name.is_empty() || file_name.contains('/') || file_name.contains("..") {
            return Ok(());
        }

        match tokio::fs::remove_file(self.source_dir(source).join(file_name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("Stored image {} was already gone", file_name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn same_originals(stored: &[ProductImage], scraped: &[ProductImage]) -> bool {
    stored.len() == scraped.len()
        && stored
            .iter()
            .zip(scraped)
            .all(|(a, b)| a.original_url == b.original_url)
}

/// `{unix nanos}{15 random letters}.jpg`
fn random_file_name() -> String {
    let mut rng = rand::thread_rng();
    let letters: String = (0..NAME_RANDOM_LEN)
        .map(|_| NAME_LETTERS[rng.gen_range(0..NAME_LETTERS.len())] as char)
        .collect();
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("{}{}.jpg", nanos, letters)
}
