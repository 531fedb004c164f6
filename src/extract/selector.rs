//! CSS selector driven product extractor
//!
//! Each site in the configuration describes where its product fields live
//! with CSS selectors. [`SelectorExtractor`] compiles those selectors once and
//! applies them to every product page of the site.

use crate::config::{SelectorConfig, SiteConfig};
use crate::extract::categories::categories_from_breadcrumbs;
use crate::extract::text::{parse_price, slug_of};
use crate::extract::{ExtractError, PageExtractor};
use crate::storage::{ProductData, ProductImage, Spec, Stock};
use crate::url::url_host;
use crate::ConfigError;
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Product extractor built from a site's selector configuration
#[derive(Debug)]
pub struct SelectorExtractor {
    source: Option<String>,
    slug_prefix: String,
    title: Selector,
    code: Selector,
    price: Selector,
    description: Option<Selector>,
    images: Option<Selector>,
    image_attr: String,
    specs: Option<Selector>,
    stocks: Option<Selector>,
    in_stock_text: Vec<String>,
    breadcrumbs: Option<Selector>,
    breadcrumbs_keep_first: bool,
    breadcrumbs_keep_last: bool,
    on_sale: Option<Selector>,
}

impl SelectorExtractor {
    /// Compiles the selectors of a site
    ///
    /// # Returns
    ///
    /// * `Ok(SelectorExtractor)` - All selectors compiled
    /// * `Err(ConfigError::InvalidSelector)` - A selector failed to parse
    pub fn from_config(site: &SiteConfig) -> Result<Self, ConfigError> {
        let s: &SelectorConfig = &site.selectors;

        Ok(Self {
            source: site.source.clone(),
            slug_prefix: site.slug_prefix.clone(),
            title: compile(&s.title)?,
            code: compile(&s.code)?,
            price: compile(&s.price)?,
            description: compile_optional(&s.description)?,
            images: compile_optional(&s.images)?,
            image_attr: s.image_attr.clone(),
            specs: compile_optional(&s.specs)?,
            stocks: compile_optional(&s.stocks)?,
            in_stock_text: s.in_stock_text.iter().map(|t| t.to_lowercase()).collect(),
            breadcrumbs: compile_optional(&s.breadcrumbs)?,
            breadcrumbs_keep_first: s.breadcrumbs_keep_first,
            breadcrumbs_keep_last: s.breadcrumbs_keep_last,
            on_sale: compile_optional(&s.on_sale)?,
        })
    }

    fn extract_images(&self, document: &Html, url: &Url) -> Vec<ProductImage> {
        let Some(selector) = &self.images else {
            return Vec::new();
        };

        let mut images: Vec<ProductImage> = Vec::new();
        for element in document.select(selector) {
            let Some(raw) = element.value().attr(&self.image_attr) else {
                continue;
            };
            let Ok(resolved) = url.join(raw.trim()) else {
                continue;
            };
            let resolved = resolved.to_string();
            if images.iter().any(|i| i.original_url == resolved) {
                continue;
            }
            images.push(ProductImage {
                url: resolved.clone(),
                original_url: resolved,
            });
        }
        images
    }

    fn extract_specs(&self, document: &Html) -> Vec<Spec> {
        let Some(selector) = &self.specs else {
            return Vec::new();
        };

        document
            .select(selector)
            .filter_map(|row| {
                let cells = cell_texts(row);
                match cells.as_slice() {
                    [key, .., value] if !key.is_empty() => Some(Spec {
                        key: key.clone(),
                        value: value.clone(),
                    }),
                    _ => None,
                }
            })
            .collect()
    }

    fn extract_stocks(&self, document: &Html) -> Vec<Stock> {
        let Some(selector) = &self.stocks else {
            return Vec::new();
        };

        document
            .select(selector)
            .filter_map(|row| {
                let cells = cell_texts(row);
                match cells.as_slice() {
                    [location, .., status] if !location.is_empty() => Some(Stock {
                        location: location.clone(),
                        in_stock: self.in_stock_text.contains(&status.to_lowercase()),
                    }),
                    _ => None,
                }
            })
            .collect()
    }
}

impl PageExtractor for SelectorExtractor {
    fn extract(&self, document: &Html, url: &Url) -> Result<Option<ProductData>, ExtractError> {
        let title = first_text(document, &self.title);
        let code = first_text(document, &self.code);

        // Pages without a product title are listings, not products
        let Some(title) = title else {
            return Ok(None);
        };
        let code = code.ok_or_else(|| ExtractError::MissingField {
            field: "code",
            url: url.to_string(),
        })?;

        let price = first_text(document, &self.price)
            .map(|text| parse_price(&text))
            .unwrap_or(0);

        let description = self
            .description
            .as_ref()
            .and_then(|selector| first_text(document, selector))
            .unwrap_or_default();

        let breadcrumbs: Vec<String> = self
            .breadcrumbs
            .as_ref()
            .map(|selector| document.select(selector).map(element_text).collect())
            .unwrap_or_default();
        let categories = categories_from_breadcrumbs(
            &breadcrumbs,
            self.breadcrumbs_keep_first,
            self.breadcrumbs_keep_last,
        );

        let on_sale = self
            .on_sale
            .as_ref()
            .map(|selector| document.select(selector).next().is_some())
            .unwrap_or(false);

        let source = match &self.source {
            Some(source) => source.clone(),
            None => url_host(url.as_str()).map_err(|e| ExtractError::Url(e.to_string()))?,
        };

        let images = self.extract_images(document, url);
        let main_image_url = images.first().map(|i| i.url.clone()).unwrap_or_default();

        Ok(Some(ProductData {
            slug: slug_of(&[&self.slug_prefix, &code, &title]),
            source,
            product_code: code,
            url: url.to_string(),
            title,
            description,
            main_image_url,
            price,
            on_sale,
            specs: self.extract_specs(document),
            stocks: self.extract_stocks(document),
            images,
            categories,
        }))
    }
}

fn compile(selector: &str) -> Result<Selector, ConfigError> {
    Selector::parse(selector)
        .map_err(|e| ConfigError::InvalidSelector(format!("'{}': {}", selector, e)))
}

fn compile_optional(selector: &Option<String>) -> Result<Option<Selector>, ConfigError> {
    selector.as_deref().map(compile).transpose()
}

/// Whitespace-collapsed text of an element
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_text(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .map(element_text)
        .find(|text| !text.is_empty())
}

fn cell_texts(row: ElementRef<'_>) -> Vec<String> {
    match Selector::parse("td, th") {
        Ok(cells) => row.select(&cells).map(element_text).collect(),
        Err(_) => Vec::new(),
    }
}
