//! HTML link discovery
//!
//! Every hyperlink on a fetched page is resolved against the page URL and
//! fed back into the crawl frontier.

use scraper::{Html, Selector};
use url::Url;

/// Extracts all followable links from a parsed document
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` tags anywhere in the document
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` links
/// - Data URIs
/// - Fragment-only links
///
/// Links are returned in document order and may repeat; the frontier
/// deduplicates them.
///
/// # Arguments
///
/// * `document` - The parsed HTML document
/// * `base_url` - The base URL for resolving relative links
///
/// # Example
///
/// ```
/// use pricewatch::crawler::extract_links;
/// use scraper::Html;
/// use url::Url;
///
/// let html = Html::parse_document(r#"<a href="/vara/1">Vara</a>"#);
/// let base = Url::parse("https://elko.is/flokkar").unwrap();
/// assert_eq!(extract_links(&html, &base), vec!["https://elko.is/vara/1".to_string()]);
/// ```
pub fn extract_links(document: &Html, base_url: &Url) -> Vec<String> {
    let mut links = Vec::new();

    if let Ok(a_selector) = Selector::parse("a[href]") {
        for element in document.select(&a_selector) {
            if element.value().attr("download").is_some() {
                continue;
            }

            if let Some(href) = element.value().attr("href") {
                if let Some(absolute_url) = resolve_link(href, base_url) {
                    links.push(absolute_url);
                }
            }
        }
    }

    links
}

/// Resolves a link href to an absolute URL and validates it
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - Invalid URLs
/// - Non-HTTP(S) URLs after resolution
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    match base_url.join(href) {
        Ok(mut absolute_url) => {
            if absolute_url.scheme() == "http" || absolute_url.scheme() == "https" {
                absolute_url.set_fragment(None);
                Some(absolute_url.to_string())
            } else {
                None
            }
        }
        Err(_) => None,
    }
}

/// Returns true if any element matches the site's content selector
pub fn matches_content(document: &Html, content: &Selector) -> bool {
    document.select(content).next().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_url() -> Url {
        Url::parse("https://example.com/page").unwrap()
    }

    fn links(html: &str) -> Vec<String> {
        extract_links(&Html::parse_document(html), &base_url())
    }

    #[test]
    fn test_extract_absolute_link() {
        let found = links(r#"<html><body><a href="https://other.com/page">Link</a></body></html>"#);
        assert_eq!(found, vec!["https://other.com/page".to_string()]);
    }

    #[test]
    fn test_extract_relative_link() {
        let found = links(r#"<html><body><a href="/other">Link</a></body></html>"#);
        assert_eq!(found, vec!["https://example.com/other".to_string()]);
    }

    #[test]
    fn test_extract_relative_path_link() {
        let found = links(r#"<html><body><a href="other">Link</a></body></html>"#);
        assert_eq!(found, vec!["https://example.com/other".to_string()]);
    }

    #[test]
    fn test_strips_fragment() {
        let found = links(r#"<a href="/vara?id=1#dom">Link</a>"#);
        assert_eq!(found, vec!["https://example.com/vara?id=1".to_string()]);
    }

    #[test]
    fn test_skip_special_schemes() {
        let html = r#"
            <a href="javascript:void(0)">a</a>
            <a href="mailto:test@example.com">b</a>
            <a href="tel:+3545551234">c</a>
            <a href="data:text/html,<h1>Test</h1>">d</a>
        "#;
        assert!(links(html).is_empty());
    }

    #[test]
    fn test_skip_download_link() {
        let found = links(r#"<html><body><a href="/file.pdf" download>Download</a></body></html>"#);
        assert!(found.is_empty());
    }

    #[test]
    fn test_skip_fragment_only() {
        let found = links(r##"<html><body><a href="#section">Jump</a></body></html>"##);
        assert!(found.is_empty());
    }

    #[test]
    fn test_mixed_valid_and_invalid_links() {
        let html = r#"
            <html>
            <body>
                <a href="/valid">Valid</a>
                <a href="javascript:alert('no')">Invalid</a>
                <a href="mailto:test@example.com">Invalid</a>
                <a href="/another-valid">Valid</a>
            </body>
            </html>
        "#;
        assert_eq!(links(html).len(), 2);
    }

    #[test]
    fn test_matches_content() {
        let document = Html::parse_document(r#"<body class="catalog-product-view"></body>"#);
        let product = Selector::parse("body.catalog-product-view").unwrap();
        let listing = Selector::parse(".category-list").unwrap();
        assert!(matches_content(&document, &product));
        assert!(!matches_content(&document, &listing));
    }
}
