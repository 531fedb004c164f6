use crate::url::domain::{parse_http_url, strip_www};
use crate::{UrlError, UrlResult};
use sha2::{Digest, Sha256};

/// Produces the canonical form of a product URL
///
/// # Canonicalization Steps
///
/// 1. Parse the URL; reject if malformed or not http(s)
/// 2. Lowercase the host and remove the `www.` prefix
/// 3. Remove the fragment
/// 4. Drop every query parameter not named in `keep`
/// 5. Keep only the first value of each kept parameter, sorted by name
///
/// # Arguments
///
/// * `raw` - The URL to canonicalize
/// * `keep` - Query parameter names that identify the product
///
/// # Examples
///
/// ```
/// use pricewatch::url::clean_url;
///
/// let url = clean_url("https://www.byko.is/vara?ProductID=12&utm_source=x", &["ProductID"]).unwrap();
/// assert_eq!(url, "https://byko.is/vara?ProductID=12");
/// ```
pub fn clean_url<S: AsRef<str>>(raw: &str, keep: &[S]) -> UrlResult<String> {
    let mut url = parse_http_url(raw)?;

    let host = url.host_str().ok_or(UrlError::MissingDomain)?.to_lowercase();
    let bare = strip_www(&host).to_string();
    url.set_host(Some(&bare))
        .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;
    url.set_fragment(None);

    let mut kept: Vec<(String, String)> = Vec::new();
    for name in keep {
        let name = name.as_ref();
        if let Some((_, value)) = url.query_pairs().find(|(k, _)| k == name) {
            kept.push((name.to_string(), value.into_owned()));
        }
    }
    kept.sort_by(|a, b| a.0.cmp(&b.0));

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    Ok(url.to_string())
}

/// Returns the visited-set key of a fetch target
///
/// The fingerprint is the hex SHA-256 of the request method and the URL
/// without its fragment.
pub fn fingerprint(raw: &str) -> String {
    let target = match parse_http_url(raw) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => raw.trim().to_string(),
    };

    let mut hasher = Sha256::new();
    hasher.update(b"GET ");
    hasher.update(target.as_bytes());
    hex::encode(hasher.finalize())
}
