use crate::{UrlError, UrlResult};
use url::Url;

/// Parses an absolute http(s) URL
pub(crate) fn parse_http_url(raw: &str) -> UrlResult<Url> {
    let url = Url::parse(raw.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(url.scheme().to_string()));
    }

    if url.host_str().is_none() {
        return Err(UrlError::MissingDomain);
    }

    Ok(url)
}

/// Returns the lowercase host of a URL without a leading `www.`
///
/// # Examples
///
/// ```
/// use pricewatch::url::url_host;
///
/// assert_eq!(url_host("https://www.tl.is/vara/123").unwrap(), "tl.is");
/// assert_eq!(url_host("https://Elko.is").unwrap(), "elko.is");
/// ```
pub fn url_host(raw: &str) -> UrlResult<String> {
    let url = parse_http_url(raw)?;
    let host = url.host_str().ok_or(UrlError::MissingDomain)?.to_lowercase();
    Ok(strip_www(&host).to_string())
}

/// Returns the URL with the `www.` prefix removed from its host
///
/// The scheme, path and query are preserved.
pub fn without_www(raw: &str) -> UrlResult<String> {
    let mut url = parse_http_url(raw)?;
    let host = url.host_str().ok_or(UrlError::MissingDomain)?.to_lowercase();
    let bare = strip_www(&host).to_string();
    url.set_host(Some(&bare))
        .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;
    Ok(url.to_string())
}

/// Returns the URL with a `www.` prefix on its host
///
/// A URL that already has the prefix is returned unchanged.
pub fn with_www(raw: &str) -> UrlResult<String> {
    let mut url = parse_http_url(raw)?;
    let host = url.host_str().ok_or(UrlError::MissingDomain)?.to_lowercase();
    if host.starts_with("www.") {
        return Ok(url.to_string());
    }
    url.set_host(Some(&format!("www.{}", host)))
        .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;
    Ok(url.to_string())
}

pub(crate) fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}
