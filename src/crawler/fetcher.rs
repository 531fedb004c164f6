//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building the HTTP client from the crawler configuration
//! - Per-request user agents
//! - Cookie persistence through the job's crawl-state backend
//! - Error classification

use crate::backend::CrawlBackend;
use crate::config::CrawlerConfig;
use crate::url::url_host;
use reqwest::header::{CONTENT_TYPE, COOKIE, SET_COOKIE, USER_AGENT};
use reqwest::Client;
use std::time::Duration;
use tracing::warn;

/// Result of a fetch operation
#[derive(Debug)]
pub enum FetchResult {
    /// Successfully fetched the page
    Success {
        /// Final URL after redirects
        final_url: String,
        /// HTTP status code
        status_code: u16,
        /// Content-Type header value
        content_type: String,
        /// Response body
        body: String,
    },

    /// The server answered with a non-success status
    HttpError {
        /// The HTTP status code
        status_code: u16,
    },

    /// Network error (connection refused, timeout, etc.)
    NetworkError {
        /// Error description
        error: String,
    },
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchResult::Success { .. })
    }
}

/// Builds an HTTP client with the crawler's timeout and compression settings
///
/// The user agent is not set on the client; every request carries its own.
///
/// # Arguments
///
/// * `config` - The crawler configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &CrawlerConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetches a URL, sending and storing the host's cookies
///
/// # Request Flow
///
/// 1. Load the cookies stored for the URL's host and send them
/// 2. Send the GET request with the given user agent
/// 3. Merge any `Set-Cookie` values into the stored cookies
/// 4. Classify the response
///
/// Cookie storage failures are logged and never fail the fetch.
///
/// # Arguments
///
/// * `client` - The HTTP client to use
/// * `url` - The URL to fetch
/// * `user_agent` - Value of the `User-Agent` header
/// * `cookies` - Backend holding the job's cookies
pub async fn fetch_page(
    client: &Client,
    url: &str,
    user_agent: &str,
    cookies: &dyn CrawlBackend,
) -> FetchResult {
    let host = url_host(url).unwrap_or_default();
    let stored = match cookies.cookies(&host) {
        Ok(stored) => stored,
        Err(e) => {
            warn!("Failed to load cookies for {}: {}", host, e);
            String::new()
        }
    };

    let mut request = client.get(url).header(USER_AGENT, user_agent);
    if !stored.is_empty() {
        request = request.header(COOKIE, stored.as_str());
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            let error = if e.is_timeout() {
                "Request timeout".to_string()
            } else if e.is_connect() {
                format!("Connection failed: {}", e)
            } else {
                e.to_string()
            };
            return FetchResult::NetworkError { error };
        }
    };

    let set_cookies: Vec<&str> = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    if !set_cookies.is_empty() {
        let merged = merge_cookies(&stored, &set_cookies);
        if let Err(e) = cookies.set_cookies(&host, &merged) {
            warn!("Failed to store cookies for {}: {}", host, e);
        }
    }

    let status = response.status();
    if !status.is_success() {
        return FetchResult::HttpError {
            status_code: status.as_u16(),
        };
    }

    let final_url = response.url().to_string();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    match response.text().await {
        Ok(body) => FetchResult::Success {
            final_url,
            status_code: status.as_u16(),
            content_type,
            body,
        },
        Err(e) => FetchResult::NetworkError {
            error: e.to_string(),
        },
    }
}

/// Merges `Set-Cookie` header values into a `Cookie` header value
///
/// Only the `name=value` pair of each header is kept. A cookie that is
/// already present is replaced in place; new cookies are appended.
///
/// # Examples
///
/// ```
/// use pricewatch::crawler::merge_cookies;
///
/// let merged = merge_cookies("a=1; b=2", &["b=3; Path=/", "c=4; HttpOnly"]);
/// assert_eq!(merged, "a=1; b=3; c=4");
/// ```
pub fn merge_cookies(existing: &str, set_cookies: &[&str]) -> String {
    let mut pairs: Vec<(String, String)> = existing
        .split(';')
        .filter_map(split_pair)
        .collect();

    for header in set_cookies {
        let Some((name, value)) = header.split(';').next().and_then(split_pair) else {
            continue;
        };
        match pairs.iter_mut().find(|(n, _)| *n == name) {
            Some(pair) => pair.1 = value,
            None => pairs.push((name, value)),
        }
    }

    pairs
        .iter()
        .map(|(n, v)| format!("{}={}", n, v))
        .collect::<Vec<_>>()
        .join("; ")
}

fn split_pair(raw: &str) -> Option<(String, String)> {
    let (name, value) = raw.trim().split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_build_http_client() {
        let client = build_http_client(&CrawlerConfig::default());
        assert!(client.is_ok());
    }

    #[test]
    fn test_merge_cookies() {
        assert_eq!(merge_cookies("", &["sid=abc; Path=/"]), "sid=abc");
        assert_eq!(merge_cookies("sid=abc", &[]), "sid=abc");
        assert_eq!(merge_cookies("sid=abc", &["sid=def", "lang=is"]), "sid=def; lang=is");
        assert_eq!(merge_cookies("sid=abc", &["garbage"]), "sid=abc");
    }

    #[tokio::test]
    async fn test_fetch_sends_user_agent_and_keeps_cookies() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(header("user-agent", "Pricewatch"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html></html>", "text/html")
                    .insert_header("set-cookie", "sid=abc; Path=/"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/second"))
            .and(header("cookie", "sid=abc"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let client = build_http_client(&CrawlerConfig::default()).unwrap();
        let backend = MemoryBackend::new(None);

        let first = fetch_page(&client, &format!("{}/", server.uri()), "Pricewatch", &backend).await;
        match first {
            FetchResult::Success {
                status_code,
                content_type,
                body,
                ..
            } => {
                assert_eq!(status_code, 200);
                assert_eq!(content_type, "text/html");
                assert_eq!(body, "<html></html>");
            }
            other => panic!("unexpected result {:?}", other),
        }

        let second =
            fetch_page(&client, &format!("{}/second", server.uri()), "Pricewatch", &backend).await;
        assert!(second.is_success());
    }

    #[tokio::test]
    async fn test_fetch_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = build_http_client(&CrawlerConfig::default()).unwrap();
        let backend = MemoryBackend::new(None);
        let result = fetch_page(&client, &server.uri(), "Pricewatch", &backend).await;
        assert!(matches!(result, FetchResult::HttpError { status_code: 404 }));
    }
}
