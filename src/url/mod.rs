//! URL handling module for Pricewatch
//!
//! This module provides product URL canonicalization, host helpers,
//! request fingerprints and the per-site allow-list.

mod domain;
mod normalize;

use url::Url;

// Re-export main functions
pub use domain::{url_host, with_www, without_www};
pub use normalize::{clean_url, fingerprint};

/// Hosts a site's crawl job may fetch from
///
/// A site is reachable both on its apex host and on the `www.` host.
#[derive(Debug, Clone)]
pub struct AllowedDomains {
    hosts: Vec<String>,
}

impl AllowedDomains {
    /// Builds the allow-list for a site start URL
    ///
    /// # Examples
    ///
    /// ```
    /// use pricewatch::url::AllowedDomains;
    ///
    /// let allowed = AllowedDomains::for_site("https://www.elko.is/").unwrap();
    /// assert!(allowed.allows("https://elko.is/vara/1"));
    /// assert!(allowed.allows("https://www.elko.is/vara/1"));
    /// assert!(!allowed.allows("https://facebook.com/elko"));
    /// ```
    pub fn for_site(start_url: &str) -> crate::UrlResult<Self> {
        let host = url_host(start_url)?;
        Ok(Self {
            hosts: vec![host.clone(), format!("www.{}", host)],
        })
    }

    /// Returns true if the URL's host is on the list
    pub fn allows(&self, raw: &str) -> bool {
        match Url::parse(raw) {
            Ok(url) => url
                .host_str()
                .map(|h| self.hosts.iter().any(|allowed| allowed.eq_ignore_ascii_case(h)))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }
}
