//! User-agent selection
//!
//! A crawl either identifies itself with one fixed string or sends a random
//! browser user agent on every request.

use rand::seq::SliceRandom;
use rand::Rng;

const FIREFOX_VERSIONS: &[f32] = &[58.0, 57.0, 56.0, 52.0, 48.0, 40.0, 35.0];

const CHROME_VERSIONS: &[&str] = &[
    "65.0.3325.146",
    "64.0.3282.0",
    "41.0.2228.0",
    "40.0.2214.93",
    "37.0.2062.124",
];

const OS_STRINGS: &[&str] = &[
    "Macintosh; Intel Mac OS X 10_10",
    "Windows NT 10.0",
    "Windows NT 5.1",
    "Windows NT 6.1; WOW64",
    "Windows NT 6.1; Win64; x64",
    "X11; Linux x86_64",
];

/// How the `User-Agent` header of each request is chosen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAgentPolicy {
    Fixed(String),
    Random,
}

impl UserAgentPolicy {
    pub fn new(random: bool, fixed: &str) -> Self {
        if random {
            UserAgentPolicy::Random
        } else {
            UserAgentPolicy::Fixed(fixed.to_string())
        }
    }

    /// User agent for the next request
    pub fn pick(&self) -> String {
        match self {
            UserAgentPolicy::Fixed(ua) => ua.clone(),
            UserAgentPolicy::Random => random_user_agent(),
        }
    }
}

/// A random Firefox or Chrome user agent on a random OS
pub fn random_user_agent() -> String {
    let mut rng = rand::thread_rng();
    let os = OS_STRINGS.choose(&mut rng).copied().unwrap_or(OS_STRINGS[0]);

    if rng.gen_bool(0.5) {
        let version = FIREFOX_VERSIONS
            .choose(&mut rng)
            .copied()
            .unwrap_or(FIREFOX_VERSIONS[0]);
        format!(
            "Mozilla/5.0 ({}; rv:{:.1}) Gecko/20100101 Firefox/{:.1}",
            os, version, version
        )
    } else {
        let version = CHROME_VERSIONS
            .choose(&mut rng)
            .copied()
            .unwrap_or(CHROME_VERSIONS[0]);
        format!(
            "Mozilla/5.0 ({}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{} Safari/537.36",
            os, version
        )
    }
}
