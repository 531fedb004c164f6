use crate::config::types::{Config, Environment};
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Environment variable overriding `app.environment`
pub const ENVIRONMENT_VAR: &str = "PRICEWATCH_ENV";

/// Loads and parses a configuration file from the given path
///
/// The deployment mode from the file is replaced by `PRICEWATCH_ENV` when
/// that variable holds a recognised value.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use pricewatch::config::load_config;
///
/// let config = load_config(Path::new("pricewatch.toml")).unwrap();
/// println!("Sites: {}", config.sites.len());
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut config = parse_config(&content)?;
    apply_environment_override(&mut config, std::env::var(ENVIRONMENT_VAR).ok().as_deref());
    validate(&config)?;
    Ok(config)
}

/// Parses configuration text without touching the process environment
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Replaces the configured environment with an override value, if valid
pub fn apply_environment_override(config: &mut Config, value: Option<&str>) {
    if let Some(env) = value.and_then(Environment::from_env_value) {
        config.app.environment = env;
    } else if let Some(raw) = value {
        tracing::warn!("Ignoring unknown {} value '{}'", ENVIRONMENT_VAR, raw);
    }
}

/// Computes a SHA-256 hash of the configuration file content
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendKind, CrawlMode};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const VALID_CONFIG: &str = r##"
[app]
environment = "production"
database-path = "./prices.db"
image-dir = "./static/img/products"
image-base-url = "https://api.example.com/image/product"

[crawler]
mode = "queue"
queue-workers = 4
item-storage = "durable"

[[site]]
url = "https://elko.is"
slug-prefix = "el"
content-selector = ".product-page"

[site.selectors]
title = "#product_title"
code = ".product-code"
price = ".product-price"

[[site]]
url = "https://www.tl.is"
slug-prefix = "tl"
content-selector = ".product"
dev-only = true

[site.selectors]
title = "h1"
code = ".sku"
price = ".price"
"##;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_parse_valid_config() {
        let config = parse_config(VALID_CONFIG).unwrap();

        assert_eq!(config.app.environment, Environment::Production);
        assert_eq!(config.crawler.mode, CrawlMode::Queue);
        assert_eq!(config.crawler.queue_workers, 4);
        assert_eq!(config.crawler.item_storage, BackendKind::Durable);
        assert_eq!(config.crawler.queue_storage, BackendKind::Volatile);
        assert_eq!(config.crawler.timeout_secs, 30);
        assert_eq!(config.schedule.price_change_hours, 11);
        assert_eq!(config.sites.len(), 2);
        assert_eq!(config.sites[0].selectors.image_attr, "src");
        assert_eq!(config.app.search_path(), "./prices.db");
    }

    #[test]
    fn test_active_sites_skip_dev_only_in_production() {
        let mut config = parse_config(VALID_CONFIG).unwrap();
        assert_eq!(config.active_sites().count(), 1);

        config.app.environment = Environment::Development;
        assert_eq!(config.active_sites().count(), 2);
    }

    #[test]
    fn test_environment_override() {
        let mut config = parse_config(VALID_CONFIG).unwrap();

        apply_environment_override(&mut config, Some("dev"));
        assert_eq!(config.app.environment, Environment::Development);

        apply_environment_override(&mut config, Some("prod"));
        assert_eq!(config.app.environment, Environment::Production);

        apply_environment_override(&mut config, Some("staging"));
        assert_eq!(config.app.environment, Environment::Production);

        apply_environment_override(&mut config, None);
        assert_eq!(config.app.environment, Environment::Production);
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/pricewatch.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let content = VALID_CONFIG.replace("queue-workers = 4", "queue-workers = 0");
        let file = create_temp_config(&content);
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_compute_config_hash() {
        let file1 = create_temp_config("content 1");
        let file2 = create_temp_config("content 2");

        let hash1 = compute_config_hash(file1.path()).unwrap();
        let again = compute_config_hash(file1.path()).unwrap();
        let hash2 = compute_config_hash(file2.path()).unwrap();

        assert_eq!(hash1, again);
        assert_eq!(hash1.len(), 64);
        assert_ne!(hash1, hash2);
    }
}
