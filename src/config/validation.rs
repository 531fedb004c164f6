use crate::config::types::{
    AppConfig, Config, CrawlerConfig, NotifyConfig, ScheduleConfig, SelectorConfig, SenderKind,
    SiteConfig,
};
use crate::ConfigError;
use scraper::Selector;
use std::collections::HashSet;
use url::Url;

/// Upper bound of every hour-based setting (ten years)
const MAX_HOURS: u64 = 24 * 365 * 10;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_app_config(&config.app)?;
    validate_crawler_config(&config.crawler)?;
    validate_schedule_config(&config.schedule)?;
    validate_notify_config(&config.notify)?;
    validate_sites(&config.sites)?;
    Ok(())
}

fn validate_app_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.image_dir.is_empty() {
        return Err(ConfigError::Validation(
            "image_dir cannot be empty".to_string(),
        ));
    }

    validate_http_url(&config.image_base_url, "image_base_url")?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.queue_workers < 1 || config.queue_workers > 64 {
        return Err(ConfigError::Validation(format!(
            "queue_workers must be between 1 and 64, got {}",
            config.queue_workers
        )));
    }

    if config.parallelism < 1 || config.parallelism > 64 {
        return Err(ConfigError::Validation(format!(
            "parallelism must be between 1 and 64, got {}",
            config.parallelism
        )));
    }

    if config.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "timeout_secs must be >= 1".to_string(),
        ));
    }

    if config.resume_window_hours > MAX_HOURS {
        return Err(ConfigError::Validation(format!(
            "resume_window_hours must be at most {}, got {}",
            MAX_HOURS, config.resume_window_hours
        )));
    }

    if !config.random_user_agent && config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty when random_user_agent is off".to_string(),
        ));
    }

    Ok(())
}

fn validate_schedule_config(config: &ScheduleConfig) -> Result<(), ConfigError> {
    let hours = [
        ("price_change_hours", config.price_change_hours),
        ("watcher_hours", config.watcher_hours),
        ("view_retention_hours", config.view_retention_hours),
        ("cleaner_hours", config.cleaner_hours),
        ("price_window_hours", config.price_window_hours),
        ("watch_window_hours", config.watch_window_hours),
        ("view_retention_window_hours", config.view_retention_window_hours),
    ];
    for (name, value) in hours {
        validate_hours(name, value)?;
    }

    if config.page_size == 0 {
        return Err(ConfigError::Validation(
            "page_size must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_hours(name: &str, hours: u64) -> Result<(), ConfigError> {
    if hours == 0 || hours > MAX_HOURS {
        return Err(ConfigError::Validation(format!(
            "{} must be between 1 and {}, got {}",
            name, MAX_HOURS, hours
        )));
    }
    Ok(())
}

fn validate_notify_config(config: &NotifyConfig) -> Result<(), ConfigError> {
    validate_http_url(&config.site_url, "site_url")?;

    if config.sender == SenderKind::Webhook {
        match &config.webhook_url {
            Some(url) => {
                validate_http_url(url, "webhook_url")?;
            }
            None => {
                return Err(ConfigError::Validation(
                    "webhook_url is required for the webhook sender".to_string(),
                ))
            }
        }
    }

    Ok(())
}

/// Validates site entries
fn validate_sites(sites: &[SiteConfig]) -> Result<(), ConfigError> {
    if sites.is_empty() {
        return Err(ConfigError::Validation(
            "at least one [[site]] must be configured".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for site in sites {
        let url = validate_http_url(&site.url, "site url")?;
        let host = crate::url::url_host(url.as_str())
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", site.url, e)))?;
        if !seen.insert(host.clone()) {
            return Err(ConfigError::Validation(format!(
                "site '{}' is configured more than once",
                host
            )));
        }

        if site.slug_prefix.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "site '{}' needs a slug_prefix",
                host
            )));
        }

        validate_selector(&site.content_selector)?;
        validate_selectors(&site.selectors)?;
    }

    Ok(())
}

fn validate_selectors(selectors: &SelectorConfig) -> Result<(), ConfigError> {
    for required in [&selectors.title, &selectors.code, &selectors.price] {
        validate_selector(required)?;
    }

    let optional = [
        &selectors.description,
        &selectors.images,
        &selectors.specs,
        &selectors.stocks,
        &selectors.breadcrumbs,
        &selectors.on_sale,
    ];
    for selector in optional.into_iter().flatten() {
        validate_selector(selector)?;
    }

    Ok(())
}

fn validate_selector(selector: &str) -> Result<(), ConfigError> {
    Selector::parse(selector)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidSelector(format!("'{}': {}", selector, e)))
}

fn validate_http_url(value: &str, field: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", field, value, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "{} '{}' must use http or https",
            field, value
        )));
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_selector() {
        assert!(validate_selector(".product-page").is_ok());
        assert!(validate_selector("#description p").is_ok());
        assert!(validate_selector("table tr:nth-child(2)").is_ok());

        assert!(matches!(
            validate_selector("[[["),
            Err(ConfigError::InvalidSelector(_))
        ));
    }

    #[test]
    fn test_validate_http_url() {
        assert!(validate_http_url("https://elko.is", "url").is_ok());
        assert!(validate_http_url("http://127.0.0.1:8080/", "url").is_ok());

        assert!(validate_http_url("ftp://elko.is", "url").is_err());
        assert!(validate_http_url("not a url", "url").is_err());
    }

    #[test]
    fn test_validate_notify_requires_webhook_url() {
        let mut config = NotifyConfig {
            sender: SenderKind::Webhook,
            ..NotifyConfig::default()
        };
        assert!(validate_notify_config(&config).is_err());

        config.webhook_url = Some("https://hooks.example.com/mail".to_string());
        assert!(validate_notify_config(&config).is_ok());
    }

    #[test]
    fn test_validate_schedule_bounds() {
        assert!(validate_schedule_config(&ScheduleConfig::default()).is_ok());

        let config = ScheduleConfig {
            watcher_hours: u64::MAX,
            ..ScheduleConfig::default()
        };
        assert!(validate_schedule_config(&config).is_err());

        let config = ScheduleConfig {
            price_window_hours: MAX_HOURS + 1,
            ..ScheduleConfig::default()
        };
        assert!(validate_schedule_config(&config).is_err());

        let config = ScheduleConfig {
            watch_window_hours: 0,
            ..ScheduleConfig::default()
        };
        assert!(validate_schedule_config(&config).is_err());
    }

    #[test]
    fn test_validate_crawler_defaults() {
        assert!(validate_crawler_config(&CrawlerConfig::default()).is_ok());

        let config = CrawlerConfig {
            parallelism: 0,
            ..CrawlerConfig::default()
        };
        assert!(validate_crawler_config(&config).is_err());

        let config = CrawlerConfig {
            resume_window_hours: u64::MAX,
            ..CrawlerConfig::default()
        };
        assert!(validate_crawler_config(&config).is_err());
    }
}
