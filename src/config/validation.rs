use crate::config::types::{
    Config, CrawlerConfig, ExtractConfig, OriginConfig, RetrySettings, SchedulerConfig,
    ServeConfig, StoreBackend, StoreConfig, TransformConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_origin_config(&config.origin)?;
    validate_transform_config(&config.transform)?;
    validate_store_config(&config.store)?;
    validate_scheduler_config(&config.scheduler)?;
    validate_crawler_config(&config.crawler)?;
    validate_extract_config(&config.extract)?;
    validate_retry_settings("retry.origin", &config.retry.origin)?;
    validate_retry_settings("retry.transform", &config.retry.transform)?;
    validate_retry_settings("retry.sitemap", &config.retry.sitemap)?;
    validate_serve_config(&config.serve)?;
    Ok(())
}

fn validate_origin_config(config: &OriginConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty()
        || !config
            .crawler_name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "origin.crawler-name must be non-empty alphanumeric (hyphens allowed), got '{}'",
            config.crawler_name
        )));
    }

    if let Some(contact) = &config.contact_url {
        validate_http_url("origin.contact-url", contact)?;
    }

    if config.timeout_ms < 100 || config.connect_timeout_ms < 100 {
        return Err(ConfigError::Validation(
            "origin timeouts must be >= 100ms".to_string(),
        ));
    }

    Ok(())
}

fn validate_transform_config(config: &TransformConfig) -> Result<(), ConfigError> {
    validate_http_url("transform.endpoint", &config.endpoint)?;

    if !(1..=100).contains(&config.quality) {
        return Err(ConfigError::Validation(format!(
            "transform.quality must be between 1 and 100, got {}",
            config.quality
        )));
    }

    if config.variants.is_empty() {
        return Err(ConfigError::Validation(
            "transform.variants must list at least one variant".to_string(),
        ));
    }

    for (i, spec) in config.variant_specs().iter().enumerate() {
        spec.validate().map_err(|e| {
            ConfigError::Validation(format!("transform.variants[{}]: {}", i, e))
        })?;
    }

    Ok(())
}

fn validate_store_config(config: &StoreConfig) -> Result<(), ConfigError> {
    if config.backend == StoreBackend::Filesystem && config.root.trim().is_empty() {
        return Err(ConfigError::Validation(
            "store.root cannot be empty for the filesystem backend".to_string(),
        ));
    }

    if let Some(public_url) = &config.public_url {
        validate_http_url("store.public-url", public_url)?;
    }

    Ok(())
}

fn validate_scheduler_config(config: &SchedulerConfig) -> Result<(), ConfigError> {
    if config.max_concurrent < 1 || config.max_concurrent > 100 {
        return Err(ConfigError::Validation(format!(
            "scheduler.max-concurrent must be between 1 and 100, got {}",
            config.max_concurrent
        )));
    }
    Ok(())
}

fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.batch_size < 1 {
        return Err(ConfigError::Validation(format!(
            "crawler.batch-size must be >= 1, got {}",
            config.batch_size
        )));
    }

    if config.database_path.trim().is_empty() {
        return Err(ConfigError::Validation(
            "crawler.database-path cannot be empty".to_string(),
        ));
    }

    if let Some(bad) = config
        .relevant_sitemaps
        .iter()
        .find(|s| s.trim().is_empty())
    {
        return Err(ConfigError::Validation(format!(
            "crawler.relevant-sitemaps contains an empty entry: '{}'",
            bad
        )));
    }

    Ok(())
}

fn validate_extract_config(config: &ExtractConfig) -> Result<(), ConfigError> {
    for prefix in &config.path_prefixes {
        if !prefix.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "extract.path-prefixes entries must start with '/', got '{}'",
                prefix
            )));
        }
    }

    for pattern in &config.allowed_hosts {
        validate_host_pattern(pattern)?;
    }

    Ok(())
}

/// Validates an allowed-host pattern
///
/// Valid: `example.com`, `*.example.com`, `127.0.0.1`. Invalid: empty,
/// `*example.com`, `example.*`, `*.*.example.com`.
fn validate_host_pattern(pattern: &str) -> Result<(), ConfigError> {
    let base = pattern.strip_prefix("*.").unwrap_or(pattern);

    if base.is_empty() || base.contains('*') {
        return Err(ConfigError::InvalidPattern(format!(
            "'{}': wildcards are only allowed as a leading '*.'",
            pattern
        )));
    }

    if base.contains('/') || base.contains(':') {
        return Err(ConfigError::InvalidPattern(format!(
            "'{}': expected a host name, not a URL",
            pattern
        )));
    }

    Ok(())
}

fn validate_retry_settings(section: &str, settings: &RetrySettings) -> Result<(), ConfigError> {
    if settings.initial_delay_ms > settings.max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "{}: initial-delay-ms ({}) cannot exceed max-delay-ms ({})",
            section, settings.initial_delay_ms, settings.max_delay_ms
        )));
    }

    if settings.attempt_timeout_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "{}: attempt-timeout-ms must be >= 100ms, got {}ms",
            section, settings.attempt_timeout_ms
        )));
    }

    Ok(())
}

fn validate_serve_config(config: &ServeConfig) -> Result<(), ConfigError> {
    if config.cache_control.trim().is_empty() {
        return Err(ConfigError::Validation(
            "serve.cache-control cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("{} '{}': {}", field, value, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "{} must be http or https, got '{}'",
            field, value
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VariantConfig;
    use crate::image::ImageFormat;

    fn valid_config() -> Config {
        Config::with_endpoint("https://transform.example.com/v1")
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_invalid_endpoint() {
        let mut config = valid_config();
        config.transform.endpoint = "ftp://transform.example.com".to_string();
        assert!(matches!(validate(&config), Err(ConfigError::InvalidUrl(_))));
    }

    #[test]
    fn test_quality_out_of_range() {
        let mut config = valid_config();
        config.transform.quality = 0;
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_variant_quality_out_of_range() {
        let mut config = valid_config();
        config.transform.variants = vec![VariantConfig {
            quality: Some(150),
            ..VariantConfig::of(ImageFormat::Avif)
        }];
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_empty_variants() {
        let mut config = valid_config();
        config.transform.variants.clear();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_max_concurrent_bounds() {
        let mut config = valid_config();
        config.scheduler.max_concurrent = 0;
        assert!(validate(&config).is_err());
        config.scheduler.max_concurrent = 101;
        assert!(validate(&config).is_err());
        config.scheduler.max_concurrent = 100;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_batch_size() {
        let mut config = valid_config();
        config.crawler.batch_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_retry_delays_ordered() {
        let mut config = valid_config();
        config.retry.origin.initial_delay_ms = 60_000;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_host_patterns() {
        assert!(validate_host_pattern("example.com").is_ok());
        assert!(validate_host_pattern("*.example.com").is_ok());
        assert!(validate_host_pattern("127.0.0.1").is_ok());
        assert!(validate_host_pattern("").is_err());
        assert!(validate_host_pattern("*example.com").is_err());
        assert!(validate_host_pattern("*.*.example.com").is_err());
        assert!(validate_host_pattern("https://example.com").is_err());
    }

    #[test]
    fn test_path_prefix_must_be_absolute() {
        let mut config = valid_config();
        config.extract.path_prefixes = vec!["wp-content/uploads/".to_string()];
        assert!(validate(&config).is_err());
    }
}
