use crate::config::types::{
    Config, CrawlerConfig, DispatchConfig, FetcherConfig, ScheduleConfig, SiteConfig,
    StorageConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_site_config(&config.site)?;
    validate_fetcher_config(&config.fetcher)?;
    validate_crawler_config(&config.crawler)?;
    validate_schedule_config(&config.schedule)?;
    validate_storage_config(&config.storage)?;
    if let Some(dispatch) = &config.dispatch {
        validate_dispatch_config(dispatch)?;
    }
    Ok(())
}

/// Validates the site description
fn validate_site_config(config: &SiteConfig) -> Result<(), ConfigError> {
    if !config.listing_url.contains("{page}") {
        return Err(ConfigError::Validation(format!(
            "listing-url must contain a {{page}} placeholder, got '{}'",
            config.listing_url
        )));
    }

    validate_http_url("listing-url", &config.listing_url_for(1))?;
    validate_http_url("base-url", &config.base_url)?;

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if !(-14..=14).contains(&config.utc_offset_hours) {
        return Err(ConfigError::Validation(format!(
            "utc-offset-hours must be between -14 and 14, got {}",
            config.utc_offset_hours
        )));
    }

    Ok(())
}

/// Validates fetcher retry settings
fn validate_fetcher_config(config: &FetcherConfig) -> Result<(), ConfigError> {
    if config.timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "timeout-secs must be >= 1".to_string(),
        ));
    }

    if config.max_retries < 1 {
        return Err(ConfigError::Validation(format!(
            "fetcher max-retries must be >= 1, got {}",
            config.max_retries
        )));
    }

    Ok(())
}

/// Validates page loop settings
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.start_page < 1 {
        return Err(ConfigError::Validation(format!(
            "start-page must be >= 1, got {}",
            config.start_page
        )));
    }

    if config.max_pages < 1 {
        return Err(ConfigError::Validation(format!(
            "max-pages must be >= 1, got {}",
            config.max_pages
        )));
    }

    Ok(())
}

/// Validates scheduler settings
fn validate_schedule_config(config: &ScheduleConfig) -> Result<(), ConfigError> {
    if config.interval_secs < 1 {
        return Err(ConfigError::Validation(
            "interval-secs must be >= 1".to_string(),
        ));
    }
    Ok(())
}

/// Validates storage configuration
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validates dispatch worker settings
fn validate_dispatch_config(config: &DispatchConfig) -> Result<(), ConfigError> {
    if let Some(endpoint) = &config.endpoint {
        validate_http_url("dispatch endpoint", endpoint)?;
    }

    if config.workers < 1 || config.workers > 32 {
        return Err(ConfigError::Validation(format!(
            "dispatch workers must be between 1 and 32, got {}",
            config.workers
        )));
    }

    if config.max_retries < 1 {
        return Err(ConfigError::Validation(format!(
            "dispatch max-retries must be >= 1, got {}",
            config.max_retries
        )));
    }

    Ok(())
}

/// Checks that a URL parses and uses http or https
fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {}: '{}': {}", field, value, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "{} must use http or https, got '{}'",
            field, value
        )));
    }

    Ok(())
}
