use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// The hash is logged at startup and stored with every run so that a change
/// in behaviour can be traced back to a configuration change.
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
    use crate::config::{OverlapPolicy, StopPolicy};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const MINIMAL: &str = r#"
[site]
listing-url = "https://bbs.example.com/forum.php?mod=forumdisplay&fid=140&page={page}"
base-url = "https://bbs.example.com/"
user-agent = "Mozilla/5.0 (X11; Linux x86_64)"

[storage]
database-path = "./harvest.db"
"#;

    #[test]
    fn test_load_minimal_config_uses_defaults() {
        let file = create_temp_config(MINIMAL);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.site.utc_offset_hours, 8);
        assert_eq!(config.fetcher.max_retries, 3);
        assert_eq!(config.fetcher.retry_delay_ms, 500);
        assert_eq!(config.crawler.start_page, 1);
        assert_eq!(config.crawler.max_pages, 30);
        assert_eq!(config.crawler.stop_policy, StopPolicy::FirstDuplicate);
        assert_eq!(config.schedule.overlap, OverlapPolicy::Skip);
        assert!(config.schedule.run_on_start);
        assert_eq!(config.trigger.default_keywords, vec!["蓝屏".to_string()]);
        assert!(config.dispatch.is_none());
    }

    #[test]
    fn test_load_full_config() {
        let content = format!(
            "{MINIMAL}
[fetcher]
timeout-secs = 5
max-retries = 2
retry-delay-ms = 100

[crawler]
start-page = 3
max-pages = 2
page-delay-ms = 0
item-delay-ms = 0
stop-policy = \"whole-page\"

[trigger]
dispatch-on-images = true
min-replies = 5
min-views = 100
default-keywords = [\"蓝屏\", \"bsod\"]

[schedule]
interval-secs = 60
overlap = \"coalesce\"
run-on-start = false

[dispatch]
endpoint = \"http://localhost:9000/analyze\"
workers = 4
"
        );
        let config = parse_config(&content).unwrap();

        assert_eq!(config.fetcher.timeout_secs, 5);
        assert_eq!(config.crawler.start_page, 3);
        assert_eq!(config.crawler.stop_policy, StopPolicy::WholePage);
        assert!(config.trigger.dispatch_on_images);
        assert_eq!(config.trigger.min_replies, Some(5));
        assert_eq!(config.schedule.overlap, OverlapPolicy::Coalesce);
        assert!(!config.schedule.run_on_start);

        let dispatch = config.dispatch.unwrap();
        assert_eq!(dispatch.workers, 4);
        assert_eq!(dispatch.max_retries, 3);
        assert_eq!(dispatch.retry_delay_secs, 60);
    }

    #[test]
    fn test_listing_url_for_page() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(
            config.site.listing_url_for(7),
            "https://bbs.example.com/forum.php?mod=forumdisplay&fid=140&page=7"
        );
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/harvest.toml"));
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
        let content = format!("{MINIMAL}\n[crawler]\nmax-pages = 0\n");
        let result = parse_config(&content);
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
