//! Forum-Harvest: incremental forum ingestion
//!
//! This crate pages through a forum listing, extracts post summaries and
//! detail content, normalizes timestamps, stores each post exactly once and
//! hands interesting posts to a downstream analysis stage.

pub mod config;
pub mod crawler;
pub mod dispatch;
pub mod output;
pub mod record;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Forum-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] storage::StoreError),

    #[error("Run failed: {0}")]
    Run(#[from] crawler::RunError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Forum-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Harvester, RunParams, RunSummary, StopReason};
pub use record::{CanonicalRecord, EnrichedPost, PostSummary};
pub use storage::{InsertOutcome, RecordStore, SqliteStore};
