use serde::Deserialize;

/// Main configuration structure for Forum-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub site: SiteConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub dispatch: Option<DispatchConfig>,
}

/// The forum being harvested
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Listing page URL with a `{page}` placeholder
    #[serde(rename = "listing-url")]
    pub listing_url: String,

    /// Base URL used to resolve relative detail and image links
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// User-Agent header sent with every request
    #[serde(rename = "user-agent")]
    pub user_agent: String,

    /// Offset of the forum's local time, used to interpret rendered dates
    #[serde(rename = "utc-offset-hours", default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
}

impl SiteConfig {
    /// Builds the listing URL for a 1-based page number
    pub fn listing_url_for(&self, page: u32) -> String {
        self.listing_url.replace("{page}", &page.to_string())
    }
}

/// HTTP retry behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct FetcherConfig {
    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Total attempts per URL, including the first
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed pause between attempts (milliseconds)
    #[serde(rename = "retry-delay-ms", default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Page loop behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    #[serde(rename = "start-page", default = "default_start_page")]
    pub start_page: u32,

    /// Maximum listing pages visited per run
    #[serde(rename = "max-pages", default = "default_max_pages")]
    pub max_pages: u32,

    /// Pause between listing pages (milliseconds)
    #[serde(rename = "page-delay-ms", default = "default_page_delay_ms")]
    pub page_delay_ms: u64,

    /// Pause between posts on one page (milliseconds)
    #[serde(rename = "item-delay-ms", default = "default_item_delay_ms")]
    pub item_delay_ms: u64,

    #[serde(rename = "stop-policy", default)]
    pub stop_policy: StopPolicy,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            start_page: default_start_page(),
            max_pages: default_max_pages(),
            page_delay_ms: default_page_delay_ms(),
            item_delay_ms: default_item_delay_ms(),
            stop_policy: StopPolicy::default(),
        }
    }
}

/// How the controller decides it has caught up with stored data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopPolicy {
    /// Stop at the first already-stored post
    #[default]
    FirstDuplicate,

    /// Finish every page; stop after a page that stored nothing new
    WholePage,
}

/// Rules deciding which new records go to analysis
#[derive(Debug, Clone, Deserialize)]
pub struct TriggerConfig {
    #[serde(rename = "dispatch-on-images", default)]
    pub dispatch_on_images: bool,

    #[serde(rename = "min-replies", default)]
    pub min_replies: Option<u64>,

    #[serde(rename = "min-views", default)]
    pub min_views: Option<u64>,

    /// Keywords guaranteed to exist in the keyword table at startup
    #[serde(rename = "default-keywords", default = "default_keywords")]
    pub default_keywords: Vec<String>,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            dispatch_on_images: false,
            min_replies: None,
            min_views: None,
            default_keywords: default_keywords(),
        }
    }
}

/// Recurring run configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(rename = "interval-secs", default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default)]
    pub overlap: OverlapPolicy,

    /// Start a run immediately instead of waiting one interval
    #[serde(rename = "run-on-start", default = "default_true")]
    pub run_on_start: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            overlap: OverlapPolicy::default(),
            run_on_start: true,
        }
    }
}

/// What to do with a tick that arrives while a run is still in flight
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverlapPolicy {
    /// Drop the tick
    #[default]
    Skip,

    /// Remember it and start one run as soon as the current one ends
    Coalesce,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Downstream analysis dispatch
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Analysis service URL; records are only logged when absent
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_workers")]
    pub workers: u32,

    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff between attempts, doubled after each failure
    #[serde(rename = "retry-delay-secs", default = "default_dispatch_retry_secs")]
    pub retry_delay_secs: u64,
}

fn default_utc_offset_hours() -> i32 {
    8
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_start_page() -> u32 {
    1
}

fn default_max_pages() -> u32 {
    30
}

fn default_page_delay_ms() -> u64 {
    1000
}

fn default_item_delay_ms() -> u64 {
    150
}

fn default_keywords() -> Vec<String> {
    vec!["蓝屏".to_string()]
}

fn default_interval_secs() -> u64 {
    1800
}

fn default_true() -> bool {
    true
}

fn default_workers() -> u32 {
    2
}

fn default_dispatch_retry_secs() -> u64 {
    60
}
