//! Crawler module for incremental forum harvesting
//!
//! This module contains the core ingestion pipeline, including:
//! - HTTP fetching with bounded retries
//! - Listing and detail page extraction
//! - Timestamp normalization
//! - The harvest controller and its stop heuristics
//! - The recurring run scheduler

mod controller;
mod detail;
mod fetcher;
mod listing;
mod scheduler;
mod timestamp;

pub use controller::{Harvester, RunError, RunParams, RunSummary};
pub use detail::{extract_detail, Enricher};
pub use fetcher::{build_http_client, FetchError, FetchErrorKind, PageFetcher};
pub use listing::{parse_int, parse_listing, ATTACHMENT_MARKER};
pub use scheduler::{RunScheduler, SchedulerReport};
pub use timestamp::normalize;

pub use crate::state::{CrawlPhase, StopReason};
