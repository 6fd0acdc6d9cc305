//! Harvest controller - main run orchestration logic
//!
//! This module contains the page loop that coordinates one harvest run:
//! - Fetching and parsing listing pages in order
//! - Enriching, normalizing and storing each new post
//! - Handing new posts to the trigger rules and dispatcher
//! - Deciding when the run has caught up with stored data
//! - Producing the run summary, including on failure

use crate::config::{Config, CrawlerConfig, SiteConfig, StopPolicy};
use crate::crawler::detail::Enricher;
use crate::crawler::fetcher::PageFetcher;
use crate::crawler::listing::parse_listing;
use crate::crawler::timestamp::normalize;
use crate::dispatch::{AnalysisDispatcher, TriggerRules};
use crate::record::{CanonicalRecord, EnrichedPost, PostSummary};
use crate::state::{CrawlPhase, StopReason};
use crate::storage::{InsertOutcome, KeywordSource, RecordStore, RunStatus, StoreError};
use crate::{ConfigError, HarvestError};
use chrono::{FixedOffset, Utc};
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Page range for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunParams {
    /// First listing page, 1-based
    pub start_page: u32,

    /// Upper bound on pages requested
    pub max_pages: u32,
}

impl From<&CrawlerConfig> for RunParams {
    fn from(config: &CrawlerConfig) -> Self {
        Self {
            start_page: config.start_page,
            max_pages: config.max_pages,
        }
    }
}

/// Counters reported at the end of every run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Listing pages fetched successfully
    pub pages_visited: u32,

    /// Listing pages skipped after every fetch attempt failed
    pub pages_failed: u32,

    pub items_seen: u32,
    pub items_inserted: u32,
    pub items_duplicate: u32,
    pub items_dispatched: u32,

    /// `None` only while the run is in progress or after a fatal error
    pub stopped_reason: Option<StopReason>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} page(s) visited ({} failed), {} item(s) seen, {} inserted, {} duplicate, {} dispatched, stopped: {}",
            self.pages_visited,
            self.pages_failed,
            self.items_seen,
            self.items_inserted,
            self.items_duplicate,
            self.items_dispatched,
            self.stopped_reason.map(|r| r.as_str()).unwrap_or("error"),
        )
    }
}

/// A run aborted by a store failure
///
/// Everything committed before the failure stays committed; `summary` holds
/// the counts up to that point.
#[derive(Debug, Error)]
#[error("harvest run aborted after {} page(s): {source}", .summary.pages_visited)]
pub struct RunError {
    pub summary: RunSummary,
    pub source: StoreError,
}

/// How a single listing page ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageOutcome {
    /// Every post on the page was handled
    Completed { inserted: u32 },

    /// A known post was reached under the first-duplicate policy
    HitDuplicate,

    Cancelled,
}

/// Incremental harvest controller
///
/// Owns the stop decision and the run summary. Collaborators are injected
/// so tests can swap the store, keyword source and dispatcher.
pub struct Harvester {
    site: SiteConfig,
    base_url: Url,
    offset: FixedOffset,
    fetcher: PageFetcher,
    enricher: Enricher,
    page_delay: Duration,
    item_delay: Duration,
    stop_policy: StopPolicy,
    rules: TriggerRules,
    store: Arc<dyn RecordStore>,
    keywords: Arc<dyn KeywordSource>,
    dispatcher: Arc<dyn AnalysisDispatcher>,
}

impl Harvester {
    /// Creates a harvester from validated configuration
    ///
    /// # Arguments
    ///
    /// * `config` - The harvester configuration
    /// * `store` - Durable record storage
    /// * `keywords` - Trigger keywords, read fresh for every decision
    /// * `dispatcher` - Receives ids of records that need analysis
    pub fn new(
        config: &Config,
        store: Arc<dyn RecordStore>,
        keywords: Arc<dyn KeywordSource>,
        dispatcher: Arc<dyn AnalysisDispatcher>,
    ) -> Result<Self, HarvestError> {
        let base_url = Url::parse(&config.site.base_url)?;
        let offset = FixedOffset::east_opt(config.site.utc_offset_hours * 3600).ok_or_else(|| {
            ConfigError::Validation(format!(
                "utc-offset-hours out of range: {}",
                config.site.utc_offset_hours
            ))
        })?;

        let fetcher = PageFetcher::new(&config.site, &config.fetcher)?;
        let enricher = Enricher::new(fetcher.clone(), base_url.clone());

        Ok(Self {
            site: config.site.clone(),
            base_url,
            offset,
            fetcher,
            enricher,
            page_delay: Duration::from_millis(config.crawler.page_delay_ms),
            item_delay: Duration::from_millis(config.crawler.item_delay_ms),
            stop_policy: config.crawler.stop_policy,
            rules: TriggerRules::from(&config.trigger),
            store,
            keywords,
            dispatcher,
        })
    }

    /// Runs one harvest over `params`
    ///
    /// # Stop Conditions
    ///
    /// | Condition | Reason |
    /// |-----------|--------|
    /// | Known post reached (first-duplicate policy) | `all_duplicate` |
    /// | Page had posts but stored none | `empty_page_no_new` |
    /// | Listing returned no posts | `natural_end` |
    /// | Page budget used up | `max_pages` |
    /// | Token cancelled | `cancelled` |
    ///
    /// A listing page that cannot be fetched is skipped. Only store failures
    /// abort the run; the error carries the partial summary.
    pub async fn run(
        &self,
        params: RunParams,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, RunError> {
        tracing::info!(
            start_page = params.start_page,
            max_pages = params.max_pages,
            policy = ?self.stop_policy,
            "Starting harvest run"
        );

        let mut summary = RunSummary::default();
        let mut phase = CrawlPhase::Idle;
        let first = params.start_page.max(1);

        for index in 0..params.max_pages {
            // Past u32::MAX there are no more pages to request
            let Some(page) = first.checked_add(index) else {
                break;
            };
            if index > 0 && !pause(self.page_delay, cancel).await {
                summary.stopped_reason = Some(StopReason::Cancelled);
                break;
            }
            if cancel.is_cancelled() {
                summary.stopped_reason = Some(StopReason::Cancelled);
                break;
            }

            self.enter(&mut phase, CrawlPhase::FetchingPage, page);
            let url = self.site.listing_url_for(page);
            let fetched = match until_cancelled(cancel, self.fetcher.fetch(&url)).await {
                Some(fetched) => fetched,
                None => {
                    summary.stopped_reason = Some(StopReason::Cancelled);
                    break;
                }
            };
            let html = match fetched {
                Ok(html) => html,
                Err(e) => {
                    tracing::warn!(page, error = %e, "Listing page unavailable, skipping");
                    summary.pages_failed += 1;
                    self.enter(&mut phase, CrawlPhase::PageDone, page);
                    continue;
                }
            };
            summary.pages_visited += 1;

            self.enter(&mut phase, CrawlPhase::ParsingPage, page);
            let posts = parse_listing(&html, &self.base_url);
            tracing::debug!(page, posts = posts.len(), "Parsed listing page");
            if posts.is_empty() {
                tracing::info!(page, "Listing page has no posts, reached the end");
                summary.stopped_reason = Some(StopReason::NaturalEnd);
                break;
            }

            self.enter(&mut phase, CrawlPhase::ProcessingItems, page);
            let outcome = match self.process_page(posts, &mut summary, cancel).await {
                Ok(outcome) => outcome,
                Err(source) => {
                    tracing::error!(page, error = %source, "Store failure, aborting run");
                    self.enter(&mut phase, CrawlPhase::Stopped, page);
                    return Err(RunError { summary, source });
                }
            };

            let stop = match outcome {
                PageOutcome::Cancelled => Some(StopReason::Cancelled),
                PageOutcome::HitDuplicate => Some(StopReason::AllDuplicate),
                PageOutcome::Completed { inserted: 0 } => Some(StopReason::EmptyPageNoNew),
                PageOutcome::Completed { inserted } => {
                    tracing::debug!(page, inserted, "Page done");
                    None
                }
            };
            if stop.is_some() {
                summary.stopped_reason = stop;
                break;
            }
            self.enter(&mut phase, CrawlPhase::PageDone, page);
        }

        let reason = *summary.stopped_reason.get_or_insert(StopReason::MaxPages);
        self.enter(&mut phase, CrawlPhase::Stopped, 0);
        tracing::info!(
            reason = reason.as_str(),
            pages_visited = summary.pages_visited,
            pages_failed = summary.pages_failed,
            items_seen = summary.items_seen,
            items_inserted = summary.items_inserted,
            items_duplicate = summary.items_duplicate,
            items_dispatched = summary.items_dispatched,
            "Harvest run finished"
        );

        Ok(summary)
    }

    /// Runs one harvest and records it in the store's run history
    pub async fn run_recorded(
        &self,
        params: RunParams,
        config_hash: &str,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, RunError> {
        let run_id = self
            .store
            .begin_run(config_hash)
            .map_err(|source| RunError {
                summary: RunSummary::default(),
                source,
            })?;

        let result = self.run(params, cancel).await;

        let (status, summary, error) = match &result {
            Ok(summary) if summary.stopped_reason == Some(StopReason::Cancelled) => {
                (RunStatus::Cancelled, summary, None)
            }
            Ok(summary) => (RunStatus::Completed, summary, None),
            Err(e) => (RunStatus::Failed, &e.summary, Some(e.source.to_string())),
        };
        if let Err(e) = self
            .store
            .finish_run(run_id, status, summary, error.as_deref())
        {
            tracing::error!(run_id, error = %e, "Failed to record run outcome");
        }

        result
    }

    /// Handles the posts of one page in order
    async fn process_page(
        &self,
        posts: Vec<PostSummary>,
        summary: &mut RunSummary,
        cancel: &CancellationToken,
    ) -> Result<PageOutcome, StoreError> {
        let mut inserted = 0;

        for (index, post) in posts.into_iter().enumerate() {
            if index > 0 && !pause(self.item_delay, cancel).await {
                return Ok(PageOutcome::Cancelled);
            }
            if cancel.is_cancelled() {
                return Ok(PageOutcome::Cancelled);
            }

            summary.items_seen += 1;

            // Known posts cost no detail fetch
            if self.store.exists(&post.id)? {
                summary.items_duplicate += 1;
                tracing::debug!(post_id = %post.id, "Post already stored");
                match self.stop_policy {
                    StopPolicy::FirstDuplicate => return Ok(PageOutcome::HitDuplicate),
                    StopPolicy::WholePage => continue,
                }
            }

            let Some(record) = until_cancelled(cancel, self.build_record(post)).await else {
                return Ok(PageOutcome::Cancelled);
            };

            match self.store.insert(&record)? {
                InsertOutcome::Inserted => {
                    inserted += 1;
                    summary.items_inserted += 1;
                    tracing::debug!(
                        post_id = %record.natural_key,
                        created_at = %record.created_at,
                        "Stored new post"
                    );
                    if self.maybe_dispatch(&record) {
                        summary.items_dispatched += 1;
                    }
                }
                InsertOutcome::Duplicate => {
                    // Another producer stored it between exists() and insert()
                    summary.items_duplicate += 1;
                    tracing::debug!(post_id = %record.natural_key, "Post stored concurrently");
                    if self.stop_policy == StopPolicy::FirstDuplicate {
                        return Ok(PageOutcome::HitDuplicate);
                    }
                }
            }
        }

        Ok(PageOutcome::Completed { inserted })
    }

    async fn build_record(&self, post: PostSummary) -> CanonicalRecord {
        let detail = self.enricher.enrich(&post.detail_url).await;

        let ingested_at = Utc::now();
        let created_at = normalize(&post.raw_created_at, ingested_at.with_timezone(&self.offset));

        EnrichedPost::new(post, detail).into_record(created_at, ingested_at)
    }

    /// Evaluates the trigger rules and dispatches on a hit
    fn maybe_dispatch(&self, record: &CanonicalRecord) -> bool {
        let keywords = self.keywords.list_keywords().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Keyword source unavailable, matching without keywords");
            BTreeSet::new()
        });

        match self.rules.evaluate(record, &keywords) {
            Some(reason) => {
                tracing::info!(
                    record_id = %record.natural_key,
                    %reason,
                    "Dispatching record for analysis"
                );
                self.dispatcher.dispatch(&record.natural_key);
                true
            }
            None => false,
        }
    }

    fn enter(&self, phase: &mut CrawlPhase, next: CrawlPhase, page: u32) {
        debug_assert!(
            phase.can_transition_to(next),
            "illegal phase transition {} -> {}",
            phase,
            next
        );
        tracing::trace!(page, from = %phase, to = %next, "Phase transition");
        *phase = next;
    }
}

/// Sleeps for `duration` unless cancelled first; returns false on cancel
async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }

    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Drives `future` to completion unless the token fires first
async fn until_cancelled<F: Future>(cancel: &CancellationToken, future: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        output = future => Some(output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_display() {
        let summary = RunSummary {
            pages_visited: 2,
            pages_failed: 1,
            items_seen: 10,
            items_inserted: 7,
            items_duplicate: 3,
            items_dispatched: 2,
            stopped_reason: Some(StopReason::AllDuplicate),
        };
        assert_eq!(
            summary.to_string(),
            "2 page(s) visited (1 failed), 10 item(s) seen, 7 inserted, 3 duplicate, 2 dispatched, stopped: all_duplicate"
        );
    }

    #[test]
    fn test_run_error_keeps_summary() {
        let err = RunError {
            summary: RunSummary {
                pages_visited: 3,
                ..Default::default()
            },
            source: StoreError::Unavailable("disk gone".to_string()),
        };
        assert_eq!(err.summary.pages_visited, 3);
        assert!(err.to_string().contains("after 3 page(s)"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_params_from_config() {
        let params = RunParams::from(&CrawlerConfig::default());
        assert_eq!(params.start_page, 1);
        assert_eq!(params.max_pages, 30);
    }

    #[tokio::test]
    async fn test_pause_is_interrupted_by_cancel() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!pause(Duration::from_secs(60), &cancel).await);
        assert!(!pause(Duration::ZERO, &cancel).await);
        assert!(pause(Duration::ZERO, &CancellationToken::new()).await);
    }
}
