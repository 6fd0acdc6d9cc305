//! Statistics generation from the harvest database
//!
//! This module provides functionality for extracting and displaying
//! harvest statistics from the storage layer.

use crate::record::CanonicalRecord;
use crate::storage::{RecordStore, RunRecord, StoreResult};
use std::fmt::Write;

/// Number of runs shown in the statistics report
pub const RECENT_RUN_LIMIT: usize = 5;

/// Harvest statistics summary
#[derive(Debug, Clone)]
pub struct HarvestStatistics {
    /// Total number of stored records
    pub total_records: u64,

    /// Records already analyzed downstream
    pub analyzed_records: u64,

    /// Most recently ingested record
    pub latest: Option<CanonicalRecord>,

    /// Most recent runs, newest first
    pub recent_runs: Vec<RunRecord>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `store` - The storage backend to query
pub fn load_statistics(store: &dyn RecordStore) -> StoreResult<HarvestStatistics> {
    Ok(HarvestStatistics {
        total_records: store.count()?,
        analyzed_records: store.count_analyzed()?,
        latest: store.latest()?,
        recent_runs: store.recent_runs(RECENT_RUN_LIMIT)?,
    })
}

/// Renders statistics as a plain-text report
pub fn render_statistics(stats: &HarvestStatistics) -> String {
    let mut out = String::new();

    // Writing to a String cannot fail
    let _ = writeln!(out, "=== Harvest Statistics ===\n");
    let _ = writeln!(out, "Records:");
    let _ = writeln!(out, "  Total stored: {}", stats.total_records);

    let percentage = if stats.total_records > 0 {
        (stats.analyzed_records as f64 / stats.total_records as f64) * 100.0
    } else {
        0.0
    };
    let _ = writeln!(
        out,
        "  Analyzed: {} ({:.1}%)",
        stats.analyzed_records, percentage
    );

    match &stats.latest {
        Some(latest) => {
            let _ = writeln!(
                out,
                "  Latest: {} \"{}\" (created {}, ingested {})",
                latest.natural_key,
                latest.title,
                latest.created_at.format("%Y-%m-%d %H:%M"),
                latest.ingested_at.format("%Y-%m-%d %H:%M:%S UTC"),
            );
        }
        None => {
            let _ = writeln!(out, "  Latest: none");
        }
    }
    let _ = writeln!(out);

    if stats.recent_runs.is_empty() {
        let _ = writeln!(out, "No runs recorded yet.");
        return out;
    }

    let _ = writeln!(out, "Recent Runs:");
    for run in &stats.recent_runs {
        let _ = writeln!(
            out,
            "  #{} {} [{}] pages {} (+{} failed), items {} seen / {} new / {} dup / {} dispatched, stopped: {}",
            run.id,
            run.started_at,
            run.status.to_db_string(),
            run.pages_visited,
            run.pages_failed,
            run.items_seen,
            run.items_inserted,
            run.items_duplicate,
            run.items_dispatched,
            run.stopped_reason.as_deref().unwrap_or("-"),
        );
        if let Some(error) = &run.error_message {
            let _ = writeln!(out, "      error: {}", error);
        }
    }

    out
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &HarvestStatistics) {
    print!("{}", render_statistics(stats));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::{RunSummary, StopReason};
    use crate::storage::{MemoryStore, RunStatus};
    use chrono::{FixedOffset, TimeZone, Utc};

    fn record(key: &str, analyzed: bool) -> CanonicalRecord {
        let offset = FixedOffset::east_opt(8 * 3600).unwrap();
        CanonicalRecord {
            natural_key: key.to_string(),
            title: "开机蓝屏".to_string(),
            author: String::new(),
            category: String::new(),
            status_label: String::new(),
            has_attachment: false,
            created_at: offset.with_ymd_and_hms(2025, 12, 7, 8, 53, 0).unwrap(),
            created_at_raw: String::new(),
            ingested_at: Utc.with_ymd_and_hms(2025, 12, 10, 7, 0, 0).unwrap(),
            view_count: 0,
            reply_count: 0,
            url: String::new(),
            body_text: String::new(),
            image_urls: vec![],
            analyzed,
            analysis_ref: None,
        }
    }

    #[test]
    fn test_empty_store() {
        let stats = load_statistics(&MemoryStore::new()).unwrap();
        assert_eq!(stats.total_records, 0);
        assert!(stats.latest.is_none());

        let text = render_statistics(&stats);
        assert!(text.contains("Total stored: 0"));
        assert!(text.contains("Latest: none"));
        assert!(text.contains("No runs recorded yet."));
    }

    #[test]
    fn test_statistics_with_runs() {
        let store = MemoryStore::with_records([record("a", true), record("b", false)]);
        let run_id = store.begin_run("hash").unwrap();
        let summary = RunSummary {
            pages_visited: 2,
            items_seen: 2,
            items_inserted: 2,
            stopped_reason: Some(StopReason::MaxPages),
            ..Default::default()
        };
        store
            .finish_run(run_id, RunStatus::Completed, &summary, None)
            .unwrap();

        let stats = load_statistics(&store).unwrap();
        assert_eq!(stats.total_records, 2);
        assert_eq!(stats.analyzed_records, 1);
        assert_eq!(stats.recent_runs.len(), 1);

        let text = render_statistics(&stats);
        assert!(text.contains("Analyzed: 1 (50.0%)"));
        assert!(text.contains("[completed]"));
        assert!(text.contains("stopped: max_pages"));
    }
}
