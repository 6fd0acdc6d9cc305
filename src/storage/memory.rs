//! In-memory storage backend
//!
//! Behaves like the SQLite store (same dedup and ordering rules) without
//! touching disk.

use crate::crawler::RunSummary;
use crate::record::CanonicalRecord;
use crate::storage::traits::{
    BulkInsertOutcome, InsertOutcome, KeywordSource, RecordStore, StoreError, StoreResult,
};
use crate::storage::{RunRecord, RunStatus};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Inner {
    /// Records in insertion order
    records: Vec<CanonicalRecord>,
    index: HashMap<String, usize>,
    keywords: BTreeSet<String>,
    runs: Vec<RunRecord>,
}

/// A `RecordStore` kept entirely in memory
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `records`
    pub fn with_records(records: impl IntoIterator<Item = CanonicalRecord>) -> Self {
        let store = Self::new();
        if let Ok(mut inner) = store.inner.lock() {
            for record in records {
                insert_into(&mut inner, record);
            }
        }
        store
    }

    /// Replaces the keyword set
    pub fn set_keywords<I, S>(&self, keywords: I) -> StoreResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner = self.lock()?;
        inner.keywords = keywords.into_iter().map(Into::into).collect();
        Ok(())
    }

    /// Natural keys in insertion order
    pub fn keys(&self) -> StoreResult<Vec<String>> {
        let inner = self.lock()?;
        Ok(inner
            .records
            .iter()
            .map(|r| r.natural_key.clone())
            .collect())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

fn insert_into(inner: &mut Inner, record: CanonicalRecord) -> InsertOutcome {
    if inner.index.contains_key(&record.natural_key) {
        return InsertOutcome::Duplicate;
    }
    inner
        .index
        .insert(record.natural_key.clone(), inner.records.len());
    inner.records.push(record);
    InsertOutcome::Inserted
}

impl RecordStore for MemoryStore {
    fn exists(&self, natural_key: &str) -> StoreResult<bool> {
        Ok(self.lock()?.index.contains_key(natural_key))
    }

    fn insert(&self, record: &CanonicalRecord) -> StoreResult<InsertOutcome> {
        let mut inner = self.lock()?;
        Ok(insert_into(&mut inner, record.clone()))
    }

    fn bulk_insert(&self, records: &[CanonicalRecord]) -> StoreResult<BulkInsertOutcome> {
        let mut inner = self.lock()?;
        let mut outcome = BulkInsertOutcome::default();
        for record in records {
            match insert_into(&mut inner, record.clone()) {
                InsertOutcome::Inserted => outcome.inserted += 1,
                InsertOutcome::Duplicate => outcome.duplicate += 1,
            }
        }
        Ok(outcome)
    }

    fn get(&self, natural_key: &str) -> StoreResult<Option<CanonicalRecord>> {
        let inner = self.lock()?;
        Ok(inner
            .index
            .get(natural_key)
            .map(|&i| inner.records[i].clone()))
    }

    fn latest(&self) -> StoreResult<Option<CanonicalRecord>> {
        let inner = self.lock()?;
        // Later insertion wins ties, matching the SQLite `id DESC` tiebreak
        Ok(inner
            .records
            .iter()
            .enumerate()
            .max_by_key(|(i, r)| (r.ingested_at, *i))
            .map(|(_, r)| r.clone()))
    }

    fn count(&self) -> StoreResult<u64> {
        Ok(self.lock()?.records.len() as u64)
    }

    fn count_analyzed(&self) -> StoreResult<u64> {
        Ok(self.lock()?.records.iter().filter(|r| r.analyzed).count() as u64)
    }

    fn mark_analyzed(&self, natural_key: &str, analysis_ref: Option<&str>) -> StoreResult<bool> {
        let mut inner = self.lock()?;
        let Some(&i) = inner.index.get(natural_key) else {
            return Ok(false);
        };
        let record = &mut inner.records[i];
        record.analyzed = true;
        record.analysis_ref = analysis_ref.map(str::to_string);
        Ok(true)
    }

    fn unanalyzed_since(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<CanonicalRecord>> {
        let inner = self.lock()?;
        let mut pending: Vec<_> = inner
            .records
            .iter()
            .filter(|r| !r.analyzed && r.ingested_at >= cutoff)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.ingested_at);
        Ok(pending)
    }

    fn begin_run(&self, config_hash: &str) -> StoreResult<i64> {
        let mut inner = self.lock()?;
        let id = inner.runs.len() as i64 + 1;
        inner.runs.push(RunRecord {
            id,
            started_at: Utc::now().to_rfc3339(),
            finished_at: None,
            config_hash: config_hash.to_string(),
            status: RunStatus::Running,
            pages_visited: 0,
            pages_failed: 0,
            items_seen: 0,
            items_inserted: 0,
            items_duplicate: 0,
            items_dispatched: 0,
            stopped_reason: None,
            error_message: None,
        });
        Ok(id)
    }

    fn finish_run(
        &self,
        run_id: i64,
        status: RunStatus,
        summary: &RunSummary,
        error: Option<&str>,
    ) -> StoreResult<()> {
        let mut inner = self.lock()?;
        if let Some(run) = inner.runs.iter_mut().find(|r| r.id == run_id) {
            run.finished_at = Some(Utc::now().to_rfc3339());
            run.status = status;
            run.pages_visited = summary.pages_visited;
            run.pages_failed = summary.pages_failed;
            run.items_seen = summary.items_seen;
            run.items_inserted = summary.items_inserted;
            run.items_duplicate = summary.items_duplicate;
            run.items_dispatched = summary.items_dispatched;
            run.stopped_reason = summary.stopped_reason.map(|r| r.as_str().to_string());
            run.error_message = error.map(str::to_string);
        }
        Ok(())
    }

    fn recent_runs(&self, limit: usize) -> StoreResult<Vec<RunRecord>> {
        let inner = self.lock()?;
        Ok(inner.runs.iter().rev().take(limit).cloned().collect())
    }
}

impl KeywordSource for MemoryStore {
    fn list_keywords(&self) -> StoreResult<BTreeSet<String>> {
        Ok(self.lock()?.keywords.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone, Timelike};

    fn record(key: &str, minute: u32) -> CanonicalRecord {
        let offset = FixedOffset::east_opt(8 * 3600).unwrap();
        CanonicalRecord {
            natural_key: key.to_string(),
            title: String::new(),
            author: String::new(),
            category: String::new(),
            status_label: String::new(),
            has_attachment: false,
            created_at: offset.with_ymd_and_hms(2025, 12, 7, 8, 53, 0).unwrap(),
            created_at_raw: String::new(),
            ingested_at: Utc.with_ymd_and_hms(2025, 12, 10, 7, minute, 0).unwrap(),
            view_count: 0,
            reply_count: 0,
            url: String::new(),
            body_text: String::new(),
            image_urls: vec![],
            analyzed: false,
            analysis_ref: None,
        }
    }

    #[test]
    fn test_duplicate_insert_is_noop() {
        let store = MemoryStore::new();
        assert_eq!(
            store.insert(&record("a", 0)).unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            store.insert(&record("a", 5)).unwrap(),
            InsertOutcome::Duplicate
        );
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.get("a").unwrap().unwrap().ingested_at.minute(), 0);
    }

    #[test]
    fn test_latest_and_keys() {
        let store = MemoryStore::with_records([record("a", 3), record("b", 1)]);
        assert_eq!(store.latest().unwrap().unwrap().natural_key, "a");
        assert_eq!(store.keys().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_keywords_are_replaceable() {
        let store = MemoryStore::new();
        assert!(store.list_keywords().unwrap().is_empty());
        store.set_keywords(["蓝屏", "黑屏"]).unwrap();
        assert_eq!(store.list_keywords().unwrap().len(), 2);
    }
}
