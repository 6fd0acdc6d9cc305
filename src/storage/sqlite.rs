//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the storage traits.

use crate::crawler::RunSummary;
use crate::record::CanonicalRecord;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{
    BulkInsertOutcome, InsertOutcome, KeywordSource, RecordStore, StoreError, StoreResult,
};
use crate::storage::{RunRecord, RunStatus};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const INSERT_RECORD_SQL: &str = "
    INSERT INTO records (natural_key, title, author, category, status_label, has_attachment,
        created_at, created_at_raw, ingested_at, view_count, reply_count, url, body_text,
        image_urls, analyzed, analysis_ref)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
    ON CONFLICT(natural_key) DO NOTHING";

const SELECT_RECORD_SQL: &str = "
    SELECT natural_key, title, author, category, status_label, has_attachment, created_at,
        created_at_raw, ingested_at, view_count, reply_count, url, body_text, image_urls,
        analyzed, analysis_ref
    FROM records";

const SELECT_RUN_SQL: &str = "
    SELECT id, started_at, finished_at, config_hash, status, pages_visited, pages_failed,
        items_seen, items_inserted, items_duplicate, items_dispatched, stopped_reason,
        error_message
    FROM runs";

/// SQLite storage backend
///
/// The connection sits behind a mutex so one store can be shared by the
/// harvester, the dispatch workers and a concurrent backfill.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens or creates the database file and applies the schema
    pub fn new(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))
    }

    // ===== Keyword Management =====

    /// Adds a keyword; returns false if it already existed
    pub fn add_keyword(&self, keyword: &str) -> StoreResult<bool> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Ok(false);
        }

        let conn = self.lock()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO keywords (keyword, created_at) VALUES (?1, ?2)",
            params![keyword, timestamp(Utc::now())],
        )?;
        Ok(changed > 0)
    }

    /// Removes a keyword; returns false if it was not present
    pub fn remove_keyword(&self, keyword: &str) -> StoreResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "DELETE FROM keywords WHERE keyword = ?1",
            params![keyword.trim()],
        )?;
        Ok(changed > 0)
    }

    /// Makes sure every keyword in `defaults` exists; returns how many were added
    pub fn ensure_keywords(&self, defaults: &[String]) -> StoreResult<usize> {
        let mut added = 0;
        for keyword in defaults {
            if self.add_keyword(keyword)? {
                added += 1;
            }
        }
        Ok(added)
    }
}

impl RecordStore for SqliteStore {
    // ===== Records =====

    fn exists(&self, natural_key: &str) -> StoreResult<bool> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM records WHERE natural_key = ?1",
                params![natural_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn insert(&self, record: &CanonicalRecord) -> StoreResult<InsertOutcome> {
        let image_urls = serde_json::to_string(&record.image_urls)?;
        let conn = self.lock()?;
        insert_with(&conn, record, &image_urls)
    }

    fn bulk_insert(&self, records: &[CanonicalRecord]) -> StoreResult<BulkInsertOutcome> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let mut outcome = BulkInsertOutcome::default();
        for record in records {
            let image_urls = serde_json::to_string(&record.image_urls)?;
            match insert_with(&tx, record, &image_urls)? {
                InsertOutcome::Inserted => outcome.inserted += 1,
                InsertOutcome::Duplicate => outcome.duplicate += 1,
            }
        }

        tx.commit()?;
        Ok(outcome)
    }

    fn get(&self, natural_key: &str) -> StoreResult<Option<CanonicalRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("{SELECT_RECORD_SQL} WHERE natural_key = ?1"),
                params![natural_key],
                RecordRow::from_row,
            )
            .optional()?;
        row.map(RecordRow::into_record).transpose()
    }

    fn latest(&self) -> StoreResult<Option<CanonicalRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("{SELECT_RECORD_SQL} ORDER BY ingested_at DESC, id DESC LIMIT 1"),
                [],
                RecordRow::from_row,
            )
            .optional()?;
        row.map(RecordRow::into_record).transpose()
    }

    fn count(&self) -> StoreResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_analyzed(&self) -> StoreResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE analyzed = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn mark_analyzed(&self, natural_key: &str, analysis_ref: Option<&str>) -> StoreResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE records SET analyzed = 1, analysis_ref = ?1 WHERE natural_key = ?2",
            params![analysis_ref, natural_key],
        )?;
        Ok(changed > 0)
    }

    fn unanalyzed_since(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<CanonicalRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_RECORD_SQL} WHERE analyzed = 0 AND ingested_at >= ?1 ORDER BY ingested_at ASC, id ASC"
        ))?;

        let rows = stmt
            .query_map(params![timestamp(cutoff)], RecordRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RecordRow::into_record).collect()
    }

    // ===== Run History =====

    fn begin_run(&self, config_hash: &str) -> StoreResult<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![
                timestamp(Utc::now()),
                config_hash,
                RunStatus::Running.to_db_string()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn finish_run(
        &self,
        run_id: i64,
        status: RunStatus,
        summary: &RunSummary,
        error: Option<&str>,
    ) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE runs SET finished_at = ?1, status = ?2, pages_visited = ?3, pages_failed = ?4,
             items_seen = ?5, items_inserted = ?6, items_duplicate = ?7, items_dispatched = ?8,
             stopped_reason = ?9, error_message = ?10
             WHERE id = ?11",
            params![
                timestamp(Utc::now()),
                status.to_db_string(),
                summary.pages_visited,
                summary.pages_failed,
                summary.items_seen,
                summary.items_inserted,
                summary.items_duplicate,
                summary.items_dispatched,
                summary.stopped_reason.map(|r| r.as_str()),
                error,
                run_id
            ],
        )?;
        Ok(())
    }

    fn recent_runs(&self, limit: usize) -> StoreResult<Vec<RunRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("{SELECT_RUN_SQL} ORDER BY id DESC LIMIT ?1"))?;

        let runs = stmt
            .query_map(params![limit as i64], |row| {
                Ok(RunRecord {
                    id: row.get(0)?,
                    started_at: row.get(1)?,
                    finished_at: row.get(2)?,
                    config_hash: row.get(3)?,
                    status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
                        .unwrap_or(RunStatus::Failed),
                    pages_visited: row.get(5)?,
                    pages_failed: row.get(6)?,
                    items_seen: row.get(7)?,
                    items_inserted: row.get(8)?,
                    items_duplicate: row.get(9)?,
                    items_dispatched: row.get(10)?,
                    stopped_reason: row.get(11)?,
                    error_message: row.get(12)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(runs)
    }
}

impl KeywordSource for SqliteStore {
    fn list_keywords(&self) -> StoreResult<BTreeSet<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT keyword FROM keywords ORDER BY keyword")?;
        let keywords = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(keywords)
    }
}

fn insert_with(
    conn: &Connection,
    record: &CanonicalRecord,
    image_urls: &str,
) -> StoreResult<InsertOutcome> {
    let changed = conn.execute(
        INSERT_RECORD_SQL,
        params![
            record.natural_key,
            record.title,
            record.author,
            record.category,
            record.status_label,
            record.has_attachment,
            record.created_at.to_rfc3339(),
            record.created_at_raw,
            timestamp(record.ingested_at),
            count_column(&record.natural_key, "view_count", record.view_count),
            count_column(&record.natural_key, "reply_count", record.reply_count),
            record.url,
            record.body_text,
            image_urls,
            record.analyzed,
            record.analysis_ref,
        ],
    )?;

    Ok(if changed == 0 {
        InsertOutcome::Duplicate
    } else {
        InsertOutcome::Inserted
    })
}

/// Converts a count to the signed INTEGER column, saturating at `i64::MAX`
fn count_column(natural_key: &str, column: &str, count: u64) -> i64 {
    i64::try_from(count).unwrap_or_else(|_| {
        tracing::warn!(
            natural_key,
            column,
            count,
            "Count exceeds column range, storing i64::MAX"
        );
        i64::MAX
    })
}

/// Fixed-width UTC timestamp so that text ordering matches time ordering
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// A record row as stored, before timestamps and image lists are decoded
struct RecordRow {
    natural_key: String,
    title: String,
    author: String,
    category: String,
    status_label: String,
    has_attachment: bool,
    created_at: String,
    created_at_raw: String,
    ingested_at: String,
    view_count: i64,
    reply_count: i64,
    url: String,
    body_text: String,
    image_urls: String,
    analyzed: bool,
    analysis_ref: Option<String>,
}

impl RecordRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            natural_key: row.get(0)?,
            title: row.get(1)?,
            author: row.get(2)?,
            category: row.get(3)?,
            status_label: row.get(4)?,
            has_attachment: row.get(5)?,
            created_at: row.get(6)?,
            created_at_raw: row.get(7)?,
            ingested_at: row.get(8)?,
            view_count: row.get(9)?,
            reply_count: row.get(10)?,
            url: row.get(11)?,
            body_text: row.get(12)?,
            image_urls: row.get(13)?,
            analyzed: row.get(14)?,
            analysis_ref: row.get(15)?,
        })
    }

    fn into_record(self) -> StoreResult<CanonicalRecord> {
        let corrupt = |message: String| StoreError::Corrupt {
            key: self.natural_key.clone(),
            message,
        };

        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| corrupt(format!("created_at: {}", e)))?;
        let ingested_at = DateTime::parse_from_rfc3339(&self.ingested_at)
            .map_err(|e| corrupt(format!("ingested_at: {}", e)))?
            .with_timezone(&Utc);
        let image_urls: Vec<String> = serde_json::from_str(&self.image_urls)
            .map_err(|e| corrupt(format!("image_urls: {}", e)))?;
        let view_count = u64::try_from(self.view_count)
            .map_err(|_| corrupt(format!("view_count: negative value {}", self.view_count)))?;
        let reply_count = u64::try_from(self.reply_count)
            .map_err(|_| corrupt(format!("reply_count: negative value {}", self.reply_count)))?;

        Ok(CanonicalRecord {
            natural_key: self.natural_key,
            title: self.title,
            author: self.author,
            category: self.category,
            status_label: self.status_label,
            has_attachment: self.has_attachment,
            created_at,
            created_at_raw: self.created_at_raw,
            ingested_at,
            view_count,
            reply_count,
            url: self.url,
            body_text: self.body_text,
            image_urls,
            analyzed: self.analyzed,
            analysis_ref: self.analysis_ref,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::StopReason;
    use chrono::{Duration, FixedOffset, TimeZone};

    fn record(key: &str, ingested_at: DateTime<Utc>) -> CanonicalRecord {
        let offset = FixedOffset::east_opt(8 * 3600).unwrap();
        CanonicalRecord {
            natural_key: key.to_string(),
            title: format!("title {}", key),
            author: "alice".to_string(),
            category: String::new(),
            status_label: String::new(),
            has_attachment: false,
            created_at: offset.with_ymd_and_hms(2025, 12, 7, 8, 53, 0).unwrap(),
            created_at_raw: "2025-12-7 08:53".to_string(),
            ingested_at,
            view_count: 1234,
            reply_count: 5,
            url: format!("https://bbs.example.com/{}", key),
            body_text: "body".to_string(),
            image_urls: vec!["https://bbs.example.com/a.png".to_string()],
            analyzed: false,
            analysis_ref: None,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 10, 7, 0, 0).unwrap()
    }

    #[test]
    fn test_insert_then_duplicate() {
        let store = SqliteStore::new_in_memory().unwrap();
        let rec = record("k1", now());

        assert_eq!(store.insert(&rec).unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.insert(&rec).unwrap(), InsertOutcome::Duplicate);
        assert_eq!(store.count().unwrap(), 1);
        assert!(store.exists("k1").unwrap());
        assert!(!store.exists("k2").unwrap());
    }

    #[test]
    fn test_get_roundtrips_record() {
        let store = SqliteStore::new_in_memory().unwrap();
        let rec = record("k1", now());
        store.insert(&rec).unwrap();

        let loaded = store.get("k1").unwrap().unwrap();
        assert_eq!(loaded, rec);
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_huge_counts_saturate_instead_of_wrapping() {
        let store = SqliteStore::new_in_memory().unwrap();
        let mut rec = record("k1", now());
        rec.view_count = crate::crawler::parse_int(Some("18446744073709551615"));
        rec.reply_count = i64::MAX as u64;
        store.insert(&rec).unwrap();

        let loaded = store.get("k1").unwrap().unwrap();
        assert_eq!(loaded.view_count, i64::MAX as u64);
        assert_eq!(loaded.reply_count, i64::MAX as u64);
    }

    #[test]
    fn test_negative_count_is_reported_as_corrupt() {
        let store = SqliteStore::new_in_memory().unwrap();
        store.insert(&record("k1", now())).unwrap();
        store
            .lock()
            .unwrap()
            .execute("UPDATE records SET view_count = -5 WHERE natural_key = 'k1'", [])
            .unwrap();

        let err = store.get("k1").unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { ref key, .. } if key == "k1"));
    }

    #[test]
    fn test_bulk_insert_counts_duplicates() {
        let store = SqliteStore::new_in_memory().unwrap();
        store.insert(&record("k1", now())).unwrap();

        let batch = vec![
            record("k1", now()),
            record("k2", now()),
            record("k3", now()),
            record("k2", now()),
        ];
        let outcome = store.bulk_insert(&batch).unwrap();

        assert_eq!(outcome.inserted, 2);
        assert_eq!(outcome.duplicate, 2);
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn test_latest_orders_by_ingestion_time() {
        let store = SqliteStore::new_in_memory().unwrap();
        assert!(store.latest().unwrap().is_none());

        store.insert(&record("newer", now())).unwrap();
        store
            .insert(&record("older", now() - Duration::hours(1)))
            .unwrap();

        assert_eq!(store.latest().unwrap().unwrap().natural_key, "newer");
    }

    #[test]
    fn test_mark_analyzed() {
        let store = SqliteStore::new_in_memory().unwrap();
        store.insert(&record("k1", now())).unwrap();

        assert!(store.mark_analyzed("k1", Some("analysis-7")).unwrap());
        assert!(!store.mark_analyzed("missing", None).unwrap());

        let loaded = store.get("k1").unwrap().unwrap();
        assert!(loaded.analyzed);
        assert_eq!(loaded.analysis_ref.as_deref(), Some("analysis-7"));
        assert_eq!(store.count_analyzed().unwrap(), 1);
    }

    #[test]
    fn test_unanalyzed_since() {
        let store = SqliteStore::new_in_memory().unwrap();
        store
            .insert(&record("old", now() - Duration::days(10)))
            .unwrap();
        store.insert(&record("fresh", now())).unwrap();
        store.insert(&record("done", now())).unwrap();
        store.mark_analyzed("done", None).unwrap();

        let pending = store.unanalyzed_since(now() - Duration::days(3)).unwrap();
        let keys: Vec<_> = pending.iter().map(|r| r.natural_key.as_str()).collect();
        assert_eq!(keys, vec!["fresh"]);
    }

    #[test]
    fn test_keywords() {
        let store = SqliteStore::new_in_memory().unwrap();

        let added = store
            .ensure_keywords(&["蓝屏".to_string(), "bsod".to_string()])
            .unwrap();
        assert_eq!(added, 2);
        assert_eq!(store.ensure_keywords(&["蓝屏".to_string()]).unwrap(), 0);

        assert!(store.add_keyword("黑屏").unwrap());
        assert!(!store.add_keyword("  ").unwrap());
        assert!(store.remove_keyword("bsod").unwrap());
        assert!(!store.remove_keyword("bsod").unwrap());

        let keywords = store.list_keywords().unwrap();
        assert_eq!(
            keywords.into_iter().collect::<Vec<_>>(),
            vec!["蓝屏".to_string(), "黑屏".to_string()]
        );
    }

    #[test]
    fn test_run_history() {
        let store = SqliteStore::new_in_memory().unwrap();
        let run_id = store.begin_run("abc123").unwrap();

        let summary = RunSummary {
            pages_visited: 2,
            items_seen: 7,
            items_inserted: 6,
            items_duplicate: 1,
            stopped_reason: Some(StopReason::AllDuplicate),
            ..RunSummary::default()
        };
        store
            .finish_run(run_id, RunStatus::Completed, &summary, None)
            .unwrap();

        let runs = store.recent_runs(5).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Completed);
        assert_eq!(runs[0].items_inserted, 6);
        assert_eq!(runs[0].stopped_reason.as_deref(), Some("all_duplicate"));
        assert!(runs[0].finished_at.is_some());
    }

    #[test]
    fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harvest.db");

        {
            let store = SqliteStore::new(&path).unwrap();
            store.insert(&record("k1", now())).unwrap();
        }

        let reopened = SqliteStore::new(&path).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
        assert_eq!(
            reopened.insert(&record("k1", now())).unwrap(),
            InsertOutcome::Duplicate
        );
    }
}
