//! Storage traits and error types
//!
//! This module defines the trait interfaces the pipeline consumes and the
//! error type shared by every backend.

use crate::crawler::RunSummary;
use crate::record::CanonicalRecord;
use crate::storage::{RunRecord, RunStatus};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use thiserror::Error;

/// Errors that can occur during storage operations
///
/// A duplicate natural key is not an error; see [`InsertOutcome`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt row for {key}: {message}")]
    Corrupt { key: String, message: String },
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result of a single insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The record was stored
    Inserted,

    /// A record with the same natural key already exists; nothing changed
    Duplicate,
}

/// Counts produced by a bulk insert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkInsertOutcome {
    pub inserted: usize,
    pub duplicate: usize,
}

/// Durable record storage used by the harvester
///
/// The uniqueness of `natural_key` is the only dedup mechanism: concurrent
/// or repeated inserts of one key converge to exactly one stored record and
/// every later attempt reports [`InsertOutcome::Duplicate`].
pub trait RecordStore: Send + Sync {
    // ===== Records =====

    /// Returns true if a record with this natural key is stored
    fn exists(&self, natural_key: &str) -> StoreResult<bool>;

    /// Inserts a record unless its natural key is already present
    fn insert(&self, record: &CanonicalRecord) -> StoreResult<InsertOutcome>;

    /// Inserts many records, counting new rows and duplicates
    fn bulk_insert(&self, records: &[CanonicalRecord]) -> StoreResult<BulkInsertOutcome>;

    /// Gets a record by natural key
    fn get(&self, natural_key: &str) -> StoreResult<Option<CanonicalRecord>>;

    /// Gets the most recently ingested record
    fn latest(&self) -> StoreResult<Option<CanonicalRecord>>;

    /// Total number of stored records
    fn count(&self) -> StoreResult<u64>;

    /// Number of records already analyzed downstream
    fn count_analyzed(&self) -> StoreResult<u64>;

    /// Marks a record as analyzed by the downstream stage
    ///
    /// Returns false when no record has this key.
    fn mark_analyzed(&self, natural_key: &str, analysis_ref: Option<&str>) -> StoreResult<bool>;

    /// Records not yet analyzed, ingested at or after `cutoff`
    fn unanalyzed_since(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<CanonicalRecord>>;

    // ===== Run History =====

    /// Records the start of a harvest run and returns its ID
    fn begin_run(&self, config_hash: &str) -> StoreResult<i64>;

    /// Records the outcome of a harvest run
    fn finish_run(
        &self,
        run_id: i64,
        status: RunStatus,
        summary: &RunSummary,
        error: Option<&str>,
    ) -> StoreResult<()>;

    /// Most recent runs, newest first
    fn recent_runs(&self, limit: usize) -> StoreResult<Vec<RunRecord>>;
}

/// Source of trigger keywords
///
/// Implementations must read the current set on every call; the set can
/// change while the process runs.
pub trait KeywordSource: Send + Sync {
    fn list_keywords(&self) -> StoreResult<BTreeSet<String>>;
}

/// A fixed keyword set
#[derive(Debug, Clone, Default)]
pub struct StaticKeywords(pub BTreeSet<String>);

impl StaticKeywords {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(keywords.into_iter().map(Into::into).collect())
    }
}

impl KeywordSource for StaticKeywords {
    fn list_keywords(&self) -> StoreResult<BTreeSet<String>> {
        Ok(self.0.clone())
    }
}
