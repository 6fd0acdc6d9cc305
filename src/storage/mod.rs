//! Storage module for persisting harvested posts
//!
//! This module handles all durable state for the harvester, including:
//! - The record table and its natural-key uniqueness constraint
//! - The trigger keyword table
//! - Run history for the scheduler

mod memory;
mod schema;
mod sqlite;
mod traits;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{
    BulkInsertOutcome, InsertOutcome, KeywordSource, RecordStore, StaticKeywords, StoreError,
    StoreResult,
};

use std::path::Path;

/// Opens (and migrates) the SQLite store at `path`
pub fn open_store(path: &Path) -> StoreResult<SqliteStore> {
    SqliteStore::new(path)
}

/// Represents a harvest run in the database
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
    pub pages_visited: u32,
    pub pages_failed: u32,
    pub items_seen: u32,
    pub items_inserted: u32,
    pub items_duplicate: u32,
    pub items_dispatched: u32,
    pub stopped_reason: Option<String>,
    pub error_message: Option<String>,
}

/// Status of a harvest run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_from_db_string() {
        assert_eq!(
            RunStatus::from_db_string("completed"),
            Some(RunStatus::Completed)
        );
        assert_eq!(RunStatus::from_db_string("failed"), Some(RunStatus::Failed));
        assert_eq!(RunStatus::from_db_string("invalid"), None);
    }
}
