//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Forum-Harvest database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Harvested posts, one row per natural key
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    natural_key TEXT NOT NULL,
    title TEXT NOT NULL,
    author TEXT NOT NULL,
    category TEXT NOT NULL,
    status_label TEXT NOT NULL,
    has_attachment INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    created_at_raw TEXT NOT NULL,
    ingested_at TEXT NOT NULL,
    view_count INTEGER NOT NULL DEFAULT 0,
    reply_count INTEGER NOT NULL DEFAULT 0,
    url TEXT NOT NULL,
    body_text TEXT NOT NULL,
    image_urls TEXT NOT NULL,
    analyzed INTEGER NOT NULL DEFAULT 0,
    analysis_ref TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_records_natural_key ON records(natural_key);
CREATE INDEX IF NOT EXISTS idx_records_created_at ON records(created_at);
CREATE INDEX IF NOT EXISTS idx_records_ingested_at ON records(ingested_at);

-- Trigger keywords, managed outside the harvest loop
CREATE TABLE IF NOT EXISTS keywords (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    keyword TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

-- Track harvest runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    pages_visited INTEGER NOT NULL DEFAULT 0,
    pages_failed INTEGER NOT NULL DEFAULT 0,
    items_seen INTEGER NOT NULL DEFAULT 0,
    items_inserted INTEGER NOT NULL DEFAULT 0,
    items_duplicate INTEGER NOT NULL DEFAULT 0,
    items_dispatched INTEGER NOT NULL DEFAULT 0,
    stopped_reason TEXT,
    error_message TEXT
);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
