//! SQL DDL for all Chronicle tables.
//!
//! Defines `memory_nodes`, `memory_edges`, the `artifacts` staging table and
//! `schema_meta`. Every table is keyed by `org_id`; edges reference nodes
//! through composite `(org_id, id)` foreign keys so SQLite itself refuses an
//! edge whose endpoints live in another org. All DDL uses `IF NOT EXISTS`
//! for idempotent initialization.

use rusqlite::Connection;

/// All schema DDL statements for Chronicle's core tables.
const SCHEMA_SQL: &str = r#"
-- One row per artifact
CREATE TABLE IF NOT EXISTS memory_nodes (
    id TEXT PRIMARY KEY,
    org_id TEXT NOT NULL CHECK(length(org_id) > 0),
    kind TEXT NOT NULL CHECK(kind IN ('issue','pull_request','deployment','incident','meeting','doc','chat_thread','discussion','commit')),
    foreign_id TEXT NOT NULL,
    title TEXT NOT NULL,
    summary TEXT NOT NULL DEFAULT '',
    metadata TEXT,
    embedding BLOB,
    is_stub INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(org_id, kind, foreign_id),
    UNIQUE(org_id, id)
);

CREATE INDEX IF NOT EXISTS idx_nodes_foreign ON memory_nodes(org_id, foreign_id);
CREATE INDEX IF NOT EXISTS idx_nodes_created ON memory_nodes(org_id, created_at);

-- Typed relationships, never crossing an org
CREATE TABLE IF NOT EXISTS memory_edges (
    id TEXT PRIMARY KEY,
    org_id TEXT NOT NULL,
    src_id TEXT NOT NULL,
    dst_id TEXT NOT NULL,
    relation TEXT NOT NULL CHECK(relation IN ('discusses','references','implements','fixes','duplicates','derived_from','caused_by','next','previous')),
    weight REAL NOT NULL CHECK(weight >= 0.0 AND weight <= 1.0),
    confidence REAL NOT NULL CHECK(confidence >= 0.0 AND confidence <= 1.0),
    metadata TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK(src_id <> dst_id),
    UNIQUE(org_id, src_id, dst_id, relation),
    FOREIGN KEY(org_id, src_id) REFERENCES memory_nodes(org_id, id),
    FOREIGN KEY(org_id, dst_id) REFERENCES memory_nodes(org_id, id)
);

CREATE INDEX IF NOT EXISTS idx_edges_src ON memory_edges(org_id, src_id);
CREATE INDEX IF NOT EXISTS idx_edges_dst ON memory_edges(org_id, dst_id);

-- Normalized records delivered by ingestion, read by rebuild
CREATE TABLE IF NOT EXISTS artifacts (
    org_id TEXT NOT NULL CHECK(length(org_id) > 0),
    kind TEXT NOT NULL,
    foreign_id TEXT NOT NULL,
    title TEXT NOT NULL,
    body TEXT NOT NULL DEFAULT '',
    metadata TEXT,
    occurred_at TEXT NOT NULL,
    ingested_at TEXT NOT NULL,
    PRIMARY KEY(org_id, kind, foreign_id)
);

CREATE INDEX IF NOT EXISTS idx_artifacts_ingested ON artifacts(org_id, ingested_at);
CREATE INDEX IF NOT EXISTS idx_artifacts_occurred ON artifacts(org_id, kind, occurred_at);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}
