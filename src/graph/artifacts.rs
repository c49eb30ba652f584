//! Artifact staging table and the rebuild run ledger.
//!
//! Ingestion writes normalized records here; `rebuild(org, since)` reads back
//! everything touched since the cutoff. Completed and cancelled rebuilds are
//! recorded in `rebuild_runs` so an interrupted rebuild can be resumed from the
//! last completed cutoff.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::types::{normalize_foreign_id, ArtifactRecord, NodeKind, OrgId};
use super::{format_ts, parse_ts};
use crate::error::{GraphError, Result};

const ARTIFACT_COLUMNS: &str = "org_id, kind, foreign_id, title, body, metadata, occurred_at";

fn row_to_artifact(row: &Row<'_>) -> rusqlite::Result<ArtifactRecord> {
    let kind: String = row.get(1)?;
    let kind = kind.parse::<NodeKind>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, e.into())
    })?;
    let metadata: Option<String> = row.get(5)?;
    let metadata = metadata
        .and_then(|m| serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&m).ok())
        .unwrap_or_default();
    let occurred_at: String = row.get(6)?;
    Ok(ArtifactRecord {
        org_id: row.get(0)?,
        kind,
        foreign_id: row.get(2)?,
        title: row.get(3)?,
        text: row.get(4)?,
        timestamp: parse_ts(&occurred_at)?,
        metadata,
    })
}

/// Stage one artifact record for the next rebuild.
///
/// Returns `true` if the record was new. Re-ingesting an existing
/// `(org, kind, foreign_id)` replaces its content and bumps `ingested_at`.
pub fn ingest_artifact(
    conn: &Connection,
    org: &OrgId,
    record: &ArtifactRecord,
    ingested_at: &DateTime<Utc>,
) -> Result<bool> {
    if record.org_id.trim() != org.as_str() {
        return Err(GraphError::CrossOrgAccessDenied {
            org_id: org.to_string(),
        });
    }
    let foreign_id = normalize_foreign_id(&record.foreign_id);
    if foreign_id.is_empty() {
        return Err(GraphError::malformed("artifact foreign_id must not be empty"));
    }

    let existed: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM artifacts WHERE org_id = ?1 AND kind = ?2 AND foreign_id = ?3",
        params![org.as_str(), record.kind.as_str(), foreign_id],
        |row| row.get(0),
    )?;

    let metadata = if record.metadata.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&record.metadata)?)
    };

    conn.execute(
        "INSERT INTO artifacts (org_id, kind, foreign_id, title, body, metadata, occurred_at, ingested_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
         ON CONFLICT(org_id, kind, foreign_id) DO UPDATE SET \
             title = excluded.title, \
             body = excluded.body, \
             metadata = excluded.metadata, \
             occurred_at = excluded.occurred_at, \
             ingested_at = excluded.ingested_at",
        params![
            org.as_str(),
            record.kind.as_str(),
            foreign_id,
            record.title,
            record.text,
            metadata,
            format_ts(&record.timestamp),
            format_ts(ingested_at),
        ],
    )?;

    Ok(!existed)
}

/// Artifacts ingested at or after `since`, oldest event first.
pub fn artifacts_since(
    conn: &Connection,
    org: &OrgId,
    since: &DateTime<Utc>,
) -> Result<Vec<ArtifactRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ARTIFACT_COLUMNS} FROM artifacts \
         WHERE org_id = ?1 AND ingested_at >= ?2 \
         ORDER BY occurred_at ASC, kind ASC, foreign_id ASC"
    ))?;
    let records = stmt
        .query_map(params![org.as_str(), format_ts(since)], row_to_artifact)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(records)
}

/// Artifacts of `kind` whose event time falls in `[from, to]`.
pub fn artifacts_in_range(
    conn: &Connection,
    org: &OrgId,
    kind: NodeKind,
    from: &DateTime<Utc>,
    to: &DateTime<Utc>,
) -> Result<Vec<ArtifactRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ARTIFACT_COLUMNS} FROM artifacts \
         WHERE org_id = ?1 AND kind = ?2 AND occurred_at >= ?3 AND occurred_at <= ?4 \
         ORDER BY occurred_at ASC, foreign_id ASC"
    ))?;
    let records = stmt
        .query_map(
            params![org.as_str(), kind.as_str(), format_ts(from), format_ts(to)],
            row_to_artifact,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(records)
}

/// Outcome recorded for a rebuild run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Append a rebuild run to the ledger.
pub fn record_rebuild_run(
    conn: &Connection,
    org: &OrgId,
    since: &DateTime<Utc>,
    started_at: &DateTime<Utc>,
    status: RunStatus,
    report: &serde_json::Value,
) -> Result<()> {
    conn.execute(
        "INSERT INTO rebuild_runs (id, org_id, since, started_at, finished_at, status, report) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            uuid::Uuid::now_v7().to_string(),
            org.as_str(),
            format_ts(since),
            format_ts(started_at),
            format_ts(&Utc::now()),
            status.as_str(),
            report.to_string(),
        ],
    )?;
    Ok(())
}

/// Start time of the most recent completed rebuild: the cutoff from which an
/// interrupted or periodic rebuild can safely resume.
pub fn last_completed_rebuild(conn: &Connection, org: &OrgId) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT started_at FROM rebuild_runs WHERE org_id = ?1 AND status = 'completed' \
             ORDER BY started_at DESC LIMIT 1",
            params![org.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(raw.map(|r| parse_ts(&r)).transpose()?)
}
