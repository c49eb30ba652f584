//! Node storage: upsert from artifacts, stub resolution, org-scoped lookups,
//! and embedding similarity.
//!
//! Lookups are served by the `(org_id, kind, foreign_id)` unique index and the
//! `(org_id, foreign_id)` secondary index.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::types::{normalize_foreign_id, ArtifactRecord, MemoryNode, NodeKind, OrgId};
use super::{bytes_to_embedding, embedding_to_bytes, format_ts, parse_json_column, parse_ts};
use crate::error::{GraphError, Result};

const NODE_COLUMNS: &str = "id, org_id, kind, foreign_id, title, summary, metadata, embedding, \
                            is_stub, created_at, updated_at";

/// Result of writing a node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeWrite {
    pub id: String,
    /// `true` if the row did not exist before this call.
    pub created: bool,
}

fn row_to_node(row: &Row<'_>) -> rusqlite::Result<MemoryNode> {
    let kind: String = row.get(2)?;
    let kind = kind.parse::<NodeKind>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
    })?;
    let embedding: Option<Vec<u8>> = row.get(7)?;
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;
    Ok(MemoryNode {
        id: row.get(0)?,
        org_id: row.get(1)?,
        kind,
        foreign_id: row.get(3)?,
        title: row.get(4)?,
        summary: row.get(5)?,
        metadata: parse_json_column(row.get(6)?),
        embedding: embedding.map(|b| bytes_to_embedding(&b)),
        is_stub: row.get::<_, i64>(8)? != 0,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

/// Create or refresh the node for an ingested artifact.
///
/// A stub previously created for the same `foreign_id` under an inferred kind
/// is promoted in place (its id, and therefore its edges, survive). Re-ingestion
/// updates title, summary, metadata, embedding, and `updated_at`.
pub fn upsert_artifact_node(
    conn: &Connection,
    org: &OrgId,
    record: &ArtifactRecord,
    summary: &str,
    embedding: Option<&[f32]>,
) -> Result<NodeWrite> {
    if record.org_id != org.as_str() {
        return Err(GraphError::CrossOrgAccessDenied {
            org_id: org.to_string(),
        });
    }

    let foreign_id = normalize_foreign_id(&record.foreign_id);
    promote_stub_kind(conn, org, &foreign_id, record.kind)?;

    let new_id = uuid::Uuid::now_v7().to_string();
    let now = format_ts(&Utc::now());
    let metadata = if record.metadata.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&record.metadata)?)
    };

    let id: String = conn.query_row(
        "INSERT INTO memory_nodes (id, org_id, kind, foreign_id, title, summary, metadata, embedding, is_stub, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?10) \
         ON CONFLICT(org_id, kind, foreign_id) DO UPDATE SET \
             title = excluded.title, \
             summary = excluded.summary, \
             metadata = excluded.metadata, \
             embedding = COALESCE(excluded.embedding, embedding), \
             created_at = CASE WHEN is_stub = 1 THEN excluded.created_at ELSE created_at END, \
             is_stub = 0, \
             updated_at = excluded.updated_at \
         RETURNING id",
        params![
            new_id,
            org.as_str(),
            record.kind.as_str(),
            foreign_id,
            record.title,
            summary,
            metadata,
            embedding.map(embedding_to_bytes),
            format_ts(&record.timestamp),
            now,
        ],
        |row| row.get(0),
    )?;

    Ok(NodeWrite {
        created: id == new_id,
        id,
    })
}

/// If the only node for `foreign_id` is a stub of a different kind, correct
/// its kind so the upsert that follows lands on it.
fn promote_stub_kind(
    conn: &Connection,
    org: &OrgId,
    foreign_id: &str,
    kind: NodeKind,
) -> Result<()> {
    let exact: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM memory_nodes WHERE org_id = ?1 AND kind = ?2 AND foreign_id = ?3",
        params![org.as_str(), kind.as_str(), foreign_id],
        |row| row.get(0),
    )?;
    if exact {
        return Ok(());
    }
    conn.execute(
        "UPDATE memory_nodes SET kind = ?1 \
         WHERE id = (SELECT id FROM memory_nodes \
                     WHERE org_id = ?2 AND foreign_id = ?3 AND is_stub = 1 \
                     ORDER BY created_at, id LIMIT 1)",
        params![kind.as_str(), org.as_str(), foreign_id],
    )?;
    Ok(())
}

/// Resolve a referenced artifact, creating a stub node if it is unknown.
///
/// `kind_hint` narrows the lookup when the reference carries an explicit kind;
/// otherwise any node with that `foreign_id` in the org matches, ingested nodes
/// first. `stub_kind` and `seen_at` only apply when a stub must be created.
pub fn ensure_node(
    conn: &Connection,
    org: &OrgId,
    foreign_id: &str,
    kind_hint: Option<NodeKind>,
    stub_kind: NodeKind,
    seen_at: &DateTime<Utc>,
) -> Result<NodeWrite> {
    let foreign_id = normalize_foreign_id(foreign_id);
    let foreign_id = foreign_id.as_str();
    if let Some(node) = find_node(conn, org, foreign_id, kind_hint)? {
        return Ok(NodeWrite {
            id: node.id,
            created: false,
        });
    }

    let id = uuid::Uuid::now_v7().to_string();
    let seen = format_ts(seen_at);
    let inserted = conn.execute(
        "INSERT INTO memory_nodes (id, org_id, kind, foreign_id, title, summary, is_stub, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?4, '', 1, ?5, ?5) \
         ON CONFLICT(org_id, kind, foreign_id) DO NOTHING",
        params![id, org.as_str(), stub_kind.as_str(), foreign_id, seen],
    )?;

    if inserted == 1 {
        return Ok(NodeWrite { id, created: true });
    }
    find_node(conn, org, foreign_id, Some(stub_kind))?
        .map(|node| NodeWrite {
            id: node.id,
            created: false,
        })
        .ok_or_else(|| GraphError::not_found(foreign_id.to_string()))
}

/// Look up a node by external id within one org.
///
/// With a kind, the exact `(org, kind, foreign_id)` row wins; without one (or
/// when the exact row is absent) any kind matches, ingested nodes before stubs.
pub fn find_node(
    conn: &Connection,
    org: &OrgId,
    foreign_id: &str,
    kind: Option<NodeKind>,
) -> Result<Option<MemoryNode>> {
    let foreign_id = normalize_foreign_id(foreign_id);
    let foreign_id = foreign_id.as_str();
    if let Some(kind) = kind {
        let exact = conn
            .query_row(
                &format!(
                    "SELECT {NODE_COLUMNS} FROM memory_nodes \
                     WHERE org_id = ?1 AND kind = ?2 AND foreign_id = ?3"
                ),
                params![org.as_str(), kind.as_str(), foreign_id],
                row_to_node,
            )
            .optional()?;
        if exact.is_some() {
            return Ok(exact);
        }
    }

    Ok(conn
        .query_row(
            &format!(
                "SELECT {NODE_COLUMNS} FROM memory_nodes \
                 WHERE org_id = ?1 AND foreign_id = ?2 \
                 ORDER BY is_stub ASC, created_at ASC, id ASC LIMIT 1"
            ),
            params![org.as_str(), foreign_id],
            row_to_node,
        )
        .optional()?)
}

/// Fetch a node by internal id, only if it belongs to `org`.
pub fn get_node(conn: &Connection, org: &OrgId, id: &str) -> Result<Option<MemoryNode>> {
    Ok(conn
        .query_row(
            &format!("SELECT {NODE_COLUMNS} FROM memory_nodes WHERE org_id = ?1 AND id = ?2"),
            params![org.as_str(), id],
            row_to_node,
        )
        .optional()?)
}

/// Batch-fetch nodes by internal id. Ids belonging to other orgs are silently
/// absent from the result.
pub fn get_nodes(
    conn: &Connection,
    org: &OrgId,
    ids: &[String],
) -> Result<HashMap<String, MemoryNode>> {
    let mut out = HashMap::with_capacity(ids.len());
    // SQLite's default variable limit is generous, but keep batches bounded.
    for chunk in ids.chunks(500) {
        let placeholders = vec!["?"; chunk.len()].join(",");
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM memory_nodes WHERE org_id = ? AND id IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql)?;
        let params = std::iter::once(org.as_str()).chain(chunk.iter().map(String::as_str));
        let rows = stmt.query_map(params_from_iter(params), row_to_node)?;
        for node in rows {
            let node = node?;
            out.insert(node.id.clone(), node);
        }
    }
    Ok(out)
}

/// Nodes whose `foreign_id` is one of `foreign_ids`.
pub fn find_by_foreign_ids(
    conn: &Connection,
    org: &OrgId,
    foreign_ids: &[String],
) -> Result<Vec<MemoryNode>> {
    let mut out = Vec::new();
    for foreign_id in foreign_ids {
        if let Some(node) = find_node(conn, org, foreign_id, None)? {
            out.push(node);
        }
    }
    Ok(out)
}

/// Rank the org's embedded nodes by cosine similarity to `embedding`.
///
/// Returns `(node_id, similarity)` pairs, best first. Nodes whose stored
/// vector has a different dimensionality are skipped.
pub fn similar_nodes(
    conn: &Connection,
    org: &OrgId,
    embedding: &[f32],
    limit: usize,
) -> Result<Vec<(String, f64)>> {
    let byte_len = (embedding.len() * std::mem::size_of::<f32>()) as i64;
    let mut stmt = conn.prepare(
        "SELECT id, vec_distance_cosine(embedding, ?2) AS distance FROM memory_nodes \
         WHERE org_id = ?1 AND embedding IS NOT NULL AND length(embedding) = ?3 \
         ORDER BY distance ASC, id ASC LIMIT ?4",
    )?;
    let rows = stmt.query_map(
        params![
            org.as_str(),
            embedding_to_bytes(embedding),
            byte_len,
            limit as i64
        ],
        |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)),
    )?;

    let mut out = Vec::new();
    for row in rows {
        let (id, distance) = row?;
        out.push((id, (1.0 - distance).clamp(-1.0, 1.0)));
    }
    Ok(out)
}

/// Number of nodes in the org.
pub fn count_nodes(conn: &Connection, org: &OrgId) -> Result<u64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM memory_nodes WHERE org_id = ?1",
        params![org.as_str()],
        |row| row.get(0),
    )?;
    Ok(n as u64)
}
