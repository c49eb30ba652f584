//! Edge storage with atomic, org-checked upserts.
//!
//! [`upsert_edge`] is a single `INSERT … SELECT … ON CONFLICT DO UPDATE`
//! statement: the `SELECT` only yields a row when both endpoints belong to the
//! calling org, and the conflict branch keeps `MAX(confidence)`. There is no
//! read-then-write window for concurrent writers to lose updates in.

use std::collections::HashSet;

use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::types::{MemoryEdge, OrgId, Relation};
use super::{format_ts, parse_json_column, parse_ts};
use crate::error::{GraphError, Result};

const EDGE_COLUMNS: &str =
    "id, org_id, src_id, dst_id, relation, weight, confidence, metadata, created_at";

/// Result of writing an edge.
#[derive(Debug, Clone, Serialize)]
pub struct EdgeWrite {
    pub id: String,
    /// `true` if the `(org, src, dst, relation)` key was new.
    pub created: bool,
}

fn row_to_edge(row: &Row<'_>) -> rusqlite::Result<MemoryEdge> {
    let relation: String = row.get(4)?;
    let relation = relation.parse::<Relation>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, e.into())
    })?;
    let created_at: String = row.get(8)?;
    Ok(MemoryEdge {
        id: row.get(0)?,
        org_id: row.get(1)?,
        src_id: row.get(2)?,
        dst_id: row.get(3)?,
        relation,
        weight: row.get(5)?,
        confidence: row.get(6)?,
        metadata: parse_json_column(row.get(7)?),
        created_at: parse_ts(&created_at)?,
    })
}

/// Insert an edge or raise the confidence of the existing one.
///
/// Fails with [`GraphError::CrossOrgAccessDenied`] if either endpoint is not a
/// node of `org`; that failure is also logged as a security event.
pub fn upsert_edge(
    conn: &Connection,
    org: &OrgId,
    src_id: &str,
    dst_id: &str,
    relation: Relation,
    confidence: f64,
    metadata: &serde_json::Value,
) -> Result<EdgeWrite> {
    if src_id == dst_id {
        return Err(GraphError::InvalidEdge(format!(
            "self-loop on {src_id} ({relation})"
        )));
    }
    if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
        return Err(GraphError::InvalidEdge(format!(
            "confidence {confidence} outside [0, 1]"
        )));
    }

    let new_id = uuid::Uuid::now_v7().to_string();
    let now = format_ts(&Utc::now());
    let metadata = serde_json::to_string(metadata)?;

    let id: Option<String> = conn
        .query_row(
            "INSERT INTO memory_edges (id, org_id, src_id, dst_id, relation, weight, confidence, metadata, created_at, updated_at) \
             SELECT ?1, ?2, s.id, d.id, ?5, ?6, ?7, ?8, ?9, ?9 \
             FROM memory_nodes s, memory_nodes d \
             WHERE s.org_id = ?2 AND s.id = ?3 AND d.org_id = ?2 AND d.id = ?4 \
             ON CONFLICT(org_id, src_id, dst_id, relation) DO UPDATE SET \
                 metadata = CASE WHEN excluded.confidence > confidence THEN excluded.metadata ELSE metadata END, \
                 updated_at = CASE WHEN excluded.confidence > confidence THEN excluded.updated_at ELSE updated_at END, \
                 confidence = MAX(confidence, excluded.confidence) \
             RETURNING id",
            params![
                new_id,
                org.as_str(),
                src_id,
                dst_id,
                relation.as_str(),
                relation.base_weight(),
                confidence,
                metadata,
                now,
            ],
            |row| row.get(0),
        )
        .optional()?;

    match id {
        Some(id) => Ok(EdgeWrite {
            created: id == new_id,
            id,
        }),
        None => {
            tracing::warn!(
                target: "chronicle::security",
                org_id = %org,
                src_id,
                dst_id,
                relation = %relation,
                "rejected edge whose endpoints are not both in the org"
            );
            Err(GraphError::CrossOrgAccessDenied {
                org_id: org.to_string(),
            })
        }
    }
}

/// Every edge with at least one endpoint in `node_ids`, via the
/// `(org_id, src_id)` and `(org_id, dst_id)` indexes.
pub fn edges_touching(
    conn: &Connection,
    org: &OrgId,
    node_ids: &[String],
) -> Result<Vec<MemoryEdge>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for chunk in node_ids.chunks(400) {
        let placeholders = vec!["?"; chunk.len()].join(",");
        for column in ["src_id", "dst_id"] {
            let sql = format!(
                "SELECT {EDGE_COLUMNS} FROM memory_edges \
                 WHERE org_id = ? AND {column} IN ({placeholders}) ORDER BY id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let params = std::iter::once(org.as_str()).chain(chunk.iter().map(String::as_str));
            for edge in stmt.query_map(params_from_iter(params), row_to_edge)? {
                let edge = edge?;
                if seen.insert(edge.id.clone()) {
                    out.push(edge);
                }
            }
        }
    }
    Ok(out)
}

/// Look up one edge by its natural key.
pub fn find_edge(
    conn: &Connection,
    org: &OrgId,
    src_id: &str,
    dst_id: &str,
    relation: Relation,
) -> Result<Option<MemoryEdge>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {EDGE_COLUMNS} FROM memory_edges \
                 WHERE org_id = ?1 AND src_id = ?2 AND dst_id = ?3 AND relation = ?4"
            ),
            params![org.as_str(), src_id, dst_id, relation.as_str()],
            row_to_edge,
        )
        .optional()?)
}

/// All edges of the org, ordered by id.
pub fn all_edges(conn: &Connection, org: &OrgId) -> Result<Vec<MemoryEdge>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {EDGE_COLUMNS} FROM memory_edges WHERE org_id = ?1 ORDER BY id"
    ))?;
    let edges = stmt
        .query_map(params![org.as_str()], row_to_edge)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(edges)
}

/// Number of edges in the org.
pub fn count_edges(conn: &Connection, org: &OrgId) -> Result<u64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM memory_edges WHERE org_id = ?1",
        params![org.as_str()],
        |row| row.get(0),
    )?;
    Ok(n as u64)
}
