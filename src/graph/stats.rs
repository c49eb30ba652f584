use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use super::artifacts::last_completed_rebuild;
use super::format_ts;
use super::types::{NodeKind, OrgId, Relation};
use crate::error::Result;

/// Response from `graph_stats`.
#[derive(Debug, Serialize)]
pub struct GraphStats {
    pub org_id: String,
    pub total_nodes: u64,
    pub stub_nodes: u64,
    pub total_edges: u64,
    pub artifacts: u64,
    pub nodes_by_kind: BTreeMap<String, u64>,
    pub edges_by_relation: BTreeMap<String, u64>,
    pub db_size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_rebuild: Option<String>,
}

/// Compute per-org graph statistics.
///
/// `db_path` is used for file size calculation; pass None for in-memory databases.
pub fn graph_stats(conn: &Connection, org: &OrgId, db_path: Option<&Path>) -> Result<GraphStats> {
    let count = |sql: &str| -> Result<u64> {
        let n: i64 = conn.query_row(sql, params![org.as_str()], |row| row.get(0))?;
        Ok(n as u64)
    };

    let total_nodes = count("SELECT COUNT(*) FROM memory_nodes WHERE org_id = ?1")?;
    let stub_nodes = count("SELECT COUNT(*) FROM memory_nodes WHERE org_id = ?1 AND is_stub = 1")?;
    let total_edges = count("SELECT COUNT(*) FROM memory_edges WHERE org_id = ?1")?;
    let artifacts = count("SELECT COUNT(*) FROM artifacts WHERE org_id = ?1")?;

    let nodes_by_kind = grouped(
        conn,
        org,
        "SELECT kind, COUNT(*) FROM memory_nodes WHERE org_id = ?1 GROUP BY kind",
        NodeKind::ALL.iter().map(|k| k.as_str()),
    )?;
    let edges_by_relation = grouped(
        conn,
        org,
        "SELECT relation, COUNT(*) FROM memory_edges WHERE org_id = ?1 GROUP BY relation",
        Relation::ALL.iter().map(|r| r.as_str()),
    )?;

    let (oldest_node, newest_node) = conn
        .query_row(
            "SELECT MIN(created_at), MAX(created_at) FROM memory_nodes WHERE org_id = ?1",
            params![org.as_str()],
            |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?)),
        )
        .optional()?
        .unwrap_or((None, None));

    let db_size_bytes = db_path
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .unwrap_or(0);

    Ok(GraphStats {
        org_id: org.to_string(),
        total_nodes,
        stub_nodes,
        total_edges,
        artifacts,
        nodes_by_kind,
        edges_by_relation,
        db_size_bytes,
        oldest_node,
        newest_node,
        last_rebuild: last_completed_rebuild(conn, org)?.map(|ts| format_ts(&ts)),
    })
}

/// `label -> count` for a two-column GROUP BY, with every known label present.
fn grouped<'a>(
    conn: &Connection,
    org: &OrgId,
    sql: &str,
    labels: impl Iterator<Item = &'a str>,
) -> Result<BTreeMap<String, u64>> {
    let mut map: BTreeMap<String, u64> = labels.map(|l| (l.to_string(), 0)).collect();
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params![org.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for (label, n) in rows {
        map.insert(label, n as u64);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::edges::upsert_edge;
    use crate::graph::nodes::{ensure_node, upsert_artifact_node};
    use crate::graph::types::ArtifactRecord;
    use chrono::{TimeZone, Utc};

    #[test]
    fn stats_on_empty_org() {
        let conn = crate::db::open_memory_database().unwrap();
        let stats = graph_stats(&conn, &OrgId::parse("acme").unwrap(), None).unwrap();
        assert_eq!(stats.total_nodes, 0);
        assert_eq!(stats.total_edges, 0);
        assert_eq!(stats.nodes_by_kind.len(), NodeKind::ALL.len());
        assert_eq!(stats.edges_by_relation["caused_by"], 0);
        assert!(stats.oldest_node.is_none());
        assert!(stats.last_rebuild.is_none());
    }

    #[test]
    fn stats_count_only_the_org() {
        let conn = crate::db::open_memory_database().unwrap();
        let acme = OrgId::parse("acme").unwrap();
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let rec = ArtifactRecord {
            org_id: "acme".into(),
            kind: NodeKind::PullRequest,
            foreign_id: "#456".into(),
            title: "Fix login".into(),
            text: "Fixes ENG-102".into(),
            timestamp: ts,
            metadata: Default::default(),
        };
        let pr = upsert_artifact_node(&conn, &acme, &rec, "", None).unwrap();
        let issue = ensure_node(&conn, &acme, "ENG-102", None, NodeKind::Issue, &ts).unwrap();
        upsert_edge(&conn, &acme, &pr.id, &issue.id, relation(), 1.0, &serde_json::json!({}))
            .unwrap();

        let globex = OrgId::parse("globex").unwrap();
        ensure_node(&conn, &globex, "ENG-1", None, NodeKind::Issue, &ts).unwrap();

        let stats = graph_stats(&conn, &acme, None).unwrap();
        assert_eq!(stats.total_nodes, 2);
        assert_eq!(stats.stub_nodes, 1);
        assert_eq!(stats.total_edges, 1);
        assert_eq!(stats.nodes_by_kind["pull_request"], 1);
        assert_eq!(stats.edges_by_relation["fixes"], 1);
    }

    fn relation() -> Relation {
        Relation::Fixes
    }
}
