//! Chronological reconstruction around one root node.

use std::collections::{HashMap, HashSet};

use rusqlite::Connection;

use super::{Deadline, EdgeView, TimelineEntry, TimelineResult};
use crate::error::{GraphError, Result};
use crate::graph::edges::edges_touching;
use crate::graph::nodes::{find_node, get_nodes};
use crate::graph::types::{MemoryEdge, MemoryNode, OrgId};

/// Breadth-first walk from the root, at most `depth` hops.
///
/// A neighbor is kept when its `created_at` lies within `window` of the
/// root's. The root's immediate `next`/`previous` neighbors are kept
/// regardless of the window.
pub fn build_timeline(
    conn: &Connection,
    org: &OrgId,
    root_foreign_id: &str,
    window: chrono::Duration,
    depth: usize,
    deadline: &Deadline,
) -> Result<TimelineResult> {
    let root = find_node(conn, org, root_foreign_id, None)?
        .ok_or_else(|| GraphError::not_found(root_foreign_id.to_string()))?;
    let from = root.created_at - window;
    let to = root.created_at + window;

    let mut nodes: HashMap<String, MemoryNode> = HashMap::new();
    let mut edges: HashMap<String, MemoryEdge> = HashMap::new();
    let mut frontier = vec![root.id.clone()];
    nodes.insert(root.id.clone(), root.clone());
    let mut degraded = false;

    for _ in 0..depth {
        if frontier.is_empty() {
            break;
        }
        if deadline.expired() {
            degraded = true;
            break;
        }

        let touching = edges_touching(conn, org, &frontier)?;
        let frontier_set: HashSet<&str> = frontier.iter().map(String::as_str).collect();
        let unseen: Vec<String> = touching
            .iter()
            .flat_map(|e| [e.src_id.clone(), e.dst_id.clone()])
            .filter(|id| !nodes.contains_key(id))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let fetched = get_nodes(conn, org, &unseen)?;

        let mut next = Vec::new();
        for edge in touching {
            // an edge may touch two frontier nodes; either end can be "current"
            let current = if frontier_set.contains(edge.src_id.as_str()) {
                edge.src_id.as_str()
            } else {
                edge.dst_id.as_str()
            };
            let other = edge.other_end(current).to_string();

            if nodes.contains_key(&other) {
                edges.entry(edge.id.clone()).or_insert(edge);
                continue;
            }
            let Some(neighbor) = fetched.get(&other) else {
                continue;
            };
            let in_window = neighbor.created_at >= from && neighbor.created_at <= to;
            let direct_chain = current == root.id && edge.relation.is_temporal();
            if !(in_window || direct_chain) {
                continue;
            }
            nodes.insert(other.clone(), neighbor.clone());
            edges.entry(edge.id.clone()).or_insert(edge);
            next.push(other);
        }
        frontier = next;
    }

    let mut ordered: Vec<MemoryNode> = nodes.values().cloned().collect();
    ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

    let mut edge_list: Vec<MemoryEdge> = edges.into_values().collect();
    edge_list.sort_by(|a, b| a.id.cmp(&b.id));
    let edge_views = edge_list
        .iter()
        .filter_map(|e| EdgeView::from_edge(e, &nodes))
        .collect();

    let timeline = ordered
        .iter()
        .map(|n| TimelineEntry {
            timestamp: n.created_at,
            kind: n.kind,
            foreign_id: n.foreign_id.clone(),
            title: n.title.clone(),
            summary: n.summary.clone(),
        })
        .collect();

    Ok(TimelineResult {
        root: root.foreign_id,
        nodes: ordered,
        edges: edge_views,
        timeline,
        degraded,
    })
}
