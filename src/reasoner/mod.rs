//! Read side of the graph: timelines, causality explanations, neighborhoods.
//!
//! Every query runs under an internal [`Deadline`]. Running out of budget
//! never fails a query; the partial result is returned with
//! `degraded: true`. Bounds on `depth`, `k`, and `window` are validated
//! before any graph work and are never clamped.

pub mod explain;
pub mod path;
pub mod timeline;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::audit::{GraphEvent, MetricsSink};
use crate::cache::{CacheKey, CachedSubgraph, SubgraphCache};
use crate::config::ReasonerConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{GraphError, Result};
use crate::graph::edges::edges_touching;
use crate::graph::nodes::{find_node, get_nodes};
use crate::graph::store::GraphStore;
use crate::graph::types::{MemoryEdge, MemoryNode, NodeKind, OrgId, Relation};
use crate::narrator::NarratorAdapter;

pub use path::SearchAlgorithm;

/// Longest accepted `explain` query text, in characters.
pub const MAX_QUERY_CHARS: usize = 2000;

/// Monotonic latency budget for one query.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn new(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn expired(&self) -> bool {
        self.started.elapsed() >= self.budget
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.started.elapsed())
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn exceeded(&self) -> GraphError {
        GraphError::DeadlineExceeded(self.elapsed())
    }
}

/// An edge as presented to callers: endpoints by `foreign_id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeView {
    pub src: String,
    pub dst: String,
    pub relation: Relation,
    pub weight: f64,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl EdgeView {
    /// `None` when either endpoint is missing from `nodes`.
    pub fn from_edge(edge: &MemoryEdge, nodes: &HashMap<String, MemoryNode>) -> Option<Self> {
        let src = nodes.get(&edge.src_id)?;
        let dst = nodes.get(&edge.dst_id)?;
        Some(Self {
            src: src.foreign_id.clone(),
            dst: dst.foreign_id.clone(),
            relation: edge.relation,
            weight: edge.weight,
            confidence: edge.confidence,
            metadata: edge.metadata.clone(),
        })
    }
}

/// One row of a reconstructed timeline.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: NodeKind,
    pub foreign_id: String,
    pub title: String,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineResult {
    /// `foreign_id` of the root node.
    pub root: String,
    pub nodes: Vec<MemoryNode>,
    pub edges: Vec<EdgeView>,
    /// Ordered by timestamp, ties by node id.
    pub timeline: Vec<TimelineEntry>,
    pub degraded: bool,
}

/// A returned node with the score that placed it in the top `k`.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredNode {
    #[serde(flatten)]
    pub node: MemoryNode,
    pub relevance: f64,
    /// Similarity of the seed this node was reached from.
    pub similarity: f64,
    pub hops: usize,
}

/// Best path from a seed to one returned node.
#[derive(Debug, Clone, Serialize)]
pub struct ExplainPath {
    pub target: String,
    /// `foreign_id`s from the seed to `target`.
    pub nodes: Vec<String>,
    pub relations: Vec<Relation>,
    pub relevance: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    pub query: String,
    pub algorithm: SearchAlgorithm,
    pub nodes: Vec<ScoredNode>,
    pub edges: Vec<EdgeView>,
    pub causal_chains: Vec<Vec<EdgeView>>,
    pub paths: Vec<ExplainPath>,
    pub paths_explored: usize,
    pub narrative: String,
    /// Always a subset of the returned nodes' `foreign_id`s.
    pub citations: Vec<String>,
    /// `false` when the template narrative was used.
    pub narrated: bool,
    /// Why the configured narrator was bypassed, if it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Neighborhood {
    pub node: MemoryNode,
    pub neighbors: Vec<MemoryNode>,
    pub edges: Vec<EdgeView>,
}

pub struct TemporalReasoner {
    store: Arc<GraphStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    cache: Arc<SubgraphCache>,
    narrator: Arc<NarratorAdapter>,
    sink: Arc<dyn MetricsSink>,
    config: ReasonerConfig,
}

impl TemporalReasoner {
    pub fn new(
        store: Arc<GraphStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        cache: Arc<SubgraphCache>,
        narrator: Arc<NarratorAdapter>,
        sink: Arc<dyn MetricsSink>,
        config: ReasonerConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            cache,
            narrator,
            sink,
            config,
        }
    }

    pub fn config(&self) -> &ReasonerConfig {
        &self.config
    }

    pub fn narrator(&self) -> &NarratorAdapter {
        &self.narrator
    }

    /// Reject out-of-range `explain` arguments.
    pub fn validate_explain(&self, query: &str, depth: usize, k: usize) -> Result<()> {
        if query.trim().is_empty() {
            return Err(GraphError::malformed("query text is empty"));
        }
        if query.chars().count() > MAX_QUERY_CHARS {
            return Err(GraphError::malformed(format!(
                "query text longer than {MAX_QUERY_CHARS} characters"
            )));
        }
        if depth == 0 || depth > self.config.max_depth {
            return Err(GraphError::malformed(format!(
                "depth must be between 1 and {}, got {depth}",
                self.config.max_depth
            )));
        }
        if k == 0 || k > self.config.max_k {
            return Err(GraphError::malformed(format!(
                "k must be between 1 and {}, got {k}",
                self.config.max_k
            )));
        }
        Ok(())
    }

    /// Reject non-positive or oversized timeline windows.
    pub fn validate_window(&self, window: chrono::Duration) -> Result<()> {
        let max_ms = (self.config.max_window_hours * 3_600_000.0) as i64;
        if window <= chrono::Duration::zero() {
            return Err(GraphError::malformed("window must be positive"));
        }
        if window.num_milliseconds() > max_ms {
            return Err(GraphError::malformed(format!(
                "window must be at most {} hours",
                self.config.max_window_hours
            )));
        }
        Ok(())
    }

    /// Chronological reconstruction around `root_foreign_id`.
    pub async fn timeline_for(
        &self,
        org: &OrgId,
        root_foreign_id: &str,
        window: chrono::Duration,
    ) -> Result<Arc<TimelineResult>> {
        self.validate_window(window)?;
        let deadline = Deadline::new(self.config.deadline());
        let depth = self.config.timeline_depth;
        let key = CacheKey::timeline(org, root_foreign_id, depth, window.num_seconds());

        if let Some(hit) = self.cache.get_timeline(&key) {
            self.served(org, "timeline", hit.nodes.len(), hit.edges.len(), true, false, &deadline);
            return Ok(hit);
        }

        let org_owned = org.clone();
        let root = root_foreign_id.to_string();
        let result = self
            .store
            .read_blocking(move |conn| {
                timeline::build_timeline(conn, &org_owned, &root, window, depth, &deadline)
            })
            .await?;

        if result.degraded {
            tracing::warn!(
                org_id = %org,
                root = root_foreign_id,
                error = %deadline.exceeded(),
                degraded = true,
                "timeline truncated"
            );
        }
        let result = Arc::new(result);
        if !result.degraded {
            self.cache.put(key, CachedSubgraph::Timeline(Arc::clone(&result)));
        }
        self.served(
            org,
            "timeline",
            result.nodes.len(),
            result.edges.len(),
            false,
            result.degraded,
            &deadline,
        );
        Ok(result)
    }

    /// Causality subgraph plus narrative for a free-text question.
    pub async fn explain(
        &self,
        org: &OrgId,
        query: &str,
        depth: usize,
        k: usize,
    ) -> Result<Arc<Explanation>> {
        self.validate_explain(query, depth, k)?;
        let deadline = Deadline::new(self.config.deadline());
        let key = CacheKey::explain(org, query, depth, k);

        if let Some(hit) = self.cache.get_explain(&key) {
            self.served(org, "explain", hit.nodes.len(), hit.edges.len(), true, false, &deadline);
            return Ok(hit);
        }

        let result = explain::run(self, org, query, depth, k, &deadline).await?;
        let result = Arc::new(result);
        // a narrator outage should not pin the template text for a full TTL
        if !result.degraded && result.fallback_reason.is_none() {
            self.cache.put(key, CachedSubgraph::Explain(Arc::clone(&result)));
        }
        self.served(
            org,
            "explain",
            result.nodes.len(),
            result.edges.len(),
            false,
            result.degraded,
            &deadline,
        );
        Ok(result)
    }

    /// The node with `foreign_id` plus its direct neighbors in this org.
    pub async fn neighborhood(&self, org: &OrgId, foreign_id: &str) -> Result<Neighborhood> {
        let deadline = Deadline::new(self.config.deadline());
        let org_owned = org.clone();
        let foreign_id = foreign_id.to_string();
        let result = self
            .store
            .read_blocking(move |conn| {
                let node = find_node(conn, &org_owned, &foreign_id, None)?
                    .ok_or_else(|| GraphError::not_found(foreign_id.clone()))?;
                let edges = edges_touching(conn, &org_owned, std::slice::from_ref(&node.id))?;
                let mut ids: Vec<String> = edges
                    .iter()
                    .map(|e| e.other_end(&node.id).to_string())
                    .collect();
                ids.sort();
                ids.dedup();
                let mut nodes = get_nodes(conn, &org_owned, &ids)?;

                let mut neighbors: Vec<MemoryNode> = nodes.values().cloned().collect();
                neighbors.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
                nodes.insert(node.id.clone(), node.clone());
                let edges = edges
                    .iter()
                    .filter_map(|e| EdgeView::from_edge(e, &nodes))
                    .collect();
                Ok(Neighborhood {
                    node,
                    neighbors,
                    edges,
                })
            })
            .await?;
        self.served(
            org,
            "neighborhood",
            result.neighbors.len() + 1,
            result.edges.len(),
            false,
            false,
            &deadline,
        );
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    fn served(
        &self,
        org: &OrgId,
        operation: &'static str,
        nodes: usize,
        edges: usize,
        cache_hit: bool,
        degraded: bool,
        deadline: &Deadline,
    ) {
        let duration_ms = deadline.elapsed().as_millis() as u64;
        tracing::debug!(org_id = %org, operation, nodes, edges, cache_hit, degraded, duration_ms, "query served");
        self.sink.emit(GraphEvent::QueryServed {
            org_id: org.to_string(),
            operation,
            nodes,
            edges,
            cache_hit,
            degraded,
            duration_ms,
        });
    }
}
