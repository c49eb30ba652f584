//! `explain`: seed, expand, rank, extract causal chains, narrate.

use std::collections::{BTreeMap, HashMap, HashSet};

use rusqlite::Connection;

use super::path::{weighted_search, LocalGraph, SearchAlgorithm};
use super::{Deadline, EdgeView, ExplainPath, Explanation, ScoredNode, TemporalReasoner};
use crate::audit::GraphEvent;
use crate::builder::keys::extract_keys;
use crate::config::ReasonerConfig;
use crate::error::Result;
use crate::graph::edges::edges_touching;
use crate::graph::nodes::{find_node, get_nodes, similar_nodes};
use crate::graph::types::{MemoryEdge, MemoryNode, OrgId};
use crate::narrator::{NarrationEdge, NarrationNode, NarrationRequest};

/// Traversal knobs for one `explain` call.
#[derive(Debug, Clone)]
pub struct SubgraphParams {
    pub depth: usize,
    pub k: usize,
    pub seed_count: usize,
    pub min_seed_similarity: f64,
    pub hop_decay: f64,
    pub epsilon: f64,
    pub max_explored_edges: usize,
}

impl SubgraphParams {
    pub fn new(config: &ReasonerConfig, depth: usize, k: usize) -> Self {
        Self {
            depth,
            k,
            seed_count: config.seed_count,
            min_seed_similarity: config.min_seed_similarity,
            hop_decay: config.hop_decay,
            epsilon: config.uniform_weight_epsilon,
            max_explored_edges: config.max_explored_edges,
        }
    }
}

/// Ranked, bounded subgraph before narration.
#[derive(Debug)]
pub struct Subgraph {
    pub algorithm: SearchAlgorithm,
    pub nodes: Vec<ScoredNode>,
    pub edges: Vec<EdgeView>,
    pub causal_chains: Vec<Vec<EdgeView>>,
    pub paths: Vec<ExplainPath>,
    pub paths_explored: usize,
    pub degraded: bool,
}

impl Subgraph {
    fn empty(degraded: bool) -> Self {
        Self {
            algorithm: SearchAlgorithm::UniformBfs,
            nodes: Vec::new(),
            edges: Vec::new(),
            causal_chains: Vec::new(),
            paths: Vec::new(),
            paths_explored: 0,
            degraded,
        }
    }
}

pub(super) async fn run(
    reasoner: &TemporalReasoner,
    org: &OrgId,
    query: &str,
    depth: usize,
    k: usize,
    deadline: &Deadline,
) -> Result<Explanation> {
    let mut degraded = false;

    let embedding = match tokio::time::timeout(deadline.remaining(), reasoner.embedder.embed(query)).await {
        Ok(Ok(v)) => Some(v),
        Ok(Err(e)) => {
            tracing::warn!(org_id = %org, error = %e, degraded = true, "query embedding failed, seeding from keys only");
            degraded = true;
            None
        }
        Err(_) => {
            tracing::warn!(org_id = %org, error = %deadline.exceeded(), degraded = true, "query embedding timed out");
            degraded = true;
            None
        }
    };

    let mut keys: Vec<String> = extract_keys(query).into_iter().map(|m| m.key).collect();
    keys.dedup();
    let params = SubgraphParams::new(&reasoner.config, depth, k);
    let org_owned = org.clone();
    let deadline_copy = *deadline;
    let sub = reasoner
        .store
        .read_blocking(move |conn| {
            build_subgraph(conn, &org_owned, embedding.as_deref(), &keys, &params, &deadline_copy)
        })
        .await?;
    degraded |= sub.degraded;
    if sub.degraded {
        tracing::warn!(org_id = %org, error = %deadline.exceeded(), degraded = true, "explain subgraph truncated");
    }

    let request = narration_request(org, query, &sub);
    let narration = reasoner.narrator.narrate(&request, deadline.remaining()).await;
    if let Some(reason) = &narration.fallback_reason {
        reasoner.sink.emit(GraphEvent::NarratorFallback {
            org_id: org.to_string(),
            reason: reason.clone(),
        });
    }

    Ok(Explanation {
        query: query.to_string(),
        algorithm: sub.algorithm,
        nodes: sub.nodes,
        edges: sub.edges,
        causal_chains: sub.causal_chains,
        paths: sub.paths,
        paths_explored: sub.paths_explored,
        narrative: narration.text,
        citations: narration.citations,
        narrated: narration.narrated,
        fallback_reason: narration.fallback_reason,
        degraded,
    })
}

fn narration_request(org: &OrgId, query: &str, sub: &Subgraph) -> NarrationRequest {
    let edge = |e: &EdgeView| NarrationEdge {
        src: e.src.clone(),
        dst: e.dst.clone(),
        relation: e.relation,
        confidence: e.confidence,
    };
    NarrationRequest {
        org_id: org.to_string(),
        query: query.to_string(),
        nodes: sub
            .nodes
            .iter()
            .map(|n| NarrationNode {
                foreign_id: n.node.foreign_id.clone(),
                kind: n.node.kind,
                title: n.node.title.clone(),
                summary: n.node.summary.clone(),
                created_at: n.node.created_at,
            })
            .collect(),
        edges: sub.edges.iter().map(edge).collect(),
        causal_chains: sub
            .causal_chains
            .iter()
            .map(|chain| chain.iter().map(edge).collect())
            .collect(),
    }
}

/// Seed nodes as `(node_id, similarity)`: explicit keys in the query count
/// as exact matches, then the best embedding matches above the threshold.
fn seed_nodes(
    conn: &Connection,
    org: &OrgId,
    embedding: Option<&[f32]>,
    keys: &[String],
    params: &SubgraphParams,
) -> Result<Vec<(String, f64)>> {
    let mut seeds: BTreeMap<String, f64> = BTreeMap::new();
    for key in keys {
        if let Some(node) = find_node(conn, org, key, None)? {
            seeds.insert(node.id, 1.0);
        }
    }
    if let Some(embedding) = embedding {
        for (id, sim) in similar_nodes(conn, org, embedding, params.seed_count)? {
            if sim < params.min_seed_similarity {
                continue;
            }
            let entry = seeds.entry(id).or_insert(sim);
            *entry = entry.max(sim);
        }
    }
    Ok(seeds.into_iter().collect())
}

/// Outward expansion from the seeds, level by level, until `depth` hops,
/// the edge cap, or the deadline.
fn explore(
    conn: &Connection,
    org: &OrgId,
    seeds: &[(String, f64)],
    params: &SubgraphParams,
    deadline: &Deadline,
) -> Result<(Vec<MemoryEdge>, HashSet<String>, bool)> {
    let mut known: HashSet<String> = seeds.iter().map(|(id, _)| id.clone()).collect();
    let mut frontier: Vec<String> = known.iter().cloned().collect();
    frontier.sort();
    let mut seen_edges = HashSet::new();
    let mut edges = Vec::new();
    let mut truncated = false;

    'levels: for _ in 0..params.depth {
        if frontier.is_empty() {
            break;
        }
        if deadline.expired() {
            truncated = true;
            break;
        }
        let mut next = Vec::new();
        for edge in edges_touching(conn, org, &frontier)? {
            if !seen_edges.insert(edge.id.clone()) {
                continue;
            }
            for end in [&edge.src_id, &edge.dst_id] {
                if known.insert(end.clone()) {
                    next.push(end.clone());
                }
            }
            edges.push(edge);
            if edges.len() >= params.max_explored_edges {
                truncated = true;
                break 'levels;
            }
        }
        frontier = next;
    }
    Ok((edges, known, truncated))
}

/// Seed, expand, rank, and cut the subgraph at `k` nodes.
pub fn build_subgraph(
    conn: &Connection,
    org: &OrgId,
    embedding: Option<&[f32]>,
    keys: &[String],
    params: &SubgraphParams,
    deadline: &Deadline,
) -> Result<Subgraph> {
    let seeds = seed_nodes(conn, org, embedding, keys, params)?;
    if seeds.is_empty() {
        return Ok(Subgraph::empty(false));
    }

    let (edges, known, mut degraded) = explore(conn, org, &seeds, params, deadline)?;
    let ids: Vec<String> = known.into_iter().collect();
    let nodes = get_nodes(conn, org, &ids)?;
    let edges: Vec<MemoryEdge> = edges
        .into_iter()
        .filter(|e| nodes.contains_key(&e.src_id) && nodes.contains_key(&e.dst_id))
        .collect();

    let graph = LocalGraph::new(edges);
    let outcome = weighted_search(&graph, &seeds, params.depth, params.epsilon);
    let seed_sim: HashMap<&str, f64> = seeds.iter().map(|(id, s)| (id.as_str(), *s)).collect();

    let mut scored: Vec<ScoredNode> = outcome
        .reached
        .iter()
        .filter_map(|(id, reached)| {
            let node = nodes.get(id)?;
            let similarity = seed_sim.get(reached.origin.as_str()).copied().unwrap_or(0.0);
            let confidence: f64 = outcome
                .path_to(id)
                .iter()
                .map(|&i| graph.edges[i].confidence)
                .product();
            Some(ScoredNode {
                node: node.clone(),
                relevance: similarity * params.hop_decay.powi(reached.hops as i32) * confidence,
                similarity,
                hops: reached.hops,
            })
        })
        .collect();
    scored.sort_by(|a, b| {
        b.relevance
            .total_cmp(&a.relevance)
            .then_with(|| a.hops.cmp(&b.hops))
            .then_with(|| a.node.id.cmp(&b.node.id))
    });
    scored.truncate(params.k);

    let selected: HashMap<String, MemoryNode> = scored
        .iter()
        .map(|s| (s.node.id.clone(), s.node.clone()))
        .collect();

    let mut kept: Vec<&MemoryEdge> = graph
        .edges
        .iter()
        .filter(|e| selected.contains_key(&e.src_id) && selected.contains_key(&e.dst_id))
        .collect();
    kept.sort_by(|a, b| a.id.cmp(&b.id));
    let edge_views: Vec<EdgeView> = kept
        .iter()
        .filter_map(|e| EdgeView::from_edge(e, &selected))
        .collect();
    let causal_chains = causal_chains(&kept, &selected);

    let paths = scored
        .iter()
        .filter(|s| s.hops > 0)
        .map(|s| {
            let steps = outcome.path_to(&s.node.id);
            let mut fids = Vec::with_capacity(steps.len() + 1);
            if let Some(origin) = outcome.reached.get(&s.node.id).and_then(|r| nodes.get(&r.origin)) {
                fids.push(origin.foreign_id.clone());
            }
            let mut cursor = outcome
                .reached
                .get(&s.node.id)
                .map(|r| r.origin.clone())
                .unwrap_or_default();
            let mut relations = Vec::with_capacity(steps.len());
            for &i in &steps {
                let edge = &graph.edges[i];
                cursor = edge.other_end(&cursor).to_string();
                if let Some(n) = nodes.get(&cursor) {
                    fids.push(n.foreign_id.clone());
                }
                relations.push(edge.relation);
            }
            ExplainPath {
                target: s.node.foreign_id.clone(),
                nodes: fids,
                relations,
                relevance: s.relevance,
            }
        })
        .collect();

    if deadline.expired() {
        degraded = true;
    }

    Ok(Subgraph {
        algorithm: outcome.algorithm,
        nodes: scored,
        edges: edge_views,
        causal_chains,
        paths,
        paths_explored: outcome.paths_explored,
        degraded,
    })
}

/// Group causal edges into chains: edges sharing a node belong to the same
/// chain. Chains are ordered by their earliest node, edges by source time.
fn causal_chains(edges: &[&MemoryEdge], nodes: &HashMap<String, MemoryNode>) -> Vec<Vec<EdgeView>> {
    let causal: Vec<&MemoryEdge> = edges.iter().copied().filter(|e| e.relation.is_causal()).collect();
    if causal.is_empty() {
        return Vec::new();
    }

    // union-find over edge indices
    let mut parent: Vec<usize> = (0..causal.len()).collect();
    fn root(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }
    let mut by_node: HashMap<&str, usize> = HashMap::new();
    for (i, edge) in causal.iter().enumerate() {
        for end in [edge.src_id.as_str(), edge.dst_id.as_str()] {
            match by_node.get(end) {
                Some(&j) => {
                    let (a, b) = (root(&mut parent, i), root(&mut parent, j));
                    if a != b {
                        parent[a] = b;
                    }
                }
                None => {
                    by_node.insert(end, i);
                }
            }
        }
    }

    let mut groups: BTreeMap<usize, Vec<&MemoryEdge>> = BTreeMap::new();
    for (i, edge) in causal.iter().enumerate() {
        let r = root(&mut parent, i);
        groups.entry(r).or_default().push(edge);
    }

    let time_of = |id: &str| nodes.get(id).map(|n| n.created_at);
    let mut chains: Vec<Vec<&MemoryEdge>> = groups.into_values().collect();
    for chain in &mut chains {
        chain.sort_by(|a, b| {
            time_of(&a.src_id)
                .cmp(&time_of(&b.src_id))
                .then_with(|| a.id.cmp(&b.id))
        });
    }
    chains.sort_by_key(|chain| {
        chain
            .iter()
            .flat_map(|e| [time_of(&e.src_id), time_of(&e.dst_id)])
            .min()
            .flatten()
    });

    chains
        .into_iter()
        .map(|chain| {
            chain
                .into_iter()
                .filter_map(|e| EdgeView::from_edge(e, nodes))
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::db::open_memory_database;
    use crate::embedding::hashing::HashingEmbeddingProvider;
    use crate::graph::edges::upsert_edge;
    use crate::graph::nodes::upsert_artifact_node;
    use crate::graph::types::{ArtifactRecord, NodeKind, Relation};

    struct Fixture {
        conn: Connection,
        org: OrgId,
        embedder: HashingEmbeddingProvider,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                conn: open_memory_database().unwrap(),
                org: OrgId::parse("acme").unwrap(),
                embedder: HashingEmbeddingProvider::new(crate::embedding::EMBEDDING_DIM),
            }
        }

        fn node(&self, kind: NodeKind, fid: &str, title: &str, hours: i64) -> String {
            let record = ArtifactRecord {
                org_id: "acme".into(),
                kind,
                foreign_id: fid.into(),
                title: title.into(),
                text: String::new(),
                timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap() + chrono::Duration::hours(hours),
                metadata: Default::default(),
            };
            let embedding = self.embedder.embed_sync(&format!("{fid} {title}"));
            upsert_artifact_node(&self.conn, &self.org, &record, title, Some(&embedding))
                .unwrap()
                .id
        }

        fn link(&self, src: &str, dst: &str, relation: Relation, confidence: f64) {
            upsert_edge(&self.conn, &self.org, src, dst, relation, confidence, &serde_json::json!({})).unwrap();
        }

        fn explain(&self, query: &str, depth: usize, k: usize) -> Subgraph {
            let mut params = SubgraphParams::new(&ReasonerConfig::default(), depth, k);
            // key seeding only, so hash collisions cannot add seeds
            params.min_seed_similarity = 0.5;
            let keys: Vec<String> = extract_keys(query).into_iter().map(|m| m.key).collect();
            let embedding = self.embedder.embed_sync(query);
            build_subgraph(
                &self.conn,
                &self.org,
                Some(&embedding),
                &keys,
                &params,
                &Deadline::new(Duration::from_secs(10)),
            )
            .unwrap()
        }
    }

    fn chain_fixture() -> Fixture {
        let f = Fixture::new();
        let issue = f.node(NodeKind::Issue, "ENG-102", "Login fails after token refresh", 0);
        let pr = f.node(NodeKind::PullRequest, "#456", "Refresh tokens eagerly", 10);
        let deploy = f.node(NodeKind::Deployment, "DEPLOY-456", "Deploy web 2025.03.02", 20);
        let incident = f.node(NodeKind::Incident, "INC-789", "Login outage", 37);
        let doc = f.node(NodeKind::Doc, "DOC-9", "Auth runbook", 5);
        f.link(&pr, &issue, Relation::Fixes, 1.0);
        f.link(&issue, &pr, Relation::Implements, 1.0);
        f.link(&pr, &deploy, Relation::Next, 1.0);
        f.link(&incident, &deploy, Relation::CausedBy, 0.745);
        f.link(&doc, &issue, Relation::Discusses, 0.5);
        f
    }

    #[test]
    fn key_in_query_seeds_and_chains_are_extracted() {
        let f = chain_fixture();
        let sub = f.explain("why was ENG-102 reopened?", 3, 12);

        assert_eq!(sub.nodes[0].node.foreign_id, "ENG-102");
        assert_eq!(sub.nodes[0].hops, 0);
        assert_eq!(sub.algorithm, SearchAlgorithm::Dijkstra);
        assert!(sub.paths_explored > 0);
        assert!(!sub.degraded);
        assert!(sub.edges.iter().any(|e| e.relation.is_causal()));
        assert!(!sub.causal_chains.is_empty());
        let returned: HashSet<&str> = sub.nodes.iter().map(|n| n.node.foreign_id.as_str()).collect();
        for edge in &sub.edges {
            assert!(returned.contains(edge.src.as_str()) && returned.contains(edge.dst.as_str()));
        }
    }

    #[test]
    fn relevance_is_non_increasing_and_capped_at_k() {
        let f = chain_fixture();
        let sub = f.explain("why was ENG-102 reopened?", 3, 3);
        assert_eq!(sub.nodes.len(), 3);
        assert!(sub.nodes.windows(2).all(|w| w[0].relevance >= w[1].relevance));
    }

    #[test]
    fn depth_limits_hops() {
        let f = chain_fixture();
        let sub = f.explain("ENG-102", 1, 12);
        assert!(sub.nodes.iter().all(|n| n.hops <= 1));
        assert!(!sub.nodes.iter().any(|n| n.node.foreign_id == "INC-789"));
        assert!(sub.nodes.iter().any(|n| n.node.foreign_id == "#456"));
    }

    #[test]
    fn paths_start_at_the_seed() {
        let f = chain_fixture();
        let sub = f.explain("ENG-102", 3, 12);
        let to_incident = sub.paths.iter().find(|p| p.target == "INC-789").unwrap();
        assert_eq!(to_incident.nodes.first().map(String::as_str), Some("ENG-102"));
        assert_eq!(to_incident.nodes.last().map(String::as_str), Some("INC-789"));
        assert_eq!(to_incident.relations.len(), to_incident.nodes.len() - 1);
    }

    #[test]
    fn no_seeds_yields_empty_subgraph() {
        let f = Fixture::new();
        let sub = f.explain("why did anything happen", 3, 12);
        assert!(sub.nodes.is_empty());
        assert!(sub.edges.is_empty());
        assert!(!sub.degraded);
    }

    #[test]
    fn causal_edges_sharing_a_node_form_one_chain() {
        let f = chain_fixture();
        let sub = f.explain("ENG-102", 3, 12);
        // fixes/implements around ENG-102 and #456 are one chain; caused_by is separate
        assert_eq!(sub.causal_chains.len(), 2);
        let first: Vec<Relation> = sub.causal_chains[0].iter().map(|e| e.relation).collect();
        assert!(first.contains(&Relation::Fixes) && first.contains(&Relation::Implements));
    }
}
