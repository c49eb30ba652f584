//! Single weighted-path routine over an explored local graph.
//!
//! When every explored edge has roughly the same strength (`weight ×
//! confidence` within `epsilon`), hop count is as good a cost as any and a
//! plain multi-source BFS is used. Otherwise a Dijkstra search runs on the
//! cost `−ln(strength)`, which prefers a strong causal chain over a shorter
//! run of weak hops. Edges are traversed in both directions.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};

use serde::Serialize;

use crate::graph::types::MemoryEdge;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchAlgorithm {
    UniformBfs,
    Dijkstra,
}

/// Undirected adjacency over a set of edges.
#[derive(Debug, Default)]
pub struct LocalGraph {
    pub edges: Vec<MemoryEdge>,
    adjacency: HashMap<String, Vec<usize>>,
}

impl LocalGraph {
    pub fn new(edges: Vec<MemoryEdge>) -> Self {
        let mut adjacency: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, edge) in edges.iter().enumerate() {
            adjacency.entry(edge.src_id.clone()).or_default().push(i);
            adjacency.entry(edge.dst_id.clone()).or_default().push(i);
        }
        Self { edges, adjacency }
    }

    fn incident(&self, node: &str) -> &[usize] {
        self.adjacency.get(node).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Best known way to reach one node.
#[derive(Debug, Clone)]
pub struct Reached {
    /// Seed the path starts from.
    pub origin: String,
    pub hops: usize,
    pub cost: f64,
    /// Indices into [`LocalGraph::edges`] from the origin, in path order.
    pub path: Vec<usize>,
}

#[derive(Debug)]
pub struct SearchOutcome {
    pub algorithm: SearchAlgorithm,
    pub reached: HashMap<String, Reached>,
    /// Number of edge relaxations performed.
    pub paths_explored: usize,
}

impl SearchOutcome {
    /// Edge indices from the origin seed to `target`, in path order.
    pub fn path_to(&self, target: &str) -> Vec<usize> {
        self.reached
            .get(target)
            .map(|r| r.path.clone())
            .unwrap_or_default()
    }
}

/// Pick the traversal for this set of edges.
pub fn choose_algorithm(edges: &[MemoryEdge], epsilon: f64) -> SearchAlgorithm {
    let (lo, hi) = edges.iter().map(MemoryEdge::strength).fold(
        (f64::INFINITY, f64::NEG_INFINITY),
        |(lo, hi), s| (lo.min(s), hi.max(s)),
    );
    if edges.is_empty() || hi - lo <= epsilon {
        SearchAlgorithm::UniformBfs
    } else {
        SearchAlgorithm::Dijkstra
    }
}

fn edge_cost(edge: &MemoryEdge) -> f64 {
    -edge.strength().max(1e-9).ln()
}

fn seed_cost(similarity: f64) -> f64 {
    -similarity.clamp(1e-6, 1.0).ln()
}

/// Search outward from `seeds` (`(node_id, similarity)`) for at most
/// `max_hops` hops.
pub fn weighted_search(
    graph: &LocalGraph,
    seeds: &[(String, f64)],
    max_hops: usize,
    epsilon: f64,
) -> SearchOutcome {
    match choose_algorithm(&graph.edges, epsilon) {
        SearchAlgorithm::UniformBfs => bfs(graph, seeds, max_hops),
        SearchAlgorithm::Dijkstra => dijkstra(graph, seeds, max_hops),
    }
}

fn sorted_seeds(seeds: &[(String, f64)]) -> Vec<(String, f64)> {
    let mut seeds = seeds.to_vec();
    seeds.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    seeds
}

fn bfs(graph: &LocalGraph, seeds: &[(String, f64)], max_hops: usize) -> SearchOutcome {
    let mut reached: HashMap<String, Reached> = HashMap::new();
    let mut queue = VecDeque::new();
    let mut explored = 0;

    for (id, sim) in sorted_seeds(seeds) {
        if reached.contains_key(&id) {
            continue;
        }
        reached.insert(
            id.clone(),
            Reached {
                origin: id.clone(),
                hops: 0,
                cost: seed_cost(sim),
                path: Vec::new(),
            },
        );
        queue.push_back(id);
    }

    while let Some(node) = queue.pop_front() {
        let (hops, cost, origin, path) = {
            let r = &reached[&node];
            (r.hops, r.cost, r.origin.clone(), r.path.clone())
        };
        if hops >= max_hops {
            continue;
        }
        for &ei in graph.incident(&node) {
            explored += 1;
            let edge = &graph.edges[ei];
            let next = edge.other_end(&node).to_string();
            if reached.contains_key(&next) {
                continue;
            }
            let mut next_path = path.clone();
            next_path.push(ei);
            reached.insert(
                next.clone(),
                Reached {
                    origin: origin.clone(),
                    hops: hops + 1,
                    cost: cost + edge_cost(edge),
                    path: next_path,
                },
            );
            queue.push_back(next);
        }
    }

    SearchOutcome {
        algorithm: SearchAlgorithm::UniformBfs,
        reached,
        paths_explored: explored,
    }
}

#[derive(Debug)]
struct Frontier {
    cost: f64,
    /// Index into the state arena.
    state: usize,
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Frontier {}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frontier {
    // reversed: BinaryHeap is a max-heap
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.state.cmp(&self.state))
    }
}

/// Cheapest `(hops, cost)` labels seen per node. A label is only worth
/// expanding when no other label reaches the node in as few hops for as
/// little cost.
#[derive(Default)]
struct Labels(HashMap<String, Vec<(usize, f64)>>);

impl Labels {
    fn admit(&mut self, node: &str, hops: usize, cost: f64) -> bool {
        let front = self.0.entry(node.to_string()).or_default();
        if front.iter().any(|&(h, c)| h <= hops && c <= cost) {
            return false;
        }
        front.retain(|&(h, c)| !(hops <= h && cost <= c));
        front.push((hops, cost));
        true
    }
}

/// Dijkstra over `(node, hops)` states. A node first reached cheaply at the
/// hop limit may still be expanded through a costlier, shorter path, so
/// everything within `max_hops` of a seed is reached.
fn dijkstra(graph: &LocalGraph, seeds: &[(String, f64)], max_hops: usize) -> SearchOutcome {
    let mut states: Vec<(String, Reached)> = Vec::new();
    let mut labels = Labels::default();
    let mut reached: HashMap<String, Reached> = HashMap::new();
    let mut heap = BinaryHeap::new();
    let mut explored = 0;

    for (id, sim) in sorted_seeds(seeds) {
        let cost = seed_cost(sim);
        if !labels.admit(&id, 0, cost) {
            continue;
        }
        heap.push(Frontier { cost, state: states.len() });
        states.push((
            id.clone(),
            Reached {
                origin: id,
                hops: 0,
                cost,
                path: Vec::new(),
            },
        ));
    }

    while let Some(Frontier { state, .. }) = heap.pop() {
        let (node, current) = states[state].clone();
        // first pop per node is its cheapest path
        reached.entry(node.clone()).or_insert_with(|| current.clone());
        if current.hops >= max_hops {
            continue;
        }
        for &ei in graph.incident(&node) {
            explored += 1;
            let edge = &graph.edges[ei];
            let next = edge.other_end(&node).to_string();
            let next_cost = current.cost + edge_cost(edge);
            if !labels.admit(&next, current.hops + 1, next_cost) {
                continue;
            }
            let mut path = current.path.clone();
            path.push(ei);
            heap.push(Frontier {
                cost: next_cost,
                state: states.len(),
            });
            states.push((
                next,
                Reached {
                    origin: current.origin.clone(),
                    hops: current.hops + 1,
                    cost: next_cost,
                    path,
                },
            ));
        }
    }

    SearchOutcome {
        algorithm: SearchAlgorithm::Dijkstra,
        reached,
        paths_explored: explored,
    }
}
