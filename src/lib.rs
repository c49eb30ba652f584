//! Memory graph and temporal reasoning over engineering artifacts.
//!
//! Chronicle links issues, pull requests, deployments, incidents, meetings,
//! and documents into a per-org graph, then answers "what happened" with
//! timelines and "why" with causality subgraphs and a cited narrative. It is
//! served over [MCP](https://modelcontextprotocol.io/) and a CLI.
//!
//! Edges are inferred by six heuristics:
//!
//! | Heuristic | Relation | Confidence |
//! |-----------|----------|------------|
//! | **Explicit reference** ("Fixes ENG-102") | `fixes` + `implements` | 1.0 |
//! | **Meeting-derived** | `derived_from` | 0.85-0.95 |
//! | **Deployment linkage** (PR in deploy metadata) | `next` + `previous` | 1.0 |
//! | **Temporal proximity** (incident after deploy) | `caused_by` | 0.9 decaying to 0.5 |
//! | **Identifier co-occurrence** | `references` | 0.6-0.8 |
//! | **Typed external reference** (PR/issue URLs) | `references` | 0.9 |
//!
//! # Architecture
//!
//! - **Storage**: SQLite with [sqlite-vec](https://github.com/asg017/sqlite-vec)
//!   for semantic seeding; every row and every accessor is scoped by [`graph::types::OrgId`]
//! - **Build**: heuristics run concurrently per batch, one merge transaction
//!   of atomic upserts per batch
//! - **Query**: bounded BFS/Dijkstra expansion under a latency deadline, a
//!   short-TTL subgraph cache, and a circuit-broken narrator with a
//!   deterministic fallback
//! - **Transport**: MCP over stdio or Streamable HTTP
//!
//! # Modules
//!
//! - [`config`]: configuration loading from TOML files and environment variables
//! - [`db`]: SQLite initialization, schema, migrations, and health checks
//! - [`graph`]: org-scoped node, edge, and artifact storage
//! - [`builder`]: artifact ingestion, heuristics, and rebuilds
//! - [`reasoner`]: timelines, explanations, and neighborhoods
//! - [`narrator`]: narrator boundary with timeout, circuit breaker, and template fallback
//! - [`service`]: org-validating facade used by the MCP tools and CLI

pub mod audit;
pub mod builder;
pub mod cache;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod graph;
pub mod narrator;
pub mod reasoner;
pub mod server;
pub mod service;
pub mod tools;
