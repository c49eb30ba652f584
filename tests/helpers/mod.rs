#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;
use serde_json::json;

use chronicle::audit::RecordingSink;
use chronicle::config::ChronicleConfig;
use chronicle::db;
use chronicle::embedding::hashing::HashingEmbeddingProvider;
use chronicle::embedding::EMBEDDING_DIM;
use chronicle::error::{GraphError, Result};
use chronicle::graph::edges::all_edges;
use chronicle::graph::nodes::get_nodes;
use chronicle::graph::store::GraphStore;
use chronicle::graph::types::{ArtifactRecord, NodeKind, OrgId, Relation};
use chronicle::narrator::breaker::BreakerConfig;
use chronicle::narrator::{NarrationRequest, Narrator, NarratorAdapter};
use chronicle::service::GraphService;

pub const ORG: &str = "acme";
pub const OTHER_ORG: &str = "globex";

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    db::open_memory_database().unwrap()
}

/// Event time of the first fixture artifact.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

pub fn hours(h: f64) -> chrono::Duration {
    chrono::Duration::milliseconds((h * 3_600_000.0) as i64)
}

pub fn artifact(
    org: &str,
    kind: NodeKind,
    foreign_id: &str,
    title: &str,
    text: &str,
    timestamp: DateTime<Utc>,
) -> ArtifactRecord {
    ArtifactRecord {
        org_id: org.into(),
        kind,
        foreign_id: foreign_id.into(),
        title: title.into(),
        text: text.into(),
        timestamp,
        metadata: Default::default(),
    }
}

pub fn with_meta(mut record: ArtifactRecord, key: &str, value: serde_json::Value) -> ArtifactRecord {
    record.metadata.insert(key.into(), value);
    record
}

/// The login-outage story: an issue, the meeting that prioritised it, the PR
/// fixing it, the deployment shipping the PR, the incident that followed and
/// the hotfix.
pub fn fixture(org: &str) -> Vec<ArtifactRecord> {
    let deploy_at = t0() + chrono::Duration::days(3);
    let incident_at = deploy_at + hours(17.5);
    vec![
        artifact(
            org,
            NodeKind::Issue,
            "ENG-102",
            "Session tokens expire early",
            "Users are logged out after five minutes.\n\nThe session token TTL looks misconfigured.",
            t0(),
        ),
        artifact(
            org,
            NodeKind::Meeting,
            "MTG-12",
            "Auth sync",
            "Attendees: web team\nDecision: prioritize ENG-102 this sprint.",
            t0() + chrono::Duration::days(1),
        ),
        artifact(
            org,
            NodeKind::PullRequest,
            "#456",
            "Extend session TTL",
            "Fixes ENG-102. Bumps the token TTL and refreshes sessions on login.",
            t0() + chrono::Duration::days(2),
        ),
        with_meta(
            artifact(
                org,
                NodeKind::Deployment,
                "DEPLOY-456",
                "Deploy web v2.14 to production",
                "Production rollout of the web frontend.",
                deploy_at,
            ),
            "pr",
            json!(456),
        ),
        artifact(
            org,
            NodeKind::Incident,
            "INC-789",
            "Login outage",
            "Login outage after DEPLOY-456 shipped the #456 change for ENG-102. \
             Rolled back via https://github.com/acme/web/pull/478",
            incident_at,
        ),
        artifact(
            org,
            NodeKind::PullRequest,
            "#478",
            "Hotfix: restore session refresh",
            "Fixes INC-789, regression from #456. Reverts https://github.com/acme/web/pull/456",
            incident_at + chrono::Duration::hours(2),
        ),
    ]
}

/// Edges a reviewer expects [`fixture`] to produce, as
/// `(src foreign_id, relation, dst foreign_id)`.
pub fn expected_edges() -> Vec<(&'static str, Relation, &'static str)> {
    vec![
        ("MTG-12", Relation::DerivedFrom, "ENG-102"),
        ("#456", Relation::Fixes, "ENG-102"),
        ("ENG-102", Relation::Implements, "#456"),
        ("#456", Relation::Next, "DEPLOY-456"),
        ("DEPLOY-456", Relation::Previous, "#456"),
        ("INC-789", Relation::CausedBy, "DEPLOY-456"),
        ("DEPLOY-456", Relation::References, "#456"),
        ("#456", Relation::References, "ENG-102"),
        ("INC-789", Relation::References, "#478"),
        ("#478", Relation::Fixes, "INC-789"),
        ("INC-789", Relation::Implements, "#478"),
        ("#478", Relation::References, "#456"),
    ]
}

/// Every edge of `org` as `(src foreign_id, relation, dst foreign_id, confidence)`.
pub fn edge_set(service: &GraphService, org: &str) -> Vec<(String, Relation, String, f64)> {
    let org = OrgId::parse(org).unwrap();
    service
        .store()
        .read(|conn| {
            let edges = all_edges(conn, &org)?;
            let ids: Vec<String> = edges
                .iter()
                .flat_map(|e| [e.src_id.clone(), e.dst_id.clone()])
                .collect();
            let nodes = get_nodes(conn, &org, &ids)?;
            Ok(edges
                .iter()
                .map(|e| {
                    (
                        nodes[&e.src_id].foreign_id.clone(),
                        e.relation,
                        nodes[&e.dst_id].foreign_id.clone(),
                        e.confidence,
                    )
                })
                .collect())
        })
        .unwrap()
}

pub fn find_edge<'a>(
    edges: &'a [(String, Relation, String, f64)],
    src: &str,
    relation: Relation,
    dst: &str,
) -> Option<&'a (String, Relation, String, f64)> {
    edges
        .iter()
        .find(|(s, r, d, _)| s == src && *r == relation && d == dst)
}

pub fn breaker_config() -> BreakerConfig {
    BreakerConfig {
        failure_threshold: 3,
        failure_window: Duration::from_secs(60),
        cooldown: Duration::from_secs(30),
    }
}

/// A service over a private in-memory store.
pub struct TestEnv {
    pub service: GraphService,
    pub sink: Arc<RecordingSink>,
}

pub fn test_env() -> TestEnv {
    test_env_with(None, ChronicleConfig::default())
}

pub fn test_env_with(narrator: Option<Arc<dyn Narrator>>, config: ChronicleConfig) -> TestEnv {
    let store = Arc::new(GraphStore::in_memory().unwrap());
    let embedder = Arc::new(HashingEmbeddingProvider::new(EMBEDDING_DIM));
    let adapter = NarratorAdapter::new(narrator, Duration::from_millis(300), breaker_config());
    let sink = Arc::new(RecordingSink::default());
    let service = GraphService::with_parts(store, embedder, adapter, sink.clone(), config);
    TestEnv { service, sink }
}

/// Service with the fixture ingested and built for [`ORG`].
pub async fn built_env() -> TestEnv {
    let env = test_env();
    env.service.ingest_and_rebuild(ORG, fixture(ORG)).await.unwrap();
    env
}

/// How a [`ScriptedNarrator`] answers.
#[derive(Debug, Clone)]
pub enum Script {
    /// Names every request node plus a foreign id that is not in the request.
    Echo,
    Fail,
    Hang,
}

pub struct ScriptedNarrator {
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedNarrator {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Narrator for ScriptedNarrator {
    async fn narrate(&self, request: &NarrationRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script {
            Script::Echo => {
                let ids: Vec<&str> = request.nodes.iter().map(|n| n.foreign_id.as_str()).collect();
                Ok(format!("In order: {}. See also OPS-4040.", ids.join(", ")))
            }
            Script::Fail => Err(GraphError::NarratorUnavailable("model overloaded".into())),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok("too late".into())
            }
        }
    }
}
