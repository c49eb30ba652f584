mod helpers;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use chronicle::audit::GraphEvent;
use chronicle::config::ChronicleConfig;
use chronicle::graph::types::{NodeKind, OrgId, Relation};
use helpers::{artifact, edge_set, expected_edges, find_edge, fixture, hours, t0, with_meta, ORG};

#[tokio::test]
async fn explicit_reference_links_pr_and_issue() {
    let env = helpers::test_env();
    let records = vec![
        artifact(ORG, NodeKind::Issue, "ENG-102", "Session expiry", "", t0()),
        artifact(ORG, NodeKind::PullRequest, "#456", "Extend TTL", "Fixes ENG-102", t0() + hours(4.0)),
    ];
    let outcome = env.service.ingest_and_rebuild(ORG, records).await.unwrap();
    assert_eq!(outcome.ingest.new, 2);
    assert_eq!(outcome.rebuild.heuristics["explicit_reference"].created, 2);

    let edges = edge_set(&env.service, ORG);
    let fixes = find_edge(&edges, "#456", Relation::Fixes, "ENG-102").expect("fixes edge");
    assert_eq!(fixes.3, 1.0);
    let implements =
        find_edge(&edges, "ENG-102", Relation::Implements, "#456").expect("implements edge");
    assert_eq!(implements.3, 1.0);
}

#[tokio::test]
async fn incident_inside_window_is_caused_by_deployment() {
    let env = helpers::test_env();
    let deploy_at = t0();
    let records = vec![
        artifact(ORG, NodeKind::Deployment, "DEPLOY-456", "Deploy web", "", deploy_at),
        artifact(ORG, NodeKind::Incident, "INC-789", "Login outage", "", deploy_at + hours(17.5)),
        artifact(ORG, NodeKind::Incident, "INC-900", "Disk full", "", deploy_at + hours(48.0)),
    ];
    env.service.ingest_and_rebuild(ORG, records).await.unwrap();

    let edges = edge_set(&env.service, ORG);
    let caused =
        find_edge(&edges, "INC-789", Relation::CausedBy, "DEPLOY-456").expect("caused_by edge");
    assert!(caused.3 > 0.7 && caused.3 < 0.9, "confidence {}", caused.3);
    assert!(
        !edges.iter().any(|(src, rel, _, _)| src == "INC-900" && *rel == Relation::CausedBy),
        "incident outside the window must not be linked"
    );
}

#[tokio::test]
async fn deployment_ingested_after_incident_still_links() {
    let env = helpers::test_env();
    let deploy_at = t0();
    env.service
        .ingest_and_rebuild(
            ORG,
            vec![artifact(ORG, NodeKind::Incident, "INC-789", "Login outage", "", deploy_at + hours(2.0))],
        )
        .await
        .unwrap();
    env.service
        .ingest_and_rebuild(
            ORG,
            vec![artifact(ORG, NodeKind::Deployment, "DEPLOY-456", "Deploy web", "", deploy_at)],
        )
        .await
        .unwrap();

    let edges = edge_set(&env.service, ORG);
    assert!(find_edge(&edges, "INC-789", Relation::CausedBy, "DEPLOY-456").is_some());
}

#[tokio::test]
async fn fixture_accuracy_meets_threshold() {
    let env = helpers::built_env().await;
    let edges = edge_set(&env.service, ORG);

    let expected = expected_edges();
    let missing: Vec<_> = expected
        .iter()
        .filter(|(src, rel, dst)| find_edge(&edges, src, *rel, dst).is_none())
        .collect();
    let found = expected.len() - missing.len();
    assert!(
        found * 10 >= expected.len() * 8,
        "only {found}/{} expected edges inferred, missing {missing:?}",
        expected.len()
    );
}

#[tokio::test]
async fn fixture_edges_carry_relation_weights_and_heuristic() {
    let env = helpers::built_env().await;
    let org = OrgId::parse(ORG).unwrap();
    let edges = env
        .service
        .store()
        .read(|conn| chronicle::graph::edges::all_edges(conn, &org))
        .unwrap();
    assert!(!edges.is_empty());
    for edge in &edges {
        assert_eq!(edge.weight, edge.relation.base_weight());
        assert!((0.0..=1.0).contains(&edge.confidence));
        assert_ne!(edge.src_id, edge.dst_id);
        let heuristic = edge
            .metadata
            .as_ref()
            .and_then(|m| m.get("heuristic"))
            .and_then(|h| h.as_str());
        assert!(heuristic.is_some(), "edge {} has no heuristic recorded", edge.id);
    }

    let typed = edges
        .iter()
        .filter(|e| e.relation == Relation::References)
        .filter_map(|e| e.metadata.as_ref())
        .filter_map(|m| m.get("ref_type"))
        .count();
    assert!(typed >= 2, "typed references should record their type");
}

#[tokio::test]
async fn rebuild_is_idempotent() {
    let env = helpers::built_env().await;
    let before = edge_set(&env.service, ORG);

    let report = env
        .service
        .rebuild(ORG, Some(DateTime::<Utc>::UNIX_EPOCH))
        .await
        .unwrap();
    assert_eq!(report.artifacts_processed, 6);
    assert_eq!(report.edges_created(), 0);
    assert!(report.edges_updated() > 0);
    assert_eq!(report.nodes_created, 0);

    let mut after = edge_set(&env.service, ORG);
    let mut before = before;
    before.sort_by(|a, b| (&a.0, a.1.as_str(), &a.2).cmp(&(&b.0, b.1.as_str(), &b.2)));
    after.sort_by(|a, b| (&a.0, a.1.as_str(), &a.2).cmp(&(&b.0, b.1.as_str(), &b.2)));
    assert_eq!(before, after);
}

#[tokio::test]
async fn reingest_keeps_highest_confidence() {
    let env = helpers::built_env().await;
    let before = edge_set(&env.service, ORG);
    let original = find_edge(&before, "INC-789", Relation::CausedBy, "DEPLOY-456")
        .expect("caused_by edge")
        .3;

    // same incident, reported later in the window
    let deploy_at = t0() + chrono::Duration::days(3);
    let later = artifact(ORG, NodeKind::Incident, "INC-789", "Login outage", "", deploy_at + hours(23.0));
    env.service.ingest_and_rebuild(ORG, vec![later]).await.unwrap();

    let after = edge_set(&env.service, ORG);
    let kept = find_edge(&after, "INC-789", Relation::CausedBy, "DEPLOY-456")
        .expect("caused_by edge")
        .3;
    assert_eq!(kept, original);
    assert_eq!(before.len(), after.len());
}

#[tokio::test]
async fn references_to_unknown_artifacts_create_stubs() {
    let env = helpers::test_env();
    let records = vec![artifact(
        ORG,
        NodeKind::PullRequest,
        "#12",
        "Tidy config",
        "Closes OPS-7",
        t0(),
    )];
    let outcome = env.service.ingest_and_rebuild(ORG, records).await.unwrap();
    assert_eq!(outcome.rebuild.stubs_created, 1);

    let hood = env.service.neighborhood(ORG, "OPS-7").await.unwrap();
    assert!(hood.node.is_stub);
    assert_eq!(hood.node.kind, NodeKind::Issue);

    // ingesting the artifact later promotes the stub in place
    let issue = artifact(ORG, NodeKind::Issue, "OPS-7", "Config drift", "", t0());
    env.service.ingest_and_rebuild(ORG, vec![issue]).await.unwrap();
    let promoted = env.service.neighborhood(ORG, "OPS-7").await.unwrap();
    assert!(!promoted.node.is_stub);
    assert_eq!(promoted.node.id, hood.node.id);
    assert_eq!(promoted.neighbors.len(), 1);
}

#[tokio::test]
async fn lowercase_artifact_id_matches_its_references() {
    let env = helpers::test_env();
    let records = vec![
        artifact(ORG, NodeKind::Issue, "eng-7", "Flaky login", "", t0()),
        artifact(ORG, NodeKind::PullRequest, "#70", "Retry login", "Fixes ENG-7", t0() + hours(2.0)),
    ];
    let outcome = env.service.ingest_and_rebuild(ORG, records).await.unwrap();
    assert_eq!(outcome.rebuild.stubs_created, 0);

    let stats = env.service.stats(ORG).await.unwrap();
    assert_eq!(stats.total_nodes, 2);
    assert_eq!(stats.stub_nodes, 0);

    let hood = env.service.neighborhood(ORG, "eng-7").await.unwrap();
    assert_eq!(hood.node.foreign_id, "ENG-7");
    assert!(hood.neighbors.iter().any(|n| n.foreign_id == "#70"));
    assert!(find_edge(&edge_set(&env.service, ORG), "#70", Relation::Fixes, "ENG-7").is_some());
}

#[tokio::test]
async fn failing_heuristic_skips_only_that_artifact() {
    let env = helpers::test_env();
    let mut records = fixture(ORG);
    records.push(with_meta(
        artifact(ORG, NodeKind::Deployment, "DEPLOY-1", "Broken deploy record", "", t0()),
        "pr",
        json!({ "number": 1 }),
    ));
    let outcome = env.service.ingest_and_rebuild(ORG, records).await.unwrap();
    let report = outcome.rebuild;

    assert!(!report.cancelled);
    assert_eq!(report.artifacts_processed, 7);
    assert_eq!(report.heuristics["deployment_linkage"].failed, 1);
    assert_eq!(report.heuristic_failures(), 1);
    assert!(report.heuristics["deployment_linkage"].created >= 2);

    let failed: Vec<_> = env
        .sink
        .events()
        .into_iter()
        .filter(|e| matches!(e, GraphEvent::HeuristicFailed { .. }))
        .collect();
    assert_eq!(failed.len(), 1);
    let GraphEvent::HeuristicFailed { foreign_id, heuristic, .. } = &failed[0] else {
        unreachable!();
    };
    assert_eq!(foreign_id, "DEPLOY-1");
    assert_eq!(*heuristic, "deployment_linkage");

    // the node itself is still stored
    env.service.neighborhood(ORG, "DEPLOY-1").await.unwrap();
}

#[tokio::test]
async fn small_batches_produce_the_same_graph() {
    let mut config = ChronicleConfig::default();
    config.builder.batch_size = 2;
    let env = helpers::test_env_with(None, config);
    let outcome = env.service.ingest_and_rebuild(ORG, fixture(ORG)).await.unwrap();
    assert_eq!(outcome.rebuild.batches, 3);

    let reference = helpers::built_env().await;
    let mut small = edge_set(&env.service, ORG)
        .into_iter()
        .map(|(s, r, d, _)| (s, r.as_str(), d))
        .collect::<Vec<_>>();
    let mut whole = edge_set(&reference.service, ORG)
        .into_iter()
        .map(|(s, r, d, _)| (s, r.as_str(), d))
        .collect::<Vec<_>>();
    small.sort();
    whole.sort();
    assert_eq!(small, whole);
}

#[tokio::test]
async fn cancelled_rebuild_can_be_resumed() {
    let env = helpers::test_env();
    env.service.ingest(ORG, fixture(ORG)).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = env
        .service
        .rebuild_with_cancel(ORG, DateTime::<Utc>::UNIX_EPOCH, &cancel)
        .await
        .unwrap();
    assert!(report.cancelled);
    assert_eq!(report.artifacts_processed, 0);
    assert!(edge_set(&env.service, ORG).is_empty());

    // no completed run yet, so resuming starts from the epoch
    let org = OrgId::parse(ORG).unwrap();
    assert_eq!(
        env.service.builder().resume_point(&org).await.unwrap(),
        DateTime::<Utc>::UNIX_EPOCH
    );
    let resumed = env.service.rebuild(ORG, None).await.unwrap();
    assert!(!resumed.cancelled);
    assert_eq!(resumed.artifacts_processed, 6);
    assert!(!edge_set(&env.service, ORG).is_empty());
    assert!(env.service.builder().resume_point(&org).await.unwrap() > DateTime::<Utc>::UNIX_EPOCH);

    // the partial run is reported as cancelled, never as completed
    let outcomes: Vec<&str> = env
        .sink
        .events()
        .iter()
        .filter_map(|e| match e {
            GraphEvent::RebuildCancelled { batches, .. } => {
                assert_eq!(*batches, 0);
                Some("cancelled")
            }
            GraphEvent::RebuildCompleted { artifacts, .. } => {
                assert_eq!(*artifacts, 6);
                Some("completed")
            }
            _ => None,
        })
        .collect();
    assert_eq!(outcomes, vec!["cancelled", "completed"]);
}

#[tokio::test]
async fn stats_reflect_the_built_graph() {
    let env = helpers::built_env().await;
    let stats = env.service.stats(ORG).await.unwrap();
    assert_eq!(stats.org_id, ORG);
    assert_eq!(stats.total_nodes, 6);
    assert_eq!(stats.stub_nodes, 0);
    assert_eq!(stats.artifacts, 6);
    assert!(stats.total_edges >= 12);
    assert_eq!(stats.nodes_by_kind.get("pull_request"), Some(&2));
    assert!(stats.edges_by_relation.contains_key("caused_by"));
    assert!(stats.last_rebuild.is_some());
}
