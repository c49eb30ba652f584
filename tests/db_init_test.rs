mod helpers;

use chronicle::db;
use chronicle::graph::embedding_to_bytes;

#[test]
fn full_schema_creates_all_tables_and_indexes() {
    let conn = helpers::test_db();

    let tables: Vec<String> = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();

    for table in ["memory_nodes", "memory_edges", "artifacts", "rebuild_runs", "schema_meta"] {
        assert!(tables.contains(&table.to_string()), "{table} table missing");
    }

    let indexes: Vec<String> = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%' ORDER BY name")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();

    for index in [
        "idx_nodes_foreign",
        "idx_nodes_created",
        "idx_edges_src",
        "idx_edges_dst",
        "idx_artifacts_ingested",
        "idx_rebuild_runs_org",
    ] {
        assert!(indexes.contains(&index.to_string()), "{index} missing");
    }
}

#[test]
fn vector_similarity_is_available() {
    let conn = helpers::test_db();

    let vec_version: String = conn
        .query_row("SELECT vec_version()", [], |r| r.get(0))
        .unwrap();
    assert!(!vec_version.is_empty());

    let a: Vec<f32> = (0..384).map(|i| (i as f32) / 384.0).collect();
    let distance: f64 = conn
        .query_row(
            "SELECT vec_distance_cosine(?1, ?2)",
            rusqlite::params![embedding_to_bytes(&a), embedding_to_bytes(&a)],
            |r| r.get(0),
        )
        .unwrap();
    assert!(distance.abs() < 1e-6);
}

#[test]
fn check_constraints_reject_bad_rows() {
    let conn = helpers::test_db();

    let bad_kind = conn.execute(
        "INSERT INTO memory_nodes (id, org_id, kind, foreign_id, title, created_at, updated_at)
         VALUES ('n1', 'acme', 'wiki_page', 'W-1', 'x', '2026-01-01T00:00:00.000Z', '2026-01-01T00:00:00.000Z')",
        [],
    );
    assert!(bad_kind.is_err(), "unknown kind should be rejected by CHECK constraint");

    let blank_org = conn.execute(
        "INSERT INTO memory_nodes (id, org_id, kind, foreign_id, title, created_at, updated_at)
         VALUES ('n2', '', 'issue', 'ENG-1', 'x', '2026-01-01T00:00:00.000Z', '2026-01-01T00:00:00.000Z')",
        [],
    );
    assert!(blank_org.is_err(), "blank org should be rejected");

    conn.execute(
        "INSERT INTO memory_nodes (id, org_id, kind, foreign_id, title, created_at, updated_at)
         VALUES ('n3', 'acme', 'issue', 'ENG-1', 'x', '2026-01-01T00:00:00.000Z', '2026-01-01T00:00:00.000Z'),
                ('n4', 'acme', 'issue', 'ENG-2', 'y', '2026-01-01T00:00:00.000Z', '2026-01-01T00:00:00.000Z')",
        [],
    )
    .unwrap();

    let bad_confidence = conn.execute(
        "INSERT INTO memory_edges (id, org_id, src_id, dst_id, relation, weight, confidence, created_at, updated_at)
         VALUES ('e1', 'acme', 'n3', 'n4', 'references', 0.6, 1.5, 'x', 'x')",
        [],
    );
    assert!(bad_confidence.is_err());

    let bad_relation = conn.execute(
        "INSERT INTO memory_edges (id, org_id, src_id, dst_id, relation, weight, confidence, created_at, updated_at)
         VALUES ('e2', 'acme', 'n3', 'n4', 'blocks', 0.6, 0.5, 'x', 'x')",
        [],
    );
    assert!(bad_relation.is_err());
}

#[test]
fn health_report_on_empty_database() {
    let conn = helpers::test_db();
    let report = db::check_database_health(&conn).unwrap();
    assert!(report.integrity_ok);
    assert_eq!(report.schema_version, db::migrations::CURRENT_SCHEMA_VERSION);
    assert_eq!(report.node_count, 0);
    assert_eq!(report.cross_org_edges, 0);
    assert_eq!(report.embedding_model.as_deref(), Some("feature-hash-v1"));
}

#[test]
fn read_connection_sees_writer_data() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("graph.db");

    // writer stays open, as it does inside a running service
    let writer = db::open_database(&path).unwrap();
    writer
        .execute(
            "INSERT INTO memory_nodes (id, org_id, kind, foreign_id, title, created_at, updated_at)
             VALUES ('n1', 'acme', 'issue', 'ENG-1', 'x', '2026-01-01T00:00:00.000Z', '2026-01-01T00:00:00.000Z')",
            [],
        )
        .unwrap();

    let reader = db::open_read_connection(&path).unwrap();
    let count: i64 = reader
        .query_row("SELECT COUNT(*) FROM memory_nodes", [], |r| r.get(0))
        .unwrap();
    assert_eq!(count, 1);
    assert!(reader
        .execute("DELETE FROM memory_nodes", [])
        .is_err(), "read connection must be read-only");
}
