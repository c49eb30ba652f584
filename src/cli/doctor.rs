//! CLI `doctor` command: run database diagnostics and print a health report.

use anyhow::{Context, Result};

use chronicle::config::ChronicleConfig;
use chronicle::db;
use chronicle::embedding;

use super::format_bytes;

/// Run database diagnostics and print a health report.
pub fn doctor(config: &ChronicleConfig) -> Result<()> {
    let db_path = config.resolved_db_path();

    if !db_path.exists() {
        println!("Database: not found at {}", db_path.display());
        println!("Run `chronicle ingest` or `chronicle serve` to initialize.");
        return Ok(());
    }

    let file_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    let conn = db::open_database(&db_path).context("failed to open database (may be corrupt)")?;
    let report = db::check_database_health(&conn).context("failed to run health check")?;
    let configured_model = embedding::create_provider(&config.embedding)
        .map(|p| p.model_id().to_string())
        .unwrap_or_else(|e| format!("(invalid: {e})"));

    println!("Chronicle Health Report");
    println!("=======================");
    println!();
    println!("Database:          {}", db_path.display());
    println!("File size:         {}", format_bytes(file_size));
    println!("Schema version:    {}", report.schema_version);
    println!("sqlite-vec:        {}", report.sqlite_vec_version);
    println!();
    println!("Embedding model:");
    println!("  Stored:          {}", report.embedding_model.as_deref().unwrap_or("(not set)"));
    println!("  Configured:      {configured_model}");
    if let Some(ref stored) = report.embedding_model {
        if stored != &configured_model {
            println!("  WARNING: model mismatch! Run `chronicle rebuild --org <org> --since 1970-01-01T00:00:00Z` per org.");
        } else {
            println!("  Status:          OK (match)");
        }
    }
    println!();
    println!("Narrator:          {}", config.narrator.provider);
    println!();
    println!("Row counts (all orgs):");
    println!("  Orgs:            {}", report.org_count);
    println!("  Nodes:           {}", report.node_count);
    println!("  Edges:           {}", report.edge_count);
    println!("  Artifacts:       {}", report.artifact_count);
    println!();
    if report.integrity_ok {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED ({})", report.integrity_details);
    }
    if report.cross_org_edges == 0 {
        println!("Org isolation:     PASSED");
    } else {
        println!("Org isolation:     FAILED ({} cross-org edges)", report.cross_org_edges);
        tracing::error!(
            target: "chronicle::security",
            cross_org_edges = report.cross_org_edges,
            "database contains edges crossing org boundaries"
        );
    }

    if !report.integrity_ok {
        println!();
        println!("Recovery steps:");
        println!("  1. Restore from a backup: cp backup.db ~/.chronicle/graph.db");
        println!("  2. Or delete the database, re-ingest artifacts, and rebuild.");
    }

    Ok(())
}
