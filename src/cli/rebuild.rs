//! CLI `rebuild` command.

use anyhow::Result;

use chronicle::builder::RebuildReport;
use chronicle::service::{parse_since, GraphService};

pub fn print_report(report: &RebuildReport) {
    println!(
        "Rebuild {} for org {}:",
        if report.cancelled { "cancelled" } else { "complete" },
        report.org_id
    );
    println!("  Artifacts processed: {}", report.artifacts_processed);
    println!("  Nodes created:       {}", report.nodes_created);
    println!("  Nodes updated:       {}", report.nodes_updated);
    println!("  Stub nodes created:  {}", report.stubs_created);
    println!("  Edges created:       {}", report.edges_created());
    println!("  Edges updated:       {}", report.edges_updated());
    println!();
    println!("  {:<26} {:>8} {:>8} {:>8} {:>8}", "heuristic", "created", "updated", "skipped", "failed");
    for (name, counts) in &report.heuristics {
        println!(
            "  {:<26} {:>8} {:>8} {:>8} {:>8}",
            name, counts.created, counts.updated, counts.skipped, counts.failed
        );
    }
    println!();
    println!("  Duration:            {} ms", report.duration_ms);
    if report.cancelled {
        println!("Resume with `chronicle rebuild --org {}`.", report.org_id);
    }
}

/// Rebuild from `since`, or resume from the last completed rebuild. Ctrl-C
/// cancels between batches.
pub async fn rebuild(service: &GraphService, org_id: &str, since: Option<&str>, json: bool) -> Result<()> {
    let since = since.map(parse_since).transpose()?;

    let shutdown = service.shutdown_token().clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("cancelling rebuild after the current batch");
            shutdown.cancel();
        }
    });

    let report = service.rebuild(org_id, since).await;
    watcher.abort();
    let report = report?;

    if json {
        super::print_json(&report)
    } else {
        print_report(&report);
        Ok(())
    }
}
