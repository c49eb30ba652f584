//! CLI read commands: `timeline`, `explain`, `neighborhood`.

use anyhow::Result;

use chronicle::service::{window_hours, GraphService};

pub async fn timeline(
    service: &GraphService,
    org_id: &str,
    foreign_id: &str,
    window: Option<f64>,
    json: bool,
) -> Result<()> {
    let window = window.map(window_hours).transpose()?;
    let result = service.timeline(org_id, foreign_id, window).await?;
    if json {
        return super::print_json(result.as_ref());
    }

    println!("Timeline around {}{}", result.root, if result.degraded { " (partial)" } else { "" });
    println!("{}", "=".repeat(60));
    for entry in &result.timeline {
        println!(
            "{}  {:<13} {:<12} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M"),
            entry.kind,
            entry.foreign_id,
            entry.title
        );
    }
    println!();
    println!("{} nodes, {} edges", result.nodes.len(), result.edges.len());
    Ok(())
}

pub async fn explain(
    service: &GraphService,
    org_id: &str,
    query: &str,
    depth: Option<usize>,
    k: Option<usize>,
    json: bool,
) -> Result<()> {
    let result = service.explain(org_id, query, depth, k).await?;
    if json {
        return super::print_json(result.as_ref());
    }

    println!("{}", result.narrative);
    println!();
    if !result.citations.is_empty() {
        println!("Cited: {}", result.citations.join(", "));
    }
    println!(
        "{} nodes, {} edges, {} causal chains, {} paths explored ({:?}){}",
        result.nodes.len(),
        result.edges.len(),
        result.causal_chains.len(),
        result.paths_explored,
        result.algorithm,
        if result.degraded { ", partial" } else { "" }
    );
    if let Some(ref reason) = result.fallback_reason {
        println!("Narrator unavailable: {reason}");
    }
    Ok(())
}

pub async fn neighborhood(service: &GraphService, org_id: &str, foreign_id: &str, json: bool) -> Result<()> {
    let result = service.neighborhood(org_id, foreign_id).await?;
    if json {
        return super::print_json(&result);
    }

    println!("{} [{}] {}", result.node.foreign_id, result.node.kind, result.node.title);
    for edge in &result.edges {
        println!(
            "  {} --{}--> {}  (confidence {:.2})",
            edge.src, edge.relation, edge.dst, edge.confidence
        );
    }
    if result.edges.is_empty() {
        println!("  (no edges)");
    }
    Ok(())
}
