use anyhow::Result;

use chronicle::service::GraphService;

use super::format_bytes;

/// Display graph statistics for one org in the terminal.
pub async fn stats(service: &GraphService, org_id: &str, json: bool) -> Result<()> {
    let response = service.stats(org_id).await?;
    if json {
        return super::print_json(&response);
    }

    println!("Graph Statistics ({})", response.org_id);
    println!("{}", "=".repeat(40));
    println!("  Nodes:               {}", response.total_nodes);
    println!("  Stub nodes:          {}", response.stub_nodes);
    println!("  Edges:               {}", response.total_edges);
    println!("  Staged artifacts:    {}", response.artifacts);
    println!();

    println!("Nodes by kind:");
    for (kind, count) in &response.nodes_by_kind {
        println!("  {:<14} {}", kind, count);
    }
    println!();

    println!("Edges by relation:");
    for (relation, count) in &response.edges_by_relation {
        println!("  {:<14} {}", relation, count);
    }
    println!();

    println!("Database size:         {}", format_bytes(response.db_size_bytes));
    if let Some(ref oldest) = response.oldest_node {
        println!("Oldest node:           {oldest}");
    }
    if let Some(ref newest) = response.newest_node {
        println!("Newest node:           {newest}");
    }
    match response.last_rebuild {
        Some(ref last) => println!("Last rebuild:          {last}"),
        None => println!("Last rebuild:          never"),
    }

    Ok(())
}
