pub mod explain_query;
pub mod graph_stats;
pub mod ingest_artifacts;
pub mod node_neighborhood;
pub mod rebuild_graph;
pub mod timeline;

use explain_query::ExplainQueryParams;
use graph_stats::GraphStatsParams;
use ingest_artifacts::IngestArtifactsParams;
use node_neighborhood::NodeNeighborhoodParams;
use rebuild_graph::RebuildGraphParams;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{tool, tool_handler, tool_router, ServerHandler};
use serde::Serialize;
use std::sync::Arc;
use timeline::TimelineParams;

use crate::error::GraphError;
use crate::graph::types::ArtifactRecord;
use crate::service::{parse_since, window_hours, GraphService};

/// The Chronicle MCP tool handler. Every tool is a thin org-scoped wrapper
/// over [`GraphService`].
#[derive(Clone)]
pub struct ChronicleTools {
    tool_router: ToolRouter<Self>,
    service: Arc<GraphService>,
}

/// Error payload returned to MCP clients: a stable code plus a message that
/// only ever mentions the caller's own identifiers.
fn tool_error(err: GraphError) -> String {
    if err.is_client_error() {
        tracing::debug!(kind = err.kind(), error = %err, "tool call rejected");
    } else {
        tracing::warn!(kind = err.kind(), error = %err, "tool call failed");
    }
    serde_json::json!({ "error": err.kind(), "message": err.to_string() }).to_string()
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, String> {
    serde_json::to_string(value).map_err(|e| tool_error(e.into()))
}

#[tool_router]
impl ChronicleTools {
    pub fn new(service: Arc<GraphService>) -> Self {
        Self {
            tool_router: Self::tool_router(),
            service,
        }
    }

    /// Stage artifacts and (by default) rebuild the graph for them.
    #[tool(description = "Ingest normalized engineering artifacts (issues, PRs, deployments, incidents, meetings, docs) for one org and infer graph edges from them.")]
    async fn ingest_artifacts(
        &self,
        Parameters(params): Parameters<IngestArtifactsParams>,
    ) -> Result<String, String> {
        let mut records = Vec::with_capacity(params.artifacts.len());
        for (i, raw) in params.artifacts.into_iter().enumerate() {
            let record: ArtifactRecord = serde_json::from_value(raw)
                .map_err(|e| tool_error(GraphError::malformed(format!("artifact {i}: {e}"))))?;
            records.push(record);
        }
        tracing::info!(org_id = %params.org_id, artifacts = records.len(), "ingest_artifacts called");

        if params.rebuild.unwrap_or(true) {
            let outcome = self
                .service
                .ingest_and_rebuild(&params.org_id, records)
                .await
                .map_err(tool_error)?;
            to_json(&outcome)
        } else {
            let report = self
                .service
                .ingest(&params.org_id, records)
                .await
                .map_err(tool_error)?;
            to_json(&report)
        }
    }

    #[tool(description = "Rebuild the org's memory graph from artifacts ingested since a cutoff. Returns per-heuristic created/updated/skipped/failed edge counts.")]
    async fn rebuild_graph(
        &self,
        Parameters(params): Parameters<RebuildGraphParams>,
    ) -> Result<String, String> {
        let since = params
            .since
            .as_deref()
            .map(parse_since)
            .transpose()
            .map_err(tool_error)?;
        tracing::info!(org_id = %params.org_id, since = ?since, "rebuild_graph called");
        let report = self
            .service
            .rebuild(&params.org_id, since)
            .await
            .map_err(tool_error)?;
        to_json(&report)
    }

    #[tool(description = "Get one artifact node by external id with its direct neighbors and connecting edges.")]
    async fn node_neighborhood(
        &self,
        Parameters(params): Parameters<NodeNeighborhoodParams>,
    ) -> Result<String, String> {
        tracing::info!(org_id = %params.org_id, foreign_id = %params.foreign_id, "node_neighborhood called");
        let result = self
            .service
            .neighborhood(&params.org_id, &params.foreign_id)
            .await
            .map_err(tool_error)?;
        to_json(&result)
    }

    /// Answer a "why" question with a causality subgraph and cited narrative.
    #[tool(description = "Explain why something happened: returns the relevant subgraph, causality chains, and a narrative citing artifacts by external id.")]
    async fn explain_query(
        &self,
        Parameters(params): Parameters<ExplainQueryParams>,
    ) -> Result<String, String> {
        tracing::info!(org_id = %params.org_id, query_len = params.query.len(), depth = ?params.depth, k = ?params.k, "explain_query called");
        let result = self
            .service
            .explain(&params.org_id, &params.query, params.depth, params.k)
            .await
            .map_err(tool_error)?;
        to_json(result.as_ref())
    }

    #[tool(description = "Reconstruct a chronological timeline of artifacts around a root artifact.")]
    async fn timeline(
        &self,
        Parameters(params): Parameters<TimelineParams>,
    ) -> Result<String, String> {
        tracing::info!(org_id = %params.org_id, foreign_id = %params.foreign_id, "timeline called");
        let window = params
            .window_hours
            .map(window_hours)
            .transpose()
            .map_err(tool_error)?;
        let result = self
            .service
            .timeline(&params.org_id, &params.foreign_id, window)
            .await
            .map_err(tool_error)?;
        to_json(result.as_ref())
    }

    #[tool(description = "Get graph statistics for one org: node counts by kind, edge counts by relation, last rebuild.")]
    async fn graph_stats(
        &self,
        Parameters(params): Parameters<GraphStatsParams>,
    ) -> Result<String, String> {
        let stats = self
            .service
            .stats(&params.org_id)
            .await
            .map_err(tool_error)?;
        to_json(&stats)
    }
}

#[tool_handler]
impl ServerHandler for ChronicleTools {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            instructions: Some(
                "Chronicle links engineering artifacts into a memory graph. Use ingest_artifacts \
                 to add artifacts, timeline to see what happened around one, and explain_query \
                 to ask why. Every call requires an org_id."
                    .into(),
            ),
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_errors_carry_stable_codes() {
        let body = tool_error(GraphError::not_found("ENG-1"));
        let v: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(v["error"], "not_found");
        assert_eq!(v["message"], "not found: ENG-1");

        let body = tool_error(GraphError::MissingOrg);
        let v: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(v["error"], "missing_org");
    }
}
