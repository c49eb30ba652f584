//! MCP `ingest_artifacts` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `ingest_artifacts` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct IngestArtifactsParams {
    /// Tenant the artifacts belong to. Every record must carry the same id.
    #[schemars(description = "Organization id. Every artifact's org_id must match it.")]
    pub org_id: String,

    /// Normalized artifact records.
    #[schemars(
        description = "Artifact records: {org_id, kind, foreign_id, title, text, timestamp (RFC 3339), metadata}. Kinds: issue, pull_request, deployment, incident, meeting, doc, chat_thread, discussion, commit."
    )]
    pub artifacts: Vec<serde_json::Value>,

    /// Rebuild the graph for the ingested artifacts right away.
    #[schemars(description = "If true, rebuild the graph for the ingested artifacts immediately. Defaults to true.")]
    pub rebuild: Option<bool>,
}
