//! MCP `rebuild_graph` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RebuildGraphParams {
    #[schemars(description = "Organization id")]
    pub org_id: String,

    /// RFC 3339 cutoff; artifacts ingested at or after it are reprocessed.
    #[schemars(
        description = "RFC 3339 cutoff. Artifacts ingested at or after it are reprocessed. Omit to resume from the last completed rebuild."
    )]
    pub since: Option<String>,
}
