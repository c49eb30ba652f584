//! MCP `graph_stats` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct GraphStatsParams {
    #[schemars(description = "Organization id")]
    pub org_id: String,
}
