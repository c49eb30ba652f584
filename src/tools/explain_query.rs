//! MCP `explain_query` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `explain_query` MCP tool.
///
/// `depth` and `k` outside the server's limits are rejected rather than
/// clamped.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ExplainQueryParams {
    #[schemars(description = "Organization id")]
    pub org_id: String,

    #[schemars(description = "Natural language question, e.g. 'why was ENG-102 reopened?'")]
    pub query: String,

    #[schemars(description = "Maximum hops from the seed nodes (1-5). Defaults to 3.")]
    pub depth: Option<usize>,

    #[schemars(description = "Maximum number of nodes returned (1-50). Defaults to 12.")]
    pub k: Option<usize>,
}
