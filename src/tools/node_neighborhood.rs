//! MCP `node_neighborhood` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct NodeNeighborhoodParams {
    #[schemars(description = "Organization id")]
    pub org_id: String,

    #[schemars(description = "External artifact id, e.g. 'ENG-102' or '#456'")]
    pub foreign_id: String,
}
