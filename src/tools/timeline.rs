//! MCP `timeline` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct TimelineParams {
    #[schemars(description = "Organization id")]
    pub org_id: String,

    #[schemars(description = "External id of the root artifact")]
    pub foreign_id: String,

    /// Half-width of the time window around the root, in hours.
    #[schemars(description = "Half-width of the time window around the root, in hours. Defaults to 24.")]
    pub window_hours: Option<f64>,
}
