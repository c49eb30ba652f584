//! HTTP narrator client.
//!
//! Request: `POST {endpoint}` with the [`NarrationRequest`] as JSON.
//! Response: `{"narrative": "..."}`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{NarrationRequest, Narrator};
use crate::config::NarratorConfig;
use crate::error::{GraphError, Result};

pub struct HttpNarrator {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Deserialize)]
struct NarrateResponse {
    narrative: String,
}

impl HttpNarrator {
    pub fn new(config: &NarratorConfig) -> Result<Self> {
        // the adapter enforces the real per-call budget; this only stops leaks
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.saturating_mul(4).max(1000)))
            .build()
            .map_err(|e| GraphError::NarratorUnavailable(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl Narrator for HttpNarrator {
    async fn narrate(&self, request: &NarrationRequest) -> Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| GraphError::NarratorUnavailable(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GraphError::NarratorUnavailable(format!(
                "narrator returned {status}"
            )));
        }
        let body: NarrateResponse = response
            .json()
            .await
            .map_err(|e| GraphError::NarratorUnavailable(format!("invalid response body: {e}")))?;
        Ok(body.narrative)
    }
}
