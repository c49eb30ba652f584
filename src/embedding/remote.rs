//! HTTP client for an external embedding service.
//!
//! Request: `POST {endpoint}` with `{"model": ..., "input": [texts]}`.
//! Response: `{"embeddings": [[f32; dim], ...]}` (or `{"embedding": [...]}`
//! for a single input).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{l2_normalize, EmbeddingProvider};
use crate::config::EmbeddingConfig;
use crate::error::{GraphError, Result};

pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimensions: usize,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
}

impl HttpEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| GraphError::Embedding(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| GraphError::Embedding("no embedding returned".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .client
            .post(&self.endpoint)
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| GraphError::Embedding(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GraphError::Embedding(format!(
                "embedding service returned {status}"
            )));
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| GraphError::Embedding(format!("invalid response body: {e}")))?;
        let mut vectors = match body.embedding {
            Some(single) if body.embeddings.is_empty() => vec![single],
            _ => body.embeddings,
        };

        if vectors.len() != texts.len() {
            return Err(GraphError::Embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        for v in &mut vectors {
            if v.len() != self.dimensions {
                return Err(GraphError::Embedding(format!(
                    "expected {} dimensions, got {}",
                    self.dimensions,
                    v.len()
                )));
            }
            l2_normalize(v);
        }
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
