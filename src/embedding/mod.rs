//! Text-to-vector embedding boundary.
//!
//! Provides the [`EmbeddingProvider`] trait, an offline feature-hashing
//! provider, and an HTTP client for an external embedding service. The
//! provider is created via [`create_provider`] from configuration.

pub mod hashing;
pub mod remote;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{GraphError, Result};

/// Default number of dimensions in the embedding vectors.
pub const EMBEDDING_DIM: usize = 384;

/// Trait for embedding text into vectors.
///
/// Implementations produce L2-normalized vectors of exactly
/// [`EmbeddingProvider::dimensions`] dimensions.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of text strings. Implementations may override for batched inference.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Return the number of dimensions this provider produces.
    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }

    /// Identifier recorded in `schema_meta.embedding_model`.
    fn model_id(&self) -> &str;
}

/// Create an embedding provider from config.
///
/// `"hashing"` works offline and is deterministic; `"http"` calls the
/// configured embedding endpoint.
pub fn create_provider(
    config: &crate::config::EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "hashing" => Ok(Arc::new(hashing::HashingEmbeddingProvider::new(
            config.dimensions,
        ))),
        "http" => Ok(Arc::new(remote::HttpEmbeddingProvider::new(config)?)),
        other => Err(GraphError::Embedding(format!(
            "unknown embedding provider: {other}. Supported: hashing, http"
        ))),
    }
}

/// Scale `v` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_gives_unit_length() {
        let mut v = vec![3.0f32, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0f32; 4];
        l2_normalize(&mut zero);
        assert!(zero.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let config = crate::config::EmbeddingConfig {
            provider: "onnx".into(),
            ..Default::default()
        };
        let err = create_provider(&config).err().unwrap();
        assert_eq!(err.kind(), "embedding_error");
    }

    #[test]
    fn default_provider_is_hashing() {
        let provider = create_provider(&Default::default()).unwrap();
        assert_eq!(provider.dimensions(), EMBEDDING_DIM);
        assert_eq!(provider.model_id(), "feature-hash-v1");
    }
}
