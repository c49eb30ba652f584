//! Deterministic feature-hashing embedder.
//!
//! Each lowercase word token (and each adjacent word pair) is hashed with
//! FNV-1a into one of `dimensions` buckets with a hash-derived sign, then the
//! vector is L2-normalized. Texts sharing vocabulary get high cosine
//! similarity; no model files or network are needed.

use async_trait::async_trait;

use super::{l2_normalize, EmbeddingProvider};
use crate::error::Result;

const MODEL_ID: &str = "feature-hash-v1";

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "did", "does", "for", "from", "has", "how",
    "in", "is", "it", "of", "on", "or", "the", "this", "to", "was", "were", "what", "when",
    "which", "who", "why", "with",
];

pub struct HashingEmbeddingProvider {
    dimensions: usize,
}

impl HashingEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    /// Synchronous core, usable outside an async context.
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let tokens = tokenize(text);
        let mut v = vec![0.0f32; self.dimensions];
        for token in &tokens {
            self.add(&mut v, token.as_bytes(), 1.0);
        }
        for pair in tokens.windows(2) {
            let joined = format!("{} {}", pair[0], pair[1]);
            self.add(&mut v, joined.as_bytes(), 0.5);
        }
        l2_normalize(&mut v);
        v
    }

    fn add(&self, v: &mut [f32], feature: &[u8], weight: f32) {
        let h = fnv1a(feature);
        let bucket = (h % self.dimensions as u64) as usize;
        let sign = if (h >> 63) & 1 == 1 { -1.0 } else { 1.0 };
        v[bucket] += sign * weight;
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        MODEL_ID
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn deterministic_and_normalized() {
        let p = HashingEmbeddingProvider::new(64);
        let a = p.embed_sync("Login fails after deploy");
        let b = p.embed_sync("Login fails after deploy");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!((cosine(&a, &a) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shared_vocabulary_scores_higher() {
        let p = HashingEmbeddingProvider::new(384);
        let query = p.embed_sync("why was ENG-102 reopened?");
        let related = p.embed_sync("ENG-102 login session expires early, reopened");
        let unrelated = p.embed_sync("quarterly planning offsite agenda");
        assert!(cosine(&query, &related) > cosine(&query, &unrelated));
    }

    #[test]
    fn stopwords_only_yields_zero_vector() {
        let p = HashingEmbeddingProvider::new(16);
        assert!(p.embed_sync("why was the").iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn async_embed_matches_sync() {
        let p = HashingEmbeddingProvider::new(32);
        let v = p.embed("incident INC-789").await.unwrap();
        assert_eq!(v, p.embed_sync("incident INC-789"));
        let batch = p
            .embed_batch(&["a deploy".to_string(), "an incident".to_string()])
            .await
            .unwrap();
        assert_eq!(batch.len(), 2);
    }
}
