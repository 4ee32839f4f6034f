//! Embedding providers: the injected text-to-vector dependency.

use async_trait::async_trait;

use crate::types::RagError;

/// Maps chunk or query text to fixed-dimension vectors.
///
/// Implementations must be pure for a fixed [`id`](Self::id): the same text
/// always embeds to the same vector. The id names the model identity and is
/// recorded next to the index; opening an index with a different provider
/// is a configuration error, not a silent re-embed (see `stores`).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identity of the underlying model, e.g. `"nomic-embed-text-v1.5"`.
    fn id(&self) -> &str;

    /// Output vector dimension.
    fn dimensions(&self) -> usize;

    /// Inputs longer than this (in characters) are rejected per-chunk by
    /// the pipeline rather than sent to the provider.
    fn max_input_chars(&self) -> usize {
        usize::MAX
    }

    /// Embeds a batch of texts, returning one vector per input, in input
    /// order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError>;
}

/// Deterministic hash-seeded provider for tests and demos.
///
/// Vectors carry no semantic signal, but identical inputs always produce
/// identical vectors and distinct inputs almost always differ, which is
/// exactly what determinism and supersession tests need.
#[derive(Clone, Debug)]
pub struct HashEmbeddingProvider {
    dimensions: usize,
}

impl HashEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let seed = hasher.finish();

        (0..self.dimensions)
            .map(|i| {
                let bits = seed.rotate_left((i as u32 * 8) % 64) ^ ((i as u64) << 24);
                (bits as f32) / (u64::MAX as f32) - 0.5
            })
            .collect()
    }
}

impl Default for HashEmbeddingProvider {
    fn default() -> Self {
        Self::new(16)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    fn id(&self) -> &str {
        "hash-embedder-v1"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_embeddings_are_deterministic() {
        let provider = HashEmbeddingProvider::default();
        let inputs = vec![
            "Hello world".to_string(),
            "Goodbye world".to_string(),
            "Hello world".to_string(),
        ];

        let first = provider.embed_batch(&inputs).await.unwrap();
        let second = provider.embed_batch(&inputs).await.unwrap();

        assert_eq!(first, second, "embeddings should be deterministic");
        assert_eq!(first[0], first[2], "identical text, identical vector");
        assert_ne!(first[0], first[1], "distinct text, distinct vector");
    }

    #[tokio::test]
    async fn vectors_match_the_declared_dimension() {
        let provider = HashEmbeddingProvider::new(24);
        let vectors = provider
            .embed_batch(&["sample".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors[0].len(), provider.dimensions());
    }
}
