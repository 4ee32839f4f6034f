//! Query-side retrieval over an indexed corpus.

use std::sync::Arc;

use tracing::debug;

use crate::embeddings::EmbeddingProvider;
use crate::stores::{SearchFilter, VectorBackend};
use crate::types::RagError;

/// One ranked fragment handed to the external prompt composer.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub text: String,
    pub score: f32,
    pub source_id: String,
    pub section_path: String,
    pub metadata: serde_json::Value,
}

/// Ordered retrieval response, highest score first.
#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    pub hits: Vec<RetrievedChunk>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }
}

/// Read-only retrieval facade: embeds queries and ranks index hits.
///
/// Must be constructed with the same [`EmbeddingProvider`] the index was
/// built with; the store enforces that identity at open, so a service built
/// from the same provider instance cannot drift. Retrieval never mutates
/// state, and an empty index is a valid empty answer — "no relevant context
/// yet" is not an error for the consumer.
pub struct RetrievalService<B> {
    backend: Arc<B>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl<B> RetrievalService<B>
where
    B: VectorBackend,
{
    pub fn new(backend: Arc<B>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { backend, embedder }
    }

    /// Returns the top-`k` chunks most similar to `query`.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        filter: &SearchFilter,
    ) -> Result<RetrievalResult, RagError> {
        if k == 0 || query.trim().is_empty() {
            return Ok(RetrievalResult::default());
        }

        let vectors = self.embedder.embed_batch(&[query.to_string()]).await?;
        let vector = vectors.into_iter().next().ok_or_else(|| {
            RagError::Embedding("provider returned no vector for the query".to_string())
        })?;
        if vector.len() != self.embedder.dimensions() {
            return Err(RagError::Config(format!(
                "provider '{}' declared {} dims but produced {}",
                self.embedder.id(),
                self.embedder.dimensions(),
                vector.len()
            )));
        }

        let hits = self.backend.search(&vector, k, filter).await?;
        debug!(query_len = query.len(), k, hits = hits.len(), "retrieval complete");

        Ok(RetrievalResult {
            hits: hits
                .into_iter()
                .map(|(entry, score)| RetrievedChunk {
                    text: entry.text,
                    score,
                    source_id: entry.source_id,
                    section_path: entry.section_path,
                    metadata: entry.metadata,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashEmbeddingProvider;
    use crate::stores::SqliteVectorIndex;

    async fn service_over_empty_index() -> RetrievalService<SqliteVectorIndex> {
        let embedder = Arc::new(HashEmbeddingProvider::new(8));
        let backend = Arc::new(
            SqliteVectorIndex::open_in_memory(embedder.id(), embedder.dimensions())
                .await
                .unwrap(),
        );
        RetrievalService::new(backend, embedder)
    }

    #[tokio::test]
    async fn empty_index_yields_an_empty_result_not_an_error() {
        let service = service_over_empty_index().await;
        let result = service
            .retrieve("anything", 5, &SearchFilter::default())
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn zero_k_and_blank_queries_short_circuit() {
        let service = service_over_empty_index().await;
        assert!(service
            .retrieve("query", 0, &SearchFilter::default())
            .await
            .unwrap()
            .is_empty());
        assert!(service
            .retrieve("   ", 5, &SearchFilter::default())
            .await
            .unwrap()
            .is_empty());
    }
}
