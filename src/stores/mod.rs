//! Vector index backends.
//!
//! [`VectorBackend`] is the storage seam: the pipeline writes through it,
//! the retrieval service reads through it, and nothing else in the crate
//! knows which engine sits behind it.
//!
//! ```text
//!                  ┌───────────────────┐
//!                  │   VectorBackend   │
//!                  │   (async trait)   │
//!                  └─────────┬─────────┘
//!                            │
//!                            ▼
//!                  ┌───────────────────┐
//!                  │ SqliteVectorIndex │
//!                  │    sqlite-vec     │
//!                  └───────────────────┘
//! ```

pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ingestion::chunk::Chunk;
use crate::types::RagError;

pub use sqlite::SqliteVectorIndex;

/// Persisted form of a chunk inside a vector index, keyed by chunk id.
///
/// `embedding` is populated on the write path; read paths return `None`
/// because callers never need raw vectors back.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk_id: String,
    pub source_id: String,
    pub fingerprint: String,
    pub section_path: String,
    pub ordinal: usize,
    pub text: String,
    pub metadata: serde_json::Value,
    pub embedding: Option<Vec<f32>>,
}

impl IndexEntry {
    /// Pairs a derived chunk with its embedding for upsert.
    pub fn from_chunk(chunk: &Chunk, embedding: Vec<f32>) -> Self {
        Self {
            chunk_id: chunk.chunk_id.clone(),
            source_id: chunk.source_id.clone(),
            fingerprint: chunk.fingerprint.clone(),
            section_path: chunk.section_path.clone(),
            ordinal: chunk.ordinal,
            text: chunk.text.clone(),
            metadata: chunk.metadata.clone(),
            embedding: Some(embedding),
        }
    }
}

/// Metadata constraints applied during similarity search.
#[derive(Clone, Debug, Default)]
pub struct SearchFilter {
    /// Only return chunks derived from this source document.
    pub source_id: Option<String>,
    /// Only return chunks whose section path starts with this prefix.
    pub section_path_prefix: Option<String>,
}

/// Unified trait for vector index backends.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Insert-or-replace entries keyed by chunk id.
    ///
    /// Re-upserting an existing id overwrites it in place. Entries without
    /// an embedding are skipped with a warning; they are not an error for
    /// the rest of the batch.
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<(), RagError>;

    /// Removes every entry derived from the given source document,
    /// returning how many were deleted.
    async fn delete_by_source_id(&self, source_id: &str) -> Result<usize, RagError>;

    /// Top-`k` cosine similarity search.
    ///
    /// Scores are descending similarity; equal scores order by chunk id
    /// ascending, so an identical query over an unchanged index always
    /// returns the same ranking.
    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<(IndexEntry, f32)>, RagError>;

    /// All entries currently stored for a source, in chunk ordinal order.
    async fn entries_by_source_id(&self, source_id: &str) -> Result<Vec<IndexEntry>, RagError>;

    /// Total number of stored entries.
    async fn count(&self) -> Result<usize, RagError>;
}
