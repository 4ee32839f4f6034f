//! Crate-wide error type shared by ingestion, storage, and retrieval.

use thiserror::Error;

/// Errors surfaced by the indexing and retrieval subsystem.
///
/// Fatality is decided by the caller, not the variant: the pipeline treats
/// [`RagError::Storage`], [`RagError::Ledger`], and [`RagError::Config`] as
/// run-fatal, while conversion, chunking, and embedding failures are
/// isolated to the document that produced them.
#[derive(Debug, Error)]
pub enum RagError {
    /// Filesystem failure while reading the corpus or persisting state.
    #[error("I/O failure: {0}")]
    Io(String),

    /// The change ledger could not be loaded or persisted.
    #[error("ledger failure: {0}")]
    Ledger(String),

    /// A document could not be converted into a structured record.
    #[error("conversion failure: {0}")]
    Conversion(String),

    /// Chunk derivation failed for a structured record.
    #[error("chunking failure: {0}")]
    Chunking(String),

    /// The embedding provider rejected or failed a batch.
    #[error("embedding failure: {0}")]
    Embedding(String),

    /// The vector index backend failed.
    #[error("storage failure: {0}")]
    Storage(String),

    /// Incompatible configuration, e.g. an embedder that does not match the
    /// index it is being used against.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for RagError {
    fn from(err: std::io::Error) -> Self {
        RagError::Io(err.to_string())
    }
}
