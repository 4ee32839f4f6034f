//! Incremental corpus indexing and semantic retrieval.
//!
//! `corpusmith` keeps a vector index synchronized with a mutable corpus of
//! structured documents and serves ranked fragments of it to a downstream
//! generation step. Unchanged documents are never re-processed; a partial
//! failure never leaves the index and the change ledger disagreeing.
//!
//! ```text
//! Corpus directory ──► ingestion::corpus ──► fingerprints ──┐
//!                                                           │
//!              ingestion::ledger (diff: New / Changed) ◄────┘
//!                              │
//!        changed documents ──► ingestion::convert ──► StructuredRecord
//!                              │
//!                              ├─► ingestion::chunk ──► deterministic chunks
//!                              └─► embeddings::EmbeddingProvider
//!                                             │
//! stores::VectorBackend ◄── delete + upsert ──┘
//!          │                        (then ledger commit)
//!          └──► retrieval::RetrievalService ──► ranked fragments
//! ```
//!
//! The [`pipeline::IndexPipeline`] drives one idempotent run of the left
//! side; [`retrieval::RetrievalService`] serves the right side and never
//! mutates state.

pub mod config;
pub mod embeddings;
pub mod ingestion;
pub mod pipeline;
pub mod retrieval;
pub mod stores;
pub mod types;

pub use config::{ChunkingConfig, PipelineConfig};
pub use embeddings::{EmbeddingProvider, HashEmbeddingProvider};
pub use ingestion::{ChangeLedger, ChangeReason, DirectoryCorpus, DocumentRef};
pub use pipeline::{IndexPipeline, RunSummary};
pub use retrieval::{RetrievalResult, RetrievalService, RetrievedChunk};
pub use stores::{IndexEntry, SearchFilter, SqliteVectorIndex, VectorBackend};
pub use types::RagError;
