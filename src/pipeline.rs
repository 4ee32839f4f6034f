//! Pipeline orchestration: one idempotent indexing run over a corpus.
//!
//! A run is scan → diff → per-document convert/chunk/embed/upsert → commit.
//! Documents travel through their own sub-pipelines independently, bounded
//! by the configured parallelism; one document failing never blocks the
//! rest. The ledger commit for a document happens strictly after its index
//! upsert succeeds, so a crash anywhere in between is repaired by the next
//! run re-processing that document — delete-then-upsert makes the repair
//! idempotent.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures_util::StreamExt;
use futures_util::stream;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::embeddings::EmbeddingProvider;
use crate::ingestion::chunk::chunk_record;
use crate::ingestion::convert::convert;
use crate::ingestion::corpus::DirectoryCorpus;
use crate::ingestion::fingerprint::fingerprint;
use crate::ingestion::ledger::{ChangeLedger, ChangeReason, DocumentRef, PendingDocument};
use crate::stores::{IndexEntry, VectorBackend};
use crate::types::RagError;

/// Stage a per-document failure was observed in.
///
/// Upsert and commit failures never appear here: index and ledger
/// infrastructure errors abort the whole run instead of being recorded
/// against one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Hashing,
    Converting,
    Chunking,
    Embedding,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Hashing => "hashing",
            Stage::Converting => "converting",
            Stage::Chunking => "chunking",
            Stage::Embedding => "embedding",
        };
        f.write_str(name)
    }
}

/// One isolated per-document failure, reported rather than thrown.
#[derive(Debug, Clone)]
pub struct DocumentFailure {
    pub id: String,
    pub stage: Stage,
    pub reason: String,
}

/// Structured outcome of a single pipeline run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Documents visible in the corpus this run.
    pub scanned: usize,
    /// Documents whose fingerprint matched the ledger and were skipped.
    pub unchanged: usize,
    /// Pending documents classified as never indexed before.
    pub new_documents: usize,
    /// Pending documents whose fingerprint differed from the ledger.
    pub changed_documents: usize,
    /// Documents that made it through upsert and ledger commit.
    pub processed: usize,
    /// Index entries written across all processed documents.
    pub chunks_written: usize,
    /// Chunks excluded because they exceeded the embedder's input limit.
    pub chunks_skipped: usize,
    /// Per-document failures, in no particular order.
    pub failures: Vec<DocumentFailure>,
}

enum DocumentOutcome {
    Indexed { written: usize, skipped: usize },
    Failed(DocumentFailure),
    Fatal(RagError),
}

/// Composes the ledger, converter, chunker, embedder, and vector index into
/// idempotent runs. The pipeline is the only writer of the ledger and the
/// index; both are injected dependencies, not globals.
pub struct IndexPipeline<B> {
    corpus: DirectoryCorpus,
    ledger: ChangeLedger,
    backend: Arc<B>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: PipelineConfig,
}

impl<B> IndexPipeline<B>
where
    B: VectorBackend,
{
    pub fn new(
        corpus: DirectoryCorpus,
        ledger: ChangeLedger,
        backend: Arc<B>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: PipelineConfig,
    ) -> Result<Self, RagError> {
        config.validate()?;
        Ok(Self {
            corpus,
            ledger,
            backend,
            embedder,
            config,
        })
    }

    pub fn ledger(&self) -> &ChangeLedger {
        &self.ledger
    }

    /// Runs one full scan-diff-index pass and reports what happened.
    ///
    /// A run over an unchanged corpus is a complete no-op: zero upserts,
    /// zero ledger commits.
    pub async fn run(&self) -> Result<RunSummary, RagError> {
        self.ledger.load().await?;
        let listing = self.corpus.list().await?;

        let mut summary = RunSummary {
            scanned: listing.len(),
            ..Default::default()
        };

        // Hash every visible document; a document that cannot be read is an
        // isolated failure, not the end of the run.
        let mut current = Vec::with_capacity(listing.len());
        let mut payloads: HashMap<String, Vec<u8>> = HashMap::new();
        for document in listing {
            match self.corpus.read(&document).await {
                Ok(bytes) => {
                    current.push(DocumentRef {
                        id: document.id.clone(),
                        fingerprint: fingerprint(&bytes),
                        last_seen_at: Utc::now(),
                    });
                    payloads.insert(document.id, bytes);
                }
                Err(err) => {
                    warn!(id = %document.id, error = %err, "failed to read document");
                    summary.failures.push(DocumentFailure {
                        id: document.id,
                        stage: Stage::Hashing,
                        reason: err.to_string(),
                    });
                }
            }
        }

        let pending = self.ledger.diff(&current).await;
        summary.unchanged = current.len() - pending.len();
        for item in &pending {
            match item.reason {
                ChangeReason::New => summary.new_documents += 1,
                ChangeReason::Changed => summary.changed_documents += 1,
            }
            debug!(id = %item.document.id, reason = ?item.reason, "document pending");
        }

        if pending.is_empty() {
            info!(
                scanned = summary.scanned,
                unchanged = summary.unchanged,
                "corpus unchanged, nothing to index"
            );
            return Ok(summary);
        }

        let work: Vec<(PendingDocument, Vec<u8>)> = pending
            .into_iter()
            .filter_map(|item| {
                let bytes = payloads.remove(&item.document.id)?;
                Some((item, bytes))
            })
            .collect();

        let outcomes: Vec<(String, DocumentOutcome)> = stream::iter(
            work.into_iter().map(|(item, bytes)| async move {
                let id = item.document.id.clone();
                let outcome = self.process_document(item, bytes).await;
                (id, outcome)
            }),
        )
        .buffer_unordered(self.config.parallelism)
        .collect()
        .await;

        for (id, outcome) in outcomes {
            match outcome {
                DocumentOutcome::Indexed { written, skipped } => {
                    summary.processed += 1;
                    summary.chunks_written += written;
                    summary.chunks_skipped += skipped;
                }
                DocumentOutcome::Failed(failure) => {
                    warn!(id = %id, stage = %failure.stage, reason = %failure.reason, "document failed");
                    summary.failures.push(failure);
                }
                DocumentOutcome::Fatal(err) => return Err(err),
            }
        }

        info!(
            scanned = summary.scanned,
            unchanged = summary.unchanged,
            processed = summary.processed,
            chunks_written = summary.chunks_written,
            failed = summary.failures.len(),
            "pipeline run complete"
        );
        Ok(summary)
    }

    /// Per-document sub-pipeline: Converting → Chunking → Embedding →
    /// Upserting (delete then insert) → Committing.
    async fn process_document(
        &self,
        pending: PendingDocument,
        bytes: Vec<u8>,
    ) -> DocumentOutcome {
        let document = pending.document;
        let id = document.id.clone();

        let record = match convert(&id, &bytes) {
            Ok(record) => record,
            Err(err) => {
                return DocumentOutcome::Failed(DocumentFailure {
                    id,
                    stage: Stage::Converting,
                    reason: err.to_string(),
                });
            }
        };

        let chunks = chunk_record(&record, &document.fingerprint, &self.config.chunking);
        debug!(id = %id, chunks = chunks.len(), "document chunked");

        // Chunks over the provider's input limit are excluded and reported,
        // never silently dropped.
        let limit = self.embedder.max_input_chars();
        let mut skipped = 0usize;
        let mut embeddable = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            if chunk.text.chars().count() > limit {
                warn!(
                    id = %id,
                    chunk_id = %chunk.chunk_id,
                    chars = chunk.text.chars().count(),
                    limit,
                    "chunk exceeds embedder input limit, skipping"
                );
                skipped += 1;
            } else {
                embeddable.push(chunk);
            }
        }

        let texts: Vec<String> = embeddable.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = match self.embedder.embed_batch(&texts).await {
            Ok(vectors) => vectors,
            Err(err) => {
                return DocumentOutcome::Failed(DocumentFailure {
                    id,
                    stage: Stage::Embedding,
                    reason: err.to_string(),
                });
            }
        };
        if vectors.len() != embeddable.len() {
            return DocumentOutcome::Failed(DocumentFailure {
                id,
                stage: Stage::Embedding,
                reason: format!(
                    "provider returned {} vectors for {} inputs",
                    vectors.len(),
                    embeddable.len()
                ),
            });
        }
        for vector in &vectors {
            if vector.len() != self.embedder.dimensions() {
                // A dimension drift is structural, not per-document.
                return DocumentOutcome::Fatal(RagError::Config(format!(
                    "provider '{}' produced a {}-dim vector, expected {}",
                    self.embedder.id(),
                    vector.len(),
                    self.embedder.dimensions()
                )));
            }
        }

        let entries: Vec<IndexEntry> = embeddable
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry::from_chunk(chunk, vector))
            .collect();
        let written = entries.len();

        // Delete-then-insert, not merge: chunks of a shrunk document that no
        // longer re-derive must not survive the update.
        if let Err(err) = self.backend.delete_by_source_id(&id).await {
            return DocumentOutcome::Fatal(err);
        }
        if let Err(err) = self.backend.upsert(entries).await {
            return DocumentOutcome::Fatal(err);
        }

        // Ledger commit strictly after the upsert is durable.
        if let Err(err) = self.ledger.commit(&document).await {
            return DocumentOutcome::Fatal(err);
        }

        debug!(id = %id, written, skipped, reason = ?pending.reason, "document committed");
        DocumentOutcome::Indexed { written, skipped }
    }
}
