//! Change ledger: the persisted record of what has been indexed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

use crate::types::RagError;

/// Identity and current fingerprint of one corpus document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: String,
    pub fingerprint: String,
    pub last_seen_at: DateTime<Utc>,
}

/// Per-document record of the last successful index pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub fingerprint: String,
    pub indexed_at: DateTime<Utc>,
}

/// Why [`ChangeLedger::diff`] selected a document for processing.
///
/// Both cases trigger identical processing today; they are kept distinct so
/// logging and summaries never conflate first-time indexing with re-indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeReason {
    /// No ledger entry exists for this id.
    New,
    /// The stored fingerprint differs from the freshly computed one.
    Changed,
}

/// A document the diff decided needs (re)processing.
#[derive(Debug, Clone)]
pub struct PendingDocument {
    pub document: DocumentRef,
    pub reason: ChangeReason,
}

/// File-backed ledger mapping document ids to their last indexed fingerprint.
///
/// The map is held behind an async mutex and persisted as JSON on every
/// commit, through a temp file followed by a rename, so a crash mid-write
/// never leaves a torn ledger on disk. Commits are serialized by the mutex;
/// the orchestrator guarantees each id is handled by at most one worker per
/// run.
#[derive(Clone, Debug)]
pub struct ChangeLedger {
    path: PathBuf,
    state: Arc<Mutex<BTreeMap<String, LedgerEntry>>>,
}

impl ChangeLedger {
    /// Creates a ledger that persists to the provided path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Path where ledger state is persisted.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads previously persisted state, if any. A missing file is an empty
    /// ledger, not an error.
    pub async fn load(&self) -> Result<(), RagError> {
        if !self.path.exists() {
            return Ok(());
        }
        let data = fs::read_to_string(&self.path)
            .await
            .map_err(|err| RagError::Ledger(err.to_string()))?;
        let entries: BTreeMap<String, LedgerEntry> =
            serde_json::from_str(&data).map_err(|err| RagError::Ledger(err.to_string()))?;
        let mut guard = self.state.lock().await;
        *guard = entries;
        Ok(())
    }

    /// Returns the stored entry for a document id, if one exists.
    pub async fn entry(&self, id: &str) -> Option<LedgerEntry> {
        let guard = self.state.lock().await;
        guard.get(id).cloned()
    }

    /// Number of documents the ledger currently knows about.
    pub async fn len(&self) -> usize {
        let guard = self.state.lock().await;
        guard.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Classifies the current corpus listing against the ledger.
    ///
    /// A document needs processing iff no entry exists for its id or the
    /// stored fingerprint differs; documents whose fingerprint matches are
    /// excluded. No flags, no separate is-new probe: absence-or-mismatch is
    /// the whole test.
    pub async fn diff(&self, current: &[DocumentRef]) -> Vec<PendingDocument> {
        let guard = self.state.lock().await;
        current
            .iter()
            .filter_map(|document| match guard.get(&document.id) {
                None => Some(PendingDocument {
                    document: document.clone(),
                    reason: ChangeReason::New,
                }),
                Some(entry) if entry.fingerprint != document.fingerprint => {
                    Some(PendingDocument {
                        document: document.clone(),
                        reason: ChangeReason::Changed,
                    })
                }
                Some(_) => None,
            })
            .collect()
    }

    /// Records a successful index pass for one document and persists the
    /// updated map.
    ///
    /// Only the orchestrator calls this, and only after the document's index
    /// upsert has completed; the ordering is what makes a crash between
    /// upsert and commit safe to retry.
    pub async fn commit(&self, document: &DocumentRef) -> Result<(), RagError> {
        let mut guard = self.state.lock().await;
        guard.insert(
            document.id.clone(),
            LedgerEntry {
                fingerprint: document.fingerprint.clone(),
                indexed_at: Utc::now(),
            },
        );
        self.persist(&guard).await
    }

    /// Drops a document's entry, for operator-driven reconciliation of
    /// corpus deletions. Returns whether an entry existed.
    pub async fn remove(&self, id: &str) -> Result<bool, RagError> {
        let mut guard = self.state.lock().await;
        let existed = guard.remove(id).is_some();
        if existed {
            self.persist(&guard).await?;
        }
        Ok(existed)
    }

    async fn persist(&self, entries: &BTreeMap<String, LedgerEntry>) -> Result<(), RagError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|err| RagError::Ledger(err.to_string()))?;
            }
        }
        let serialized = serde_json::to_string_pretty(entries)
            .map_err(|err| RagError::Ledger(err.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serialized)
            .await
            .map_err(|err| RagError::Ledger(err.to_string()))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|err| RagError::Ledger(err.to_string()))?;
        Ok(())
    }
}
