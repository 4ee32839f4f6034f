//! Corpus-side ingestion: scanning, change detection, conversion, chunking.

pub mod chunk;
pub mod convert;
pub mod corpus;
pub mod fingerprint;
pub mod ledger;

pub use chunk::{Chunk, chunk_record, derive_chunk_id};
pub use convert::{Section, StructuredRecord, convert};
pub use corpus::{CorpusDocument, DirectoryCorpus};
pub use fingerprint::fingerprint;
pub use ledger::{ChangeLedger, ChangeReason, DocumentRef, LedgerEntry, PendingDocument};
