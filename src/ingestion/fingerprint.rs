//! Content fingerprints for change detection.

use sha2::{Digest, Sha256};

/// Computes the stable fingerprint of a document's bytes.
///
/// SHA-256 rendered as lowercase hex. Fingerprint equality is the only
/// change signal the ledger acts on, so the hash covers the raw bytes
/// exactly as they sit in the corpus.
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
