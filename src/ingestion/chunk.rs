//! Chunk derivation: structured records to retrieval units.
//!
//! Chunks never cross a section boundary. Oversized section bodies are
//! sub-split at sentence boundaries with a configured character overlap.
//! Chunk ids are derived, not generated: re-chunking byte-identical input
//! reproduces identical ids, which is what turns re-indexing into an
//! idempotent replace instead of an append.

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::ingestion::convert::{Section, StructuredRecord};

/// Namespace under which all chunk ids are derived.
const CHUNK_ID_NAMESPACE: Uuid = Uuid::from_u128(0x9f1c_2d57_6b3a_4e08_8c44_a1d0_57e2_3b6d);

/// A retrieval unit derived from one document section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic id: UUIDv5 over source id, section position and path,
    /// and sub-chunk ordinal.
    pub chunk_id: String,
    pub source_id: String,
    /// Fingerprint of the document bytes this chunk was derived from.
    pub fingerprint: String,
    /// Heading hierarchy joined with `" > "`; empty for unstructured bodies.
    pub section_path: String,
    /// Position within the document's chunk sequence.
    pub ordinal: usize,
    pub text: String,
    /// Extra provenance carried into the index.
    pub metadata: serde_json::Value,
}

/// Derives the chunk id for a given provenance tuple.
///
/// The section ordinal participates alongside the path so two sections that
/// happen to share a heading path cannot collide.
pub fn derive_chunk_id(
    source_id: &str,
    section_ordinal: usize,
    section_path: &str,
    sub_ordinal: usize,
) -> String {
    let key = format!("{source_id}\u{1f}{section_ordinal}\u{1f}{section_path}\u{1f}{sub_ordinal}");
    Uuid::new_v5(&CHUNK_ID_NAMESPACE, key.as_bytes()).to_string()
}

/// Splits a structured record into chunks, without embeddings.
///
/// Whitespace-only sections produce no chunks; a record of empty sections
/// yields an empty vector, which the orchestrator treats as "this document
/// currently contributes nothing to the index".
pub fn chunk_record(
    record: &StructuredRecord,
    fingerprint: &str,
    config: &ChunkingConfig,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    for section in &record.sections {
        let body = section.body.trim();
        if body.is_empty() || body.chars().count() < config.min_chunk_chars {
            continue;
        }
        let path = section_path_string(section);
        let pieces = split_with_overlap(body, config.max_chunk_chars, config.chunk_overlap_chars);

        for (sub_ordinal, piece) in pieces.into_iter().enumerate() {
            let chunk_id = derive_chunk_id(&record.source_id, section.ordinal, &path, sub_ordinal);
            chunks.push(Chunk {
                chunk_id,
                source_id: record.source_id.clone(),
                fingerprint: fingerprint.to_string(),
                section_path: path.clone(),
                ordinal: chunks.len(),
                text: piece,
                metadata: serde_json::json!({
                    "section_ordinal": section.ordinal,
                    "sub_ordinal": sub_ordinal,
                }),
            });
        }
    }

    chunks
}

fn section_path_string(section: &Section) -> String {
    section.path.join(" > ")
}

/// Cuts a section body into sub-chunks at sentence boundaries.
///
/// Each finished piece stays within `max_chars` of new content; the tail of
/// the previous piece (up to `overlap_chars`, cut back to a word boundary)
/// is prefixed onto the next so context survives the split.
fn split_with_overlap(body: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    if body.chars().count() <= max_chars {
        return vec![body.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current = String::new();

    for sentence in body.split_sentence_bounds() {
        for fragment in hard_split(sentence, max_chars) {
            let current_chars = current.chars().count();
            if current_chars > 0 && current_chars + fragment.chars().count() > max_chars {
                let tail = overlap_tail(&current, overlap_chars);
                pieces.push(current.trim().to_string());
                current = tail;
            }
            current.push_str(fragment);
        }
    }

    let last = current.trim();
    if !last.is_empty() {
        pieces.push(last.to_string());
    }
    pieces.retain(|piece| !piece.is_empty());
    pieces
}

/// Splits a single sentence longer than `max_chars` on raw character
/// boundaries; sentences at or under the limit pass through untouched.
fn hard_split(sentence: &str, max_chars: usize) -> Vec<&str> {
    if sentence.chars().count() <= max_chars {
        return vec![sentence];
    }
    let mut out = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (idx, _) in sentence.char_indices() {
        if count == max_chars {
            out.push(&sentence[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    if start < sentence.len() {
        out.push(&sentence[start..]);
    }
    out
}

/// Last `overlap_chars` characters of `piece`, trimmed forward to a word
/// boundary so the carried context never starts mid-word.
fn overlap_tail(piece: &str, overlap_chars: usize) -> String {
    if overlap_chars == 0 {
        return String::new();
    }
    let chars: Vec<char> = piece.chars().collect();
    if chars.len() <= overlap_chars {
        return piece.to_string();
    }
    let tail: String = chars[chars.len() - overlap_chars..].iter().collect();
    match tail.find(char::is_whitespace) {
        Some(pos) => tail[pos..].trim_start().to_string(),
        None => tail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::convert::convert;

    fn config(max: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig {
            max_chunk_chars: max,
            chunk_overlap_chars: overlap,
            min_chunk_chars: 1,
        }
    }

    #[test]
    fn one_chunk_per_small_section() {
        let record = convert(
            "doc1.md",
            b"# Intake\nInitial assessment.\n\n# Plan\nContinue course.\n",
        )
        .unwrap();
        let chunks = chunk_record(&record, "h1", &ChunkingConfig::default());

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].section_path, "Intake");
        assert_eq!(chunks[1].section_path, "Plan");
        assert_eq!(chunks[0].ordinal, 0);
        assert_eq!(chunks[1].ordinal, 1);
        assert!(chunks.iter().all(|chunk| chunk.fingerprint == "h1"));
    }

    #[test]
    fn rechunking_identical_input_reproduces_ids_and_text() {
        let bytes = b"# Intake\nInitial assessment with several details recorded.\n\n# Plan\nContinue the current course of treatment.\n";
        let first = chunk_record(&convert("doc1.md", bytes).unwrap(), "h1", &config(80, 10));
        let second = chunk_record(&convert("doc1.md", bytes).unwrap(), "h1", &config(80, 10));
        assert_eq!(first, second);
    }

    #[test]
    fn chunks_never_cross_section_boundaries() {
        let record = convert("doc.md", b"# A\nalpha alpha alpha\n\n# B\nbeta beta beta\n").unwrap();
        let chunks = chunk_record(&record, "h", &config(10, 2));

        for chunk in &chunks {
            assert!(
                !(chunk.text.contains("alpha") && chunk.text.contains("beta")),
                "chunk mixed sections: {}",
                chunk.text
            );
        }
    }

    #[test]
    fn oversized_sections_split_with_overlap() {
        let body: String = (0..40)
            .map(|i| format!("Sentence number {i} talks about the topic. "))
            .collect();
        let text = format!("# Long\n{body}");
        let record = convert("doc.md", text.as_bytes()).unwrap();
        let chunks = chunk_record(&record, "h", &config(200, 40));

        assert!(chunks.len() > 1, "expected a sub-split, got {}", chunks.len());
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 200 + 40);
            assert_eq!(chunk.section_path, "Long");
        }
        // Consecutive sub-chunks share carried context.
        let first_tail: String = chunks[0].text.chars().rev().take(20).collect::<String>();
        assert!(!first_tail.is_empty());
    }

    #[test]
    fn sub_chunks_of_one_section_get_distinct_ids() {
        let body: String = (0..40)
            .map(|i| format!("Sentence number {i} talks about the topic. "))
            .collect();
        let text = format!("# Long\n{body}");
        let record = convert("doc.md", text.as_bytes()).unwrap();
        let chunks = chunk_record(&record, "h", &config(200, 40));

        let mut ids: Vec<&str> = chunks.iter().map(|chunk| chunk.chunk_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), chunks.len());
    }

    #[test]
    fn sections_sharing_a_heading_path_do_not_collide() {
        // Two top-level "Notes" headings produce sections with identical
        // paths; ids must still differ.
        let record = convert("doc.md", b"# Notes\nfirst body\n\n# Notes\nsecond body\n").unwrap();
        let chunks = chunk_record(&record, "h", &ChunkingConfig::default());

        assert_eq!(chunks.len(), 2);
        assert_ne!(chunks[0].chunk_id, chunks[1].chunk_id);
    }

    #[test]
    fn whitespace_only_sections_produce_no_chunks() {
        let record = convert("doc.md", b"# Empty\n\n# Full\ncontent here\n").unwrap();
        let chunks = chunk_record(&record, "h", &ChunkingConfig::default());

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].section_path, "Full");
    }

    #[test]
    fn a_sentence_longer_than_max_is_hard_split() {
        let text = format!("# X\n{}", "a".repeat(50));
        let record = convert("doc.md", text.as_bytes()).unwrap();
        let chunks = chunk_record(&record, "h", &config(20, 0));

        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|chunk| chunk.text.chars().count() <= 20));
    }
}
