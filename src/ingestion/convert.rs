//! Document conversion: raw bytes to an ordered-section record.
//!
//! Conversion recovers a heading hierarchy from formatting cues (HTML
//! headings, Markdown ATX headings). When no structure is recoverable the
//! whole text becomes a single unstructured section, so downstream stages
//! never branch on "structured or not" — a record always has at least one
//! section.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::types::RagError;

/// Ordered slice of one converted document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Innermost heading, if the source had one.
    pub heading: Option<String>,
    /// Heading hierarchy from the document root down to and including this
    /// section's own heading.
    pub path: Vec<String>,
    pub body: String,
    /// Position within the document's section sequence.
    pub ordinal: usize,
}

/// A document reduced to ordered sections; always holds at least one.
///
/// Produced fresh on every conversion and never persisted — the vector
/// index stores chunks, the ledger stores fingerprints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredRecord {
    pub source_id: String,
    pub sections: Vec<Section>,
}

/// Converts raw document bytes into a [`StructuredRecord`].
///
/// Format is sniffed, not declared: a leading `<` means HTML, an ATX
/// heading line means Markdown, anything else is plain text. Unreadable
/// input (invalid UTF-8) is a typed conversion failure the orchestrator
/// isolates to this document.
pub fn convert(source_id: &str, bytes: &[u8]) -> Result<StructuredRecord, RagError> {
    let text = std::str::from_utf8(bytes).map_err(|err| {
        RagError::Conversion(format!("{source_id}: document is not valid UTF-8: {err}"))
    })?;

    let record = if text.trim_start().starts_with('<') {
        convert_html(source_id, text)
    } else if has_markdown_headings(text) {
        convert_markdown(source_id, text)
    } else {
        unstructured(source_id, text)
    };

    debug_assert!(!record.sections.is_empty());
    Ok(record)
}

static ATX_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+?)\s*$").expect("heading pattern is valid"));

static HTML_BLOCKS: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("h1,h2,h3,h4,h5,h6,p,pre,ul,ol,table,blockquote")
        .expect("block selector is valid")
});

const NESTING_BLOCKS: &[&str] = &["p", "pre", "ul", "ol", "table", "blockquote"];

fn convert_html(source_id: &str, html: &str) -> StructuredRecord {
    let document = Html::parse_document(html);
    let mut builder = SectionBuilder::new(source_id);

    for element in document.select(&HTML_BLOCKS) {
        let tag = element.value().name();
        if let Some(level) = heading_level(tag) {
            builder.start_section(level, collapse_whitespace(&element.text().collect::<String>()));
        } else {
            if has_block_ancestor(element) {
                continue;
            }
            builder.push_body(collapse_whitespace(&element.text().collect::<String>()));
        }
    }

    let record = builder.finish();
    if record_is_blank(&record) {
        // No recognizable block structure; fall back to the bare text.
        let text = document.root_element().text().collect::<String>();
        return unstructured(source_id, &text);
    }
    record
}

fn convert_markdown(source_id: &str, text: &str) -> StructuredRecord {
    let mut builder = SectionBuilder::new(source_id);
    let mut paragraph: Vec<&str> = Vec::new();
    let mut in_fence = false;

    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            paragraph.push(line);
            continue;
        }
        if !in_fence {
            if let Some(captures) = ATX_HEADING.captures(line) {
                flush_paragraph(&mut builder, &mut paragraph);
                let level = captures[1].len() as u8;
                builder.start_section(level, captures[2].to_string());
                continue;
            }
            if line.trim().is_empty() {
                flush_paragraph(&mut builder, &mut paragraph);
                continue;
            }
        }
        paragraph.push(line);
    }
    flush_paragraph(&mut builder, &mut paragraph);

    builder.finish()
}

fn flush_paragraph(builder: &mut SectionBuilder, paragraph: &mut Vec<&str>) {
    if !paragraph.is_empty() {
        builder.push_body(paragraph.join("\n").trim().to_string());
        paragraph.clear();
    }
}

fn unstructured(source_id: &str, text: &str) -> StructuredRecord {
    StructuredRecord {
        source_id: source_id.to_string(),
        sections: vec![Section {
            heading: None,
            path: Vec::new(),
            body: text.trim().to_string(),
            ordinal: 0,
        }],
    }
}

fn has_markdown_headings(text: &str) -> bool {
    let mut in_fence = false;
    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if !in_fence && ATX_HEADING.is_match(line) {
            return true;
        }
    }
    false
}

fn record_is_blank(record: &StructuredRecord) -> bool {
    record
        .sections
        .iter()
        .all(|section| section.heading.is_none() && section.body.trim().is_empty())
}

fn heading_level(tag: &str) -> Option<u8> {
    match tag {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

/// Skips blocks nested inside another captured block (a `p` inside a
/// `blockquote` would otherwise be emitted twice).
fn has_block_ancestor(element: ElementRef) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|ancestor| NESTING_BLOCKS.contains(&ancestor.value().name()))
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Accumulates headings and body text into ordered sections, maintaining
/// the heading stack that becomes each section's path.
struct SectionBuilder {
    source_id: String,
    levels: Vec<(u8, String)>,
    current_heading: Option<String>,
    current_path: Vec<String>,
    current_body: Vec<String>,
    sections: Vec<Section>,
}

impl SectionBuilder {
    fn new(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            levels: Vec::new(),
            current_heading: None,
            current_path: Vec::new(),
            current_body: Vec::new(),
            sections: Vec::new(),
        }
    }

    fn start_section(&mut self, level: u8, title: String) {
        self.flush();
        while self
            .levels
            .last()
            .is_some_and(|(existing, _)| *existing >= level)
        {
            self.levels.pop();
        }
        self.levels.push((level, title.clone()));
        self.current_path = self.levels.iter().map(|(_, title)| title.clone()).collect();
        self.current_heading = Some(title);
    }

    fn push_body(&mut self, text: String) {
        if !text.is_empty() {
            self.current_body.push(text);
        }
    }

    fn flush(&mut self) {
        if self.current_heading.is_none() && self.current_body.is_empty() {
            return;
        }
        let body = self.current_body.join("\n\n");
        self.sections.push(Section {
            heading: self.current_heading.take(),
            path: std::mem::take(&mut self.current_path),
            body,
            ordinal: self.sections.len(),
        });
        self.current_body.clear();
    }

    fn finish(mut self) -> StructuredRecord {
        self.flush();
        if self.sections.is_empty() {
            return unstructured(&self.source_id, "");
        }
        StructuredRecord {
            source_id: self.source_id,
            sections: self.sections,
        }
    }
}
