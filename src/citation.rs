//! Presentation helpers shared by the CLI and the tool server.

use serde_json::Value;

use memory_vault_core::models::Metadata;

/// Metadata fields worth returning to clients.
const COMPACT_FIELDS: &[&str] = &[
    "filename",
    "relative_path",
    "file_type",
    "chunk_id",
    "total_chunks",
    "source",
    "doc_id",
    "h1",
    "h2",
    "h3",
    "title",
    "start_char",
    "end_char",
];

/// Single-line preview: newlines become spaces, capped at `max_chars` with `…`.
pub fn make_snippet(text: &str, max_chars: usize) -> String {
    let flat = text.trim().replace(['\r', '\n'], " ");
    match flat.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", flat[..cut].trim_end()),
        None => flat,
    }
}

/// Keep only the fields in the allow-list.
pub fn compact_metadata(metadata: &Metadata) -> Metadata {
    metadata
        .iter()
        .filter(|(k, _)| COMPACT_FIELDS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn field(metadata: &Metadata, key: &str) -> String {
    match metadata.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Compact citation line for a chunk, e.g.
/// `path=sql/window.md | doc_id=3f2a | chunk=4/12 | section="SQL > Windows" | chars=10-420`.
pub fn format_citation(metadata: &Metadata) -> String {
    let rel = field(metadata, "relative_path");
    let filename = field(metadata, "filename");
    let doc_id = field(metadata, "doc_id");
    let chunk_id = field(metadata, "chunk_id");
    let total = field(metadata, "total_chunks");
    let title = field(metadata, "title");
    let start = field(metadata, "start_char");
    let end = field(metadata, "end_char");

    let mut parts = Vec::new();
    if !rel.is_empty() {
        parts.push(format!("path={}", rel));
    } else if !filename.is_empty() {
        parts.push(format!("file={}", filename));
    }
    if !doc_id.is_empty() {
        parts.push(format!("doc_id={}", doc_id));
    }
    if !chunk_id.is_empty() {
        if total.is_empty() {
            parts.push(format!("chunk={}", chunk_id));
        } else {
            parts.push(format!("chunk={}/{}", chunk_id, total));
        }
    }

    let headings: Vec<String> = ["h1", "h2", "h3"]
        .iter()
        .map(|h| field(metadata, h))
        .filter(|h| !h.is_empty())
        .collect();
    if !headings.is_empty() {
        parts.push(format!("section=\"{}\"", headings.join(" > ")));
    } else if !title.is_empty() {
        parts.push(format!("title=\"{}\"", title));
    }

    if !start.is_empty() && !end.is_empty() {
        parts.push(format!("chars={}-{}", start, end));
    }
    parts.join(" | ")
}
