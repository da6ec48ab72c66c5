//! Core data types for the retrieval and grounding pipeline.
//!
//! A [`Chunk`] is the read-only unit handed out by the similarity index.
//! Everything else here is per-query and discarded when the query ends:
//! [`Candidate`] (a scored chunk), [`ContextSet`] (the curated evidence
//! and its citable ids), and [`Diagnostics`] (counters for observability).
//!
//! Chunk attributes that the index stores as metadata (`source_group`,
//! `filename`, `relative_path`, `file_type`, `chunk_id`) are exposed through
//! accessors with the same fallbacks the ingestion side uses.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form metadata attached to a chunk by the ingestion side.
pub type Metadata = serde_json::Map<String, Value>;

/// Group assigned to chunks without a `source_group` metadata field.
pub const DEFAULT_GROUP: &str = "misc";

/// Source name used for chunks without a `filename` metadata field.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// An immutable unit of indexed text.
///
/// `id` has the form `{doc_hash}_{index}`: a stable document hash plus the
/// chunk's ordinal within that document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Chunk {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    /// Builder-style metadata insert, mostly for tests and the in-memory index.
    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Coarse topical category, `"misc"` when absent.
    pub fn source_group(&self) -> &str {
        self.meta_str("source_group").unwrap_or(DEFAULT_GROUP)
    }

    /// File name of the source document; the diversity key.
    pub fn filename(&self) -> &str {
        self.meta_str("filename").unwrap_or(UNKNOWN_SOURCE)
    }

    /// Path shown to the model: `relative_path`, else `filename`.
    pub fn source_path(&self) -> &str {
        self.meta_str("relative_path")
            .or_else(|| self.meta_str("filename"))
            .unwrap_or(UNKNOWN_SOURCE)
    }

    /// Whether the chunk came from a PDF, by `file_type` or by extension.
    pub fn is_pdf(&self) -> bool {
        if let Some(ft) = self.meta_str("file_type") {
            return ft.trim_start_matches('.').eq_ignore_ascii_case("pdf");
        }
        self.source_path().to_ascii_lowercase().ends_with(".pdf")
    }
}

/// A chunk scored for one query.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub chunk: Chunk,
    /// Raw dissimilarity from the index; lower is closer.
    pub distance: f64,
    /// Bonus applied for the chunk's source group.
    pub bonus: f64,
    /// `distance - bonus`; the ranking key.
    pub adjusted_distance: f64,
    /// Position in the fetch result, used to break ties.
    pub fetch_order: usize,
}

impl Candidate {
    pub fn new(chunk: Chunk, distance: f64, fetch_order: usize) -> Self {
        Self {
            chunk,
            distance,
            bonus: 0.0,
            adjusted_distance: distance,
            fetch_order,
        }
    }

    /// Relevance score as reported to users: `1 - distance`.
    pub fn score(&self) -> f64 {
        1.0 - self.distance
    }
}

/// How much of a chunk's text made it into the context payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    FullText,
    Snippet,
}

/// One entry of a [`ContextSet`].
#[derive(Debug, Clone, Serialize)]
pub struct ContextChunk {
    pub id: String,
    /// Text as sent to the model (possibly truncated).
    pub text: String,
    pub source: String,
    pub source_group: String,
    pub kind: PayloadKind,
    /// Added by PDF neighbour expansion rather than ranking.
    pub expanded: bool,
    /// 1-based position in the context.
    pub rank: usize,
    /// `None` for expanded neighbours, which were never scored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: Metadata,
}

/// The curated evidence for one query.
///
/// Ids are unique and `allowed_ids` is exactly the set of ids present;
/// both are maintained by [`ContextSet::push`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextSet {
    chunks: Vec<ContextChunk>,
    allowed_ids: BTreeSet<String>,
}

impl ContextSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk. Returns `false` (and drops it) if the id is already present.
    pub fn push(&mut self, chunk: ContextChunk) -> bool {
        if !self.allowed_ids.insert(chunk.id.clone()) {
            return false;
        }
        self.chunks.push(chunk);
        true
    }

    pub fn chunks(&self) -> &[ContextChunk] {
        &self.chunks
    }

    pub fn allowed_ids(&self) -> &BTreeSet<String> {
        &self.allowed_ids
    }

    pub fn contains(&self, id: &str) -> bool {
        self.allowed_ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// One line of the verbose selector log.
#[derive(Debug, Clone, Serialize)]
pub struct ScoringEntry {
    pub rank: usize,
    pub filename: String,
    pub source_group: String,
    pub distance: f64,
    pub bonus: f64,
    pub adjusted: f64,
}

/// Per-query counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    /// Candidates returned by the index.
    pub fetched: usize,
    /// Dropped by the minimum relevance score.
    pub below_min_score: usize,
    /// Excluded as non-substantive (TOC / index pages).
    pub toc_filtered: usize,
    /// Dropped by the distance floor.
    pub below_floor: usize,
    /// Skipped because their source hit the diversity cap.
    pub source_limited: usize,
    /// Neighbours added by PDF expansion.
    pub expanded: usize,
    /// Chunks in the final context set.
    pub final_count: usize,
    pub group_counts: BTreeMap<String, usize>,
    pub sources_used: Vec<String>,
    /// Why the fetch came back empty, if the index failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scoring_log: Vec<ScoringEntry>,
}
