//! Context assembly.
//!
//! Converts the ranked selection into bounded text payloads. The top
//! `top_k_full` chunks go in at full length, capped at `max_chars_full`; the
//! rest go in as snippets capped at `snippet_chars`. Truncation is marked
//! with `...`.
//!
//! PDF chunks are often cut mid-thought, so for each selected PDF chunk the
//! neighbouring chunks (same document, position ±1..=radius) are fetched by
//! id, screened by the evidence classifier, and appended as snippet evidence
//! marked `expanded`. Expansion only appends: primary ranks never move, and
//! at most `pdf_expand_max` neighbours are added per query.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::classify;
use crate::index::SimilarityIndex;
use crate::models::{Candidate, ContextChunk, ContextSet, PayloadKind};

const ELLIPSIS: &str = "...";

/// Assembly tuning, decoupled from application config.
#[derive(Debug, Clone)]
pub struct AssemblyParams {
    /// Chunks included at full length.
    pub top_k_full: usize,
    /// Cap for full-length chunks.
    pub max_chars_full: usize,
    /// Cap for snippets (including expanded neighbours).
    pub snippet_chars: usize,
    /// Screen expanded neighbours with the evidence classifier.
    pub filter_toc: bool,
    pub pdf_expand: bool,
    pub pdf_expand_radius: usize,
    /// Hard cap on neighbours added per query.
    pub pdf_expand_max: usize,
}

impl Default for AssemblyParams {
    fn default() -> Self {
        Self {
            top_k_full: 2,
            max_chars_full: 4500,
            snippet_chars: 400,
            filter_toc: true,
            pdf_expand: true,
            pdf_expand_radius: 2,
            pdf_expand_max: 4,
        }
    }
}

/// Counters from [`expand_pdf_neighbours`].
#[derive(Debug, Default)]
pub struct Expansion {
    pub added: usize,
    pub toc_filtered: usize,
}

/// Trim `text` and cap it at `max_chars` characters, appending `...` when cut.
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{}", trimmed[..cut].trim_end(), ELLIPSIS),
        None => trimmed.to_string(),
    }
}

/// Zero-padded width of chunk positions in ingested ids (`h_0005`).
pub const POSITION_WIDTH: usize = 4;

/// Ids of the chunks around `id` within `radius`, nearest first.
///
/// The id is split at its last `_` into document hash and position. Ids in
/// the padded layout (a leading zero, or at least [`POSITION_WIDTH`] digits)
/// keep that padding, so `h_1000` → `h_0999`; shorter unpadded ids stay
/// unpadded. Negative and overflowing positions are skipped. Ids without an
/// all-digit suffix have no neighbours.
pub fn adjacent_ids(id: &str, radius: usize) -> Vec<String> {
    let Some((prefix, digits)) = id.rsplit_once('_') else {
        return Vec::new();
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Vec::new();
    }
    let Ok(position) = digits.parse::<usize>() else {
        return Vec::new();
    };
    let width = if digits.len() > 1 && digits.starts_with('0') {
        digits.len()
    } else if digits.len() >= POSITION_WIDTH {
        POSITION_WIDTH
    } else {
        0
    };

    let mut ids = Vec::with_capacity(radius * 2);
    for offset in 1..=radius {
        if let Some(before) = position.checked_sub(offset) {
            ids.push(format!("{}_{:0width$}", prefix, before, width = width));
        }
        if let Some(after) = position.checked_add(offset) {
            ids.push(format!("{}_{:0width$}", prefix, after, width = width));
        }
    }
    ids
}

/// Build the primary context set from ranked candidates.
pub fn build_context(selected: &[Candidate], params: &AssemblyParams) -> ContextSet {
    let mut set = ContextSet::new();
    for cand in selected {
        let rank = set.len() + 1;
        let (kind, cap) = if rank <= params.top_k_full {
            (PayloadKind::FullText, params.max_chars_full)
        } else {
            (PayloadKind::Snippet, params.snippet_chars)
        };
        set.push(ContextChunk {
            id: cand.chunk.id.clone(),
            text: truncate_with_ellipsis(&cand.chunk.text, cap),
            source: cand.chunk.source_path().to_string(),
            source_group: cand.chunk.source_group().to_string(),
            kind,
            expanded: false,
            rank,
            distance: Some(cand.distance),
            metadata: cand.chunk.metadata.clone(),
        });
    }
    set
}

/// Append neighbours of selected PDF chunks to `set`.
///
/// Index failures are logged and leave `set` unchanged.
pub async fn expand_pdf_neighbours<I>(
    index: &I,
    set: &mut ContextSet,
    selected: &[Candidate],
    params: &AssemblyParams,
) -> Expansion
where
    I: SimilarityIndex + ?Sized,
{
    let mut outcome = Expansion::default();
    if !params.pdf_expand || params.pdf_expand_max == 0 || params.pdf_expand_radius == 0 {
        return outcome;
    }

    let mut wanted: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for cand in selected.iter().filter(|c| c.chunk.is_pdf()) {
        for id in adjacent_ids(&cand.chunk.id, params.pdf_expand_radius) {
            if !set.contains(&id) && seen.insert(id.clone()) {
                wanted.push(id);
            }
        }
    }
    if wanted.is_empty() {
        return outcome;
    }

    let found = match index.get_by_ids(&wanted).await {
        Ok(found) => found,
        Err(e) => {
            warn!(error = %e, requested = wanted.len(), "neighbour lookup failed; skipping expansion");
            return outcome;
        }
    };

    for id in &wanted {
        if outcome.added >= params.pdf_expand_max {
            break;
        }
        let Some(chunk) = found.get(id) else {
            continue;
        };
        if params.filter_toc {
            let verdict = classify::classify(&chunk.text);
            if verdict.is_toc() {
                debug!(chunk = %id, signals = ?verdict.signals, "dropping TOC-like neighbour");
                outcome.toc_filtered += 1;
                continue;
            }
        }
        let rank = set.len() + 1;
        if set.push(ContextChunk {
            id: chunk.id.clone(),
            text: truncate_with_ellipsis(&chunk.text, params.snippet_chars),
            source: chunk.source_path().to_string(),
            source_group: chunk.source_group().to_string(),
            kind: PayloadKind::Snippet,
            expanded: true,
            rank,
            distance: None,
            metadata: chunk.metadata.clone(),
        }) {
            outcome.added += 1;
        }
    }

    debug!(
        requested = wanted.len(),
        found = found.len(),
        added = outcome.added,
        "pdf expansion complete"
    );
    outcome
}
