//! End-to-end retrieval for one query.
//!
//! fetch → minimum score → evidence classifier → selector → assembler.
//! Every stage degrades instead of failing: an unreachable index yields an
//! empty context with `fetch_error` set in the [`Diagnostics`].

use tracing::{debug, info};

use crate::assemble::{self, AssemblyParams};
use crate::classify;
use crate::fetch;
use crate::index::SimilarityIndex;
use crate::models::{ContextSet, Diagnostics};
use crate::select::{self, SelectorParams};

/// All retrieval tuning for one query.
#[derive(Debug, Clone, Default)]
pub struct RetrievalParams {
    pub selector: SelectorParams,
    pub assembly: AssemblyParams,
    /// Drop candidates whose score (`1 - distance`) is below this.
    pub min_score: Option<f64>,
}

/// The context for one query plus what happened while building it.
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    pub context: ContextSet,
    pub diagnostics: Diagnostics,
}

/// Retrieve and assemble evidence for `query`.
///
/// With `source_group` set the index is queried once for `total_k`
/// candidates of that group; otherwise a preflight pool of
/// `total_k × preflight_multiplier` unfiltered candidates is fetched.
pub async fn retrieve_context<I>(
    index: &I,
    query: &str,
    source_group: Option<&str>,
    params: &RetrievalParams,
) -> Retrieval
where
    I: SimilarityIndex + ?Sized,
{
    let mut diag = Diagnostics::default();

    let n = match source_group {
        Some(_) => params.selector.total_k,
        None => params.selector.preflight_size(),
    };
    let outcome = fetch::fetch_candidates(index, query, n, source_group).await;
    diag.fetched = outcome.candidates.len();
    diag.fetch_error = outcome.error;

    let mut candidates = outcome.candidates;

    if let Some(min_score) = params.min_score {
        let before = candidates.len();
        candidates.retain(|c| c.score() >= min_score);
        diag.below_min_score = before - candidates.len();
    }

    if params.assembly.filter_toc {
        let before = candidates.len();
        candidates.retain(|c| {
            let verdict = classify::classify(&c.chunk.text);
            if verdict.is_toc() {
                debug!(chunk = %c.chunk.id, signals = ?verdict.signals, "excluding TOC-like chunk");
            }
            !verdict.is_toc()
        });
        diag.toc_filtered = before - candidates.len();
    }

    let selection = select::select(candidates, &params.selector);
    diag.below_floor = selection.below_floor;
    diag.source_limited = selection.source_limited;
    diag.group_counts = selection.group_counts;
    diag.scoring_log = selection.scoring_log;

    let mut context = assemble::build_context(&selection.selected, &params.assembly);
    let expansion =
        assemble::expand_pdf_neighbours(index, &mut context, &selection.selected, &params.assembly)
            .await;
    diag.expanded = expansion.added;
    diag.toc_filtered += expansion.toc_filtered;
    diag.final_count = context.len();

    let mut sources: Vec<String> = Vec::new();
    for chunk in context.chunks() {
        if !sources.contains(&chunk.source) {
            sources.push(chunk.source.clone());
        }
    }
    diag.sources_used = sources;

    info!(
        fetched = diag.fetched,
        toc_filtered = diag.toc_filtered,
        below_floor = diag.below_floor,
        source_limited = diag.source_limited,
        expanded = diag.expanded,
        final_count = diag.final_count,
        "retrieval complete"
    );

    Retrieval {
        context,
        diagnostics: diag,
    }
}
