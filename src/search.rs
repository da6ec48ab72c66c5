//! Knowledge-base search.
//!
//! Two views of the same index:
//!
//! - [`query_knowledge_base`]: raw nearest-neighbour results with snippets
//!   and citations, for tool clients that pick chunks themselves;
//! - [`run_search`]: the full retrieval pipeline (`vault search`), showing
//!   exactly what `vault ask` would hand to the model.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use memory_vault_core::assemble::truncate_with_ellipsis;
use memory_vault_core::index::SimilarityIndex;
use memory_vault_core::models::{Metadata, PayloadKind};
use memory_vault_core::retrieve::{retrieve_context, Retrieval};

use crate::citation::{compact_metadata, format_citation, make_snippet};
use crate::config::Config;
use crate::tools::ToolError;

const FULL_TEXT_CHARS: usize = 1500;

/// Parameters of `query_knowledge_base`.
#[derive(Debug, Clone, Deserialize)]
pub struct KbQuery {
    pub query: String,
    #[serde(default = "default_n_results")]
    pub n_results: usize,
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
    #[serde(default)]
    pub include_full_text: bool,
}

fn default_n_results() -> usize {
    5
}
fn default_snippet_chars() -> usize {
    400
}

#[derive(Debug, Clone, Serialize)]
pub struct KbItem {
    pub rank: usize,
    pub id: String,
    /// `1 - distance`.
    pub score: f64,
    pub snippet: String,
    pub citation: String,
    pub metadata: Metadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KbQueryResponse {
    pub query: String,
    pub n_results: usize,
    pub count: usize,
    pub items: Vec<KbItem>,
}

/// Nearest chunks to `req.query`, without selection or filtering.
pub async fn query_knowledge_base(
    index: &dyn SimilarityIndex,
    req: &KbQuery,
) -> Result<KbQueryResponse, ToolError> {
    if req.query.trim().is_empty() {
        return Err(ToolError::BadRequest("query must not be empty".to_string()));
    }
    if req.n_results == 0 {
        return Err(ToolError::BadRequest("n_results must be >= 1".to_string()));
    }

    let hits = index.query(&req.query, req.n_results, None).await?;
    let items: Vec<KbItem> = hits
        .into_iter()
        .enumerate()
        .map(|(i, hit)| KbItem {
            rank: i + 1,
            score: 1.0 - hit.distance,
            snippet: make_snippet(&hit.chunk.text, req.snippet_chars),
            citation: format_citation(&hit.chunk.metadata),
            metadata: compact_metadata(&hit.chunk.metadata),
            full_text: req
                .include_full_text
                .then(|| truncate_with_ellipsis(&hit.chunk.text, FULL_TEXT_CHARS)),
            id: hit.chunk.id,
        })
        .collect();

    Ok(KbQueryResponse {
        query: req.query.clone(),
        n_results: req.n_results,
        count: items.len(),
        items,
    })
}

/// CLI entry point for `vault search`.
pub async fn run_search(
    config: &Config,
    index: &dyn SimilarityIndex,
    query: &str,
    group: Option<&str>,
    verbose: bool,
    json: bool,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let retrieval = retrieve_context(index, query, group, &config.retrieval_params(verbose)).await;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "query": query,
                "context": retrieval.context,
                "diagnostics": retrieval.diagnostics,
            }))?
        );
        return Ok(());
    }

    print_retrieval(&retrieval, verbose);
    Ok(())
}

fn print_retrieval(retrieval: &Retrieval, verbose: bool) {
    let diag = &retrieval.diagnostics;
    if let Some(ref err) = diag.fetch_error {
        eprintln!("Warning: {}", err);
    }

    if retrieval.context.is_empty() {
        println!("No results.");
    }

    for chunk in retrieval.context.chunks() {
        let kind = match (chunk.expanded, chunk.kind) {
            (true, _) => "neighbour",
            (false, PayloadKind::FullText) => "full",
            (false, PayloadKind::Snippet) => "snippet",
        };
        let score = chunk
            .distance
            .map(|d| format!("{:.2}", 1.0 - d))
            .unwrap_or_else(|| "  - ".to_string());
        println!(
            "{}. [{}] {} ({}) {}",
            chunk.rank, score, chunk.source, chunk.source_group, kind
        );
        println!("    excerpt: \"{}\"", make_snippet(&chunk.text, 160));
        println!("    id: {}", chunk.id);
        println!();
    }

    println!("--- Diagnostics ---");
    println!("fetched:        {}", diag.fetched);
    if diag.below_min_score > 0 {
        println!("below min:      {}", diag.below_min_score);
    }
    println!("toc filtered:   {}", diag.toc_filtered);
    println!("below floor:    {}", diag.below_floor);
    println!("source limited: {}", diag.source_limited);
    println!("expanded:       {}", diag.expanded);
    println!("final:          {}", diag.final_count);
    let groups: Vec<String> = diag
        .group_counts
        .iter()
        .map(|(g, n)| format!("{}={}", g, n))
        .collect();
    println!("groups:         {}", groups.join(", "));

    if verbose && !diag.scoring_log.is_empty() {
        println!();
        println!("--- Scoring ---");
        for e in &diag.scoring_log {
            println!(
                "{:>2}. {:<40} {:<10} dist={:.4} bonus={:.2} adj={:.4}",
                e.rank, e.filename, e.source_group, e.distance, e.bonus, e.adjusted
            );
        }
    }
}
