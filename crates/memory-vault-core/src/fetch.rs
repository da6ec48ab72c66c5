//! Candidate fetcher.
//!
//! Issues one similarity query and wraps the hits as [`Candidate`]s in fetch
//! order. An unreachable or failing index is not an error at this stage: the
//! outcome is empty and carries the reason, and the caller decides whether an
//! empty pool is fatal.

use tracing::{debug, warn};

use crate::index::SimilarityIndex;
use crate::models::Candidate;

/// Result of one fetch.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub candidates: Vec<Candidate>,
    /// Set when the index failed; `candidates` is then empty.
    pub error: Option<String>,
}

/// Fetch up to `n` candidates for `query`, optionally restricted to one group.
pub async fn fetch_candidates<I>(
    index: &I,
    query: &str,
    n: usize,
    source_group: Option<&str>,
) -> FetchOutcome
where
    I: SimilarityIndex + ?Sized,
{
    if query.trim().is_empty() || n == 0 {
        return FetchOutcome::default();
    }

    match index.query(query, n, source_group).await {
        Ok(hits) => {
            debug!(
                index = index.name(),
                requested = n,
                returned = hits.len(),
                group = source_group.unwrap_or("*"),
                "fetched candidates"
            );
            let candidates = hits
                .into_iter()
                .take(n)
                .enumerate()
                .map(|(i, hit)| Candidate::new(hit.chunk, hit.distance, i))
                .collect();
            FetchOutcome {
                candidates,
                error: None,
            }
        }
        Err(e) => {
            warn!(index = index.name(), error = %e, "similarity query failed");
            FetchOutcome {
                candidates: Vec::new(),
                error: Some(format!("index '{}' unavailable: {:#}", index.name(), e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use anyhow::{bail, Result};
    use async_trait::async_trait;

    use super::*;
    use crate::index::memory::InMemoryIndex;
    use crate::index::IndexHit;
    use crate::models::Chunk;

    struct DownIndex;

    #[async_trait]
    impl SimilarityIndex for DownIndex {
        async fn query(&self, _: &str, _: usize, _: Option<&str>) -> Result<Vec<IndexHit>> {
            bail!("connection refused")
        }
        async fn get_by_ids(&self, _: &[String]) -> Result<HashMap<String, Chunk>> {
            bail!("connection refused")
        }
        async fn count(&self) -> Result<usize> {
            bail!("connection refused")
        }
        fn name(&self) -> &str {
            "down"
        }
    }

    #[tokio::test]
    async fn test_index_failure_degrades_to_empty() {
        let outcome = fetch_candidates(&DownIndex, "anything", 5, None).await;
        assert!(outcome.candidates.is_empty());
        let reason = outcome.error.unwrap();
        assert!(reason.contains("down"));
        assert!(reason.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_fetch_order_is_recorded() {
        let index = InMemoryIndex::new();
        index.insert_with_distance(Chunk::new("a_0", "x"), 0.2);
        index.insert_with_distance(Chunk::new("b_0", "y"), 0.1);

        let outcome = fetch_candidates(&index, "q", 10, None).await;
        assert!(outcome.error.is_none());
        let ids: Vec<(&str, usize)> = outcome
            .candidates
            .iter()
            .map(|c| (c.chunk.id.as_str(), c.fetch_order))
            .collect();
        assert_eq!(ids, vec![("b_0", 0), ("a_0", 1)]);
    }

    #[tokio::test]
    async fn test_blank_query_fetches_nothing() {
        let index = InMemoryIndex::new();
        index.insert(Chunk::new("a_0", "x"));
        let outcome = fetch_candidates(&index, "   ", 10, None).await;
        assert!(outcome.candidates.is_empty());
        assert!(outcome.error.is_none());
    }
}
