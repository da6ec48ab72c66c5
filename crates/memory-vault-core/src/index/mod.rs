//! Similarity-index abstraction.
//!
//! The index is an external, read-only collaborator: ingestion and embedding
//! happen elsewhere. The pipeline only needs nearest-neighbour queries with an
//! optional `source_group` filter, lookups by id for neighbour expansion, and
//! a chunk count for statistics.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`query`](SimilarityIndex::query) | Nearest chunks to a query text, with distances |
//! | [`get_by_ids`](SimilarityIndex::get_by_ids) | Fetch chunks by id (missing ids are omitted) |
//! | [`count`](SimilarityIndex::count) | Number of chunks in the index |
//!
//! Implementations must be `Send + Sync`; one index is shared read-only by
//! concurrent queries.

pub mod memory;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Chunk;

/// A chunk returned by a similarity query.
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub chunk: Chunk,
    /// Dissimilarity to the query; lower is closer.
    pub distance: f64,
}

#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    /// Return up to `n` chunks closest to `text`, nearest first.
    ///
    /// When `source_group` is set only chunks whose `source_group` metadata
    /// equals it are considered.
    async fn query(&self, text: &str, n: usize, source_group: Option<&str>)
        -> Result<Vec<IndexHit>>;

    /// Fetch chunks by id. Ids that do not exist are absent from the map.
    async fn get_by_ids(&self, ids: &[String]) -> Result<HashMap<String, Chunk>>;

    /// Total number of chunks.
    async fn count(&self) -> Result<usize>;

    /// Human-readable name of the backing collection.
    fn name(&self) -> &str;
}
