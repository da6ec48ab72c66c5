//! In-memory [`SimilarityIndex`] for tests and offline use.
//!
//! Chunks live in a `Vec` behind `std::sync::RwLock`. Distance is
//! `1 - cosine` over lowercase term-frequency vectors, so it lands in
//! `[0, 1]`. A chunk's distance can be pinned to a fixed value to make
//! ranking scenarios deterministic.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Chunk;

use super::{IndexHit, SimilarityIndex};

/// In-memory similarity index.
pub struct InMemoryIndex {
    name: String,
    chunks: RwLock<Vec<Chunk>>,
    pinned: RwLock<HashMap<String, f64>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::named("memory")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chunks: RwLock::new(Vec::new()),
            pinned: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace a chunk (matched by id).
    pub fn insert(&self, chunk: Chunk) {
        let mut chunks = self.chunks.write().unwrap_or_else(PoisonError::into_inner);
        match chunks.iter_mut().find(|c| c.id == chunk.id) {
            Some(existing) => *existing = chunk,
            None => chunks.push(chunk),
        }
    }

    /// Insert a chunk whose distance to every query is `distance`.
    pub fn insert_with_distance(&self, chunk: Chunk, distance: f64) {
        self.pinned
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(chunk.id.clone(), distance);
        self.insert(chunk);
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn term_counts(text: &str) -> HashMap<String, f64> {
    let mut counts = HashMap::new();
    for term in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        *counts.entry(term.to_lowercase()).or_insert(0.0) += 1.0;
    }
    counts
}

fn cosine_distance(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 1.0;
    }
    let dot: f64 = a
        .iter()
        .filter_map(|(term, x)| b.get(term).map(|y| x * y))
        .sum();
    let norm_a = a.values().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.values().map(|x| x * x).sum::<f64>().sqrt();
    1.0 - dot / (norm_a * norm_b)
}

#[async_trait]
impl SimilarityIndex for InMemoryIndex {
    async fn query(
        &self,
        text: &str,
        n: usize,
        source_group: Option<&str>,
    ) -> Result<Vec<IndexHit>> {
        let query_terms = term_counts(text);
        let chunks = self.chunks.read().unwrap_or_else(PoisonError::into_inner);
        let pinned = self.pinned.read().unwrap_or_else(PoisonError::into_inner);

        let mut hits: Vec<IndexHit> = chunks
            .iter()
            .filter(|c| source_group.map_or(true, |g| c.source_group() == g))
            .map(|c| {
                let distance = pinned
                    .get(&c.id)
                    .copied()
                    .unwrap_or_else(|| cosine_distance(&query_terms, &term_counts(&c.text)));
                IndexHit {
                    chunk: c.clone(),
                    distance,
                }
            })
            .collect();

        // Stable: equal distances keep insertion order.
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(n);
        Ok(hits)
    }

    async fn get_by_ids(&self, ids: &[String]) -> Result<HashMap<String, Chunk>> {
        let chunks = self.chunks.read().unwrap_or_else(PoisonError::into_inner);
        Ok(chunks
            .iter()
            .filter(|c| ids.contains(&c.id))
            .map(|c| (c.id.clone(), c.clone()))
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self
            .chunks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
