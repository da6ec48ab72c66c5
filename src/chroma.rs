//! Chroma HTTP adapter.
//!
//! Implements [`SimilarityIndex`] against a Chroma server's REST API (v1).
//! Queries are embedded with Ollama first, so the embedding model must be the
//! one the collection was built with.
//!
//! The collection id is resolved lazily from its name on first use and
//! cached for the lifetime of the adapter.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::debug;

use memory_vault_core::index::{IndexHit, SimilarityIndex};
use memory_vault_core::models::{Chunk, Metadata};

use crate::config::{GenerationConfig, IndexConfig};
use crate::ollama::OllamaClient;

pub struct ChromaIndex {
    base_url: String,
    collection: String,
    collection_id: OnceCell<String>,
    http: reqwest::Client,
    embedder: OllamaClient,
    embed_model: String,
}

#[derive(Deserialize)]
struct CollectionInfo {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<Metadata>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<Option<f64>>>>,
}

#[derive(Debug, Default, Deserialize)]
struct GetResponse {
    #[serde(default)]
    ids: Vec<String>,
    #[serde(default)]
    documents: Option<Vec<Option<String>>>,
    #[serde(default)]
    metadatas: Option<Vec<Option<Metadata>>>,
}

impl ChromaIndex {
    pub fn new(index: &IndexConfig, generation: &GenerationConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(index.timeout_secs))
            .build()?;
        Ok(Self {
            base_url: index.url.trim_end_matches('/').to_string(),
            collection: index.collection.clone(),
            collection_id: OnceCell::new(),
            http,
            embedder: OllamaClient::new(&generation.base_url, index.timeout_secs)?,
            embed_model: index.embed_model.clone(),
        })
    }

    async fn collection_id(&self) -> Result<&str> {
        let id = self
            .collection_id
            .get_or_try_init(|| async {
                let url = format!("{}/api/v1/collections/{}", self.base_url, self.collection);
                let resp = self.http.get(&url).send().await.with_context(|| {
                    format!("Chroma connection error (is Chroma running at {}?)", self.base_url)
                })?;
                let status = resp.status();
                if !status.is_success() {
                    let body = resp.text().await.unwrap_or_default();
                    bail!("collection '{}' not available ({}): {}", self.collection, status, body);
                }
                let info: CollectionInfo = resp.json().await?;
                debug!(collection = %self.collection, id = %info.id, "resolved collection");
                Ok::<_, anyhow::Error>(info.id)
            })
            .await?;
        Ok(id.as_str())
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        action: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let id = self.collection_id().await?;
        let url = format!("{}/api/v1/collections/{}/{}", self.base_url, id, action);
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Chroma {} request failed", action))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Chroma API error {} on {}: {}", status, action, body);
        }
        Ok(resp.json().await?)
    }
}

fn hits_from_query(resp: QueryResponse) -> Vec<IndexHit> {
    let ids = resp.ids.into_iter().next().unwrap_or_default();
    let docs = resp
        .documents
        .and_then(|d| d.into_iter().next())
        .unwrap_or_default();
    let metas = resp
        .metadatas
        .and_then(|m| m.into_iter().next())
        .unwrap_or_default();
    let dists = resp
        .distances
        .and_then(|d| d.into_iter().next())
        .unwrap_or_default();

    ids.into_iter()
        .enumerate()
        .map(|(i, id)| IndexHit {
            chunk: Chunk {
                id,
                text: docs.get(i).cloned().flatten().unwrap_or_default(),
                metadata: metas.get(i).cloned().flatten().unwrap_or_default(),
            },
            distance: dists.get(i).copied().flatten().unwrap_or(f64::MAX),
        })
        .collect()
}

fn chunks_from_get(resp: GetResponse) -> HashMap<String, Chunk> {
    let docs = resp.documents.unwrap_or_default();
    let metas = resp.metadatas.unwrap_or_default();
    resp.ids
        .into_iter()
        .enumerate()
        .map(|(i, id)| {
            let chunk = Chunk {
                id: id.clone(),
                text: docs.get(i).cloned().flatten().unwrap_or_default(),
                metadata: metas.get(i).cloned().flatten().unwrap_or_default(),
            };
            (id, chunk)
        })
        .collect()
}

#[async_trait]
impl SimilarityIndex for ChromaIndex {
    async fn query(
        &self,
        text: &str,
        n: usize,
        source_group: Option<&str>,
    ) -> Result<Vec<IndexHit>> {
        let embedding = self.embedder.embed_query(&self.embed_model, text).await?;
        let mut body = json!({
            "query_embeddings": [embedding],
            "n_results": n,
            "include": ["documents", "metadatas", "distances"],
        });
        if let Some(group) = source_group {
            body["where"] = json!({ "source_group": group });
        }
        let resp: QueryResponse = self.post("query", body).await?;
        Ok(hits_from_query(resp))
    }

    async fn get_by_ids(&self, ids: &[String]) -> Result<HashMap<String, Chunk>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let body = json!({
            "ids": ids,
            "include": ["documents", "metadatas"],
        });
        let resp: GetResponse = self.post("get", body).await?;
        Ok(chunks_from_get(resp))
    }

    async fn count(&self) -> Result<usize> {
        let id = self.collection_id().await?;
        let url = format!("{}/api/v1/collections/{}/count", self.base_url, id);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("Chroma count request failed")?;
        let status = resp.status();
        if !status.is_success() {
            bail!("Chroma API error {} on count", status);
        }
        Ok(resp.json().await?)
    }

    fn name(&self) -> &str {
        &self.collection
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_response_maps_to_hits() {
        let resp: QueryResponse = serde_json::from_value(json!({
            "ids": [["a_0", "b_3"]],
            "documents": [["alpha", null]],
            "metadatas": [[{"filename": "a.md", "source_group": "sql"}, null]],
            "distances": [[0.25, 0.75]],
        }))
        .unwrap();
        let hits = hits_from_query(resp);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.source_group(), "sql");
        assert_eq!(hits[1].chunk.text, "");
        assert_eq!(hits[1].chunk.source_group(), "misc");
        assert!((hits[1].distance - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_missing_distances_sort_last() {
        let resp: QueryResponse = serde_json::from_value(json!({
            "ids": [["a_0"]],
            "documents": null,
            "metadatas": null,
            "distances": null,
        }))
        .unwrap();
        let hits = hits_from_query(resp);
        assert_eq!(hits[0].distance, f64::MAX);
    }

    #[test]
    fn test_get_response_keyed_by_id() {
        let resp: GetResponse = serde_json::from_value(json!({
            "ids": ["h_0001", "h_0003"],
            "documents": ["one", "three"],
            "metadatas": [{"chunk_id": 1}, {"chunk_id": 3}],
        }))
        .unwrap();
        let chunks = chunks_from_get(resp);
        assert_eq!(chunks["h_0003"].text, "three");
        assert_eq!(chunks["h_0001"].metadata["chunk_id"], json!(1));
    }
}
