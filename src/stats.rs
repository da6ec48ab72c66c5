//! Knowledge-base statistics and environment check.
//!
//! `vault stats` reports what the index holds; `vault check` additionally
//! verifies that Ollama is reachable and which chat model will be used.

use anyhow::Result;
use serde::Serialize;

use memory_vault_core::index::SimilarityIndex;

use crate::config::Config;
use crate::ollama::{resolve_model, OllamaClient};
use crate::tools::ToolError;

#[derive(Debug, Clone, Serialize)]
pub struct KbStats {
    pub collection: String,
    pub total_chunks: usize,
}

pub async fn get_stats(index: &dyn SimilarityIndex) -> Result<KbStats, ToolError> {
    Ok(KbStats {
        collection: index.name().to_string(),
        total_chunks: index.count().await?,
    })
}

/// CLI entry point for `vault stats`.
pub async fn run_stats(config: &Config, index: &dyn SimilarityIndex) -> Result<()> {
    let stats = get_stats(index).await?;

    println!("Memory Vault Knowledge Base Stats");
    println!("=================================");
    println!();
    println!("  Index:       {}", config.index.url);
    println!("  Collection:  {}", stats.collection);
    println!("  Chunks:      {}", stats.total_chunks);
    println!("  Embedding:   {}", config.index.embed_model);
    Ok(())
}

/// CLI entry point for `vault check`.
///
/// Prints one line per component and fails if any is unusable.
pub async fn run_check(config: &Config, index: &dyn SimilarityIndex) -> Result<()> {
    let mut healthy = true;

    let client = OllamaClient::new(&config.generation.base_url, config.generation.timeout_secs)?;
    match client.list_models().await {
        Ok(models) => {
            println!("✓ Ollama reachable at {}", client.base_url());
            if models.is_empty() {
                println!("  no models installed");
                healthy = false;
            } else {
                println!("  models: {}", models.join(", "));
            }
            let effective = resolve_model(&config.generation.model, &models);
            if effective == config.generation.model && models.contains(&effective) {
                println!("  model:  {}", effective);
            } else if !models.is_empty() && config.generation.auto_select_model {
                println!(
                    "  model:  {} (configured '{}' not installed)",
                    effective, config.generation.model
                );
            } else {
                println!("✗ model '{}' not installed", config.generation.model);
                healthy = false;
            }
        }
        Err(e) => {
            println!("✗ {}", e);
            healthy = false;
        }
    }

    match index.count().await {
        Ok(n) => println!("✓ index '{}' has {} chunks", index.name(), n),
        Err(e) => {
            println!("✗ index '{}' unavailable: {:#}", index.name(), e);
            healthy = false;
        }
    }

    if !healthy {
        anyhow::bail!("environment check failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_vault_core::index::memory::InMemoryIndex;
    use memory_vault_core::models::Chunk;

    #[tokio::test]
    async fn test_stats_counts_chunks() {
        let index = InMemoryIndex::named("knowledge_base");
        index.insert(Chunk::new("a_0", "alpha"));
        index.insert(Chunk::new("a_1", "beta"));
        let stats = get_stats(&index).await.unwrap();
        assert_eq!(stats.collection, "knowledge_base");
        assert_eq!(stats.total_chunks, 2);
    }
}
