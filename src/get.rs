//! Chunk retrieval by id.
//!
//! Used by both the `vault get` CLI command and `POST /tools/get_chunk_by_id`.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use memory_vault_core::index::SimilarityIndex;
use memory_vault_core::models::Metadata;

use crate::citation::{compact_metadata, format_citation, make_snippet};
use crate::tools::ToolError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ChunkFormat {
    /// Chunk text only.
    #[default]
    Raw,
    /// Headers plus a citation line.
    Markdown,
}

/// Parameters of `get_chunk_by_id`.
#[derive(Debug, Clone, Deserialize)]
pub struct GetChunk {
    pub id: String,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default)]
    pub format: ChunkFormat,
}

fn default_max_chars() -> usize {
    5000
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkResponse {
    pub id: String,
    pub format: ChunkFormat,
    pub text: String,
    pub citation: String,
    pub metadata: Metadata,
    pub snippet: String,
    pub truncated: bool,
}

/// Fetch one chunk. Unknown ids are [`ToolError::NotFound`].
pub async fn get_chunk_by_id(
    index: &dyn SimilarityIndex,
    req: &GetChunk,
) -> Result<ChunkResponse, ToolError> {
    let id = req.id.trim();
    if id.is_empty() {
        return Err(ToolError::BadRequest("id must not be empty".to_string()));
    }

    let mut found = index.get_by_ids(&[id.to_string()]).await?;
    let chunk = found
        .remove(id)
        .ok_or_else(|| ToolError::NotFound(format!("chunk not found: {}", id)))?;

    let mut body = chunk.text.trim().to_string();
    let mut truncated = false;
    if req.max_chars > 0 {
        if let Some((cut, _)) = body.char_indices().nth(req.max_chars) {
            body = format!("{}…", body[..cut].trim_end());
            truncated = true;
        }
    }

    let citation = format_citation(&chunk.metadata);
    let text = match req.format {
        ChunkFormat::Raw => body.clone(),
        ChunkFormat::Markdown => format!(
            "# Chunk\n\n**ID:** {}\n\n**Cite:** {}\n\n## Text\n\n{}\n",
            id, citation, body
        ),
    };

    Ok(ChunkResponse {
        id: id.to_string(),
        format: req.format,
        snippet: make_snippet(&body, 400),
        text,
        citation,
        metadata: compact_metadata(&chunk.metadata),
        truncated,
    })
}

/// CLI entry point for `vault get`.
pub async fn run_get(index: &dyn SimilarityIndex, req: &GetChunk) -> Result<()> {
    let chunk = get_chunk_by_id(index, req).await?;

    if chunk.format == ChunkFormat::Raw {
        println!("--- Chunk ---");
        println!("id:        {}", chunk.id);
        println!("cite:      {}", chunk.citation);
        if chunk.truncated {
            println!("truncated: yes ({} chars)", req.max_chars);
        }
        println!();
    }
    println!("{}", chunk.text);
    Ok(())
}
