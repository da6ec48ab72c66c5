//! Tool interface exposed to agents over HTTP.
//!
//! Every capability of the vault is a [`Tool`]: a named operation with a
//! JSON-Schema parameter description and an async `execute`. The server
//! lists them at `GET /tools/list` and dispatches `POST /tools/{name}`.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                ToolRegistry                  │
//! │  query_knowledge_base   get_chunk_by_id      │
//! │  get_knowledge_base_stats   ask              │
//! └──────────────────────┬───────────────────────┘
//!                        ▼
//!        ToolContext { config, index, model }
//! ```
//!
//! Custom tools can be added with [`ToolRegistry::register`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;

use memory_vault_core::error::{AskError, GenerationError, GroundingError};
use memory_vault_core::generate::ChatModel;
use memory_vault_core::index::SimilarityIndex;

use crate::ask::{answer_question, AskFailure, AskRequest};
use crate::config::Config;
use crate::get::{get_chunk_by_id, GetChunk};
use crate::search::{query_knowledge_base, KbQuery};
use crate::stats::get_stats;

/// Failure of a tool invocation.
///
/// The variant decides the HTTP status the server answers with.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Malformed or out-of-range parameters.
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    /// The model's answers were rejected by the grounding validator.
    #[error(transparent)]
    Grounding(GroundingError),
    #[error("generation failed on attempt {attempt}: {source}")]
    Generation {
        attempt: u8,
        #[source]
        source: GenerationError,
    },
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl From<AskError> for ToolError {
    fn from(err: AskError) -> Self {
        match err {
            AskError::Grounding(e) => ToolError::Grounding(e),
            AskError::Generation { attempt, source } => ToolError::Generation { attempt, source },
        }
    }
}

impl From<AskFailure> for ToolError {
    fn from(failure: AskFailure) -> Self {
        failure.error.into()
    }
}

/// Deserialize tool parameters, reporting problems as [`ToolError::BadRequest`].
pub fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, ToolError> {
    let params = if params.is_null() { json!({}) } else { params };
    serde_json::from_value(params)
        .map_err(|e| ToolError::BadRequest(format!("invalid parameters: {}", e)))
}

/// A named operation agents can discover and call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Route name (`POST /tools/{name}`).
    fn name(&self) -> &str;

    /// One-line description for agent discovery.
    fn description(&self) -> &str;

    /// JSON Schema of the parameter object.
    fn parameters_schema(&self) -> Value;

    /// Run the tool. The returned value is wrapped in `{ "result": ... }`.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError>;
}

/// Shared handles a tool runs against.
///
/// Created once at server start; cloned `Arc`s make it cheap to hand to
/// spawned tasks.
#[derive(Clone)]
pub struct ToolContext {
    pub config: Arc<Config>,
    pub index: Arc<dyn SimilarityIndex>,
    pub model: Arc<dyn ChatModel>,
}

impl ToolContext {
    pub fn new(
        config: Arc<Config>,
        index: Arc<dyn SimilarityIndex>,
        model: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            config,
            index,
            model,
        }
    }
}

pub struct QueryKnowledgeBaseTool;

#[async_trait]
impl Tool for QueryKnowledgeBaseTool {
    fn name(&self) -> &str {
        "query_knowledge_base"
    }

    fn description(&self) -> &str {
        "Semantic search over the knowledge base; returns snippets with citations"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" },
                "n_results": { "type": "integer", "minimum": 1, "default": 5 },
                "snippet_chars": { "type": "integer", "default": 400 },
                "include_full_text": { "type": "boolean", "default": false }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let req: KbQuery = parse_params(params)?;
        let resp = query_knowledge_base(ctx.index.as_ref(), &req).await?;
        Ok(serde_json::to_value(resp).map_err(anyhow::Error::from)?)
    }
}

pub struct GetChunkTool;

#[async_trait]
impl Tool for GetChunkTool {
    fn name(&self) -> &str {
        "get_chunk_by_id"
    }

    fn description(&self) -> &str {
        "Fetch one chunk by id, as raw text or markdown"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "description": "Chunk id" },
                "max_chars": { "type": "integer", "default": 5000 },
                "format": { "type": "string", "enum": ["raw", "markdown"], "default": "raw" }
            },
            "required": ["id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let req: GetChunk = parse_params(params)?;
        let resp = get_chunk_by_id(ctx.index.as_ref(), &req).await?;
        Ok(serde_json::to_value(resp).map_err(anyhow::Error::from)?)
    }
}

pub struct StatsTool;

#[async_trait]
impl Tool for StatsTool {
    fn name(&self) -> &str {
        "get_knowledge_base_stats"
    }

    fn description(&self) -> &str {
        "Collection name and chunk count"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let stats = get_stats(ctx.index.as_ref()).await?;
        Ok(serde_json::to_value(stats).map_err(anyhow::Error::from)?)
    }
}

/// Grounded question answering. Rejected answers surface as
/// [`ToolError::Grounding`] with the debug bundle attached.
pub struct AskTool;

#[async_trait]
impl Tool for AskTool {
    fn name(&self) -> &str {
        "ask"
    }

    fn description(&self) -> &str {
        "Answer a question from the knowledge base with validated citations"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": { "type": "string" },
                "mode": { "type": "string", "enum": ["strict", "lenient"] },
                "source_group": { "type": "string", "description": "Restrict retrieval to one group" },
                "require_evidence": { "type": "boolean" }
            },
            "required": ["question"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let req: AskRequest = parse_params(params)?;
        if req.question.trim().is_empty() {
            return Err(ToolError::BadRequest("question must not be empty".to_string()));
        }
        let resp = answer_question(
            &ctx.config,
            ctx.index.as_ref(),
            ctx.model.as_ref(),
            &req,
            |_| {},
        )
        .await?;
        Ok(serde_json::to_value(resp).map_err(anyhow::Error::from)?)
    }
}

/// Registry of the tools the server exposes.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry with the four built-in tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(QueryKnowledgeBaseTool));
        registry.register(Box::new(GetChunkTool));
        registry.register(Box::new(StatsTool));
        registry.register(Box::new(AskTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
