//! HTTP tool server.
//!
//! Exposes the vault to agents and editor integrations as a JSON API. All
//! tools are registered in a [`ToolRegistry`] and dispatched through the
//! same `POST /tools/{name}` handler.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/tools/list` | List all registered tools with schemas |
//! | `POST` | `/tools/{name}` | Call a tool by name |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! | Code | Status | Raised when |
//! |------|--------|-------------|
//! | `bad_request` | 400 | Parameters missing or invalid |
//! | `not_found` | 404 | Unknown tool or chunk id |
//! | `grounding_failed` | 422 | Both answers rejected; body adds `reason` and `debug` |
//! | `generation_unavailable` | 503 | Ollama unreachable or timed out |
//! | `tool_error` | 500 | Anything else |

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use memory_vault_core::error::DebugBundle;

use crate::chroma::ChromaIndex;
use crate::config::Config;
use crate::ollama::OllamaChat;
use crate::tools::{ToolContext, ToolError, ToolRegistry};

#[derive(Clone)]
struct AppState {
    tools: Arc<ToolRegistry>,
    ctx: Arc<ToolContext>,
}

/// Build the router over `ctx` with the built-in tools.
pub fn router(ctx: ToolContext) -> Router {
    router_with_tools(ctx, ToolRegistry::with_builtins())
}

/// Build the router over `ctx` with an explicit registry.
pub fn router_with_tools(ctx: ToolContext, tools: ToolRegistry) -> Router {
    let state = AppState {
        tools: Arc::new(tools),
        ctx: Arc::new(ctx),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Serve on an already-bound listener until the process ends.
pub async fn serve(listener: TcpListener, ctx: ToolContext) -> anyhow::Result<()> {
    axum::serve(listener, router(ctx)).await?;
    Ok(())
}

/// Entry point for `vault serve`: connect the Chroma index and Ollama model,
/// then bind `[server].bind`.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let index = ChromaIndex::new(&config.index, &config.generation)?;
    let model = OllamaChat::connect(&config.generation).await?;
    let bind_addr = config.server.bind.clone();

    let ctx = ToolContext::new(Arc::new(config), Arc::new(index), Arc::new(model));
    for t in ToolRegistry::with_builtins().tools() {
        info!(tool = t.name(), "registered tool");
    }

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    println!("Memory Vault listening on http://{}", bind_addr);
    serve(listener, ctx).await
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    debug: Option<Box<DebugBundle>>,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    reason: Option<String>,
    debug: Option<Box<DebugBundle>>,
}

impl AppError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
            reason: None,
            debug: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
                reason: self.reason,
                debug: self.debug,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "not_found", message)
}

fn tool_error(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "tool_error", message)
}

/// Map a tool failure to its HTTP status and error code.
fn classify_tool_error(tool_name: &str, err: ToolError) -> AppError {
    match err {
        ToolError::BadRequest(msg) => bad_request(format!("{}: {}", tool_name, msg)),
        ToolError::NotFound(msg) => not_found(format!("{}: {}", tool_name, msg)),
        ToolError::Grounding(e) => {
            warn!(tool = tool_name, reason = e.reason.code(), "answer rejected");
            let mut app = AppError::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "grounding_failed",
                format!("{}: {}", tool_name, e),
            );
            app.reason = Some(e.reason.code().to_string());
            app.debug = Some(e.bundle);
            app
        }
        ToolError::Generation { attempt, source } if source.is_unavailable() => AppError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "generation_unavailable",
            format!("{}: attempt {}: {}", tool_name, attempt, source),
        ),
        other => tool_error(format!("{}: {:#}", tool_name, anyhow::Error::from(other))),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /tools/list ============

#[derive(Serialize)]
struct ToolInfo {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    let tools = state
        .tools
        .tools()
        .iter()
        .map(|t| ToolInfo {
            name: t.name().to_string(),
            description: t.description().to_string(),
            parameters: t.parameters_schema(),
        })
        .collect();
    Json(ToolListResponse { tools })
}

// ============ POST /tools/{name} ============

async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(params): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let tool = state
        .tools
        .find(&name)
        .ok_or_else(|| not_found(format!("no tool registered with name: {}", name)))?;

    if !(params.is_object() || params.is_null()) {
        return Err(bad_request("parameters must be a JSON object"));
    }

    let result = tool
        .execute(params, &state.ctx)
        .await
        .map_err(|e| classify_tool_error(&name, e))?;

    Ok(Json(serde_json::json!({ "result": result })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_vault_core::error::GenerationError;

    #[test]
    fn test_unavailable_generation_is_503() {
        let err = ToolError::Generation {
            attempt: 1,
            source: GenerationError::Unavailable {
                endpoint: "http://localhost:11434".to_string(),
                message: "connection refused".to_string(),
            },
        };
        let app = classify_tool_error("ask", err);
        assert_eq!(app.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(app.code, "generation_unavailable");
    }

    #[test]
    fn test_http_generation_error_is_500() {
        let err = ToolError::Generation {
            attempt: 2,
            source: GenerationError::Http {
                status: 500,
                body: "model crashed".to_string(),
            },
        };
        let app = classify_tool_error("ask", err);
        assert_eq!(app.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(app.message.contains("model crashed"));
    }

    #[test]
    fn test_not_found_keeps_message() {
        let err = ToolError::NotFound("chunk not found: x".into());
        let app = classify_tool_error("get_chunk_by_id", err);
        assert_eq!(app.status, StatusCode::NOT_FOUND);
        assert_eq!(app.message, "get_chunk_by_id: chunk not found: x");
    }
}
