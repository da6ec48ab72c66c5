//! End-to-end tests of the HTTP tool server.
//!
//! The server runs over an in-memory index and a scripted model, so these
//! tests need neither Chroma nor Ollama.

use std::sync::Arc;

use async_trait::async_trait;
use memory_vault::config::Config;
use memory_vault::server::{router_with_tools, serve};
use memory_vault::tools::{Tool, ToolContext, ToolError, ToolRegistry};
use memory_vault_core::error::GenerationError;
use memory_vault_core::generate::{ChatModel, ScriptedModel};
use memory_vault_core::index::memory::InMemoryIndex;
use memory_vault_core::models::Chunk;
use serde_json::{json, Value};

// ─── Helpers ────────────────────────────────────────────────────────

fn corpus() -> InMemoryIndex {
    let index = InMemoryIndex::named("knowledge_base");
    index.insert_with_distance(
        Chunk::new(
            "sqlhash_0",
            "A window function performs a calculation across a set of rows related to the current row.",
        )
        .with_meta("filename", "window.md")
        .with_meta("relative_path", "sql/window.md")
        .with_meta("source_group", "sql")
        .with_meta("chunk_id", 0),
        0.3,
    );
    index.insert_with_distance(
        Chunk::new(
            "dockhash_0",
            "Named volumes survive container removal and can be shared.",
        )
        .with_meta("filename", "volumes.md")
        .with_meta("relative_path", "docker/volumes.md")
        .with_meta("source_group", "docker"),
        0.6,
    );
    index
}

fn context_with(model: impl ChatModel + 'static) -> ToolContext {
    ToolContext::new(Arc::new(Config::default()), Arc::new(corpus()), Arc::new(model))
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

/// Start a server over `ctx` and return its base URL.
async fn start(ctx: ToolContext) -> String {
    let port = find_free_port();
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .unwrap();
    tokio::spawn(async move {
        let _ = serve(listener, ctx).await;
    });
    wait_for_server(port).await;
    format!("http://127.0.0.1:{}", port)
}

async fn call(base: &str, tool: &str, params: Value) -> (u16, Value) {
    let resp = reqwest::Client::new()
        .post(format!("{}/tools/{}", base, tool))
        .json(&params)
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_and_tool_list() {
    let base = start(context_with(ScriptedModel::new(Vec::<String>::new()))).await;

    let health: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["version"], env!("CARGO_PKG_VERSION"));

    let list: Value = reqwest::get(format!("{}/tools/list", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let names: Vec<&str> = list["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(
        names,
        vec![
            "query_knowledge_base",
            "get_chunk_by_id",
            "get_knowledge_base_stats",
            "ask"
        ]
    );
}

#[tokio::test]
async fn test_query_and_get_chunk() {
    let base = start(context_with(ScriptedModel::new(Vec::<String>::new()))).await;

    let (status, body) = call(
        &base,
        "query_knowledge_base",
        json!({ "query": "window", "n_results": 1 }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["result"]["count"], 1);
    assert_eq!(body["result"]["items"][0]["id"], "sqlhash_0");
    assert_eq!(
        body["result"]["items"][0]["citation"],
        "path=sql/window.md | chunk=0"
    );

    let (status, body) = call(
        &base,
        "get_chunk_by_id",
        json!({ "id": "dockhash_0", "format": "markdown" }),
    )
    .await;
    assert_eq!(status, 200);
    assert!(body["result"]["text"]
        .as_str()
        .unwrap()
        .starts_with("# Chunk"));
}

#[tokio::test]
async fn test_error_contract() {
    let base = start(context_with(ScriptedModel::new(Vec::<String>::new()))).await;

    let (status, body) = call(&base, "query_knowledge_base", json!({ "query": "" })).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, body) = call(&base, "get_chunk_by_id", json!({ "id": "missing_1" })).await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "not_found");

    let (status, body) = call(&base, "no_such_tool", json!({})).await;
    assert_eq!(status, 404);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("no_such_tool"));
}

#[tokio::test]
async fn test_ask_accepts_grounded_answer() {
    let model = ScriptedModel::new([
        "A window function computes \"across a set of rows related to the current row\" [chunk:sqlhash_0]",
    ]);
    let base = start(context_with(model)).await;

    let question = json!({ "question": "What is a window function?" });
    let (status, body) = call(&base, "ask", question).await;
    assert_eq!(status, 200, "body: {}", body);
    let result = &body["result"];
    assert_eq!(result["attempts"], 1);
    assert_eq!(result["citations"], json!(["sqlhash_0"]));
    assert!(result["diagnostics"]["final_count"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn test_ask_rejection_returns_debug_bundle() {
    let model = ScriptedModel::new([
        "See https://example.com/docs [chunk:sqlhash_0]",
        "Still see https://example.com/docs [chunk:sqlhash_0]",
    ]);
    let base = start(context_with(model)).await;

    let question = json!({ "question": "What is a window function?" });
    let (status, body) = call(&base, "ask", question).await;
    assert_eq!(status, 422);
    assert_eq!(body["error"]["code"], "grounding_failed");
    assert_eq!(body["error"]["reason"], "external_reference_detected");
    let debug = &body["error"]["debug"];
    assert!(debug["first_answer"]
        .as_str()
        .unwrap()
        .contains("example.com"));
    assert_eq!(debug["allowed_ids"], json!(["dockhash_0", "sqlhash_0"]));
}

#[tokio::test]
async fn test_ask_with_model_down_is_503() {
    let model = ScriptedModel::failing(GenerationError::Unavailable {
        endpoint: "http://127.0.0.1:11434".to_string(),
        message: "connection refused".to_string(),
    });
    let base = start(context_with(model)).await;

    let (status, body) = call(&base, "ask", json!({ "question": "anything" })).await;
    assert_eq!(status, 503);
    assert_eq!(body["error"]["code"], "generation_unavailable");
}

/// A custom tool registered next to the built-ins.
struct EchoGroupTool;

#[async_trait]
impl Tool for EchoGroupTool {
    fn name(&self) -> &str {
        "echo_group"
    }

    fn description(&self) -> &str {
        "Return the source group of a chunk"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "id": { "type": "string" } },
            "required": ["id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let id = params["id"].as_str().unwrap_or_default().to_string();
        let mut found = ctx.index.get_by_ids(std::slice::from_ref(&id)).await?;
        let chunk = found
            .remove(&id)
            .ok_or_else(|| ToolError::NotFound(format!("chunk not found: {}", id)))?;
        Ok(json!({ "source_group": chunk.source_group() }))
    }
}

#[tokio::test]
async fn test_custom_tool_is_dispatched() {
    let mut tools = ToolRegistry::with_builtins();
    tools.register(Box::new(EchoGroupTool));
    let ctx = context_with(ScriptedModel::new(Vec::<String>::new()));
    let app = router_with_tools(ctx, tools);

    let port = find_free_port();
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    wait_for_server(port).await;
    let base = format!("http://127.0.0.1:{}", port);

    let (status, body) = call(&base, "echo_group", json!({ "id": "dockhash_0" })).await;
    assert_eq!(status, 200);
    assert_eq!(body["result"]["source_group"], "docker");
}
