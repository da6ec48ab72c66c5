//! Ollama client.
//!
//! | Endpoint | Used for |
//! |----------|----------|
//! | `GET /api/tags` | Connectivity check and installed-model list |
//! | `POST /api/chat` | Answer generation ([`OllamaChat`] implements [`ChatModel`]) |
//! | `POST /api/embed` | Query embeddings for the Chroma index |
//!
//! Chat requests are sent once: a refused connection or a timeout becomes
//! [`GenerationError::Unavailable`] / [`GenerationError::Timeout`] and is
//! surfaced to the caller. Embedding requests retry 429 and 5xx responses
//! with exponential backoff (1s, 2s, 4s, ...).

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use memory_vault_core::error::GenerationError;
use memory_vault_core::generate::{ChatMessage, ChatModel, GenerationOptions};

use crate::config::GenerationConfig;

const TAGS_TIMEOUT_SECS: u64 = 10;
const EMBED_MAX_RETRIES: u32 = 3;

/// Thin HTTP client for one Ollama instance.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
    http: reqwest::Client,
    timeout_secs: u64,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f64,
    num_ctx: usize,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: Option<ChatResponseMessage>,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            timeout_secs,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Names of the installed models.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let resp = self
            .http
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(TAGS_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| {
                anyhow!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.base_url,
                    e
                )
            })?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Ollama API error {}: {}", status, body);
        }
        let tags: TagsResponse = resp.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// One non-streaming chat completion.
    pub async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<String, GenerationError> {
        let endpoint = format!("{}/api/chat", self.base_url);
        let body = ChatRequest {
            model,
            messages,
            stream: false,
            options: ChatOptions {
                temperature: options.temperature,
                num_ctx: options.context_window,
            },
        };

        let resp = self
            .http
            .post(&endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(&endpoint, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GenerationError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| self.transport_error(&endpoint, e))?;
        let content = parsed
            .message
            .map(|m| m.content)
            .ok_or_else(|| GenerationError::InvalidResponse("missing message".to_string()))?;
        debug!(model, chars = content.len(), "chat completion received");
        Ok(content)
    }

    fn transport_error(&self, endpoint: &str, e: reqwest::Error) -> GenerationError {
        if e.is_timeout() {
            GenerationError::Timeout(self.timeout_secs)
        } else if e.is_connect() || e.is_request() {
            GenerationError::Unavailable {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            }
        } else {
            GenerationError::InvalidResponse(e.to_string())
        }
    }

    /// Embed `texts` with `model`, one vector per input in order.
    pub async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=EMBED_MAX_RETRIES {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .http
                .post(format!("{}/api/embed", self.base_url))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_embed_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow!("Ollama API error {}: {}", status, body_text));
                        continue;
                    }
                    bail!("Ollama API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(anyhow!(
                        "Ollama connection error (is Ollama running at {}?): {}",
                        self.base_url,
                        e
                    ));
                    // Refused connections are not retried.
                    if e.is_connect() {
                        break;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Ollama embedding failed after retries")))
    }

    /// Embed a single query text.
    pub async fn embed_query(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        self.embed(model, &[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Empty embedding response"))
    }
}

fn parse_embed_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json["embeddings"]
        .as_array()
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|e| {
            e.as_array()
                .ok_or_else(|| anyhow!("Invalid Ollama response: embedding is not an array"))
                .map(|values| {
                    values
                        .iter()
                        .filter_map(|v| v.as_f64().map(|f| f as f32))
                        .collect()
                })
        })
        .collect()
}

/// Pick the model to use from what is installed.
///
/// Exact name, then the first model sharing the base name (the part before
/// `:`), then the first model with "grounded" in its name, then the first
/// installed model. With nothing installed the configured name is returned
/// unchanged.
pub fn resolve_model(configured: &str, available: &[String]) -> String {
    if available.iter().any(|m| m == configured) {
        return configured.to_string();
    }

    let base = configured.split(':').next().unwrap_or(configured);
    if let Some(similar) = available.iter().find(|m| m.starts_with(base)) {
        return similar.clone();
    }

    if let Some(grounded) = available
        .iter()
        .find(|m| m.to_lowercase().contains("grounded"))
    {
        return grounded.clone();
    }

    available
        .first()
        .cloned()
        .unwrap_or_else(|| configured.to_string())
}

/// [`ChatModel`] backed by Ollama's chat endpoint.
pub struct OllamaChat {
    client: OllamaClient,
    model: String,
}

impl OllamaChat {
    pub fn new(client: OllamaClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    /// Build a chat model from config, resolving the model name against the
    /// installed list when `auto_select_model` is on.
    ///
    /// An unreachable Ollama is not an error here: the configured name is
    /// kept and the failure surfaces on the first generation call.
    pub async fn connect(config: &GenerationConfig) -> Result<Self> {
        let client = OllamaClient::new(&config.base_url, config.timeout_secs)?;
        if !config.auto_select_model {
            return Ok(Self::new(client, config.model.clone()));
        }

        let model = match client.list_models().await {
            Ok(available) => {
                let effective = resolve_model(&config.model, &available);
                if effective != config.model {
                    warn!(
                        configured = %config.model,
                        using = %effective,
                        "configured model not installed; using closest match"
                    );
                }
                effective
            }
            Err(e) => {
                warn!(error = %e, "could not list Ollama models");
                config.model.clone()
            }
        };
        info!(model = %model, url = client.base_url(), "chat model ready");
        Ok(Self::new(client, model))
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<String, GenerationError> {
        self.client.chat(&self.model, messages, options).await
    }
}
