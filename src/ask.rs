//! Question answering: retrieval plus the grounded two-attempt ask.
//!
//! Every question runs against its own configuration snapshot. Per-request
//! overrides (coverage mode, evidence requirement) derive a fresh
//! [`Config`] instead of touching the shared one, so concurrent questions
//! never observe each other's settings.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use memory_vault_core::ask::{ask_with_events, AskEvent, GroundedAnswer};
use memory_vault_core::error::{AskError, RejectReason};
use memory_vault_core::generate::ChatModel;
use memory_vault_core::index::SimilarityIndex;
use memory_vault_core::models::{Diagnostics, PayloadKind};
use memory_vault_core::retrieve::retrieve_context;
use memory_vault_core::validate::CoverageMode;

use crate::chroma::ChromaIndex;
use crate::config::Config;
use crate::ollama::OllamaChat;
use crate::session::{QuerySession, SessionEvent};

/// One question and its per-request overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub mode: Option<CoverageMode>,
    #[serde(default)]
    pub source_group: Option<String>,
    #[serde(default)]
    pub require_evidence: Option<bool>,
}

impl AskRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }

    /// The configuration this request runs with.
    pub fn snapshot(&self, base: &Arc<Config>) -> Arc<Config> {
        if self.mode.is_none() && self.require_evidence.is_none() {
            return Arc::clone(base);
        }
        let mut derived = (**base).clone();
        if let Some(mode) = self.mode {
            derived = derived.with_validation_mode(mode);
        }
        if let Some(require) = self.require_evidence {
            derived = derived.with_require_evidence(require);
        }
        Arc::new(derived)
    }
}

/// A context entry as reported back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct ContextRef {
    pub id: String,
    pub source: String,
    pub kind: PayloadKind,
    pub expanded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub query_id: Uuid,
    pub question: String,
    pub answered_at: DateTime<Utc>,
    #[serde(flatten)]
    pub answer: GroundedAnswer,
    pub context: Vec<ContextRef>,
    pub diagnostics: Diagnostics,
}

impl AskResponse {
    /// Source path of a cited id, if it was in the context.
    pub fn source_of(&self, id: &str) -> Option<&str> {
        self.context
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.source.as_str())
    }
}

/// A question that produced no acceptable answer.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct AskFailure {
    pub query_id: Uuid,
    pub diagnostics: Diagnostics,
    #[source]
    pub error: AskError,
}

/// Progress reported while a question is being answered.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AskProgress {
    Retrieved {
        chunks: usize,
        sources: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        fetch_error: Option<String>,
    },
    Retrying {
        reason: RejectReason,
        detail: String,
    },
}

/// Run retrieval and the grounded ask for one request.
pub async fn answer_question<F>(
    config: &Arc<Config>,
    index: &dyn SimilarityIndex,
    model: &dyn ChatModel,
    request: &AskRequest,
    mut on_progress: F,
) -> Result<AskResponse, AskFailure>
where
    F: FnMut(AskProgress) + Send,
{
    let query_id = Uuid::new_v4();
    let snapshot = request.snapshot(config);
    info!(%query_id, question = %request.question, "answering question");

    let retrieval = retrieve_context(
        index,
        &request.question,
        request.source_group.as_deref(),
        &snapshot.retrieval_params(false),
    )
    .await;
    on_progress(AskProgress::Retrieved {
        chunks: retrieval.context.len(),
        sources: retrieval.diagnostics.sources_used.clone(),
        fetch_error: retrieval.diagnostics.fetch_error.clone(),
    });

    let result = ask_with_events(
        model,
        &request.question,
        &retrieval.context,
        &snapshot.ask_params(),
        |event| match event {
            AskEvent::Retrying { reason, detail } => on_progress(AskProgress::Retrying {
                reason: *reason,
                detail: detail.clone(),
            }),
        },
    )
    .await;

    let context = retrieval
        .context
        .chunks()
        .iter()
        .map(|c| ContextRef {
            id: c.id.clone(),
            source: c.source.clone(),
            kind: c.kind,
            expanded: c.expanded,
        })
        .collect();

    match result {
        Ok(answer) => Ok(AskResponse {
            query_id,
            question: request.question.clone(),
            answered_at: Utc::now(),
            answer,
            context,
            diagnostics: retrieval.diagnostics,
        }),
        Err(error) => Err(AskFailure {
            query_id,
            diagnostics: retrieval.diagnostics,
            error,
        }),
    }
}

/// CLI entry point for `vault ask`.
///
/// Progress goes to stderr; the answer (or its JSON) to stdout. A rejected
/// answer prints the debug bundle to stderr and fails the command.
pub async fn run_ask(config: Config, request: AskRequest, json: bool) -> anyhow::Result<()> {
    if request.question.trim().is_empty() {
        anyhow::bail!("question must not be empty");
    }

    let index = ChromaIndex::new(&config.index, &config.generation)?;
    let model = OllamaChat::connect(&config.generation).await?;
    let session = QuerySession::new(Arc::new(config), Arc::new(index), Arc::new(model));

    let mut events = session.submit(request)?;
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Retrieved {
                chunks,
                sources,
                fetch_error,
            } => {
                if let Some(err) = fetch_error {
                    eprintln!("Warning: {}", err);
                }
                eprintln!("Retrieved {} chunks from {} sources", chunks, sources.len());
            }
            SessionEvent::Retrying { reason, detail } => {
                eprintln!("First answer rejected ({}): {}; retrying", reason, detail);
            }
            SessionEvent::Finished(result) => match *result {
                Ok(resp) => {
                    print_answer(&resp, json)?;
                    return Ok(());
                }
                Err(failure) => {
                    if let AskError::Grounding(ref e) = failure.error {
                        eprintln!("{}", e.bundle.render());
                    }
                    return Err(failure.into());
                }
            },
        }
    }
    anyhow::bail!("answer task ended without a result")
}

fn print_answer(resp: &AskResponse, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(resp)?);
        return Ok(());
    }

    println!("{}", resp.answer.answer.trim());
    if !resp.answer.citations.is_empty() {
        println!();
        println!("Sources:");
        for id in &resp.answer.citations {
            println!("  [chunk:{}] {}", id, resp.source_of(id).unwrap_or("?"));
        }
    }
    Ok(())
}
