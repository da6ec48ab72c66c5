//! Retry orchestrator: two attempts, fail-fast on the second.
//!
//! 1. Ask with the labelled context. Validate the reply for citation
//!    validity and external references only. If it passes *and* carries
//!    evidence (a quote or code), or is the sentinel, it is accepted.
//! 2. Otherwise ask once more. The retry message states why the first reply
//!    was rejected and repeats the allowed ids. The conversation is
//!    `[system, user, assistant(first reply), user(retry)]`.
//! 3. The second reply is validated with the full rules. A rejection is
//!    terminal and is returned as [`AskError::Grounding`]; no best-effort
//!    answer is substituted.
//!
//! Generation errors abort immediately at either attempt and are never
//! retried here.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{AskError, DebugBundle, RejectReason};
use crate::generate::{ChatMessage, ChatModel, GenerationOptions};
use crate::models::ContextSet;
use crate::prompt;
use crate::validate::{self, ValidationReport, ValidationRules, SENTINEL};

/// Rules and options for one ask.
#[derive(Debug, Clone)]
pub struct AskParams {
    /// Rules for the second attempt.
    pub final_rules: ValidationRules,
    pub options: GenerationOptions,
}

impl Default for AskParams {
    fn default() -> Self {
        Self {
            final_rules: ValidationRules::full(validate::CoverageMode::Strict, true, 0.0),
            options: GenerationOptions::default(),
        }
    }
}

/// Progress notifications emitted while asking.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AskEvent {
    /// The first reply was not accepted; a retry is being sent.
    Retrying { reason: RejectReason, detail: String },
}

/// A validated answer.
#[derive(Debug, Clone, Serialize)]
pub struct GroundedAnswer {
    pub answer: String,
    pub citations: BTreeSet<String>,
    /// 0 when no context was available, otherwise 1 or 2.
    pub attempts: u8,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_failure: Option<String>,
    pub report: ValidationReport,
}

/// Ask `question` over `context` without progress notifications.
pub async fn ask<M>(
    model: &M,
    question: &str,
    context: &ContextSet,
    params: &AskParams,
) -> Result<GroundedAnswer, AskError>
where
    M: ChatModel + ?Sized,
{
    ask_with_events(model, question, context, params, |_| {}).await
}

/// Ask `question` over `context`, reporting progress through `on_event`.
pub async fn ask_with_events<M, F>(
    model: &M,
    question: &str,
    context: &ContextSet,
    params: &AskParams,
    mut on_event: F,
) -> Result<GroundedAnswer, AskError>
where
    M: ChatModel + ?Sized,
    F: FnMut(&AskEvent) + Send,
{
    let model_name = model.model_name().to_string();

    if context.is_empty() {
        info!("no context retrieved; answering with the sentinel");
        return Ok(GroundedAnswer {
            answer: SENTINEL.to_string(),
            citations: BTreeSet::new(),
            attempts: 0,
            model: model_name,
            first_failure: None,
            report: ValidationReport {
                sentinel: true,
                cited_fraction: 1.0,
                ..ValidationReport::default()
            },
        });
    }

    let allowed = context.allowed_ids();
    let user_prompt = prompt::build_user_prompt(context, question);
    let mut messages = vec![
        ChatMessage::system(prompt::system_prompt()),
        ChatMessage::user(user_prompt.clone()),
    ];
    let template = DebugBundle::new(&model_name, question, &user_prompt, allowed);

    let first = model
        .generate(&messages, &params.options)
        .await
        .map_err(|source| AskError::Generation { attempt: 1, source })?;

    let (reason, detail) =
        match validate::validate_answer(&first, allowed, &ValidationRules::citations_only(), &template)
        {
            Ok(report) if report.sentinel || report.has_evidence => {
                info!(attempts = 1, citations = report.citations.len(), "answer accepted");
                return Ok(GroundedAnswer {
                    answer: first,
                    citations: report.citations.clone(),
                    attempts: 1,
                    model: model_name,
                    first_failure: None,
                    report,
                });
            }
            Ok(_) => (
                RejectReason::MissingEvidence,
                "No quoted evidence or code from the CONTEXT".to_string(),
            ),
            Err(e) => (e.reason, e.detail),
        };

    warn!(reason = reason.code(), detail = %detail, "first attempt rejected; retrying");
    let event = AskEvent::Retrying {
        reason,
        detail: detail.clone(),
    };
    on_event(&event);

    let retry_prompt = prompt::build_retry_prompt(&detail, allowed, question);
    messages.push(ChatMessage::assistant(first.clone()));
    messages.push(ChatMessage::user(retry_prompt.clone()));

    let mut retry_template = template;
    retry_template.retry_prompt = Some(retry_prompt);
    retry_template.first_answer = Some(first);
    retry_template.first_failure_reason = Some(detail.clone());

    let second = model
        .generate(&messages, &params.options)
        .await
        .map_err(|source| AskError::Generation { attempt: 2, source })?;

    let report = validate::validate_answer(&second, allowed, &params.final_rules, &retry_template)?;
    info!(attempts = 2, citations = report.citations.len(), "answer accepted");

    Ok(GroundedAnswer {
        answer: second,
        citations: report.citations.clone(),
        attempts: 2,
        model: model_name,
        first_failure: Some(detail),
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationError;
    use crate::generate::{Role, ScriptedModel};
    use crate::models::{ContextChunk, Metadata, PayloadKind};
    use crate::validate::CoverageMode;

    fn context() -> ContextSet {
        let mut set = ContextSet::new();
        set.push(ContextChunk {
            id: "a_1".to_string(),
            text: "ROW_NUMBER assigns a sequence to each row.".to_string(),
            source: "sql/window.md".to_string(),
            source_group: "sql".to_string(),
            kind: PayloadKind::FullText,
            expanded: false,
            rank: 1,
            distance: Some(0.3),
            metadata: Metadata::new(),
        });
        set
    }

    const GOOD: &str = "\"ROW_NUMBER assigns a sequence\" to each row [chunk:a_1]";

    #[tokio::test]
    async fn test_first_attempt_with_evidence_is_accepted() {
        let model = ScriptedModel::new([GOOD]);
        let answer = ask(&model, "What does ROW_NUMBER do?", &context(), &AskParams::default())
            .await
            .unwrap();
        assert_eq!(answer.attempts, 1);
        assert!(answer.citations.contains("a_1"));
        let calls = model.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0][0].role, Role::System);
        assert!(calls[0][1].content.contains("ALLOWED CHUNK IDS: a_1"));
    }

    #[tokio::test]
    async fn test_missing_evidence_triggers_retry() {
        let model = ScriptedModel::new(["It numbers rows [chunk:a_1]", GOOD]);
        let mut events = Vec::new();
        let answer = ask_with_events(&model, "q", &context(), &AskParams::default(), |e| {
            events.push(e.clone())
        })
        .await
        .unwrap();
        assert_eq!(answer.attempts, 2);
        assert_eq!(events.len(), 1);

        let calls = model.calls();
        let roles: Vec<Role> = calls[1].iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(calls[1][2].content, "It numbers rows [chunk:a_1]");
        assert!(calls[1][3].content.contains("REJECTED because: No quoted evidence"));
    }

    #[tokio::test]
    async fn test_second_failure_is_terminal() {
        let model = ScriptedModel::new(["no citations here", "still none"]);
        let err = ask(&model, "q", &context(), &AskParams::default())
            .await
            .unwrap_err();
        match err {
            AskError::Grounding(g) => {
                assert_eq!(g.reason, RejectReason::NoCitations);
                assert_eq!(g.bundle.first_answer.as_deref(), Some("no citations here"));
                assert_eq!(
                    g.bundle.first_failure_reason.as_deref(),
                    Some("No citations found")
                );
                assert!(g.bundle.retry_prompt.is_some());
                assert_eq!(g.bundle.model_output, "still none");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_header_only_retry_is_not_accepted() {
        let model = ScriptedModel::new(["## Window functions [chunk:a_1]"; 2]);
        let err = ask(&model, "q", &context(), &AskParams::default())
            .await
            .unwrap_err();
        match err {
            AskError::Grounding(g) => assert_eq!(g.reason, RejectReason::CoverageFailure),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(model.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_sentinel_first_attempt() {
        let model = ScriptedModel::new([SENTINEL]);
        let answer = ask(&model, "q", &context(), &AskParams::default()).await.unwrap();
        assert_eq!(answer.attempts, 1);
        assert!(answer.report.sentinel);
        assert!(answer.citations.is_empty());
    }

    #[tokio::test]
    async fn test_generation_failure_is_not_retried() {
        let model = ScriptedModel::failing(GenerationError::Timeout(300));
        let err = ask(&model, "q", &context(), &AskParams::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AskError::Generation {
                attempt: 1,
                source: GenerationError::Timeout(300)
            }
        ));
        assert_eq!(model.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_lenient_final_rules_accept_partial_coverage() {
        let partial = format!("{}\n\nAn uncited remark.", GOOD);
        let model = ScriptedModel::new(["bad [chunk:zz]", partial.as_str()]);
        let params = AskParams {
            final_rules: ValidationRules::full(CoverageMode::Lenient, true, 0.0),
            ..AskParams::default()
        };
        let answer = ask(&model, "q", &context(), &params).await.unwrap();
        assert_eq!(answer.attempts, 2);
        assert_eq!(answer.report.uncited_blocks.len(), 1);
        assert!(answer.first_failure.unwrap().contains("zz"));
    }

    #[tokio::test]
    async fn test_empty_context_skips_generation() {
        let model = ScriptedModel::new(Vec::<String>::new());
        let answer = ask(&model, "q", &ContextSet::new(), &AskParams::default())
            .await
            .unwrap();
        assert_eq!(answer.attempts, 0);
        assert_eq!(answer.answer, SENTINEL);
        assert!(model.calls().is_empty());
    }
}
