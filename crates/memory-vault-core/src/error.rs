//! Typed failures for the grounding pipeline.
//!
//! Validation problems are always raised as a [`GroundingError`] carrying a
//! machine-readable [`RejectReason`] and a [`DebugBundle`]. Problems talking
//! to the language model are a separate [`GenerationError`] and are never
//! retried. [`AskError`] is the union returned by the retry orchestrator.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::validate::ValidationStage;

/// Why an answer was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    NoCitations,
    InvalidCitationId,
    ExternalReferenceDetected,
    MissingEvidence,
    CoverageFailure,
    EmptyResponse,
}

impl RejectReason {
    /// Stable code used in logs and JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::NoCitations => "no_citations",
            RejectReason::InvalidCitationId => "invalid_citation_id",
            RejectReason::ExternalReferenceDetected => "external_reference_detected",
            RejectReason::MissingEvidence => "missing_evidence",
            RejectReason::CoverageFailure => "coverage_failure",
            RejectReason::EmptyResponse => "empty_response",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Everything an operator needs to see why an answer was rejected.
#[derive(Debug, Clone, Serialize)]
pub struct DebugBundle {
    pub model: String,
    pub question: String,
    pub allowed_ids: BTreeSet<String>,
    pub user_prompt: String,
    pub model_output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<ValidationStage>,
    pub detail: String,
    pub found_citations: BTreeSet<String>,
    pub invalid_citations: BTreeSet<String>,
    pub offending_blocks: Vec<String>,
    pub external_references: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cited_fraction: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_failure_reason: Option<String>,
    pub generated_at: DateTime<Utc>,
}

impl DebugBundle {
    pub fn new(
        model: impl Into<String>,
        question: impl Into<String>,
        user_prompt: impl Into<String>,
        allowed_ids: &BTreeSet<String>,
    ) -> Self {
        Self {
            model: model.into(),
            question: question.into(),
            allowed_ids: allowed_ids.clone(),
            user_prompt: user_prompt.into(),
            model_output: String::new(),
            reason: None,
            stage: None,
            detail: String::new(),
            found_citations: BTreeSet::new(),
            invalid_citations: BTreeSet::new(),
            offending_blocks: Vec::new(),
            external_references: Vec::new(),
            cited_fraction: None,
            retry_prompt: None,
            first_answer: None,
            first_failure_reason: None,
            generated_at: Utc::now(),
        }
    }

    /// Human-readable dump for terminals.
    pub fn render(&self) -> String {
        const PROMPT_LIMIT: usize = 3000;
        let rule = "-".repeat(70);
        let mut out = String::new();

        out.push_str(&"=".repeat(70));
        out.push_str("\nGROUNDING FAILURE - DEBUG BUNDLE\n");
        out.push_str(&"=".repeat(70));
        out.push_str(&format!("\n\nModel: {}\n", self.model));
        out.push_str(&format!(
            "Generated at: {}\n",
            self.generated_at.format("%Y-%m-%dT%H:%M:%SZ")
        ));
        out.push_str(&format!("\nAllowed chunk ids ({}):\n", self.allowed_ids.len()));
        for id in &self.allowed_ids {
            out.push_str(&format!("    - {}\n", id));
        }

        out.push_str(&format!("\nUser prompt:\n{}\n", rule));
        if self.user_prompt.chars().count() > PROMPT_LIMIT {
            let head: String = self.user_prompt.chars().take(PROMPT_LIMIT).collect();
            out.push_str(&head);
            out.push_str(&format!(
                "\n... [truncated, {} chars total]",
                self.user_prompt.chars().count()
            ));
        } else {
            out.push_str(&self.user_prompt);
        }
        out.push_str(&format!("\n{}\n", rule));

        if let Some(first) = &self.first_answer {
            out.push_str(&format!("\nFirst answer:\n{}\n{}\n{}\n", rule, first, rule));
            if let Some(why) = &self.first_failure_reason {
                out.push_str(&format!("First failure: {}\n", why));
            }
        }

        out.push_str(&format!(
            "\nRaw model output:\n{}\n{}\n{}\n",
            rule, self.model_output, rule
        ));

        if let Some(reason) = self.reason {
            out.push_str(&format!("\nFailure reason: {} ({})\n", reason, self.detail));
        }
        if let Some(stage) = self.stage {
            out.push_str(&format!("Stage: {:?}\n", stage));
        }
        if !self.found_citations.is_empty() {
            out.push_str(&format!("Citations found: {:?}\n", self.found_citations));
        }
        if !self.invalid_citations.is_empty() {
            out.push_str(&format!("Invalid citations: {:?}\n", self.invalid_citations));
        }
        if !self.external_references.is_empty() {
            out.push_str(&format!(
                "External references: {:?}\n",
                self.external_references
            ));
        }
        if let Some(fraction) = self.cited_fraction {
            out.push_str(&format!("Cited fraction: {:.2}\n", fraction));
        }
        for block in &self.offending_blocks {
            out.push_str(&format!("Offending block: {}\n", block));
        }
        out.push_str(&"=".repeat(70));
        out.push('\n');
        out
    }
}

/// A rejected answer.
#[derive(Debug, Error)]
#[error("grounding validation failed ({reason}): {detail}")]
pub struct GroundingError {
    pub reason: RejectReason,
    pub detail: String,
    pub bundle: Box<DebugBundle>,
}

/// Failure talking to the language model.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("cannot connect to language model at {endpoint}: {message}")]
    Unavailable { endpoint: String, message: String },
    #[error("language model request timed out after {0}s")]
    Timeout(u64),
    #[error("language model returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("invalid language model response: {0}")]
    InvalidResponse(String),
}

impl GenerationError {
    /// Connection refused or timed out: the endpoint is not usable right now.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            GenerationError::Unavailable { .. } | GenerationError::Timeout(_)
        )
    }
}

/// Error returned by [`crate::ask::ask`].
#[derive(Debug, Error)]
pub enum AskError {
    #[error(transparent)]
    Grounding(#[from] GroundingError),
    #[error("generation failed on attempt {attempt}: {source}")]
    Generation {
        attempt: u8,
        #[source]
        source: GenerationError,
    },
}
