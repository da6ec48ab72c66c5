//! Grounding validator.
//!
//! Decides whether a generated answer may be released. The checks run as a
//! small state machine:
//!
//! ```text
//! START ──▶ BLOCK_SPLIT ──▶ PER_BLOCK_CHECK ──▶ AGGREGATE_CHECK ──▶ ACCEPT
//!   │                                                  │
//!   └── sentinel: ACCEPT (no citations)                └──▶ REJECT(reason)
//! ```
//!
//! 1. The "insufficient evidence" sentinel (exact English literal, or the
//!    tolerant Dutch pattern) is accepted with an empty citation set.
//! 2. The answer is split into [`Block`]s.
//! 3. Each non-header block is checked for a citation in its trailing region
//!    and for evidence (a quote of at least 10 characters, or code).
//! 4. All citation ids in the answer must be non-empty and allowed.
//! 5. URLs with a dotted domain are rejected; a bare `https://` is not.
//! 6. Optionally, every cited non-code block must carry evidence.
//! 7. Coverage: an answer made only of headers is rejected; strict rejects
//!    any uncited block; lenient needs at least one cited (and, when
//!    required, evidenced) block plus `min_coverage`.
//!
//! Every rejection is a [`GroundingError`] with a full [`DebugBundle`].

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::blocks::{split_blocks, Block, BlockKind, CITATION_RE};
use crate::error::{DebugBundle, GroundingError, RejectReason};

/// Exact reply meaning "the context does not contain the answer".
pub const SENTINEL: &str = "I don't know based on the provided context.";

static SENTINEL_NL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^ik\s+weet\s+het\s+niet(?:[\s,]+(?:gebaseerd\s+op|op\s+basis\s+van|uit)\s+(?:de|het)\s+(?:gegeven|verstrekte|aangeleverde|beschikbare)\s+(?:context|informatie))?\s*\.?$",
    )
    .unwrap()
});

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[a-z][a-z0-9+.-]*://[a-z0-9](?:[a-z0-9-]*[a-z0-9])?(?:\.[a-z0-9-]+)+\S*")
        .unwrap()
});

static QUOTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""[^"\n]{10,}"|“[^”\n]{10,}”|„[^“”\n]{10,}[“”]|«[^»\n]{10,}»"#).unwrap()
});

/// Where in the state machine a decision was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStage {
    Start,
    BlockSplit,
    PerBlockCheck,
    AggregateCheck,
}

/// How uncited blocks are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverageMode {
    /// Every non-header block must be cited.
    #[default]
    Strict,
    /// At least one block must be cited (and evidenced).
    Lenient,
}

/// Which checks apply to one validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationRules {
    pub require_evidence: bool,
    /// `None` skips coverage aggregation entirely.
    pub coverage: Option<CoverageMode>,
    /// Lenient mode only: minimum cited fraction.
    pub min_coverage: f64,
}

impl ValidationRules {
    /// Citation validity and the URL check only.
    pub fn citations_only() -> Self {
        Self {
            require_evidence: false,
            coverage: None,
            min_coverage: 0.0,
        }
    }

    pub fn full(mode: CoverageMode, require_evidence: bool, min_coverage: f64) -> Self {
        Self {
            require_evidence,
            coverage: Some(mode),
            min_coverage,
        }
    }
}

/// What an accepted answer looked like.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    /// Citation ids found in the answer (empty for the sentinel).
    pub citations: BTreeSet<String>,
    /// True when the answer was the "insufficient evidence" sentinel.
    pub sentinel: bool,
    /// Non-header blocks.
    pub blocks: usize,
    pub cited_blocks: usize,
    /// Previews of blocks without a trailing citation.
    pub uncited_blocks: Vec<String>,
    /// `cited / (cited + uncited)`; 1.0 when there are no content blocks.
    pub cited_fraction: f64,
    /// Some block carries a quote or code.
    pub has_evidence: bool,
}

/// Whether `answer` is the sentinel, in either supported language.
pub fn is_sentinel(answer: &str) -> bool {
    let trimmed = answer.trim();
    trimmed == SENTINEL || SENTINEL_NL_RE.is_match(trimmed)
}

/// All citation ids in `text`.
pub fn extract_citations(text: &str) -> BTreeSet<String> {
    CITATION_RE
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

/// URLs with a scheme and a dotted domain.
pub fn find_external_references(text: &str) -> Vec<String> {
    URL_RE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

fn has_evidence(block: &Block) -> bool {
    block.kind == BlockKind::Code || block.text.contains("```") || QUOTE_RE.is_match(&block.text)
}

struct BlockCheck<'a> {
    block: &'a Block,
    cited: bool,
    evidenced: bool,
}

/// Validate `answer` against `allowed_ids`.
///
/// `template` carries the model, prompt, and question; it is copied into the
/// debug bundle of any rejection.
pub fn validate_answer(
    answer: &str,
    allowed_ids: &BTreeSet<String>,
    rules: &ValidationRules,
    template: &DebugBundle,
) -> Result<ValidationReport, GroundingError> {
    // START
    let trimmed = answer.trim();
    if is_sentinel(trimmed) {
        debug!("sentinel answer accepted");
        return Ok(ValidationReport {
            sentinel: true,
            cited_fraction: 1.0,
            ..ValidationReport::default()
        });
    }
    let mut bundle = template.clone();
    bundle.model_output = answer.to_string();
    bundle.allowed_ids = allowed_ids.clone();
    if trimmed.is_empty() {
        return Err(reject(
            bundle,
            ValidationStage::Start,
            RejectReason::EmptyResponse,
            "Empty response".to_string(),
        ));
    }

    // BLOCK_SPLIT
    let blocks = split_blocks(answer);
    let content: Vec<&Block> = blocks
        .iter()
        .filter(|b| b.kind != BlockKind::Header && !b.is_empty())
        .collect();

    // PER_BLOCK_CHECK
    let checks: Vec<BlockCheck<'_>> = content
        .iter()
        .map(|b| BlockCheck {
            block: b,
            cited: b.has_trailing_citation(),
            evidenced: has_evidence(b),
        })
        .collect();
    let cited_blocks = checks.iter().filter(|c| c.cited).count();
    let uncited: Vec<String> = checks
        .iter()
        .filter(|c| !c.cited)
        .map(|c| c.block.preview())
        .collect();
    let cited_fraction = if checks.is_empty() {
        1.0
    } else {
        cited_blocks as f64 / checks.len() as f64
    };

    // AGGREGATE_CHECK
    let found = extract_citations(answer);
    bundle.found_citations = found.clone();
    bundle.cited_fraction = Some(cited_fraction);

    if found.is_empty() {
        return Err(reject(
            bundle,
            ValidationStage::AggregateCheck,
            RejectReason::NoCitations,
            "No citations found".to_string(),
        ));
    }

    let invalid: BTreeSet<String> = found.difference(allowed_ids).cloned().collect();
    if !invalid.is_empty() {
        let detail = format!(
            "Unknown citation ids: {}",
            invalid.iter().cloned().collect::<Vec<_>>().join(", ")
        );
        bundle.invalid_citations = invalid;
        return Err(reject(
            bundle,
            ValidationStage::AggregateCheck,
            RejectReason::InvalidCitationId,
            detail,
        ));
    }

    let urls = find_external_references(answer);
    if !urls.is_empty() {
        let detail = format!("External references: {}", urls.join(", "));
        bundle.external_references = urls;
        return Err(reject(
            bundle,
            ValidationStage::AggregateCheck,
            RejectReason::ExternalReferenceDetected,
            detail,
        ));
    }

    if rules.coverage.is_some() && checks.is_empty() {
        bundle.offending_blocks = blocks.iter().map(Block::preview).collect();
        return Err(reject(
            bundle,
            ValidationStage::BlockSplit,
            RejectReason::CoverageFailure,
            "answer has no content blocks, only headers".to_string(),
        ));
    }

    if rules.require_evidence {
        let lacking: Vec<String> = checks
            .iter()
            .filter(|c| c.cited && !c.evidenced)
            .map(|c| c.block.preview())
            .collect();
        if !lacking.is_empty() {
            let detail = format!(
                "{} cited block(s) without a quote or code as evidence",
                lacking.len()
            );
            bundle.offending_blocks = lacking;
            return Err(reject(
                bundle,
                ValidationStage::PerBlockCheck,
                RejectReason::MissingEvidence,
                detail,
            ));
        }
    }

    if let Some(mode) = rules.coverage {
        if !uncited.is_empty() {
            match mode {
                CoverageMode::Strict => {
                    let detail = format!(
                        "{} of {} blocks have no trailing citation",
                        uncited.len(),
                        checks.len()
                    );
                    bundle.offending_blocks = uncited;
                    return Err(reject(
                        bundle,
                        ValidationStage::AggregateCheck,
                        RejectReason::CoverageFailure,
                        detail,
                    ));
                }
                CoverageMode::Lenient => {
                    let grounded = checks
                        .iter()
                        .any(|c| c.cited && (c.evidenced || !rules.require_evidence));
                    if !grounded || cited_fraction < rules.min_coverage {
                        let detail = if grounded {
                            format!(
                                "cited fraction {:.2} below minimum {:.2}",
                                cited_fraction, rules.min_coverage
                            )
                        } else {
                            "no block is both cited and evidenced".to_string()
                        };
                        bundle.offending_blocks = uncited;
                        return Err(reject(
                            bundle,
                            ValidationStage::AggregateCheck,
                            RejectReason::CoverageFailure,
                            detail,
                        ));
                    }
                    debug!(
                        uncited = uncited.len(),
                        cited_fraction, "lenient coverage accepted with shortfall"
                    );
                }
            }
        }
    }

    Ok(ValidationReport {
        citations: found,
        sentinel: false,
        blocks: checks.len(),
        cited_blocks,
        uncited_blocks: uncited,
        cited_fraction,
        has_evidence: checks.iter().any(|c| c.evidenced),
    })
}

fn reject(
    mut bundle: DebugBundle,
    stage: ValidationStage,
    reason: RejectReason,
    detail: String,
) -> GroundingError {
    bundle.reason = Some(reason);
    bundle.stage = Some(stage);
    bundle.detail = detail.clone();
    warn!(
        reason = reason.code(),
        stage = ?stage,
        detail = %detail,
        model = %bundle.model,
        found = ?bundle.found_citations,
        invalid = ?bundle.invalid_citations,
        offending_blocks = bundle.offending_blocks.len(),
        "answer rejected"
    );
    GroundingError {
        reason,
        detail,
        bundle: Box::new(bundle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn template() -> DebugBundle {
        DebugBundle::new("test-model", "question", "prompt", &BTreeSet::new())
    }

    fn strict() -> ValidationRules {
        ValidationRules::full(CoverageMode::Strict, true, 0.0)
    }

    fn lenient() -> ValidationRules {
        ValidationRules::full(CoverageMode::Lenient, true, 0.0)
    }

    fn no_evidence(mode: CoverageMode) -> ValidationRules {
        ValidationRules::full(mode, false, 0.0)
    }

    fn reason(result: Result<ValidationReport, GroundingError>) -> RejectReason {
        result.expect_err("expected rejection").reason
    }

    #[test]
    fn test_cited_text_accepted() {
        let report = validate_answer(
            "\"text\" [chunk:a]",
            &ids(&["a"]),
            &no_evidence(CoverageMode::Strict),
            &template(),
        )
        .unwrap();
        assert_eq!(report.citations, ids(&["a"]));
    }

    #[test]
    fn test_unknown_id_rejected() {
        let err = validate_answer(
            "\"text\" [chunk:a]",
            &ids(&["b"]),
            &no_evidence(CoverageMode::Strict),
            &template(),
        )
        .unwrap_err();
        assert_eq!(err.reason, RejectReason::InvalidCitationId);
        assert_eq!(err.bundle.invalid_citations, ids(&["a"]));
        assert_eq!(err.bundle.stage, Some(ValidationStage::AggregateCheck));
        assert_eq!(err.bundle.model, "test-model");
    }

    #[test]
    fn test_plain_text_has_no_citations() {
        let r = validate_answer("Just some words.", &ids(&["a"]), &strict(), &template());
        assert_eq!(reason(r), RejectReason::NoCitations);
    }

    #[test]
    fn test_empty_answer() {
        let r = validate_answer("   \n ", &ids(&["a"]), &strict(), &template());
        assert_eq!(reason(r), RejectReason::EmptyResponse);
    }

    #[test]
    fn test_sentinel_bypasses_everything() {
        for allowed in [ids(&[]), ids(&["a", "b"])] {
            let report = validate_answer(&format!("  {}  ", SENTINEL), &allowed, &strict(), &template())
                .unwrap();
            assert!(report.sentinel);
            assert!(report.citations.is_empty());
        }
    }

    #[test]
    fn test_dutch_sentinel_variants() {
        assert!(is_sentinel("Ik weet het niet gebaseerd op het gegeven context."));
        assert!(is_sentinel("ik weet het niet op basis van de verstrekte informatie"));
        assert!(is_sentinel("Ik weet het niet."));
        assert!(!is_sentinel("Ik weet het niet zeker, maar [chunk:a] zegt iets."));
        assert!(!is_sentinel("I don't know."));
    }

    #[test]
    fn test_mixed_valid_and_invalid_ids_rejected() {
        let answer = "\"first quoted claim\" [chunk:a]\n\n\"second quoted claim\" [chunk:zz]";
        let r = validate_answer(answer, &ids(&["a"]), &strict(), &template());
        assert_eq!(reason(r), RejectReason::InvalidCitationId);
    }

    #[test]
    fn test_real_url_rejected_bare_scheme_allowed() {
        let with_url = "See https://stackoverflow.com/questions/1 \"quoted material\" [chunk:a]";
        let r = validate_answer(with_url, &ids(&["a"]), &strict(), &template());
        let err = r.unwrap_err();
        assert_eq!(err.reason, RejectReason::ExternalReferenceDetected);
        assert_eq!(
            err.bundle.external_references,
            vec!["https://stackoverflow.com/questions/1".to_string()]
        );

        let bare = "Endpoints start with https:// and \"the host comes after\" [chunk:a]";
        assert!(validate_answer(bare, &ids(&["a"]), &strict(), &template()).is_ok());
    }

    #[test]
    fn test_page_and_chapter_words_allowed() {
        let answer = "The chapter on joins says \"use an inner join here\" on this page [chunk:a]";
        assert!(validate_answer(answer, &ids(&["a"]), &strict(), &template()).is_ok());
    }

    #[test]
    fn test_missing_evidence() {
        let answer = "Window functions operate over partitions [chunk:a]";
        let err = validate_answer(answer, &ids(&["a"]), &strict(), &template()).unwrap_err();
        assert_eq!(err.reason, RejectReason::MissingEvidence);
        assert_eq!(err.bundle.offending_blocks.len(), 1);

        // Same answer passes when evidence is not required.
        assert!(validate_answer(
            answer,
            &ids(&["a"]),
            &no_evidence(CoverageMode::Strict),
            &template()
        )
        .is_ok());
    }

    #[test]
    fn test_short_quote_is_not_evidence() {
        let answer = "It is \"short\" [chunk:a]";
        let r = validate_answer(answer, &ids(&["a"]), &strict(), &template());
        assert_eq!(reason(r), RejectReason::MissingEvidence);
    }

    #[test]
    fn test_code_block_counts_as_evidence() {
        let answer = "```sql\nSELECT ROW_NUMBER() OVER (ORDER BY id) FROM t;\n```\n[chunk:a]";
        let report = validate_answer(answer, &ids(&["a"]), &strict(), &template()).unwrap();
        assert!(report.has_evidence);
        assert_eq!(report.blocks, 1);
    }

    #[test]
    fn test_only_first_paragraph_cited_strict_vs_lenient() {
        let answer = "Ranking uses \"ROW_NUMBER assigns a sequence\" [chunk:a]\n\n\
                      It also supports partitions.\n\n\
                      Frames narrow the window.";
        let err = validate_answer(answer, &ids(&["a"]), &strict(), &template()).unwrap_err();
        assert_eq!(err.reason, RejectReason::CoverageFailure);
        assert_eq!(err.bundle.offending_blocks.len(), 2);
        assert!((err.bundle.cited_fraction.unwrap() - 1.0 / 3.0).abs() < 1e-9);

        let report = validate_answer(answer, &ids(&["a"]), &lenient(), &template()).unwrap();
        assert_eq!(report.cited_blocks, 1);
        assert_eq!(report.uncited_blocks.len(), 2);
        assert!((report.cited_fraction - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_lenient_with_header_and_partial_coverage() {
        let answer = "## SQL WINDOW Functions\n\n\
                      Here's how to use them:\n\n\
                      Use \"OVER (PARTITION BY dept)\" to group rows [chunk:a_1]\n\n\
                      Ranking: \"RANK() leaves gaps after ties\" [chunk:a_2]\n\n\
                      These are powerful tools for analytics.";
        let allowed = ids(&["a_1", "a_2"]);
        assert_eq!(
            reason(validate_answer(answer, &allowed, &strict(), &template())),
            RejectReason::CoverageFailure
        );
        let report = validate_answer(answer, &allowed, &lenient(), &template()).unwrap();
        assert_eq!(report.blocks, 4);
        assert_eq!(report.cited_blocks, 2);
    }

    #[test]
    fn test_citation_at_top_only_is_rejected_in_strict() {
        let answer = "[chunk:a] Overview of the topic.\n\n\
                      First detail without a source.\n\n\
                      Second detail without a source.";
        let r = validate_answer(
            answer,
            &ids(&["a"]),
            &no_evidence(CoverageMode::Strict),
            &template(),
        );
        assert_eq!(reason(r), RejectReason::CoverageFailure);
    }

    #[test]
    fn test_bold_uncited_sentence_rejected_in_strict() {
        let answer = "\"ROW_NUMBER assigns a sequence\" [chunk:a]\n\n\
                      **RANK is always faster than ROW_NUMBER on every database engine.**";
        let err = validate_answer(answer, &ids(&["a"]), &strict(), &template()).unwrap_err();
        assert_eq!(err.reason, RejectReason::CoverageFailure);
        assert_eq!(err.bundle.offending_blocks.len(), 1);
        assert!(err.bundle.offending_blocks[0].contains("RANK is always faster"));
    }

    #[test]
    fn test_header_only_answer_rejected() {
        for rules in [strict(), lenient(), no_evidence(CoverageMode::Strict)] {
            let err = validate_answer("## Window functions [chunk:a]", &ids(&["a"]), &rules, &template())
                .unwrap_err();
            assert_eq!(err.reason, RejectReason::CoverageFailure);
            assert_eq!(err.bundle.stage, Some(ValidationStage::BlockSplit));
        }
        // Citation checks alone still pass it.
        let report = validate_answer(
            "## Window functions [chunk:a]",
            &ids(&["a"]),
            &ValidationRules::citations_only(),
            &template(),
        )
        .unwrap();
        assert_eq!(report.blocks, 0);
    }

    #[test]
    fn test_lenient_min_coverage() {
        let answer = "\"quoted evidence one\" [chunk:a]\n\nuncited\n\nuncited again\n\nand again";
        let rules = ValidationRules::full(CoverageMode::Lenient, true, 0.5);
        let err = validate_answer(answer, &ids(&["a"]), &rules, &template()).unwrap_err();
        assert_eq!(err.reason, RejectReason::CoverageFailure);
        assert!(err.detail.contains("below minimum"));
    }

    #[test]
    fn test_lenient_needs_an_evidenced_cited_block() {
        let answer = "Claim without quote [chunk:a]\n\nuncited";
        let rules = ValidationRules::full(CoverageMode::Lenient, true, 0.0);
        // The cited block fails evidence before coverage is considered.
        assert_eq!(
            reason(validate_answer(answer, &ids(&["a"]), &rules, &template())),
            RejectReason::MissingEvidence
        );
    }

    #[test]
    fn test_citations_only_rules_skip_coverage_and_evidence() {
        let answer = "Claim [chunk:a]\n\nuncited paragraph";
        let report =
            validate_answer(answer, &ids(&["a"]), &ValidationRules::citations_only(), &template())
                .unwrap();
        assert!(!report.has_evidence);
        assert_eq!(report.uncited_blocks.len(), 1);
    }
}
