//! Prompt text for grounded generation.
//!
//! The context payload labels every chunk with its citation token so the
//! model can copy it verbatim:
//!
//! ```text
//! [chunk:3f2a9c1d0b7e_4] source=sql/window-functions.md
//! <chunk text>
//!
//! ---
//!
//! [chunk:...] source=...
//! ```

use std::collections::BTreeSet;

use crate::models::ContextSet;
use crate::validate::SENTINEL;

/// Separator between chunks in the context payload.
pub const CHUNK_SEPARATOR: &str = "\n\n---\n\n";

/// Standing rules sent as the system message.
pub fn system_prompt() -> String {
    format!(
        "You answer questions using ONLY the CONTEXT supplied by the user.\n\
         Rules:\n\
         1. Every paragraph, list item and code block must end with a citation \
         in the exact form [chunk:<id>], using only ids from ALLOWED CHUNK IDS.\n\
         2. Support each claim with a short verbatim quote from the context in \
         double quotes, or with a fenced code block copied from the context.\n\
         3. Never mention books, websites, URLs, authors or page numbers that \
         are not in the context.\n\
         4. If the context does not answer the question, reply exactly:\n\
         {}",
        SENTINEL
    )
}

/// Render the labelled context payload.
pub fn build_context_payload(context: &ContextSet) -> String {
    context
        .chunks()
        .iter()
        .map(|c| format!("[chunk:{}] source={}\n{}", c.id, c.source, c.text))
        .collect::<Vec<_>>()
        .join(CHUNK_SEPARATOR)
}

/// Allowed ids, sorted and comma-separated.
pub fn format_allowed_ids(ids: &BTreeSet<String>) -> String {
    ids.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

/// First-attempt user message.
pub fn build_user_prompt(context: &ContextSet, question: &str) -> String {
    format!(
        "CONTEXT:\n{}\n\nALLOWED CHUNK IDS: {}\n\nQUESTION: {}",
        build_context_payload(context),
        format_allowed_ids(context.allowed_ids()),
        question
    )
}

/// Follow-up user message after a rejected first answer.
pub fn build_retry_prompt(reason: &str, allowed_ids: &BTreeSet<String>, question: &str) -> String {
    let ids = format_allowed_ids(allowed_ids);
    format!(
        "Your previous answer was REJECTED because: {reason}\n\n\
         STRICT RULES - YOU MUST FOLLOW:\n\
         1. Cite ONLY from these chunk IDs: {ids}\n\
         2. Use EXACT format [chunk:<id>] at the end of EVERY paragraph, list item and code block\n\
         3. Quote the supporting text from the CONTEXT in double quotes, or copy the code in a fenced block\n\
         4. If you CANNOT answer from the CONTEXT, respond EXACTLY with:\n   \"{SENTINEL}\"\n\
         5. Do NOT mention ANY external sources (books, websites, authors, pages, URLs)\n\n\
         Answer the question again using ONLY the provided CONTEXT.\n\n\
         QUESTION: {question}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContextChunk, Metadata, PayloadKind};

    fn set_of(ids: &[(&str, &str, &str)]) -> ContextSet {
        let mut set = ContextSet::new();
        for (i, (id, source, text)) in ids.iter().enumerate() {
            set.push(ContextChunk {
                id: id.to_string(),
                text: text.to_string(),
                source: source.to_string(),
                source_group: "misc".to_string(),
                kind: PayloadKind::FullText,
                expanded: false,
                rank: i + 1,
                distance: Some(0.2),
                metadata: Metadata::new(),
            });
        }
        set
    }

    #[test]
    fn test_context_payload_format() {
        let set = set_of(&[("a_1", "sql/a.md", "Alpha."), ("b_2", "b.md", "Beta.")]);
        assert_eq!(
            build_context_payload(&set),
            "[chunk:a_1] source=sql/a.md\nAlpha.\n\n---\n\n[chunk:b_2] source=b.md\nBeta."
        );
    }

    #[test]
    fn test_user_prompt_layout() {
        let set = set_of(&[("b_2", "b.md", "Beta."), ("a_1", "a.md", "Alpha.")]);
        let prompt = build_user_prompt(&set, "What is beta?");
        assert!(prompt.starts_with("CONTEXT:\n[chunk:b_2]"));
        assert!(prompt.contains("\n\nALLOWED CHUNK IDS: a_1, b_2\n\n"));
        assert!(prompt.ends_with("QUESTION: What is beta?"));
    }

    #[test]
    fn test_retry_prompt_mentions_reason_ids_and_sentinel() {
        let ids: BTreeSet<String> = ["x_1".to_string(), "y_2".to_string()].into_iter().collect();
        let prompt = build_retry_prompt("No citations found", &ids, "Why?");
        assert!(prompt.starts_with("Your previous answer was REJECTED because: No citations found"));
        assert!(prompt.contains("Cite ONLY from these chunk IDs: x_1, y_2"));
        assert!(prompt.contains(SENTINEL));
        assert!(prompt.ends_with("QUESTION: Why?"));
    }

    #[test]
    fn test_system_prompt_contains_sentinel() {
        assert!(system_prompt().ends_with(SENTINEL));
    }
}
