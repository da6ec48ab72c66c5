//! Answer segmentation.
//!
//! An answer is split into [`Block`]s by one forward scan over its lines.
//! Each block is a unit of citation coverage:
//!
//! - fenced code (```` ``` ```` or `~~~`) is captured whole, blank lines
//!   included, together with a citation-only line right after the closing
//!   fence;
//! - every bullet and numbered item is its own block, and lazy continuation
//!   lines belong to the item above them;
//! - markdown headers and short bold-only title lines are headers and need
//!   no citation; a bold line that reads like a sentence is a paragraph;
//! - anything else is a paragraph, ended by a blank line or by a structural
//!   line;
//! - horizontal rules only separate blocks.
//!
//! A paragraph made only of citation tokens is folded into the block before
//! it, since models often put the citation on its own line.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Citation token: `[chunk:<id>]`.
pub static CITATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[chunk:([A-Za-z0-9_:-]+)\]").unwrap());

static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#{1,6}(?:\s|$)").unwrap());

static BOLD_TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\*\*([^*]+)\*\*|__([^_]+)__):?$").unwrap());

/// Longest bold-only line still treated as a title.
pub const BOLD_TITLE_MAX_CHARS: usize = 60;

static BULLET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[-*+•]\s+\S").unwrap());

static NUMBERED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\d{1,3}|[a-zA-Z])[.)]\s+\S").unwrap());

static RULE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:-{3,}|\*{3,}|_{3,}|={3,})$").unwrap());

/// Characters of a block's tail searched for a citation.
pub const TRAILING_REGION_CHARS: usize = 100;

/// Logical kind of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Header,
    Paragraph,
    Bullet,
    Numbered,
    Code,
}

/// A contiguous unit of answer text.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub kind: BlockKind,
    pub text: String,
    /// Zero-based line where the block starts.
    pub start_line: usize,
}

impl Block {
    fn new(kind: BlockKind, line: &str, start_line: usize) -> Self {
        Self {
            kind,
            text: line.to_string(),
            start_line,
        }
    }

    fn push_line(&mut self, line: &str) {
        self.text.push('\n');
        self.text.push_str(line);
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// The last [`TRAILING_REGION_CHARS`] characters, trailing whitespace ignored.
    pub fn trailing_region(&self) -> &str {
        let text = self.text.trim_end();
        let count = text.chars().count();
        if count <= TRAILING_REGION_CHARS {
            return text;
        }
        match text.char_indices().nth(count - TRAILING_REGION_CHARS) {
            Some((start, _)) => &text[start..],
            None => text,
        }
    }

    pub fn has_trailing_citation(&self) -> bool {
        CITATION_RE.is_match(self.trailing_region())
    }

    /// Preview for debug output.
    pub fn preview(&self) -> String {
        let first = self.text.lines().next().unwrap_or("");
        let mut preview: String = first.chars().take(80).collect();
        if first.chars().count() > 80 || self.text.lines().nth(1).is_some() {
            preview.push_str("...");
        }
        format!("{:?}@{}: {}", self.kind, self.start_line + 1, preview)
    }
}

fn is_citation_only(line: &str) -> bool {
    let rest = CITATION_RE.replace_all(line, "");
    CITATION_RE.is_match(line)
        && rest
            .chars()
            .all(|c| c.is_whitespace() || matches!(c, '.' | ',' | ';' | '(' | ')' | '-'))
}

fn is_header(trimmed: &str) -> bool {
    if HEADER_RE.is_match(trimmed) {
        return true;
    }
    let Some(caps) = BOLD_TITLE_RE.captures(trimmed) else {
        return false;
    };
    let inner = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str()).trim_end();
    trimmed.chars().count() <= BOLD_TITLE_MAX_CHARS
        && !inner.ends_with(['.', '!', '?'])
        && !CITATION_RE.is_match(inner)
}

fn fence_of(trimmed: &str) -> Option<&'static str> {
    if trimmed.starts_with("```") {
        Some("```")
    } else if trimmed.starts_with("~~~") {
        Some("~~~")
    } else {
        None
    }
}

/// Split `answer` into blocks.
pub fn split_blocks(answer: &str) -> Vec<Block> {
    let lines: Vec<&str> = answer.lines().collect();
    let mut blocks: Vec<Block> = Vec::new();
    let mut current: Option<Block> = None;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim();

        if let Some(fence) = fence_of(trimmed) {
            flush(&mut blocks, current.take());
            let mut code = Block::new(BlockKind::Code, line, i);
            let mut j = i + 1;
            while j < lines.len() {
                code.push_line(lines[j]);
                j += 1;
                if lines[j - 1].trim_start().starts_with(fence) {
                    break;
                }
            }
            let mut k = j;
            while k < lines.len() && lines[k].trim().is_empty() {
                k += 1;
            }
            if k < lines.len() && is_citation_only(lines[k]) {
                code.push_line(lines[k]);
                j = k + 1;
            }
            blocks.push(code);
            i = j;
            continue;
        }

        if trimmed.is_empty() || RULE_RE.is_match(trimmed) {
            flush(&mut blocks, current.take());
        } else if is_header(trimmed) {
            flush(&mut blocks, current.take());
            blocks.push(Block::new(BlockKind::Header, line, i));
        } else if BULLET_RE.is_match(trimmed) {
            flush(&mut blocks, current.take());
            current = Some(Block::new(BlockKind::Bullet, line, i));
        } else if NUMBERED_RE.is_match(trimmed) {
            flush(&mut blocks, current.take());
            current = Some(Block::new(BlockKind::Numbered, line, i));
        } else {
            match current.as_mut() {
                Some(block) => block.push_line(line),
                None => current = Some(Block::new(BlockKind::Paragraph, line, i)),
            }
        }
        i += 1;
    }
    flush(&mut blocks, current.take());
    blocks
}

fn flush(blocks: &mut Vec<Block>, block: Option<Block>) {
    let Some(block) = block else {
        return;
    };
    if block.is_empty() {
        return;
    }
    let citation_only = block.kind == BlockKind::Paragraph && block.text.lines().all(is_citation_only);
    if citation_only {
        if let Some(prev) = blocks.iter_mut().rev().find(|b| b.kind != BlockKind::Header) {
            prev.push_line(&block.text);
            return;
        }
    }
    blocks.push(block);
}
