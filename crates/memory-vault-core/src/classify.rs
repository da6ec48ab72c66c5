//! Evidence classifier: detects tables of contents and index pages.
//!
//! PDF extraction in particular yields chunks that are mostly headings and
//! page numbers. They match queries well lexically but cannot support a
//! grounded claim, so they are dropped before selection (and before they can
//! consume a source's diversity budget).
//!
//! # Signals
//!
//! Each signal is evaluated independently on the chunk text:
//!
//! | Signal | Fires when |
//! |--------|------------|
//! | [`ShortLines`](TocSignal::ShortLines) | more than 5 lines and over 70% of them shorter than 60 chars |
//! | [`DotLeaders`](TocSignal::DotLeaders) | at least 3 runs of dot / ellipsis leaders |
//! | [`TrailingPageNumbers`](TocSignal::TrailingPageNumbers) | at least 5 lines ending in a 1-4 digit number |
//! | [`TocKeyword`](TocSignal::TocKeyword) | a TOC keyword is present *and* another signal fired |
//! | [`NewlineDensity`](TocSignal::NewlineDensity) | newlines exceed 8% of characters (chunks over 100 chars) |
//! | [`TitlePageLines`](TocSignal::TitlePageLines) | at least 4 lines shaped like `Title ..... 12` |
//!
//! A chunk is TOC-like when two or more signals fire.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

const SHORT_LINE_CHARS: usize = 60;
const SHORT_LINE_RATIO: f64 = 0.7;
const MIN_LINES_FOR_RATIO: usize = 5;
const MIN_LEADER_RUNS: usize = 3;
const MIN_PAGE_NUMBER_LINES: usize = 5;
const NEWLINE_DENSITY: f64 = 0.08;
const MIN_CHARS_FOR_DENSITY: usize = 100;
const MIN_TITLE_PAGE_LINES: usize = 4;
const MIN_SIGNALS: usize = 2;

static LEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\.[ \t]?){4,}|…{2,}|(?:…[ \t]){2,}").unwrap());

static PAGE_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?:^|\D)\d{1,4}$").unwrap());

static TITLE_PAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\d+(?:\.\d+)*\.?\s+)?\p{L}[^\n]{2,}?[\s.…·_-]+\d{1,4}$").unwrap()
});

static KEYWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)\btable of contents\b|\binhoudsopgave\b|^\s*(?:contents|index|inhoud|register|toc)\s*:?\s*$",
    )
    .unwrap()
});

/// One heuristic that fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TocSignal {
    ShortLines,
    DotLeaders,
    TrailingPageNumbers,
    TocKeyword,
    NewlineDensity,
    TitlePageLines,
}

/// Classification result with the signals that fired.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TocVerdict {
    pub signals: Vec<TocSignal>,
}

impl TocVerdict {
    pub fn is_toc(&self) -> bool {
        self.signals.len() >= MIN_SIGNALS
    }
}

/// Evaluate all signals on `text`.
pub fn classify(text: &str) -> TocVerdict {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let mut signals = Vec::new();

    if lines.len() > MIN_LINES_FOR_RATIO {
        let short = lines
            .iter()
            .filter(|l| l.chars().count() < SHORT_LINE_CHARS)
            .count();
        if short as f64 / lines.len() as f64 > SHORT_LINE_RATIO {
            signals.push(TocSignal::ShortLines);
        }
    }

    if LEADER_RE.find_iter(text).count() >= MIN_LEADER_RUNS {
        signals.push(TocSignal::DotLeaders);
    }

    let page_lines = lines.iter().filter(|l| PAGE_NUMBER_RE.is_match(l)).count();
    if page_lines >= MIN_PAGE_NUMBER_LINES {
        signals.push(TocSignal::TrailingPageNumbers);
    }

    let chars = text.chars().count();
    if chars > MIN_CHARS_FOR_DENSITY {
        let newlines = text.matches('\n').count();
        if newlines as f64 / chars as f64 > NEWLINE_DENSITY {
            signals.push(TocSignal::NewlineDensity);
        }
    }

    let title_lines = lines.iter().filter(|l| TITLE_PAGE_RE.is_match(l)).count();
    if title_lines >= MIN_TITLE_PAGE_LINES {
        signals.push(TocSignal::TitlePageLines);
    }

    // Keyword alone is too common in prose; it only corroborates.
    if !signals.is_empty() && KEYWORD_RE.is_match(text) {
        signals.push(TocSignal::TocKeyword);
    }

    TocVerdict { signals }
}

/// Shorthand for `classify(text).is_toc()`.
pub fn is_toc_like(text: &str) -> bool {
    classify(text).is_toc()
}
