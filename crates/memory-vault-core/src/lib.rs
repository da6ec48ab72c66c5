//! # Memory Vault Core
//!
//! Pure logic for grounded question answering over a private corpus:
//! candidate fetching, evidence classification, relevance-biased selection,
//! context assembly, prompt construction, and citation-grounding validation
//! with a bounded retry protocol.
//!
//! This crate performs no network or filesystem I/O. The similarity index
//! and the chat model are consumed through the [`index::SimilarityIndex`]
//! and [`generate::ChatModel`] traits; concrete adapters live in the
//! `memory-vault` app crate.
//!
//! ## Pipeline
//!
//! ```text
//! question ─▶ fetch ─▶ classify (drop TOC) ─▶ select (bias + diversity)
//!                                                   │
//!            validated answer ◀─ retry ◀─ validate ◀┴─ assemble ─▶ generate
//! ```
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Chunks, candidates, context sets, diagnostics |
//! | [`index`] | Similarity-index trait and in-memory implementation |
//! | [`fetch`] | Candidate fetcher (index errors degrade to empty) |
//! | [`classify`] | TOC / index-page detection |
//! | [`select`] | Relevance-biased, diversity-capped selection |
//! | [`assemble`] | Full-text / snippet promotion and PDF neighbour expansion |
//! | [`retrieve`] | End-to-end retrieval for one query |
//! | [`prompt`] | Context payload and prompt text |
//! | [`blocks`] | Answer segmentation into logical blocks |
//! | [`validate`] | Grounding validator |
//! | [`generate`] | Chat-model trait |
//! | [`ask`] | Two-attempt retry orchestrator |
//! | [`error`] | Typed failures and debug bundle |

pub mod assemble;
pub mod ask;
pub mod blocks;
pub mod classify;
pub mod error;
pub mod fetch;
pub mod generate;
pub mod index;
pub mod models;
pub mod prompt;
pub mod retrieve;
pub mod select;
pub mod validate;
