//! # Memory Vault
//!
//! Grounded question answering over a private, pre-indexed knowledge base.
//!
//! Memory Vault retrieves evidence from a Chroma collection, asks a local
//! Ollama model to answer using only that evidence, and releases the answer
//! only if every claim carries a `[chunk:<id>]` citation that was actually
//! supplied. The ranking and validation logic lives in
//! [`memory_vault_core`]; this crate adds configuration, the HTTP adapters,
//! the CLI, and the tool server.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────────┐   ┌──────────────┐
//! │ ChromaIndex  │──▶│ memory-vault-core │◀──│ OllamaChat   │
//! │ (retrieval)  │   │ select · validate │   │ (generation) │
//! └──────────────┘   └─────────┬─────────┘   └──────────────┘
//!                              │
//!                  ┌───────────┴───────────┐
//!                  ▼                       ▼
//!             ┌──────────┐           ┌──────────┐
//!             │   CLI    │           │   HTTP   │
//!             │ (vault)  │           │  tools   │
//!             └──────────┘           └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Layered configuration (defaults, TOML, environment) |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`chroma`] | Chroma HTTP similarity index |
//! | [`ollama`] | Ollama chat and embedding client |
//! | [`citation`] | Snippets, compact metadata, citation lines |
//! | [`search`] | Raw similarity search and retrieval preview |
//! | [`get`] | Chunk lookup by id |
//! | [`stats`] | Collection statistics and environment check |
//! | [`ask`] | Retrieval plus grounded answering for one question |
//! | [`session`] | Single-flight background query session |
//! | [`tools`] | Tool trait, registry, and built-in tools |
//! | [`server`] | HTTP tool server |

pub mod ask;
pub mod chroma;
pub mod citation;
pub mod config;
pub mod get;
pub mod logging;
pub mod ollama;
pub mod search;
pub mod server;
pub mod session;
pub mod stats;
pub mod tools;
