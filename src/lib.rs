//! # Kano Chunk
//!
//! Deterministic chunking and token-budget enforcement for backlog
//! semantic search.
//!
//! Raw document text is normalized, split at paragraph and sentence
//! boundaries into overlapping token windows, and each window is trimmed to
//! fit the embedding model's context. Token counting goes through a registry
//! of tokenizer adapters with an ordered fallback chain, so a missing exact
//! tokenizer degrades to an approximate count instead of failing the run.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌──────────────┐   ┌──────────────┐
//! │ raw text │──▶│ normalize │──▶│ chunk_text   │──▶│ budget       │──▶ BudgetedChunk
//! └──────────┘   └───────────┘   │ (boundaries) │   │ (trim + id)  │
//!                                └──────┬───────┘   └──────┬───────┘
//!                                       └────────┬─────────┘
//!                                                ▼
//!                                 ┌─────────────────────────────┐
//!                                 │ ResolvedTokenizer            │
//!                                 │ cache → adapter → heuristic  │
//!                                 └──────────────┬──────────────┘
//!                                                ▼
//!                                 TokenizerRegistry + fallback chain
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kano-chunk chunk notes.md              # budgeted chunks
//! kano-chunk count notes.md              # token count and method
//! kano-chunk diagnose --model bert-base-uncased
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`normalize`] | NFC normalization and whitespace canonicalization |
//! | [`boundary`] | Paragraph and sentence boundary detection |
//! | [`chunk`] | Token-window chunking and chunk IDs |
//! | [`budget`] | Safety margins and trimming to a token budget |
//! | [`tokenizer`] | Tokenizer adapters (heuristic, tiktoken, huggingface) |
//! | [`registry`] | Adapter registry, fallback chain, resolved tokenizer |
//! | [`recovery`] | Recovery attempts and degradation history |
//! | [`cache`] | LRU token-count cache with TTL |
//! | [`telemetry`] | Per-operation telemetry sink and collector |
//! | [`diagnostics`] | Adapter chain probing |
//! | [`accuracy`] | Grading adapter counts against known token counts |
//! | [`pipeline`] | Config-driven entry point |
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy and recovery suggestions |
//! | [`stats`] | Cache and degradation statistics |

pub mod accuracy;
pub mod boundary;
pub mod budget;
pub mod cache;
pub mod chunk;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod recovery;
pub mod registry;
pub mod stats;
pub mod telemetry;
pub mod tokenizer;

pub use error::{Result, TokenizerError};
pub use pipeline::{default_pipeline, Pipeline};
